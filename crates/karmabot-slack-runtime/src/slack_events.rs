//! RTM wire payloads and envelope classification.

use serde::{Deserialize, Serialize};

use crate::SlackRuntimeError;

pub const RTM_KIND_HELLO: &str = "hello";
pub const RTM_KIND_PRESENCE_CHANGE: &str = "presence_change";
pub const RTM_KIND_MESSAGE: &str = "message";
pub const RTM_KIND_USER_TYPING: &str = "user_typing";

#[derive(Debug, Deserialize)]
struct RtmDiscriminator {
    #[serde(rename = "type", default)]
    kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// One inbound frame, classified by its `type` field.
pub struct RtmEnvelope {
    pub kind: String,
    pub raw: String,
}

impl RtmEnvelope {
    /// Decodes only the discriminator. Frames without a `type` field (for
    /// example replies to our own pings) classify as the empty kind; a frame
    /// that is not a JSON object at all is a protocol error.
    pub fn classify(raw: impl Into<String>) -> Result<Self, SlackRuntimeError> {
        let raw = raw.into();
        let discriminator = serde_json::from_str::<RtmDiscriminator>(&raw)
            .map_err(SlackRuntimeError::EnvelopeDecode)?;
        Ok(Self {
            kind: discriminator.kind,
            raw,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
/// A `message` event. An empty `user` marks an echo of the bot's own post.
pub struct SlackMessageEvent {
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub text: String,
    #[serde(rename = "ts", default)]
    pub timestamp: String,
    #[serde(default)]
    pub team: String,
}

impl SlackMessageEvent {
    pub fn is_self_echo(&self) -> bool {
        self.user.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceChangeEvent {
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub presence: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserTypingEvent {
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub user: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlackUserProfile {
    #[serde(default)]
    pub real_name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub bot_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
/// Directory entry as returned by `users.list` / `users.info`.
pub struct SlackUser {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub real_name: Option<String>,
    #[serde(default)]
    pub tz: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub profile: SlackUserProfile,
}
