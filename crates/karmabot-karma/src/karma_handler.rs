//! Message handling for karma updates plus the `karma` and `help` commands.

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use karmabot_slack_runtime::{
    SlackApiError, SlackEventDispatcher, SlackEventHandler, SlackMessageEvent, SlackSetupHook,
    SlackUser, SlackWebApi,
};
use regex::Regex;

use crate::karma_ledger::KarmaLedger;
use crate::karma_parser::{resolve_karma_target, scan_karma_tokens};
use crate::karma_render::{
    render_karma_help, render_karma_leaderboard, unknown_user_reply, NO_KARMA_REPLY,
    ROSTER_UNAVAILABLE_REPLY,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KarmaCommand {
    Leaderboard,
    Help,
}

#[derive(Debug, Clone)]
/// The bot's own identity, resolved once per session.
pub struct BotIdentity {
    pub user_id: String,
    pub name: String,
    command_regex: Regex,
}

impl BotIdentity {
    pub fn new(user_id: &str, name: &str) -> Result<Self, regex::Error> {
        let pattern = format!(
            "(<@{}>|{}).*(karma|help)",
            regex::escape(&user_id.to_lowercase()),
            regex::escape(&name.to_lowercase())
        );
        Ok(Self {
            user_id: user_id.to_string(),
            name: name.to_string(),
            command_regex: Regex::new(&pattern)?,
        })
    }

    pub fn from_user(user: &SlackUser) -> Result<Self, regex::Error> {
        Self::new(&user.id, &user.name)
    }

    /// Matches against the lower-cased text; the first command word after
    /// the bot reference decides.
    pub fn parse_command(&self, text: &str) -> Option<KarmaCommand> {
        let lowered = text.to_lowercase();
        let captures = self.command_regex.captures(&lowered)?;
        match captures.get(2)?.as_str() {
            "karma" => Some(KarmaCommand::Leaderboard),
            "help" => Some(KarmaCommand::Help),
            _ => None,
        }
    }
}

pub type SharedBotIdentity = Arc<RwLock<Option<BotIdentity>>>;

/// Resolves the bot identity through `whoami` after each handshake.
pub struct KarmaIdentityHook {
    identity: SharedBotIdentity,
}

impl KarmaIdentityHook {
    pub fn new(identity: SharedBotIdentity) -> Self {
        Self { identity }
    }
}

#[async_trait]
impl SlackSetupHook for KarmaIdentityHook {
    async fn setup(&self, api: Arc<dyn SlackWebApi>) -> Result<(), SlackApiError> {
        let me = api.whoami().await?;
        let identity = BotIdentity::from_user(&me).map_err(|error| SlackApiError::MissingField {
            operation: "whoami".to_string(),
            field: format!("usable bot name ({error})"),
        })?;
        tracing::info!(user_id = %identity.user_id, name = %identity.name, "resolved bot identity");
        // Written whole, so a poisoned slot is still safe to replace.
        *self.identity.write().unwrap_or_else(PoisonError::into_inner) = Some(identity);
        Ok(())
    }
}

pub struct KarmaHandler {
    ledger: Arc<KarmaLedger>,
    identity: SharedBotIdentity,
}

impl KarmaHandler {
    pub fn new(ledger: Arc<KarmaLedger>, identity: SharedBotIdentity) -> Self {
        Self { ledger, identity }
    }

    fn identity(&self) -> Option<BotIdentity> {
        self.identity
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn handle_command(
        &self,
        api: &dyn SlackWebApi,
        message: &SlackMessageEvent,
        command: KarmaCommand,
        identity: &BotIdentity,
    ) {
        let reply = match command {
            KarmaCommand::Help => render_karma_help(&identity.name),
            KarmaCommand::Leaderboard => self.leaderboard_reply(api).await,
        };
        post_reply(api, &message.channel, &reply).await;
    }

    async fn leaderboard_reply(&self, api: &dyn SlackWebApi) -> String {
        let scores = match self.ledger.snapshot() {
            Ok(scores) => scores,
            Err(error) => {
                tracing::error!(%error, "failed to read karma scores");
                return NO_KARMA_REPLY.to_string();
            }
        };
        if scores.is_empty() {
            return NO_KARMA_REPLY.to_string();
        }
        match api.users_list().await {
            Ok(roster) => render_karma_leaderboard(&scores, &roster),
            Err(error) => {
                tracing::warn!(%error, "failed to fetch users for leaderboard");
                ROSTER_UNAVAILABLE_REPLY.to_string()
            }
        }
    }

    async fn apply_karma_updates(
        &self,
        api: &dyn SlackWebApi,
        message: &SlackMessageEvent,
        bot_user_id: Option<&str>,
    ) {
        let mut roster: Option<Vec<SlackUser>> = None;
        for token in scan_karma_tokens(&message.text) {
            if token.target.needs_directory() && roster.is_none() {
                match api.users_list().await {
                    Ok(users) => roster = Some(users),
                    Err(error) => {
                        tracing::warn!(
                            channel = %message.channel,
                            %error,
                            "failed to fetch users; dropping remaining karma tokens"
                        );
                        return;
                    }
                }
            }

            let target_id =
                match resolve_karma_target(&token.target, roster.as_deref().unwrap_or(&[])) {
                    Ok(target_id) => target_id,
                    Err(error) => {
                        tracing::debug!(%error, "karma target lookup failed");
                        post_reply(api, &message.channel, &unknown_user_reply(&error.name)).await;
                        continue;
                    }
                };

            match self
                .ledger
                .apply(&message.user, &target_id, &token.deltas, bot_user_id)
            {
                Ok(outcome) => {
                    tracing::debug!(actor = %message.user, target = %target_id, ?outcome, "karma applied");
                    if let Some(reply) = outcome.reply() {
                        post_reply(api, &message.channel, reply).await;
                    }
                }
                Err(error) => {
                    tracing::error!(actor = %message.user, target = %target_id, %error, "failed to record karma");
                }
            }
        }
    }
}

#[async_trait]
impl SlackEventHandler<SlackMessageEvent> for KarmaHandler {
    async fn handle(&self, api: Arc<dyn SlackWebApi>, message: SlackMessageEvent) {
        let identity = self.identity();
        if let Some(identity) = identity.as_ref() {
            if let Some(command) = identity.parse_command(&message.text) {
                self.handle_command(api.as_ref(), &message, command, identity)
                    .await;
                return;
            }
        }
        self.apply_karma_updates(
            api.as_ref(),
            &message,
            identity.as_ref().map(|identity| identity.user_id.as_str()),
        )
        .await;
    }
}

async fn post_reply(api: &dyn SlackWebApi, channel: &str, text: &str) {
    if let Err(error) = api.post_message(channel, text).await {
        tracing::warn!(channel, %error, "failed to post reply");
    }
}

/// Wires the identity hook and the karma message handler into `dispatcher`.
pub fn register_karma_handlers(dispatcher: &mut SlackEventDispatcher, ledger: Arc<KarmaLedger>) {
    let identity = SharedBotIdentity::default();
    dispatcher.register_setup_hook(Arc::new(KarmaIdentityHook::new(identity.clone())));
    dispatcher.register_message_handler(Arc::new(KarmaHandler::new(ledger, identity)));
}
