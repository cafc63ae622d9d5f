//! Slack real-time messaging runtime for karmabot.
//!
//! Holds the streaming session (handshake, frame loop, reconnect policy,
//! graceful drain), the event dispatcher that routes classified envelopes to
//! registered handlers, and the Web API client used for directory lookups
//! and replies.

mod slack_api_client;
mod slack_dispatcher;
mod slack_error;
mod slack_events;
mod slack_helpers;
mod slack_runtime;

pub use slack_api_client::{
    RtmHandshake, RtmSelf, SlackApiClient, SlackApiClientConfig, SlackResponseStatus,
    SlackWebApi, DEFAULT_SLACK_API_BASE,
};
pub use slack_dispatcher::{
    DispatchOutcome, SlackEventDispatcher, SlackEventHandler, SlackSetupHook,
};
pub use slack_error::{SlackApiError, SlackRuntimeError};
pub use slack_events::{
    PresenceChangeEvent, RtmEnvelope, SlackMessageEvent, SlackUser, SlackUserProfile,
    UserTypingEvent, RTM_KIND_HELLO, RTM_KIND_MESSAGE, RTM_KIND_PRESENCE_CHANGE,
    RTM_KIND_USER_TYPING,
};
pub use slack_helpers::retry_delay;
pub use slack_runtime::{
    run_slack_rtm, ReconnectPolicy, SessionReport, SessionState, SlackRtmRuntimeConfig,
    SlackRtmSession,
};
