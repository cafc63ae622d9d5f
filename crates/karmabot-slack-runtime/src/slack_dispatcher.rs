//! Routes classified RTM envelopes to the registered handlers.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::task::JoinSet;

use crate::slack_events::{
    RTM_KIND_HELLO, RTM_KIND_MESSAGE, RTM_KIND_PRESENCE_CHANGE, RTM_KIND_USER_TYPING,
};
use crate::{
    PresenceChangeEvent, RtmEnvelope, SlackApiError, SlackMessageEvent, SlackWebApi,
    UserTypingEvent,
};

#[async_trait]
/// Reacts to one decoded event of type `E`. Runs on its own task.
pub trait SlackEventHandler<E>: Send + Sync {
    async fn handle(&self, api: Arc<dyn SlackWebApi>, event: E);
}

#[async_trait]
/// Runs after a successful handshake and before the first frame is read.
pub trait SlackSetupHook: Send + Sync {
    async fn setup(&self, api: Arc<dyn SlackWebApi>) -> Result<(), SlackApiError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Greeted,
    Spawned { handlers: usize },
    NoHandler,
    DecodeFailed,
    PassedThrough,
}

type Handler<E> = Option<Arc<dyn SlackEventHandler<E>>>;

#[derive(Default)]
/// Holds at most one handler per event kind. Setup hooks are the exception:
/// they stack and run newest-first.
pub struct SlackEventDispatcher {
    setup_hooks: Vec<Arc<dyn SlackSetupHook>>,
    message_handler: Handler<SlackMessageEvent>,
    all_message_handler: Handler<SlackMessageEvent>,
    presence_change_handler: Handler<PresenceChangeEvent>,
    user_typing_handler: Handler<UserTypingEvent>,
}

impl SlackEventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_setup_hook(&mut self, hook: Arc<dyn SlackSetupHook>) {
        self.setup_hooks.push(hook);
    }

    /// Handler for messages from other users; bot echoes never reach it.
    pub fn register_message_handler(
        &mut self,
        handler: Arc<dyn SlackEventHandler<SlackMessageEvent>>,
    ) {
        self.message_handler = Some(handler);
    }

    pub fn register_all_message_handler(
        &mut self,
        handler: Arc<dyn SlackEventHandler<SlackMessageEvent>>,
    ) {
        self.all_message_handler = Some(handler);
    }

    pub fn register_presence_change_handler(
        &mut self,
        handler: Arc<dyn SlackEventHandler<PresenceChangeEvent>>,
    ) {
        self.presence_change_handler = Some(handler);
    }

    pub fn register_user_typing_handler(
        &mut self,
        handler: Arc<dyn SlackEventHandler<UserTypingEvent>>,
    ) {
        self.user_typing_handler = Some(handler);
    }

    pub async fn run_setup_hooks(&self, api: &Arc<dyn SlackWebApi>) -> Result<(), SlackApiError> {
        for hook in self.setup_hooks.iter().rev() {
            hook.setup(api.clone()).await?;
        }
        Ok(())
    }

    /// Classifies `envelope` and spawns the matching handler onto `tasks`.
    /// Never waits for a handler to finish.
    pub fn dispatch(
        &self,
        envelope: &RtmEnvelope,
        api: &Arc<dyn SlackWebApi>,
        tasks: &mut JoinSet<()>,
    ) -> DispatchOutcome {
        match envelope.kind.as_str() {
            RTM_KIND_HELLO => {
                tracing::info!("hello from slack");
                DispatchOutcome::Greeted
            }
            RTM_KIND_PRESENCE_CHANGE => {
                spawn_single(&self.presence_change_handler, envelope, api, tasks)
            }
            RTM_KIND_USER_TYPING => spawn_single(&self.user_typing_handler, envelope, api, tasks),
            RTM_KIND_MESSAGE => self.dispatch_message(envelope, api, tasks),
            _ => {
                tracing::debug!(kind = %envelope.kind, payload = %envelope.raw, "unhandled rtm event");
                DispatchOutcome::PassedThrough
            }
        }
    }

    fn dispatch_message(
        &self,
        envelope: &RtmEnvelope,
        api: &Arc<dyn SlackWebApi>,
        tasks: &mut JoinSet<()>,
    ) -> DispatchOutcome {
        if self.message_handler.is_none() && self.all_message_handler.is_none() {
            return DispatchOutcome::NoHandler;
        }
        let Some(message) = decode_event::<SlackMessageEvent>(envelope) else {
            return DispatchOutcome::DecodeFailed;
        };

        let all_message = self.all_message_handler.clone();
        let directed = self
            .message_handler
            .clone()
            .filter(|_| !message.is_self_echo());
        let handlers = usize::from(all_message.is_some()) + usize::from(directed.is_some());
        if handlers == 0 {
            return DispatchOutcome::NoHandler;
        }

        let api = api.clone();
        tasks.spawn(async move {
            if let Some(handler) = all_message {
                handler.handle(api.clone(), message.clone()).await;
            }
            if let Some(handler) = directed {
                handler.handle(api, message).await;
            }
        });
        DispatchOutcome::Spawned { handlers }
    }
}

fn spawn_single<E>(
    handler: &Handler<E>,
    envelope: &RtmEnvelope,
    api: &Arc<dyn SlackWebApi>,
    tasks: &mut JoinSet<()>,
) -> DispatchOutcome
where
    E: DeserializeOwned + Send + 'static,
{
    let Some(handler) = handler.clone() else {
        return DispatchOutcome::NoHandler;
    };
    let Some(event) = decode_event::<E>(envelope) else {
        return DispatchOutcome::DecodeFailed;
    };
    let api = api.clone();
    tasks.spawn(async move { handler.handle(api, event).await });
    DispatchOutcome::Spawned { handlers: 1 }
}

fn decode_event<E: DeserializeOwned>(envelope: &RtmEnvelope) -> Option<E> {
    match serde_json::from_str::<E>(&envelope.raw) {
        Ok(event) => Some(event),
        Err(error) => {
            tracing::warn!(kind = %envelope.kind, %error, "skipping undecodable rtm event");
            None
        }
    }
}
