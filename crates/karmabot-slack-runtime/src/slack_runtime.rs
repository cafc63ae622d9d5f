//! Slack RTM session: handshake, websocket frame loop, and handler dispatch.

use std::{sync::Arc, time::Duration};

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::{
    sync::watch,
    task::JoinSet,
    time::{interval_at, sleep, sleep_until, Instant, MissedTickBehavior},
};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

use crate::slack_helpers::retry_delay;
use crate::{DispatchOutcome, RtmEnvelope, SlackEventDispatcher, SlackRuntimeError, SlackWebApi};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Authenticating,
    Connected,
    Streaming,
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Authenticating => "authenticating",
            Self::Connected => "connected",
            Self::Streaming => "streaming",
            Self::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// What [`SlackRtmSession::run`] does after a session-ending error.
pub enum ReconnectPolicy {
    Disabled,
    Backoff {
        max_attempts: usize,
        base_delay_ms: u64,
    },
}

impl ReconnectPolicy {
    fn delay_before_attempt(&self, failed_attempts: usize) -> Option<Duration> {
        match *self {
            Self::Disabled => None,
            Self::Backoff {
                max_attempts,
                base_delay_ms,
            } => (failed_attempts < max_attempts)
                .then(|| retry_delay(base_delay_ms, failed_attempts, None)),
        }
    }
}

#[derive(Debug, Clone)]
/// Runtime configuration for the RTM session loop.
pub struct SlackRtmRuntimeConfig {
    /// Longest silence tolerated on the socket. Zero disables the timeout.
    pub read_timeout: Duration,
    /// Keepalive ping cadence. Zero disables pings.
    pub ping_interval: Duration,
    pub reconnect_policy: ReconnectPolicy,
}

impl Default for SlackRtmRuntimeConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(90),
            ping_interval: Duration::from_secs(30),
            reconnect_policy: ReconnectPolicy::Disabled,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub sessions_started: usize,
    pub frames_received: usize,
    pub handler_tasks_spawned: usize,
    pub decode_failures: usize,
    pub passed_through: usize,
    pub handler_failures: usize,
}

/// Runs one RTM connection (plus reconnects allowed by the policy) until
/// `shutdown` flips to true or a session-ending error is not retried.
pub async fn run_slack_rtm(
    config: SlackRtmRuntimeConfig,
    api: Arc<dyn SlackWebApi>,
    dispatcher: SlackEventDispatcher,
    shutdown: watch::Receiver<bool>,
) -> Result<SessionReport, SlackRuntimeError> {
    let mut session = SlackRtmSession::new(config, api, dispatcher);
    session.run(shutdown).await?;
    Ok(session.report().clone())
}

pub struct SlackRtmSession {
    config: SlackRtmRuntimeConfig,
    api: Arc<dyn SlackWebApi>,
    dispatcher: SlackEventDispatcher,
    state: SessionState,
    in_flight: JoinSet<()>,
    report: SessionReport,
    next_ping_id: u64,
}

impl SlackRtmSession {
    pub fn new(
        config: SlackRtmRuntimeConfig,
        api: Arc<dyn SlackWebApi>,
        dispatcher: SlackEventDispatcher,
    ) -> Self {
        Self {
            config,
            api,
            dispatcher,
            state: SessionState::Idle,
            in_flight: JoinSet::new(),
            report: SessionReport::default(),
            next_ping_id: 1,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn report(&self) -> &SessionReport {
        &self.report
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Performs the handshake and runs the setup hooks. Returns the stream
    /// url; the session is `Connected` on success and `Closed` on failure.
    pub async fn start(&mut self) -> Result<String, SlackRuntimeError> {
        self.state = SessionState::Authenticating;
        let result = self.handshake().await;
        self.state = match &result {
            Ok(_) => SessionState::Connected,
            Err(_) => SessionState::Closed,
        };
        let url = result?;

        if let Err(error) = self.dispatcher.run_setup_hooks(&self.api).await {
            self.state = SessionState::Closed;
            return Err(SlackRuntimeError::Setup(error));
        }
        self.report.sessions_started = self.report.sessions_started.saturating_add(1);
        Ok(url)
    }

    async fn handshake(&self) -> Result<String, SlackRuntimeError> {
        let handshake = self
            .api
            .rtm_connect()
            .await
            .map_err(SlackRuntimeError::Handshake)?;
        if !handshake.status.ok {
            return Err(SlackRuntimeError::HandshakeRejected {
                reason: handshake
                    .status
                    .error
                    .unwrap_or_else(|| "unknown error".to_string()),
            });
        }
        if let Some(identity) = handshake.self_identity.as_ref() {
            tracing::debug!(
                bot_user_id = %identity.id,
                bot_name = %identity.name,
                "rtm handshake accepted"
            );
        }
        handshake
            .url
            .filter(|url| !url.trim().is_empty())
            .ok_or(SlackRuntimeError::HandshakeMissingUrl)
    }

    /// Reads frames from `url` until shutdown (`Ok`) or a protocol error.
    pub async fn stream(
        &mut self,
        url: &str,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), SlackRuntimeError> {
        let result = self.stream_frames(url, shutdown).await;
        self.state = SessionState::Closed;
        result
    }

    async fn stream_frames(
        &mut self,
        url: &str,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), SlackRuntimeError> {
        let (socket, _response) = connect_async(url)
            .await
            .map_err(SlackRuntimeError::WebSocketConnect)?;
        let (mut sink, mut source) = socket.split();
        self.state = SessionState::Streaming;
        tracing::info!("slack rtm socket connected");

        let read_timeout = self.config.read_timeout;
        let ping_period = self.config.ping_interval.max(Duration::from_millis(1));
        let mut ping = interval_at(Instant::now() + ping_period, ping_period);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut read_deadline = Instant::now() + read_timeout;

        loop {
            if *shutdown.borrow() {
                return Ok(());
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return Ok(());
                    }
                }
                _ = sleep_until(read_deadline), if !read_timeout.is_zero() => {
                    return Err(SlackRuntimeError::ReadTimeout {
                        timeout_ms: read_timeout.as_millis() as u64,
                    });
                }
                _ = ping.tick(), if !self.config.ping_interval.is_zero() => {
                    let frame = json!({ "id": self.next_ping_id, "type": "ping" }).to_string();
                    self.next_ping_id = self.next_ping_id.saturating_add(1);
                    sink.send(WsMessage::Text(frame.into()))
                        .await
                        .map_err(SlackRuntimeError::ConnectionDropped)?;
                }
                maybe_frame = source.next() => {
                    let Some(frame) = maybe_frame else {
                        return Err(SlackRuntimeError::ConnectionClosed);
                    };
                    let frame = frame.map_err(SlackRuntimeError::ConnectionDropped)?;
                    read_deadline = Instant::now() + read_timeout;
                    self.handle_frame(frame)?;
                }
            }
            self.reap_finished();
        }
    }

    fn handle_frame(&mut self, frame: WsMessage) -> Result<(), SlackRuntimeError> {
        let raw = match frame {
            WsMessage::Text(text) => text.as_str().to_string(),
            WsMessage::Binary(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            WsMessage::Close(_) => return Err(SlackRuntimeError::ConnectionClosed),
            WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => return Ok(()),
        };
        self.report.frames_received = self.report.frames_received.saturating_add(1);

        let envelope = RtmEnvelope::classify(raw)?;
        match self
            .dispatcher
            .dispatch(&envelope, &self.api, &mut self.in_flight)
        {
            DispatchOutcome::Spawned { .. } => {
                self.report.handler_tasks_spawned =
                    self.report.handler_tasks_spawned.saturating_add(1);
            }
            DispatchOutcome::DecodeFailed => {
                self.report.decode_failures = self.report.decode_failures.saturating_add(1);
            }
            DispatchOutcome::PassedThrough => {
                self.report.passed_through = self.report.passed_through.saturating_add(1);
            }
            DispatchOutcome::Greeted | DispatchOutcome::NoHandler => {}
        }
        Ok(())
    }

    fn reap_finished(&mut self) {
        while let Some(result) = self.in_flight.try_join_next() {
            self.record_handler_result(result);
        }
    }

    fn record_handler_result(&mut self, result: Result<(), tokio::task::JoinError>) {
        if let Err(error) = result {
            self.report.handler_failures = self.report.handler_failures.saturating_add(1);
            tracing::warn!(%error, "rtm handler task failed");
        }
    }

    /// Waits for every spawned handler task to finish.
    pub async fn drain_in_flight(&mut self) {
        let pending = self.in_flight.len();
        if pending > 0 {
            tracing::info!(pending, "draining in-flight rtm handlers");
        }
        while let Some(result) = self.in_flight.join_next().await {
            self.record_handler_result(result);
        }
    }

    /// Start + stream, retried per the reconnect policy. In-flight handlers
    /// are always drained before this returns.
    pub async fn run(
        &mut self,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), SlackRuntimeError> {
        let mut failed_attempts = 0_usize;
        loop {
            if *shutdown.borrow() {
                self.state = SessionState::Closed;
                self.drain_in_flight().await;
                return Ok(());
            }
            let frames_before = self.report.frames_received;
            let result = match self.start().await {
                Ok(url) => self.stream(&url, &mut shutdown).await,
                Err(error) => Err(error),
            };
            let error = match result {
                Ok(()) => {
                    self.drain_in_flight().await;
                    return Ok(());
                }
                Err(error) => error,
            };

            if self.report.frames_received > frames_before {
                failed_attempts = 0;
            }
            failed_attempts = failed_attempts.saturating_add(1);
            let Some(delay) = self.config.reconnect_policy.delay_before_attempt(failed_attempts)
            else {
                tracing::error!(%error, state = self.state.as_str(), "slack rtm session ended");
                self.drain_in_flight().await;
                return Err(error);
            };

            tracing::warn!(
                %error,
                attempt = failed_attempts,
                delay_ms = delay.as_millis() as u64,
                "slack rtm session failed; reconnecting"
            );
            tokio::select! {
                changed = shutdown.changed() => {
                    // Sender gone counts as shutdown, as in the frame loop.
                    if changed.is_err() {
                        self.state = SessionState::Closed;
                        self.drain_in_flight().await;
                        return Ok(());
                    }
                }
                _ = sleep(delay) => {}
            }
        }
    }
}
