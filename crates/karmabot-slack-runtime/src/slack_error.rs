//! Error types for the Slack Web API client and the RTM session.

use thiserror::Error;
use tokio_tungstenite::tungstenite;

#[derive(Debug, Error)]
/// Failures talking to the Slack Web API (directory, identity, posting).
pub enum SlackApiError {
    #[error("slack api {operation} request failed: {source}")]
    Transport {
        operation: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("slack api {operation} failed with status {status}: {body}")]
    HttpStatus {
        operation: String,
        status: u16,
        body: String,
    },
    #[error("failed to decode slack {operation}: {source}")]
    Decode {
        operation: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("slack {operation} failed: {error}")]
    NotOk { operation: String, error: String },
    #[error("slack {operation} response missing {field}")]
    MissingField { operation: String, field: String },
    #[error("failed to build slack api client: {0}")]
    Build(#[source] reqwest::Error),
}

#[derive(Debug, Error)]
/// Failures that end an RTM session.
///
/// Everything except [`SlackRuntimeError::Setup`] is a protocol error: the
/// connection is unusable and the caller decides whether to reconnect.
pub enum SlackRuntimeError {
    #[error("rtm handshake request failed: {0}")]
    Handshake(#[source] SlackApiError),
    #[error("rtm handshake rejected: {reason}")]
    HandshakeRejected { reason: String },
    #[error("rtm handshake did not return a stream url")]
    HandshakeMissingUrl,
    #[error("failed to connect rtm websocket: {0}")]
    WebSocketConnect(#[source] tungstenite::Error),
    #[error("rtm websocket connection dropped: {0}")]
    ConnectionDropped(#[source] tungstenite::Error),
    #[error("rtm websocket connection closed by remote")]
    ConnectionClosed,
    #[error("no rtm frame received within {timeout_ms}ms")]
    ReadTimeout { timeout_ms: u64 },
    #[error("failed to decode rtm envelope kind: {0}")]
    EnvelopeDecode(#[source] serde_json::Error),
    #[error("rtm setup hook failed: {0}")]
    Setup(#[source] SlackApiError),
}

impl SlackRuntimeError {
    pub fn is_protocol_error(&self) -> bool {
        !matches!(self, Self::Setup(_))
    }
}
