//! Error types for the SDK core and its transport.

use crate::dispatch::StreamKind;

/// Errors raised by a [`Gateway`](crate::gateway::Gateway) implementation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GatewayError {
    /// Connectivity check failed; nothing was sent
    #[error("network offline, request not sent")]
    Offline,

    /// HTTP transport error (connect, TLS, body)
    #[error("Transport error: {0}")]
    Transport(String),

    /// HTTP status error with the response body
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Collector answered a POST with a non-success status
    #[error("collector rejected request with HTTP {status}")]
    Rejected { status: u16 },

    /// Response could not be interpreted
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Errors surfaced by session and stream operations.
#[derive(Debug, thiserror::Error)]
pub enum TallyError {
    /// No scene with a non-empty id and version is selected
    #[error("no scene selected")]
    NoSceneSelected,

    /// `end_session` called while no session is running
    #[error("session is not active")]
    SessionNotActive,

    /// Exit poll operation attempted outside a session
    #[error("ExitPoll.{operation} failed: no session active")]
    ExitPollInactive { operation: &'static str },

    /// Exit poll answers or submission without a fetched question set
    #[error("ExitPoll.{operation} failed: no question set requested")]
    NoQuestionSet { operation: &'static str },

    /// The question set payload is missing its `name:version` id
    #[error("invalid question set: {0}")]
    InvalidQuestionSet(String),

    /// A batch was cleared from memory and its delivery then failed
    #[error("{stream} batch part {part} lost: {source}")]
    BatchLost {
        stream: StreamKind,
        part: u32,
        #[source]
        source: GatewayError,
    },

    /// A non-batched request failed
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

impl TallyError {
    /// True when the failure dropped buffered records.
    pub fn is_data_loss(&self) -> bool {
        matches!(self, TallyError::BatchLost { .. })
    }
}
