//! Unified error taxonomy.
//!
//! Every RPC handler returns an `RtError`. Non-fatal variants are echoed to
//! the client as `{e: {message, code}}` on the originating callback; fatal
//! variants additionally raise the write-state's closing level so the
//! writer terminates the socket once the error response has drained.

use thiserror::Error;

/// Top-level error type shared across the crate.
#[derive(Debug, Error)]
pub enum RtError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("not authorized")]
    NotAuthorized,

    #[error("body too large: {size} bytes exceeds max of {max} bytes")]
    BodyTooLarge { size: usize, max: usize },

    #[error("OT consistency error: {0}")]
    OtConsistency(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("upstream error: {0}")]
    Upstream(String),
}

impl RtError {
    /// Whether this error must close the socket after the response drains.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RtError::BodyTooLarge { .. } | RtError::OtConsistency(_) | RtError::Transport(_)
        )
    }

    /// Machine-readable error code for the wire `e.code` field.
    pub fn code(&self) -> &'static str {
        match self {
            RtError::Validation(_) => "validation",
            RtError::InvalidState(_) => "invalid_state",
            RtError::NotAuthorized => "not_authorized",
            RtError::BodyTooLarge { .. } => "body_too_large",
            RtError::OtConsistency(_) => "ot_consistency",
            RtError::Transport(_) => "transport",
            RtError::Upstream(_) => "upstream",
        }
    }

    /// The message shown to the client. Upstream errors never leak their
    /// internal detail onto the wire; callers should `tracing::error!` the
    /// real error before converting.
    pub fn client_message(&self) -> String {
        match self {
            RtError::Upstream(_) => "Something went wrong".to_string(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RtError>;
