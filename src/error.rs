use thiserror::Error;

/// Crate-wide error type. Variants mirror the recovery classes a caller needs
/// to distinguish: malformed wire data, exhausted time budgets, transport
/// failures, protocol violations and illegal state transitions.
#[derive(Debug, Error)]
pub enum NatNetError {
    #[error("malformed message: {reason} ({bytes} bytes remaining)")]
    Malformed { reason: String, bytes: usize },

    #[error("{operation} timed out")]
    Timeout { operation: &'static str },

    #[error("transport error during {operation}: {source}")]
    Transport {
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("invalid state: {0}")]
    State(&'static str),
}

impl NatNetError {
    pub fn malformed(reason: impl Into<String>, bytes: usize) -> Self {
        NatNetError::Malformed {
            reason: reason.into(),
            bytes,
        }
    }

    pub fn timeout(operation: &'static str) -> Self {
        NatNetError::Timeout { operation }
    }

    pub fn transport(operation: &'static str, source: std::io::Error) -> Self {
        NatNetError::Transport { operation, source }
    }
}

pub type Result<T> = std::result::Result<T, NatNetError>;
