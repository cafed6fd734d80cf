//! Error types for the HubSpot provider

use thiserror::Error;

/// HubSpot provider errors
#[derive(Error, Debug)]
pub enum HubSpotError {
    /// 429 from the origin; `retry_after` carries the server's hint when
    /// one was sent
    #[error("Rate limited by origin (retry after {retry_after:?}s)")]
    RateLimited { retry_after: Option<u64> },

    /// 5xx from the origin
    #[error("Origin server error (status {status})")]
    Server { status: u16 },

    /// Network-level failure (timeout, connection refused)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Non-429 4xx: the request itself is malformed, retrying cannot help
    #[error("Origin rejected request (status {status}): {body}")]
    BadRequest { status: u16, body: String },

    /// Response body did not match the expected shape
    #[error("Failed to parse origin response: {0}")]
    Parse(String),

    /// Attempt budget spent; carries the last observed error
    #[error("Request failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    /// Batch endpoints accept a bounded number of inputs
    #[error("Batch size {given} exceeds the origin limit of {limit}")]
    BatchTooLarge { given: usize, limit: usize },
}

/// Coarse classification callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// May succeed on a later attempt or run
    Retryable,
    /// Deterministic failure; retrying is pointless
    FatalRequest,
}

impl HubSpotError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HubSpotError::RateLimited { .. }
            | HubSpotError::Server { .. }
            | HubSpotError::Transport(_)
            | HubSpotError::RetriesExhausted { .. } => ErrorKind::Retryable,
            HubSpotError::BadRequest { .. }
            | HubSpotError::Parse(_)
            | HubSpotError::BatchTooLarge { .. } => ErrorKind::FatalRequest,
        }
    }
}

/// Result type for HubSpot operations
pub type Result<T> = std::result::Result<T, HubSpotError>;

impl From<HubSpotError> for bridge_traits::error::BridgeError {
    fn from(error: HubSpotError) -> Self {
        use bridge_traits::error::BridgeError;

        match error {
            HubSpotError::BadRequest { status, body } => BridgeError::Rejected { status, body },
            HubSpotError::Parse(msg) => {
                BridgeError::OperationFailed(format!("Parse error: {}", msg))
            }
            HubSpotError::BatchTooLarge { .. } => BridgeError::OperationFailed(error.to_string()),
            other => BridgeError::Transient(other.to_string()),
        }
    }
}
