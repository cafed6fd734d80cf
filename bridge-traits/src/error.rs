use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    /// Transient failure: the operation was retried up to its attempt
    /// budget and may succeed on a later run.
    #[error("Transient error after retries: {0}")]
    Transient(String),

    /// The origin rejected the request itself (malformed request, bad
    /// filter, unknown property). Retrying cannot help; the response body
    /// is preserved for diagnostics.
    #[error("Request rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Whether the failure is worth retrying on a subsequent run.
    pub fn is_transient(&self) -> bool {
        matches!(self, BridgeError::Transient(_) | BridgeError::Io(_))
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
