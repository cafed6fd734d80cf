use bridge_traits::error::BridgeError;
use core_warehouse::error::WarehouseError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Origin error: {0}")]
    Origin(#[from] BridgeError),

    #[error("Warehouse error: {0}")]
    Warehouse(#[from] WarehouseError),

    /// The self-healing guarantee failed: a completed reconciliation still
    /// left the active destination count different from the origin count.
    #[error(
        "Count mismatch for {object_type} after reconciliation: \
         origin has {origin_total}, destination has {destination_total}"
    )]
    CountMismatch {
        object_type: String,
        origin_total: i64,
        destination_total: i64,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SyncError {
    /// Invariant violations must abort the run; they are never retried or
    /// downgraded.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, SyncError::CountMismatch { .. })
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
