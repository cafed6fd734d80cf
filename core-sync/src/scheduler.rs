//! # Reconciliation Scheduler
//!
//! Decides, per run, whether the expensive full-reconciliation pass is
//! warranted. Full reconciliation enumerates every id at the origin, so it
//! is rationed: forced periodically, forced while recorded counts disagree,
//! and skipped otherwise.

use core_warehouse::watermark::Watermark;
use tracing::debug;

use crate::config::SyncConfig;

/// Why a full reconciliation is running this cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunReason {
    /// Recorded origin/destination counts disagree; recheck every run
    /// until they match again
    CountMismatch,
    /// The cadence counter reached the configured frequency
    Periodic,
    /// Count-match skipping is disabled
    Unconditional,
}

/// Per-run reconciliation decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcilePlan {
    /// First-ever sync: the full load itself enumerates the origin, so its
    /// id set seeds the baseline without a second sweep
    Seed,
    /// Enumerate the origin and recover anything missing
    Run(RunReason),
    /// Increment the cadence counter and move on
    Skip { runs_until_due: u32 },
}

impl ReconcilePlan {
    /// Whether this cycle ends up holding a complete origin id set
    /// (required by the soft-delete detector and the count invariant).
    pub fn reconciles(&self) -> bool {
        !matches!(self, ReconcilePlan::Skip { .. })
    }
}

pub struct ReconcileScheduler {
    frequency: u32,
    skip_if_counts_match: bool,
}

impl ReconcileScheduler {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            frequency: config.reconciliation_frequency,
            skip_if_counts_match: config.skip_reconciliation_if_counts_match,
        }
    }

    /// Decide whether to reconcile given the persisted watermark.
    pub fn plan(&self, watermark: Option<&Watermark>) -> ReconcilePlan {
        let Some(watermark) = watermark else {
            return ReconcilePlan::Seed;
        };

        if let (Some(origin), Some(destination)) =
            (watermark.origin_total, watermark.destination_total)
        {
            if origin != destination {
                debug!(origin, destination, "count mismatch recorded, forcing reconciliation");
                return ReconcilePlan::Run(RunReason::CountMismatch);
            }
        }

        if watermark.reconciliation_run_count >= i64::from(self.frequency) {
            return ReconcilePlan::Run(RunReason::Periodic);
        }

        if !self.skip_if_counts_match {
            return ReconcilePlan::Run(RunReason::Unconditional);
        }

        let runs_until_due = self
            .frequency
            .saturating_sub(watermark.reconciliation_run_count as u32);
        ReconcilePlan::Skip { runs_until_due }
    }
}
