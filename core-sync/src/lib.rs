//! # Replication Engine
//!
//! Self-healing replication from a rate-limited CRM origin into a SQL
//! warehouse.
//!
//! ## Overview
//!
//! The engine keeps the warehouse eventually consistent with the origin
//! despite API result caps, transient failures, and interrupted runs:
//!
//! - **Windowed Fetcher** (`fetcher`): watermark-driven incremental fetch,
//!   split into bisecting time windows to stay under the origin's
//!   per-filter result cap
//! - **Reconciliation Scheduler** (`scheduler`): rations the expensive
//!   full id-set diff — forced on recorded count mismatches and on a
//!   periodic cadence, seeded from the full load on the first-ever sync
//! - **Reconciler** (`reconciler`): recovers records the incremental path
//!   missed
//! - **Soft-Delete Detector** (`deletes`): flags rows confirmed absent
//!   from a complete origin enumeration
//! - **Sync Coordinator** (`coordinator`): runs the phases strictly
//!   sequentially per object type and enforces the end-of-run count
//!   invariant

pub mod config;
pub mod coordinator;
pub mod deletes;
pub mod error;
pub mod fetcher;
pub mod reconciler;
pub mod scheduler;
pub mod window;

pub use config::SyncConfig;
pub use coordinator::{ObjectSyncReport, SyncCoordinator};
pub use deletes::SoftDeleteDetector;
pub use error::{Result, SyncError};
pub use fetcher::{FetchOutcome, IncrementalFetcher};
pub use reconciler::{ReconcileOutcome, Reconciler};
pub use scheduler::{ReconcilePlan, ReconcileScheduler, RunReason};
pub use window::WindowPlanner;
