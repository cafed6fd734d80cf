//! # Warehouse Persistence
//!
//! Destination-side storage for replicated CRM records.
//!
//! ## Overview
//!
//! - **Schema** (`schema`): destination tables (one per object type, no
//!   uniqueness constraint on the origin id) and the watermark table
//! - **Upsert Writer** (`writer`): staging-table + set-based merge, keyed
//!   by origin id, idempotent by construction
//! - **Watermark Store** (`watermark`): per-object-type sync state with a
//!   monotonically non-decreasing sync timestamp
//! - **Record Store** (`records`): active-id projection, active counts and
//!   soft-delete flagging
//! - **Deduplicator** (`dedup`): collapses duplicate origin ids, keeping
//!   the most information-complete row

pub mod dedup;
pub mod error;
pub mod records;
pub mod schema;
pub mod watermark;
pub mod writer;

pub use dedup::{DedupReport, Deduplicator};
pub use error::{Result, WarehouseError};
pub use records::RecordStore;
pub use schema::ensure_schema;
pub use watermark::{RunCounts, SqliteWatermarkStore, Watermark, WatermarkStore};
pub use writer::{MergeOutcome, UpsertWriter};
