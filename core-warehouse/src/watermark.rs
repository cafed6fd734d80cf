//! # Watermark Store
//!
//! Persists per-object-type sync state.
//!
//! The sync timestamp is monotonically non-decreasing: writes advance it to
//! the maximum modified timestamp actually observed and never roll it back.
//! Count fields are written only in cycles where a full reconciliation ran;
//! otherwise the stored values are kept so the scheduler's
//! mismatch-detection keeps working off real data.

use async_trait::async_trait;
use bridge_traits::time::Clock;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::{FromRow, SqlitePool};
use std::sync::Arc;
use tracing::debug;

use crate::error::{Result, WarehouseError};

/// Per-object-type sync state
#[derive(Debug, Clone, PartialEq)]
pub struct Watermark {
    pub object_type: String,

    /// High-water mark bounding the next incremental fetch
    pub last_sync_at: Option<DateTime<Utc>>,

    /// Records merged during the last run
    pub records_synced: i64,

    /// Origin total at the last reconciliation
    pub origin_total: Option<i64>,

    /// Active destination total at the last reconciliation
    pub destination_total: Option<i64>,

    /// Whether the totals matched at the last reconciliation
    pub counts_match: Option<bool>,

    /// Runs since the last full reconciliation
    pub reconciliation_run_count: i64,

    pub last_reconciliation_at: Option<DateTime<Utc>>,

    pub updated_at: DateTime<Utc>,
}

/// Count fields recorded only when a reconciliation ran this cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunCounts {
    pub origin_total: i64,
    pub destination_total: i64,
}

impl RunCounts {
    pub fn matches(&self) -> bool {
        self.origin_total == self.destination_total
    }
}

/// Repository trait for watermark persistence
#[async_trait]
pub trait WatermarkStore: Send + Sync {
    /// Fetch the watermark for an object type, if one exists yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn get(&self, object_type: &str) -> Result<Option<Watermark>>;

    /// Upsert the watermark after a run.
    ///
    /// `observed_modified` advances `last_sync_at` monotonically; `None`
    /// leaves it unchanged. `counts` of `None` leaves the stored count
    /// fields untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn record_run(
        &self,
        object_type: &str,
        observed_modified: Option<DateTime<Utc>>,
        records_synced: i64,
        counts: Option<RunCounts>,
    ) -> Result<()>;

    /// Update the reconciliation cadence counter: reset it when a
    /// reconciliation ran, increment it otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn record_reconciliation(&self, object_type: &str, ran: bool) -> Result<()>;
}

/// Database row representation of a watermark
#[derive(Debug, FromRow)]
struct WatermarkRow {
    object_type: String,
    last_sync_at: Option<i64>,
    records_synced: i64,
    origin_total: Option<i64>,
    destination_total: Option<i64>,
    counts_match: Option<bool>,
    reconciliation_run_count: i64,
    last_reconciliation_at: Option<i64>,
    updated_at: i64,
}

fn millis_to_datetime(millis: i64, field: &str) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| WarehouseError::InvalidValue {
            field: field.to_string(),
            value: millis.to_string(),
        })
}

impl TryFrom<WatermarkRow> for Watermark {
    type Error = WarehouseError;

    fn try_from(row: WatermarkRow) -> Result<Self> {
        Ok(Watermark {
            object_type: row.object_type,
            last_sync_at: row
                .last_sync_at
                .map(|m| millis_to_datetime(m, "last_sync_at"))
                .transpose()?,
            records_synced: row.records_synced,
            origin_total: row.origin_total,
            destination_total: row.destination_total,
            counts_match: row.counts_match,
            reconciliation_run_count: row.reconciliation_run_count,
            last_reconciliation_at: row
                .last_reconciliation_at
                .map(|m| millis_to_datetime(m, "last_reconciliation_at"))
                .transpose()?,
            updated_at: millis_to_datetime(row.updated_at, "updated_at")?,
        })
    }
}

/// SQLite implementation of `WatermarkStore`
pub struct SqliteWatermarkStore {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl SqliteWatermarkStore {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }
}

#[async_trait]
impl WatermarkStore for SqliteWatermarkStore {
    async fn get(&self, object_type: &str) -> Result<Option<Watermark>> {
        let row = sqlx::query_as::<_, WatermarkRow>(
            r#"
            SELECT object_type, last_sync_at, records_synced,
                   origin_total, destination_total, counts_match,
                   reconciliation_run_count, last_reconciliation_at, updated_at
            FROM sync_watermarks
            WHERE object_type = ?
            "#,
        )
        .bind(object_type)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| WarehouseError::Database(e.to_string()))?;

        row.map(Watermark::try_from).transpose()
    }

    async fn record_run(
        &self,
        object_type: &str,
        observed_modified: Option<DateTime<Utc>>,
        records_synced: i64,
        counts: Option<RunCounts>,
    ) -> Result<()> {
        let now = self.clock.unix_timestamp_millis();
        let observed_millis = observed_modified.map(|dt| dt.timestamp_millis());
        let counts_match = counts.map(|c| c.matches());

        sqlx::query(
            r#"
            INSERT INTO sync_watermarks (
                object_type, last_sync_at, records_synced,
                origin_total, destination_total, counts_match,
                reconciliation_run_count, last_reconciliation_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, 0, NULL, ?)
            ON CONFLICT(object_type) DO UPDATE SET
                last_sync_at = CASE
                    WHEN excluded.last_sync_at IS NULL THEN sync_watermarks.last_sync_at
                    WHEN sync_watermarks.last_sync_at IS NULL THEN excluded.last_sync_at
                    ELSE MAX(excluded.last_sync_at, sync_watermarks.last_sync_at)
                END,
                records_synced = excluded.records_synced,
                origin_total = COALESCE(excluded.origin_total, sync_watermarks.origin_total),
                destination_total = COALESCE(excluded.destination_total, sync_watermarks.destination_total),
                counts_match = COALESCE(excluded.counts_match, sync_watermarks.counts_match),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(object_type)
        .bind(observed_millis)
        .bind(records_synced)
        .bind(counts.map(|c| c.origin_total))
        .bind(counts.map(|c| c.destination_total))
        .bind(counts_match)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| WarehouseError::Database(e.to_string()))?;

        debug!(
            object_type,
            records_synced,
            counts_recorded = counts.is_some(),
            "watermark updated"
        );

        Ok(())
    }

    async fn record_reconciliation(&self, object_type: &str, ran: bool) -> Result<()> {
        let now = self.clock.unix_timestamp_millis();

        if ran {
            sqlx::query(
                r#"
                INSERT INTO sync_watermarks (
                    object_type, reconciliation_run_count, last_reconciliation_at, updated_at
                ) VALUES (?, 0, ?, ?)
                ON CONFLICT(object_type) DO UPDATE SET
                    reconciliation_run_count = 0,
                    last_reconciliation_at = excluded.last_reconciliation_at,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(object_type)
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| WarehouseError::Database(e.to_string()))?;
        } else {
            sqlx::query(
                r#"
                INSERT INTO sync_watermarks (
                    object_type, reconciliation_run_count, last_reconciliation_at, updated_at
                ) VALUES (?, 1, NULL, ?)
                ON CONFLICT(object_type) DO UPDATE SET
                    reconciliation_run_count = sync_watermarks.reconciliation_run_count + 1,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(object_type)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| WarehouseError::Database(e.to_string()))?;
        }

        Ok(())
    }
}
