//! # Deduplicator
//!
//! Restores the one-row-per-origin-id invariant after every merge.
//!
//! The destination schema cannot enforce uniqueness (concurrent batch
//! writers and replayed runs could both violate it), so this pass compares
//! `COUNT(*)` against `COUNT(DISTINCT origin_id)` and, when they differ,
//! rebuilds the table keeping the most information-complete value per
//! column across the duplicates.

use bridge_traits::origin::ObjectSpec;
use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::error::{Result, WarehouseError};
use crate::schema::{destination_columns, quote_ident};

/// Result of one dedup pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupReport {
    pub total_rows: i64,
    pub distinct_ids: i64,
    pub rows_removed: u64,
}

impl DedupReport {
    pub fn clean(total_rows: i64) -> Self {
        Self {
            total_rows,
            distinct_ids: total_rows,
            rows_removed: 0,
        }
    }
}

pub struct Deduplicator {
    pool: SqlitePool,
}

impl Deduplicator {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Collapse duplicate origin ids in the destination table.
    ///
    /// `MAX` per column ignores NULLs, so the retained row carries the
    /// union of non-null values across the duplicates.
    ///
    /// # Errors
    ///
    /// Returns an error if any statement fails; the rebuild is
    /// transactional, so the table is never left partially rebuilt.
    pub async fn dedupe(&self, spec: &ObjectSpec) -> Result<DedupReport> {
        let table = quote_ident(&spec.table);

        let (total_rows, distinct_ids): (i64, i64) = sqlx::query_as(&format!(
            "SELECT COUNT(*), COUNT(DISTINCT origin_id) FROM {}",
            table
        ))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| WarehouseError::Database(e.to_string()))?;

        if total_rows == distinct_ids {
            debug!(object_type = %spec.object_type, total_rows, "no duplicates");
            return Ok(DedupReport::clean(total_rows));
        }

        warn!(
            object_type = %spec.object_type,
            total_rows,
            distinct_ids,
            "duplicate origin ids detected, rebuilding table"
        );

        let unique = quote_ident(&format!("{}_unique", spec.table));
        let columns = destination_columns(spec);

        let grouped: Vec<String> = columns
            .iter()
            .map(|c| {
                let quoted = quote_ident(c);
                if c == "origin_id" {
                    quoted
                } else {
                    format!("MAX({quoted}) AS {quoted}", quoted = quoted)
                }
            })
            .collect();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| WarehouseError::Database(e.to_string()))?;

        sqlx::query(&format!(
            "CREATE TEMPORARY TABLE {} AS SELECT {} FROM {} GROUP BY origin_id",
            unique,
            grouped.join(", "),
            table
        ))
        .execute(&mut *tx)
        .await
        .map_err(|e| WarehouseError::Database(e.to_string()))?;

        sqlx::query(&format!("DELETE FROM {}", table))
            .execute(&mut *tx)
            .await
            .map_err(|e| WarehouseError::Database(e.to_string()))?;

        let column_list: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
        sqlx::query(&format!(
            "INSERT INTO {} ({list}) SELECT {list} FROM {}",
            table,
            unique,
            list = column_list.join(", ")
        ))
        .execute(&mut *tx)
        .await
        .map_err(|e| WarehouseError::Database(e.to_string()))?;

        sqlx::query(&format!("DROP TABLE {}", unique))
            .execute(&mut *tx)
            .await
            .map_err(|e| WarehouseError::Database(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| WarehouseError::Database(e.to_string()))?;

        Ok(DedupReport {
            total_rows,
            distinct_ids,
            rows_removed: (total_rows - distinct_ids) as u64,
        })
    }
}
