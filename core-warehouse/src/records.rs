//! Destination record queries and soft-delete flagging
//!
//! Read-side projections (active ids, counts) plus the one mutation the
//! soft-delete detector is allowed: flipping `is_deleted`/`deleted_at`.
//! Domain columns are never touched here.

use bridge_traits::origin::{IdSet, ObjectSpec};
use bridge_traits::time::Clock;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::info;

use crate::error::{Result, WarehouseError};
use crate::schema::quote_ident;

/// Rows per `IN (...)` list when flagging deletions
const DELETE_CHUNK: usize = 500;

pub struct RecordStore {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl RecordStore {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    /// Ids of destination rows not flagged deleted.
    pub async fn active_ids(&self, spec: &ObjectSpec) -> Result<IdSet> {
        let ids: Vec<String> = sqlx::query_scalar(&format!(
            "SELECT origin_id FROM {} WHERE is_deleted = 0",
            quote_ident(&spec.table)
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| WarehouseError::Database(e.to_string()))?;

        Ok(ids.into_iter().collect())
    }

    /// Count of destination rows not flagged deleted.
    pub async fn active_count(&self, spec: &ObjectSpec) -> Result<i64> {
        sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM {} WHERE is_deleted = 0",
            quote_ident(&spec.table)
        ))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| WarehouseError::Database(e.to_string()))
    }

    /// Flag the given ids as deleted, stamping `deleted_at`.
    ///
    /// Rows already flagged keep their original `deleted_at`. Returns the
    /// number of rows newly flagged.
    pub async fn mark_deleted(&self, spec: &ObjectSpec, ids: &IdSet) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let deleted_at = self.clock.unix_timestamp_millis();
        let table = quote_ident(&spec.table);
        let id_list: Vec<&str> = ids.iter().collect();
        let mut flagged = 0u64;

        for chunk in id_list.chunks(DELETE_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "UPDATE {} SET is_deleted = 1, deleted_at = ? \
                 WHERE is_deleted = 0 AND origin_id IN ({})",
                table, placeholders
            );

            let mut query = sqlx::query(&sql).bind(deleted_at);
            for id in chunk {
                query = query.bind(*id);
            }

            let result = query
                .execute(&self.pool)
                .await
                .map_err(|e| WarehouseError::Database(e.to_string()))?;
            flagged += result.rows_affected();
        }

        info!(
            object_type = %spec.object_type,
            flagged,
            "soft-deleted destination rows"
        );

        Ok(flagged)
    }
}
