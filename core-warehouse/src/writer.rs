//! # Upsert Writer
//!
//! Stages fetched batches and merges them into the destination table keyed
//! by origin id.
//!
//! The merge is set-based and idempotent: replaying an identical batch
//! yields identical destination rows. Incremental fetches and
//! reconciliation recoveries both flow through this one path.

use bridge_traits::origin::{ObjectSpec, Record};
use bridge_traits::time::Clock;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{Result, WarehouseError};
use crate::schema::quote_ident;

/// Logical staging batch size
const STAGING_BATCH_ROWS: usize = 5_000;

/// Bind-parameter budget per statement; row chunks are sized to stay under
/// the SQLite limit even for wide objects
const MAX_BIND_PARAMS: usize = 32_000;

/// Result of one merge
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    /// Rows staged (before in-batch duplicate collapse)
    pub records_staged: usize,

    /// Greatest modified timestamp observed in the batch, used to advance
    /// the watermark
    pub latest_modified: Option<DateTime<Utc>>,
}

impl MergeOutcome {
    pub fn empty() -> Self {
        Self {
            records_staged: 0,
            latest_modified: None,
        }
    }
}

/// Staging + merge writer for destination tables
pub struct UpsertWriter {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl UpsertWriter {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    /// Merge a batch of fetched records into the destination table.
    ///
    /// Existing rows get every mapped property overwritten and a fresh
    /// `synced_at`; new ids are inserted. Rows touched here are live at the
    /// origin by definition, so any stale soft-delete flag is cleared.
    ///
    /// # Errors
    ///
    /// Returns an error if any statement in the transaction fails; the
    /// destination is left untouched in that case.
    pub async fn merge(&self, spec: &ObjectSpec, records: &[Record]) -> Result<MergeOutcome> {
        if records.is_empty() {
            debug!(object_type = %spec.object_type, "no records to merge");
            return Ok(MergeOutcome::empty());
        }

        let synced_at = self.clock.unix_timestamp_millis();
        let table = quote_ident(&spec.table);
        let stage = quote_ident(&format!("{}_stage", spec.table));

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| WarehouseError::Database(e.to_string()))?;

        // Transient staging table shaped like the destination's data columns
        let mut stage_columns = vec!["origin_id TEXT NOT NULL".to_string()];
        stage_columns.extend(
            spec.properties
                .iter()
                .map(|p| format!("{} TEXT", quote_ident(p))),
        );
        stage_columns.push("modified_at TEXT".to_string());
        stage_columns.push("synced_at INTEGER NOT NULL".to_string());

        sqlx::query(&format!(
            "CREATE TEMPORARY TABLE {} ({})",
            stage,
            stage_columns.join(", ")
        ))
        .execute(&mut *tx)
        .await
        .map_err(|e| WarehouseError::Database(e.to_string()))?;

        let mut insert_columns = vec!["origin_id".to_string()];
        insert_columns.extend(spec.properties.iter().map(|p| quote_ident(p)));
        insert_columns.push("modified_at".to_string());
        insert_columns.push("synced_at".to_string());

        let binds_per_row = insert_columns.len();
        let rows_per_statement = STAGING_BATCH_ROWS
            .min(MAX_BIND_PARAMS / binds_per_row)
            .max(1);
        let row_placeholders = format!("({})", vec!["?"; binds_per_row].join(", "));

        for chunk in records.chunks(rows_per_statement) {
            let sql = format!(
                "INSERT INTO {} ({}) VALUES {}",
                stage,
                insert_columns.join(", "),
                vec![row_placeholders.as_str(); chunk.len()].join(", ")
            );

            let mut query = sqlx::query(&sql);
            for record in chunk {
                query = query.bind(&record.id);
                for property in &spec.properties {
                    query = query.bind(record.property(property));
                }
                query = query.bind(modified_column_value(record, spec));
                query = query.bind(synced_at);
            }
            query
                .execute(&mut *tx)
                .await
                .map_err(|e| WarehouseError::Database(e.to_string()))?;
        }

        // A batch can carry the same id more than once; keep the last
        // staged row so the insert arm stays single-row-per-id
        sqlx::query(&format!(
            "DELETE FROM {stage} WHERE rowid NOT IN \
             (SELECT MAX(rowid) FROM {stage} GROUP BY origin_id)",
            stage = stage
        ))
        .execute(&mut *tx)
        .await
        .map_err(|e| WarehouseError::Database(e.to_string()))?;

        // Set-based merge: update matched rows, then insert the rest
        let mut update_sets: Vec<String> = Vec::new();
        let mut data_columns: Vec<String> = spec.properties.iter().map(|p| quote_ident(p)).collect();
        data_columns.push("modified_at".to_string());
        data_columns.push("synced_at".to_string());
        for column in &data_columns {
            update_sets.push(format!(
                "{column} = (SELECT s.{column} FROM {stage} s WHERE s.origin_id = {table}.origin_id)",
                column = column,
                stage = stage,
                table = table
            ));
        }
        // A row observed at the origin is live again
        update_sets.push("is_deleted = 0".to_string());
        update_sets.push("deleted_at = NULL".to_string());

        sqlx::query(&format!(
            "UPDATE {table} SET {sets} WHERE origin_id IN (SELECT origin_id FROM {stage})",
            table = table,
            sets = update_sets.join(", "),
            stage = stage
        ))
        .execute(&mut *tx)
        .await
        .map_err(|e| WarehouseError::Database(e.to_string()))?;

        let select_columns: Vec<String> = data_columns.iter().map(|c| format!("s.{}", c)).collect();
        sqlx::query(&format!(
            "INSERT INTO {table} (origin_id, {columns}, is_deleted, deleted_at) \
             SELECT s.origin_id, {selects}, 0, NULL FROM {stage} s \
             WHERE NOT EXISTS (SELECT 1 FROM {table} t WHERE t.origin_id = s.origin_id)",
            table = table,
            columns = data_columns.join(", "),
            selects = select_columns.join(", "),
            stage = stage
        ))
        .execute(&mut *tx)
        .await
        .map_err(|e| WarehouseError::Database(e.to_string()))?;

        sqlx::query(&format!("DROP TABLE {}", stage))
            .execute(&mut *tx)
            .await
            .map_err(|e| WarehouseError::Database(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| WarehouseError::Database(e.to_string()))?;

        let latest_modified = records.iter().filter_map(|r| r.modified_at(spec)).max();

        info!(
            object_type = %spec.object_type,
            records = records.len(),
            "merged batch into destination"
        );

        Ok(MergeOutcome {
            records_staged: records.len(),
            latest_modified,
        })
    }
}

fn modified_column_value(record: &Record, spec: &ObjectSpec) -> Option<String> {
    record
        .modified_at(spec)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ensure_object_table;
    use chrono::TimeZone;
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::Row;
    use std::collections::HashMap;

    struct FixedClock(DateTime<Utc>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    fn test_clock() -> Arc<dyn Clock> {
        Arc::new(FixedClock(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()))
    }

    async fn create_test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await
            .unwrap();
        ensure_object_table(&pool, &ObjectSpec::contacts())
            .await
            .unwrap();
        pool
    }

    fn contact(id: &str, email: Option<&str>, modified: &str) -> Record {
        let mut properties = HashMap::new();
        properties.insert("email".to_string(), email.map(|e| e.to_string()));
        properties.insert(
            "lastmodifieddate".to_string(),
            Some(modified.to_string()),
        );
        Record {
            id: id.to_string(),
            properties,
            created_at: None,
            updated_at: None,
        }
    }

    async fn all_rows(pool: &SqlitePool) -> Vec<(String, Option<String>, i64)> {
        sqlx::query("SELECT origin_id, email, is_deleted FROM contacts ORDER BY origin_id")
            .fetch_all(pool)
            .await
            .unwrap()
            .into_iter()
            .map(|row| (row.get(0), row.get(1), row.get(2)))
            .collect()
    }

    #[tokio::test]
    async fn test_merge_inserts_new_records() {
        let pool = create_test_pool().await;
        let writer = UpsertWriter::new(pool.clone(), test_clock());

        let records = vec![
            contact("1", Some("a@x.com"), "2024-03-01T10:00:00.000Z"),
            contact("2", None, "2024-03-01T11:00:00.000Z"),
        ];

        let outcome = writer
            .merge(&ObjectSpec::contacts(), &records)
            .await
            .unwrap();

        assert_eq!(outcome.records_staged, 2);
        assert_eq!(
            outcome.latest_modified,
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 11, 0, 0).unwrap())
        );

        let rows = all_rows(&pool).await;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], ("1".to_string(), Some("a@x.com".to_string()), 0));
        assert_eq!(rows[1], ("2".to_string(), None, 0));
    }

    #[tokio::test]
    async fn test_merge_is_idempotent() {
        let pool = create_test_pool().await;
        let writer = UpsertWriter::new(pool.clone(), test_clock());
        let spec = ObjectSpec::contacts();

        let records = vec![
            contact("1", Some("a@x.com"), "2024-03-01T10:00:00.000Z"),
            contact("2", Some("b@x.com"), "2024-03-01T11:00:00.000Z"),
            contact("3", None, "2024-03-01T12:00:00.000Z"),
        ];

        writer.merge(&spec, &records).await.unwrap();
        let first = all_rows(&pool).await;

        writer.merge(&spec, &records).await.unwrap();
        let second = all_rows(&pool).await;

        assert_eq!(first, second);
        assert_eq!(second.len(), 3);
    }

    #[tokio::test]
    async fn test_merge_overwrites_existing_rows() {
        let pool = create_test_pool().await;
        let writer = UpsertWriter::new(pool.clone(), test_clock());
        let spec = ObjectSpec::contacts();

        writer
            .merge(&spec, &[contact("1", Some("old@x.com"), "2024-03-01T10:00:00.000Z")])
            .await
            .unwrap();
        writer
            .merge(&spec, &[contact("1", Some("new@x.com"), "2024-03-02T10:00:00.000Z")])
            .await
            .unwrap();

        let rows = all_rows(&pool).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].1, Some("new@x.com".to_string()));

        let modified: Option<String> =
            sqlx::query_scalar("SELECT modified_at FROM contacts WHERE origin_id = '1'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(modified, Some("2024-03-02T10:00:00.000Z".to_string()));
    }

    #[tokio::test]
    async fn test_merge_revives_soft_deleted_row() {
        let pool = create_test_pool().await;
        let writer = UpsertWriter::new(pool.clone(), test_clock());
        let spec = ObjectSpec::contacts();

        writer
            .merge(&spec, &[contact("1", Some("a@x.com"), "2024-03-01T10:00:00.000Z")])
            .await
            .unwrap();
        sqlx::query("UPDATE contacts SET is_deleted = 1, deleted_at = 123 WHERE origin_id = '1'")
            .execute(&pool)
            .await
            .unwrap();

        writer
            .merge(&spec, &[contact("1", Some("a@x.com"), "2024-03-03T10:00:00.000Z")])
            .await
            .unwrap();

        let (is_deleted, deleted_at): (i64, Option<i64>) =
            sqlx::query_as("SELECT is_deleted, deleted_at FROM contacts WHERE origin_id = '1'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(is_deleted, 0);
        assert_eq!(deleted_at, None);
    }

    #[tokio::test]
    async fn test_duplicate_ids_in_one_batch_collapse_to_last() {
        let pool = create_test_pool().await;
        let writer = UpsertWriter::new(pool.clone(), test_clock());
        let spec = ObjectSpec::contacts();

        let records = vec![
            contact("1", Some("first@x.com"), "2024-03-01T10:00:00.000Z"),
            contact("1", Some("second@x.com"), "2024-03-01T11:00:00.000Z"),
        ];
        writer.merge(&spec, &records).await.unwrap();

        let rows = all_rows(&pool).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].1, Some("second@x.com".to_string()));
    }

    #[tokio::test]
    async fn test_merge_empty_batch_is_noop() {
        let pool = create_test_pool().await;
        let writer = UpsertWriter::new(pool.clone(), test_clock());

        let outcome = writer.merge(&ObjectSpec::contacts(), &[]).await.unwrap();
        assert_eq!(outcome, MergeOutcome::empty());
        assert!(all_rows(&pool).await.is_empty());
    }
}
