//! Destination and metadata table definitions
//!
//! Destination tables deliberately carry no uniqueness constraint on
//! `origin_id`: uniqueness is an invariant restored by the deduplicator,
//! matching warehouses whose primary keys are declared but not enforced.

use bridge_traits::origin::ObjectSpec;
use sqlx::SqlitePool;

use crate::error::{Result, WarehouseError};

/// Quote an identifier for interpolation into dynamic SQL.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Replication-owned columns appended after the per-property columns.
pub(crate) const REPLICATION_COLUMNS: [&str; 4] =
    ["modified_at", "synced_at", "is_deleted", "deleted_at"];

/// All destination columns for an object type, in insert order.
pub(crate) fn destination_columns(spec: &ObjectSpec) -> Vec<String> {
    let mut columns = Vec::with_capacity(spec.properties.len() + 5);
    columns.push("origin_id".to_string());
    columns.extend(spec.properties.iter().cloned());
    columns.extend(REPLICATION_COLUMNS.iter().map(|c| c.to_string()));
    columns
}

/// Create the destination table for one object type if it does not exist.
pub async fn ensure_object_table(pool: &SqlitePool, spec: &ObjectSpec) -> Result<()> {
    let mut columns = vec!["origin_id TEXT NOT NULL".to_string()];
    columns.extend(spec.properties.iter().map(|p| format!("{} TEXT", quote_ident(p))));
    columns.push("modified_at TEXT".to_string());
    columns.push("synced_at INTEGER NOT NULL".to_string());
    columns.push("is_deleted INTEGER NOT NULL DEFAULT 0".to_string());
    columns.push("deleted_at INTEGER".to_string());

    let ddl = format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote_ident(&spec.table),
        columns.join(", "),
    );

    sqlx::query(&ddl)
        .execute(pool)
        .await
        .map_err(|e| WarehouseError::Database(e.to_string()))?;

    let index = format!(
        "CREATE INDEX IF NOT EXISTS {} ON {} (origin_id)",
        quote_ident(&format!("idx_{}_origin_id", spec.table)),
        quote_ident(&spec.table),
    );
    sqlx::query(&index)
        .execute(pool)
        .await
        .map_err(|e| WarehouseError::Database(e.to_string()))?;

    Ok(())
}

/// Create the watermark metadata table if it does not exist.
pub async fn ensure_watermark_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sync_watermarks (
            object_type TEXT PRIMARY KEY NOT NULL,
            last_sync_at INTEGER,
            records_synced INTEGER NOT NULL DEFAULT 0,
            origin_total INTEGER,
            destination_total INTEGER,
            counts_match INTEGER,
            reconciliation_run_count INTEGER NOT NULL DEFAULT 0,
            last_reconciliation_at INTEGER,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| WarehouseError::Database(e.to_string()))?;

    Ok(())
}

/// Create every table the replication run needs.
pub async fn ensure_schema(pool: &SqlitePool, specs: &[ObjectSpec]) -> Result<()> {
    ensure_watermark_table(pool).await?;
    for spec in specs {
        ensure_object_table(pool, spec).await?;
    }
    Ok(())
}
