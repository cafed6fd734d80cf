//! # Soft-Delete Detector
//!
//! Flags destination rows whose ids are no longer present at the origin.
//!
//! Runs only in cycles that hold a complete origin id set (a seed or a
//! full reconciliation): an incomplete incremental fetch must never be
//! treated as evidence of deletion, or a transient origin outage would
//! erase history. Rows are flagged, never removed.

use bridge_traits::origin::{IdSet, ObjectSpec};
use core_warehouse::records::RecordStore;
use std::sync::Arc;
use tracing::info;

use crate::error::Result;

pub struct SoftDeleteDetector {
    records: Arc<RecordStore>,
}

impl SoftDeleteDetector {
    pub fn new(records: Arc<RecordStore>) -> Self {
        Self { records }
    }

    /// Flag every active destination id absent from the origin set.
    ///
    /// Returns the number of rows newly flagged.
    pub async fn detect_and_flag(
        &self,
        spec: &ObjectSpec,
        destination_active: &IdSet,
        origin_ids: &IdSet,
    ) -> Result<u64> {
        let deleted = destination_active.difference(origin_ids);

        if deleted.is_empty() {
            info!(object_type = %spec.object_type, "no deletions detected");
            return Ok(0);
        }

        info!(
            object_type = %spec.object_type,
            deleted = deleted.len(),
            "flagging records deleted at the origin"
        );

        Ok(self.records.mark_deleted(spec, &deleted).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::time::Clock;
    use chrono::{DateTime, TimeZone, Utc};
    use core_warehouse::schema::ensure_object_table;
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::SqlitePool;

    struct FixedClock(DateTime<Utc>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    async fn setup() -> (SqlitePool, SoftDeleteDetector, Arc<RecordStore>) {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await
            .unwrap();
        ensure_object_table(&pool, &ObjectSpec::contacts())
            .await
            .unwrap();

        let clock = Arc::new(FixedClock(
            Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
        ));
        let records = Arc::new(RecordStore::new(pool.clone(), clock));
        (pool.clone(), SoftDeleteDetector::new(records.clone()), records)
    }

    async fn insert(pool: &SqlitePool, id: &str) {
        sqlx::query("INSERT INTO contacts (origin_id, synced_at) VALUES (?, 0)")
            .bind(id)
            .execute(pool)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_flags_rows_absent_from_origin() {
        let (pool, detector, records) = setup().await;
        insert(&pool, "a").await;
        insert(&pool, "b").await;
        insert(&pool, "c").await;

        let spec = ObjectSpec::contacts();
        let active = records.active_ids(&spec).await.unwrap();
        let origin: IdSet = ["a", "c"].iter().map(|s| s.to_string()).collect();

        let flagged = detector
            .detect_and_flag(&spec, &active, &origin)
            .await
            .unwrap();
        assert_eq!(flagged, 1);

        let remaining = records.active_ids(&spec).await.unwrap();
        assert_eq!(remaining.len(), 2);
        assert!(!remaining.contains("b"));
    }

    #[tokio::test]
    async fn test_identical_sets_flag_nothing() {
        let (pool, detector, records) = setup().await;
        insert(&pool, "a").await;

        let spec = ObjectSpec::contacts();
        let active = records.active_ids(&spec).await.unwrap();

        let flagged = detector
            .detect_and_flag(&spec, &active, &active.clone())
            .await
            .unwrap();
        assert_eq!(flagged, 0);
    }
}
