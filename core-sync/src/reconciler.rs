//! # Reconciler
//!
//! The self-healing pass. Enumerates every live id at the origin, diffs it
//! against the destination's active ids, and pushes anything missing back
//! through the upsert writer — the same staging/merge path incremental
//! batches take, which is why that path must be idempotent.
//!
//! A record the incremental path missed (interrupted run, capped window,
//! clock skew) is recovered within at most one reconciliation cycle.

use bridge_traits::origin::{IdSet, ObjectSpec, RecordSource};
use chrono::{DateTime, Utc};
use core_warehouse::writer::UpsertWriter;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::Result;

/// The origin's batch-read endpoint accepts at most this many ids per call
const BATCH_READ_CHUNK: usize = 100;

/// Result of one reconciliation pass
#[derive(Debug)]
pub struct ReconcileOutcome {
    /// Complete set of live origin ids, used afterwards by the soft-delete
    /// detector and the count invariant
    pub origin_ids: IdSet,

    /// Records recovered and merged
    pub recovered: usize,

    /// Batch-read chunks that failed and were skipped; the records they
    /// covered stay missing until the next cycle
    pub failed_chunks: u32,

    /// Greatest modified timestamp among recovered records
    pub latest_modified: Option<DateTime<Utc>>,
}

pub struct Reconciler {
    source: Arc<dyn RecordSource>,
    writer: Arc<UpsertWriter>,
    page_delay: Duration,
}

impl Reconciler {
    pub fn new(source: Arc<dyn RecordSource>, writer: Arc<UpsertWriter>, page_delay: Duration) -> Self {
        Self {
            source,
            writer,
            page_delay,
        }
    }

    /// Enumerate the origin and recover everything the destination lacks.
    ///
    /// A failing batch-read chunk is logged and skipped rather than
    /// aborting the run; the next reconciliation picks those records up.
    pub async fn reconcile(
        &self,
        spec: &ObjectSpec,
        destination_active: &IdSet,
    ) -> Result<ReconcileOutcome> {
        let origin_ids = self.all_origin_ids(spec).await?;

        let missing = origin_ids.difference(destination_active);
        info!(
            object_type = %spec.object_type,
            origin_total = origin_ids.len(),
            destination_active = destination_active.len(),
            missing = missing.len(),
            "reconciliation diff computed"
        );

        let mut recovered = 0usize;
        let mut failed_chunks = 0u32;
        let mut latest_modified: Option<DateTime<Utc>> = None;

        let missing_ids = missing.into_vec();
        for chunk in missing_ids.chunks(BATCH_READ_CHUNK) {
            match self.source.read_batch(spec, chunk).await {
                Ok(records) => {
                    let outcome = self.writer.merge(spec, &records).await?;
                    recovered += records.len();
                    latest_modified = latest_modified.max(outcome.latest_modified);
                }
                Err(e) => {
                    // Accepted loss: these ids stay missing and the next
                    // cycle retries them
                    warn!(
                        object_type = %spec.object_type,
                        error = %e,
                        chunk_len = chunk.len(),
                        first_id = chunk.first().map(String::as_str).unwrap_or(""),
                        "batch read failed, skipping chunk"
                    );
                    failed_chunks += 1;
                }
            }
        }

        if recovered > 0 {
            info!(
                object_type = %spec.object_type,
                recovered,
                "recovered records missed by the incremental path"
            );
        }

        Ok(ReconcileOutcome {
            origin_ids,
            recovered,
            failed_chunks,
            latest_modified,
        })
    }

    async fn all_origin_ids(&self, spec: &ObjectSpec) -> Result<IdSet> {
        let mut ids = IdSet::new();
        let mut after: Option<String> = None;

        loop {
            let page = self.source.list_ids_page(spec, after.as_deref()).await?;
            ids.extend(page.ids);

            match page.next_after {
                Some(next) => {
                    after = Some(next);
                    tokio::time::sleep(self.page_delay).await;
                }
                None => break,
            }
        }

        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::error::{BridgeError, Result as BridgeResult};
    use bridge_traits::origin::{IdPage, Record, RecordPage, SearchPage, TimeRange};
    use bridge_traits::time::Clock;
    use chrono::TimeZone;
    use core_warehouse::schema::ensure_object_table;
    use mockall::mock;
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::SqlitePool;
    use std::collections::HashMap;

    mock! {
        Source {}

        #[async_trait::async_trait]
        impl RecordSource for Source {
            #[mockall::concretize]
            async fn list_page(&self, spec: &ObjectSpec, after: Option<&str>) -> BridgeResult<RecordPage>;
            #[mockall::concretize]
            async fn list_ids_page(&self, spec: &ObjectSpec, after: Option<&str>) -> BridgeResult<IdPage>;
            #[mockall::concretize]
            async fn search_modified(
                &self,
                spec: &ObjectSpec,
                range: &TimeRange,
                after: Option<&str>,
            ) -> BridgeResult<SearchPage>;
            async fn read_batch(&self, spec: &ObjectSpec, ids: &[String]) -> BridgeResult<Vec<Record>>;
            async fn create_batch(
                &self,
                spec: &ObjectSpec,
                inputs: &[HashMap<String, String>],
            ) -> BridgeResult<Vec<Record>>;
        }
    }

    struct FixedClock(DateTime<Utc>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    fn record(id: &str) -> Record {
        let mut properties = HashMap::new();
        properties.insert(
            "lastmodifieddate".to_string(),
            Some("2024-03-01T10:00:00.000Z".to_string()),
        );
        Record {
            id: id.to_string(),
            properties,
            created_at: None,
            updated_at: None,
        }
    }

    async fn test_pool() -> SqlitePool {
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

    fn writer(pool: &SqlitePool) -> Arc<UpsertWriter> {
        let clock = Arc::new(FixedClock(
            Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
        ));
        Arc::new(UpsertWriter::new(pool.clone(), clock))
    }

    #[tokio::test]
    async fn test_recovers_missing_records() {
        let mut source = MockSource::new();
        source.expect_list_ids_page().times(1).returning(|_, _| {
            Ok(IdPage {
                ids: vec!["1".to_string(), "2".to_string(), "3".to_string()],
                next_after: None,
            })
        });
        source
            .expect_read_batch()
            .times(1)
            .returning(|_, ids| Ok(ids.iter().map(|id| record(id)).collect()));

        let pool = test_pool().await;
        let reconciler = Reconciler::new(Arc::new(source), writer(&pool), Duration::ZERO);

        // Destination already holds id 2
        let destination: IdSet = ["2".to_string()].into_iter().collect();
        let outcome = reconciler
            .reconcile(&ObjectSpec::contacts(), &destination)
            .await
            .unwrap();

        assert_eq!(outcome.origin_ids.len(), 3);
        assert_eq!(outcome.recovered, 2);
        assert_eq!(outcome.failed_chunks, 0);
        assert!(outcome.latest_modified.is_some());

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM contacts")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_failed_chunk_is_skipped_not_fatal() {
        let mut source = MockSource::new();

        // 150 missing ids: two chunks, first fails
        let ids: Vec<String> = (0..150).map(|i| format!("{:03}", i)).collect();
        source.expect_list_ids_page().times(1).return_once(move |_, _| {
            Ok(IdPage {
                ids,
                next_after: None,
            })
        });

        let mut call = 0u32;
        source.expect_read_batch().times(2).returning(move |_, ids| {
            call += 1;
            if call == 1 {
                Err(BridgeError::Transient("origin hiccup".to_string()))
            } else {
                Ok(ids.iter().map(|id| record(id)).collect())
            }
        });

        let pool = test_pool().await;
        let reconciler = Reconciler::new(Arc::new(source), writer(&pool), Duration::ZERO);

        let outcome = reconciler
            .reconcile(&ObjectSpec::contacts(), &IdSet::new())
            .await
            .unwrap();

        assert_eq!(outcome.failed_chunks, 1);
        assert_eq!(outcome.recovered, 50);
        assert_eq!(outcome.origin_ids.len(), 150);
    }

    #[tokio::test]
    async fn test_id_enumeration_follows_cursor() {
        let mut source = MockSource::new();
        source
            .expect_list_ids_page()
            .times(2)
            .returning(|_, after| match after {
                None => Ok(IdPage {
                    ids: vec!["1".to_string(), "2".to_string()],
                    next_after: Some("2".to_string()),
                }),
                Some("2") => Ok(IdPage {
                    ids: vec!["3".to_string()],
                    next_after: None,
                }),
                other => panic!("unexpected cursor {:?}", other),
            });

        let pool = test_pool().await;
        let reconciler = Reconciler::new(Arc::new(source), writer(&pool), Duration::ZERO);

        // Destination already holds everything: enumeration is the only work
        let destination: IdSet = ["1", "2", "3"].iter().map(|s| s.to_string()).collect();
        let outcome = reconciler
            .reconcile(&ObjectSpec::contacts(), &destination)
            .await
            .unwrap();

        assert_eq!(outcome.origin_ids.len(), 3);
        assert_eq!(outcome.recovered, 0);
    }
}
