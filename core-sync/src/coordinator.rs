//! # Sync Coordinator
//!
//! Orchestrates the per-object-type replication run.
//!
//! ## Workflow
//!
//! Each object type is fully processed before the next begins:
//!
//! 1. Read the watermark
//! 2. Windowed incremental fetch (full load when no watermark exists)
//! 3. Stage + merge the batch through the upsert writer
//! 4. Ask the scheduler whether to reconcile; a first-ever sync seeds the
//!    baseline from the full load's own id set instead of re-enumerating
//! 5. Reconcile when warranted, recovering records the incremental path
//!    missed
//! 6. Soft-delete detection, only when a complete origin id set exists
//! 7. Deduplication safety net
//! 8. Watermark write-back, then the count invariant check — a mismatch
//!    after a full reconciliation is fatal

use bridge_traits::origin::{IdSet, ObjectSpec, RecordSource};
use bridge_traits::time::Clock;
use core_warehouse::dedup::Deduplicator;
use core_warehouse::records::RecordStore;
use core_warehouse::watermark::{RunCounts, SqliteWatermarkStore, WatermarkStore};
use core_warehouse::writer::UpsertWriter;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{debug, error, info, instrument};

use crate::config::SyncConfig;
use crate::deletes::SoftDeleteDetector;
use crate::error::{Result, SyncError};
use crate::fetcher::IncrementalFetcher;
use crate::reconciler::Reconciler;
use crate::scheduler::{ReconcilePlan, ReconcileScheduler};

/// Summary of one object type's run
#[derive(Debug, Clone)]
pub struct ObjectSyncReport {
    pub object_type: String,

    /// True when this run performed the watermark-less full load
    pub full_load: bool,

    /// Records merged this run (incremental fetch plus recoveries)
    pub records_synced: usize,

    /// Records recovered by reconciliation
    pub recovered: usize,

    /// Windows that hit the result cap at the minimum size
    pub capped_windows: u32,

    /// Rows newly flagged as deleted
    pub soft_deleted: u64,

    /// Duplicate rows removed by the dedup pass
    pub duplicates_removed: u64,

    /// Whether this cycle held a complete origin id set (seed or full
    /// reconciliation)
    pub reconciled: bool,

    /// Origin/destination totals, recorded only when `reconciled`
    pub counts: Option<RunCounts>,
}

/// Sync coordinator for the replication run
pub struct SyncCoordinator {
    specs: Vec<ObjectSpec>,
    fetcher: IncrementalFetcher,
    writer: Arc<UpsertWriter>,
    watermarks: Arc<dyn WatermarkStore>,
    records: Arc<RecordStore>,
    dedup: Deduplicator,
    scheduler: ReconcileScheduler,
    reconciler: Reconciler,
    detector: SoftDeleteDetector,
}

impl SyncCoordinator {
    /// Wire the engine's components around one pool, one origin connector
    /// and one configuration object.
    pub fn new(
        config: SyncConfig,
        pool: SqlitePool,
        source: Arc<dyn RecordSource>,
        specs: Vec<ObjectSpec>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let writer = Arc::new(UpsertWriter::new(pool.clone(), clock.clone()));
        let records = Arc::new(RecordStore::new(pool.clone(), clock.clone()));
        let watermarks: Arc<dyn WatermarkStore> =
            Arc::new(SqliteWatermarkStore::new(pool.clone(), clock.clone()));

        Self {
            specs,
            fetcher: IncrementalFetcher::new(source.clone(), config.clone(), clock),
            writer: writer.clone(),
            watermarks,
            records: records.clone(),
            dedup: Deduplicator::new(pool),
            scheduler: ReconcileScheduler::new(&config),
            reconciler: Reconciler::new(source, writer, config.page_delay),
            detector: SoftDeleteDetector::new(records),
        }
    }

    /// Process every configured object type, strictly sequentially.
    ///
    /// # Errors
    ///
    /// Fails fast: the first object type that errors aborts the run,
    /// leaving the destination in whatever state its last committed
    /// transaction produced. The next run's incremental + reconciliation
    /// design tolerates that.
    pub async fn sync_all(&self) -> Result<Vec<ObjectSyncReport>> {
        let mut reports = Vec::with_capacity(self.specs.len());
        for spec in &self.specs {
            reports.push(self.sync_object(spec).await?);
        }
        Ok(reports)
    }

    /// Run the full phase sequence for one object type.
    #[instrument(skip(self, spec), fields(object_type = %spec.object_type))]
    pub async fn sync_object(&self, spec: &ObjectSpec) -> Result<ObjectSyncReport> {
        // Phase 1: incremental fetch + merge
        let watermark = self.watermarks.get(&spec.object_type).await?;
        let since = watermark.as_ref().and_then(|w| w.last_sync_at);

        let fetch = self.fetcher.fetch(spec, since).await?;
        let merge = self.writer.merge(spec, &fetch.records).await?;

        let mut latest_modified = merge.latest_modified;
        let mut records_synced = fetch.records.len();

        // Phase 2: reconciliation
        let plan = self.scheduler.plan(watermark.as_ref());
        let mut recovered = 0usize;

        let origin_ids: Option<IdSet> = match plan {
            ReconcilePlan::Seed => {
                info!("first sync, seeding baseline from the full load's id set");
                Some(fetch.records.iter().map(|r| r.id.clone()).collect())
            }
            ReconcilePlan::Run(reason) => {
                info!(?reason, "running full reconciliation");
                let active = self.records.active_ids(spec).await?;
                let outcome = self.reconciler.reconcile(spec, &active).await?;
                recovered = outcome.recovered;
                records_synced += outcome.recovered;
                latest_modified = latest_modified.max(outcome.latest_modified);
                Some(outcome.origin_ids)
            }
            ReconcilePlan::Skip { runs_until_due } => {
                debug!(runs_until_due, "reconciliation skipped, counts match");
                None
            }
        };

        // Phase 3: soft-delete detection, trustworthy only with a complete
        // origin id set
        let mut soft_deleted = 0u64;
        if let Some(origin_ids) = &origin_ids {
            let active = self.records.active_ids(spec).await?;
            soft_deleted = self.detector.detect_and_flag(spec, &active, origin_ids).await?;
        }

        // Phase 4: dedup safety net
        let dedup_report = self.dedup.dedupe(spec).await?;

        // Phase 5: watermark write-back, counts only when this cycle
        // enumerated the origin
        let counts = match &origin_ids {
            Some(origin_ids) => {
                let destination_total = self.records.active_count(spec).await?;
                Some(RunCounts {
                    origin_total: origin_ids.len() as i64,
                    destination_total,
                })
            }
            None => None,
        };

        self.watermarks
            .record_run(
                &spec.object_type,
                latest_modified,
                records_synced as i64,
                counts,
            )
            .await?;
        self.watermarks
            .record_reconciliation(&spec.object_type, origin_ids.is_some())
            .await?;

        if let Some(counts) = counts {
            if !counts.matches() {
                error!(
                    origin_total = counts.origin_total,
                    destination_total = counts.destination_total,
                    "count mismatch survived a full reconciliation"
                );
                return Err(SyncError::CountMismatch {
                    object_type: spec.object_type.clone(),
                    origin_total: counts.origin_total,
                    destination_total: counts.destination_total,
                });
            }
        }

        let report = ObjectSyncReport {
            object_type: spec.object_type.clone(),
            full_load: fetch.full_load,
            records_synced,
            recovered,
            capped_windows: fetch.capped_windows,
            soft_deleted,
            duplicates_removed: dedup_report.rows_removed,
            reconciled: origin_ids.is_some(),
            counts,
        };

        info!(
            records_synced = report.records_synced,
            recovered = report.recovered,
            soft_deleted = report.soft_deleted,
            duplicates_removed = report.duplicates_removed,
            reconciled = report.reconciled,
            "object sync complete"
        );

        Ok(report)
    }
}
