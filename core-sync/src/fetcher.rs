//! # Windowed Incremental Fetcher
//!
//! Retrieves the records a run has to merge.
//!
//! With no watermark the object type gets a full load: the list endpoint is
//! paged to exhaustion. With a watermark the filtered-search endpoint is
//! queried in half-open time windows so no single filter's match count
//! crosses the origin's total-result cap. A window whose match count
//! reaches the cap is bisected and retried down to the minimum size; at the
//! minimum it proceeds anyway, paging up to the cap, and the loss is left
//! for reconciliation to recover. This windowing is the defense against
//! silent data loss under high-churn periods.

use bridge_traits::origin::{ObjectSpec, Record, RecordSource, SearchPage, TimeRange};
use bridge_traits::time::Clock;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::Result;
use crate::window::WindowPlanner;

/// Result of one fetch phase
#[derive(Debug)]
pub struct FetchOutcome {
    pub records: Vec<Record>,

    /// True when this was a watermark-less full load
    pub full_load: bool,

    /// Windows fetched on the incremental path
    pub windows_fetched: u32,

    /// Windows that still hit the result cap at the minimum size; each one
    /// may have dropped records that reconciliation must recover
    pub capped_windows: u32,
}

pub struct IncrementalFetcher {
    source: Arc<dyn RecordSource>,
    config: SyncConfig,
    clock: Arc<dyn Clock>,
}

impl IncrementalFetcher {
    pub fn new(source: Arc<dyn RecordSource>, config: SyncConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            source,
            config,
            clock,
        }
    }

    /// Fetch everything modified since the watermark, or everything when no
    /// watermark exists yet.
    pub async fn fetch(
        &self,
        spec: &ObjectSpec,
        watermark: Option<DateTime<Utc>>,
    ) -> Result<FetchOutcome> {
        match watermark {
            None => {
                info!(object_type = %spec.object_type, "no watermark, performing full load");
                let records = self.full_load(spec).await?;
                Ok(FetchOutcome {
                    records,
                    full_load: true,
                    windows_fetched: 0,
                    capped_windows: 0,
                })
            }
            Some(since) => {
                info!(
                    object_type = %spec.object_type,
                    since = %since,
                    "incremental load via windowed search"
                );
                self.windowed_load(spec, since).await
            }
        }
    }

    async fn full_load(&self, spec: &ObjectSpec) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        let mut after: Option<String> = None;
        let mut pages = 0u32;

        loop {
            let page = self.source.list_page(spec, after.as_deref()).await?;
            records.extend(page.records);
            pages += 1;

            match page.next_after {
                Some(next) => {
                    after = Some(next);
                    tokio::time::sleep(self.config.page_delay).await;
                }
                None => break,
            }
        }

        debug!(
            object_type = %spec.object_type,
            records = records.len(),
            pages,
            "full load complete"
        );
        Ok(records)
    }

    async fn windowed_load(
        &self,
        spec: &ObjectSpec,
        since: DateTime<Utc>,
    ) -> Result<FetchOutcome> {
        let horizon = self.clock.now();
        let mut planner = WindowPlanner::new(self.config.default_window, self.config.min_window);

        let mut records = Vec::new();
        let mut windows_fetched = 0u32;
        let mut capped_windows = 0u32;
        let mut cursor = since;

        while cursor < horizon {
            let mut window = planner.window_from(cursor, horizon);

            loop {
                let first = self.source.search_modified(spec, &window, None).await?;

                if first.total >= self.config.search_result_cap {
                    // Bisect until the window actually narrows; the horizon
                    // can clamp it below the planner's nominal size
                    let mut narrowed = false;
                    while planner.shrink() {
                        let candidate = planner.window_from(cursor, horizon);
                        if candidate != window {
                            window = candidate;
                            narrowed = true;
                            break;
                        }
                    }
                    if narrowed {
                        debug!(
                            object_type = %spec.object_type,
                            total = first.total,
                            window_minutes = planner.current().num_minutes(),
                            "window at result cap, bisecting"
                        );
                        continue;
                    }

                    // Minimum window still saturated: fetch what the origin
                    // will serve; reconciliation recovers the remainder
                    warn!(
                        object_type = %spec.object_type,
                        total = first.total,
                        cap = self.config.search_result_cap,
                        window_start = %window.start,
                        window_end = %window.end,
                        "minimum window still at result cap, proceeding; \
                         reconciliation will recover any dropped records"
                    );
                    capped_windows += 1;
                    self.drain_window(spec, &window, first, &mut records).await?;
                    break;
                }

                self.drain_window(spec, &window, first, &mut records).await?;
                planner.grow();
                break;
            }

            windows_fetched += 1;
            cursor = window.end;
        }

        info!(
            object_type = %spec.object_type,
            records = records.len(),
            windows = windows_fetched,
            capped = capped_windows,
            "incremental load complete"
        );

        Ok(FetchOutcome {
            records,
            full_load: false,
            windows_fetched,
            capped_windows,
        })
    }

    /// Follow the search cursor through one window, stopping at the result
    /// cap when the origin keeps paging past it.
    async fn drain_window(
        &self,
        spec: &ObjectSpec,
        window: &TimeRange,
        first: SearchPage,
        records: &mut Vec<Record>,
    ) -> Result<()> {
        let mut fetched = first.records.len() as u64;
        records.extend(first.records);
        let mut after = first.next_after;

        while let Some(cursor) = after {
            if fetched >= self.config.search_result_cap {
                warn!(
                    object_type = %spec.object_type,
                    fetched,
                    "stopping pagination at the result cap"
                );
                break;
            }

            tokio::time::sleep(self.config.page_delay).await;
            let page = self.source.search_modified(spec, window, Some(&cursor)).await?;
            fetched += page.records.len() as u64;
            records.extend(page.records);
            after = page.next_after;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::origin::{IdPage, RecordPage, TimeRange};
    use chrono::TimeZone;
    use mockall::mock;
    use std::collections::HashMap;
    use std::time::Duration;

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
        Record {
            id: id.to_string(),
            properties: HashMap::new(),
            created_at: None,
            updated_at: None,
        }
    }

    fn quick_config() -> SyncConfig {
        SyncConfig {
            page_delay: Duration::ZERO,
            ..SyncConfig::default()
        }
    }

    fn fetcher(source: MockSource, config: SyncConfig, now: DateTime<Utc>) -> IncrementalFetcher {
        IncrementalFetcher::new(Arc::new(source), config, Arc::new(FixedClock(now)))
    }

    #[tokio::test]
    async fn test_full_load_pages_to_exhaustion() {
        let mut source = MockSource::new();
        source
            .expect_list_page()
            .times(2)
            .returning(|_, after| match after {
                None => Ok(RecordPage {
                    records: vec![record("1"), record("2")],
                    next_after: Some("2".to_string()),
                }),
                Some("2") => Ok(RecordPage {
                    records: vec![record("3")],
                    next_after: None,
                }),
                other => panic!("unexpected cursor {:?}", other),
            });

        let now = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let outcome = fetcher(source, quick_config(), now)
            .fetch(&ObjectSpec::contacts(), None)
            .await
            .unwrap();

        assert!(outcome.full_load);
        assert_eq!(outcome.records.len(), 3);
        assert_eq!(outcome.windows_fetched, 0);
    }

    #[tokio::test]
    async fn test_incremental_walks_windows_to_horizon() {
        let mut source = MockSource::new();
        // 12 hours of history at a 6h default window: exactly two windows
        source
            .expect_search_modified()
            .times(2)
            .returning(|_, _, _| {
                Ok(SearchPage {
                    records: vec![record("1")],
                    next_after: None,
                    total: 1,
                })
            });

        let since = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();

        let outcome = fetcher(source, quick_config(), now)
            .fetch(&ObjectSpec::contacts(), Some(since))
            .await
            .unwrap();

        assert!(!outcome.full_load);
        assert_eq!(outcome.windows_fetched, 2);
        assert_eq!(outcome.capped_windows, 0);
        assert_eq!(outcome.records.len(), 2);
    }

    #[tokio::test]
    async fn test_saturated_window_bisects_before_paging() {
        let mut source = MockSource::new();
        let since = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 6, 0, 0).unwrap();

        // 6h probe reports the cap; both 3h halves stay under it
        source
            .expect_search_modified()
            .times(3)
            .returning(move |_, range, _| {
                let hours = (range.end - range.start).num_hours();
                if hours >= 6 {
                    Ok(SearchPage {
                        records: Vec::new(),
                        next_after: None,
                        total: 10_000,
                    })
                } else {
                    Ok(SearchPage {
                        records: vec![record("1")],
                        next_after: None,
                        total: 1,
                    })
                }
            });

        let outcome = fetcher(source, quick_config(), now)
            .fetch(&ObjectSpec::contacts(), Some(since))
            .await
            .unwrap();

        assert_eq!(outcome.windows_fetched, 2);
        assert_eq!(outcome.capped_windows, 0);
        assert_eq!(outcome.records.len(), 2);
    }

    #[tokio::test]
    async fn test_capped_minimum_window_proceeds_and_is_counted() {
        let mut source = MockSource::new();
        let since = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        // Horizon one minimum-window past the watermark
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 0, 15, 0).unwrap();

        // Every probe reports the cap, so bisection bottoms out
        let mut call = 0u32;
        source
            .expect_search_modified()
            .returning(move |_, _, after| {
                call += 1;
                let _ = after;
                Ok(SearchPage {
                    records: vec![record(&call.to_string())],
                    next_after: None,
                    total: 10_000,
                })
            });

        let outcome = fetcher(source, quick_config(), now)
            .fetch(&ObjectSpec::contacts(), Some(since))
            .await
            .unwrap();

        assert_eq!(outcome.windows_fetched, 1);
        assert_eq!(outcome.capped_windows, 1);
        assert!(!outcome.records.is_empty());
    }

    #[tokio::test]
    async fn test_watermark_at_horizon_fetches_nothing() {
        let source = MockSource::new();
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();

        let outcome = fetcher(source, quick_config(), now)
            .fetch(&ObjectSpec::contacts(), Some(now))
            .await
            .unwrap();

        assert!(outcome.records.is_empty());
        assert_eq!(outcome.windows_fetched, 0);
    }
}
