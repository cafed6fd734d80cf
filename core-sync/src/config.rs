//! Engine configuration
//!
//! One explicit config object per run, sourced from the environment by the
//! runner. Nothing in the engine reads the environment directly.

use chrono::Duration as TimeDelta;
use std::time::Duration;

/// Sync engine configuration
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Sync cycles between forced full reconciliations
    pub reconciliation_frequency: u32,

    /// When false, every cycle reconciles regardless of recorded counts
    pub skip_reconciliation_if_counts_match: bool,

    /// Starting (and maximum) search window size
    pub default_window: TimeDelta,

    /// Bisection floor; at this size a capped window proceeds anyway
    pub min_window: TimeDelta,

    /// The origin's total-result ceiling per search filter
    pub search_result_cap: u64,

    /// Pause between successive pages of one paginated call
    pub page_delay: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            reconciliation_frequency: 10,
            skip_reconciliation_if_counts_match: true,
            default_window: TimeDelta::hours(6),
            min_window: TimeDelta::minutes(15),
            search_result_cap: 10_000,
            page_delay: Duration::from_millis(100),
        }
    }
}

impl SyncConfig {
    /// Load configuration from the environment, falling back to defaults
    /// for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            reconciliation_frequency: env_parse(
                "RECONCILIATION_FREQUENCY",
                defaults.reconciliation_frequency,
            ),
            skip_reconciliation_if_counts_match: env_bool(
                "SKIP_RECONCILIATION_IF_COUNTS_MATCH",
                defaults.skip_reconciliation_if_counts_match,
            ),
            default_window: TimeDelta::hours(env_parse("SYNC_WINDOW_HOURS", 6)),
            min_window: TimeDelta::minutes(env_parse("SYNC_MIN_WINDOW_MINUTES", 15)),
            search_result_cap: env_parse("SEARCH_RESULT_CAP", defaults.search_result_cap),
            page_delay: Duration::from_millis(env_parse("SYNC_PAGE_DELAY_MS", 100)),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
        .unwrap_or(default)
}
