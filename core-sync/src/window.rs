//! # Window Planner
//!
//! Sizes the half-open time windows the incremental fetch walks through.
//!
//! The origin's search endpoint refuses to serve more than a fixed number
//! of results per filter, so a window whose match count reaches that cap
//! must be bisected before paging; windows that stay under it let the size
//! double back toward the default. The planner is pure state — no I/O — so
//! the sizing behavior is testable on its own.

use bridge_traits::origin::TimeRange;
use chrono::{DateTime, Duration as TimeDelta, Utc};

#[derive(Debug, Clone)]
pub struct WindowPlanner {
    default_window: TimeDelta,
    min_window: TimeDelta,
    current: TimeDelta,
}

impl WindowPlanner {
    pub fn new(default_window: TimeDelta, min_window: TimeDelta) -> Self {
        let min_window = min_window.min(default_window);
        Self {
            default_window,
            min_window,
            current: default_window,
        }
    }

    /// Current window size.
    pub fn current(&self) -> TimeDelta {
        self.current
    }

    /// The next window starting at `start`, clamped to `horizon`.
    pub fn window_from(&self, start: DateTime<Utc>, horizon: DateTime<Utc>) -> TimeRange {
        let end = (start + self.current).min(horizon);
        TimeRange::new(start, end)
    }

    /// Halve the window size. Returns false when already at the floor, in
    /// which case the caller proceeds with the capped window.
    pub fn shrink(&mut self) -> bool {
        if self.current <= self.min_window {
            return false;
        }
        self.current = (self.current / 2).max(self.min_window);
        true
    }

    /// Double the window size back toward the default.
    pub fn grow(&mut self) {
        self.current = (self.current * 2).min(self.default_window);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn planner() -> WindowPlanner {
        WindowPlanner::new(TimeDelta::hours(6), TimeDelta::minutes(15))
    }

    #[test]
    fn test_shrink_bisects_down_to_floor() {
        let mut planner = planner();
        assert_eq!(planner.current(), TimeDelta::hours(6));

        assert!(planner.shrink());
        assert_eq!(planner.current(), TimeDelta::hours(3));

        while planner.shrink() {}
        assert_eq!(planner.current(), TimeDelta::minutes(15));

        // At the floor the fetch proceeds anyway
        assert!(!planner.shrink());
        assert_eq!(planner.current(), TimeDelta::minutes(15));
    }

    #[test]
    fn test_grow_returns_to_default_and_stops() {
        let mut planner = planner();
        while planner.shrink() {}

        planner.grow();
        assert_eq!(planner.current(), TimeDelta::minutes(30));

        for _ in 0..10 {
            planner.grow();
        }
        assert_eq!(planner.current(), TimeDelta::hours(6));
    }

    #[test]
    fn test_window_from_clamps_to_horizon() {
        let planner = planner();
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let horizon = Utc.with_ymd_and_hms(2024, 3, 1, 2, 0, 0).unwrap();

        let window = planner.window_from(start, horizon);
        assert_eq!(window.start, start);
        assert_eq!(window.end, horizon);

        let far_horizon = Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap();
        let window = planner.window_from(start, far_horizon);
        assert_eq!(window.end, start + TimeDelta::hours(6));
    }

    #[test]
    fn test_floor_never_exceeds_default() {
        let planner = WindowPlanner::new(TimeDelta::minutes(10), TimeDelta::hours(1));
        assert_eq!(planner.current(), TimeDelta::minutes(10));
        assert!(!planner.clone().shrink());
    }
}
