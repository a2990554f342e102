// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Per-project-root restart rate limiting.
//!
//! Unexpected server exits may be answered with an automatic restart,
//! but only so many times: more than [`MAX_RESTARTS`] attempts inside
//! a rolling [`RESTART_WINDOW`] means the server is crash-looping and
//! the root is left without a session until the window lapses.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::debug;

/// Restart attempts tolerated per root within one window.
pub const MAX_RESTARTS: u32 = 5;

/// Cool-down window with no restarts after which a root's counter
/// resets.
pub const RESTART_WINDOW: Duration = Duration::from_secs(180);

/// Counter record for one project root.
///
/// Owns the scheduled reset so clearing the record also cancels the
/// timer; timers never outlive their counter.
struct RestartRecord {
    count: u32,
    reset_task: tokio::task::JoinHandle<()>,
}

impl Drop for RestartRecord {
    fn drop(&mut self) {
        self.reset_task.abort();
    }
}

/// Tracks restart attempts per project root.
#[derive(Default)]
pub struct RestartTracker {
    records: Arc<Mutex<HashMap<PathBuf, RestartRecord>>>,
}

impl RestartTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a restart attempt for `root` and reports whether the
    /// limit is now exceeded.
    ///
    /// Each call re-arms the reset timer, so the counter only clears
    /// after [`RESTART_WINDOW`] with no further attempts. The sixth
    /// call inside one window is the first to return `true`.
    #[must_use]
    pub fn record_attempt(&self, root: &Path) -> bool {
        let Ok(mut records) = self.records.lock() else {
            return false;
        };

        // Dropping the previous record aborts its reset timer.
        let count = records.remove(root).map_or(1, |old| old.count + 1);

        let reset_records = self.records.clone();
        let reset_root = root.to_path_buf();
        let reset_task = tokio::spawn(async move {
            tokio::time::sleep(RESTART_WINDOW).await;
            if let Ok(mut records) = reset_records.lock() {
                debug!(root = %reset_root.display(), "restart window lapsed, counter reset");
                records.remove(&reset_root);
            }
        });

        records.insert(root.to_path_buf(), RestartRecord { count, reset_task });

        if count > MAX_RESTARTS {
            debug!(root = %root.display(), count, "restart limit reached");
            true
        } else {
            false
        }
    }

    /// Current attempt count for `root` within the live window.
    #[must_use]
    pub fn attempts(&self, root: &Path) -> u32 {
        self.records
            .lock()
            .ok()
            .and_then(|records| records.get(root).map(|r| r.count))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_limit_sequence_five_false_then_true() {
        let tracker = RestartTracker::new();
        let root = Path::new("/p/");

        let outcomes: Vec<bool> = (0..6).map(|_| tracker.record_attempt(root)).collect();
        assert_eq!(outcomes, vec![false, false, false, false, false, true]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_counter_resets_after_window() {
        let tracker = RestartTracker::new();
        let root = Path::new("/p/");

        for _ in 0..6 {
            let _ = tracker.record_attempt(root);
        }
        assert_eq!(tracker.attempts(root), 6);

        // Let the spawned reset task register its timer before advancing.
        tokio::task::yield_now().await;
        tokio::time::advance(RESTART_WINDOW + Duration::from_secs(1)).await;
        // Let the reset task run.
        tokio::task::yield_now().await;
        assert_eq!(tracker.attempts(root), 0);

        // The sequence repeats after the window lapses.
        let outcomes: Vec<bool> = (0..6).map(|_| tracker.record_attempt(root)).collect();
        assert_eq!(outcomes, vec![false, false, false, false, false, true]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_attempt_rearms_the_window() {
        let tracker = RestartTracker::new();
        let root = Path::new("/p/");

        let _ = tracker.record_attempt(root);
        tokio::time::advance(RESTART_WINDOW / 2).await;
        let _ = tracker.record_attempt(root);

        // Half a window after the second attempt the counter is still
        // alive: the timer restarted with that attempt.
        tokio::time::advance(RESTART_WINDOW / 2).await;
        tokio::task::yield_now().await;
        assert_eq!(tracker.attempts(root), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_roots_are_tracked_independently() {
        let tracker = RestartTracker::new();

        for _ in 0..5 {
            let _ = tracker.record_attempt(Path::new("/a/"));
        }
        assert!(tracker.record_attempt(Path::new("/a/")));
        assert!(!tracker.record_attempt(Path::new("/b/")));
    }
}
