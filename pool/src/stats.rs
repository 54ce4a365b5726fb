//! Export counters and the 30-minute success-rate window.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use common::PoolSnapshot;
use parking_lot::Mutex;

/// Number of 1-minute buckets kept for the moving success rate.
const WINDOW_BUCKETS: usize = 30;

#[derive(Debug, Default, Clone, Copy)]
struct Bucket {
    success: u64,
    failure: u64,
}

#[derive(Debug, Default)]
struct MovingWindow {
    current: Bucket,
    past: VecDeque<Bucket>,
}

/// Counters exposed on the health route.
///
/// Hot-path updates are atomic; the window bucket is a small mutex touched
/// once per job plus once per minute by the rotation timer.
#[derive(Debug, Default)]
pub struct PoolStats {
    export_attempts: AtomicU64,
    performed_exports: AtomicU64,
    dropped_exports: AtomicU64,
    export_from_svg_attempts: AtomicU64,
    time_spent_ms: AtomicU64,
    window: Mutex<MovingWindow>,
}

impl PoolStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_attempt(&self) {
        self.export_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_svg_attempt(&self) {
        self.export_from_svg_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self, elapsed_ms: u64) {
        self.performed_exports.fetch_add(1, Ordering::Relaxed);
        self.time_spent_ms.fetch_add(elapsed_ms, Ordering::Relaxed);
        self.window.lock().current.success += 1;
    }

    pub fn record_failure(&self) {
        self.dropped_exports.fetch_add(1, Ordering::Relaxed);
        self.window.lock().current.failure += 1;
    }

    /// Close the current minute bucket. Driven by a single timer task.
    pub fn rotate_bucket(&self) {
        let mut window = self.window.lock();
        let finished = std::mem::take(&mut window.current);
        window.past.push_back(finished);
        while window.past.len() > WINDOW_BUCKETS {
            window.past.pop_front();
        }
    }

    /// Success rate over the window, current bucket included. 1.0 when no
    /// job has completed yet.
    pub fn success_rate(&self) -> f64 {
        let window = self.window.lock();
        let (mut success, mut total) = (window.current.success, window.current.success + window.current.failure);
        for bucket in &window.past {
            success += bucket.success;
            total += bucket.success + bucket.failure;
        }
        if total == 0 {
            1.0
        } else {
            success as f64 / total as f64
        }
    }

    pub fn performed(&self) -> u64 {
        self.performed_exports.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped_exports.load(Ordering::Relaxed)
    }

    pub fn attempts(&self) -> u64 {
        self.export_attempts.load(Ordering::Relaxed)
    }

    /// Materialise the counters plus the given pool occupancy numbers.
    pub fn snapshot(&self, free: usize, in_use: usize, pending_create: usize) -> PoolSnapshot {
        let performed = self.performed_exports.load(Ordering::Relaxed);
        let time_spent = self.time_spent_ms.load(Ordering::Relaxed);
        PoolSnapshot {
            export_attempts: self.export_attempts.load(Ordering::Relaxed),
            performed_exports: performed,
            dropped_exports: self.dropped_exports.load(Ordering::Relaxed),
            export_from_svg_attempts: self.export_from_svg_attempts.load(Ordering::Relaxed),
            time_spent,
            spent_average: if performed == 0 {
                0.0
            } else {
                time_spent as f64 / performed as f64
            },
            free,
            in_use,
            pending_create,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_account_for_every_job() {
        let stats = PoolStats::new();
        stats.record_attempt();
        stats.record_success(120);
        stats.record_attempt();
        stats.record_failure();
        stats.record_attempt(); // cancelled: neither success nor failure

        let snap = stats.snapshot(1, 0, 0);
        assert_eq!(snap.export_attempts, 3);
        assert_eq!(snap.performed_exports, 1);
        assert_eq!(snap.dropped_exports, 1);
        assert!(snap.performed_exports + snap.dropped_exports <= snap.export_attempts);
        assert_eq!(snap.time_spent, 120);
        assert!((snap.spent_average - 120.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_success_rate_spans_buckets() {
        let stats = PoolStats::new();
        stats.record_success(1);
        stats.record_success(1);
        stats.rotate_bucket();
        stats.record_failure();
        stats.record_success(1);
        // 3 successes out of 4 completions across two buckets.
        assert!((stats.success_rate() - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_window_is_bounded() {
        let stats = PoolStats::new();
        for _ in 0..100 {
            stats.record_failure();
            stats.rotate_bucket();
        }
        stats.record_success(1);
        // Only the last 30 buckets plus the current one count.
        let rate = stats.success_rate();
        assert!((rate - 1.0 / 31.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_window_reports_full_rate() {
        let stats = PoolStats::new();
        assert!((stats.success_rate() - 1.0).abs() < f64::EPSILON);
    }
}
