//! Atomic, lock-free export statistics.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

#[derive(Default)]
pub struct Stats {
    shipped: AtomicU64,
    failed: AtomicU64,
    malformed_lines: AtomicU64,
    last_ship_unix_ms: AtomicI64,
}

#[derive(Debug, Clone, Copy)]
pub struct StatsSnapshot {
    pub shipped: u64,
    pub failed: u64,
    pub malformed_lines: u64,
    pub last_ship_unix_ms: Option<i64>,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_shipped(&self, n: u64) {
        self.shipped.fetch_add(n, Ordering::Relaxed);
        self.last_ship_unix_ms.store(now_unix_ms(), Ordering::Relaxed);
    }

    pub fn record_failed(&self, n: u64) {
        self.failed.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_malformed(&self, n: u64) {
        self.malformed_lines.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let last = self.last_ship_unix_ms.load(Ordering::Relaxed);
        StatsSnapshot {
            shipped: self.shipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            malformed_lines: self.malformed_lines.load(Ordering::Relaxed),
            last_ship_unix_ms: if last == 0 { None } else { Some(last) },
        }
    }
}

fn now_unix_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_stats_have_no_last_ship_time() {
        let stats = Stats::new();
        assert_eq!(stats.snapshot().last_ship_unix_ms, None);
    }

    #[test]
    fn counters_accumulate_across_calls() {
        let stats = Stats::new();
        stats.record_shipped(3);
        stats.record_shipped(2);
        stats.record_failed(1);
        stats.record_malformed(4);
        let snap = stats.snapshot();
        assert_eq!(snap.shipped, 5);
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.malformed_lines, 4);
        assert!(snap.last_ship_unix_ms.is_some());
    }
}
