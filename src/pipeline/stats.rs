use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Counters shared between a collector and whoever reports on it
#[derive(Debug, Default)]
pub struct CollectorStats {
    persisted: AtomicU64,
    throttled: AtomicU64,
    malformed: AtomicU64,
    fetch_failures: AtomicU64,
    store_failures: AtomicU64,
    degraded: AtomicBool,
}

/// Point-in-time copy of [`CollectorStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub persisted: u64,
    pub throttled: u64,
    pub malformed: u64,
    pub fetch_failures: u64,
    pub store_failures: u64,
    pub degraded: bool,
}

impl CollectorStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// A write landed; clears the degraded flag
    pub fn record_persisted(&self) {
        self.persisted.fetch_add(1, Ordering::Relaxed);
        self.degraded.store(false, Ordering::Relaxed);
    }

    pub fn record_throttled(&self) {
        self.throttled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fetch_failure(&self) {
        self.fetch_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// A write exhausted its retries; marks the collector degraded
    ///
    /// Returns true when this failure turned a healthy collector degraded.
    pub fn record_store_failure(&self) -> bool {
        self.store_failures.fetch_add(1, Ordering::Relaxed);
        !self.degraded.swap(true, Ordering::Relaxed)
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            persisted: self.persisted.load(Ordering::Relaxed),
            throttled: self.throttled.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            store_failures: self.store_failures.load(Ordering::Relaxed),
            degraded: self.is_degraded(),
        }
    }
}
