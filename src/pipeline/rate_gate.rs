//! Per-key minimum-interval throttle

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

/// Admits at most one item per key per interval
///
/// Each collector owns its own gate. Calls for different keys never contend
/// beyond a shard lock; a check and its update happen under the same entry
/// lock, so two concurrent calls for one key cannot both be admitted.
#[derive(Debug)]
pub struct RateGate<K: Eq + Hash> {
    default_interval: Duration,
    intervals: HashMap<K, Duration>,
    last_accepted: DashMap<K, Instant>,
}

impl<K: Eq + Hash + Clone> RateGate<K> {
    pub fn new(default_interval: Duration) -> Self {
        Self {
            default_interval,
            intervals: HashMap::new(),
            last_accepted: DashMap::new(),
        }
    }

    /// Override the interval for one key
    pub fn with_interval(mut self, key: K, interval: Duration) -> Self {
        self.intervals.insert(key, interval);
        self
    }

    pub fn with_intervals(mut self, intervals: impl IntoIterator<Item = (K, Duration)>) -> Self {
        self.intervals.extend(intervals);
        self
    }

    pub fn interval_for(&self, key: &K) -> Duration {
        self.intervals
            .get(key)
            .copied()
            .unwrap_or(self.default_interval)
    }

    /// Admit `key` at `now` if its interval has elapsed since the last admission
    ///
    /// A rejected call leaves the recorded admission untouched. A `now`
    /// earlier than the last admission is rejected.
    pub fn admit(&self, key: &K, now: Instant) -> bool {
        let interval = self.interval_for(key);
        match self.last_accepted.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                match now.checked_duration_since(*entry.get()) {
                    Some(elapsed) if elapsed >= interval => {
                        entry.insert(now);
                        true
                    }
                    _ => false,
                }
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(now);
                true
            }
        }
    }

    /// Move the recorded admission of `key` forward to `at`
    ///
    /// For callers whose admitted work completes later than the admission
    /// instant; an earlier `at` is ignored.
    pub fn record(&self, key: &K, at: Instant) {
        self.last_accepted
            .entry(key.clone())
            .and_modify(|last| *last = (*last).max(at))
            .or_insert(at);
    }

    /// Time of the last admission for `key`
    pub fn last_accepted(&self, key: &K) -> Option<Instant> {
        self.last_accepted.get(key).map(|at| *at)
    }

    /// Number of keys admitted at least once
    pub fn tracked_keys(&self) -> usize {
        self.last_accepted.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_first_call_admits() {
        let gate: RateGate<String> = RateGate::new(Duration::from_secs(1));
        let now = Instant::now();

        assert!(gate.admit(&"BTC-USD".to_string(), now));
        assert_eq!(gate.last_accepted(&"BTC-USD".to_string()), Some(now));
        assert_eq!(gate.tracked_keys(), 1);
    }

    #[test]
    fn test_rejects_within_interval() {
        let gate: RateGate<&str> = RateGate::new(Duration::from_secs(1));
        let start = Instant::now();

        assert!(gate.admit(&"BTC-USD", start));
        assert!(!gate.admit(&"BTC-USD", start + Duration::from_millis(999)));
        // rejection does not move the window
        assert_eq!(gate.last_accepted(&"BTC-USD"), Some(start));
        assert!(gate.admit(&"BTC-USD", start + Duration::from_secs(1)));
    }

    #[test]
    fn test_keys_are_independent() {
        let gate: RateGate<&str> = RateGate::new(Duration::from_secs(1));
        let now = Instant::now();

        assert!(gate.admit(&"BTC-USD", now));
        assert!(gate.admit(&"ETH-USD", now));
        assert!(!gate.admit(&"BTC-USD", now));
    }

    #[test]
    fn test_per_key_override() {
        let gate = RateGate::new(Duration::from_secs(1)).with_interval("ETH-USD", Duration::from_secs(5));
        let start = Instant::now();

        assert_eq!(gate.interval_for(&"ETH-USD"), Duration::from_secs(5));
        assert!(gate.admit(&"ETH-USD", start));
        assert!(!gate.admit(&"ETH-USD", start + Duration::from_secs(2)));
        assert!(gate.admit(&"ETH-USD", start + Duration::from_secs(5)));
    }

    #[test]
    fn test_record_moves_window_forward_only() {
        let gate: RateGate<&str> = RateGate::new(Duration::from_secs(5));
        let start = Instant::now();

        assert!(gate.admit(&"BTC-USD", start));
        gate.record(&"BTC-USD", start + Duration::from_secs(7));
        gate.record(&"BTC-USD", start + Duration::from_secs(1));

        assert_eq!(gate.last_accepted(&"BTC-USD"), Some(start + Duration::from_secs(7)));
        assert!(!gate.admit(&"BTC-USD", start + Duration::from_secs(10)));
        assert!(gate.admit(&"BTC-USD", start + Duration::from_secs(12)));
    }

    #[test]
    fn test_earlier_timestamp_is_rejected() {
        let gate: RateGate<&str> = RateGate::new(Duration::ZERO);
        let later = Instant::now() + Duration::from_secs(10);

        assert!(gate.admit(&"BTC-USD", later));
        assert!(!gate.admit(&"BTC-USD", later - Duration::from_secs(1)));
    }

    #[test]
    fn test_concurrent_admits_for_one_key() {
        let gate = Arc::new(RateGate::<u32>::new(Duration::from_secs(60)));
        let now = Instant::now();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let gate = gate.clone();
                std::thread::spawn(move || gate.admit(&7, now))
            })
            .collect();
        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|admitted| *admitted)
            .count();

        assert_eq!(admitted, 1);
    }
}
