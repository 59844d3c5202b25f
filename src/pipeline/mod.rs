//! Ingestion pipeline: collectors writing to the store and watchers tailing it
//!
//! Collectors (stream and poll) only ever append to the store. Watchers only
//! ever read from it. The store's per-collection commit order is the single
//! point where the two sides meet.

pub mod poll;
pub mod rate_gate;
pub mod stats;
pub mod stream;
pub mod watcher;

pub use poll::{PollCollector, PollKey};
pub use rate_gate::RateGate;
pub use stats::{CollectorStats, StatsSnapshot};
pub use stream::{PendingQuote, QuoteAccumulator, StreamCollector};
pub use watcher::ChangeWatcher;
