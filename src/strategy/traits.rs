use crate::strategy::types::{Decision, MarketView, StrategyState};

/// Core strategy trait
///
/// Strategies receive a view of the market for their asset and emit Go/NoGo
/// decisions. They may keep internal state of their own; everything that
/// must survive a restart lives in the [`StrategyState`] owned by the
/// executor.
///
/// # Implementation Notes
///
/// - `evaluate` should be fast - no blocking I/O
/// - Position info comes from the state (read-only)
/// - Order submission and reconciliation are handled by the executor
pub trait Strategy: Send + Sync {
    /// Unique identifier for this strategy
    fn name(&self) -> &str;

    /// Called once per committed market data change
    ///
    /// # Returns
    /// * `Decision::NoGo` - No action
    /// * `Decision::Go(intent)` - Submit the trade intent
    fn evaluate(&mut self, view: &MarketView, state: &StrategyState) -> Decision;

    /// Called once when the executor has restored its state
    fn on_register(&mut self, _state: &StrategyState) {}

    /// Called when the executor is shutting down
    fn on_shutdown(&mut self) {}
}

/// Boxed strategy for dynamic dispatch
pub type BoxedStrategy = Box<dyn Strategy>;
