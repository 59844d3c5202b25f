use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::common::types::{BookLevel, BookSnapshot, ChangeEvent, Quote, Side};

/// A trade the strategy wants executed
///
/// Sizing is fixed per portfolio, so the intent already carries the size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeIntent {
    pub side: Side,
    pub size: Decimal,
    /// Limit price; `None` submits a market order
    pub limit_price: Option<Decimal>,
    pub reason: String,
}

impl TradeIntent {
    pub fn new(side: Side, size: Decimal, reason: impl Into<String>) -> Self {
        Self {
            side,
            size,
            limit_price: None,
            reason: reason.into(),
        }
    }

    pub fn with_price(mut self, price: Decimal) -> Self {
        self.limit_price = Some(price);
        self
    }
}

/// Strategy decision output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// No action should be taken
    NoGo,
    /// Execute the trade intent
    Go(TradeIntent),
}

impl Decision {
    pub fn no_go() -> Self {
        Self::NoGo
    }

    pub fn go(intent: TradeIntent) -> Self {
        Self::Go(intent)
    }

    /// Returns true if this is a Go decision
    pub fn is_go(&self) -> bool {
        matches!(self, Self::Go(_))
    }
}

/// An order as handed to the gateway
///
/// Persisted inside the strategy state before submission so a restart can
/// reconcile it by `client_order_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderIntent {
    pub client_order_id: String,
    pub portfolio_id: String,
    pub asset_id: String,
    pub side: Side,
    pub size: Decimal,
    pub limit_price: Option<Decimal>,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

impl OrderIntent {
    /// Build an order from a trade intent with a fresh client order id
    pub fn from_trade(portfolio_id: &str, asset_id: &str, trade: TradeIntent) -> Self {
        Self {
            client_order_id: Uuid::new_v4().to_string(),
            portfolio_id: portfolio_id.to_string(),
            asset_id: asset_id.to_string(),
            side: trade.side,
            size: trade.size,
            limit_price: trade.limit_price,
            reason: trade.reason,
            created_at: Utc::now(),
        }
    }
}

/// Execution details of a filled order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fill {
    pub exchange_order_id: String,
    pub size: Decimal,
    /// Average fill price
    pub price: Decimal,
    pub filled_at: DateTime<Utc>,
}

/// What the gateway knows about an order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderOutcome {
    Filled(Fill),
    /// Accepted and still working
    Open { exchange_order_id: String },
    /// Refused or canceled without any fill
    Rejected { reason: String },
    /// The exchange has no record of the client order id
    NotFound,
}

impl OrderOutcome {
    pub fn is_final(&self) -> bool {
        !matches!(self, OrderOutcome::Open { .. })
    }
}

/// Reference to an open position lot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionRef {
    pub client_order_id: String,
    pub exchange_order_id: String,
    pub size: Decimal,
    pub entry_price: Decimal,
    pub opened_at: DateTime<Utc>,
}

/// Executor lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyPhase {
    Idle,
    Evaluating,
    OrderPending,
    /// Terminal until an operator resets the state document
    Failed,
}

impl StrategyPhase {
    /// Allowed phase transitions
    pub fn can_transition_to(self, next: StrategyPhase) -> bool {
        use StrategyPhase::*;
        matches!(
            (self, next),
            (Idle, Evaluating)
                | (Evaluating, Idle)
                | (Evaluating, OrderPending)
                | (Evaluating, Failed)
                | (OrderPending, Idle)
                | (OrderPending, Failed)
        )
    }
}

impl std::fmt::Display for StrategyPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StrategyPhase::Idle => "IDLE",
            StrategyPhase::Evaluating => "EVALUATING",
            StrategyPhase::OrderPending => "ORDER_PENDING",
            StrategyPhase::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Durable per-portfolio state, one keyed document per portfolio
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyState {
    pub portfolio_id: String,
    pub current_phase: StrategyPhase,
    #[serde(default)]
    pub open_position_refs: Vec<PositionRef>,
    /// Highest commit sequence evaluated, per watched collection
    #[serde(default)]
    pub last_evaluated_sequence: BTreeMap<String, u64>,
    #[serde(default)]
    pub pending_order: Option<OrderIntent>,
    #[serde(default)]
    pub last_exit_price: Option<Decimal>,
    #[serde(default)]
    pub failure_reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl StrategyState {
    pub fn new(portfolio_id: impl Into<String>) -> Self {
        Self {
            portfolio_id: portfolio_id.into(),
            current_phase: StrategyPhase::Idle,
            open_position_refs: Vec::new(),
            last_evaluated_sequence: BTreeMap::new(),
            pending_order: None,
            last_exit_price: None,
            failure_reason: None,
            updated_at: Utc::now(),
        }
    }

    pub fn is_holding(&self) -> bool {
        !self.open_position_refs.is_empty()
    }

    /// True once the portfolio has bought or sold anything
    pub fn has_history(&self) -> bool {
        self.is_holding() || self.last_exit_price.is_some()
    }

    pub fn position_size(&self) -> Decimal {
        self.open_position_refs.iter().map(|p| p.size).sum()
    }

    /// Size-weighted average entry price of the open lots
    pub fn entry_price(&self) -> Option<Decimal> {
        let size = self.position_size();
        if size.is_zero() {
            return None;
        }
        let cost: Decimal = self
            .open_position_refs
            .iter()
            .map(|p| p.size * p.entry_price)
            .sum();
        Some(cost / size)
    }

    pub fn last_evaluated(&self, collection: &str) -> Option<u64> {
        self.last_evaluated_sequence.get(collection).copied()
    }

    /// True when the event's sequence was already evaluated
    pub fn already_evaluated(&self, event: &ChangeEvent) -> bool {
        self.last_evaluated(&event.collection_name)
            .is_some_and(|seq| event.commit_sequence <= seq)
    }

    pub fn mark_evaluated(&mut self, event: &ChangeEvent) {
        let entry = self
            .last_evaluated_sequence
            .entry(event.collection_name.clone())
            .or_insert(0);
        *entry = (*entry).max(event.commit_sequence);
    }

    /// Apply a fill of the pending order to the open positions
    ///
    /// Buys open a lot; sells close lots oldest first.
    pub fn apply_fill(&mut self, intent: &OrderIntent, fill: &Fill) {
        match intent.side {
            Side::Buy => self.open_position_refs.push(PositionRef {
                client_order_id: intent.client_order_id.clone(),
                exchange_order_id: fill.exchange_order_id.clone(),
                size: fill.size,
                entry_price: fill.price,
                opened_at: fill.filled_at,
            }),
            Side::Sell => {
                let mut remaining = fill.size;
                self.open_position_refs.retain_mut(|lot| {
                    if remaining.is_zero() {
                        return true;
                    }
                    let closed = remaining.min(lot.size);
                    lot.size -= closed;
                    remaining -= closed;
                    !lot.size.is_zero()
                });
                self.last_exit_price = Some(fill.price);
            }
        }
    }
}

/// Market data assembled for one evaluation
#[derive(Debug, Clone)]
pub struct MarketView {
    pub asset_id: String,
    /// Change that triggered the evaluation
    pub trigger: ChangeEvent,
    pub quote: Option<Quote>,
    pub books: BTreeMap<BookLevel, BookSnapshot>,
}

impl MarketView {
    pub fn new(asset_id: impl Into<String>, trigger: ChangeEvent) -> Self {
        Self {
            asset_id: asset_id.into(),
            trigger,
            quote: None,
            books: BTreeMap::new(),
        }
    }

    pub fn with_quote(mut self, quote: Quote) -> Self {
        self.quote = Some(quote);
        self
    }

    pub fn with_book(mut self, snapshot: BookSnapshot) -> Self {
        self.books.insert(snapshot.level, snapshot);
        self
    }

    /// Best bid from the quote, falling back to the finest book held
    pub fn best_bid(&self) -> Option<Decimal> {
        self.quote.as_ref().map(|q| q.bid_price).or_else(|| {
            self.books
                .values()
                .find_map(|b| b.best_bid().map(|e| e.price))
        })
    }

    /// Best ask from the quote, falling back to the finest book held
    pub fn best_ask(&self) -> Option<Decimal> {
        self.quote.as_ref().map(|q| q.ask_price).or_else(|| {
            self.books
                .values()
                .find_map(|b| b.best_ask().map(|e| e.price))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn event(collection: &str, sequence: u64) -> ChangeEvent {
        ChangeEvent {
            collection_name: collection.to_string(),
            document_id: format!("doc-{}", sequence),
            commit_sequence: sequence,
        }
    }

    fn intent(side: Side) -> OrderIntent {
        OrderIntent::from_trade("p1", "BTC-USD", TradeIntent::new(side, dec!(1), "test"))
    }

    fn fill(size: Decimal, price: Decimal) -> Fill {
        Fill {
            exchange_order_id: "ex".to_string(),
            size,
            price,
            filled_at: Utc::now(),
        }
    }

    #[test]
    fn test_phase_transitions() {
        use StrategyPhase::*;
        assert!(Idle.can_transition_to(Evaluating));
        assert!(Evaluating.can_transition_to(OrderPending));
        assert!(OrderPending.can_transition_to(Idle));
        assert!(!Idle.can_transition_to(OrderPending));
        assert!(!Failed.can_transition_to(Idle));
        assert!(!OrderPending.can_transition_to(Evaluating));
    }

    #[test]
    fn test_evaluated_sequences_are_per_collection() {
        let mut state = StrategyState::new("p1");
        state.mark_evaluated(&event("ticker.btc-usd", 5));

        assert!(state.already_evaluated(&event("ticker.btc-usd", 5)));
        assert!(state.already_evaluated(&event("ticker.btc-usd", 3)));
        assert!(!state.already_evaluated(&event("ticker.btc-usd", 6)));
        assert!(!state.already_evaluated(&event("book-best.btc-usd", 1)));

        state.mark_evaluated(&event("ticker.btc-usd", 2));
        assert_eq!(state.last_evaluated("ticker.btc-usd"), Some(5));
    }

    #[test]
    fn test_fills_update_positions() {
        let mut state = StrategyState::new("p1");
        state.apply_fill(&intent(Side::Buy), &fill(dec!(1), dec!(100)));
        state.apply_fill(&intent(Side::Buy), &fill(dec!(1), dec!(110)));

        assert_eq!(state.position_size(), dec!(2));
        assert_eq!(state.entry_price(), Some(dec!(105)));

        state.apply_fill(&intent(Side::Sell), &fill(dec!(1.5), dec!(120)));
        assert_eq!(state.position_size(), dec!(0.5));
        assert_eq!(state.open_position_refs[0].entry_price, dec!(110));
        assert_eq!(state.last_exit_price, Some(dec!(120)));

        state.apply_fill(&intent(Side::Sell), &fill(dec!(0.5), dec!(121)));
        assert!(!state.is_holding());
        assert!(state.has_history());
    }

    #[test]
    fn test_state_round_trips_through_json() {
        let mut state = StrategyState::new("p1");
        state.current_phase = StrategyPhase::OrderPending;
        state.pending_order = Some(intent(Side::Buy));

        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["current_phase"], "order_pending");

        let restored: StrategyState = serde_json::from_value(json).unwrap();
        assert_eq!(restored, state);
    }
}
