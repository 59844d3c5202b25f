//! Buy-low / sell-high around a moving anchor price
//!
//! While holding, the strategy sells once the bid reaches the entry price
//! plus `tolerance * upside_factor`. While flat it buys once the ask drops
//! to the anchor minus `tolerance * downside_factor`. The anchor is the last
//! exit price, else the configured reference price, else the first ask seen.

use rust_decimal::Decimal;
use tracing::debug;

use crate::common::types::Side;
use crate::config::types::StrategyConfig;
use crate::strategy::traits::Strategy;
use crate::strategy::types::{Decision, MarketView, StrategyState, TradeIntent};

pub struct TargetPriceStrategy {
    tolerance: Decimal,
    upside_factor: Decimal,
    downside_factor: Decimal,
    start_mode: Side,
    reference_price: Option<Decimal>,
    size: Decimal,
    first_seen: Option<Decimal>,
}

impl TargetPriceStrategy {
    pub fn new(config: &StrategyConfig) -> Self {
        Self {
            tolerance: config.tolerance,
            upside_factor: config.upside_factor,
            downside_factor: config.downside_factor,
            start_mode: config.start_mode,
            reference_price: config.reference_price,
            size: config.size,
            first_seen: None,
        }
    }

    pub fn sell_target(&self, paid: Decimal) -> Decimal {
        paid * (Decimal::ONE + self.tolerance * self.upside_factor)
    }

    pub fn buy_target(&self, anchor: Decimal) -> Decimal {
        anchor * (Decimal::ONE - self.tolerance * self.downside_factor)
    }

    /// Portfolios configured to start selling hold `size` bought at the reference price
    fn holding(&self, state: &StrategyState) -> Option<(Decimal, Decimal)> {
        if let Some(paid) = state.entry_price() {
            return Some((paid, state.position_size()));
        }
        if !state.has_history() && self.start_mode == Side::Sell {
            return self.reference_price.map(|paid| (paid, self.size));
        }
        None
    }

    fn evaluate_sell(&self, view: &MarketView, paid: Decimal, held: Decimal) -> Decision {
        let Some(bid) = view.best_bid() else {
            return Decision::no_go();
        };
        let target = self.sell_target(paid);
        debug!(asset = %view.asset_id, %bid, %target, %paid, "selling");

        if bid >= target {
            Decision::go(
                TradeIntent::new(Side::Sell, held, format!("bid {} reached sell target {}", bid, target))
                    .with_price(bid),
            )
        } else {
            Decision::no_go()
        }
    }

    fn evaluate_buy(&mut self, view: &MarketView, state: &StrategyState) -> Decision {
        let Some(ask) = view.best_ask() else {
            return Decision::no_go();
        };
        let anchor = match state.last_exit_price.or(self.reference_price).or(self.first_seen) {
            Some(anchor) => anchor,
            None => {
                self.first_seen = Some(ask);
                return Decision::no_go();
            }
        };
        let target = self.buy_target(anchor);
        debug!(asset = %view.asset_id, %ask, %target, %anchor, "buying");

        if ask <= target {
            Decision::go(
                TradeIntent::new(Side::Buy, self.size, format!("ask {} reached buy target {}", ask, target))
                    .with_price(ask),
            )
        } else {
            Decision::no_go()
        }
    }
}

impl Strategy for TargetPriceStrategy {
    fn name(&self) -> &str {
        "target_price"
    }

    fn evaluate(&mut self, view: &MarketView, state: &StrategyState) -> Decision {
        match self.holding(state) {
            Some((paid, held)) => self.evaluate_sell(view, paid, held),
            None => self.evaluate_buy(view, state),
        }
    }
}
