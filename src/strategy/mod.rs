//! Strategy module for trade decision making and execution
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  ChangeWatcher (one per collection)                         │
//! │    - Tails ticker.* / book-*.*, one cursor per portfolio    │
//! └─────────────────────────────────────────────────────────────┘
//!        │ ChangeEvent (bounded queue per portfolio)
//!        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  StrategyExecutor (one per portfolio, serial)               │
//! │    IDLE → EVALUATING → ORDER_PENDING → IDLE | FAILED        │
//! │    - Strategy.evaluate() → Go/NoGo                          │
//! │    - OrderGateway submit / status / cancel                  │
//! │    - StrategyState persisted on every transition            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`Strategy`]: Trait for implementing trading strategies
//! - [`Decision`]: Go/NoGo enum returned by strategies
//! - [`TargetPriceStrategy`]: tolerance-band buy/sell strategy
//! - [`StrategyExecutor`]: the per-portfolio state machine
//! - [`ExecutorFactory`]: builds executors from configuration
//! - [`PaperGateway`]: simulated order gateway

mod types;
mod traits;
pub mod executor;
pub mod factory;
pub mod paper;
pub mod target_price;

pub use types::{
    Decision,
    Fill,
    MarketView,
    OrderIntent,
    OrderOutcome,
    PositionRef,
    StrategyPhase,
    StrategyState,
    TradeIntent,
};

pub use traits::{BoxedStrategy, Strategy};

pub use executor::{PhaseTransition, StrategyExecutor};
pub use factory::{ExecutorFactory, ExecutorHandle};
pub use paper::PaperGateway;
pub use target_price::TargetPriceStrategy;
