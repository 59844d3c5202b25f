//! Per-portfolio strategy state machine
//!
//! An executor consumes change events for its asset one at a time. Each
//! event moves the portfolio through `IDLE -> EVALUATING -> IDLE` or
//! `IDLE -> EVALUATING -> ORDER_PENDING -> {IDLE, FAILED}`; the state
//! document is written to the store on every transition, before the next
//! event is taken from the queue.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::common::backoff::Backoff;
use crate::common::errors::{AlphaError, Result};
use crate::common::traits::OrderGateway;
use crate::common::types::{
    book_collection, quote_collection, BookLevel, BookSnapshot, ChangeEvent, Quote,
    STRATEGY_STATE_COLLECTION,
};
use crate::config::types::{ExecutorConfig, PortfolioConfig};
use crate::store::{latest_record, upsert_record, DocumentStore};
use crate::strategy::traits::BoxedStrategy;
use crate::strategy::types::{
    Decision, MarketView, OrderIntent, OrderOutcome, StrategyPhase, StrategyState,
};

/// A persisted phase change, reported to an optional listener
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseTransition {
    pub portfolio_id: String,
    pub from: StrategyPhase,
    pub to: StrategyPhase,
}

/// How an order in flight was resolved
enum Resolution {
    Settled,
    /// Shutdown requested while the order was still open
    Interrupted,
}

pub struct StrategyExecutor {
    portfolio: PortfolioConfig,
    config: ExecutorConfig,
    store: Arc<dyn DocumentStore>,
    gateway: Arc<dyn OrderGateway>,
    strategy: BoxedStrategy,
    state: StrategyState,
    watched: Vec<String>,
    cancel: CancellationToken,
    transitions: Option<mpsc::UnboundedSender<PhaseTransition>>,
}

impl StrategyExecutor {
    /// Load the portfolio's state document, or start `IDLE` when none exists
    pub async fn restore(
        portfolio: PortfolioConfig,
        config: ExecutorConfig,
        store: Arc<dyn DocumentStore>,
        gateway: Arc<dyn OrderGateway>,
        strategy: BoxedStrategy,
    ) -> Result<Self> {
        let state = match store.fetch(STRATEGY_STATE_COLLECTION, &portfolio.id).await? {
            Some(body) => {
                let state: StrategyState = serde_json::from_value(body)?;
                info!(
                    portfolio = %portfolio.id,
                    phase = %state.current_phase,
                    positions = state.open_position_refs.len(),
                    "Restored strategy state"
                );
                state
            }
            None => {
                info!(portfolio = %portfolio.id, "No strategy state found, starting IDLE");
                StrategyState::new(portfolio.id.clone())
            }
        };

        let mut watched = vec![quote_collection(&portfolio.asset)];
        watched.extend(
            BookLevel::ALL
                .iter()
                .map(|level| book_collection(&portfolio.asset, *level)),
        );

        let mut strategy = strategy;
        strategy.on_register(&state);

        Ok(Self {
            portfolio,
            config,
            store,
            gateway,
            strategy,
            state,
            watched,
            cancel: CancellationToken::new(),
            transitions: None,
        })
    }

    /// Report every persisted phase change on the given channel
    pub fn with_transition_listener(mut self, tx: mpsc::UnboundedSender<PhaseTransition>) -> Self {
        self.transitions = Some(tx);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn portfolio_id(&self) -> &str {
        &self.portfolio.id
    }

    pub fn state(&self) -> &StrategyState {
        &self.state
    }

    pub fn phase(&self) -> StrategyPhase {
        self.state.current_phase
    }

    /// Collections whose changes drive this executor
    pub fn watched_collections(&self) -> &[String] {
        &self.watched
    }

    /// Sequence after which events for `collection` are still unevaluated
    pub fn resume_sequence(&self, collection: &str) -> Option<u64> {
        self.state.last_evaluated(collection)
    }

    /// Bring a restored state back to a consistent phase
    ///
    /// `EVALUATING` never submitted anything and returns to `IDLE`;
    /// `ORDER_PENDING` is reconciled with the gateway; `FAILED` stays put.
    #[instrument(skip(self), fields(portfolio = %self.portfolio.id))]
    pub async fn recover(&mut self) -> Result<()> {
        match self.state.current_phase {
            StrategyPhase::Idle => Ok(()),
            StrategyPhase::Evaluating => {
                warn!("Interrupted mid-evaluation, returning to IDLE");
                self.transition(StrategyPhase::Idle).await
            }
            StrategyPhase::OrderPending => {
                let Some(intent) = self.state.pending_order.clone() else {
                    return self
                        .fail("ORDER_PENDING without a recorded order".to_string())
                        .await;
                };
                info!(client_order_id = %intent.client_order_id, "Reconciling pending order");
                let outcome = self.gateway.order_status(&intent.client_order_id).await;
                self.settle(intent, outcome).await.map(|_| ())
            }
            StrategyPhase::Failed => {
                error!(
                    reason = self.state.failure_reason.as_deref().unwrap_or("unknown"),
                    "Portfolio is FAILED; manual intervention required"
                );
                Ok(())
            }
        }
    }

    /// Process one change event to completion
    pub async fn handle_event(&mut self, event: ChangeEvent) -> Result<()> {
        if !self.watched.contains(&event.collection_name) {
            debug!(collection = %event.collection_name, "Event for unwatched collection ignored");
            return Ok(());
        }

        match self.state.current_phase {
            StrategyPhase::Failed => {
                error!(
                    portfolio = %self.portfolio.id,
                    sequence = event.commit_sequence,
                    "Portfolio is FAILED, event ignored"
                );
                return Ok(());
            }
            StrategyPhase::Idle => {}
            _ => {
                // A previous cycle was interrupted by shutdown.
                self.recover().await?;
                if self.state.current_phase != StrategyPhase::Idle {
                    return Ok(());
                }
            }
        }

        if self.state.already_evaluated(&event) {
            debug!(
                portfolio = %self.portfolio.id,
                collection = %event.collection_name,
                sequence = event.commit_sequence,
                "Sequence already evaluated"
            );
            return Ok(());
        }

        self.transition(StrategyPhase::Evaluating).await?;

        let view = match self.market_view(&event).await {
            Ok(view) => view,
            Err(e) => {
                warn!(portfolio = %self.portfolio.id, error = %e, "Could not assemble market view");
                return self.transition(StrategyPhase::Idle).await;
            }
        };

        let decision = self.strategy.evaluate(&view, &self.state);
        self.state.mark_evaluated(&event);

        match decision {
            Decision::NoGo => self.transition(StrategyPhase::Idle).await,
            Decision::Go(trade) => {
                let intent = OrderIntent::from_trade(&self.portfolio.id, &self.portfolio.asset, trade);
                info!(
                    portfolio = %self.portfolio.id,
                    client_order_id = %intent.client_order_id,
                    side = %intent.side,
                    size = %intent.size,
                    reason = %intent.reason,
                    "Submitting order"
                );
                self.state.pending_order = Some(intent.clone());
                self.transition(StrategyPhase::OrderPending).await?;

                let outcome = self.gateway.submit(&intent).await;
                if let Resolution::Interrupted = self.settle(intent, outcome).await? {
                    info!(
                        portfolio = %self.portfolio.id,
                        "Shutdown with order still pending, reconciling on restart"
                    );
                }
                Ok(())
            }
        }
    }

    /// Consume events until the queue closes or shutdown is requested
    pub async fn run(mut self, mut events: mpsc::Receiver<ChangeEvent>) -> Result<()> {
        if let Err(e) = self.recover().await {
            error!(portfolio = %self.portfolio.id, error = %e, "Recovery failed");
        }

        let cancel = self.cancel.clone();
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(portfolio = %self.portfolio.id, "Executor shutting down");
                    break;
                }
                maybe = events.recv() => match maybe {
                    Some(event) => {
                        if let Err(e) = self.handle_event(event).await {
                            error!(portfolio = %self.portfolio.id, error = %e, "Event handling failed");
                        }
                    }
                    None => {
                        info!(portfolio = %self.portfolio.id, "Event queue closed");
                        break;
                    }
                }
            }
        }

        self.strategy.on_shutdown();
        Ok(())
    }

    async fn market_view(&self, event: &ChangeEvent) -> Result<MarketView> {
        let store = self.store.as_ref();
        let mut view = MarketView::new(self.portfolio.asset.clone(), event.clone());

        if let Some(quote) =
            latest_record::<Quote>(store, &quote_collection(&self.portfolio.asset)).await?
        {
            view = view.with_quote(quote);
        }
        for level in BookLevel::ALL {
            let collection = book_collection(&self.portfolio.asset, level);
            if let Some(snapshot) = latest_record::<BookSnapshot>(store, &collection).await? {
                view = view.with_book(snapshot);
            }
        }
        Ok(view)
    }

    /// Drive an order in flight to a final outcome
    async fn settle(
        &mut self,
        intent: OrderIntent,
        first: Result<OrderOutcome>,
    ) -> Result<Resolution> {
        let started = Instant::now();
        let mut reconcile = Backoff::new(self.config.reconcile.clone());
        let mut cancel_requested = false;
        let mut outcome = first;

        loop {
            let next = match outcome {
                Ok(OrderOutcome::Filled(fill)) => {
                    info!(
                        portfolio = %self.portfolio.id,
                        client_order_id = %intent.client_order_id,
                        size = %fill.size,
                        price = %fill.price,
                        "Order filled"
                    );
                    self.state.apply_fill(&intent, &fill);
                    self.state.pending_order = None;
                    self.transition(StrategyPhase::Idle).await?;
                    return Ok(Resolution::Settled);
                }
                Ok(OrderOutcome::Rejected { reason }) => {
                    warn!(
                        portfolio = %self.portfolio.id,
                        client_order_id = %intent.client_order_id,
                        %reason,
                        "Order rejected"
                    );
                    self.state.pending_order = None;
                    self.transition(StrategyPhase::Idle).await?;
                    return Ok(Resolution::Settled);
                }
                Ok(OrderOutcome::NotFound) => {
                    info!(
                        portfolio = %self.portfolio.id,
                        client_order_id = %intent.client_order_id,
                        "Order unknown to the exchange, treating as not placed"
                    );
                    self.state.pending_order = None;
                    self.transition(StrategyPhase::Idle).await?;
                    return Ok(Resolution::Settled);
                }
                Ok(OrderOutcome::Open { exchange_order_id }) => {
                    let elapsed = started.elapsed();
                    let timeout = self.config.order_timeout();
                    if elapsed >= timeout * 2 && cancel_requested {
                        let e = AlphaError::OrderTimeout(intent.client_order_id.clone());
                        return self.fail(e.to_string()).await.map(|_| Resolution::Settled);
                    }
                    if elapsed >= timeout && !cancel_requested {
                        warn!(
                            portfolio = %self.portfolio.id,
                            client_order_id = %intent.client_order_id,
                            %exchange_order_id,
                            "Order open past timeout, cancelling"
                        );
                        cancel_requested = true;
                        if let Err(e) = self.gateway.cancel(&intent.client_order_id).await {
                            warn!(error = %e, "Cancel request failed");
                        }
                    }
                    if self.pause(self.config.status_poll_interval()).await {
                        return Ok(Resolution::Interrupted);
                    }
                    self.gateway.order_status(&intent.client_order_id).await
                }
                Err(AlphaError::Gateway {
                    message,
                    recoverable: true,
                }) => match reconcile.next_delay() {
                    Some(delay) => {
                        warn!(
                            portfolio = %self.portfolio.id,
                            client_order_id = %intent.client_order_id,
                            attempt = reconcile.attempt_count(),
                            %message,
                            "Order outcome unknown, reconciling in {:?}",
                            delay
                        );
                        if self.pause(delay).await {
                            return Ok(Resolution::Interrupted);
                        }
                        self.gateway.order_status(&intent.client_order_id).await
                    }
                    None => {
                        let reason = format!("could not reconcile order: {}", message);
                        return self.fail(reason).await.map(|_| Resolution::Settled);
                    }
                },
                Err(e) => {
                    return self
                        .fail(format!("gateway error: {}", e))
                        .await
                        .map(|_| Resolution::Settled);
                }
            };
            outcome = next;
        }
    }

    /// Sleep unless shutdown is requested first; true when cancelled
    async fn pause(&self, delay: std::time::Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => true,
            _ = sleep(delay) => false,
        }
    }

    async fn fail(&mut self, reason: String) -> Result<()> {
        error!(portfolio = %self.portfolio.id, %reason, "Portfolio entering FAILED");
        self.state.failure_reason = Some(reason);
        self.transition(StrategyPhase::Failed).await
    }

    async fn transition(&mut self, next: StrategyPhase) -> Result<()> {
        let from = self.state.current_phase;
        if !from.can_transition_to(next) {
            return Err(AlphaError::Internal(format!(
                "invalid phase transition {} -> {}",
                from, next
            )));
        }

        self.state.current_phase = next;
        self.state.updated_at = Utc::now();
        self.persist_state().await?;

        debug!(portfolio = %self.portfolio.id, %from, to = %next, "Phase transition");
        if let Some(tx) = &self.transitions {
            let _ = tx.send(PhaseTransition {
                portfolio_id: self.portfolio.id.clone(),
                from,
                to: next,
            });
        }
        Ok(())
    }

    /// Write the state document, retrying until it lands or shutdown
    async fn persist_state(&self) -> Result<()> {
        loop {
            match upsert_record(
                self.store.as_ref(),
                STRATEGY_STATE_COLLECTION,
                &self.portfolio.id,
                &self.state,
                &self.config.store_retry,
            )
            .await
            {
                Ok(()) => return Ok(()),
                Err(e) => {
                    error!(
                        portfolio = %self.portfolio.id,
                        error = %e,
                        "Executor degraded: strategy state not persisted"
                    );
                    if self.pause(self.config.store_retry.max_delay()).await {
                        return Err(e);
                    }
                }
            }
        }
    }
}
