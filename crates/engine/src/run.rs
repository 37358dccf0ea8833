use std::panic::{catch_unwind, AssertUnwindSafe};

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use common::{Candle, Error, OrderIntent, OrderRole, Position, RejectionReason};
use paper::SimulatedPortfolio;
use risk::{ProtectionAction, ProtectionManager};
use strategy::{Strategy, StrategyError};

use crate::executor::OrderExecutor;
use crate::lifecycle::{EndReason, RunPhase};
use crate::report::BacktestReport;

/// Sync rounds per settle; each round can add at most one protective flatten.
const SETTLE_PASSES: usize = 3;

/// One strategy instance wired to its own executor, protection and account.
///
/// Everything here is owned by the run; nothing is shared with other runs.
pub struct StrategyRun {
    id: Uuid,
    strategy: Box<dyn Strategy>,
    executor: OrderExecutor,
    protection: ProtectionManager,
    portfolio: SimulatedPortfolio,
    phase: RunPhase,
    bars: usize,
    runtime_errors: usize,
    last_time: Option<DateTime<Utc>>,
}

impl StrategyRun {
    pub fn new(
        strategy: Box<dyn Strategy>,
        executor: OrderExecutor,
        protection: ProtectionManager,
        portfolio: SimulatedPortfolio,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            strategy,
            executor,
            protection,
            portfolio,
            phase: RunPhase::Created,
            bars: 0,
            runtime_errors: 0,
            last_time: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn position(&self) -> &Position {
        self.executor.position()
    }

    pub fn executor(&self) -> &OrderExecutor {
        &self.executor
    }

    pub fn protection(&self) -> &ProtectionManager {
        &self.protection
    }

    pub fn bars_processed(&self) -> usize {
        self.bars
    }

    pub fn runtime_errors(&self) -> usize {
        self.runtime_errors
    }

    pub fn strategy_finished(&self) -> bool {
        self.strategy.is_finished()
    }

    fn transition(&mut self, to: RunPhase) {
        if self.phase.can_transition(to) {
            debug!(run_id = %self.id, from = %self.phase, %to, "Run phase");
            self.phase = to;
        }
    }

    pub fn start(&mut self) {
        if self.phase != RunPhase::Created {
            return;
        }
        let strategy = &mut self.strategy;
        let outcome = catch_unwind(AssertUnwindSafe(|| strategy.on_start()));
        self.contain("on_start", outcome.map(|r| r.map(|_| ())));
        info!(run_id = %self.id, strategy = %self.strategy.name(), "Run started");
        self.transition(RunPhase::Started);
    }

    /// One step of the replay. Runs to completion before the next candle.
    pub fn on_candle(&mut self, candle: &Candle) {
        if !matches!(self.phase, RunPhase::Started | RunPhase::Running) {
            return;
        }

        if !candle.is_finished() {
            // Previews only; an intent from a live bar is never acted on.
            if let Some(intent) = self.invoke_strategy(candle) {
                warn!(?intent, at = %candle.open_time, "Intent from unfinished candle dropped");
            }
            return;
        }

        if let Some(last) = self.last_time {
            if candle.open_time <= last {
                self.runtime_errors += 1;
                error!(
                    run_id = %self.id,
                    at = %candle.open_time,
                    last = %last,
                    "Out-of-order candle skipped"
                );
                return;
            }
        }
        self.last_time = Some(candle.open_time);
        self.bars += 1;
        self.transition(RunPhase::Running);

        // Resting orders may execute inside this bar.
        self.executor.on_candle(candle);
        self.settle();

        let position = self.executor.position().clone();
        let actions = self.protection.evaluate(candle, &position);
        if !actions.is_empty() {
            self.apply(actions);
            self.settle();
        }

        if let Some(intent) = self.invoke_strategy(candle) {
            self.submit(&intent);
            self.settle();
        }

        let unrealized = self.executor.position().unrealized_pnl(candle.close);
        self.portfolio.mark(unrealized);
    }

    pub fn stop(&mut self) {
        if self.phase == RunPhase::Stopped {
            return;
        }
        let strategy = &mut self.strategy;
        let outcome = catch_unwind(AssertUnwindSafe(|| strategy.on_stop()));
        self.contain("on_stop", outcome.map(Ok));
        self.transition(RunPhase::Stopped);
        info!(
            run_id = %self.id,
            bars = self.bars,
            realized = self.executor.realized_pnl(),
            position = self.executor.position().volume,
            "Run stopped"
        );
    }

    pub fn report(&self, end_reason: EndReason) -> BacktestReport {
        BacktestReport {
            run_id: self.id.to_string(),
            strategy: self.strategy.name().to_string(),
            security: self.executor.security().id.clone(),
            end_reason,
            bars_processed: self.bars,
            orders_submitted: self.executor.submitted_count(),
            orders_rejected: self.executor.rejected_count(),
            runtime_errors: self.runtime_errors,
            realized_pnl: self.executor.realized_pnl(),
            unrealized_pnl: self.portfolio.unrealized_pnl(),
            final_equity: self.portfolio.equity(),
            max_drawdown_pct: self.portfolio.max_drawdown_pct(),
            final_position: self.executor.position().clone(),
            orders: self.executor.order_log(),
        }
    }

    /// Call the strategy with errors and panics contained at the boundary.
    fn invoke_strategy(&mut self, candle: &Candle) -> Option<OrderIntent> {
        let position = self.executor.position().clone();
        let strategy = &mut self.strategy;
        let outcome = catch_unwind(AssertUnwindSafe(|| strategy.on_candle(candle, &position)));
        self.contain("on_candle", outcome).flatten()
    }

    fn contain<T>(
        &mut self,
        callback: &str,
        outcome: std::thread::Result<Result<T, StrategyError>>,
    ) -> Option<T> {
        let err = match outcome {
            Ok(Ok(value)) => return Some(value),
            Ok(Err(e)) => Error::StrategyRuntime(e.to_string()),
            Err(panic) => {
                let msg = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "panic with non-string payload".into());
                Error::StrategyRuntime(format!("panicked: {msg}"))
            }
        };
        self.runtime_errors += 1;
        error!(
            run_id = %self.id,
            strategy = %self.strategy.name(),
            callback,
            error = %err,
            "Strategy callback failed; continuing"
        );
        None
    }

    fn submit(&mut self, intent: &OrderIntent) {
        match self.executor.submit(intent) {
            Ok(_) => {}
            Err(Error::OrderRejected { .. }) => {}
            Err(e) => {
                self.runtime_errors += 1;
                error!(run_id = %self.id, ?intent, error = %e, "Intent could not be submitted");
            }
        }
    }

    /// Apply fills, then bring protection in line with the position. Repeats
    /// while protection itself produced fills (a flatten after a refused stop).
    fn settle(&mut self) {
        for _ in 0..SETTLE_PASSES {
            self.settle_once();
            if !self.executor.has_unsynced_events() {
                return;
            }
        }
        warn!(run_id = %self.id, "Fills still unsettled; deferring to the next bar");
    }

    fn settle_once(&mut self) {
        for execution in self.executor.sync() {
            self.portfolio.record_realized(execution.realized);
            if execution.role == OrderRole::Protective {
                self.protection.on_protective_fill(execution.fill.order_id);
            }
        }

        let position = self.executor.position().clone();
        let actions = self.protection.reconcile(&position);
        self.apply(actions);

        // Flat means nothing protective may remain working.
        if position.is_flat() {
            for order_id in self.executor.working_orders(OrderRole::Protective) {
                warn!(order_id, "Orphaned protective order cancelled");
                if let Err(e) = self.executor.cancel(order_id) {
                    warn!(order_id, error = %e, "Failed to cancel orphaned protective order");
                }
            }
        }
    }

    fn apply(&mut self, actions: Vec<ProtectionAction>) {
        for action in actions {
            match action {
                ProtectionAction::PlaceStop { side, price } => {
                    let volume = self.executor.position().volume.abs();
                    match self.executor.place_stop(
                        side.exit_order_side(),
                        volume,
                        price,
                        OrderRole::Protective,
                    ) {
                        Ok(order) => self.protection.bind_stop_order(order.id),
                        Err(Error::OrderRejected {
                            reason: RejectionReason::InvalidPrice,
                            ..
                        }) => {
                            warn!(%side, price, "Protective stop beyond the market; flattening");
                            let followup = self.protection.on_stop_refused();
                            self.apply(followup);
                        }
                        Err(e) => warn!(%side, price, error = %e, "Protective stop not placed"),
                    }
                }
                ProtectionAction::MoveStop { order_id, price } => {
                    let side = self.executor.position().side();
                    if let Err(e) = self.executor.cancel_and_replace(order_id, price, side) {
                        warn!(order_id, price, error = %e, "Protective stop not moved");
                    }
                }
                ProtectionAction::CancelStop { order_id } => {
                    self.protection.unbind_stop_order(order_id);
                    if let Err(e) = self.executor.cancel(order_id) {
                        debug!(order_id, error = %e, "Protective stop already gone");
                    }
                }
                ProtectionAction::Flatten { reason } => {
                    info!(%reason, position = self.executor.position().volume, "Protection flattening");
                    self.submit(&OrderIntent::Exit);
                }
            }
        }
    }
}
