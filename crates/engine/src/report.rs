use std::fmt;

use serde::Serialize;

use common::{Order, OrderState, Position};

use crate::lifecycle::EndReason;

/// Summary of a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct BacktestReport {
    pub run_id: String,
    pub strategy: String,
    pub security: String,
    pub end_reason: EndReason,
    pub bars_processed: usize,
    pub orders_submitted: usize,
    pub orders_rejected: usize,
    pub runtime_errors: usize,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub final_equity: f64,
    /// Fraction of peak equity, e.g. 0.12 = 12%.
    pub max_drawdown_pct: f64,
    pub final_position: Position,
    /// Every order in submission order with its final state.
    pub orders: Vec<Order>,
}

impl BacktestReport {
    pub fn filled_orders(&self) -> usize {
        self.orders
            .iter()
            .filter(|o| o.state == OrderState::Done)
            .count()
    }
}

impl fmt::Display for BacktestReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Backtest {} ({} on {})", self.run_id, self.strategy, self.security)?;
        writeln!(f, "  ended:            {}", self.end_reason)?;
        writeln!(f, "  bars processed:   {}", self.bars_processed)?;
        writeln!(
            f,
            "  orders:           {} submitted, {} filled, {} rejected",
            self.orders_submitted,
            self.filled_orders(),
            self.orders_rejected
        )?;
        writeln!(f, "  runtime errors:   {}", self.runtime_errors)?;
        writeln!(f, "  realized PnL:     {:.2}", self.realized_pnl)?;
        writeln!(f, "  unrealized PnL:   {:.2}", self.unrealized_pnl)?;
        writeln!(f, "  final equity:     {:.2}", self.final_equity)?;
        writeln!(f, "  max drawdown:     {:.2}%", self.max_drawdown_pct * 100.0)?;
        match self.final_position.side() {
            Some(side) => write!(
                f,
                "  final position:   {} {} @ {:.2}",
                side,
                self.final_position.volume.abs(),
                self.final_position.avg_price
            ),
            None => write!(f, "  final position:   flat"),
        }
    }
}
