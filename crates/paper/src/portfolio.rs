use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use common::{Error, Result};

/// Simulated account: capital plus realized and unrealized PnL, with a
/// running peak so drawdown can be reported at the end of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatedPortfolio {
    initial_capital: f64,
    realized_pnl: f64,
    unrealized_pnl: f64,
    peak_equity: f64,
    max_drawdown_pct: f64,
}

impl SimulatedPortfolio {
    pub fn new(initial_capital: f64) -> Result<Self> {
        if !(initial_capital > 0.0) || !initial_capital.is_finite() {
            return Err(Error::Connection(format!(
                "portfolio needs positive starting capital, got {initial_capital}"
            )));
        }
        info!(capital = initial_capital, "SimulatedPortfolio initialized");
        Ok(Self {
            initial_capital,
            realized_pnl: 0.0,
            unrealized_pnl: 0.0,
            peak_equity: initial_capital,
            max_drawdown_pct: 0.0,
        })
    }

    pub fn initial_capital(&self) -> f64 {
        self.initial_capital
    }

    pub fn realized_pnl(&self) -> f64 {
        self.realized_pnl
    }

    pub fn unrealized_pnl(&self) -> f64 {
        self.unrealized_pnl
    }

    pub fn equity(&self) -> f64 {
        self.initial_capital + self.realized_pnl + self.unrealized_pnl
    }

    /// Largest peak-to-trough equity decline seen so far, as a fraction.
    pub fn max_drawdown_pct(&self) -> f64 {
        self.max_drawdown_pct
    }

    /// Book PnL realized by a fill.
    pub fn record_realized(&mut self, pnl: f64) {
        if pnl == 0.0 {
            return;
        }
        self.realized_pnl += pnl;
        debug!(realized = pnl, total = self.realized_pnl, "Realized PnL booked");
        self.track_drawdown();
    }

    /// Revalue open exposure at the latest close.
    pub fn mark(&mut self, unrealized: f64) {
        self.unrealized_pnl = unrealized;
        self.track_drawdown();
    }

    fn track_drawdown(&mut self) {
        let equity = self.equity();
        if equity > self.peak_equity {
            self.peak_equity = equity;
        }
        if self.peak_equity > 0.0 {
            let drawdown = (self.peak_equity - equity) / self.peak_equity;
            if drawdown > self.max_drawdown_pct {
                self.max_drawdown_pct = drawdown;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_positive_capital() {
        assert!(matches!(
            SimulatedPortfolio::new(0.0),
            Err(Error::Connection(_))
        ));
        assert!(SimulatedPortfolio::new(f64::NAN).is_err());
    }

    #[test]
    fn equity_tracks_realized_and_marked() {
        let mut pf = SimulatedPortfolio::new(1_000.0).unwrap();
        pf.record_realized(50.0);
        pf.mark(-20.0);
        assert_eq!(pf.realized_pnl(), 50.0);
        assert_eq!(pf.equity(), 1_030.0);
    }

    #[test]
    fn drawdown_measured_from_peak() {
        let mut pf = SimulatedPortfolio::new(1_000.0).unwrap();
        pf.mark(100.0); // peak 1100
        pf.mark(-110.0); // equity 890
        let expected = (1_100.0 - 890.0) / 1_100.0;
        assert!((pf.max_drawdown_pct() - expected).abs() < 1e-12);

        pf.mark(0.0);
        assert!((pf.max_drawdown_pct() - expected).abs() < 1e-12);
    }
}
