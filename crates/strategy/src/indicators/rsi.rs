use common::Candle;

use super::{Indicator, Reading};

/// RSI (Relative Strength Index) indicator.
///
/// Uses Wilder's smoothed moving average (same as TradingView / standard RSI).
/// Formed once `period + 1` closes have been seen.
#[derive(Debug, Clone)]
pub struct Rsi {
    name: String,
    period: usize,
    prev_close: Option<f64>,
    changes: usize,
    avg_gain: f64,
    avg_loss: f64,
}

impl Rsi {
    pub fn new(period: usize) -> Self {
        assert!(period >= 2, "RSI period must be >= 2");
        Self {
            name: format!("RSI({period})"),
            period,
            prev_close: None,
            changes: 0,
            avg_gain: 0.0,
            avg_loss: 0.0,
        }
    }

    fn value(&self) -> f64 {
        if !self.is_formed() {
            return 0.0;
        }
        if self.avg_loss == 0.0 {
            return 100.0;
        }
        let rs = self.avg_gain / self.avg_loss;
        100.0 - 100.0 / (1.0 + rs)
    }
}

impl Indicator for Rsi {
    fn name(&self) -> &str {
        &self.name
    }

    fn feed(&mut self, candle: &Candle) -> Reading {
        let close = candle.close;
        if let Some(prev) = self.prev_close {
            let change = close - prev;
            let gain = change.max(0.0);
            let loss = (-change).max(0.0);
            self.changes += 1;
            let n = self.period as f64;

            if self.changes <= self.period {
                // First averages are plain means over the initial `period` changes
                self.avg_gain += gain / n;
                self.avg_loss += loss / n;
            } else {
                self.avg_gain = (self.avg_gain * (n - 1.0) + gain) / n;
                self.avg_loss = (self.avg_loss * (n - 1.0) + loss) / n;
            }
        }
        self.prev_close = Some(close);
        Reading::simple(self.value(), self.is_formed())
    }

    fn is_formed(&self) -> bool {
        self.changes >= self.period
    }

    fn reset(&mut self) {
        self.prev_close = None;
        self.changes = 0;
        self.avg_gain = 0.0;
        self.avg_loss = 0.0;
    }

    fn clone_box(&self) -> Box<dyn Indicator> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::test_support::closes;

    fn last_reading(rsi: &mut Rsi, prices: &[f64]) -> Reading {
        closes(prices)
            .iter()
            .map(|c| rsi.feed(c))
            .last()
            .expect("at least one price")
    }

    #[test]
    fn rsi_not_formed_when_insufficient_data() {
        let mut rsi = Rsi::new(14);
        // Need at least period+1 = 15 values
        let r = last_reading(&mut rsi, &[100.0; 14]);
        assert!(!r.is_formed);
    }

    #[test]
    fn rsi_formed_with_sufficient_data() {
        let mut rsi = Rsi::new(14);
        let prices: Vec<f64> = (0..15).map(|i| 100.0 + i as f64).collect();
        assert!(last_reading(&mut rsi, &prices).is_formed);
    }

    #[test]
    fn rsi_all_gains_returns_100() {
        let mut rsi = Rsi::new(3);
        let r = last_reading(&mut rsi, &[10.0, 11.0, 12.0, 13.0, 14.0]);
        let v = r.value.primary();
        assert!((v - 100.0).abs() < 1e-6, "Expected ~100, got {v}");
    }

    #[test]
    fn rsi_all_losses_returns_0() {
        let mut rsi = Rsi::new(3);
        let r = last_reading(&mut rsi, &[14.0, 13.0, 12.0, 11.0, 10.0]);
        let v = r.value.primary();
        assert!(v.abs() < 1e-6, "Expected ~0, got {v}");
    }

    #[test]
    fn rsi_known_series_in_range() {
        let mut rsi = Rsi::new(14);
        let prices = [
            44.34, 44.09, 44.15, 43.61, 44.33, 44.83, 45.10, 45.15, 43.61, 44.33, 44.83, 45.10,
            45.15, 44.34, 44.09,
        ];
        let r = last_reading(&mut rsi, &prices);
        assert!(r.is_formed);
        let v = r.value.primary();
        assert!((0.0..=100.0).contains(&v), "RSI out of range: {v}");
    }

    #[test]
    fn rsi_wilder_smoothing_matches_hand_computation() {
        // period 2: changes +2, -1 → avg_gain 1.0, avg_loss 0.5
        // next change +1 → avg_gain (1.0 + 1) / 2 = 1.0, avg_loss 0.25
        let mut rsi = Rsi::new(2);
        let r = last_reading(&mut rsi, &[10.0, 12.0, 11.0, 12.0]);
        let expected = 100.0 - 100.0 / (1.0 + 1.0 / 0.25);
        assert!((r.value.primary() - expected).abs() < 1e-9);
    }
}
