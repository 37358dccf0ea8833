use std::collections::VecDeque;

use common::Candle;

use super::{Indicator, Reading};

/// Simple moving average of closes. Formed after `period` bars.
#[derive(Debug, Clone)]
pub struct Sma {
    name: String,
    period: usize,
    window: VecDeque<f64>,
}

impl Sma {
    pub fn new(period: usize) -> Self {
        assert!(period >= 1, "SMA period must be >= 1");
        Self {
            name: format!("SMA({period})"),
            period,
            window: VecDeque::new(),
        }
    }

    pub fn period(&self) -> usize {
        self.period
    }

    fn average(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        self.window.iter().sum::<f64>() / self.window.len() as f64
    }
}

impl Indicator for Sma {
    fn name(&self) -> &str {
        &self.name
    }

    fn feed(&mut self, candle: &Candle) -> Reading {
        self.window.push_back(candle.close);
        if self.window.len() > self.period {
            self.window.pop_front();
        }
        Reading::simple(self.average(), self.is_formed())
    }

    fn is_formed(&self) -> bool {
        self.window.len() >= self.period
    }

    fn reset(&mut self) {
        self.window.clear();
    }

    fn clone_box(&self) -> Box<dyn Indicator> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::test_support::closes;

    #[test]
    fn not_formed_until_period_bars() {
        let mut sma = Sma::new(3);
        let bars = closes(&[1.0, 2.0, 3.0]);
        assert!(!sma.feed(&bars[0]).is_formed);
        assert!(!sma.feed(&bars[1]).is_formed);
        let r = sma.feed(&bars[2]);
        assert!(r.is_formed);
        assert_eq!(r.value.primary(), 2.0);
    }

    #[test]
    fn window_rolls() {
        let mut sma = Sma::new(2);
        let mut last = None;
        for bar in closes(&[10.0, 20.0, 30.0, 40.0]) {
            last = Some(sma.feed(&bar));
        }
        assert_eq!(last.unwrap().value.primary(), 35.0);
    }

    #[test]
    fn reset_clears_history() {
        let mut sma = Sma::new(2);
        for bar in closes(&[1.0, 2.0]) {
            sma.feed(&bar);
        }
        assert!(sma.is_formed());
        sma.reset();
        assert!(!sma.is_formed());
    }
}
