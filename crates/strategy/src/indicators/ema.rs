use common::Candle;

use super::{Indicator, Reading};

/// Exponential moving average, seeded with the SMA of the first `period`
/// values.
#[derive(Debug, Clone)]
pub struct Ema {
    name: String,
    period: usize,
    k: f64,
    seen: usize,
    seed_sum: f64,
    value: f64,
}

impl Ema {
    pub fn new(period: usize) -> Self {
        assert!(period >= 1, "EMA period must be >= 1");
        Self {
            name: format!("EMA({period})"),
            period,
            k: 2.0 / (period as f64 + 1.0),
            seen: 0,
            seed_sum: 0.0,
            value: 0.0,
        }
    }

    /// Advance by one raw value. Used directly when smoothing a derived
    /// series such as the MACD line.
    pub fn update(&mut self, x: f64) -> f64 {
        self.seen += 1;
        if self.seen <= self.period {
            self.seed_sum += x;
            self.value = self.seed_sum / self.seen as f64;
        } else {
            self.value = x * self.k + self.value * (1.0 - self.k);
        }
        self.value
    }

    pub fn value(&self) -> f64 {
        self.value
    }
}

impl Indicator for Ema {
    fn name(&self) -> &str {
        &self.name
    }

    fn feed(&mut self, candle: &Candle) -> Reading {
        let v = self.update(candle.close);
        Reading::simple(v, self.is_formed())
    }

    fn is_formed(&self) -> bool {
        self.seen >= self.period
    }

    fn reset(&mut self) {
        self.seen = 0;
        self.seed_sum = 0.0;
        self.value = 0.0;
    }

    fn clone_box(&self) -> Box<dyn Indicator> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeds_with_simple_average() {
        let mut ema = Ema::new(3);
        ema.update(1.0);
        ema.update(2.0);
        assert_eq!(ema.update(3.0), 2.0);
        // k = 0.5
        assert_eq!(ema.update(6.0), 4.0);
    }

    #[test]
    fn constant_series_stays_constant() {
        let mut ema = Ema::new(5);
        for _ in 0..20 {
            ema.update(42.0);
        }
        assert!((ema.value() - 42.0).abs() < 1e-12);
        assert!(ema.is_formed());
    }
}
