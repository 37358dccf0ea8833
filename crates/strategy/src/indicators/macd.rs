use common::Candle;

use super::{Ema, Indicator, IndicatorValue, Reading};

/// MACD (Moving Average Convergence/Divergence) indicator.
///
/// MACD line = EMA(fast) − EMA(slow); signal = EMA(line, signal_period).
/// The line only starts feeding the signal EMA once the slow EMA is formed,
/// so the reading is formed after `slow + signal - 1` bars.
#[derive(Debug, Clone)]
pub struct Macd {
    name: String,
    fast: Ema,
    slow: Ema,
    signal: Ema,
    signal_period: usize,
    line_samples: usize,
}

impl Macd {
    pub fn new(fast: usize, slow: usize, signal: usize) -> Self {
        assert!(fast < slow, "MACD fast period must be less than slow period");
        assert!(signal >= 1, "MACD signal period must be >= 1");
        Self {
            name: format!("MACD({fast},{slow},{signal})"),
            fast: Ema::new(fast),
            slow: Ema::new(slow),
            signal: Ema::new(signal),
            signal_period: signal,
            line_samples: 0,
        }
    }

    fn slow_formed(&self) -> bool {
        Indicator::is_formed(&self.slow)
    }
}

impl Indicator for Macd {
    fn name(&self) -> &str {
        &self.name
    }

    fn feed(&mut self, candle: &Candle) -> Reading {
        let fast = self.fast.update(candle.close);
        let slow = self.slow.update(candle.close);

        if !self.slow_formed() {
            return Reading {
                value: IndicatorValue::Macd {
                    line: 0.0,
                    signal: 0.0,
                    histogram: 0.0,
                },
                is_formed: false,
            };
        }

        let line = fast - slow;
        let signal = self.signal.update(line);
        self.line_samples += 1;

        Reading {
            value: IndicatorValue::Macd {
                line,
                signal,
                histogram: line - signal,
            },
            is_formed: self.is_formed(),
        }
    }

    fn is_formed(&self) -> bool {
        self.line_samples >= self.signal_period
    }

    fn reset(&mut self) {
        self.fast.reset();
        self.slow.reset();
        self.signal.reset();
        self.line_samples = 0;
    }

    fn clone_box(&self) -> Box<dyn Indicator> {
        Box::new(self.clone())
    }
}
