use tracing::{debug, info};

use common::{Candle, OrderIntent, Position};

use crate::indicators::{IndicatorPipeline, IndicatorValue, Reading};
use crate::signal::{Conditions, SignalEngine, SignalRule};
use crate::{Strategy, StrategyError};

/// A strategy assembled from an indicator pipeline and a signal rule.
pub struct IndicatorStrategy {
    name: String,
    pipeline: IndicatorPipeline,
    engine: SignalEngine,
    /// Self-stop after this many finished bars.
    stop_after_bars: Option<usize>,
    bars_seen: usize,
}

impl IndicatorStrategy {
    pub fn new(
        name: impl Into<String>,
        pipeline: IndicatorPipeline,
        engine: SignalEngine,
        stop_after_bars: Option<usize>,
    ) -> Self {
        Self {
            name: name.into(),
            pipeline,
            engine,
            stop_after_bars,
            bars_seen: 0,
        }
    }

    pub fn bars_seen(&self) -> usize {
        self.bars_seen
    }
}

impl Strategy for IndicatorStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_start(&mut self) -> Result<(), StrategyError> {
        self.pipeline.reset();
        self.bars_seen = 0;
        info!(
            strategy = %self.name,
            indicators = ?self.pipeline.names(),
            conflict = ?self.engine.conflict_policy(),
            "Strategy started"
        );
        Ok(())
    }

    fn on_candle(
        &mut self,
        candle: &Candle,
        position: &Position,
    ) -> Result<Option<OrderIntent>, StrategyError> {
        if !candle.is_finished() {
            return Ok(None);
        }
        let prices = [candle.open, candle.high, candle.low, candle.close];
        if prices.iter().any(|p| !p.is_finite()) || candle.high < candle.low {
            return Err(StrategyError::InvalidCandle(format!(
                "malformed bar at {}: o={} h={} l={} c={}",
                candle.open_time, candle.open, candle.high, candle.low, candle.close
            )));
        }

        let readings = self.pipeline.feed(candle);
        self.bars_seen += 1;

        let intent = self.engine.evaluate(candle, &readings, position);
        if let Some(intent) = &intent {
            debug!(strategy = %self.name, at = %candle.open_time, ?intent, "Signal");
        }
        Ok(intent)
    }

    fn on_stop(&mut self) {
        info!(strategy = %self.name, bars = self.bars_seen, "Strategy stopped");
    }

    fn is_finished(&self) -> bool {
        self.stop_after_bars
            .is_some_and(|limit| self.bars_seen >= limit)
    }
}

fn primary(readings: &[Reading], idx: usize) -> Option<f64> {
    readings.get(idx).map(|r| r.value.primary())
}

// ─── Concrete rules ───────────────────────────────────────────────────────────

/// Close above the moving average → long, below → short.
#[derive(Debug, Clone, Default)]
pub struct CloseVsAverageRule;

impl SignalRule for CloseVsAverageRule {
    fn conditions(&mut self, candle: &Candle, readings: &[Reading], _: &Position) -> Conditions {
        let Some(avg) = primary(readings, 0) else {
            return Conditions::none();
        };
        if candle.close > avg {
            Conditions::long()
        } else if candle.close < avg {
            Conditions::short()
        } else {
            Conditions::none()
        }
    }
}

/// Oversold → long, overbought → short.
#[derive(Debug, Clone)]
pub struct RsiThresholdRule {
    pub overbought: f64,
    pub oversold: f64,
}

impl SignalRule for RsiThresholdRule {
    fn conditions(&mut self, _: &Candle, readings: &[Reading], _: &Position) -> Conditions {
        let Some(rsi) = primary(readings, 0) else {
            return Conditions::none();
        };
        if rsi <= self.oversold {
            Conditions::long()
        } else if rsi >= self.overbought {
            Conditions::short()
        } else {
            Conditions::none()
        }
    }
}

/// The result of comparing MACD against its signal line on consecutive bars.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacdSignal {
    Bullish, // MACD crossed above signal line
    Bearish, // MACD crossed below signal line
    Neutral, // No crossover on the latest bar
}

impl MacdSignal {
    /// Classify from the previous and current histogram (line − signal).
    pub fn from_histograms(prev: f64, curr: f64) -> Self {
        if prev <= 0.0 && curr > 0.0 {
            MacdSignal::Bullish
        } else if prev >= 0.0 && curr < 0.0 {
            MacdSignal::Bearish
        } else {
            MacdSignal::Neutral
        }
    }
}

/// Trades MACD/signal crossovers.
#[derive(Debug, Clone, Default)]
pub struct MacdCrossRule {
    prev_histogram: Option<f64>,
}

impl SignalRule for MacdCrossRule {
    fn conditions(&mut self, _: &Candle, readings: &[Reading], _: &Position) -> Conditions {
        let Some(IndicatorValue::Macd { histogram, .. }) = readings.first().map(|r| r.value)
        else {
            return Conditions::none();
        };
        let prev = self.prev_histogram.replace(histogram);
        match prev.map(|p| MacdSignal::from_histograms(p, histogram)) {
            Some(MacdSignal::Bullish) => Conditions::long(),
            Some(MacdSignal::Bearish) => Conditions::short(),
            _ => Conditions::none(),
        }
    }
}

/// Internal bar strength: where the close sits inside the bar's range.
/// A weak close → long, a strong close → short.
#[derive(Debug, Clone)]
pub struct InternalBarStrengthRule {
    pub lower: f64,
    pub upper: f64,
}

impl InternalBarStrengthRule {
    /// `(close - low) / (high - low)`; callers guarantee a non-zero range.
    pub fn ibs(candle: &Candle) -> f64 {
        (candle.close - candle.low) / candle.range()
    }
}

impl SignalRule for InternalBarStrengthRule {
    fn conditions(&mut self, candle: &Candle, _: &[Reading], _: &Position) -> Conditions {
        let ibs = Self::ibs(candle);
        if ibs < self.lower {
            Conditions::long()
        } else if ibs > self.upper {
            Conditions::short()
        } else {
            Conditions::none()
        }
    }

    fn uses_range(&self) -> bool {
        true
    }
}
