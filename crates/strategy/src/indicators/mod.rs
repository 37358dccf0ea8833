//! Stateful indicators bound to the candle stream.
//!
//! Every indicator is a pure function of the candles it has been fed, in
//! order. None of them see anything past the candle passed to `feed`, and
//! none read another indicator's state.

pub mod ema;
pub mod macd;
pub mod pipeline;
pub mod rsi;
pub mod sma;

pub use ema::Ema;
pub use macd::Macd;
pub use pipeline::IndicatorPipeline;
pub use rsi::Rsi;
pub use sma::Sma;

use common::Candle;

/// Output shape of an indicator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IndicatorValue {
    Simple(f64),
    Macd { line: f64, signal: f64, histogram: f64 },
}

impl IndicatorValue {
    /// The headline number: the value itself, or the MACD line.
    pub fn primary(&self) -> f64 {
        match *self {
            IndicatorValue::Simple(v) => v,
            IndicatorValue::Macd { line, .. } => line,
        }
    }
}

/// One indicator output plus whether enough history backs it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub value: IndicatorValue,
    pub is_formed: bool,
}

impl Reading {
    pub fn simple(value: f64, is_formed: bool) -> Self {
        Self {
            value: IndicatorValue::Simple(value),
            is_formed,
        }
    }
}

pub trait Indicator: Send {
    /// Display name including parameters, e.g. `SMA(20)`.
    fn name(&self) -> &str;

    /// Consume the next finished candle and return the updated reading.
    fn feed(&mut self, candle: &Candle) -> Reading;

    /// True once the minimum history has been consumed.
    fn is_formed(&self) -> bool;

    fn reset(&mut self);

    fn clone_box(&self) -> Box<dyn Indicator>;
}

impl Clone for Box<dyn Indicator> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{Duration, TimeZone, Utc};
    use common::Candle;

    /// Finished daily bars with the given closes and a 1.0 range.
    pub fn closes(values: &[f64]) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                Candle::finished(start + Duration::days(i as i64), c, c + 0.5, c - 0.5, c, 1.0)
            })
            .collect()
    }
}
