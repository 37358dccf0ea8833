use common::Candle;
use tracing::trace;

use super::{Indicator, Reading};

/// Indicators bound to one candle stream, evaluated in binding order.
#[derive(Clone, Default)]
pub struct IndicatorPipeline {
    indicators: Vec<Box<dyn Indicator>>,
}

impl IndicatorPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an indicator; its readings appear at the returned index.
    pub fn bind(&mut self, indicator: Box<dyn Indicator>) -> usize {
        self.indicators.push(indicator);
        self.indicators.len() - 1
    }

    pub fn with(mut self, indicator: impl Indicator + 'static) -> Self {
        self.bind(Box::new(indicator));
        self
    }

    pub fn len(&self) -> usize {
        self.indicators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indicators.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.indicators.iter().map(|i| i.name()).collect()
    }

    /// Advance every indicator with a finished candle.
    ///
    /// An active candle only produces a preview: state is left untouched so
    /// the bar is counted once, when it finishes.
    pub fn feed(&mut self, candle: &Candle) -> Vec<Reading> {
        if !candle.is_finished() {
            return self.preview(candle);
        }
        self.indicators.iter_mut().map(|i| i.feed(candle)).collect()
    }

    /// Readings as if `candle` were the next bar, without consuming it.
    pub fn preview(&self, candle: &Candle) -> Vec<Reading> {
        let readings: Vec<Reading> = self
            .indicators
            .iter()
            .map(|i| i.clone_box().feed(candle))
            .collect();
        trace!(at = %candle.open_time, ?readings, "Indicator preview");
        readings
    }

    pub fn is_formed(&self) -> bool {
        self.indicators.iter().all(|i| i.is_formed())
    }

    pub fn reset(&mut self) {
        for indicator in &mut self.indicators {
            indicator.reset();
        }
    }
}

impl std::fmt::Debug for IndicatorPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndicatorPipeline")
            .field("indicators", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::test_support::closes;
    use crate::indicators::{Rsi, Sma};
    use common::CandleState;

    #[test]
    fn readings_follow_binding_order() {
        let mut pipeline = IndicatorPipeline::new().with(Sma::new(2)).with(Rsi::new(2));
        assert_eq!(pipeline.names(), vec!["SMA(2)", "RSI(2)"]);

        let mut last = Vec::new();
        for bar in closes(&[1.0, 2.0, 3.0]) {
            last = pipeline.feed(&bar);
        }
        assert_eq!(last.len(), 2);
        assert_eq!(last[0].value.primary(), 2.5);
        assert_eq!(last[1].value.primary(), 100.0);
        assert!(pipeline.is_formed());
    }

    #[test]
    fn active_candle_does_not_advance_state() {
        let mut pipeline = IndicatorPipeline::new().with(Sma::new(3));
        let bars = closes(&[1.0, 2.0]);
        for bar in &bars {
            pipeline.feed(bar);
        }

        let mut live = bars[1].clone();
        live.close = 6.0;
        live.state = CandleState::Active;
        let preview = pipeline.feed(&live);
        assert!(preview[0].is_formed);
        assert_eq!(preview[0].value.primary(), 3.0);

        // Still two bars of history.
        assert!(!pipeline.is_formed());
    }

    #[test]
    fn empty_pipeline_is_formed() {
        let mut pipeline = IndicatorPipeline::new();
        assert!(pipeline.is_formed());
        assert!(pipeline.feed(&closes(&[1.0])[0]).is_empty());
    }
}
