use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;

use common::Candle;
use strategy::indicators::{IndicatorPipeline, Macd, Rsi, Sma};

fn bars(closes: &[f64]) -> Vec<Candle> {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    closes
        .iter()
        .enumerate()
        .map(|(i, &c)| {
            Candle::finished(start + Duration::days(i as i64), c, c + 1.0, c - 1.0, c, 10.0)
        })
        .collect()
}

fn pipeline() -> IndicatorPipeline {
    IndicatorPipeline::new()
        .with(Sma::new(5))
        .with(Rsi::new(4))
        .with(Macd::new(3, 6, 2))
}

proptest! {
    /// A reading at bar k depends only on bars 0..=k: appending future bars
    /// never changes what was already produced.
    #[test]
    fn readings_never_look_ahead(
        closes in prop::collection::vec(1.0f64..1_000.0, 2..80),
        split in 1usize..80,
    ) {
        let split = split.min(closes.len());
        let candles = bars(&closes);

        let mut full = pipeline();
        let full_readings: Vec<_> = candles.iter().map(|c| full.feed(c)).collect();

        let mut prefix = pipeline();
        let prefix_readings: Vec<_> = candles[..split].iter().map(|c| prefix.feed(c)).collect();

        prop_assert_eq!(&full_readings[..split], &prefix_readings[..]);
    }

    /// Once formed, an indicator stays formed until reset.
    #[test]
    fn formation_is_monotonic(closes in prop::collection::vec(1.0f64..1_000.0, 1..60)) {
        let mut p = pipeline();
        let mut was_formed = false;
        for candle in bars(&closes) {
            p.feed(&candle);
            let formed = p.is_formed();
            prop_assert!(formed || !was_formed);
            was_formed = formed;
        }
    }

    /// Finite inputs never produce non-finite readings.
    #[test]
    fn readings_stay_finite(closes in prop::collection::vec(0.01f64..1_000_000.0, 1..60)) {
        let mut p = pipeline();
        for candle in bars(&closes) {
            for reading in p.feed(&candle) {
                prop_assert!(reading.value.primary().is_finite());
            }
        }
    }
}
