use chrono::{TimeZone, Utc};
use proptest::prelude::*;

use common::{Candle, OrderIntent, Position, Security, Side};
use engine::{netted_volume, OrderExecutor};
use paper::SimulatedBroker;

fn side() -> impl Strategy<Value = Side> {
    prop_oneof![Just(Side::Long), Just(Side::Short)]
}

proptest! {
    /// Opposite exposure is added to the request; anything else passes through.
    #[test]
    fn netted_volume_formula(
        side in side(),
        requested in 0.001f64..1_000.0,
        held in -1_000.0f64..1_000.0,
    ) {
        let position = Position { volume: held, avg_price: 100.0, opened_at: None };
        let netted = netted_volume(side, requested, &position);
        match position.side() {
            Some(s) if s != side => prop_assert_eq!(netted, requested + held.abs()),
            _ => prop_assert_eq!(netted, requested),
        }
    }

    /// After any sequence of entries the position holds exactly the last
    /// requested volume on the last requested side.
    #[test]
    fn entries_land_on_requested_exposure(
        entries in prop::collection::vec((side(), 1u32..20), 1..30),
    ) {
        let security = Security {
            id: "TEST".into(),
            price_step: 0.01,
            volume_step: 1.0,
            currency: "USD".into(),
        };
        let broker = SimulatedBroker::new(security.clone(), 0.0).unwrap();
        let mut ex = OrderExecutor::new(Box::new(broker), security);
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        ex.on_candle(&Candle::finished(t, 100.0, 101.0, 99.0, 100.0, 1.0));

        for (side, volume) in entries {
            if ex.position().side() == Some(side) {
                // Same-side entries are suppressed upstream.
                continue;
            }
            ex.submit(&OrderIntent::Enter { side, volume: volume as f64 }).unwrap();
            ex.sync();
            prop_assert_eq!(ex.position().volume, side.sign() * volume as f64);
        }
    }
}
