use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;

use common::{Candle, Position, Side};
use risk::{ProtectionAction, ProtectionConfig, ProtectionManager, ProtectionState};

fn position(side: Side, entry: f64) -> Position {
    Position {
        volume: side.sign(),
        avg_price: entry,
        opened_at: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
    }
}

proptest! {
    /// While armed, the stop level only tightens: up for longs, down for shorts.
    #[test]
    fn trailing_stop_is_monotonic(
        long in any::<bool>(),
        trail in 0.5f64..20.0,
        stop_loss in 0.5f64..20.0,
        moves in prop::collection::vec((-5.0f64..5.0, 0.0f64..3.0), 1..60),
    ) {
        let side = if long { Side::Long } else { Side::Short };
        let entry = 1_000.0;
        let pos = position(side, entry);
        let mut pm = ProtectionManager::new(ProtectionConfig {
            stop_loss: Some(stop_loss),
            trailing_stop: Some(trail),
            breakeven_trigger: Some(2.0),
            ..Default::default()
        });
        pm.arm(&pos);
        pm.bind_stop_order(1);

        let start = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let mut close = entry;
        let mut level = pm.stop_level().unwrap();
        for (i, (step, spread)) in moves.into_iter().enumerate() {
            close += step;
            let bar = Candle::finished(
                start + Duration::days(i as i64),
                close,
                close + spread,
                close - spread,
                close,
                1.0,
            );
            let actions = pm.evaluate(&bar, &pos);
            if pm.state() != ProtectionState::Armed {
                break;
            }
            let next = pm.stop_level().unwrap();
            match side {
                Side::Long => prop_assert!(next >= level),
                Side::Short => prop_assert!(next <= level),
            }
            for action in actions {
                if let ProtectionAction::MoveStop { price, .. } = action {
                    prop_assert_eq!(price, next);
                }
            }
            level = next;
        }
    }

    /// Arming never leaves more than one protective order outstanding.
    #[test]
    fn rearming_always_cancels_before_placing(flips in 1usize..10) {
        let mut pm = ProtectionManager::new(ProtectionConfig {
            stop_loss: Some(1.0),
            ..Default::default()
        });
        let mut side = Side::Long;
        for id in 0..flips as u64 {
            let actions = pm.arm(&position(side, 100.0));
            let places = actions
                .iter()
                .filter(|a| matches!(a, ProtectionAction::PlaceStop { .. }))
                .count();
            prop_assert_eq!(places, 1);
            if id > 0 {
                prop_assert_eq!(actions[0], ProtectionAction::CancelStop { order_id: id - 1 });
            }
            pm.bind_stop_order(id);
            side = side.opposite();
        }
    }
}
