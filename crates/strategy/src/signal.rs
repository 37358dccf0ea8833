use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use common::{Candle, OrderIntent, Position, Side};

use crate::indicators::Reading;

/// Raw entry/exit conditions reported by a rule for one bar.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Conditions {
    pub long: bool,
    pub short: bool,
    /// Flatten without reversing.
    pub exit: bool,
}

impl Conditions {
    pub fn long() -> Self {
        Self {
            long: true,
            ..Self::default()
        }
    }

    pub fn short() -> Self {
        Self {
            short: true,
            ..Self::default()
        }
    }

    pub fn exit() -> Self {
        Self {
            exit: true,
            ..Self::default()
        }
    }

    pub fn none() -> Self {
        Self::default()
    }
}

/// What to do when a rule reports long and short on the same bar.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Act on neither.
    #[default]
    Skip,
    PreferLong,
    PreferShort,
}

/// The strategy-specific part of a decision.
pub trait SignalRule: Send {
    /// Called only for finished candles once every reading is formed.
    fn conditions(&mut self, candle: &Candle, readings: &[Reading], position: &Position)
        -> Conditions;

    /// Rules that divide by the bar's range must return true so zero-range
    /// bars never reach them.
    fn uses_range(&self) -> bool {
        false
    }
}

/// Turns a candle, its readings and the current position into at most one
/// order intent.
pub struct SignalEngine {
    rule: Box<dyn SignalRule>,
    conflict: ConflictPolicy,
    volume: f64,
}

impl SignalEngine {
    pub fn new(rule: Box<dyn SignalRule>, conflict: ConflictPolicy, volume: f64) -> Self {
        Self {
            rule,
            conflict,
            volume,
        }
    }

    pub fn conflict_policy(&self) -> ConflictPolicy {
        self.conflict
    }

    pub fn evaluate(
        &mut self,
        candle: &Candle,
        readings: &[Reading],
        position: &Position,
    ) -> Option<OrderIntent> {
        if !candle.is_finished() {
            return None;
        }
        if readings.iter().any(|r| !r.is_formed) {
            trace!(at = %candle.open_time, "Indicators still forming");
            return None;
        }
        if self.rule.uses_range() && candle.is_zero_range() {
            debug!(at = %candle.open_time, "Zero-range bar skipped");
            return None;
        }

        let conditions = self.rule.conditions(candle, readings, position);
        let entry = match (conditions.long, conditions.short) {
            (true, true) => {
                let resolved = match self.conflict {
                    ConflictPolicy::Skip => None,
                    ConflictPolicy::PreferLong => Some(Side::Long),
                    ConflictPolicy::PreferShort => Some(Side::Short),
                };
                debug!(at = %candle.open_time, policy = ?self.conflict, ?resolved, "Conflicting signals");
                resolved
            }
            (true, false) => Some(Side::Long),
            (false, true) => Some(Side::Short),
            (false, false) => None,
        };

        if let Some(side) = entry {
            if position.side() == Some(side) {
                trace!(%side, "Entry suppressed: already positioned");
                return None;
            }
            return Some(OrderIntent::Enter {
                side,
                volume: self.volume,
            });
        }

        if conditions.exit && !position.is_flat() {
            return Some(OrderIntent::Exit);
        }
        None
    }
}
