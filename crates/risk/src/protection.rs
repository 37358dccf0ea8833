use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use common::{Candle, Diagnostic, OrderId, Position, Side};

use crate::ratchet::StopRatchet;

/// Longest accepted holding limit: one hundred years.
pub const MAX_HOLD_MINUTES: i64 = 100 * 365 * 24 * 60;

/// Protective levels for every position a run opens.
///
/// All distances are absolute price units measured from the entry price.
/// Every field is optional; an empty table disables protection.
///
/// Example:
/// ```toml
/// [protection]
/// stop_loss = 2.0
/// take_profit = 5.0
/// trailing_stop = 1.5
/// breakeven_trigger = 1.0
/// max_hold_minutes = 4320
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProtectionConfig {
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub trailing_stop: Option<f64>,
    /// Favourable move after which the stop is pulled to the entry price.
    pub breakeven_trigger: Option<f64>,
    pub max_hold_minutes: Option<i64>,
}

impl ProtectionConfig {
    pub fn is_empty(&self) -> bool {
        self == &ProtectionConfig::default()
    }

    /// Every out-of-range value, located by field.
    pub fn validate(&self) -> Vec<Diagnostic> {
        let mut out = Vec::new();
        let distances = [
            ("stop_loss", self.stop_loss),
            ("take_profit", self.take_profit),
            ("trailing_stop", self.trailing_stop),
            ("breakeven_trigger", self.breakeven_trigger),
        ];
        for (field, value) in distances {
            if let Some(v) = value {
                if !(v.is_finite() && v > 0.0) {
                    out.push(Diagnostic::new(
                        format!("protection.{field}"),
                        format!("must be a positive price distance, got {v}"),
                    ));
                }
            }
        }
        if let Some(minutes) = self.max_hold_minutes {
            if !(1..=MAX_HOLD_MINUTES).contains(&minutes) {
                out.push(Diagnostic::new(
                    "protection.max_hold_minutes",
                    format!("must be between 1 and {MAX_HOLD_MINUTES}, got {minutes}"),
                ));
            }
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProtectionState {
    /// No position under protection.
    None,
    Armed,
    /// A protective exit fired; waiting for the position to go flat.
    Triggered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FlattenReason {
    TakeProfit,
    TimeLimit,
    /// The ratcheted stop ended up beyond the bar's close.
    StopCrossed,
}

impl std::fmt::Display for FlattenReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlattenReason::TakeProfit => write!(f, "take profit"),
            FlattenReason::TimeLimit => write!(f, "time limit"),
            FlattenReason::StopCrossed => write!(f, "stop crossed"),
        }
    }
}

/// What the manager wants done. The run applies these through the executor;
/// the manager itself never touches orders or the position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProtectionAction {
    /// Rest a protective stop for a position on `side`.
    PlaceStop { side: Side, price: f64 },
    MoveStop { order_id: OrderId, price: f64 },
    CancelStop { order_id: OrderId },
    Flatten { reason: FlattenReason },
}

/// Stop-loss, take-profit, trailing, breakeven and time-limit protection for
/// the single position of one run.
#[derive(Debug, Clone)]
pub struct ProtectionManager {
    config: ProtectionConfig,
    state: ProtectionState,
    ratchet: Option<StopRatchet>,
    entry_price: f64,
    entry_time: Option<DateTime<Utc>>,
    take_profit: Option<f64>,
    breakeven_done: bool,
    /// The one armed protective order, once the run has placed it.
    stop_order: Option<OrderId>,
}

impl ProtectionManager {
    pub fn new(config: ProtectionConfig) -> Self {
        Self {
            config,
            state: ProtectionState::None,
            ratchet: None,
            entry_price: 0.0,
            entry_time: None,
            take_profit: None,
            breakeven_done: false,
            stop_order: None,
        }
    }

    pub fn config(&self) -> &ProtectionConfig {
        &self.config
    }

    pub fn state(&self) -> ProtectionState {
        self.state
    }

    pub fn stop_order(&self) -> Option<OrderId> {
        self.stop_order
    }

    pub fn stop_level(&self) -> Option<f64> {
        self.ratchet.and_then(|r| r.level())
    }

    pub fn take_profit_level(&self) -> Option<f64> {
        self.take_profit
    }

    /// Record the id the executor assigned to the last `PlaceStop`.
    pub fn bind_stop_order(&mut self, order_id: OrderId) {
        self.stop_order = Some(order_id);
    }

    /// Forget a stop order the fill layer refused or cancelled.
    pub fn unbind_stop_order(&mut self, order_id: OrderId) {
        if self.stop_order == Some(order_id) {
            self.stop_order = None;
        }
    }

    /// True when the armed protection belongs to a different position than
    /// `position` (new entry, flip, or flat).
    pub fn needs_rearm(&self, position: &Position) -> bool {
        match (self.state, position.side()) {
            (ProtectionState::None, side) => side.is_some() && !self.config.is_empty(),
            (_, None) => true,
            (_, Some(side)) => {
                self.ratchet.map(|r| r.side()) != Some(side)
                    || self.entry_time != position.opened_at
            }
        }
    }

    /// Bring protection in line with `position`: disarm when flat, arm a new
    /// or flipped position. The prior stop is always cancelled first.
    pub fn reconcile(&mut self, position: &Position) -> Vec<ProtectionAction> {
        if !self.needs_rearm(position) {
            return Vec::new();
        }
        if position.is_flat() {
            return self.disarm();
        }
        self.arm(position)
    }

    /// Arm for `position`, superseding any earlier protective order.
    pub fn arm(&mut self, position: &Position) -> Vec<ProtectionAction> {
        let mut actions = self.disarm();
        let Some(side) = position.side() else {
            return actions;
        };
        if self.config.is_empty() {
            return actions;
        }

        let entry = position.avg_price;
        let sign = side.sign();
        let mut ratchet = StopRatchet::new(side);
        for distance in [self.config.stop_loss, self.config.trailing_stop]
            .into_iter()
            .flatten()
        {
            ratchet.apply(entry - sign * distance);
        }

        self.ratchet = Some(ratchet);
        self.entry_price = entry;
        self.entry_time = position.opened_at;
        self.take_profit = self.config.take_profit.map(|d| entry + sign * d);
        self.breakeven_done = false;
        self.state = ProtectionState::Armed;

        info!(
            %side,
            entry = entry,
            stop = ?ratchet.level(),
            take_profit = ?self.take_profit,
            "Protection armed"
        );
        if let Some(price) = ratchet.level() {
            actions.push(ProtectionAction::PlaceStop { side, price });
        }
        actions
    }

    /// Drop all protection, cancelling the armed stop if any.
    pub fn disarm(&mut self) -> Vec<ProtectionAction> {
        let actions = self
            .stop_order
            .take()
            .map(|order_id| ProtectionAction::CancelStop { order_id })
            .into_iter()
            .collect();
        if self.state != ProtectionState::None {
            debug!(state = ?self.state, "Protection disarmed");
        }
        self.reset();
        actions
    }

    /// The protective stop executed at the fill layer.
    pub fn on_protective_fill(&mut self, order_id: OrderId) {
        if self.stop_order == Some(order_id) {
            info!(order_id, stop = ?self.stop_level(), "Protective stop filled");
            self.stop_order = None;
            self.state = ProtectionState::Triggered;
        }
    }

    /// The fill layer refused the protective stop because its level is
    /// already beyond the market. The position is flattened instead.
    pub fn on_stop_refused(&mut self) -> Vec<ProtectionAction> {
        if self.state != ProtectionState::Armed || self.stop_order.is_some() {
            return Vec::new();
        }
        self.trigger(FlattenReason::StopCrossed)
    }

    /// Evaluate one finished candle against the armed position.
    pub fn evaluate(&mut self, candle: &Candle, position: &Position) -> Vec<ProtectionAction> {
        if self.state != ProtectionState::Armed || !candle.is_finished() {
            return Vec::new();
        }
        let Some(mut ratchet) = self.ratchet else {
            return Vec::new();
        };
        let side = ratchet.side();
        if position.side() != Some(side) {
            return Vec::new();
        }

        if let (Some(limit), Some(opened)) = (self.config.max_hold_minutes, self.entry_time) {
            let expired = Duration::try_minutes(limit)
                .is_some_and(|limit| candle.open_time - opened > limit);
            if expired {
                return self.trigger(FlattenReason::TimeLimit);
            }
        }

        if let Some(target) = self.take_profit {
            let reached = match side {
                Side::Long => candle.close >= target,
                Side::Short => candle.close <= target,
            };
            if reached {
                return self.trigger(FlattenReason::TakeProfit);
            }
        }

        let before = ratchet.level();
        if let Some(d) = self.config.trailing_stop {
            let candidate = match side {
                Side::Long => candle.high - d,
                Side::Short => candle.low + d,
            };
            ratchet.apply(candidate);
        }
        if let Some(trigger) = self.config.breakeven_trigger {
            if !self.breakeven_done && side.sign() * (candle.close - self.entry_price) >= trigger {
                self.breakeven_done = true;
                ratchet.apply(self.entry_price);
                debug!(entry = self.entry_price, "Breakeven reached");
            }
        }
        self.ratchet = Some(ratchet);

        let Some(level) = ratchet.level() else {
            return Vec::new();
        };
        if before == Some(level) {
            return Vec::new();
        }

        let crossed = match side {
            Side::Long => level >= candle.close,
            Side::Short => level <= candle.close,
        };
        if crossed {
            return self.trigger(FlattenReason::StopCrossed);
        }

        debug!(from = ?before, to = level, "Protective stop tightened");
        match self.stop_order {
            Some(order_id) => vec![ProtectionAction::MoveStop {
                order_id,
                price: level,
            }],
            None => vec![ProtectionAction::PlaceStop { side, price: level }],
        }
    }

    fn trigger(&mut self, reason: FlattenReason) -> Vec<ProtectionAction> {
        info!(%reason, "Protection triggered");
        self.state = ProtectionState::Triggered;
        vec![ProtectionAction::Flatten { reason }]
    }

    pub fn reset(&mut self) {
        self.state = ProtectionState::None;
        self.ratchet = None;
        self.entry_price = 0.0;
        self.entry_time = None;
        self.take_profit = None;
        self.breakeven_done = false;
        self.stop_order = None;
    }
}
