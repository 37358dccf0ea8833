use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Volumes closer to zero than this are treated as flat.
pub const VOLUME_EPSILON: f64 = 1e-9;

/// Lifecycle of a bar delivered by the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandleState {
    /// Bucket still accumulating ticks. Never authoritative for decisions.
    Active,
    /// Bucket closed. Immutable from here on.
    Finished,
}

/// One OHLCV bar for a fixed time bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub open_time: DateTime<Utc>,
    pub state: CandleState,
}

impl Candle {
    /// A closed bar.
    pub fn finished(
        open_time: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            open,
            high,
            low,
            close,
            volume,
            open_time,
            state: CandleState::Finished,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.state == CandleState::Finished
    }

    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    /// `high == low`: any ratio over the bar's range is undefined.
    pub fn is_zero_range(&self) -> bool {
        self.range().abs() < f64::EPSILON
    }
}

/// Direction of exposure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// `None` when flat.
    pub fn from_volume(volume: f64) -> Option<Self> {
        if volume > VOLUME_EPSILON {
            Some(Side::Long)
        } else if volume < -VOLUME_EPSILON {
            Some(Side::Short)
        } else {
            None
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }

    pub fn sign(self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }

    /// The order side that opens or adds to exposure on this side.
    pub fn entry_order_side(self) -> OrderSide {
        match self {
            Side::Long => OrderSide::Buy,
            Side::Short => OrderSide::Sell,
        }
    }

    /// The order side that reduces exposure on this side.
    pub fn exit_order_side(self) -> OrderSide {
        self.entry_order_side().opposite()
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Long => write!(f, "long"),
            Side::Short => write!(f, "short"),
        }
    }
}

/// Side of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    /// +1 for buys, -1 for sells.
    pub fn sign(self) -> f64 {
        match self {
            OrderSide::Buy => 1.0,
            OrderSide::Sell => -1.0,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    /// Executes immediately at the prevailing price.
    Market,
    /// Executes at `price` or better.
    Limit,
    /// Rests until the market trades through `price`, then executes.
    Stop,
}

/// Order lifecycle. `Done`, `Cancelled` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    Pending,
    Active,
    PartiallyFilled,
    Done,
    Cancelled,
    Failed,
}

impl OrderState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderState::Done | OrderState::Cancelled | OrderState::Failed
        )
    }
}

impl std::fmt::Display for OrderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderState::Pending => write!(f, "pending"),
            OrderState::Active => write!(f, "active"),
            OrderState::PartiallyFilled => write!(f, "partially_filled"),
            OrderState::Done => write!(f, "done"),
            OrderState::Cancelled => write!(f, "cancelled"),
            OrderState::Failed => write!(f, "failed"),
        }
    }
}

/// Why an order exists, so fills can be routed back to their owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderRole {
    Entry,
    Exit,
    Protective,
}

pub type OrderId = u64;

/// An order submitted to the fill layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub volume: f64,
    pub filled: f64,
    /// `None` for market orders.
    pub price: Option<f64>,
    pub state: OrderState,
    pub role: OrderRole,
    pub created_at: DateTime<Utc>,
}

impl Order {
    pub fn market(
        id: OrderId,
        side: OrderSide,
        volume: f64,
        role: OrderRole,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            side,
            order_type: OrderType::Market,
            volume,
            filled: 0.0,
            price: None,
            state: OrderState::Pending,
            role,
            created_at,
        }
    }

    pub fn priced(
        id: OrderId,
        side: OrderSide,
        order_type: OrderType,
        volume: f64,
        price: f64,
        role: OrderRole,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            side,
            order_type,
            volume,
            filled: 0.0,
            price: Some(price),
            state: OrderState::Pending,
            role,
            created_at,
        }
    }

    /// Pending → Active.
    pub fn activate(&mut self) {
        if self.state == OrderState::Pending {
            self.state = OrderState::Active;
        }
    }

    /// Record an execution of `qty`; completes the order once fully filled.
    pub fn fill(&mut self, qty: f64) {
        if self.state.is_terminal() {
            return;
        }
        self.filled = (self.filled + qty).min(self.volume);
        if self.remaining() <= VOLUME_EPSILON {
            self.state = OrderState::Done;
        } else {
            self.state = OrderState::PartiallyFilled;
        }
    }

    pub fn cancel(&mut self) {
        if !self.state.is_terminal() {
            self.state = OrderState::Cancelled;
        }
    }

    pub fn fail(&mut self) {
        if !self.state.is_terminal() {
            self.state = OrderState::Failed;
        }
    }

    pub fn remaining(&self) -> f64 {
        (self.volume - self.filled).max(0.0)
    }

    /// Still able to execute.
    pub fn is_working(&self) -> bool {
        !self.state.is_terminal()
    }
}

/// Execution report from the fill layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: OrderId,
    pub side: OrderSide,
    pub price: f64,
    pub volume: f64,
    pub time: DateTime<Utc>,
}

/// Asynchronous notification produced by the fill layer.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderEvent {
    Filled(Fill),
    Cancelled(OrderId),
    Rejected {
        order_id: OrderId,
        reason: RejectionReason,
    },
}

/// Signed net exposure in one instrument.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Positive = long, negative = short.
    pub volume: f64,
    pub avg_price: f64,
    pub opened_at: Option<DateTime<Utc>>,
}

impl Position {
    pub fn side(&self) -> Option<Side> {
        Side::from_volume(self.volume)
    }

    pub fn is_flat(&self) -> bool {
        self.side().is_none()
    }

    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        if self.is_flat() {
            return 0.0;
        }
        self.volume * (price - self.avg_price)
    }

    /// Net a fill into the position and return the PnL it realized.
    ///
    /// A fill larger than the opposite exposure flips the position; the
    /// remainder opens at the fill price.
    pub fn apply_fill(&mut self, fill: &Fill) -> f64 {
        let delta = fill.side.sign() * fill.volume;

        if self.is_flat() || self.volume.signum() == delta.signum() {
            let held = self.volume.abs();
            let total = held + fill.volume;
            self.avg_price = (self.avg_price * held + fill.price * fill.volume) / total;
            if held <= VOLUME_EPSILON {
                self.opened_at = Some(fill.time);
            }
            self.volume += delta;
            return 0.0;
        }

        let closing = fill.volume.min(self.volume.abs());
        let realized = closing * (fill.price - self.avg_price) * self.volume.signum();
        self.volume += delta;

        if self.volume.abs() <= VOLUME_EPSILON {
            *self = Position::default();
        } else if self.volume.signum() == delta.signum() {
            self.avg_price = fill.price;
            self.opened_at = Some(fill.time);
        }
        realized
    }
}

/// What a strategy wants; consumed immediately by the executor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum OrderIntent {
    /// Hold `volume` of exposure on `side`, closing any opposite position
    /// in the same order.
    Enter { side: Side, volume: f64 },
    /// Flatten whatever is open.
    Exit,
}

/// Tradable instrument descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Security {
    pub id: String,
    pub price_step: f64,
    pub volume_step: f64,
    pub currency: String,
}

impl Security {
    /// Round to the nearest price increment.
    pub fn normalize_price(&self, price: f64) -> f64 {
        round_to_step(price, self.price_step)
    }

    /// Round to the nearest volume increment.
    pub fn normalize_volume(&self, volume: f64) -> f64 {
        round_to_step(volume, self.volume_step)
    }
}

fn round_to_step(value: f64, step: f64) -> f64 {
    if step <= 0.0 {
        return value;
    }
    let steps = (value / step).round();
    // Re-derive through the step's own precision to avoid 0.30000000000000004.
    let decimals = step_decimals(step);
    let factor = 10f64.powi(decimals);
    (steps * step * factor).round() / factor
}

fn step_decimals(step: f64) -> i32 {
    let mut decimals = 0;
    let mut scaled = step;
    while (scaled - scaled.round()).abs() > 1e-9 && decimals < 12 {
        scaled *= 10.0;
        decimals += 1;
    }
    decimals
}

/// A problem found while validating a strategy definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Dotted path into the definition, e.g. `strategy.params.period`.
    pub location: String,
    pub message: String,
}

impl Diagnostic {
    pub fn new(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.location, self.message)
    }
}

/// Reason the fill layer or executor refused an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RejectionReason {
    InvalidPrice,
    InvalidVolume,
    NoMarketPrice,
    UnknownOrder,
    OrderNotWorking,
    TrailingRegression,
    Other(String),
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectionReason::InvalidPrice => write!(f, "invalid price"),
            RejectionReason::InvalidVolume => write!(f, "invalid volume"),
            RejectionReason::NoMarketPrice => write!(f, "no market price yet"),
            RejectionReason::UnknownOrder => write!(f, "unknown order"),
            RejectionReason::OrderNotWorking => write!(f, "order is no longer working"),
            RejectionReason::TrailingRegression => {
                write!(f, "protective price would move against the position")
            }
            RejectionReason::Other(s) => write!(f, "{s}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
    }

    fn fill(side: OrderSide, price: f64, volume: f64, day: u32) -> Fill {
        Fill {
            order_id: 1,
            side,
            price,
            volume,
            time: t(day),
        }
    }

    #[test]
    fn opening_fill_sets_entry() {
        let mut pos = Position::default();
        let realized = pos.apply_fill(&fill(OrderSide::Buy, 100.0, 2.0, 1));
        assert_eq!(realized, 0.0);
        assert_eq!(pos.volume, 2.0);
        assert_eq!(pos.avg_price, 100.0);
        assert_eq!(pos.opened_at, Some(t(1)));
    }

    #[test]
    fn adding_averages_price() {
        let mut pos = Position::default();
        pos.apply_fill(&fill(OrderSide::Buy, 100.0, 1.0, 1));
        pos.apply_fill(&fill(OrderSide::Buy, 110.0, 1.0, 2));
        assert!((pos.avg_price - 105.0).abs() < 1e-9);
        assert_eq!(pos.opened_at, Some(t(1)));
    }

    #[test]
    fn closing_realizes_pnl_and_flattens() {
        let mut pos = Position::default();
        pos.apply_fill(&fill(OrderSide::Sell, 100.0, 1.0, 1));
        let realized = pos.apply_fill(&fill(OrderSide::Buy, 90.0, 1.0, 2));
        assert!((realized - 10.0).abs() < 1e-9);
        assert!(pos.is_flat());
        assert_eq!(pos.opened_at, None);
    }

    #[test]
    fn netted_fill_flips_and_rebases() {
        let mut pos = Position::default();
        pos.apply_fill(&fill(OrderSide::Buy, 100.0, 1.0, 1));
        let realized = pos.apply_fill(&fill(OrderSide::Sell, 120.0, 2.0, 5));
        assert!((realized - 20.0).abs() < 1e-9);
        assert_eq!(pos.side(), Some(Side::Short));
        assert_eq!(pos.volume, -1.0);
        assert_eq!(pos.avg_price, 120.0);
        assert_eq!(pos.opened_at, Some(t(5)));
    }

    #[test]
    fn terminal_orders_ignore_transitions() {
        let mut order = Order::market(1, OrderSide::Buy, 1.0, OrderRole::Entry, t(1));
        order.activate();
        order.fill(1.0);
        assert_eq!(order.state, OrderState::Done);
        order.cancel();
        order.fail();
        assert_eq!(order.state, OrderState::Done);
    }

    #[test]
    fn partial_fill_then_done() {
        let mut order = Order::market(1, OrderSide::Sell, 3.0, OrderRole::Exit, t(1));
        order.activate();
        order.fill(1.0);
        assert_eq!(order.state, OrderState::PartiallyFilled);
        order.fill(2.0);
        assert_eq!(order.state, OrderState::Done);
    }

    #[test]
    fn security_rounds_to_step() {
        let sec = Security {
            id: "ES".into(),
            price_step: 0.25,
            volume_step: 1.0,
            currency: "USD".into(),
        };
        assert_eq!(sec.normalize_price(100.13), 100.25);
        assert_eq!(sec.normalize_price(100.1), 100.0);
        assert_eq!(sec.normalize_volume(2.4), 2.0);

        let cents = Security {
            price_step: 0.1,
            ..sec
        };
        assert_eq!(cents.normalize_price(0.3), 0.3);
    }

    #[test]
    fn zero_range_candle_detected() {
        let c = Candle::finished(t(1), 10.0, 10.0, 10.0, 10.0, 0.0);
        assert!(c.is_zero_range());
    }
}
