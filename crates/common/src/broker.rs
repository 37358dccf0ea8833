use crate::{Candle, Order, OrderEvent, OrderId, Result};

/// The order contract of the fill layer.
///
/// `SimulatedBroker` implements this for backtests. Callers must apply the
/// netting rule before invoking any primitive; the broker executes volumes
/// exactly as given.
///
/// Only `OrderExecutor` in `crates/engine` should hold a `dyn Broker`.
pub trait Broker: Send {
    fn buy_market(&mut self, volume: f64) -> Result<Order>;

    fn sell_market(&mut self, volume: f64) -> Result<Order>;

    fn buy_stop(&mut self, volume: f64, price: f64) -> Result<Order>;

    fn sell_stop(&mut self, volume: f64, price: f64) -> Result<Order>;

    fn buy_limit(&mut self, volume: f64, price: f64) -> Result<Order>;

    fn sell_limit(&mut self, volume: f64, price: f64) -> Result<Order>;

    fn cancel(&mut self, order_id: OrderId) -> Result<Order>;

    /// Move a resting order to a new price and volume, keeping its id.
    fn re_register(&mut self, order_id: OrderId, price: f64, volume: f64) -> Result<Order>;

    /// Advance matching by one finished bar; resting orders may execute.
    fn on_candle(&mut self, candle: &Candle);

    /// Fills, cancels and rejects produced since the last call, in order.
    fn drain_events(&mut self) -> Vec<OrderEvent>;
}
