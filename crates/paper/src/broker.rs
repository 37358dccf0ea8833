use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use common::{
    Broker, Candle, Error, Fill, Order, OrderEvent, OrderId, OrderRole, OrderSide, OrderType,
    RejectionReason, Result, Security,
};

/// Simulated fill layer for backtests.
///
/// Market orders fill at the close of the latest finished bar with
/// configurable slippage. Stop and limit orders rest until a later bar
/// trades through their price. Everything is keyed by sequential ids so two
/// identical replays produce identical event streams.
pub struct SimulatedBroker {
    security: Security,
    /// Slippage in basis points applied to market and stop fills.
    slippage_bps: f64,
    next_id: OrderId,
    last_candle: Option<Candle>,
    /// Resting stop/limit orders in submission order.
    resting: BTreeMap<OrderId, Order>,
    events: VecDeque<OrderEvent>,
}

impl SimulatedBroker {
    pub fn new(security: Security, slippage_bps: f64) -> Result<Self> {
        if !(security.price_step > 0.0) || !(security.volume_step > 0.0) {
            return Err(Error::Connection(format!(
                "security '{}' needs positive price and volume steps",
                security.id
            )));
        }
        if !(slippage_bps >= 0.0) {
            return Err(Error::Connection(format!(
                "slippage must be non-negative, got {slippage_bps}"
            )));
        }
        info!(
            security = %security.id,
            slippage_bps = slippage_bps,
            "SimulatedBroker initialized"
        );
        Ok(Self {
            security,
            slippage_bps,
            next_id: 1,
            last_candle: None,
            resting: BTreeMap::new(),
            events: VecDeque::new(),
        })
    }

    /// Orders still resting at the broker.
    pub fn resting_orders(&self) -> impl Iterator<Item = &Order> {
        self.resting.values()
    }

    fn now(&self) -> DateTime<Utc> {
        self.last_candle
            .as_ref()
            .map(|c| c.open_time)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    fn allocate_id(&mut self) -> OrderId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Buys pay more, sells receive less.
    fn slipped(&self, side: OrderSide, price: f64) -> f64 {
        let adj = self.slippage_bps / 10_000.0;
        let raw = match side {
            OrderSide::Buy => price * (1.0 + adj),
            OrderSide::Sell => price * (1.0 - adj),
        };
        self.security.normalize_price(raw)
    }

    fn reject(&mut self, order: &mut Order, reason: RejectionReason) {
        debug!(order_id = order.id, %reason, "Simulated reject");
        order.fail();
        self.events.push_back(OrderEvent::Rejected {
            order_id: order.id,
            reason,
        });
    }

    fn submit_market(&mut self, side: OrderSide, volume: f64) -> Result<Order> {
        let id = self.allocate_id();
        let mut order = Order::market(id, side, volume, OrderRole::Entry, self.now());

        if !(volume > 0.0) || !volume.is_finite() {
            self.reject(&mut order, RejectionReason::InvalidVolume);
            return Ok(order);
        }
        let Some(close) = self.last_candle.as_ref().map(|c| c.close) else {
            self.reject(&mut order, RejectionReason::NoMarketPrice);
            return Ok(order);
        };

        order.activate();
        let fill = Fill {
            order_id: id,
            side,
            price: self.slipped(side, close),
            volume,
            time: self.now(),
        };
        debug!(order_id = id, side = %side, mid = close, fill = fill.price, qty = volume, "Market fill simulated");
        self.events.push_back(OrderEvent::Filled(fill));
        Ok(order)
    }

    fn submit_resting(
        &mut self,
        side: OrderSide,
        order_type: OrderType,
        volume: f64,
        price: f64,
    ) -> Result<Order> {
        let id = self.allocate_id();
        let price = self.security.normalize_price(price);
        let mut order = Order::priced(
            id,
            side,
            order_type,
            volume,
            price,
            OrderRole::Entry,
            self.now(),
        );

        if !(volume > 0.0) || !volume.is_finite() {
            self.reject(&mut order, RejectionReason::InvalidVolume);
            return Ok(order);
        }
        if !(price > 0.0) || !price.is_finite() {
            self.reject(&mut order, RejectionReason::InvalidPrice);
            return Ok(order);
        }
        if let Some(close) = self.last_candle.as_ref().map(|c| c.close) {
            if !resting_price_valid(side, order_type, price, close) {
                self.reject(&mut order, RejectionReason::InvalidPrice);
                return Ok(order);
            }
        }

        self.resting.insert(id, order.clone());
        Ok(order)
    }

    /// Fill price for a resting order on this bar, if it triggers.
    fn trigger_price(order: &Order, candle: &Candle) -> Option<f64> {
        let price = order.price?;
        match (order.order_type, order.side) {
            // Gaps through a stop fill at the open.
            (OrderType::Stop, OrderSide::Buy) if candle.high >= price => Some(price.max(candle.open)),
            (OrderType::Stop, OrderSide::Sell) if candle.low <= price => Some(price.min(candle.open)),
            (OrderType::Limit, OrderSide::Buy) if candle.low <= price => Some(price.min(candle.open)),
            (OrderType::Limit, OrderSide::Sell) if candle.high >= price => Some(price.max(candle.open)),
            _ => None,
        }
    }
}

/// A buy stop must sit above the market, a sell stop below; limits mirror.
fn resting_price_valid(side: OrderSide, order_type: OrderType, price: f64, market: f64) -> bool {
    match (order_type, side) {
        (OrderType::Stop, OrderSide::Buy) | (OrderType::Limit, OrderSide::Sell) => price > market,
        (OrderType::Stop, OrderSide::Sell) | (OrderType::Limit, OrderSide::Buy) => price < market,
        (OrderType::Market, _) => true,
    }
}

impl Broker for SimulatedBroker {
    fn buy_market(&mut self, volume: f64) -> Result<Order> {
        self.submit_market(OrderSide::Buy, volume)
    }

    fn sell_market(&mut self, volume: f64) -> Result<Order> {
        self.submit_market(OrderSide::Sell, volume)
    }

    fn buy_stop(&mut self, volume: f64, price: f64) -> Result<Order> {
        self.submit_resting(OrderSide::Buy, OrderType::Stop, volume, price)
    }

    fn sell_stop(&mut self, volume: f64, price: f64) -> Result<Order> {
        self.submit_resting(OrderSide::Sell, OrderType::Stop, volume, price)
    }

    fn buy_limit(&mut self, volume: f64, price: f64) -> Result<Order> {
        self.submit_resting(OrderSide::Buy, OrderType::Limit, volume, price)
    }

    fn sell_limit(&mut self, volume: f64, price: f64) -> Result<Order> {
        self.submit_resting(OrderSide::Sell, OrderType::Limit, volume, price)
    }

    fn cancel(&mut self, order_id: OrderId) -> Result<Order> {
        let mut order = self.resting.remove(&order_id).ok_or(Error::OrderRejected {
            order_id,
            reason: RejectionReason::UnknownOrder,
        })?;
        order.cancel();
        self.events.push_back(OrderEvent::Cancelled(order_id));
        Ok(order)
    }

    fn re_register(&mut self, order_id: OrderId, price: f64, volume: f64) -> Result<Order> {
        let price = self.security.normalize_price(price);
        let market = self.last_candle.as_ref().map(|c| c.close);
        let order = self.resting.get_mut(&order_id).ok_or(Error::OrderRejected {
            order_id,
            reason: RejectionReason::UnknownOrder,
        })?;

        let price_ok = price > 0.0
            && price.is_finite()
            && market.map_or(true, |m| resting_price_valid(order.side, order.order_type, price, m));
        if !price_ok {
            return Err(Error::OrderRejected {
                order_id,
                reason: RejectionReason::InvalidPrice,
            });
        }
        if !(volume > 0.0) || !volume.is_finite() {
            return Err(Error::OrderRejected {
                order_id,
                reason: RejectionReason::InvalidVolume,
            });
        }

        order.price = Some(price);
        order.volume = volume;
        Ok(order.clone())
    }

    fn on_candle(&mut self, candle: &Candle) {
        if !candle.is_finished() {
            return;
        }
        self.last_candle = Some(candle.clone());

        let triggered: Vec<(OrderId, f64)> = self
            .resting
            .values()
            .filter_map(|o| Self::trigger_price(o, candle).map(|p| (o.id, p)))
            .collect();

        for (id, raw_price) in triggered {
            let Some(mut order) = self.resting.remove(&id) else {
                continue;
            };
            let price = match order.order_type {
                OrderType::Stop => self.slipped(order.side, raw_price),
                _ => raw_price,
            };
            order.activate();
            debug!(order_id = id, side = %order.side, price = price, "Resting order triggered");
            self.events.push_back(OrderEvent::Filled(Fill {
                order_id: id,
                side: order.side,
                price,
                volume: order.remaining(),
                time: candle.open_time,
            }));
        }
    }

    fn drain_events(&mut self) -> Vec<OrderEvent> {
        self.events.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn security() -> Security {
        Security {
            id: "TEST".into(),
            price_step: 0.01,
            volume_step: 1.0,
            currency: "USD".into(),
        }
    }

    fn bar(day: u32, open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle::finished(
            Utc.with_ymd_and_hms(2024, 3, day, 0, 0, 0).unwrap(),
            open,
            high,
            low,
            close,
            100.0,
        )
    }

    #[test]
    fn buy_fill_applies_positive_slippage() {
        let mut broker = SimulatedBroker::new(security(), 10.0).unwrap(); // 10 bps
        broker.on_candle(&bar(1, 1000.0, 1000.0, 1000.0, 1000.0));

        broker.buy_market(1.0).unwrap();
        let events = broker.drain_events();
        let OrderEvent::Filled(fill) = &events[0] else {
            panic!("expected fill, got {events:?}");
        };
        assert!((fill.price - 1001.0).abs() < 1e-6, "buy fill {}", fill.price);
    }

    #[test]
    fn sell_fill_applies_negative_slippage() {
        let mut broker = SimulatedBroker::new(security(), 10.0).unwrap();
        broker.on_candle(&bar(1, 1000.0, 1000.0, 1000.0, 1000.0));

        broker.sell_market(1.0).unwrap();
        let events = broker.drain_events();
        let OrderEvent::Filled(fill) = &events[0] else {
            panic!("expected fill, got {events:?}");
        };
        assert!((fill.price - 999.0).abs() < 1e-6, "sell fill {}", fill.price);
    }

    #[test]
    fn market_order_without_price_is_rejected() {
        let mut broker = SimulatedBroker::new(security(), 0.0).unwrap();
        let order = broker.buy_market(1.0).unwrap();
        assert_eq!(order.state, common::OrderState::Failed);
        assert!(matches!(
            broker.drain_events()[..],
            [OrderEvent::Rejected {
                reason: RejectionReason::NoMarketPrice,
                ..
            }]
        ));
    }

    #[test]
    fn sell_stop_rests_until_low_crosses() {
        let mut broker = SimulatedBroker::new(security(), 0.0).unwrap();
        broker.on_candle(&bar(1, 100.0, 101.0, 99.0, 100.0));
        let stop = broker.sell_stop(1.0, 95.0).unwrap();
        assert_eq!(stop.state, common::OrderState::Pending);

        broker.on_candle(&bar(2, 100.0, 102.0, 96.0, 97.0));
        assert!(broker.drain_events().is_empty());

        broker.on_candle(&bar(3, 97.0, 98.0, 94.0, 95.5));
        let events = broker.drain_events();
        assert!(matches!(&events[..], [OrderEvent::Filled(f)] if f.price == 95.0 && f.order_id == stop.id));
        assert_eq!(broker.resting_orders().count(), 0);
    }

    #[test]
    fn gap_through_stop_fills_at_open() {
        let mut broker = SimulatedBroker::new(security(), 0.0).unwrap();
        broker.on_candle(&bar(1, 100.0, 101.0, 99.0, 100.0));
        broker.sell_stop(1.0, 95.0).unwrap();

        broker.on_candle(&bar(2, 90.0, 91.0, 88.0, 89.0));
        let events = broker.drain_events();
        assert!(matches!(&events[..], [OrderEvent::Filled(f)] if f.price == 90.0));
    }

    #[test]
    fn stop_on_wrong_side_of_market_is_rejected() {
        let mut broker = SimulatedBroker::new(security(), 0.0).unwrap();
        broker.on_candle(&bar(1, 100.0, 101.0, 99.0, 100.0));
        let order = broker.sell_stop(1.0, 105.0).unwrap();
        assert_eq!(order.state, common::OrderState::Failed);
        assert!(matches!(
            broker.drain_events()[..],
            [OrderEvent::Rejected {
                reason: RejectionReason::InvalidPrice,
                ..
            }]
        ));
    }

    #[test]
    fn re_register_keeps_id_and_moves_price() {
        let mut broker = SimulatedBroker::new(security(), 0.0).unwrap();
        broker.on_candle(&bar(1, 100.0, 101.0, 99.0, 100.0));
        let stop = broker.sell_stop(1.0, 95.0).unwrap();

        let moved = broker.re_register(stop.id, 97.0, 1.0).unwrap();
        assert_eq!(moved.id, stop.id);
        assert_eq!(moved.price, Some(97.0));
        assert_eq!(broker.resting_orders().count(), 1);
    }

    #[test]
    fn cancel_unknown_order_errors() {
        let mut broker = SimulatedBroker::new(security(), 0.0).unwrap();
        assert!(matches!(
            broker.cancel(42),
            Err(Error::OrderRejected {
                reason: RejectionReason::UnknownOrder,
                ..
            })
        ));
    }

    #[test]
    fn invalid_security_fails_to_initialize() {
        let bad = Security {
            price_step: 0.0,
            ..security()
        };
        assert!(matches!(
            SimulatedBroker::new(bad, 0.0),
            Err(Error::Connection(_))
        ));
    }
}
