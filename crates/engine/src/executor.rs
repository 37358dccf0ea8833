use std::collections::{BTreeMap, VecDeque};

use tracing::{debug, info, warn};

use common::{
    Broker, Candle, Error, Fill, Order, OrderEvent, OrderId, OrderIntent, OrderRole, OrderSide,
    OrderType, Position, RejectionReason, Result, Security, Side,
};

use risk::StopRatchet;

/// Volume an order must carry to end up holding `requested` on `side`.
///
/// An opposite position is closed by the same order, so its size is added.
pub fn netted_volume(side: Side, requested: f64, position: &Position) -> f64 {
    match position.side() {
        Some(held) if held != side => requested + position.volume.abs(),
        _ => requested,
    }
}

/// One fill as seen by the run, with the PnL it realized.
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    pub fill: Fill,
    pub role: OrderRole,
    pub realized: f64,
}

/// Turns intents into broker orders and owns the position they produce.
///
/// This is the ONLY component that calls `Broker` primitives, and the only
/// one that mutates the `Position`.
pub struct OrderExecutor {
    broker: Box<dyn Broker>,
    security: Security,
    position: Position,
    /// Every order this run submitted, keyed by its sequential id.
    orders: BTreeMap<OrderId, Order>,
    /// Broker events drained early while checking a submission.
    pending: VecDeque<OrderEvent>,
    realized_pnl: f64,
    submitted: usize,
    rejected: usize,
}

impl OrderExecutor {
    pub fn new(broker: Box<dyn Broker>, security: Security) -> Self {
        Self {
            broker,
            security,
            position: Position::default(),
            orders: BTreeMap::new(),
            pending: VecDeque::new(),
            realized_pnl: 0.0,
            submitted: 0,
            rejected: 0,
        }
    }

    pub fn position(&self) -> &Position {
        &self.position
    }

    pub fn security(&self) -> &Security {
        &self.security
    }

    pub fn realized_pnl(&self) -> f64 {
        self.realized_pnl
    }

    pub fn submitted_count(&self) -> usize {
        self.submitted
    }

    pub fn rejected_count(&self) -> usize {
        self.rejected
    }

    pub fn order(&self, id: OrderId) -> Option<&Order> {
        self.orders.get(&id)
    }

    /// Orders in submission order with their latest state.
    pub fn order_log(&self) -> Vec<Order> {
        self.orders.values().cloned().collect()
    }

    /// Broker events already drained but not yet applied by `sync`.
    pub fn has_unsynced_events(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Forward a finished bar to the fill layer.
    pub fn on_candle(&mut self, candle: &Candle) {
        self.broker.on_candle(candle);
    }

    /// Turn an intent into at most one market order.
    pub fn submit(&mut self, intent: &OrderIntent) -> Result<Option<Order>> {
        match *intent {
            OrderIntent::Enter { side, volume } => {
                if !(volume.is_finite() && volume > 0.0) {
                    return Err(Error::Config(format!(
                        "order volume must be positive, got {volume}"
                    )));
                }
                let netted = self
                    .security
                    .normalize_volume(netted_volume(side, volume, &self.position));
                if netted <= 0.0 {
                    return Err(Error::Config(format!(
                        "order volume {volume} rounds to zero at step {}",
                        self.security.volume_step
                    )));
                }
                let role = if self.position.is_flat() || self.position.side() == Some(side) {
                    OrderRole::Entry
                } else {
                    OrderRole::Exit
                };
                let order_side = side.entry_order_side();
                info!(
                    %side,
                    requested = volume,
                    netted = netted,
                    position = self.position.volume,
                    "Submitting market order"
                );
                self.dispatch(role, |b| match order_side {
                    OrderSide::Buy => b.buy_market(netted),
                    OrderSide::Sell => b.sell_market(netted),
                })
                .map(Some)
            }
            OrderIntent::Exit => {
                let Some(held) = self.position.side() else {
                    debug!("Exit requested while flat; nothing to do");
                    return Ok(None);
                };
                let volume = self.position.volume.abs();
                info!(side = %held, volume = volume, "Flattening position");
                self.dispatch(OrderRole::Exit, |b| match held.exit_order_side() {
                    OrderSide::Buy => b.buy_market(volume),
                    OrderSide::Sell => b.sell_market(volume),
                })
                .map(Some)
            }
        }
    }

    /// Rest a stop order at the broker.
    pub fn place_stop(
        &mut self,
        side: OrderSide,
        volume: f64,
        price: f64,
        role: OrderRole,
    ) -> Result<Order> {
        let volume = self.security.normalize_volume(volume);
        let price = self.security.normalize_price(price);
        debug!(%side, volume = volume, price = price, ?role, "Placing stop");
        self.dispatch(role, |b| match side {
            OrderSide::Buy => b.buy_stop(volume, price),
            OrderSide::Sell => b.sell_stop(volume, price),
        })
    }

    /// Rest a limit order at the broker.
    pub fn place_limit(
        &mut self,
        side: OrderSide,
        volume: f64,
        price: f64,
        role: OrderRole,
    ) -> Result<Order> {
        let volume = self.security.normalize_volume(volume);
        let price = self.security.normalize_price(price);
        debug!(%side, volume = volume, price = price, ?role, "Placing limit");
        self.dispatch(role, |b| match side {
            OrderSide::Buy => b.buy_limit(volume, price),
            OrderSide::Sell => b.sell_limit(volume, price),
        })
    }

    pub fn cancel(&mut self, order_id: OrderId) -> Result<Order> {
        self.working(order_id)?;
        let cancelled = self.broker.cancel(order_id)?;
        if let Some(order) = self.orders.get_mut(&order_id) {
            order.cancel();
        }
        debug!(order_id, "Order cancelled");
        Ok(cancelled)
    }

    /// Move a resting order to `new_price`, keeping its id and remaining volume.
    ///
    /// With `ratchet` set, a price that moves against a position on that side
    /// is refused and the order is left as it was. The same price is a no-op.
    pub fn cancel_and_replace(
        &mut self,
        order_id: OrderId,
        new_price: f64,
        ratchet: Option<Side>,
    ) -> Result<Order> {
        let order = self.working(order_id)?.clone();
        let price = self.security.normalize_price(new_price);

        let Some(current) = order.price else {
            return Err(self.refuse(order_id, RejectionReason::InvalidPrice));
        };
        if (current - price).abs() < f64::EPSILON {
            return Ok(order);
        }
        if let Some(side) = ratchet {
            if StopRatchet::is_regression(side, current, price) {
                return Err(self.refuse(order_id, RejectionReason::TrailingRegression));
            }
        }

        match self.broker.re_register(order_id, price, order.remaining()) {
            Ok(moved) => {
                if let Some(local) = self.orders.get_mut(&order_id) {
                    local.price = moved.price;
                }
                debug!(order_id, from = current, to = price, "Order re-registered");
                Ok(moved)
            }
            Err(Error::OrderRejected { reason, .. }) => Err(self.refuse(order_id, reason)),
            Err(e) => Err(e),
        }
    }

    /// Apply every event the fill layer produced since the last call.
    pub fn sync(&mut self) -> Vec<Execution> {
        let mut events: Vec<OrderEvent> = self.pending.drain(..).collect();
        events.extend(self.broker.drain_events());

        let mut executions = Vec::new();
        for event in events {
            match event {
                OrderEvent::Filled(fill) => {
                    let role = match self.orders.get_mut(&fill.order_id) {
                        Some(order) => {
                            order.fill(fill.volume);
                            order.role
                        }
                        None => {
                            warn!(order_id = fill.order_id, "Fill for unknown order");
                            OrderRole::Entry
                        }
                    };
                    let realized = self.position.apply_fill(&fill);
                    self.realized_pnl += realized;
                    info!(
                        order_id = fill.order_id,
                        side = %fill.side,
                        price = fill.price,
                        qty = fill.volume,
                        realized = realized,
                        position = self.position.volume,
                        "Order filled"
                    );
                    executions.push(Execution {
                        fill,
                        role,
                        realized,
                    });
                }
                OrderEvent::Cancelled(order_id) => {
                    if let Some(order) = self.orders.get_mut(&order_id) {
                        order.cancel();
                    }
                }
                OrderEvent::Rejected { order_id, reason } => {
                    self.fail(order_id, reason);
                }
            }
        }
        executions
    }

    /// Ids of orders still resting with the given role.
    pub fn working_orders(&self, role: OrderRole) -> Vec<OrderId> {
        self.orders
            .values()
            .filter(|o| o.role == role && o.is_working() && o.order_type != OrderType::Market)
            .map(|o| o.id)
            .collect()
    }

    fn working(&self, order_id: OrderId) -> Result<&Order> {
        let order = self.orders.get(&order_id).ok_or(Error::OrderRejected {
            order_id,
            reason: RejectionReason::UnknownOrder,
        })?;
        if !order.is_working() {
            return Err(Error::OrderRejected {
                order_id,
                reason: RejectionReason::OrderNotWorking,
            });
        }
        Ok(order)
    }

    /// Submit through the broker and surface an immediate reject as an error.
    fn dispatch<F>(&mut self, role: OrderRole, send: F) -> Result<Order>
    where
        F: FnOnce(&mut dyn Broker) -> Result<Order>,
    {
        let mut order = send(self.broker.as_mut())?;
        order.role = role;
        self.submitted += 1;
        let order_id = order.id;
        self.orders.insert(order_id, order.clone());

        self.pending.extend(self.broker.drain_events());
        let rejection = self.pending.iter().find_map(|e| match e {
            OrderEvent::Rejected { order_id: id, reason } if *id == order_id => {
                Some(reason.clone())
            }
            _ => None,
        });
        match rejection {
            Some(reason) => {
                self.pending.retain(
                    |e| !matches!(e, OrderEvent::Rejected { order_id: id, .. } if *id == order_id),
                );
                Err(self.fail(order_id, reason))
            }
            None => Ok(order),
        }
    }

    /// A new order the fill layer refused: it will never work.
    fn fail(&mut self, order_id: OrderId, reason: RejectionReason) -> Error {
        if let Some(order) = self.orders.get_mut(&order_id) {
            order.fail();
        }
        self.refuse(order_id, reason)
    }

    /// Count and log a refusal. A refused re-registration leaves the order
    /// resting as it was.
    fn refuse(&mut self, order_id: OrderId, reason: RejectionReason) -> Error {
        self.rejected += 1;
        warn!(order_id, %reason, position = self.position.volume, "Order rejected");
        Error::OrderRejected { order_id, reason }
    }
}
