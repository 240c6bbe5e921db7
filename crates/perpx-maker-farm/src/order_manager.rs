/*
[INPUT]:  Quote intents from the strategy and venue order state
[OUTPUT]: A local order-book shadow reconciled against the exchange
[POS]:    State layer - order lifecycle, locking, and reconciliation
[UPDATE]: When order state transitions or reconciliation rules change
*/

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use perpx_adapter::{
    CancelOrderRequest, NewOrderRequest, OrderStatus, OrderType, PerpxError, Side, TimeInForce,
};

use crate::exchange::ExchangeApi;

/// Lifecycle of a managed order.
///
/// `Submitted -> Open` happens when reconciliation first sees the order
/// resting; `Submitted -> Cancelled` is also reachable through the cancel
/// path and through the persistent-404 rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderState {
    /// Created locally, REST place not yet acknowledged.
    Pending,
    /// Accepted by the venue's order endpoint.
    Submitted,
    /// Confirmed resting by reconciliation.
    Open,
    Filled,
    Cancelled,
    Failed,
}

impl OrderState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderState::Filled | OrderState::Cancelled | OrderState::Failed
        )
    }

    pub fn is_active(self) -> bool {
        matches!(
            self,
            OrderState::Pending | OrderState::Submitted | OrderState::Open
        )
    }
}

/// Local record of one quote, owned exclusively by the OrderManager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedOrder {
    pub client_id: String,
    pub exchange_id: Option<i64>,
    pub symbol: String,
    pub side: Side,
    pub slot: u8,
    pub qty: Decimal,
    pub price: Decimal,
    pub status: OrderState,
    pub created_at: Instant,
    /// While `now < lock_until` the order may not be voluntarily cancelled.
    pub lock_until: Instant,
    pub last_seen_on_exchange_at: Option<Instant>,
}

impl ManagedOrder {
    pub fn is_locked(&self, now: Instant) -> bool {
        now < self.lock_until
    }
}

/// Outcome of a voluntary cancel attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    /// Still inside the dwell window; nothing was sent to the venue.
    Locked,
    NotFound,
}

/// A fill observed during reconciliation, delivered to the strategy over a
/// channel so the manager needs no back-reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FillEvent {
    pub client_id: String,
    pub side: Side,
    pub slot: u8,
    pub qty: Decimal,
    pub price: Decimal,
}

/// Summary of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub confirmed_open: usize,
    pub fills: usize,
    /// Orders concluded gone on the venue (explicit cancel, reject, or
    /// persistent 404).
    pub cancelled: Vec<String>,
    /// Exchange orders with no active local record; logged, never adopted.
    pub unowned: usize,
}

/// Timing knobs for the order lifecycle.
#[derive(Debug, Clone, Copy)]
pub struct OrderTiming {
    pub lock: Duration,
    pub grace_period: Duration,
    pub not_found_timeout: Duration,
}

impl Default for OrderTiming {
    fn default() -> Self {
        Self {
            lock: Duration::from_millis(700),
            grace_period: Duration::from_secs(3),
            not_found_timeout: Duration::from_secs(10),
        }
    }
}

/// Per-symbol order book shadow. Single writer: the symbol's strategy task.
pub struct OrderManager {
    symbol: String,
    api: Arc<dyn ExchangeApi>,
    orders: HashMap<String, ManagedOrder>,
    timing: OrderTiming,
    fill_tx: mpsc::UnboundedSender<FillEvent>,
}

impl OrderManager {
    pub fn new(
        symbol: String,
        api: Arc<dyn ExchangeApi>,
        timing: OrderTiming,
        fill_tx: mpsc::UnboundedSender<FillEvent>,
    ) -> Self {
        Self {
            symbol,
            api,
            orders: HashMap::new(),
            timing,
            fill_tx,
        }
    }

    pub fn state(&self, client_id: &str) -> Option<OrderState> {
        self.orders.get(client_id).map(|order| order.status)
    }

    /// Active order at a ladder cell, if any.
    pub fn active_at(&self, side: Side, slot: u8) -> Option<&ManagedOrder> {
        self.orders
            .values()
            .find(|order| order.side == side && order.slot == slot && order.status.is_active())
    }

    /// Active orders keyed by `(side, slot)`.
    pub fn snapshot(&self) -> HashMap<(Side, u8), ManagedOrder> {
        self.orders
            .values()
            .filter(|order| order.status.is_active())
            .map(|order| ((order.side, order.slot), order.clone()))
            .collect()
    }

    pub fn active_count(&self, side: Side) -> usize {
        self.orders
            .values()
            .filter(|order| order.side == side && order.status.is_active())
            .count()
    }

    /// Place a passive limit quote at a ladder cell.
    ///
    /// Acceptance by the order endpoint is enough for `Submitted`; the venue
    /// may not expose the order through query endpoints for several seconds.
    pub async fn place(
        &mut self,
        side: Side,
        slot: u8,
        qty: Decimal,
        price: Decimal,
        now: Instant,
    ) -> Result<String, PerpxError> {
        let client_id = format!(
            "mm:{}:{}:{}:{}",
            self.symbol,
            side.as_str(),
            slot,
            short_uuid()
        );

        self.orders.insert(
            client_id.clone(),
            ManagedOrder {
                client_id: client_id.clone(),
                exchange_id: None,
                symbol: self.symbol.clone(),
                side,
                slot,
                qty,
                price,
                status: OrderState::Pending,
                created_at: now,
                lock_until: now + self.timing.lock,
                last_seen_on_exchange_at: None,
            },
        );

        let req = NewOrderRequest {
            symbol: self.symbol.clone(),
            side,
            order_type: OrderType::Limit,
            qty,
            time_in_force: TimeInForce::PostOnly,
            reduce_only: false,
            price: Some(price),
            cl_ord_id: Some(client_id.clone()),
            margin_mode: None,
            leverage: None,
        };

        let result = self.api.new_order(req).await;
        let Some(order) = self.orders.get_mut(&client_id) else {
            return Err(PerpxError::InvalidResponse(format!(
                "order record vanished for {client_id}"
            )));
        };

        match result {
            Ok(resp) if resp.code == 0 => {
                order.status = OrderState::Submitted;
                debug!(
                    symbol = %self.symbol,
                    client_id = %client_id,
                    side = %side.as_str(),
                    slot,
                    %price,
                    %qty,
                    "quote placed"
                );
                Ok(client_id)
            }
            Ok(resp) => {
                order.status = OrderState::Failed;
                warn!(
                    symbol = %self.symbol,
                    client_id = %client_id,
                    code = resp.code,
                    message = %resp.message,
                    "place rejected"
                );
                Err(PerpxError::Api {
                    code: resp.code,
                    message: resp.message,
                })
            }
            Err(err) => {
                // A timed-out place may still have landed; reconciliation
                // treats the resulting exchange order as unowned.
                order.status = OrderState::Failed;
                warn!(symbol = %self.symbol, client_id = %client_id, error = %err, "place failed");
                Err(err)
            }
        }
    }

    /// Voluntarily cancel a quote. Locked orders are refused unless `force`.
    ///
    /// A venue 404 counts as success: the order is already gone.
    pub async fn cancel(
        &mut self,
        client_id: &str,
        force: bool,
        now: Instant,
    ) -> Result<CancelOutcome, PerpxError> {
        let Some(order) = self.orders.get(client_id) else {
            return Ok(CancelOutcome::NotFound);
        };

        match order.status {
            OrderState::Cancelled => return Ok(CancelOutcome::Cancelled),
            status if status.is_terminal() => return Ok(CancelOutcome::NotFound),
            _ => {}
        }

        if !force && order.is_locked(now) {
            return Ok(CancelOutcome::Locked);
        }

        let req = CancelOrderRequest {
            order_id: None,
            cl_ord_id: Some(client_id.to_string()),
        };

        let result = self.api.cancel_order(req).await;
        let Some(order) = self.orders.get_mut(client_id) else {
            return Ok(CancelOutcome::NotFound);
        };

        match result {
            Ok(resp) if resp.code == 0 => {
                order.status = OrderState::Cancelled;
                debug!(symbol = %self.symbol, client_id = %client_id, "cancel accepted");
                Ok(CancelOutcome::Cancelled)
            }
            Ok(resp) => {
                warn!(
                    symbol = %self.symbol,
                    client_id = %client_id,
                    code = resp.code,
                    message = %resp.message,
                    "cancel rejected"
                );
                Err(PerpxError::Api {
                    code: resp.code,
                    message: resp.message,
                })
            }
            Err(err) if err.is_not_found() => {
                order.status = OrderState::Cancelled;
                debug!(symbol = %self.symbol, client_id = %client_id, "cancel target already gone");
                Ok(CancelOutcome::Cancelled)
            }
            Err(err) => {
                // State unchanged; the next tick retries.
                warn!(symbol = %self.symbol, client_id = %client_id, error = %err, "cancel failed");
                Err(err)
            }
        }
    }

    /// Force-cancel every active order, ignoring locks. Used by hard kill
    /// and shutdown. Returns the number of orders cancelled.
    pub async fn cancel_all(&mut self, now: Instant) -> usize {
        let client_ids: Vec<String> = self
            .orders
            .values()
            .filter(|order| order.status.is_active())
            .map(|order| order.client_id.clone())
            .collect();

        let mut cancelled = 0;
        for client_id in client_ids {
            match self.cancel(&client_id, true, now).await {
                Ok(CancelOutcome::Cancelled) => cancelled += 1,
                Ok(_) => {}
                Err(err) => {
                    warn!(symbol = %self.symbol, client_id = %client_id, error = %err, "cancel-all entry failed");
                }
            }
        }
        cancelled
    }

    /// Reconcile the local shadow against the exchange.
    ///
    /// The grace rule is load-bearing: the venue's list endpoint lags the
    /// order endpoint, and concluding "cancelled" from a young order's
    /// absence produces a replace loop that never converges.
    pub async fn sync(&mut self, now: Instant) -> Result<SyncReport, PerpxError> {
        let open = self.api.query_open_orders(&self.symbol).await?;

        let mut exchange_ids: HashMap<String, i64> = HashMap::new();
        for order in &open.result {
            exchange_ids.insert(order.cl_ord_id.clone(), order.id);
        }

        let mut report = SyncReport::default();

        let candidates: Vec<String> = self
            .orders
            .values()
            .filter(|order| {
                matches!(order.status, OrderState::Submitted | OrderState::Open)
            })
            .map(|order| order.client_id.clone())
            .collect();

        for client_id in candidates {
            let Some(order) = self.orders.get(&client_id) else {
                continue;
            };
            let age = now.saturating_duration_since(order.created_at);

            // Grace rule: the venue has not necessarily indexed a fresh
            // order yet; absence proves nothing.
            if age < self.timing.grace_period {
                continue;
            }

            if let Some(&exchange_id) = exchange_ids.get(&client_id) {
                if let Some(order) = self.orders.get_mut(&client_id) {
                    if order.status != OrderState::Open {
                        report.confirmed_open += 1;
                    }
                    order.status = OrderState::Open;
                    order.exchange_id = Some(exchange_id);
                    order.last_seen_on_exchange_at = Some(now);
                }
                continue;
            }

            // Absent from the list: ask for the order directly.
            let detail = self.api.query_order(&client_id).await;
            let Some(order) = self.orders.get_mut(&client_id) else {
                continue;
            };

            match detail {
                Ok(venue_order) => match venue_order.status {
                    OrderStatus::Filled => {
                        order.status = OrderState::Filled;
                        report.fills += 1;

                        let qty = if venue_order.fill_qty > Decimal::ZERO {
                            venue_order.fill_qty
                        } else {
                            order.qty
                        };
                        let price = if venue_order.fill_avg_price > Decimal::ZERO {
                            venue_order.fill_avg_price
                        } else {
                            order.price
                        };
                        let _ = self.fill_tx.send(FillEvent {
                            client_id: client_id.clone(),
                            side: order.side,
                            slot: order.slot,
                            qty,
                            price,
                        });
                    }
                    OrderStatus::Cancelled | OrderStatus::Rejected => {
                        order.status = OrderState::Cancelled;
                        report.cancelled.push(client_id.clone());
                    }
                    OrderStatus::New | OrderStatus::Open | OrderStatus::PartiallyFilled => {
                        // Queryable but not yet listed; it is resting.
                        order.status = OrderState::Open;
                        order.exchange_id = Some(venue_order.id);
                        order.last_seen_on_exchange_at = Some(now);
                    }
                },
                Err(err) if err.is_not_found() => {
                    if age > self.timing.not_found_timeout {
                        order.status = OrderState::Cancelled;
                        report.cancelled.push(client_id.clone());
                        debug!(symbol = %self.symbol, client_id = %client_id, "order 404 past timeout, concluding cancelled");
                    }
                    // Within the timeout: propagation delay assumed.
                }
                Err(err) => {
                    debug!(symbol = %self.symbol, client_id = %client_id, error = %err, "order detail lookup failed");
                }
            }
        }

        // Exchange orders we do not actively track. A prior instance (or a
        // timed-out place marked Failed) may have left them; never adopt.
        for venue_order in &open.result {
            let owned = self
                .orders
                .get(&venue_order.cl_ord_id)
                .is_some_and(|order| order.status.is_active() || order.status == OrderState::Cancelled);
            if !owned {
                report.unowned += 1;
                warn!(
                    symbol = %self.symbol,
                    cl_ord_id = %venue_order.cl_ord_id,
                    exchange_id = venue_order.id,
                    "unowned order on exchange, ignoring"
                );
            }
        }

        Ok(report)
    }

    /// Drop terminal records. The strategy calls this once per tick so that
    /// filled and cancelled cells free up within one tick of observation.
    pub fn purge_terminal(&mut self) -> usize {
        let before = self.orders.len();
        self.orders.retain(|_, order| !order.status.is_terminal());
        before - self.orders.len()
    }
}

fn short_uuid() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}
