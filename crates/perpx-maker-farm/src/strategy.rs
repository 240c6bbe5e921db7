/*
[INPUT]:  Price updates, safety gate decisions, and order-manager state
[OUTPUT]: A maintained 2+2 quote ladder plus flattening of unwanted fills
[POS]:    Strategy layer - maker-points farming control loop
[UPDATE]: When changing rebalance triggers, replace sequencing, or fill
          handling
*/

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use rust_decimal::{Decimal, RoundingStrategy};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use perpx_adapter::{
    NewOrderRequest, OrderType, Side, SymbolInfo, TimeInForce,
};

use crate::band::{self, QuoteSpec};
use crate::config::{SafetyConfig, StrategyConfig};
use crate::events::EngineEvent;
use crate::exchange::ExchangeApi;
use crate::order_manager::{CancelOutcome, FillEvent, OrderManager, OrderTiming};
use crate::price::{PriceSnapshot, PriceTracker, PriceUpdate};
use crate::safety::{Gate, SafetyGuard};
use crate::stats::FarmingStats;

const BPS_DENOMINATOR: i64 = 10_000;

/// Exchange-imposed formatting constants for one symbol.
#[derive(Debug, Clone)]
pub struct SymbolMeta {
    pub price_tick_decimals: u32,
    pub qty_tick_decimals: u32,
    pub min_order_qty: Decimal,
}

impl Default for SymbolMeta {
    fn default() -> Self {
        Self {
            price_tick_decimals: 1,
            qty_tick_decimals: 4,
            min_order_qty: Decimal::new(1, 4),
        }
    }
}

impl From<&SymbolInfo> for SymbolMeta {
    fn from(info: &SymbolInfo) -> Self {
        Self {
            price_tick_decimals: info.price_tick_decimals,
            qty_tick_decimals: info.qty_tick_decimals,
            min_order_qty: info.min_order_qty,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TickOutcome {
    Continue,
    /// Emergency latch set; stop scheduling ticks for this symbol.
    Stop,
}

/// Maker-points farming strategy for one symbol.
///
/// Single writer for all of its state; every venue mutation is serialized
/// through this task.
pub struct MakerFarmingStrategy {
    symbol: String,
    params: StrategyConfig,
    meta: SymbolMeta,
    distances: Vec<Decimal>,
    api: Arc<dyn ExchangeApi>,
    price_rx: watch::Receiver<PriceUpdate>,
    tracker: PriceTracker,
    guard: SafetyGuard,
    orders: OrderManager,
    fill_rx: mpsc::UnboundedReceiver<FillEvent>,
    events: mpsc::UnboundedSender<EngineEvent>,
    /// Reference price the live ladder was placed at; drift is measured
    /// against it.
    last_placed_ladder: Option<Decimal>,
    cooldown_until: Option<Instant>,
    last_sync_at: Option<Instant>,
    position_notional: Decimal,
    stats: FarmingStats,
}

impl MakerFarmingStrategy {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: String,
        params: StrategyConfig,
        safety: SafetyConfig,
        meta: SymbolMeta,
        api: Arc<dyn ExchangeApi>,
        price_rx: watch::Receiver<PriceUpdate>,
        events: mpsc::UnboundedSender<EngineEvent>,
    ) -> Self {
        let (fill_tx, fill_rx) = mpsc::unbounded_channel();
        let timing = OrderTiming {
            lock: params.order_lock(),
            grace_period: params.order_grace_period(),
            not_found_timeout: params.order_not_found_timeout(),
        };
        let orders = OrderManager::new(symbol.clone(), Arc::clone(&api), timing, fill_tx);
        let distances = params.distances();

        Self {
            symbol,
            params,
            meta,
            distances,
            api,
            price_rx,
            tracker: PriceTracker::new(),
            guard: SafetyGuard::new(safety),
            orders,
            fill_rx,
            events,
            last_placed_ladder: None,
            cooldown_until: None,
            last_sync_at: None,
            position_notional: Decimal::ZERO,
            stats: FarmingStats::default(),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn stats(&self) -> FarmingStats {
        self.stats
    }

    /// Drive the tick loop until shutdown or emergency stop.
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<()> {
        let mut ticker = tokio::time::interval(self.params.check_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!(symbol = %self.symbol, "strategy shutdown requested");
                    let cancelled = self.orders.cancel_all(Instant::now()).await;
                    self.stats.orders_cancelled += cancelled as u64;
                    return Ok(());
                }
                _ = ticker.tick() => {
                    if self.tick(Instant::now()).await == TickOutcome::Stop {
                        info!(symbol = %self.symbol, stats = ?self.stats, "strategy stopped by emergency latch");
                        return Ok(());
                    }
                }
                changed = self.price_rx.changed() => {
                    if changed.is_err() {
                        // Hub dropped the sender; the staleness watchdog
                        // covers an extended outage.
                        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                        continue;
                    }
                    let update = self.price_rx.borrow_and_update().clone();
                    self.on_price(&update, Instant::now());
                }
            }
        }
    }

    /// Feed one push update into the price view and volatility window.
    pub(crate) fn on_price(&mut self, update: &PriceUpdate, now: Instant) {
        if self.tracker.on_push(update, now) {
            self.guard.record_mark(now, update.mark);
        }
    }

    /// One control-loop iteration.
    pub(crate) async fn tick(&mut self, now: Instant) -> TickOutcome {
        self.refresh_reference_if_silent(now).await;

        let Some(snapshot) = self.tracker.latest().cloned() else {
            // No reference price: nothing is safe to do.
            return TickOutcome::Continue;
        };

        let sync_due = self
            .last_sync_at
            .is_none_or(|at| now.saturating_duration_since(at) >= self.params.sync_interval());

        if sync_due {
            self.refresh_position_notional().await;
        }

        let gate = self
            .guard
            .gate(Some(&snapshot), self.position_notional, now);

        if let Gate::KillAll { reason } = &gate {
            let cancelled = self.orders.cancel_all(now).await;
            self.stats.orders_cancelled += cancelled as u64;
            self.last_placed_ladder = None;
            self.cooldown_until = None;
            warn!(symbol = %self.symbol, %reason, cancelled, "kill-all");
            self.emit(EngineEvent::SafetyTriggered {
                symbol: self.symbol.clone(),
                reason: reason.clone(),
            });

            if self.guard.is_emergency_stopped() {
                self.emit(EngineEvent::EmergencyStop {
                    symbol: self.symbol.clone(),
                    reason: reason.clone(),
                });
                return TickOutcome::Stop;
            }
        }

        // Reconciliation and fill handling run on their own cadence and stay
        // armed through pauses and kills.
        if sync_due {
            self.sync_and_flatten(now).await;
            self.last_sync_at = Some(now);
        }

        if !matches!(gate, Gate::KillAll { .. }) {
            let desired =
                band::build_ladder(snapshot.mark, &self.distances, self.meta.price_tick_decimals);
            if let Some(reason) = self.decide_rebalance(&desired, &snapshot, &gate, now) {
                info!(symbol = %self.symbol, %reason, mark = %snapshot.mark, "rebalancing");
                self.converge(&desired, snapshot.mark, now).await;
            }
        }

        self.orders.purge_terminal();
        TickOutcome::Continue
    }

    /// REST fallback: refresh the reference when the push stream is silent.
    async fn refresh_reference_if_silent(&mut self, now: Instant) {
        if !self
            .tracker
            .wants_rest_refresh(now, self.params.rest_fallback_interval())
        {
            return;
        }

        match self.api.query_symbol_price(&self.symbol).await {
            Ok(price) => {
                let mark = price.mark_price;
                self.tracker.on_rest(&price, now);
                self.guard.record_mark(now, mark);
            }
            Err(err) => {
                debug!(symbol = %self.symbol, error = %err, "rest price refresh failed");
            }
        }
    }

    async fn refresh_position_notional(&mut self) {
        match self.api.query_positions(&self.symbol).await {
            Ok(positions) => {
                self.position_notional = positions
                    .iter()
                    .map(|position| position.notional())
                    .sum();
            }
            Err(err) => {
                debug!(symbol = %self.symbol, error = %err, "position refresh failed");
            }
        }
    }

    async fn sync_and_flatten(&mut self, now: Instant) {
        match self.orders.sync(now).await {
            Ok(report) => {
                self.stats.orders_cancelled += report.cancelled.len() as u64;
                for client_id in report.cancelled {
                    self.emit(EngineEvent::OrderCancelled {
                        symbol: self.symbol.clone(),
                        client_id,
                    });
                }
            }
            Err(err) => {
                warn!(symbol = %self.symbol, error = %err, "reconcile failed");
            }
        }

        while let Ok(fill) = self.fill_rx.try_recv() {
            self.stats.fills += 1;
            warn!(
                symbol = %self.symbol,
                side = %fill.side.as_str(),
                slot = fill.slot,
                qty = %fill.qty,
                price = %fill.price,
                "quote filled, flattening"
            );
            self.emit(EngineEvent::OrderFilled {
                symbol: self.symbol.clone(),
                side: fill.side,
                qty: fill.qty,
                price: fill.price,
            });
            self.flatten(&fill).await;
        }
    }

    /// Close out an unwanted fill with a reducing market order.
    async fn flatten(&mut self, fill: &FillEvent) {
        let req = NewOrderRequest {
            symbol: self.symbol.clone(),
            side: fill.side.opposite(),
            order_type: OrderType::Market,
            qty: fill.qty,
            time_in_force: TimeInForce::Ioc,
            reduce_only: true,
            price: None,
            cl_ord_id: Some(format!("mm:{}:flat:{}", self.symbol, short_uuid())),
            margin_mode: None,
            leverage: None,
        };

        match self.api.new_order(req).await {
            Ok(resp) if resp.code == 0 => {
                self.stats.liquidations += 1;
                info!(symbol = %self.symbol, qty = %fill.qty, "position flattened");
            }
            Ok(resp) => {
                warn!(
                    symbol = %self.symbol,
                    code = resp.code,
                    message = %resp.message,
                    "flatten rejected; position remains"
                );
            }
            Err(err) => {
                warn!(symbol = %self.symbol, error = %err, "flatten failed; position remains");
            }
        }
    }

    /// Whether this tick should run the replace sequence, and why.
    fn decide_rebalance(
        &self,
        desired: &[QuoteSpec],
        snapshot: &PriceSnapshot,
        gate: &Gate,
        now: Instant,
    ) -> Option<String> {
        let reason = self.rebalance_trigger(desired, snapshot)?;

        if let Gate::PauseNew { reason: pause, until } = gate {
            debug!(
                symbol = %self.symbol,
                trigger = %reason,
                pause = %pause,
                remaining_secs = until.saturating_duration_since(now).as_secs_f64(),
                "rebalance deferred by pause"
            );
            return None;
        }

        // A fully one-sided ladder is repaired immediately; the cooldown
        // only throttles ordinary replaces.
        let side_missing = self.orders.active_count(Side::Buy) == 0
            || self.orders.active_count(Side::Sell) == 0;
        if !side_missing
            && let Some(until) = self.cooldown_until
            && now < until
        {
            debug!(
                symbol = %self.symbol,
                trigger = %reason,
                remaining_secs = until.saturating_duration_since(now).as_secs_f64(),
                "rebalance deferred by cooldown"
            );
            return None;
        }

        Some(reason)
    }

    fn rebalance_trigger(&self, desired: &[QuoteSpec], snapshot: &PriceSnapshot) -> Option<String> {
        let Some(ladder_ref) = self.last_placed_ladder else {
            return Some("initial placement".to_string());
        };

        let active = self.orders.snapshot();
        if active.len() < desired.len() {
            return Some(format!(
                "ladder incomplete ({}/{})",
                active.len(),
                desired.len()
            ));
        }

        for order in active.values() {
            let distance = band::distance_bps(order.price, snapshot.mark);
            if distance > self.params.max_distance_bps {
                return Some(format!(
                    "{}{} left the band ({distance:.1} bps)",
                    order.side.as_str(),
                    order.slot
                ));
            }
        }

        if ladder_ref > Decimal::ZERO {
            let drift =
                (snapshot.mark - ladder_ref).abs() / ladder_ref * Decimal::from(BPS_DENOMINATOR);
            if drift >= self.params.drift_threshold_bps {
                return Some(format!(
                    "drift {drift:.1} bps >= {} bps",
                    self.params.drift_threshold_bps
                ));
            }
        }

        None
    }

    /// Cross-interleaved replace: walk the desired ladder in
    /// BUY1 -> SELL1 -> BUY2 -> SELL2 order, cancelling and re-placing one
    /// cell at a time so one resting order per side survives every moment.
    ///
    /// Locked cells are skipped and retried next tick; the ladder reference
    /// and cooldown only advance once every cell completed.
    async fn converge(&mut self, desired: &[QuoteSpec], reference: Decimal, now: Instant) {
        let mut completed = true;
        let mut changed = false;

        for quote in desired {
            if let Some(existing) = self.orders.active_at(quote.side, quote.slot).cloned() {
                if existing.price == quote.price {
                    continue;
                }

                match self.orders.cancel(&existing.client_id, false, now).await {
                    Ok(CancelOutcome::Cancelled) => {
                        self.stats.orders_cancelled += 1;
                        changed = true;
                        self.emit(EngineEvent::OrderCancelled {
                            symbol: self.symbol.clone(),
                            client_id: existing.client_id.clone(),
                        });
                    }
                    Ok(CancelOutcome::Locked) => {
                        debug!(
                            symbol = %self.symbol,
                            client_id = %existing.client_id,
                            "cell locked, retrying next tick"
                        );
                        completed = false;
                        continue;
                    }
                    Ok(CancelOutcome::NotFound) => {}
                    Err(err) => {
                        warn!(
                            symbol = %self.symbol,
                            client_id = %existing.client_id,
                            error = %err,
                            "cancel failed, retrying next tick"
                        );
                        completed = false;
                        continue;
                    }
                }
            }

            let qty = self.quote_qty(quote.price);
            if qty <= Decimal::ZERO {
                warn!(symbol = %self.symbol, price = %quote.price, "unpriceable quote qty");
                completed = false;
                continue;
            }

            match self
                .orders
                .place(quote.side, quote.slot, qty, quote.price, now)
                .await
            {
                Ok(_) => {
                    self.stats.orders_placed += 1;
                    changed = true;
                    self.emit(EngineEvent::OrderPlaced {
                        symbol: self.symbol.clone(),
                        side: quote.side,
                        slot: quote.slot,
                        price: quote.price,
                        qty,
                    });
                }
                Err(err) => {
                    warn!(
                        symbol = %self.symbol,
                        side = %quote.side.as_str(),
                        slot = quote.slot,
                        error = %err,
                        "place failed, retrying next tick"
                    );
                    completed = false;
                }
            }
        }

        if completed {
            self.last_placed_ladder = Some(reference);
            if changed {
                self.cooldown_until = Some(now + self.params.rebalance_cooldown());
                self.stats.rebalances += 1;
                self.emit(EngineEvent::Rebalance {
                    symbol: self.symbol.clone(),
                    reference,
                });
            }
        }
    }

    /// Quantity worth `order_size_usd` at the quote price, floored at the
    /// venue minimum.
    fn quote_qty(&self, price: Decimal) -> Decimal {
        if price <= Decimal::ZERO {
            return Decimal::ZERO;
        }

        let raw = self.params.order_size_usd / price;
        let rounded = raw.round_dp_with_strategy(
            self.meta.qty_tick_decimals,
            RoundingStrategy::MidpointAwayFromZero,
        );

        if rounded < self.meta.min_order_qty {
            self.meta.min_order_qty
        } else {
            rounded
        }
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }
}

fn short_uuid() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::str::FromStr;
    use std::time::Duration;

    use crate::exchange::mock::MockExchange;
    use perpx_adapter::{MarginMode, OrderStatus, Position};

    fn dec(value: &str) -> Decimal {
        Decimal::from_str(value).expect("valid decimal")
    }

    struct Harness {
        api: Arc<MockExchange>,
        strategy: MakerFarmingStrategy,
        price_tx: watch::Sender<PriceUpdate>,
        events_rx: mpsc::UnboundedReceiver<EngineEvent>,
        next_ts: i64,
    }

    impl Harness {
        fn new(api: Arc<MockExchange>) -> Self {
            Self::with_params(api, StrategyConfig::default())
        }

        fn with_params(api: Arc<MockExchange>, params: StrategyConfig) -> Self {
            let (price_tx, price_rx) = watch::channel(PriceUpdate::empty("BTC-USD"));
            let (events_tx, events_rx) = mpsc::unbounded_channel();
            let strategy = MakerFarmingStrategy::new(
                "BTC-USD".to_string(),
                params,
                SafetyConfig::default(),
                SymbolMeta::default(),
                api.clone(),
                price_rx,
                events_tx,
            );
            Self {
                api,
                strategy,
                price_tx,
                events_rx,
                next_ts: 1,
            }
        }

        fn push_mark(&mut self, mark: &str, now: Instant) {
            self.push(mark, None, now);
        }

        fn push(&mut self, mark: &str, mid: Option<&str>, now: Instant) {
            let update = PriceUpdate {
                symbol: "BTC-USD".to_string(),
                mark: dec(mark),
                mid: mid.map(dec),
                bid: None,
                ask: None,
                ts_ms: self.next_ts,
            };
            self.next_ts += 1;
            let _ = self.price_tx.send(update.clone());
            self.strategy.on_price(&update, now);
        }

        async fn limit_orders(&self) -> Vec<NewOrderRequest> {
            self.api
                .new_orders
                .lock()
                .await
                .iter()
                .filter(|req| req.order_type == OrderType::Limit)
                .cloned()
                .collect()
        }

        async fn market_orders(&self) -> Vec<NewOrderRequest> {
            self.api
                .new_orders
                .lock()
                .await
                .iter()
                .filter(|req| req.order_type == OrderType::Market)
                .cloned()
                .collect()
        }
    }

    fn position_with_notional(notional: &str) -> Position {
        Position {
            id: 1,
            symbol: "BTC-USD".to_string(),
            margin_mode: MarginMode::Cross,
            qty: dec("0.001"),
            entry_price: dec("94000"),
            mark_price: dec("94000"),
            position_value: dec(notional),
            liq_price: Decimal::ZERO,
            upnl: Decimal::ZERO,
            status: "open".to_string(),
            updated_at: "0".to_string(),
        }
    }

    fn cell_of(req: &NewOrderRequest) -> (Side, u8) {
        let cl_ord_id = req.cl_ord_id.as_deref().unwrap_or("");
        let mut parts = cl_ord_id.split(':');
        let _prefix = parts.next();
        let _symbol = parts.next();
        let side = match parts.next() {
            Some("buy") => Side::Buy,
            _ => Side::Sell,
        };
        let slot: u8 = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
        (side, slot)
    }

    #[tokio::test]
    async fn initial_tick_places_the_full_ladder() {
        let mut harness = Harness::new(Arc::new(MockExchange::consistent()));
        let t0 = Instant::now();

        harness.push_mark("94000", t0);
        assert_eq!(harness.strategy.tick(t0).await, TickOutcome::Continue);

        let placed = harness.limit_orders().await;
        assert_eq!(placed.len(), 4);

        let prices: Vec<Decimal> = placed.iter().map(|req| req.price.unwrap()).collect();
        assert_eq!(
            prices,
            vec![
                dec("93943.6"),
                dec("94056.4"),
                dec("93924.8"),
                dec("94075.2"),
            ]
        );
        assert!(placed.iter().all(|req| req.qty == dec("0.0001")));
        assert!(placed
            .iter()
            .all(|req| req.time_in_force == TimeInForce::PostOnly));

        let stats = harness.strategy.stats();
        assert_eq!(stats.orders_placed, 4);
        assert_eq!(stats.orders_cancelled, 0);
        assert_eq!(stats.rebalances, 1);
        assert_eq!(harness.strategy.last_placed_ladder, Some(dec("94000")));
    }

    #[tokio::test]
    async fn small_drift_leaves_the_ladder_alone() {
        let mut harness = Harness::new(Arc::new(MockExchange::consistent()));
        let t0 = Instant::now();

        harness.push_mark("94000", t0);
        harness.strategy.tick(t0).await;

        // 2 bps of drift is far below the 15 bps threshold.
        let t1 = t0 + Duration::from_secs(2);
        harness.push_mark("94002", t1);
        harness.strategy.tick(t1).await;

        assert_eq!(harness.limit_orders().await.len(), 4);
        assert_eq!(harness.api.cancel_count().await, 0);
        assert_eq!(harness.strategy.stats().rebalances, 1);
    }

    #[tokio::test]
    async fn drift_beyond_threshold_replaces_cross_interleaved() {
        let mut harness = Harness::new(Arc::new(MockExchange::consistent()));
        let t0 = Instant::now();

        harness.push_mark("94000", t0);
        harness.strategy.tick(t0).await;

        // 94000 -> 94150 is ~15.96 bps of drift.
        let t1 = t0 + Duration::from_secs(5);
        harness.push_mark("94150", t1);
        harness.strategy.tick(t1).await;

        assert_eq!(harness.api.cancel_count().await, 4);
        let placed = harness.limit_orders().await;
        assert_eq!(placed.len(), 8);

        // Replacement sequence alternates sides, inner slot first.
        let replacement_cells: Vec<(Side, u8)> = placed[4..].iter().map(cell_of).collect();
        assert_eq!(
            replacement_cells,
            vec![(Side::Buy, 1), (Side::Sell, 1), (Side::Buy, 2), (Side::Sell, 2)]
        );

        // The cancel/place stream interleaves per cell.
        let ops = harness.api.ops.lock().await.clone();
        let replace_ops = &ops[4..];
        assert!(replace_ops[0].starts_with("cancel:mm:BTC-USD:buy:1:"));
        assert!(replace_ops[1].starts_with("place:mm:BTC-USD:buy:1:"));
        assert!(replace_ops[2].starts_with("cancel:mm:BTC-USD:sell:1:"));
        assert!(replace_ops[3].starts_with("place:mm:BTC-USD:sell:1:"));

        assert_eq!(harness.strategy.last_placed_ladder, Some(dec("94150")));
        assert_eq!(harness.strategy.stats().rebalances, 2);
    }

    #[tokio::test]
    async fn cooldown_rejects_back_to_back_rebalances() {
        let mut harness = Harness::new(Arc::new(MockExchange::consistent()));
        let t0 = Instant::now();

        harness.push_mark("94000", t0);
        harness.strategy.tick(t0).await;

        // Large drift 1.5s after the initial placement: locks have expired
        // and the volatility window no longer spans both marks, so the 3s
        // cooldown is what defers the replace.
        let t1 = t0 + Duration::from_millis(1500);
        harness.push_mark("94150", t1);
        harness.strategy.tick(t1).await;

        assert_eq!(harness.api.cancel_count().await, 0);
        assert_eq!(harness.limit_orders().await.len(), 4);
        assert_eq!(harness.strategy.stats().rebalances, 1);
    }

    #[tokio::test]
    async fn locked_cells_are_skipped_and_retried() {
        let params: StrategyConfig = serde_yaml::from_str(
            r#"
order_lock_seconds: 10.0
rebalance_cooldown_seconds: 0.0
"#,
        )
        .unwrap();
        let mut harness = Harness::with_params(Arc::new(MockExchange::consistent()), params);
        let t0 = Instant::now();

        harness.push_mark("94000", t0);
        harness.strategy.tick(t0).await;

        // Drift triggers, but every cell is inside its 10s lock: the whole
        // sequence is skipped and the ladder reference stays put.
        let t1 = t0 + Duration::from_secs(4);
        harness.push_mark("94150", t1);
        harness.strategy.tick(t1).await;

        assert_eq!(harness.api.cancel_count().await, 0);
        assert_eq!(harness.limit_orders().await.len(), 4);
        assert_eq!(harness.strategy.last_placed_ladder, Some(dec("94000")));

        // Locks expired: the replace goes through.
        let t2 = t0 + Duration::from_secs(11);
        harness.push_mark("94150", t2);
        harness.strategy.tick(t2).await;

        assert_eq!(harness.api.cancel_count().await, 4);
        assert_eq!(harness.limit_orders().await.len(), 8);
        assert_eq!(harness.strategy.last_placed_ladder, Some(dec("94150")));
    }

    #[tokio::test]
    async fn divergence_pauses_then_resumes() {
        let mut harness = Harness::new(Arc::new(MockExchange::consistent()));
        let t0 = Instant::now();

        harness.push_mark("94000", t0);
        harness.strategy.tick(t0).await;

        // Drift would trigger, but mark/mid divergence (~5.3 bps) pauses
        // new placements. Resting orders are untouched.
        let t1 = t0 + Duration::from_secs(5);
        harness.push("94150", Some("94200"), t1);
        harness.strategy.tick(t1).await;

        assert_eq!(harness.api.cancel_count().await, 0);
        assert_eq!(harness.limit_orders().await.len(), 4);

        // Reconciliation kept running while paused.
        assert!(harness.strategy.last_sync_at.is_some());

        // Divergence gone and the 5s pause elapsed: normal operation.
        let t2 = t1 + Duration::from_secs(6);
        harness.push("94150", Some("94150.5"), t2);
        harness.strategy.tick(t2).await;

        assert_eq!(harness.api.cancel_count().await, 4);
        assert_eq!(harness.limit_orders().await.len(), 8);
        assert_eq!(harness.strategy.stats().rebalances, 2);
    }

    #[tokio::test]
    async fn fill_is_flattened_and_cell_replaced() {
        let mut harness = Harness::new(Arc::new(MockExchange::consistent()));
        let t0 = Instant::now();

        harness.push_mark("94000", t0);
        harness.strategy.tick(t0).await;

        // BUY slot 1 fills on the venue.
        let buy1 = harness
            .strategy
            .orders
            .active_at(Side::Buy, 1)
            .unwrap()
            .clone();
        harness.api.remove_live(&buy1.client_id).await;
        let mut filled = MockExchange::order(&buy1.client_id, 10, Side::Buy, OrderStatus::Filled);
        filled.fill_qty = dec("0.0001");
        filled.fill_avg_price = buy1.price;
        harness.api.set_detail(filled).await;

        let t1 = t0 + Duration::from_secs(4);
        harness.push_mark("94000", t1);
        harness.strategy.tick(t1).await;

        // Reducing market order on the opposite side, same tick.
        let markets = harness.market_orders().await;
        assert_eq!(markets.len(), 1);
        assert_eq!(markets[0].side, Side::Sell);
        assert_eq!(markets[0].qty, dec("0.0001"));
        assert!(markets[0].reduce_only);
        assert_eq!(markets[0].time_in_force, TimeInForce::Ioc);

        let stats = harness.strategy.stats();
        assert_eq!(stats.fills, 1);
        assert_eq!(stats.liquidations, 1);

        // The emptied cell was re-quoted; untouched cells kept their orders.
        let placed = harness.limit_orders().await;
        assert_eq!(placed.len(), 5);
        assert_eq!(cell_of(placed.last().unwrap()), (Side::Buy, 1));

        let filled_events = {
            let mut found = false;
            while let Ok(event) = harness.events_rx.try_recv() {
                if matches!(event, EngineEvent::OrderFilled { .. }) {
                    found = true;
                }
            }
            found
        };
        assert!(filled_events);
    }

    #[tokio::test]
    async fn empty_side_is_repaired_despite_cooldown() {
        let params: StrategyConfig = serde_yaml::from_str(
            r#"
rebalance_cooldown_seconds: 30.0
order_grace_period_seconds: 1.0
"#,
        )
        .unwrap();
        let mut harness = Harness::with_params(Arc::new(MockExchange::consistent()), params);
        let t0 = Instant::now();

        harness.push_mark("94000", t0);
        harness.strategy.tick(t0).await;

        // Both sell quotes fill: the ladder is one-sided.
        for slot in [1u8, 2u8] {
            let sell = harness
                .strategy
                .orders
                .active_at(Side::Sell, slot)
                .unwrap()
                .clone();
            harness.api.remove_live(&sell.client_id).await;
            let mut filled =
                MockExchange::order(&sell.client_id, 20 + slot as i64, Side::Sell, OrderStatus::Filled);
            filled.fill_qty = sell.qty;
            filled.fill_avg_price = sell.price;
            harness.api.set_detail(filled).await;
        }

        // Still deep inside the 30s cooldown; the one-sided repair runs
        // anyway.
        let t1 = t0 + Duration::from_secs(2);
        harness.push_mark("94000", t1);
        harness.strategy.tick(t1).await;

        assert_eq!(harness.strategy.stats().fills, 2);
        assert_eq!(harness.market_orders().await.len(), 2);

        let placed = harness.limit_orders().await;
        assert_eq!(placed.len(), 6);
        let repaired: Vec<(Side, u8)> = placed[4..].iter().map(cell_of).collect();
        assert_eq!(repaired, vec![(Side::Sell, 1), (Side::Sell, 2)]);
    }

    #[tokio::test]
    async fn volatility_spike_kills_through_locks() {
        let mut harness = Harness::new(Arc::new(MockExchange::consistent()));
        let t0 = Instant::now();

        harness.push_mark("94000", t0);
        harness.strategy.tick(t0).await;
        assert_eq!(harness.limit_orders().await.len(), 4);

        // ~64 bps/s over half a second; orders are still inside their 0.7s
        // locks and get cancelled anyway.
        let t1 = t0 + Duration::from_millis(500);
        harness.push_mark("94300", t1);
        assert_eq!(harness.strategy.tick(t1).await, TickOutcome::Continue);

        assert_eq!(harness.api.cancel_count().await, 4);
        assert_eq!(harness.strategy.stats().orders_cancelled, 4);
        assert_eq!(harness.strategy.last_placed_ladder, None);
        assert_eq!(harness.limit_orders().await.len(), 4);
        assert!(!harness.strategy.guard.is_emergency_stopped());

        let mut safety_events = 0;
        while let Ok(event) = harness.events_rx.try_recv() {
            if matches!(event, EngineEvent::SafetyTriggered { .. }) {
                safety_events += 1;
            }
        }
        assert_eq!(safety_events, 1);
    }

    #[tokio::test]
    async fn position_breach_stops_the_symbol() {
        let mut harness = Harness::new(Arc::new(MockExchange::consistent()));
        let t0 = Instant::now();

        harness.push_mark("94000", t0);
        harness.strategy.tick(t0).await;
        assert_eq!(harness.limit_orders().await.len(), 4);

        harness
            .api
            .positions
            .lock()
            .await
            .push(position_with_notional("55"));

        let t1 = t0 + Duration::from_secs(2);
        harness.push_mark("94000", t1);
        assert_eq!(harness.strategy.tick(t1).await, TickOutcome::Stop);

        assert!(harness.strategy.guard.is_emergency_stopped());
        assert_eq!(harness.api.cancel_count().await, 4);

        let mut saw_emergency = false;
        while let Ok(event) = harness.events_rx.try_recv() {
            if matches!(event, EngineEvent::EmergencyStop { .. }) {
                saw_emergency = true;
            }
        }
        assert!(saw_emergency);
    }

    #[tokio::test]
    async fn no_reference_price_means_no_action() {
        let mut harness = Harness::new(Arc::new(MockExchange::consistent()));
        let t0 = Instant::now();

        // No push has arrived and the REST fallback has nothing either.
        harness.strategy.tick(t0).await;

        assert_eq!(harness.api.new_order_count().await, 0);
        assert_eq!(harness.api.cancel_count().await, 0);
    }

    #[tokio::test]
    async fn quote_qty_floors_at_venue_minimum() {
        let harness = Harness::new(Arc::new(MockExchange::consistent()));

        // 5 USD at 940000 would round to zero; the venue minimum applies.
        assert_eq!(harness.strategy.quote_qty(dec("940000")), dec("0.0001"));
        // 5 USD at 94000 rounds up to exactly the minimum.
        assert_eq!(harness.strategy.quote_qty(dec("94000")), dec("0.0001"));
        assert_eq!(harness.strategy.quote_qty(Decimal::ZERO), Decimal::ZERO);
    }
}
