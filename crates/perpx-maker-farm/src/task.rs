/*
[INPUT]:  BotConfig + PerpxClient, watch::Receiver<PriceUpdate>, CancellationToken
[OUTPUT]: Tokio tasks running lifecycle (startup -> quote loop -> shutdown)
[POS]:    Execution layer - per-symbol trading orchestration
[UPDATE]: When changing startup/shutdown guarantees or supervision semantics
*/

use std::sync::{Arc, Once};
use std::time::Duration;

use anyhow::{Context as _, Result, anyhow};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use perpx_adapter::{
    CancelOrderRequest, ClientConfig, Credentials, Ed25519Signer, NewOrderRequest, OrderType,
    PerpxClient, Side, TimeInForce,
};

use crate::config::BotConfig;
use crate::events::EngineEvent;
use crate::market_data::MarketDataHub;
use crate::price::PriceUpdate;
use crate::strategy::{MakerFarmingStrategy, SymbolMeta};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

static PANIC_HOOK_ONCE: Once = Once::new();

fn ensure_panic_hook_installed() {
    PANIC_HOOK_ONCE.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            tracing::error!("panic in task: {info}");
            previous(info);
        }));
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Init,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

/// Task manager that coordinates the per-symbol quoting tasks.
pub struct TaskManager {
    tasks: Vec<JoinHandle<Result<()>>>,
    market_data_hub: Arc<Mutex<MarketDataHub>>,
    shutdown: CancellationToken,
    events_tx: mpsc::UnboundedSender<EngineEvent>,
}

impl TaskManager {
    pub fn with_market_data_hub(
        market_data_hub: Arc<Mutex<MarketDataHub>>,
        events_tx: mpsc::UnboundedSender<EngineEvent>,
    ) -> Self {
        Self {
            tasks: Vec::new(),
            market_data_hub,
            shutdown: CancellationToken::new(),
            events_tx,
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Spawn one quoting task per configured symbol, sharing one client.
    pub async fn spawn_from_config(&mut self, config: BotConfig) -> Result<()> {
        let client = Arc::new(build_client(&config).context("build venue client")?);
        self.spawn_from_config_with_client(config, client).await
    }

    /// Spawn tasks against an injected client (tests use wiremock here).
    pub async fn spawn_from_config_with_client(
        &mut self,
        config: BotConfig,
        client: Arc<PerpxClient>,
    ) -> Result<()> {
        ensure_panic_hook_installed();

        for symbol in &config.strategy.symbols {
            let price_rx = {
                let mut hub = self.market_data_hub.lock().await;
                hub.subscribe_price(symbol)
            };
            let task = Task::new(
                symbol.clone(),
                config.clone(),
                Arc::clone(&client),
                price_rx,
                self.shutdown.child_token(),
                self.events_tx.clone(),
            );
            self.tasks.push(task.spawn());
        }

        Ok(())
    }

    /// Request graceful shutdown and wait for all tasks to exit.
    ///
    /// Bounded by `SHUTDOWN_TIMEOUT`; remaining tasks are aborted on
    /// deadline.
    pub async fn shutdown_and_wait(&mut self) -> Result<()> {
        self.shutdown.cancel();
        self.join_all_with_deadline(SHUTDOWN_TIMEOUT).await
    }

    async fn join_all_with_deadline(&mut self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut handles = std::mem::take(&mut self.tasks);

        while let Some(mut handle) = handles.pop() {
            tokio::select! {
                res = &mut handle => {
                    match res {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => {
                            self.shutdown.cancel();
                            abort_all(handles);
                            return Err(err).context("task returned error");
                        }
                        Err(join_err) => {
                            self.shutdown.cancel();
                            abort_all(handles);
                            if join_err.is_panic() {
                                return Err(anyhow!("task panicked: {join_err}"));
                            }
                            return Err(anyhow!("task join error: {join_err}"));
                        }
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    handle.abort();
                    abort_all(handles);
                    return Err(anyhow!("shutdown timed out after {timeout:?}"));
                }
            }
        }

        Ok(())
    }
}

/// Build the authenticated REST client from configuration.
pub fn build_client(config: &BotConfig) -> Result<PerpxClient> {
    let mut client =
        PerpxClient::with_config_and_base_url(ClientConfig::default(), &config.venue.base_url)
            .map_err(|err| anyhow!("create PerpxClient failed: {err}"))?;

    let secret_key = decode_ed25519_secret_key_base64(&config.credentials.signing_key)
        .context("decode signing_key (base64) failed")?;
    client.set_credentials_and_signer(
        Credentials {
            jwt_token: config.credentials.jwt_token.clone(),
        },
        Ed25519Signer::from_secret_key(&secret_key),
    );

    Ok(client)
}

/// Individual quoting task for one symbol.
pub struct Task {
    symbol: String,
    config: BotConfig,
    client: Arc<PerpxClient>,
    price_rx: watch::Receiver<PriceUpdate>,
    state: TaskState,
    shutdown: CancellationToken,
    events_tx: mpsc::UnboundedSender<EngineEvent>,
}

impl Task {
    pub fn new(
        symbol: String,
        config: BotConfig,
        client: Arc<PerpxClient>,
        price_rx: watch::Receiver<PriceUpdate>,
        shutdown: CancellationToken,
        events_tx: mpsc::UnboundedSender<EngineEvent>,
    ) -> Self {
        Self {
            symbol,
            config,
            client,
            price_rx,
            state: TaskState::Init,
            shutdown,
            events_tx,
        }
    }

    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(mut self) -> Result<()> {
        self.state = TaskState::Starting;
        info!(symbol = %self.symbol, "task starting");

        if let Err(err) = self.startup_sequence().await {
            self.state = TaskState::Failed;
            warn!(symbol = %self.symbol, state = ?self.state, "startup sequence failed");
            return Err(err).context("startup sequence failed");
        }

        let meta = self.fetch_symbol_meta().await;

        let mut strategy = MakerFarmingStrategy::new(
            self.symbol.clone(),
            self.config.strategy.clone(),
            self.config.safety.clone(),
            meta,
            self.client.clone(),
            self.price_rx.clone(),
            self.events_tx.clone(),
        );

        self.state = TaskState::Running;
        info!(symbol = %self.symbol, "task running");

        let run_result = strategy.run(self.shutdown.clone()).await;

        self.state = TaskState::Stopping;
        let shutdown_result = self.shutdown_sequence().await;
        self.state = match (&run_result, &shutdown_result) {
            (Ok(()), Ok(())) => TaskState::Stopped,
            _ => TaskState::Failed,
        };
        info!(symbol = %self.symbol, state = ?self.state, stats = ?strategy.stats(), "task exited");

        run_result?;
        shutdown_result
    }

    /// Startup hygiene: verify the session and clear any orders a prior
    /// instance left on the book.
    async fn startup_sequence(&mut self) -> Result<()> {
        self.client
            .ensure_session()
            .await
            .map_err(|err| anyhow!("session check failed: {err}"))?;

        self.cancel_open_orders().await
    }

    /// Shutdown sequence: cancel open orders, then flatten any residual
    /// position. Best-effort and minimal.
    async fn shutdown_sequence(&mut self) -> Result<()> {
        self.cancel_open_orders().await?;
        self.close_positions().await?;
        Ok(())
    }

    async fn fetch_symbol_meta(&self) -> SymbolMeta {
        match self.client.query_symbol_info(&self.symbol).await {
            Ok(infos) => match infos.iter().find(|info| info.symbol == self.symbol) {
                Some(info) => SymbolMeta::from(info),
                None => {
                    warn!(symbol = %self.symbol, "symbol info missing; using default precision");
                    SymbolMeta::default()
                }
            },
            Err(err) => {
                warn!(symbol = %self.symbol, error = %err, "symbol info query failed; using default precision");
                SymbolMeta::default()
            }
        }
    }

    async fn cancel_open_orders(&self) -> Result<()> {
        let orders = self
            .client
            .query_open_orders(Some(&self.symbol))
            .await
            .map_err(|err| anyhow!("query_open_orders failed: {err}"))?;

        let mut first_error: Option<anyhow::Error> = None;

        for order in orders.result {
            let req = CancelOrderRequest {
                order_id: Some(order.id),
                cl_ord_id: None,
            };

            if let Err(err) = self.client.cancel_order(req).await {
                warn!(
                    symbol = %self.symbol,
                    order_id = order.id,
                    "cancel_order failed: {err}"
                );
                if first_error.is_none() {
                    first_error = Some(anyhow!(err));
                }
            }
        }

        if let Some(err) = first_error {
            return Err(err).context("one or more cancels failed");
        }

        Ok(())
    }

    async fn close_positions(&self) -> Result<()> {
        let positions = self
            .client
            .query_positions(Some(&self.symbol))
            .await
            .map_err(|err| anyhow!("query_positions failed: {err}"))?;

        let mut first_error: Option<anyhow::Error> = None;

        for position in positions {
            if position.qty.is_zero() {
                continue;
            }

            let (side, qty) = if position.qty.is_sign_positive() {
                (Side::Sell, position.qty)
            } else {
                (Side::Buy, position.qty.abs())
            };

            let req = NewOrderRequest {
                symbol: position.symbol.clone(),
                side,
                order_type: OrderType::Market,
                qty,
                time_in_force: TimeInForce::Ioc,
                reduce_only: true,
                price: None,
                cl_ord_id: None,
                margin_mode: None,
                leverage: None,
            };

            match self.client.new_order(req).await {
                Ok(resp) if resp.code == 0 => {}
                Ok(resp) => {
                    let err = anyhow!(
                        "new_order returned code={} message={}",
                        resp.code,
                        resp.message
                    );
                    warn!(symbol = %self.symbol, "close position failed: {err}");
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
                Err(err) => {
                    warn!(symbol = %self.symbol, "close position HTTP failed: {err}");
                    if first_error.is_none() {
                        first_error = Some(anyhow!(err));
                    }
                }
            }
        }

        if let Some(err) = first_error {
            return Err(err).context("one or more position closes failed");
        }

        Ok(())
    }
}

fn abort_all(handles: Vec<JoinHandle<Result<()>>>) {
    for handle in handles {
        handle.abort();
    }
}

fn decode_ed25519_secret_key_base64(encoded: &str) -> Result<[u8; 32]> {
    let decoded = BASE64
        .decode(encoded.trim())
        .map_err(|err| anyhow!("base64 decode failed: {err}"))?;

    match decoded.len() {
        32 => {
            let mut bytes = [0u8; 32];
            bytes.copy_from_slice(&decoded);
            Ok(bytes)
        }
        64 => {
            // Common representation: 32-byte seed + 32-byte public key.
            let mut bytes = [0u8; 32];
            bytes.copy_from_slice(&decoded[..32]);
            Ok(bytes)
        }
        other => Err(anyhow!(
            "unexpected signing key length after base64 decode: {other} (expected 32 or 64)"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::config::VenueConfig;

    fn test_config(symbol: &str, base_url: &str) -> BotConfig {
        let secret_key = [7u8; 32];
        let yaml = format!(
            r#"
credentials:
  jwt_token: "jwt-token"
  signing_key: "{}"
strategy:
  symbols: ["{symbol}"]
"#,
            BASE64.encode(secret_key)
        );
        let mut config: BotConfig = serde_yaml::from_str(&yaml).unwrap();
        config.venue = VenueConfig {
            base_url: base_url.to_string(),
            ws_url: "wss://127.0.0.1:1/ws".to_string(),
        };
        config
    }

    fn balance_json() -> serde_json::Value {
        json!({
            "balance": "100",
            "equity": "100",
            "locked": "0",
            "cross_available": "100",
            "cross_margin": "0",
            "upnl": "0",
        })
    }

    fn order_json(order_id: i64, symbol: &str) -> serde_json::Value {
        json!({
            "id": order_id,
            "cl_ord_id": format!("mm:{symbol}:buy:1:old{order_id}"),
            "symbol": symbol,
            "side": "buy",
            "order_type": "limit",
            "status": "open",
            "time_in_force": "alo",
            "price": "93943.6",
            "qty": "0.0001",
            "fill_qty": "0",
            "fill_avg_price": "0",
            "reduce_only": false,
            "created_at": "0",
            "updated_at": "0",
        })
    }

    fn position_json(position_id: i64, symbol: &str, qty: &str) -> serde_json::Value {
        json!({
            "id": position_id,
            "symbol": symbol,
            "margin_mode": "cross",
            "qty": qty,
            "entry_price": "94000",
            "mark_price": "94000",
            "position_value": "9.4",
            "liq_price": "0",
            "upnl": "0",
            "status": "open",
            "updated_at": "0",
        })
    }

    fn test_task(symbol: &str, base_url: &str) -> Task {
        let config = test_config(symbol, base_url);
        let client = Arc::new(build_client(&config).unwrap());
        let (_price_tx, price_rx) = watch::channel(PriceUpdate::empty(symbol));
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        Task::new(
            symbol.to_string(),
            config,
            client,
            price_rx,
            CancellationToken::new(),
            events_tx,
        )
    }

    #[test]
    fn signing_key_decodes_both_lengths() {
        let seed = [3u8; 32];
        let decoded = decode_ed25519_secret_key_base64(&BASE64.encode(seed)).unwrap();
        assert_eq!(decoded, seed);

        let mut expanded = [0u8; 64];
        expanded[..32].copy_from_slice(&seed);
        let decoded = decode_ed25519_secret_key_base64(&BASE64.encode(expanded)).unwrap();
        assert_eq!(decoded, seed);

        assert!(decode_ed25519_secret_key_base64("c2hvcnQ=").is_err());
    }

    #[tokio::test]
    async fn startup_verifies_session_and_cancels_stale_orders() {
        let server = MockServer::start().await;
        let symbol = "BTC-USD";

        Mock::given(method("GET"))
            .and(path("/api/query_balance"))
            .and(header("authorization", "Bearer jwt-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(balance_json()))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/api/query_open_orders"))
            .and(query_param("symbol", symbol))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "page_size": 2,
                "result": [order_json(1, symbol), order_json(2, symbol)],
                "total": 2,
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/api/cancel_order"))
            .and(header("authorization", "Bearer jwt-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 0,
                "message": "ok",
                "request_id": "req-cancel",
            })))
            .expect(2)
            .mount(&server)
            .await;

        let mut task = test_task(symbol, &server.uri());
        task.startup_sequence().await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_cancels_orders_and_flattens_positions() {
        let server = MockServer::start().await;
        let symbol = "BTC-USD";

        Mock::given(method("GET"))
            .and(path("/api/query_open_orders"))
            .and(query_param("symbol", symbol))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "page_size": 0,
                "result": [],
                "total": 0,
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/api/query_positions"))
            .and(query_param("symbol", symbol))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                position_json(1, symbol, "1.5"),
                position_json(2, symbol, "-2"),
            ])))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/api/new_order"))
            .and(body_json(json!({
                "symbol": symbol,
                "side": "sell",
                "order_type": "market",
                "qty": "1.5",
                "time_in_force": "ioc",
                "reduce_only": true,
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 0,
                "message": "ok",
                "request_id": "req-close-1",
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/api/new_order"))
            .and(body_json(json!({
                "symbol": symbol,
                "side": "buy",
                "order_type": "market",
                "qty": "2",
                "time_in_force": "ioc",
                "reduce_only": true,
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 0,
                "message": "ok",
                "request_id": "req-close-2",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut task = test_task(symbol, &server.uri());
        task.shutdown_sequence().await.unwrap();
    }

    #[tokio::test]
    async fn manager_spawns_and_shuts_down_tasks() {
        let server = MockServer::start().await;
        let symbol = "BTC-USD";

        Mock::given(method("GET"))
            .and(path("/api/query_balance"))
            .respond_with(ResponseTemplate::new(200).set_body_json(balance_json()))
            .expect(1)
            .mount(&server)
            .await;

        // Startup and shutdown each query the open-orders list once.
        Mock::given(method("GET"))
            .and(path("/api/query_open_orders"))
            .and(query_param("symbol", symbol))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "page_size": 0,
                "result": [],
                "total": 0,
            })))
            .expect(2)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/api/query_symbol_info"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/api/query_positions"))
            .and(query_param("symbol", symbol))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let config = test_config(symbol, &server.uri());
        let client = Arc::new(build_client(&config).unwrap());
        let hub = Arc::new(Mutex::new(MarketDataHub::new(&config.venue.ws_url)));
        let (events_tx, _events_rx) = mpsc::unbounded_channel();

        let mut manager = TaskManager::with_market_data_hub(hub, events_tx);
        manager
            .spawn_from_config_with_client(config, client)
            .await
            .unwrap();

        // Let the task get through its startup sequence before stopping.
        tokio::time::sleep(Duration::from_millis(200)).await;
        manager.shutdown_and_wait().await.unwrap();
    }
}
