/*
[INPUT]:  Perpx market WebSocket stream + per-symbol subscriptions
[OUTPUT]: Latest-per-symbol price updates via `watch` channels
[POS]:    Data layer - shared market data distribution (no trading logic)
[UPDATE]: When changing subscription channels, reconnection backoff, or
          shutdown semantics
*/

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use perpx_adapter::{PerpxWebSocket, PriceData, WebSocketMessage};

use crate::price::PriceUpdate;

const DEFAULT_MAX_RETRIES: u32 = 10;

#[derive(Debug)]
enum HubCommand {
    TrackSymbol {
        symbol: String,
        price_tx: watch::Sender<PriceUpdate>,
    },
}

/// Market data hub that fans price updates out to all strategy tasks.
///
/// Data-only by design: it connects, subscribes, parses, and broadcasts.
#[derive(Debug)]
pub struct MarketDataHub {
    ws_url: String,
    price_txs: HashMap<String, watch::Sender<PriceUpdate>>,
    shutdown: CancellationToken,
    cmd_tx: mpsc::UnboundedSender<HubCommand>,
    cmd_rx: Option<mpsc::UnboundedReceiver<HubCommand>>,
    worker_handle: Option<tokio::task::JoinHandle<()>>,
}

impl MarketDataHub {
    pub fn new(ws_url: &str) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        Self {
            ws_url: ws_url.to_string(),
            price_txs: HashMap::new(),
            shutdown: CancellationToken::new(),
            cmd_tx,
            cmd_rx: Some(cmd_rx),
            worker_handle: None,
        }
    }

    /// Subscribe to price updates for a symbol.
    ///
    /// The returned `watch::Receiver` always holds the latest update; the
    /// internal worker starts lazily on the first subscription.
    pub fn subscribe_price(&mut self, symbol: &str) -> watch::Receiver<PriceUpdate> {
        self.start_worker_if_needed();

        if let Some(existing) = self.price_txs.get(symbol) {
            return existing.subscribe();
        }

        let (tx, rx) = watch::channel(PriceUpdate::empty(symbol));
        self.price_txs.insert(symbol.to_string(), tx.clone());

        let _ = self.cmd_tx.send(HubCommand::TrackSymbol {
            symbol: symbol.to_string(),
            price_tx: tx,
        });

        rx
    }

    /// Trigger a graceful shutdown of the internal worker.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    fn start_worker_if_needed(&mut self) {
        if self.worker_handle.is_some() {
            return;
        }

        let Some(cmd_rx) = self.cmd_rx.take() else {
            return;
        };

        if tokio::runtime::Handle::try_current().is_err() {
            warn!("MarketDataHub created without Tokio runtime; worker not started");
            self.cmd_rx = Some(cmd_rx);
            return;
        }

        let worker = HubWorker {
            ws_url: self.ws_url.clone(),
            price_txs: HashMap::new(),
            cmd_rx,
            shutdown: self.shutdown.clone(),
            max_retries: DEFAULT_MAX_RETRIES,
        };
        self.worker_handle = Some(tokio::spawn(worker.run()));
    }
}

impl Drop for MarketDataHub {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[derive(Debug)]
struct HubWorker {
    ws_url: String,
    price_txs: HashMap<String, watch::Sender<PriceUpdate>>,
    cmd_rx: mpsc::UnboundedReceiver<HubCommand>,
    shutdown: CancellationToken,
    max_retries: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamExit {
    Disconnected,
    Shutdown,
}

impl HubWorker {
    async fn run(mut self) {
        let mut retry_count: u32 = 0;

        'run: loop {
            if self.shutdown.is_cancelled() {
                break 'run;
            }

            if self.price_txs.is_empty() {
                tokio::select! {
                    _ = self.shutdown.cancelled() => break 'run,
                    cmd = self.cmd_rx.recv() => {
                        match cmd {
                            Some(HubCommand::TrackSymbol { symbol, price_tx }) => {
                                self.price_txs.insert(symbol, price_tx);
                            }
                            None => break 'run,
                        }
                    }
                }
                continue;
            }

            match self.connect_once().await {
                Ok((ws, mut rx)) => {
                    retry_count = 0;
                    info!(ws_url = %self.ws_url, "market data hub connected");

                    match self.stream_loop(&ws, &mut rx).await {
                        StreamExit::Shutdown => break 'run,
                        StreamExit::Disconnected => {
                            warn!("market stream disconnected; reconnecting");
                            continue 'run;
                        }
                    }
                }
                Err(err) => {
                    retry_count = retry_count.saturating_add(1);
                    if retry_count >= self.max_retries {
                        warn!(retry_count, error = %err, "market data hub gave up reconnecting");
                        break 'run;
                    }

                    let backoff = backoff_duration(retry_count);
                    warn!(retry_count, ?backoff, error = %err, "market stream connect failed; backing off");

                    tokio::select! {
                        _ = self.shutdown.cancelled() => break 'run,
                        _ = tokio::time::sleep(backoff) => {}
                        cmd = self.cmd_rx.recv() => {
                            match cmd {
                                Some(HubCommand::TrackSymbol { symbol, price_tx }) => {
                                    self.price_txs.insert(symbol, price_tx);
                                }
                                None => break 'run,
                            }
                        }
                    }
                }
            }
        }
    }

    async fn connect_once(
        &self,
    ) -> Result<
        (
            PerpxWebSocket,
            mpsc::Receiver<WebSocketMessage>,
        ),
        String,
    > {
        let mut ws = PerpxWebSocket::with_url(&self.ws_url);
        ws.connect_market_stream()
            .await
            .map_err(|err| err.to_string())?;

        for symbol in self.price_txs.keys() {
            ws.subscribe_price(symbol)
                .await
                .map_err(|err| err.to_string())?;
        }

        let rx = ws
            .take_receiver()
            .ok_or_else(|| "websocket receiver already taken".to_string())?;

        Ok((ws, rx))
    }

    async fn stream_loop(
        &mut self,
        ws: &PerpxWebSocket,
        rx: &mut mpsc::Receiver<WebSocketMessage>,
    ) -> StreamExit {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    debug!("market data hub shutdown requested");
                    return StreamExit::Shutdown;
                }
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(HubCommand::TrackSymbol { symbol, price_tx }) => {
                            self.price_txs.insert(symbol.clone(), price_tx);
                            if let Err(err) = ws.subscribe_price(&symbol).await {
                                warn!(%symbol, error = %err, "subscribe while connected failed");
                                return StreamExit::Disconnected;
                            }
                        }
                        None => return StreamExit::Shutdown,
                    }
                }
                msg = rx.recv() => {
                    match msg {
                        Some(message) => self.handle_message(message),
                        None => {
                            warn!("market stream ended");
                            return StreamExit::Disconnected;
                        }
                    }
                }
            }
        }
    }

    fn handle_message(&self, message: WebSocketMessage) {
        let WebSocketMessage::Price { symbol, data } = message else {
            return;
        };

        let price_data: PriceData = match serde_json::from_value(data) {
            Ok(parsed) => parsed,
            Err(err) => {
                debug!(%symbol, error = %err, "undecodable price payload");
                return;
            }
        };

        let Some(update) = price_update_from_data(&price_data) else {
            debug!(%symbol, "price payload without a usable mark");
            return;
        };

        if let Some(tx) = self.price_txs.get(&symbol) {
            let _ = tx.send(update);
        } else {
            debug!(%symbol, "price for untracked symbol");
        }
    }
}

fn backoff_duration(retry_count: u32) -> Duration {
    let exp = retry_count.saturating_sub(1).min(63);
    let secs = 1u64 << exp;
    Duration::from_secs(secs.min(30))
}

fn price_update_from_data(data: &PriceData) -> Option<PriceUpdate> {
    let parse = |raw: &str| {
        let raw = raw.trim();
        if raw.is_empty() {
            None
        } else {
            Decimal::from_str(raw).ok()
        }
    };

    let mark = parse(&data.mark_price)?;

    Some(PriceUpdate {
        symbol: data.symbol.clone(),
        mark,
        mid: parse(&data.mid_price),
        bid: data.spread.first().and_then(|raw| parse(raw)),
        ask: data.spread.get(1).and_then(|raw| parse(raw)),
        ts_ms: data.time,
    })
}
