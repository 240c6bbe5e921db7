/*
[INPUT]:  WebSocket URL and per-symbol subscriptions
[OUTPUT]: Real-time market data via an mpsc channel
[POS]:    WebSocket layer - real-time data stream handling
[UPDATE]: When adding new channels or changing connection logic
*/

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::http::PerpxError;

const MARKET_STREAM_URL: &str = "wss://stream.perpx.exchange/ws/v1";
const MESSAGE_BUFFER: usize = 100;

/// WebSocket message types, discriminated by the `channel` field.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "channel")]
pub enum WebSocketMessage {
    #[serde(rename = "price")]
    Price {
        symbol: String,
        data: serde_json::Value,
    },
    #[serde(other)]
    Other,
}

/// WebSocket client for the Perpx market stream.
///
/// `connect_market_stream` spawns an I/O task that owns the socket; parsed
/// messages arrive on the receiver returned by `take_receiver`. When the
/// connection drops, the task exits and the receiver yields `None`, which is
/// the caller's reconnect signal.
#[derive(Debug)]
pub struct PerpxWebSocket {
    ws_url: String,
    message_rx: Option<mpsc::Receiver<WebSocketMessage>>,
    outbound_tx: Option<mpsc::UnboundedSender<String>>,
    io_handle: Option<JoinHandle<()>>,
}

impl PerpxWebSocket {
    /// Create a new WebSocket client against the production stream URL.
    pub fn new() -> Self {
        Self::with_url(MARKET_STREAM_URL)
    }

    /// Create a new WebSocket client against a custom stream URL.
    pub fn with_url(url: &str) -> Self {
        Self {
            ws_url: url.to_string(),
            message_rx: None,
            outbound_tx: None,
            io_handle: None,
        }
    }

    /// Get the message receiver for the current connection.
    pub fn take_receiver(&mut self) -> Option<mpsc::Receiver<WebSocketMessage>> {
        self.message_rx.take()
    }

    /// Connect to the market data stream (public).
    pub async fn connect_market_stream(&mut self) -> Result<(), PerpxError> {
        let (ws_stream, _) = connect_async(&self.ws_url)
            .await
            .map_err(|err| PerpxError::WebSocket(err.to_string()))?;

        let (mut write, mut read) = ws_stream.split();
        let (message_tx, message_rx) = mpsc::channel(MESSAGE_BUFFER);
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    outbound = outbound_rx.recv() => {
                        match outbound {
                            Some(text) => {
                                if write.send(Message::Text(text.into())).await.is_err() {
                                    break;
                                }
                            }
                            None => break,
                        }
                    }
                    inbound = read.next() => {
                        match inbound {
                            Some(Ok(Message::Text(text))) => {
                                match serde_json::from_str::<WebSocketMessage>(&text) {
                                    Ok(parsed) => {
                                        if message_tx.send(parsed).await.is_err() {
                                            break;
                                        }
                                    }
                                    Err(err) => {
                                        tracing::debug!(error = %err, "unparseable stream message");
                                    }
                                }
                            }
                            Some(Ok(Message::Ping(payload))) => {
                                if write.send(Message::Pong(payload)).await.is_err() {
                                    break;
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Ok(_)) => {}
                            Some(Err(err)) => {
                                tracing::debug!(error = %err, "market stream read failed");
                                break;
                            }
                        }
                    }
                }
            }
        });

        self.message_rx = Some(message_rx);
        self.outbound_tx = Some(outbound_tx);
        self.io_handle = Some(handle);
        Ok(())
    }

    /// Subscribe to price updates for a symbol.
    pub async fn subscribe_price(&self, symbol: &str) -> Result<(), PerpxError> {
        let msg = serde_json::json!({
            "subscribe": {
                "channel": "price",
                "symbol": symbol,
            }
        });
        self.send_subscription(msg)
    }

    fn send_subscription(&self, message: serde_json::Value) -> Result<(), PerpxError> {
        let tx = self
            .outbound_tx
            .as_ref()
            .ok_or_else(|| PerpxError::WebSocket("not connected".to_string()))?;

        tx.send(message.to_string())
            .map_err(|_| PerpxError::WebSocket("connection closed".to_string()))
    }
}

impl Default for PerpxWebSocket {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PerpxWebSocket {
    fn drop(&mut self) {
        if let Some(handle) = self.io_handle.take() {
            handle.abort();
        }
    }
}
