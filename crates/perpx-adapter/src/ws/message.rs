/*
[INPUT]:  Raw WebSocket message payloads
[OUTPUT]: Parsed message data structs
[POS]:    WebSocket layer - message parsing and validation
[UPDATE]: When adding new message types or changing format
*/

use serde::{Deserialize, Serialize};

/// Market price data pushed on the `price` channel.
///
/// All numeric fields arrive as strings; consumers parse into decimals and
/// drop payloads with unparseable required fields.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PriceData {
    pub symbol: String,
    pub mark_price: String,
    pub index_price: String,
    #[serde(default)]
    pub mid_price: String,
    #[serde(default)]
    pub last_price: String,
    /// Top of book as [bid, ask].
    #[serde(default)]
    pub spread: Vec<String>,
    /// Venue timestamp in epoch milliseconds.
    #[serde(default)]
    pub time: i64,
}
