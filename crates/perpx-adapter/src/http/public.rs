/*
[INPUT]:  Symbol identifiers and query parameters
[OUTPUT]: Market data (symbol info, prices)
[POS]:    HTTP layer - public market data endpoints (no auth required)
[UPDATE]: When adding new public endpoints or changing response format
*/

use reqwest::Method;

use crate::http::{PerpxClient, Result};
use crate::types::{SymbolInfo, SymbolPrice};

impl PerpxClient {
    /// Query symbol information
    ///
    /// GET /api/query_symbol_info?symbol={symbol}
    pub async fn query_symbol_info(&self, symbol: &str) -> Result<Vec<SymbolInfo>> {
        let endpoint = format!("/api/query_symbol_info?symbol={symbol}");
        let builder = self.request(Method::GET, &endpoint)?;
        self.send_json(builder).await
    }

    /// Query symbol price data (REST fallback for the push stream)
    ///
    /// GET /api/query_symbol_price?symbol={symbol}
    pub async fn query_symbol_price(&self, symbol: &str) -> Result<SymbolPrice> {
        let endpoint = format!("/api/query_symbol_price?symbol={symbol}");
        let builder = self.request(Method::GET, &endpoint)?;
        self.send_json(builder).await
    }
}
