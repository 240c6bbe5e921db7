/*
[INPUT]:  Order requests with body signature headers
[OUTPUT]: Order responses and confirmation
[POS]:    HTTP layer - trading endpoints (require auth + body signature)
[UPDATE]: When adding new trading endpoints or changing order flow
*/

use crate::http::{PerpxClient, Result};
use crate::types::{CancelOrderRequest, CancelOrderResponse, NewOrderRequest, NewOrderResponse};

impl PerpxClient {
    /// Create a new order
    ///
    /// POST /api/new_order
    /// Requires: Authorization header + body signature headers
    pub async fn new_order(&self, req: NewOrderRequest) -> Result<NewOrderResponse> {
        let payload = serde_json::to_string(&req)?;
        let builder = self.post_signed("/api/new_order", payload)?;
        self.send_json(builder).await
    }

    /// Cancel an existing order
    ///
    /// POST /api/cancel_order
    /// Requires: Authorization header + body signature headers
    pub async fn cancel_order(&self, req: CancelOrderRequest) -> Result<CancelOrderResponse> {
        let payload = serde_json::to_string(&req)?;
        let builder = self.post_signed("/api/cancel_order", payload)?;
        self.send_json(builder).await
    }
}
