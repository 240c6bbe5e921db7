/*
[INPUT]:  Query parameters and JWT authentication
[OUTPUT]: User account data (orders, positions, balances)
[POS]:    HTTP layer - user data endpoints (require JWT auth)
[UPDATE]: When adding new user endpoints or changing query parameters
*/

use reqwest::Method;

use crate::http::{PerpxClient, Result};
use crate::types::{Balance, Order, PaginatedOrders, Position};

impl PerpxClient {
    /// Query open orders for a symbol
    ///
    /// GET /api/query_open_orders?symbol={symbol}
    pub async fn query_open_orders(&self, symbol: Option<&str>) -> Result<PaginatedOrders> {
        let endpoint = if let Some(s) = symbol {
            format!("/api/query_open_orders?symbol={s}")
        } else {
            "/api/query_open_orders".to_string()
        };

        let builder = self.request_with_jwt(Method::GET, &endpoint)?;
        self.send_json(builder).await
    }

    /// Query a single order by client order id.
    ///
    /// GET /api/query_order?cl_ord_id={cl_ord_id}
    ///
    /// Returns HTTP 404 while the venue has not yet indexed a freshly placed
    /// order; callers decide how long that gap is tolerable.
    pub async fn query_order(&self, cl_ord_id: &str) -> Result<Order> {
        let endpoint = format!("/api/query_order?cl_ord_id={cl_ord_id}");
        let builder = self.request_with_jwt(Method::GET, &endpoint)?;
        self.send_json(builder).await
    }

    /// Query user positions
    ///
    /// GET /api/query_positions?symbol={symbol}
    pub async fn query_positions(&self, symbol: Option<&str>) -> Result<Vec<Position>> {
        let endpoint = if let Some(s) = symbol {
            format!("/api/query_positions?symbol={s}")
        } else {
            "/api/query_positions".to_string()
        };

        let builder = self.request_with_jwt(Method::GET, &endpoint)?;
        self.send_json(builder).await
    }

    /// Query user balance
    ///
    /// GET /api/query_balance
    pub async fn query_balance(&self) -> Result<Balance> {
        let builder = self.request_with_jwt(Method::GET, "/api/query_balance")?;
        self.send_json(builder).await
    }
}
