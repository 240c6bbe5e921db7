/*
[INPUT]:  Order and query requests from the quoting engine
[OUTPUT]: Venue responses behind an object-safe async seam
[POS]:    Boundary layer - lets tests substitute the venue
[UPDATE]: When the engine needs new venue operations
*/

use std::future::Future;
use std::pin::Pin;

use perpx_adapter::{
    CancelOrderRequest, CancelOrderResponse, NewOrderRequest, NewOrderResponse, Order,
    PaginatedOrders, PerpxClient, Position, Result, SymbolInfo, SymbolPrice,
};

pub type ApiFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// The venue operations the quoting engine depends on.
pub trait ExchangeApi: Send + Sync {
    fn new_order(&self, req: NewOrderRequest) -> ApiFuture<'_, NewOrderResponse>;

    fn cancel_order(&self, req: CancelOrderRequest) -> ApiFuture<'_, CancelOrderResponse>;

    fn query_open_orders<'a>(&'a self, symbol: &'a str) -> ApiFuture<'a, PaginatedOrders>;

    fn query_order<'a>(&'a self, cl_ord_id: &'a str) -> ApiFuture<'a, Order>;

    fn query_positions<'a>(&'a self, symbol: &'a str) -> ApiFuture<'a, Vec<Position>>;

    fn query_symbol_price<'a>(&'a self, symbol: &'a str) -> ApiFuture<'a, SymbolPrice>;

    fn query_symbol_info<'a>(&'a self, symbol: &'a str) -> ApiFuture<'a, Vec<SymbolInfo>>;
}

impl ExchangeApi for PerpxClient {
    fn new_order(&self, req: NewOrderRequest) -> ApiFuture<'_, NewOrderResponse> {
        Box::pin(async move { PerpxClient::new_order(self, req).await })
    }

    fn cancel_order(&self, req: CancelOrderRequest) -> ApiFuture<'_, CancelOrderResponse> {
        Box::pin(async move { PerpxClient::cancel_order(self, req).await })
    }

    fn query_open_orders<'a>(&'a self, symbol: &'a str) -> ApiFuture<'a, PaginatedOrders> {
        Box::pin(async move { PerpxClient::query_open_orders(self, Some(symbol)).await })
    }

    fn query_order<'a>(&'a self, cl_ord_id: &'a str) -> ApiFuture<'a, Order> {
        Box::pin(async move { PerpxClient::query_order(self, cl_ord_id).await })
    }

    fn query_positions<'a>(&'a self, symbol: &'a str) -> ApiFuture<'a, Vec<Position>> {
        Box::pin(async move { PerpxClient::query_positions(self, Some(symbol)).await })
    }

    fn query_symbol_price<'a>(&'a self, symbol: &'a str) -> ApiFuture<'a, SymbolPrice> {
        Box::pin(async move { PerpxClient::query_symbol_price(self, symbol).await })
    }

    fn query_symbol_info<'a>(&'a self, symbol: &'a str) -> ApiFuture<'a, Vec<SymbolInfo>> {
        Box::pin(async move { PerpxClient::query_symbol_info(self, symbol).await })
    }
}
