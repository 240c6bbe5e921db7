/*
[INPUT]:  API schema definitions and serde requirements
[OUTPUT]: Typed Rust structs with serialization support
[POS]:    Data layer - type definitions for API communication
[UPDATE]: When API schema changes or new types added
*/

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::enums::{MarginMode, OrderStatus, OrderType, Side, TimeInForce};

/// Exchange-imposed constants for a tradable symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub min_order_qty: Decimal,
    pub price_tick_decimals: u32,
    pub qty_tick_decimals: u32,
    #[serde(with = "rust_decimal::serde::str")]
    pub maker_fee: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub taker_fee: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub max_leverage: Decimal,
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub cl_ord_id: String,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub status: OrderStatus,
    pub time_in_force: TimeInForce,
    #[serde(with = "rust_decimal::serde::str_option")]
    pub price: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::str")]
    pub qty: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub fill_qty: Decimal,
    #[serde(
        default,
        deserialize_with = "serde_helpers::deserialize_decimal_or_zero",
        serialize_with = "serde_helpers::serialize_decimal"
    )]
    pub fill_avg_price: Decimal,
    pub reduce_only: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: i64,
    pub symbol: String,
    pub margin_mode: MarginMode,
    #[serde(
        default,
        deserialize_with = "serde_helpers::deserialize_decimal_or_zero",
        serialize_with = "serde_helpers::serialize_decimal"
    )]
    pub qty: Decimal,
    #[serde(
        default,
        deserialize_with = "serde_helpers::deserialize_decimal_or_zero",
        serialize_with = "serde_helpers::serialize_decimal"
    )]
    pub entry_price: Decimal,
    #[serde(
        default,
        deserialize_with = "serde_helpers::deserialize_decimal_or_zero",
        serialize_with = "serde_helpers::serialize_decimal"
    )]
    pub mark_price: Decimal,
    #[serde(
        default,
        deserialize_with = "serde_helpers::deserialize_decimal_or_zero",
        serialize_with = "serde_helpers::serialize_decimal"
    )]
    pub position_value: Decimal,
    #[serde(
        default,
        deserialize_with = "serde_helpers::deserialize_decimal_or_zero",
        serialize_with = "serde_helpers::serialize_decimal"
    )]
    pub liq_price: Decimal,
    #[serde(
        default,
        deserialize_with = "serde_helpers::deserialize_decimal_or_zero",
        serialize_with = "serde_helpers::serialize_decimal"
    )]
    pub upnl: Decimal,
    pub status: String,
    pub updated_at: String,
}

impl Position {
    /// Side of the open position, `None` when flat.
    pub fn side(&self) -> Option<Side> {
        if self.qty.is_zero() {
            None
        } else if self.qty.is_sign_positive() {
            Some(Side::Buy)
        } else {
            Some(Side::Sell)
        }
    }

    /// Absolute notional exposure in quote currency.
    pub fn notional(&self) -> Decimal {
        self.position_value.abs()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    #[serde(with = "rust_decimal::serde::str")]
    pub balance: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub equity: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub locked: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub cross_available: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub cross_margin: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub upnl: Decimal,
}

/// REST snapshot of a symbol's price surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolPrice {
    pub symbol: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub mark_price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub index_price: Decimal,
    #[serde(with = "rust_decimal::serde::str_option")]
    pub mid_price: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::str_option")]
    pub last_price: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::str_option")]
    pub spread_bid: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::str_option")]
    pub spread_ask: Option<Decimal>,
    pub time: String,
}

mod serde_helpers {
    use super::Decimal;
    use serde::{Deserialize, Deserializer, Serializer};
    use serde_json::Value;
    use std::str::FromStr;

    pub fn deserialize_decimal_or_zero<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        if value.is_null() {
            return Ok(Decimal::ZERO);
        }

        if let Some(raw) = value.as_str() {
            if raw.trim().is_empty() {
                return Ok(Decimal::ZERO);
            }
            return Decimal::from_str(raw).map_err(serde::de::Error::custom);
        }

        if value.is_number() {
            return Decimal::from_str(&value.to_string()).map_err(serde::de::Error::custom);
        }

        Err(serde::de::Error::custom("invalid decimal value"))
    }

    pub fn serialize_decimal<S>(value: &Decimal, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn order_deserializes_without_fill_avg_price() {
        let value = json!({
            "id": 1,
            "cl_ord_id": "cl-1",
            "symbol": "BTC-USD",
            "side": "buy",
            "order_type": "limit",
            "status": "open",
            "time_in_force": "alo",
            "price": "94000.0",
            "qty": "0.0001",
            "fill_qty": "0",
            "reduce_only": false,
            "created_at": "0",
            "updated_at": "0"
        });

        let order: Order = serde_json::from_value(value).expect("order should deserialize");
        assert_eq!(order.fill_avg_price, Decimal::ZERO);
    }

    #[test]
    fn position_side_follows_signed_qty() {
        let value = json!({
            "id": 7,
            "symbol": "BTC-USD",
            "margin_mode": "cross",
            "qty": "-0.5",
            "entry_price": "94000",
            "mark_price": "94100",
            "position_value": "-47050",
            "liq_price": "0",
            "upnl": "0",
            "status": "open",
            "updated_at": "0"
        });

        let position: Position = serde_json::from_value(value).expect("position deserializes");
        assert_eq!(position.side(), Some(Side::Sell));
        assert_eq!(position.notional(), Decimal::from(47050));
    }

    #[test]
    fn order_status_accepts_both_cancelled_spellings() {
        let canceled: OrderStatus = serde_json::from_value(json!("canceled")).unwrap();
        let cancelled: OrderStatus = serde_json::from_value(json!("cancelled")).unwrap();
        assert_eq!(canceled, OrderStatus::Cancelled);
        assert_eq!(cancelled, OrderStatus::Cancelled);
    }
}
