/*
[INPUT]:  Strategy and order-manager state transitions
[OUTPUT]: Typed engine events on an mpsc channel for front-end consumers
[POS]:    Event layer - one-way notification surface, no trading logic
[UPDATE]: When adding new event kinds or changing event payloads
*/

use rust_decimal::Decimal;

use perpx_adapter::Side;

/// Events emitted by the quoting engine for downstream consumers.
///
/// The engine never waits on the consumer; events ride an unbounded channel
/// and dropped receivers are ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    OrderPlaced {
        symbol: String,
        side: Side,
        slot: u8,
        price: Decimal,
        qty: Decimal,
    },
    OrderCancelled {
        symbol: String,
        client_id: String,
    },
    OrderFilled {
        symbol: String,
        side: Side,
        qty: Decimal,
        price: Decimal,
    },
    Rebalance {
        symbol: String,
        reference: Decimal,
    },
    SafetyTriggered {
        symbol: String,
        reason: String,
    },
    EmergencyStop {
        symbol: String,
        reason: String,
    },
}

impl EngineEvent {
    pub fn symbol(&self) -> &str {
        match self {
            EngineEvent::OrderPlaced { symbol, .. }
            | EngineEvent::OrderCancelled { symbol, .. }
            | EngineEvent::OrderFilled { symbol, .. }
            | EngineEvent::Rebalance { symbol, .. }
            | EngineEvent::SafetyTriggered { symbol, .. }
            | EngineEvent::EmergencyStop { symbol, .. } => symbol,
        }
    }
}
