//! Virtual operations the core emits for account history. These are never
//! submitted by users; persistence and history indexing consume them as an
//! ordered, deterministic stream.

use crate::types::{
    AccountId, AssetAmount, CallOrderId, LimitOrderId, Price, SettlementId, Timestamp,
};
use serde::{Deserialize, Serialize};

/// Which order a fill event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderRef {
    Limit(LimitOrderId),
    Call(CallOrderId),
    Settlement(SettlementId),
}

/// One side of a fill: what the order's owner paid, received, and was
/// charged. Every fill produces one event per participating order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillOrderEvent {
    pub order: OrderRef,
    pub account: AccountId,
    pub pays: AssetAmount,
    pub receives: AssetAmount,
    pub fee: AssetAmount,
    pub fill_price: Price,
    pub is_maker: bool,
}

/// A pending force settlement was cancelled and its balance refunded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettleCancelEvent {
    pub settlement: SettlementId,
    pub account: AccountId,
    pub amount: AssetAmount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventPayload {
    FillOrder(FillOrderEvent),
    SettleCancel(SettleCancelEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub sequence: u64,
    pub timestamp: Timestamp,
    pub payload: EventPayload,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AssetId, CORE_ASSET};

    #[test]
    fn events_serialize_round_trip() {
        let event = Event {
            sequence: 7,
            timestamp: Timestamp::from_secs(1_000),
            payload: EventPayload::FillOrder(FillOrderEvent {
                order: OrderRef::Limit(LimitOrderId(3)),
                account: AccountId(4),
                pays: AssetAmount::new(500, AssetId(1)),
                receives: AssetAmount::new(490, CORE_ASSET),
                fee: AssetAmount::new(10, CORE_ASSET),
                fill_price: Price::new(
                    AssetAmount::new(1, AssetId(1)),
                    AssetAmount::new(1, CORE_ASSET),
                ),
                is_maker: false,
            }),
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
