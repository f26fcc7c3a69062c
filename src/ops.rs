//! The closed set of operations this core consumes, collapsed from the
//! original's evaluator class hierarchy into one tagged variant dispatched
//! through a `(validate, apply)` pair per arm.

use crate::asset::{AssetOptions, BitassetOptions, PriceFeed};
use crate::types::{
    AccountId, AssetAmount, AssetId, CallOrderId, LimitOrderId, Price, SettlementId, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetCreate {
    pub fee: AssetAmount,
    pub issuer: AccountId,
    pub symbol: String,
    pub precision: u8,
    pub common_options: AssetOptions,
    pub bitasset_options: Option<BitassetOptions>,
    pub is_prediction_market: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetUpdate {
    pub fee: AssetAmount,
    pub issuer: AccountId,
    pub asset_to_update: AssetId,
    pub new_options: AssetOptions,
    pub new_precision: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetUpdateBitasset {
    pub fee: AssetAmount,
    pub issuer: AccountId,
    pub asset_to_update: AssetId,
    pub new_options: BitassetOptions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetUpdateFeedProducers {
    pub fee: AssetAmount,
    pub issuer: AccountId,
    pub asset_to_update: AssetId,
    pub new_feed_producers: BTreeSet<AccountId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetUpdateIssuer {
    pub fee: AssetAmount,
    pub issuer: AccountId,
    pub asset_to_update: AssetId,
    pub new_issuer: AccountId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetIssue {
    pub fee: AssetAmount,
    pub issuer: AccountId,
    pub asset_to_issue: AssetAmount,
    pub issue_to_account: AccountId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetReserve {
    pub fee: AssetAmount,
    pub payer: AccountId,
    pub amount_to_reserve: AssetAmount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetFundFeePool {
    pub fee: AssetAmount,
    pub from_account: AccountId,
    pub asset_id: AssetId,
    /// CORE amount moved into the pool.
    pub amount: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetSettle {
    pub fee: AssetAmount,
    pub account: AccountId,
    pub amount: AssetAmount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetGlobalSettle {
    pub fee: AssetAmount,
    pub issuer: AccountId,
    pub asset_to_settle: AssetId,
    /// Debt per collateral at which every position is force-closed.
    pub settle_price: Price,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetPublishFeed {
    pub fee: AssetAmount,
    pub publisher: AccountId,
    pub asset_id: AssetId,
    pub feed: PriceFeed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetClaimFees {
    pub fee: AssetAmount,
    pub issuer: AccountId,
    pub amount_to_claim: AssetAmount,
    /// Defaults to the claim asset itself; set to claim the backing-asset
    /// fee bucket of a market-issued container.
    pub claim_from_asset: Option<AssetId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetClaimPool {
    pub fee: AssetAmount,
    pub issuer: AccountId,
    pub asset_id: AssetId,
    /// CORE amount claimed out of the pool.
    pub amount_to_claim: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitOrderCreate {
    pub fee: AssetAmount,
    pub seller: AccountId,
    pub amount_to_sell: AssetAmount,
    pub min_to_receive: AssetAmount,
    pub expiration: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitOrderCancel {
    pub fee: AssetAmount,
    pub fee_paying_account: AccountId,
    pub order: LimitOrderId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallOrderUpdate {
    pub fee: AssetAmount,
    pub funding_account: AccountId,
    /// Backing asset added to (or, negative, withdrawn from) the position.
    pub delta_collateral: AssetAmount,
    /// Debt borrowed (or, negative, repaid).
    pub delta_debt: AssetAmount,
    pub target_collateral_ratio: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    AssetCreate(AssetCreate),
    AssetUpdate(AssetUpdate),
    AssetUpdateBitasset(AssetUpdateBitasset),
    AssetUpdateFeedProducers(AssetUpdateFeedProducers),
    AssetUpdateIssuer(AssetUpdateIssuer),
    AssetIssue(AssetIssue),
    AssetReserve(AssetReserve),
    AssetFundFeePool(AssetFundFeePool),
    AssetSettle(AssetSettle),
    AssetGlobalSettle(AssetGlobalSettle),
    AssetPublishFeed(AssetPublishFeed),
    AssetClaimFees(AssetClaimFees),
    AssetClaimPool(AssetClaimPool),
    LimitOrderCreate(LimitOrderCreate),
    LimitOrderCancel(LimitOrderCancel),
    CallOrderUpdate(CallOrderUpdate),
}

impl Operation {
    pub fn fee(&self) -> AssetAmount {
        match self {
            Operation::AssetCreate(op) => op.fee,
            Operation::AssetUpdate(op) => op.fee,
            Operation::AssetUpdateBitasset(op) => op.fee,
            Operation::AssetUpdateFeedProducers(op) => op.fee,
            Operation::AssetUpdateIssuer(op) => op.fee,
            Operation::AssetIssue(op) => op.fee,
            Operation::AssetReserve(op) => op.fee,
            Operation::AssetFundFeePool(op) => op.fee,
            Operation::AssetSettle(op) => op.fee,
            Operation::AssetGlobalSettle(op) => op.fee,
            Operation::AssetPublishFeed(op) => op.fee,
            Operation::AssetClaimFees(op) => op.fee,
            Operation::AssetClaimPool(op) => op.fee,
            Operation::LimitOrderCreate(op) => op.fee,
            Operation::LimitOrderCancel(op) => op.fee,
            Operation::CallOrderUpdate(op) => op.fee,
        }
    }

    pub fn fee_payer(&self) -> AccountId {
        match self {
            Operation::AssetCreate(op) => op.issuer,
            Operation::AssetUpdate(op) => op.issuer,
            Operation::AssetUpdateBitasset(op) => op.issuer,
            Operation::AssetUpdateFeedProducers(op) => op.issuer,
            Operation::AssetUpdateIssuer(op) => op.issuer,
            Operation::AssetIssue(op) => op.issuer,
            Operation::AssetReserve(op) => op.payer,
            Operation::AssetFundFeePool(op) => op.from_account,
            Operation::AssetSettle(op) => op.account,
            Operation::AssetGlobalSettle(op) => op.issuer,
            Operation::AssetPublishFeed(op) => op.publisher,
            Operation::AssetClaimFees(op) => op.issuer,
            Operation::AssetClaimPool(op) => op.issuer,
            Operation::LimitOrderCreate(op) => op.seller,
            Operation::LimitOrderCancel(op) => op.fee_paying_account,
            Operation::CallOrderUpdate(op) => op.funding_account,
        }
    }
}

/// What an applied operation produced, mirroring the original's
/// `operation_result` variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationResult {
    Void,
    NewAsset(AssetId),
    NewLimitOrder(LimitOrderId),
    /// Resulting position; `None` when the update closed it.
    CallOrder(Option<CallOrderId>),
    NewSettlement(SettlementId),
    /// Collateral paid out by an instant settlement against the fund.
    SettledAmount(AssetAmount),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CORE_ASSET;

    #[test]
    fn fee_payer_follows_the_variant() {
        let op = Operation::AssetReserve(AssetReserve {
            fee: AssetAmount::new(100, CORE_ASSET),
            payer: AccountId(7),
            amount_to_reserve: AssetAmount::new(10, AssetId(1)),
        });
        assert_eq!(op.fee_payer(), AccountId(7));
        assert_eq!(op.fee(), AssetAmount::new(100, CORE_ASSET));
    }

    #[test]
    fn operations_serialize_round_trip() {
        let op = Operation::LimitOrderCreate(LimitOrderCreate {
            fee: AssetAmount::new(10, CORE_ASSET),
            seller: AccountId(3),
            amount_to_sell: AssetAmount::new(1_000, AssetId(1)),
            min_to_receive: AssetAmount::new(900, CORE_ASSET),
            expiration: Timestamp::from_secs(10_000),
        });
        let json = serde_json::to_string(&op).unwrap();
        let back: Operation = serde_json::from_str(&json).unwrap();
        assert_eq!(back, op);
    }
}
