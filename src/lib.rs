//! Deterministic market core for an account-based ledger: fungible assets
//! (user-issued and collateral-backed), a continuous double auction with
//! margin-call integration, price feeds, force settlement and global
//! settlement.
//!
//! All computation is exact integer arithmetic with explicit rounding
//! direction; every node applying the same operations in the same order
//! reproduces the same state and the same event stream bit for bit. The
//! core is single-threaded and synchronous, and owns no I/O: signing,
//! persistence, networking and consensus are callers' concerns.

pub mod account;
pub mod asset;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod ops;
pub mod orders;
pub mod store;
pub mod types;

pub use account::{Account, AccountStatistics, COMMITTEE_ACCOUNT, TEMP_ACCOUNT, WITNESS_ACCOUNT};
pub use asset::{
    asset_flags, AssetDynamicData, AssetObject, AssetOptions, BitassetData, BitassetOptions,
    PriceFeed,
};
pub use config::{ChainConfig, FeeSchedule};
pub use engine::Ledger;
pub use error::{ErrorKind, LedgerError};
pub use events::{Event, EventPayload, FillOrderEvent, OrderRef, SettleCancelEvent};
pub use ops::{
    AssetClaimFees, AssetClaimPool, AssetCreate, AssetFundFeePool, AssetGlobalSettle, AssetIssue,
    AssetPublishFeed, AssetReserve, AssetSettle, AssetUpdate, AssetUpdateBitasset,
    AssetUpdateFeedProducers, AssetUpdateIssuer, CallOrderUpdate, LimitOrderCancel,
    LimitOrderCreate, Operation, OperationResult,
};
pub use orders::{CallOrder, ForceSettlement, LimitOrder};
pub use store::Store;
pub use types::{
    percent, AccountId, AssetAmount, AssetId, CallOrderId, LimitOrderId, Price, SettlementId,
    Timestamp, COLLATERAL_RATIO_DENOM, CORE_ASSET, HUNDRED_PERCENT, MAX_SHARE_SUPPLY,
};
