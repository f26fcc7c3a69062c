//! The ledger itself: exclusive owner of the store, single-threaded,
//! synchronous. One operation in, one result (or a rolled-back error) out,
//! plus zero or more virtual operations appended to the event journal.

use crate::account::{Account, AccountStatistics, COMMITTEE_ACCOUNT, TEMP_ACCOUNT, WITNESS_ACCOUNT};
use crate::asset::{AssetDynamicData, AssetObject, AssetOptions};
use crate::config::ChainConfig;
use crate::error::LedgerError;
use crate::events::{Event, EventPayload};
use crate::ops::{Operation, OperationResult};
use crate::store::Store;
use crate::types::{
    AccountId, AssetAmount, AssetId, Price, Timestamp, CORE_ASSET, MAX_SHARE_SUPPLY,
};
use std::collections::BTreeSet;

pub struct Ledger {
    pub(crate) config: ChainConfig,
    pub(crate) store: Store,
    events: Vec<Event>,
    next_event_sequence: u64,
    current_time: Timestamp,
}

impl Ledger {
    /// Build a ledger holding only the genesis fixtures: the core asset and
    /// the committee, witness and temp accounts.
    pub fn new(config: ChainConfig) -> Self {
        let mut store = Store::new();
        for _ in 0..3 {
            store.insert_account(|id| {
                Account::new(id, COMMITTEE_ACCOUNT, COMMITTEE_ACCOUNT, Timestamp::from_secs(0))
            });
        }
        debug_assert!(store.find_account(TEMP_ACCOUNT).is_some());
        debug_assert!(store.find_account(WITNESS_ACCOUNT).is_some());

        let core_cer = Price::new(
            AssetAmount::new(1, CORE_ASSET),
            AssetAmount::new(1, CORE_ASSET),
        );
        let core = AssetObject {
            id: CORE_ASSET,
            symbol: config.core_symbol.clone(),
            precision: config.core_precision,
            issuer: COMMITTEE_ACCOUNT,
            options: AssetOptions::new(MAX_SHARE_SUPPLY, core_cer),
            market_issued: false,
        };
        store.insert_asset(core, AssetDynamicData::default(), None);

        Self {
            config,
            store,
            events: Vec::new(),
            next_event_sequence: 0,
            current_time: Timestamp::from_secs(0),
        }
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn time(&self) -> Timestamp {
        self.current_time
    }

    pub fn set_time(&mut self, time: Timestamp) {
        self.current_time = time;
    }

    pub fn advance_time(&mut self, secs: i64) {
        self.current_time = self.current_time.plus_secs(secs);
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub(crate) fn push_event(&mut self, payload: EventPayload) {
        let event = Event {
            sequence: self.next_event_sequence,
            timestamp: self.current_time,
            payload,
        };
        self.next_event_sequence += 1;
        self.events.push(event);
    }

    /// Apply one validated operation. Atomic at the operation boundary: on
    /// any error the store and the event journal are restored, so no
    /// partial mutation is ever visible to the next operation.
    pub fn apply(&mut self, op: &Operation) -> Result<OperationResult, LedgerError> {
        let snapshot = self.store.clone();
        let events_len = self.events.len();
        let sequence = self.next_event_sequence;
        let result = self.apply_inner(op);
        if result.is_err() {
            self.store = snapshot;
            self.events.truncate(events_len);
            self.next_event_sequence = sequence;
        }
        result
    }

    fn apply_inner(&mut self, op: &Operation) -> Result<OperationResult, LedgerError> {
        match op {
            Operation::AssetCreate(op) => self.apply_asset_create(op),
            Operation::AssetUpdate(op) => self.apply_asset_update(op),
            Operation::AssetUpdateBitasset(op) => self.apply_asset_update_bitasset(op),
            Operation::AssetUpdateFeedProducers(op) => self.apply_asset_update_feed_producers(op),
            Operation::AssetUpdateIssuer(op) => self.apply_asset_update_issuer(op),
            Operation::AssetIssue(op) => self.apply_asset_issue(op),
            Operation::AssetReserve(op) => self.apply_asset_reserve(op),
            Operation::AssetFundFeePool(op) => self.apply_asset_fund_fee_pool(op),
            Operation::AssetSettle(op) => self.apply_asset_settle(op),
            Operation::AssetGlobalSettle(op) => self.apply_asset_global_settle(op),
            Operation::AssetPublishFeed(op) => self.apply_asset_publish_feed(op),
            Operation::AssetClaimFees(op) => self.apply_asset_claim_fees(op),
            Operation::AssetClaimPool(op) => self.apply_asset_claim_pool(op),
            Operation::LimitOrderCreate(op) => self.apply_limit_order_create(op),
            Operation::LimitOrderCancel(op) => self.apply_limit_order_cancel(op),
            Operation::CallOrderUpdate(op) => self.apply_call_order_update(op),
        }
    }

    // --- fee plumbing -----------------------------------------------------

    pub(crate) fn required_fee(&self, op: &Operation) -> i64 {
        match op {
            Operation::AssetCreate(_) => self.config.fees.asset_create,
            Operation::LimitOrderCreate(_) => self.config.fees.limit_order_create,
            _ => self.config.fees.default_fee,
        }
    }

    /// Deduct an operation fee from the payer, converting a non-CORE fee
    /// through the asset's fee pool at its core exchange rate. Returns the
    /// CORE-equivalent paid. When `credit_fee_buckets` the non-CORE amount
    /// accumulates to the fee asset immediately; limit orders defer that to
    /// first fill.
    pub(crate) fn deduct_fee(
        &mut self,
        payer: AccountId,
        fee: AssetAmount,
        required_core: i64,
        credit_fee_buckets: bool,
    ) -> Result<i64, LedgerError> {
        if fee.amount < 0 {
            return Err(LedgerError::precondition("negative fee"));
        }
        if fee.asset_id == CORE_ASSET {
            if fee.amount < required_core {
                return Err(LedgerError::precondition("insufficient fee"));
            }
            self.store
                .adjust_balance(payer, AssetAmount::new(-fee.amount, CORE_ASSET))?;
            return Ok(fee.amount);
        }
        let fee_asset = self.store.get_asset(fee.asset_id)?;
        let cer = fee_asset.options.core_exchange_rate;
        let core_equivalent = fee.mul_floor(&cer)?;
        if core_equivalent.asset_id != CORE_ASSET {
            return Err(LedgerError::precondition(
                "fee asset's exchange rate is not quoted in CORE",
            ));
        }
        if core_equivalent.amount < required_core {
            return Err(LedgerError::precondition("insufficient fee"));
        }
        if self.store.get_asset_dynamic(fee.asset_id)?.fee_pool < core_equivalent.amount {
            return Err(LedgerError::precondition("fee pool cannot cover the fee"));
        }
        self.store
            .adjust_balance(payer, AssetAmount::new(-fee.amount, fee.asset_id))?;
        let fee_amount = fee.amount;
        let core_amount = core_equivalent.amount;
        self.store.modify_asset_dynamic(fee.asset_id, |data| {
            data.fee_pool -= core_amount;
            if credit_fee_buckets {
                data.accumulated_fees += fee_amount;
            }
        })?;
        Ok(core_amount)
    }

    /// Standard fee path: deduct and book the CORE equivalent against the
    /// payer's statistics for the maintenance-interval cashback split.
    pub(crate) fn collect_fee(
        &mut self,
        payer: AccountId,
        fee: AssetAmount,
        required_core: i64,
    ) -> Result<i64, LedgerError> {
        let core_paid = self.deduct_fee(payer, fee, required_core, true)?;
        let threshold = self.config.cashback_vesting_threshold;
        self.store
            .modify_account(payer, |account| account.statistics.pay_fee(core_paid, threshold))?;
        Ok(core_paid)
    }

    /// Remove CORE from circulation (creation-fee burn).
    pub(crate) fn burn_core(&mut self, amount: i64) -> Result<(), LedgerError> {
        if amount == 0 {
            return Ok(());
        }
        self.store
            .modify_asset_dynamic(CORE_ASSET, |data| data.current_supply -= amount)
    }

    /// Route a fee denominated in the asset itself or in its backing asset
    /// into the matching accumulation bucket.
    pub(crate) fn accumulate_fee(
        &mut self,
        asset_id: AssetId,
        fee: AssetAmount,
    ) -> Result<(), LedgerError> {
        if fee.amount == 0 {
            return Ok(());
        }
        if fee.asset_id == asset_id {
            return self
                .store
                .modify_asset_dynamic(asset_id, |data| data.accumulated_fees += fee.amount);
        }
        let bitasset = self.store.get_bitasset(asset_id)?;
        if bitasset.options.short_backing_asset != fee.asset_id {
            return Err(LedgerError::invariant(
                "fee is in neither the asset nor its backing asset",
            ));
        }
        self.store
            .modify_asset_dynamic(asset_id, |data| data.accumulated_collateral_fees += fee.amount)
    }

    // --- bootstrap & caller-facing helpers --------------------------------

    /// Register an account. Account management proper is outside this core;
    /// the market needs identities with fee-routing lineage.
    pub fn register_account(
        &mut self,
        registrar: AccountId,
        referrer: AccountId,
        referrer_rewards_percentage: u16,
    ) -> AccountId {
        let created_at = self.current_time;
        self.store.insert_account(|id| {
            let mut account = Account::new(id, registrar, referrer, created_at);
            account.referrer_rewards_percentage = referrer_rewards_percentage;
            account
        })
    }

    /// Genesis/test bootstrap: credit a balance and grow the asset's supply
    /// to match, keeping the supply invariant intact.
    pub fn seed_balance(&mut self, account: AccountId, amount: AssetAmount) -> Result<(), LedgerError> {
        let max_supply = self.store.get_asset(amount.asset_id)?.options.max_supply;
        let supply = self.store.get_asset_dynamic(amount.asset_id)?.current_supply;
        if supply + amount.amount > max_supply {
            return Err(LedgerError::invariant("seed would exceed max supply"));
        }
        self.store.adjust_balance(account, amount)?;
        self.store
            .modify_asset_dynamic(amount.asset_id, |data| data.current_supply += amount.amount)
    }

    pub fn balance(&self, account: AccountId, asset: AssetId) -> i64 {
        self.store.get_balance(account, asset)
    }

    pub fn set_active_witnesses(&mut self, witnesses: BTreeSet<AccountId>) {
        self.store.set_active_witnesses(witnesses);
    }

    pub fn set_active_committee_members(&mut self, members: BTreeSet<AccountId>) {
        self.store.set_active_committee_members(members);
    }

    /// Grant `listee` a listing from `authority` (whitelist side).
    pub fn whitelist_account(
        &mut self,
        authority: AccountId,
        listee: AccountId,
    ) -> Result<(), LedgerError> {
        self.store.modify_account(listee, |account| {
            account.whitelisting_accounts.insert(authority);
        })
    }

    pub fn account_statistics(&self, account: AccountId) -> Result<AccountStatistics, LedgerError> {
        Ok(self.store.get_account(account)?.statistics)
    }

    /// Maintenance-period boundary: reset per-period force-settlement
    /// volume counters. Driven by the external block clock.
    pub fn reset_force_settled_volumes(&mut self) {
        for asset_id in self.store.bitasset_ids() {
            let _ = self.store.modify_bitasset(asset_id, |bitasset| {
                bitasset.force_settled_volume = 0;
            });
        }
    }
}
