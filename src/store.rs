//! In-memory entity tables with the ordered secondary indices the matching
//! engine iterates: the book (price descending per pair), the margin-call
//! queue (collateralization ascending per debt asset), and the settlement
//! queue (date ascending per asset).
//!
//! Mutations go through the `modify_*` gateways so secondary keys are
//! re-derived atomically. Matching loops never hold an iterator across a
//! mutation; they re-establish their position from a key each round.

use crate::account::Account;
use crate::asset::{AssetDynamicData, AssetObject, BitassetData};
use crate::error::LedgerError;
use crate::orders::{CallOrder, ForceSettlement, LimitOrder};
use crate::types::{
    AccountId, AssetAmount, AssetId, CallOrderId, LimitOrderId, SettlementId, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

/// Book index key: asset pair ascending, then price descending by
/// cross-product, then id ascending. The first key of a pair range is the
/// best offer (selling the most base per quote).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct BookKey {
    sell_asset: AssetId,
    receive_asset: AssetId,
    price_base: i64,
    price_quote: i64,
    id: LimitOrderId,
}

impl BookKey {
    fn of(order: &LimitOrder) -> Self {
        Self {
            sell_asset: order.sell_asset_id(),
            receive_asset: order.receive_asset_id(),
            price_base: order.sell_price.base.amount,
            price_quote: order.sell_price.quote.amount,
            id: order.id,
        }
    }

    /// Sentinel bracketing every real key of the pair from the best side.
    fn pair_start(sell_asset: AssetId, receive_asset: AssetId) -> Self {
        Self {
            sell_asset,
            receive_asset,
            price_base: i64::MAX,
            price_quote: 1,
            id: LimitOrderId(0),
        }
    }

    fn pair_end(sell_asset: AssetId, receive_asset: AssetId) -> Self {
        Self {
            sell_asset,
            receive_asset,
            price_base: 0,
            price_quote: 1,
            id: LimitOrderId(u64::MAX),
        }
    }
}

impl Ord for BookKey {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.sell_asset, self.receive_asset)
            .cmp(&(other.sell_asset, other.receive_asset))
            .then_with(|| {
                // price descending: a key sorts first when its ratio is larger
                let lhs = other.price_base as i128 * self.price_quote as i128;
                let rhs = self.price_base as i128 * other.price_quote as i128;
                lhs.cmp(&rhs)
            })
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for BookKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Margin-call queue key: debt asset ascending, then collateral/debt ratio
/// ascending (least collateralized first), then id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct CallKey {
    debt_asset: AssetId,
    collateral: i64,
    debt: i64,
    id: CallOrderId,
}

impl CallKey {
    fn of(order: &CallOrder) -> Self {
        Self {
            debt_asset: order.debt_asset,
            collateral: order.collateral,
            debt: order.debt,
            id: order.id,
        }
    }

    fn asset_start(debt_asset: AssetId) -> Self {
        Self {
            debt_asset,
            collateral: 0,
            debt: 1,
            id: CallOrderId(0),
        }
    }

    fn asset_end(debt_asset: AssetId) -> Self {
        Self {
            debt_asset,
            collateral: i64::MAX,
            debt: 1,
            id: CallOrderId(u64::MAX),
        }
    }
}

impl Ord for CallKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.debt_asset
            .cmp(&other.debt_asset)
            .then_with(|| {
                let lhs = self.collateral as i128 * other.debt as i128;
                let rhs = other.collateral as i128 * self.debt as i128;
                lhs.cmp(&rhs)
            })
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for CallKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
struct SettleKey {
    asset: AssetId,
    date: Timestamp,
    id: SettlementId,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Store {
    assets: BTreeMap<AssetId, AssetObject>,
    asset_dynamic: BTreeMap<AssetId, AssetDynamicData>,
    bitassets: BTreeMap<AssetId, BitassetData>,
    asset_by_symbol: BTreeMap<String, AssetId>,
    bitassets_by_backing: BTreeSet<(AssetId, AssetId)>,

    accounts: BTreeMap<AccountId, Account>,
    balances: BTreeMap<(AccountId, AssetId), i64>,
    market_fee_vesting: BTreeMap<(AccountId, AssetId), i64>,
    active_witnesses: BTreeSet<AccountId>,
    active_committee_members: BTreeSet<AccountId>,

    limit_orders: BTreeMap<LimitOrderId, LimitOrder>,
    book: BTreeSet<BookKey>,
    call_orders: BTreeMap<CallOrderId, CallOrder>,
    call_index: BTreeSet<CallKey>,
    call_by_account: BTreeMap<(AccountId, AssetId), CallOrderId>,
    settlements: BTreeMap<SettlementId, ForceSettlement>,
    settlement_index: BTreeSet<SettleKey>,

    next_asset_id: u32,
    next_account_id: u64,
    next_limit_order_id: u64,
    next_call_order_id: u64,
    next_settlement_id: u64,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    // --- assets -----------------------------------------------------------

    pub fn peek_next_asset_id(&self) -> AssetId {
        AssetId(self.next_asset_id)
    }

    pub fn insert_asset(
        &mut self,
        asset: AssetObject,
        dynamic: AssetDynamicData,
        bitasset: Option<BitassetData>,
    ) -> AssetId {
        let id = asset.id;
        debug_assert_eq!(id.0, self.next_asset_id);
        self.next_asset_id += 1;
        self.asset_by_symbol.insert(asset.symbol.clone(), id);
        self.asset_dynamic.insert(id, dynamic);
        if let Some(bitasset) = bitasset {
            self.bitassets_by_backing
                .insert((bitasset.options.short_backing_asset, id));
            self.bitassets.insert(id, bitasset);
        }
        self.assets.insert(id, asset);
        id
    }

    pub fn get_asset(&self, id: AssetId) -> Result<&AssetObject, LedgerError> {
        self.assets.get(&id).ok_or(LedgerError::NotFound("asset"))
    }

    pub fn find_asset(&self, id: AssetId) -> Option<&AssetObject> {
        self.assets.get(&id)
    }

    pub fn asset_id_by_symbol(&self, symbol: &str) -> Option<AssetId> {
        self.asset_by_symbol.get(symbol).copied()
    }

    pub fn modify_asset(
        &mut self,
        id: AssetId,
        mutate: impl FnOnce(&mut AssetObject),
    ) -> Result<(), LedgerError> {
        let asset = self.assets.get_mut(&id).ok_or(LedgerError::NotFound("asset"))?;
        mutate(asset);
        Ok(())
    }

    pub fn get_asset_dynamic(&self, id: AssetId) -> Result<&AssetDynamicData, LedgerError> {
        self.asset_dynamic
            .get(&id)
            .ok_or(LedgerError::NotFound("asset dynamic data"))
    }

    pub fn modify_asset_dynamic(
        &mut self,
        id: AssetId,
        mutate: impl FnOnce(&mut AssetDynamicData),
    ) -> Result<(), LedgerError> {
        let data = self
            .asset_dynamic
            .get_mut(&id)
            .ok_or(LedgerError::NotFound("asset dynamic data"))?;
        mutate(data);
        if data.current_supply < 0
            || data.accumulated_fees < 0
            || data.accumulated_collateral_fees < 0
            || data.fee_pool < 0
        {
            return Err(LedgerError::invariant("asset dynamic data went negative"));
        }
        Ok(())
    }

    pub fn get_bitasset(&self, id: AssetId) -> Result<&BitassetData, LedgerError> {
        self.bitassets
            .get(&id)
            .ok_or(LedgerError::NotFound("bitasset data"))
    }

    pub fn find_bitasset(&self, id: AssetId) -> Option<&BitassetData> {
        self.bitassets.get(&id)
    }

    pub fn modify_bitasset(
        &mut self,
        id: AssetId,
        mutate: impl FnOnce(&mut BitassetData),
    ) -> Result<(), LedgerError> {
        let bitasset = self
            .bitassets
            .get_mut(&id)
            .ok_or(LedgerError::NotFound("bitasset data"))?;
        let old_backing = bitasset.options.short_backing_asset;
        mutate(bitasset);
        let new_backing = bitasset.options.short_backing_asset;
        if new_backing != old_backing {
            self.bitassets_by_backing.remove(&(old_backing, id));
            self.bitassets_by_backing.insert((new_backing, id));
        }
        Ok(())
    }

    pub fn bitasset_ids(&self) -> Vec<AssetId> {
        self.bitassets.keys().copied().collect()
    }

    /// Bitassets that name `backing` as their backing asset.
    pub fn bitassets_backed_by(&self, backing: AssetId) -> Vec<AssetId> {
        self.bitassets_by_backing
            .range((backing, AssetId(0))..=(backing, AssetId(u32::MAX)))
            .map(|(_, child)| *child)
            .collect()
    }

    // --- accounts & balances ---------------------------------------------

    pub fn insert_account(&mut self, build: impl FnOnce(AccountId) -> Account) -> AccountId {
        let id = AccountId(self.next_account_id);
        self.next_account_id += 1;
        let account = build(id);
        debug_assert_eq!(account.id, id);
        self.accounts.insert(id, account);
        id
    }

    pub fn get_account(&self, id: AccountId) -> Result<&Account, LedgerError> {
        self.accounts.get(&id).ok_or(LedgerError::NotFound("account"))
    }

    pub fn find_account(&self, id: AccountId) -> Option<&Account> {
        self.accounts.get(&id)
    }

    pub fn modify_account(
        &mut self,
        id: AccountId,
        mutate: impl FnOnce(&mut Account),
    ) -> Result<(), LedgerError> {
        let account = self.accounts.get_mut(&id).ok_or(LedgerError::NotFound("account"))?;
        mutate(account);
        Ok(())
    }

    pub fn get_balance(&self, account: AccountId, asset: AssetId) -> i64 {
        self.balances.get(&(account, asset)).copied().unwrap_or(0)
    }

    /// Credit or debit a balance; debits below zero are rejected.
    pub fn adjust_balance(&mut self, account: AccountId, delta: AssetAmount) -> Result<(), LedgerError> {
        if delta.amount == 0 {
            return Ok(());
        }
        let entry = self.balances.entry((account, delta.asset_id)).or_insert(0);
        let updated = *entry + delta.amount;
        if updated < 0 {
            return Err(LedgerError::InsufficientBalance(account));
        }
        *entry = updated;
        Ok(())
    }

    pub fn deposit_market_fee_vesting(&mut self, account: AccountId, amount: AssetAmount) {
        if amount.amount == 0 {
            return;
        }
        *self
            .market_fee_vesting
            .entry((account, amount.asset_id))
            .or_insert(0) += amount.amount;
    }

    pub fn market_fee_vesting_balance(&self, account: AccountId, asset: AssetId) -> i64 {
        self.market_fee_vesting
            .get(&(account, asset))
            .copied()
            .unwrap_or(0)
    }

    pub fn set_active_witnesses(&mut self, witnesses: BTreeSet<AccountId>) {
        self.active_witnesses = witnesses;
    }

    pub fn set_active_committee_members(&mut self, members: BTreeSet<AccountId>) {
        self.active_committee_members = members;
    }

    pub fn is_active_witness(&self, account: AccountId) -> bool {
        self.active_witnesses.contains(&account)
    }

    pub fn is_active_committee_member(&self, account: AccountId) -> bool {
        self.active_committee_members.contains(&account)
    }

    // --- limit orders -----------------------------------------------------

    pub fn next_limit_order_id(&mut self) -> LimitOrderId {
        let id = LimitOrderId(self.next_limit_order_id);
        self.next_limit_order_id += 1;
        id
    }

    pub fn insert_limit_order(&mut self, order: LimitOrder) {
        self.book.insert(BookKey::of(&order));
        self.limit_orders.insert(order.id, order);
    }

    pub fn get_limit_order(&self, id: LimitOrderId) -> Result<&LimitOrder, LedgerError> {
        self.limit_orders
            .get(&id)
            .ok_or(LedgerError::NotFound("limit order"))
    }

    pub fn find_limit_order(&self, id: LimitOrderId) -> Option<&LimitOrder> {
        self.limit_orders.get(&id)
    }

    pub fn modify_limit_order(
        &mut self,
        id: LimitOrderId,
        mutate: impl FnOnce(&mut LimitOrder),
    ) -> Result<(), LedgerError> {
        let order = self
            .limit_orders
            .get_mut(&id)
            .ok_or(LedgerError::NotFound("limit order"))?;
        let old_key = BookKey::of(order);
        mutate(order);
        let new_key = BookKey::of(order);
        if new_key != old_key {
            self.book.remove(&old_key);
            self.book.insert(new_key);
        }
        Ok(())
    }

    pub fn remove_limit_order(&mut self, id: LimitOrderId) -> Option<LimitOrder> {
        let order = self.limit_orders.remove(&id)?;
        self.book.remove(&BookKey::of(&order));
        Some(order)
    }

    /// Whether this order is strictly at the front of its side of the book
    /// (no better price, no equal price with an earlier id).
    pub fn is_front_of_book(&self, order: &LimitOrder) -> bool {
        let start = BookKey::pair_start(order.sell_asset_id(), order.receive_asset_id());
        let end = BookKey::pair_end(order.sell_asset_id(), order.receive_asset_id());
        match self.book.range(start..=end).next() {
            Some(first) => first.id == order.id,
            None => false,
        }
    }

    /// Best order selling `sell_asset` for `receive_asset`, if any.
    pub fn best_order_of_pair(
        &self,
        sell_asset: AssetId,
        receive_asset: AssetId,
    ) -> Option<&LimitOrder> {
        let start = BookKey::pair_start(sell_asset, receive_asset);
        let end = BookKey::pair_end(sell_asset, receive_asset);
        let key = self.book.range(start..=end).next()?;
        self.limit_orders.get(&key.id)
    }

    pub fn limit_orders_of_pair(
        &self,
        sell_asset: AssetId,
        receive_asset: AssetId,
    ) -> impl Iterator<Item = &LimitOrder> {
        let start = BookKey::pair_start(sell_asset, receive_asset);
        let end = BookKey::pair_end(sell_asset, receive_asset);
        self.book
            .range(start..=end)
            .filter_map(move |key| self.limit_orders.get(&key.id))
    }

    pub fn limit_orders(&self) -> impl Iterator<Item = &LimitOrder> {
        self.limit_orders.values()
    }

    // --- call orders ------------------------------------------------------

    pub fn next_call_order_id(&mut self) -> CallOrderId {
        let id = CallOrderId(self.next_call_order_id);
        self.next_call_order_id += 1;
        id
    }

    pub fn insert_call_order(&mut self, order: CallOrder) {
        debug_assert!(order.debt > 0 && order.collateral > 0);
        self.call_index.insert(CallKey::of(&order));
        self.call_by_account
            .insert((order.borrower, order.debt_asset), order.id);
        self.call_orders.insert(order.id, order);
    }

    pub fn get_call_order(&self, id: CallOrderId) -> Result<&CallOrder, LedgerError> {
        self.call_orders
            .get(&id)
            .ok_or(LedgerError::NotFound("call order"))
    }

    pub fn find_call_order(&self, id: CallOrderId) -> Option<&CallOrder> {
        self.call_orders.get(&id)
    }

    pub fn find_call_order_by_account(
        &self,
        borrower: AccountId,
        debt_asset: AssetId,
    ) -> Option<&CallOrder> {
        let id = self.call_by_account.get(&(borrower, debt_asset))?;
        self.call_orders.get(id)
    }

    pub fn modify_call_order(
        &mut self,
        id: CallOrderId,
        mutate: impl FnOnce(&mut CallOrder),
    ) -> Result<(), LedgerError> {
        let order = self
            .call_orders
            .get_mut(&id)
            .ok_or(LedgerError::NotFound("call order"))?;
        let old_key = CallKey::of(order);
        mutate(order);
        if order.debt <= 0 || order.collateral < 0 {
            return Err(LedgerError::invariant("call order drained through modify"));
        }
        let new_key = CallKey::of(order);
        if new_key != old_key {
            self.call_index.remove(&old_key);
            self.call_index.insert(new_key);
        }
        Ok(())
    }

    pub fn remove_call_order(&mut self, id: CallOrderId) -> Option<CallOrder> {
        let order = self.call_orders.remove(&id)?;
        self.call_index.remove(&CallKey::of(&order));
        self.call_by_account.remove(&(order.borrower, order.debt_asset));
        Some(order)
    }

    /// The least collateralized position owing `debt_asset`.
    pub fn least_collateralized_call(&self, debt_asset: AssetId) -> Option<&CallOrder> {
        let start = CallKey::asset_start(debt_asset);
        let end = CallKey::asset_end(debt_asset);
        let key = self.call_index.range(start..=end).next()?;
        self.call_orders.get(&key.id)
    }

    pub fn call_orders_of_asset(&self, debt_asset: AssetId) -> impl Iterator<Item = &CallOrder> {
        let start = CallKey::asset_start(debt_asset);
        let end = CallKey::asset_end(debt_asset);
        self.call_index
            .range(start..=end)
            .filter_map(move |key| self.call_orders.get(&key.id))
    }

    pub fn call_orders(&self) -> impl Iterator<Item = &CallOrder> {
        self.call_orders.values()
    }

    // --- force settlements ------------------------------------------------

    pub fn next_settlement_id(&mut self) -> SettlementId {
        let id = SettlementId(self.next_settlement_id);
        self.next_settlement_id += 1;
        id
    }

    pub fn insert_settlement(&mut self, settlement: ForceSettlement) {
        self.settlement_index.insert(SettleKey {
            asset: settlement.balance.asset_id,
            date: settlement.settlement_date,
            id: settlement.id,
        });
        self.settlements.insert(settlement.id, settlement);
    }

    pub fn get_settlement(&self, id: SettlementId) -> Result<&ForceSettlement, LedgerError> {
        self.settlements
            .get(&id)
            .ok_or(LedgerError::NotFound("force settlement"))
    }

    pub fn find_settlement(&self, id: SettlementId) -> Option<&ForceSettlement> {
        self.settlements.get(&id)
    }

    pub fn modify_settlement(
        &mut self,
        id: SettlementId,
        mutate: impl FnOnce(&mut ForceSettlement),
    ) -> Result<(), LedgerError> {
        let settlement = self
            .settlements
            .get_mut(&id)
            .ok_or(LedgerError::NotFound("force settlement"))?;
        let old_key = SettleKey {
            asset: settlement.balance.asset_id,
            date: settlement.settlement_date,
            id,
        };
        mutate(settlement);
        let new_key = SettleKey {
            asset: settlement.balance.asset_id,
            date: settlement.settlement_date,
            id,
        };
        if new_key != old_key {
            self.settlement_index.remove(&old_key);
            self.settlement_index.insert(new_key);
        }
        Ok(())
    }

    pub fn remove_settlement(&mut self, id: SettlementId) -> Option<ForceSettlement> {
        let settlement = self.settlements.remove(&id)?;
        self.settlement_index.remove(&SettleKey {
            asset: settlement.balance.asset_id,
            date: settlement.settlement_date,
            id,
        });
        Some(settlement)
    }

    /// Settlement requests for `asset`, earliest first.
    pub fn settlements_of_asset(&self, asset: AssetId) -> impl Iterator<Item = &ForceSettlement> {
        let start = SettleKey {
            asset,
            date: Timestamp::from_secs(i64::MIN),
            id: SettlementId(0),
        };
        let end = SettleKey {
            asset,
            date: Timestamp::from_secs(i64::MAX),
            id: SettlementId(u64::MAX),
        };
        self.settlement_index
            .range(start..=end)
            .filter_map(move |key| self.settlements.get(&key.id))
    }

    /// The earliest settlement across all assets that is due at `now`,
    /// skipping assets the caller has set aside this pass.
    pub fn next_due_settlement(
        &self,
        now: Timestamp,
        skip: &BTreeSet<AssetId>,
    ) -> Option<&ForceSettlement> {
        self.settlement_index
            .iter()
            .filter(|key| !skip.contains(&key.asset))
            .find(|key| key.date <= now)
            .and_then(|key| self.settlements.get(&key.id))
    }

    pub fn settlements(&self) -> impl Iterator<Item = &ForceSettlement> {
        self.settlements.values()
    }
}
