//! Force settlement and global settlement ("black swan") machinery: the
//! call-versus-settle match, the settlement fund, and asset revival.

use crate::asset::{AssetDynamicData, BitassetData};
use crate::error::LedgerError;
use crate::events::{EventPayload, FillOrderEvent, OrderRef, SettleCancelEvent};
use crate::types::{
    AssetAmount, AssetId, CallOrderId, Price, SettlementId, Timestamp, HUNDRED_PERCENT,
};
use std::collections::BTreeSet;

use super::Ledger;

impl Ledger {
    /// Force-close every margin position of `asset_id` at `settlement_price`
    /// into the settlement fund. Positions are consumed in ascending
    /// collateralization; each pays `ceil(debt * price)` clamped to its
    /// collateral, rounding in favor of the fund.
    ///
    /// Filling the calls drives the reported supply to zero, which is a
    /// lie: holders still own the asset. The pre-settlement supply is
    /// restored afterwards and the settle evaluator burns it as holders
    /// cash out.
    pub(crate) fn globally_settle_asset(
        &mut self,
        asset_id: AssetId,
        settlement_price: Price,
    ) -> Result<(), LedgerError> {
        let bitasset = self.store.get_bitasset(asset_id)?.clone();
        if bitasset.has_settlement() {
            return Err(LedgerError::state("asset is already globally settled"));
        }
        let backing = bitasset.options.short_backing_asset;
        let original_supply = self.store.get_asset_dynamic(asset_id)?.current_supply;

        let mut collateral_gathered = AssetAmount::zero(backing);
        loop {
            let call = match self.store.least_collateralized_call(asset_id) {
                Some(call) => *call,
                None => break,
            };
            let mut pays = call.get_debt().mul_ceil(&settlement_price)?;
            if pays.amount > call.collateral {
                pays.amount = call.collateral;
            }
            collateral_gathered.amount += pays.amount;
            let filled = self.fill_call_order(
                call.id,
                pays,
                call.get_debt(),
                &settlement_price,
                true,
                AssetAmount::zero(backing),
            )?;
            debug_assert!(filled);
        }

        self.store.modify_bitasset(asset_id, |bitasset| {
            bitasset.settlement_price = Price::new(
                AssetAmount::new(original_supply, asset_id),
                collateral_gathered,
            );
            bitasset.settlement_fund = collateral_gathered.amount;
        })?;
        self.store
            .modify_asset_dynamic(asset_id, |data| data.current_supply = original_supply)
    }

    /// Clear the settlement state once the conditions checked by the feed
    /// publisher path hold (zero supply, or the fund collateralizes the
    /// remaining supply above maintenance).
    pub(crate) fn revive_bitasset(&mut self, asset_id: AssetId) -> Result<(), LedgerError> {
        let bitasset = self.store.get_bitasset(asset_id)?.clone();
        if !bitasset.has_settlement() {
            return Err(LedgerError::state("asset is not settled"));
        }
        if bitasset.is_prediction_market {
            return Err(LedgerError::state("prediction markets do not revive"));
        }
        if !bitasset.has_feed() {
            return Err(LedgerError::state("cannot revive without a feed"));
        }
        let supply = self.store.get_asset_dynamic(asset_id)?.current_supply;
        if supply <= 0 && bitasset.settlement_fund != 0 {
            return Err(LedgerError::invariant(
                "settlement fund left over with zero supply",
            ));
        }
        self.store.modify_bitasset(asset_id, |bitasset| {
            bitasset.settlement_price = Price::null();
            bitasset.settlement_fund = 0;
        })
    }

    /// Refund a pending settlement request and emit the cancellation.
    pub(crate) fn cancel_settle_order(&mut self, settle_id: SettlementId) -> Result<(), LedgerError> {
        let settle = *self.store.get_settlement(settle_id)?;
        self.store.adjust_balance(settle.owner, settle.balance)?;
        self.push_event(EventPayload::SettleCancel(SettleCancelEvent {
            settlement: settle_id,
            account: settle.owner,
            amount: settle.balance,
        }));
        self.store.remove_settlement(settle_id);
        Ok(())
    }

    /// Exchange debt held by a settle order for collateral held by a call
    /// order at `match_price`, capped by `max_settlement`.
    ///
    /// Dust rules: a call paying zero collateral either pays a single
    /// satoshi (when it is the smaller side) or forces the dust settle
    /// order to be cancelled. After the floor pass the counter-amount is
    /// re-ceiled once, and whether the settle order is exhausted is
    /// recomputed afterwards.
    ///
    /// Returns the amount of debt actually settled.
    pub(crate) fn match_call_settle(
        &mut self,
        call_id: CallOrderId,
        settle_id: SettlementId,
        match_price: &Price,
        max_settlement: AssetAmount,
        fill_price: &Price,
    ) -> Result<AssetAmount, LedgerError> {
        let call = *self.store.get_call_order(call_id)?;
        let settle = *self.store.get_settlement(settle_id)?;
        debug_assert_eq!(call.debt_asset, settle.balance.asset_id);
        debug_assert!(call.debt > 0 && call.collateral > 0 && settle.balance.amount > 0);

        let settle_for_sale = settle.balance.amount.min(max_settlement.amount);
        let call_debt = call.get_debt();

        let mut call_receives =
            AssetAmount::new(settle_for_sale.min(call_debt.amount), call.debt_asset);
        let mut call_pays = call_receives.mul_floor(match_price)?;

        let mut cull_settle_order = false;
        if call_pays.amount == 0 {
            if call_receives.amount == call_debt.amount {
                // the call is the smaller side; it must not pay nothing
                call_pays.amount = 1;
            } else {
                if call_receives.amount == settle.balance.amount {
                    // the settle order is dust
                    self.cancel_settle_order(settle_id)?;
                }
                return Ok(AssetAmount::zero(settle.balance.asset_id));
            }
        } else if call_receives.amount == call_debt.amount {
            // the call is consumed entirely; round up in favor of the settler
            call_pays = call_receives.mul_ceil(match_price)?;
        } else {
            if call_receives.amount == settle.balance.amount {
                cull_settle_order = true;
            }
            // keep the floor-rounded payment and re-derive what it buys;
            // the re-ceiled amount never exceeds the original
            call_receives = call_pays.mul_ceil(match_price)?;
            if call_receives.amount == settle.balance.amount {
                cull_settle_order = false;
            }
        }

        let settle_pays = call_receives;
        let settle_receives = call_pays;

        self.fill_call_order(
            call_id,
            call_pays,
            call_receives,
            fill_price,
            true,
            AssetAmount::zero(call.collateral_asset),
        )?;
        self.fill_settle_order(settle_id, settle_pays, settle_receives, fill_price, false)?;

        if cull_settle_order {
            self.cancel_settle_order(settle_id)?;
        }

        Ok(call_receives)
    }

    /// Settle one round of a force-settlement order: charge the market fee
    /// and the force-settle fee on the collateral leg, credit the owner,
    /// and retire or shrink the order.
    pub(crate) fn fill_settle_order(
        &mut self,
        settle_id: SettlementId,
        pays: AssetAmount,
        receives: AssetAmount,
        fill_price: &Price,
        is_maker: bool,
    ) -> Result<bool, LedgerError> {
        let settle = *self.store.get_settlement(settle_id)?;
        debug_assert_ne!(pays.asset_id, receives.asset_id);

        let receive_asset = self.store.get_asset(receives.asset_id)?.clone();
        let market_fees = self.pay_market_fees(Some(settle.owner), &receive_asset, receives, is_maker)?;
        let after_market = AssetAmount::new(receives.amount - market_fees.amount, receives.asset_id);
        let force_settle_fees = self.pay_force_settle_fees(pays.asset_id, after_market)?;
        let total_fees =
            AssetAmount::new(market_fees.amount + force_settle_fees.amount, receives.asset_id);

        let filled = pays.amount >= settle.balance.amount;
        if !filled {
            self.store.modify_settlement(settle_id, |s| s.balance.amount -= pays.amount)?;
        }
        self.store.adjust_balance(
            settle.owner,
            AssetAmount::new(receives.amount - total_fees.amount, receives.asset_id),
        )?;

        self.push_event(EventPayload::FillOrder(FillOrderEvent {
            order: OrderRef::Settlement(settle_id),
            account: settle.owner,
            pays,
            receives,
            fee: total_fees,
            fill_price: *fill_price,
            is_maker,
        }));

        if filled {
            self.store.remove_settlement(settle_id);
        }
        Ok(filled)
    }

    // --- the external settlement clock -----------------------------------

    /// Process every force-settlement order whose delay has elapsed.
    ///
    /// Settled assets pay out of the settlement fund. Live assets match
    /// against the least collateralized call at the feed price reduced by
    /// the settlement offset, within the per-period volume cap. Assets
    /// that cannot make progress (no feed, cap reached, no calls, dust)
    /// are set aside for this pass.
    pub fn execute_due_settlements(&mut self, now: Timestamp) -> Result<(), LedgerError> {
        let mut skip: BTreeSet<AssetId> = BTreeSet::new();
        while let Some(settle) = self.store.next_due_settlement(now, &skip).copied() {
            let asset_id = settle.balance.asset_id;
            let bitasset = self.store.get_bitasset(asset_id)?.clone();

            if bitasset.has_settlement() {
                self.settle_order_against_fund(settle.id)?;
                continue;
            }
            if !bitasset.has_feed() {
                skip.insert(asset_id);
                continue;
            }
            let dynamic = *self.store.get_asset_dynamic(asset_id)?;
            let max_volume = bitasset
                .max_force_settlement_volume(dynamic.current_supply, self.config.max_force_settlement_volume)?;
            if bitasset.force_settled_volume >= max_volume {
                skip.insert(asset_id);
                continue;
            }
            let remaining = max_volume - bitasset.force_settled_volume;

            let call = match self.store.least_collateralized_call(asset_id) {
                Some(call) => *call,
                None => {
                    skip.insert(asset_id);
                    continue;
                }
            };

            let offset = bitasset.options.force_settlement_offset_percent;
            let fill_price = bitasset
                .current_feed
                .settlement_price
                .scaled(HUNDRED_PERCENT as u32, (HUNDRED_PERCENT - offset) as u32);

            let settled = self.match_call_settle(
                call.id,
                settle.id,
                &fill_price,
                AssetAmount::new(remaining, asset_id),
                &fill_price,
            )?;
            if settled.amount > 0 {
                self.store
                    .modify_bitasset(asset_id, |b| b.force_settled_volume += settled.amount)?;
            } else if self.store.find_settlement(settle.id).is_some() {
                skip.insert(asset_id);
            }
        }
        Ok(())
    }

    // --- the settlement fund ---------------------------------------------

    /// How much of the fund `amount` of a settled asset redeems, and how
    /// much debt is actually taken for it.
    ///
    /// Redeeming the entire remaining supply routes the entire remaining
    /// fund, sidestepping rounding residue. Otherwise the payout rounds
    /// down and the debt taken is back-computed with the ceiling rule,
    /// except in the legacy zero-payout branch where the full request is
    /// consumed unadjusted.
    fn fund_settlement_amounts(
        bitasset: &BitassetData,
        dynamic: &AssetDynamicData,
        amount: AssetAmount,
    ) -> Result<(AssetAmount, AssetAmount), LedgerError> {
        let mut settled = amount.mul_floor(&bitasset.settlement_price)?;
        if amount.amount == dynamic.current_supply {
            settled.amount = bitasset.settlement_fund;
        } else if settled.amount > bitasset.settlement_fund {
            return Err(LedgerError::invariant("settlement fund underflow"));
        }
        let mut pays = amount;
        if amount.amount != dynamic.current_supply && settled.amount != 0 {
            pays = settled.mul_ceil(&bitasset.settlement_price)?;
        }
        Ok((pays, settled))
    }

    /// Instant exchange against the settlement fund, for a holder settling
    /// a globally settled asset from their balance. Returns the collateral
    /// credited net of fees.
    pub(crate) fn instant_settle(
        &mut self,
        account: crate::types::AccountId,
        amount: AssetAmount,
    ) -> Result<AssetAmount, LedgerError> {
        let asset_id = amount.asset_id;
        let bitasset = self.store.get_bitasset(asset_id)?.clone();
        debug_assert!(bitasset.has_settlement());
        let dynamic = *self.store.get_asset_dynamic(asset_id)?;

        let (pays, settled) = Self::fund_settlement_amounts(&bitasset, &dynamic, amount)?;
        if settled.amount == 0 && !bitasset.is_prediction_market {
            return Err(LedgerError::precondition(
                "settle amount too small to receive anything after rounding",
            ));
        }

        self.store
            .adjust_balance(account, AssetAmount::new(-pays.amount, asset_id))?;

        let mut credited = AssetAmount::zero(settled.asset_id);
        if settled.amount > 0 {
            self.store
                .modify_bitasset(asset_id, |b| b.settlement_fund -= settled.amount)?;
            let backing_asset = self.store.get_asset(settled.asset_id)?.clone();
            let market_fees = self.pay_market_fees(Some(account), &backing_asset, settled, false)?;
            let after_market =
                AssetAmount::new(settled.amount - market_fees.amount, settled.asset_id);
            let force_settle_fees = self.pay_force_settle_fees(asset_id, after_market)?;
            credited =
                AssetAmount::new(after_market.amount - force_settle_fees.amount, settled.asset_id);
            if credited.amount > 0 {
                self.store.adjust_balance(account, credited)?;
            }
        }

        self.store
            .modify_asset_dynamic(asset_id, |data| data.current_supply -= pays.amount)?;
        Ok(credited)
    }

    /// A due settlement order on a globally settled asset pays out of the
    /// fund; the escrowed balance beyond what the fund exchange consumes is
    /// refunded.
    fn settle_order_against_fund(&mut self, settle_id: SettlementId) -> Result<(), LedgerError> {
        let settle = *self.store.get_settlement(settle_id)?;
        let asset_id = settle.balance.asset_id;
        let bitasset = self.store.get_bitasset(asset_id)?.clone();
        let dynamic = *self.store.get_asset_dynamic(asset_id)?;

        let (pays, settled) = Self::fund_settlement_amounts(&bitasset, &dynamic, settle.balance)?;
        if settled.amount == 0 && !bitasset.is_prediction_market {
            // rounding dust: refund instead of paying nothing
            self.cancel_settle_order(settle_id)?;
            return Ok(());
        }

        if settle.balance.amount > pays.amount {
            self.store.adjust_balance(
                settle.owner,
                AssetAmount::new(settle.balance.amount - pays.amount, asset_id),
            )?;
        }

        if settled.amount > 0 {
            self.store
                .modify_bitasset(asset_id, |b| b.settlement_fund -= settled.amount)?;
            let backing_asset = self.store.get_asset(settled.asset_id)?.clone();
            let market_fees =
                self.pay_market_fees(Some(settle.owner), &backing_asset, settled, false)?;
            let after_market =
                AssetAmount::new(settled.amount - market_fees.amount, settled.asset_id);
            let force_settle_fees = self.pay_force_settle_fees(asset_id, after_market)?;
            let receives =
                AssetAmount::new(after_market.amount - force_settle_fees.amount, settled.asset_id);
            if receives.amount > 0 {
                self.store.adjust_balance(settle.owner, receives)?;
            }
            let total_fees = AssetAmount::new(
                market_fees.amount + force_settle_fees.amount,
                settled.asset_id,
            );
            self.push_event(EventPayload::FillOrder(FillOrderEvent {
                order: OrderRef::Settlement(settle_id),
                account: settle.owner,
                pays,
                receives: settled,
                fee: total_fees,
                fill_price: bitasset.settlement_price,
                is_maker: false,
            }));
        }

        self.store
            .modify_asset_dynamic(asset_id, |data| data.current_supply -= pays.amount)?;
        self.store.remove_settlement(settle_id);
        Ok(())
    }
}
