//! The order book: applying new limit orders, pairwise matching against
//! limit and call orders, fills, culling, and the margin-call scan.
//!
//! Rounding discipline, tie-breaks and iteration order here decide whether
//! two nodes agree on every satoshi; deviations from the documented rules
//! are consensus failures, not style choices.

use crate::error::LedgerError;
use crate::events::{EventPayload, FillOrderEvent, OrderRef};
use crate::ops::{CallOrderUpdate, LimitOrderCancel, LimitOrderCreate, Operation, OperationResult};
use crate::orders::{CallOrder, LimitOrder};
use crate::types::{
    percent, AccountId, AssetAmount, AssetId, CallOrderId, LimitOrderId, Price, CORE_ASSET,
};
use std::cmp::Ordering;

use super::Ledger;

/// Bit flags returned by the pairwise match functions.
pub(crate) const TAKER_FILLED: u8 = 1;
pub(crate) const MAKER_FILLED: u8 = 2;

impl Ledger {
    // --- limit order operations ------------------------------------------

    pub(crate) fn apply_limit_order_create(
        &mut self,
        op: &LimitOrderCreate,
    ) -> Result<OperationResult, LedgerError> {
        self.evaluate_limit_order_create(op)?;

        let required = self.required_fee(&Operation::LimitOrderCreate(op.clone()));
        let deferred_fee = self.deduct_fee(op.seller, op.fee, required, false)?;
        let deferred_paid_fee = if op.fee.asset_id == CORE_ASSET {
            AssetAmount::zero(CORE_ASSET)
        } else {
            op.fee
        };

        self.store
            .adjust_balance(op.seller, AssetAmount::new(-op.amount_to_sell.amount, op.amount_to_sell.asset_id))?;
        if op.amount_to_sell.asset_id == CORE_ASSET {
            let amount = op.amount_to_sell.amount;
            self.store.modify_account(op.seller, |account| {
                account.statistics.total_core_in_orders += amount;
            })?;
        }

        let id = self.store.next_limit_order_id();
        let order = LimitOrder {
            id,
            seller: op.seller,
            for_sale: op.amount_to_sell.amount,
            sell_price: Price::new(op.amount_to_sell, op.min_to_receive),
            expiration: op.expiration,
            deferred_fee,
            deferred_paid_fee,
        };
        self.store.insert_limit_order(order);
        self.apply_order(id)?;
        Ok(OperationResult::NewLimitOrder(id))
    }

    fn evaluate_limit_order_create(&self, op: &LimitOrderCreate) -> Result<(), LedgerError> {
        if op.amount_to_sell.amount <= 0 || op.min_to_receive.amount <= 0 {
            return Err(LedgerError::precondition("order amounts must be positive"));
        }
        if op.amount_to_sell.asset_id == op.min_to_receive.asset_id {
            return Err(LedgerError::precondition("cannot trade an asset against itself"));
        }
        if op.expiration < self.time() {
            return Err(LedgerError::precondition("order expires in the past"));
        }
        let sell_asset = self.store.get_asset(op.amount_to_sell.asset_id)?;
        let receive_asset = self.store.get_asset(op.min_to_receive.asset_id)?;
        let seller = self.store.get_account(op.seller)?;
        if !crate::account::is_authorized_asset(seller, sell_asset)
            || !crate::account::is_authorized_asset(seller, receive_asset)
        {
            return Err(LedgerError::precondition("seller is not authorized for this market"));
        }
        if self.store.get_balance(op.seller, op.amount_to_sell.asset_id) < op.amount_to_sell.amount
        {
            return Err(LedgerError::InsufficientBalance(op.seller));
        }
        Ok(())
    }

    pub(crate) fn apply_limit_order_cancel(
        &mut self,
        op: &LimitOrderCancel,
    ) -> Result<OperationResult, LedgerError> {
        let order = *self.store.get_limit_order(op.order)?;
        if order.seller != op.fee_paying_account {
            return Err(LedgerError::precondition("only the seller may cancel an order"));
        }
        let required = self.required_fee(&Operation::LimitOrderCancel(op.clone()));
        self.collect_fee(op.fee_paying_account, op.fee, required)?;
        self.cancel_limit_order(op.order)?;
        Ok(OperationResult::Void)
    }

    /// Refund an order's remaining balance and unpaid deferred fees, then
    /// remove it. The CORE side of a foreign-asset fee goes back to that
    /// asset's fee pool, since the conversion already happened at creation.
    pub(crate) fn cancel_limit_order(&mut self, order_id: LimitOrderId) -> Result<(), LedgerError> {
        let order = *self.store.get_limit_order(order_id)?;

        let refunded = order.amount_for_sale();
        if refunded.asset_id == CORE_ASSET {
            self.store.modify_account(order.seller, |account| {
                account.statistics.total_core_in_orders -= refunded.amount;
            })?;
        }
        self.store.adjust_balance(order.seller, refunded)?;

        if order.deferred_paid_fee.amount == 0 {
            if order.deferred_fee > 0 {
                self.store
                    .adjust_balance(order.seller, AssetAmount::new(order.deferred_fee, CORE_ASSET))?;
            }
        } else {
            self.store.adjust_balance(order.seller, order.deferred_paid_fee)?;
            let deferred_fee = order.deferred_fee;
            self.store
                .modify_asset_dynamic(order.deferred_paid_fee.asset_id, |data| {
                    data.fee_pool += deferred_fee;
                })?;
        }

        self.store.remove_limit_order(order_id);
        Ok(())
    }

    /// Cancel every limit order whose expiration has passed. Driven by the
    /// caller's block clock; expiry is not an event inside matching.
    pub fn cancel_expired_orders(&mut self, now: crate::types::Timestamp) -> Result<(), LedgerError> {
        let expired: Vec<LimitOrderId> = self
            .store
            .limit_orders()
            .filter(|order| order.expiration < now)
            .map(|order| order.id)
            .collect();
        for id in expired {
            self.cancel_limit_order(id)?;
        }
        Ok(())
    }

    // --- entry point ------------------------------------------------------

    /// Apply a freshly inserted limit order to the market.
    ///
    /// If it is not at the front of its side of the book there is nothing
    /// to match. Otherwise consume, in order: (a) opposite limit orders
    /// priced strictly better than the margin-call order price, (b) one
    /// margin call in ascending collateralization, re-entering (a) after
    /// each call fill, then (c) the remaining crossing limit orders.
    /// Whatever remains is left on the book unless it would receive
    /// nothing, in which case it is culled.
    ///
    /// Returns true when the order was completely consumed.
    pub(crate) fn apply_order(&mut self, order_id: LimitOrderId) -> Result<bool, LedgerError> {
        let order = *self.store.get_limit_order(order_id)?;
        let sell_asset_id = order.sell_asset_id();
        let receive_asset_id = order.receive_asset_id();

        if !self.store.is_front_of_book(&order) {
            return Ok(false);
        }

        // The order can match margin calls only when selling the debt asset
        // of a live, fed, non-settled bitasset into its backing asset, at a
        // price at least as good as the margin-call order price.
        struct CallContext {
            call_match_price: Price,
            call_pays_price: Price,
            feed_price: Price,
            maintenance_collateral_ratio: u16,
            maintenance_collateralization: Price,
        }
        let mut call_context: Option<CallContext> = None;
        let sell_asset_is_mia = self.store.get_asset(sell_asset_id)?.is_market_issued();
        if sell_asset_is_mia {
            let bitasset = self.store.get_bitasset(sell_asset_id)?;
            if bitasset.options.short_backing_asset == receive_asset_id
                && !bitasset.is_prediction_market
                && !bitasset.has_settlement()
                && bitasset.has_feed()
            {
                let call_match_price = bitasset.current_feed.margin_call_order_price().invert();
                let call_pays_price = bitasset.current_feed.max_short_squeeze_price().invert();
                if order.sell_price.invert().cmp_on_pair(&call_match_price) != Ordering::Greater {
                    call_context = Some(CallContext {
                        call_match_price,
                        call_pays_price,
                        feed_price: bitasset.current_feed.settlement_price,
                        maintenance_collateral_ratio: bitasset
                            .current_feed
                            .maintenance_collateral_ratio,
                        maintenance_collateralization: bitasset
                            .current_maintenance_collateralization,
                    });
                }
            }
        }

        let mut finished = false;
        if let Some(ctx) = call_context {
            'with_calls: while !finished {
                // (a) limit orders offering more than the margin calls do
                while !finished {
                    match self.best_crossing_maker(order_id)? {
                        Some((maker_id, maker_price))
                            if maker_price.cmp_on_pair(&ctx.call_match_price)
                                == Ordering::Greater =>
                        {
                            finished =
                                self.match_limit_limit(order_id, maker_id, &maker_price)?
                                    != MAKER_FILLED;
                        }
                        _ => break,
                    }
                }
                if finished {
                    break 'with_calls;
                }
                // (b) one margin call, least collateralized first
                if ctx.maintenance_collateralization.is_null() {
                    break 'with_calls;
                }
                let call = match self.store.least_collateralized_call(sell_asset_id) {
                    Some(call) => *call,
                    None => break 'with_calls,
                };
                if call
                    .collateralization()
                    .cmp_on_pair(&ctx.maintenance_collateralization)
                    == Ordering::Greater
                {
                    break 'with_calls; // feed protected
                }
                let usd_to_buy = call.get_max_debt_to_cover(
                    &ctx.call_pays_price,
                    &ctx.feed_price,
                    ctx.maintenance_collateral_ratio,
                    &ctx.maintenance_collateralization,
                )?;
                if usd_to_buy == 0 {
                    break 'with_calls;
                }
                let result = self.match_limit_call(
                    order_id,
                    call.id,
                    &ctx.call_match_price,
                    &ctx.call_pays_price,
                    usd_to_buy,
                )?;
                if result & TAKER_FILLED != 0 {
                    finished = true;
                }
            }
        }

        // (c) remaining limit orders
        while !finished {
            match self.best_crossing_maker(order_id)? {
                Some((maker_id, maker_price)) => {
                    finished =
                        self.match_limit_limit(order_id, maker_id, &maker_price)? != MAKER_FILLED;
                }
                None => break,
            }
        }

        if self.store.find_limit_order(order_id).is_none() {
            return Ok(true);
        }
        self.maybe_cull_small_order(order_id)
    }

    /// Best maker on the opposite side whose price crosses the taker's.
    /// Re-derived from the index keys on every call, never cached across a
    /// fill.
    fn best_crossing_maker(
        &self,
        taker_id: LimitOrderId,
    ) -> Result<Option<(LimitOrderId, Price)>, LedgerError> {
        let taker = self.store.get_limit_order(taker_id)?;
        let maker = match self
            .store
            .best_order_of_pair(taker.receive_asset_id(), taker.sell_asset_id())
        {
            Some(maker) => maker,
            None => return Ok(None),
        };
        let threshold = taker.sell_price.invert();
        if maker.sell_price.cmp_on_pair(&threshold) == Ordering::Less {
            return Ok(None);
        }
        Ok(Some((maker.id, maker.sell_price)))
    }

    // --- pairwise matching ------------------------------------------------

    /// Match a taker limit order against a maker limit order at the maker's
    /// price. Rounds down in favor of the larger order, then rounds the
    /// counter-amount up so the smaller side is consumed exactly.
    pub(crate) fn match_limit_limit(
        &mut self,
        taker_id: LimitOrderId,
        maker_id: LimitOrderId,
        match_price: &Price,
    ) -> Result<u8, LedgerError> {
        let taker = *self.store.get_limit_order(taker_id)?;
        let maker = *self.store.get_limit_order(maker_id)?;
        debug_assert_eq!(taker.sell_asset_id(), maker.receive_asset_id());
        debug_assert_eq!(taker.receive_asset_id(), maker.sell_asset_id());
        debug_assert!(taker.for_sale > 0 && maker.for_sale > 0);

        let taker_for_sale = taker.amount_for_sale();
        let maker_for_sale = maker.amount_for_sale();

        let taker_receives;
        let maker_receives;
        let mut cull_taker = false;

        if taker_for_sale.amount <= maker_for_sale.mul_floor(match_price)?.amount {
            taker_receives = taker_for_sale.mul_floor(match_price)?;
            // a partially filled taker can reach the point of paying
            // something for nothing; report it filled and let the caller
            // cancel it
            if taker_receives.amount == 0 {
                return Ok(TAKER_FILLED);
            }
            maker_receives = taker_receives.mul_ceil(match_price)?;
            cull_taker = true;
        } else {
            maker_receives = maker_for_sale.mul_floor(match_price)?;
            taker_receives = maker_receives.mul_ceil(match_price)?;
        }

        let taker_pays = maker_receives;
        let maker_pays = taker_receives;

        let mut result = 0u8;
        if self.fill_limit_order(taker_id, taker_pays, taker_receives, cull_taker, match_price, false)? {
            result |= TAKER_FILLED;
        }
        if self.fill_limit_order(maker_id, maker_pays, maker_receives, true, match_price, true)? {
            result |= MAKER_FILLED;
        }
        debug_assert_ne!(result, 0);
        Ok(result)
    }

    /// Match a taker limit order against a maker call order. The match
    /// price is the margin-call order price; the call relinquishes
    /// collateral at the (worse) short-squeeze price, and the spread is the
    /// issuer's margin call fee.
    pub(crate) fn match_limit_call(
        &mut self,
        taker_id: LimitOrderId,
        call_id: CallOrderId,
        match_price: &Price,
        call_pays_price: &Price,
        usd_to_buy: i64,
    ) -> Result<u8, LedgerError> {
        let limit = *self.store.get_limit_order(taker_id)?;
        let call = *self.store.get_call_order(call_id)?;
        debug_assert_eq!(limit.sell_asset_id(), call.debt_asset);
        debug_assert_eq!(limit.receive_asset_id(), call.collateral_asset);
        debug_assert!(limit.for_sale > 0 && call.debt > 0 && call.collateral > 0);

        let usd_for_sale = limit.amount_for_sale();

        let call_pays;
        let call_receives;
        let order_receives;
        let mut cull_taker = false;

        if usd_to_buy > usd_for_sale.amount {
            // fill the limit order
            order_receives = usd_for_sale.mul_floor(match_price)?;
            if order_receives.amount == 0 {
                return Ok(TAKER_FILLED);
            }
            call_pays = usd_for_sale.mul_floor(call_pays_price)?;
            call_receives = order_receives.mul_ceil(match_price)?;
            cull_taker = true;
        } else {
            // fill the call up to its cover target
            call_receives = AssetAmount::new(usd_to_buy, call.debt_asset);
            order_receives = call_receives.mul_ceil(match_price)?;
            call_pays = call_receives.mul_ceil(call_pays_price)?;
        }
        let order_pays = call_receives;

        if call_pays.amount < order_receives.amount {
            return Err(LedgerError::invariant("margin call fee went negative"));
        }
        let margin_call_fee =
            AssetAmount::new(call_pays.amount - order_receives.amount, call_pays.asset_id);

        let mut result = 0u8;
        if self.fill_limit_order(taker_id, order_pays, order_receives, cull_taker, match_price, false)? {
            result |= TAKER_FILLED;
        }
        if self.fill_call_order(call_id, call_pays, call_receives, match_price, true, margin_call_fee)? {
            result |= MAKER_FILLED;
        }
        // result may be 0 when the call was only partially covered to its
        // target collateral ratio
        Ok(result)
    }

    // --- fills ------------------------------------------------------------

    /// Settle one side of a fill on a limit order: charge market fees,
    /// credit the seller, emit the virtual fill operation, handle the
    /// maker's deferred-fee discount, and remove or cull the order.
    pub(crate) fn fill_limit_order(
        &mut self,
        order_id: LimitOrderId,
        pays: AssetAmount,
        receives: AssetAmount,
        cull_if_small: bool,
        fill_price: &Price,
        is_maker: bool,
    ) -> Result<bool, LedgerError> {
        let order = *self.store.get_limit_order(order_id)?;
        debug_assert_eq!(order.sell_asset_id(), pays.asset_id);
        debug_assert_ne!(pays.asset_id, receives.asset_id);

        let receive_asset = self.store.get_asset(receives.asset_id)?.clone();
        let issuer_fees = self.pay_market_fees(Some(order.seller), &receive_asset, receives, is_maker)?;
        self.pay_order(
            order.seller,
            AssetAmount::new(receives.amount - issuer_fees.amount, receives.asset_id),
            pays,
        )?;

        self.push_event(EventPayload::FillOrder(FillOrderEvent {
            order: OrderRef::Limit(order_id),
            account: order.seller,
            pays,
            receives,
            fee: issuer_fees,
            fill_price: *fill_price,
            is_maker,
        }));

        // Maker creation-fee discount. Both refunds are computed from the
        // original deferred amounts, never from running totals, to keep the
        // CORE and foreign-asset portions from drifting apart.
        let discount = self.config.maker_fee_discount_percent;
        let mut deferred_fee = order.deferred_fee;
        let mut deferred_paid_fee = order.deferred_paid_fee.amount;

        if order.deferred_paid_fee.amount > 0 {
            let mut fee_pool_refund = 0i64;
            if is_maker && discount > 0 {
                let refund = percent(deferred_paid_fee, discount)?;
                if refund > 0 {
                    self.store.adjust_balance(
                        order.seller,
                        AssetAmount::new(refund, order.deferred_paid_fee.asset_id),
                    )?;
                    deferred_paid_fee -= refund;
                    fee_pool_refund = percent(deferred_fee, discount)?;
                    deferred_fee -= fee_pool_refund;
                }
            }
            let remainder = deferred_paid_fee;
            self.store
                .modify_asset_dynamic(order.deferred_paid_fee.asset_id, |data| {
                    data.accumulated_fees += remainder;
                    data.fee_pool += fee_pool_refund;
                })?;
        }

        if order.deferred_fee > 0 {
            if order.deferred_paid_fee.amount <= 0 && is_maker && discount > 0 {
                let refund = percent(deferred_fee, discount)?;
                if refund > 0 {
                    self.store
                        .adjust_balance(order.seller, AssetAmount::new(refund, CORE_ASSET))?;
                    deferred_fee -= refund;
                }
            }
            if deferred_fee > 0 {
                let threshold = self.config.cashback_vesting_threshold;
                self.store.modify_account(order.seller, |account| {
                    account.statistics.pay_fee(deferred_fee, threshold);
                })?;
            }
        }

        if pays.amount == order.for_sale {
            self.store.remove_limit_order(order_id);
            return Ok(true);
        }
        self.store.modify_limit_order(order_id, |o| {
            o.for_sale -= pays.amount;
            o.deferred_fee = 0;
            o.deferred_paid_fee.amount = 0;
        })?;
        if cull_if_small {
            return self.maybe_cull_small_order(order_id);
        }
        Ok(false)
    }

    /// Settle one side of a fill on a call order: reduce debt and
    /// collateral, retire the received debt asset from supply, release
    /// collateral when the debt hits zero, and accumulate the margin call
    /// fee for the issuer.
    pub(crate) fn fill_call_order(
        &mut self,
        call_id: CallOrderId,
        pays: AssetAmount,
        receives: AssetAmount,
        fill_price: &Price,
        is_maker: bool,
        margin_call_fee: AssetAmount,
    ) -> Result<bool, LedgerError> {
        let call = *self.store.get_call_order(call_id)?;
        debug_assert_eq!(call.debt_asset, receives.asset_id);
        debug_assert_eq!(call.collateral_asset, pays.asset_id);
        if pays.amount > call.collateral || receives.amount > call.debt {
            return Err(LedgerError::invariant("call order fill exceeds the position"));
        }

        let new_debt = call.debt - receives.amount;
        let new_collateral = call.collateral - pays.amount;
        let mut collateral_freed: Option<AssetAmount> = None;
        if new_debt == 0 {
            collateral_freed = Some(AssetAmount::new(new_collateral, call.collateral_asset));
            self.store.remove_call_order(call_id);
        } else {
            self.store.modify_call_order(call_id, |o| {
                o.debt = new_debt;
                o.collateral = new_collateral;
            })?;
        }

        self.store
            .modify_asset_dynamic(receives.asset_id, |data| data.current_supply -= receives.amount)?;

        if let Some(freed) = collateral_freed {
            self.store.adjust_balance(call.borrower, freed)?;
        }
        if pays.asset_id == CORE_ASSET {
            let locked_delta = pays.amount + collateral_freed.map_or(0, |freed| freed.amount);
            self.store.modify_account(call.borrower, |account| {
                account.statistics.total_core_in_orders -= locked_delta;
            })?;
        }

        if margin_call_fee.amount != 0 {
            self.accumulate_fee(receives.asset_id, margin_call_fee)?;
        }

        self.push_event(EventPayload::FillOrder(FillOrderEvent {
            order: OrderRef::Call(call_id),
            account: call.borrower,
            pays,
            receives,
            fee: margin_call_fee,
            fill_price: *fill_price,
            is_maker,
        }));

        Ok(collateral_freed.is_some())
    }

    /// Credit a fill's proceeds and release the core-in-orders statistic.
    fn pay_order(
        &mut self,
        seller: AccountId,
        receives: AssetAmount,
        pays: AssetAmount,
    ) -> Result<(), LedgerError> {
        if pays.asset_id == CORE_ASSET {
            self.store.modify_account(seller, |account| {
                account.statistics.total_core_in_orders -= pays.amount;
            })?;
        }
        self.store.adjust_balance(seller, receives)
    }

    /// An order whose remainder buys nothing at its own price is refunded
    /// and removed: it would otherwise sit on the book asking for nothing.
    pub(crate) fn maybe_cull_small_order(
        &mut self,
        order_id: LimitOrderId,
    ) -> Result<bool, LedgerError> {
        let order = *self.store.get_limit_order(order_id)?;
        if order.amount_to_receive()?.amount == 0 {
            self.cancel_limit_order(order_id)?;
            return Ok(true);
        }
        Ok(false)
    }

    // --- margin call scan -------------------------------------------------

    /// Whether the least collateralized position can no longer cover its
    /// debt at the best available price: the better of the short-squeeze
    /// price and the best bid on the book. When it cannot, divert to
    /// global settlement at the feed price (if enabled) or fail.
    pub(crate) fn check_for_black_swan(
        &mut self,
        asset_id: AssetId,
        enable_black_swan: bool,
    ) -> Result<bool, LedgerError> {
        let bitasset = self.store.get_bitasset(asset_id)?.clone();
        if bitasset.is_prediction_market || bitasset.has_settlement() || !bitasset.has_feed() {
            return Ok(false);
        }
        let call = match self.store.least_collateralized_call(asset_id) {
            Some(call) => *call,
            None => return Ok(false),
        };
        let backing = bitasset.options.short_backing_asset;
        // debt per collateral offered, in the same orientation as the book
        let debt_per_collateral = call.collateralization().invert();
        let mut highest = bitasset.current_feed.max_short_squeeze_price();
        if let Some(limit) = self.store.best_order_of_pair(asset_id, backing) {
            if limit.sell_price.cmp_on_pair(&highest) == Ordering::Greater {
                highest = limit.sell_price;
            }
        }
        if debt_per_collateral.cmp_on_pair(&highest) == Ordering::Less {
            return Ok(false);
        }
        if !enable_black_swan {
            return Err(LedgerError::state(
                "black swan detected while black swan handling is disabled",
            ));
        }
        self.globally_settle_asset(asset_id, bitasset.current_feed.settlement_price)?;
        Ok(true)
    }

    /// Walk the margin-call queue for `asset_id` and execute calls against
    /// the book while both sides allow it.
    ///
    /// For each position at or below maintenance collateralization, find
    /// the best limit order priced no worse than the margin-call order
    /// price. The black-swan condition is re-checked before every fill.
    ///
    /// Returns true when at least one margin call executed (or a black
    /// swan fired).
    pub fn check_call_orders(
        &mut self,
        asset_id: AssetId,
        enable_black_swan: bool,
    ) -> Result<bool, LedgerError> {
        match self.store.find_asset(asset_id) {
            Some(asset) if asset.is_market_issued() => {}
            _ => return Ok(false),
        }
        let bitasset = self.store.get_bitasset(asset_id)?.clone();
        if bitasset.is_prediction_market || bitasset.has_settlement() || !bitasset.has_feed() {
            return Ok(false);
        }
        if bitasset.current_maintenance_collateralization.is_null() {
            return Ok(false);
        }
        let backing = bitasset.options.short_backing_asset;
        let min_price = bitasset.current_feed.margin_call_order_price();
        let (pays_num, pays_den) = bitasset.current_feed.margin_call_pays_ratio();

        let mut margin_called = false;
        loop {
            if self.check_for_black_swan(asset_id, enable_black_swan)? {
                return Ok(true);
            }
            let call = match self.store.least_collateralized_call(asset_id) {
                Some(call) => *call,
                None => break,
            };
            // feed protected
            if call
                .collateralization()
                .cmp_on_pair(&bitasset.current_maintenance_collateralization)
                == Ordering::Greater
            {
                break;
            }

            let limit = match self.store.best_order_of_pair(asset_id, backing) {
                Some(limit) => *limit,
                None => break,
            };
            if limit.sell_price.cmp_on_pair(&min_price) == Ordering::Less {
                break; // the book offers too little for margin calls
            }

            let match_price = limit.sell_price;
            // match_price is debt per collateral; the call gives up
            // MSSR/(MSSR-MCFR) times more collateral than the limit receives
            let call_pays_price = match_price.scaled(pays_den, pays_num);

            margin_called = true;

            // One more guard: the fill itself must be payable. The swan
            // check above should have caught anything worse.
            if call.get_debt().mul_floor(&call_pays_price)?.amount > call.collateral {
                if !enable_black_swan {
                    return Err(LedgerError::state(
                        "black swan detected while black swan handling is disabled",
                    ));
                }
                self.globally_settle_asset(asset_id, bitasset.current_feed.settlement_price)?;
                return Ok(true);
            }

            let usd_to_buy = call.get_max_debt_to_cover(
                &call_pays_price,
                &bitasset.current_feed.settlement_price,
                bitasset.current_feed.maintenance_collateral_ratio,
                &bitasset.current_maintenance_collateralization,
            )?;
            if usd_to_buy == 0 {
                break;
            }

            let usd_for_sale = limit.amount_for_sale();
            let call_pays;
            let call_receives;
            let limit_receives;
            if usd_to_buy > usd_for_sale.amount {
                // consume the whole limit order
                limit_receives = usd_for_sale.mul_floor(&match_price)?;
                call_pays = usd_for_sale.mul_floor(&call_pays_price)?;
                call_receives = limit_receives.mul_ceil(&match_price)?;
            } else {
                // cover the call to its target
                call_receives = AssetAmount::new(usd_to_buy, asset_id);
                limit_receives = call_receives.mul_ceil(&match_price)?;
                call_pays = call_receives.mul_ceil(&call_pays_price)?;
            }
            let limit_pays = call_receives;

            if call_pays.amount < limit_receives.amount {
                return Err(LedgerError::invariant("margin call fee went negative"));
            }
            let margin_call_fee =
                AssetAmount::new(call_pays.amount - limit_receives.amount, call_pays.asset_id);

            // resting limit order is the maker; the called position takes
            self.fill_call_order(call.id, call_pays, call_receives, &match_price, false, margin_call_fee)?;
            self.fill_limit_order(limit.id, limit_pays, limit_receives, true, &match_price, true)?;
        }

        Ok(margin_called)
    }

    // --- call order updates ----------------------------------------------

    pub(crate) fn apply_call_order_update(
        &mut self,
        op: &CallOrderUpdate,
    ) -> Result<OperationResult, LedgerError> {
        if op.delta_collateral.amount == 0 && op.delta_debt.amount == 0 {
            return Err(LedgerError::precondition("update changes neither debt nor collateral"));
        }
        let debt_asset = self.store.get_asset(op.delta_debt.asset_id)?.clone();
        if !debt_asset.is_market_issued() {
            return Err(LedgerError::NotMarketIssued(debt_asset.id));
        }
        let bitasset = self.store.get_bitasset(debt_asset.id)?.clone();
        if bitasset.is_prediction_market {
            return Err(LedgerError::precondition(
                "prediction markets do not take margin positions",
            ));
        }
        if bitasset.has_settlement() {
            return Err(LedgerError::state(
                "cannot update a margin position after global settlement",
            ));
        }
        if op.delta_collateral.asset_id != bitasset.options.short_backing_asset {
            return Err(LedgerError::precondition("collateral is not the backing asset"));
        }

        let existing = self
            .store
            .find_call_order_by_account(op.funding_account, debt_asset.id)
            .copied();
        let (old_collateral, old_debt) = existing
            .map(|call| (call.collateral, call.debt))
            .unwrap_or((0, 0));
        let new_debt = old_debt + op.delta_debt.amount;
        let new_collateral = old_collateral + op.delta_collateral.amount;
        if new_debt < 0 || new_collateral < 0 {
            return Err(LedgerError::precondition("update would drive the position negative"));
        }
        if new_debt == 0 && new_collateral != 0 {
            return Err(LedgerError::precondition(
                "must withdraw all collateral when closing a position",
            ));
        }
        if new_debt != 0 && new_collateral == 0 {
            return Err(LedgerError::precondition("a position needs collateral"));
        }
        if new_debt > 0 && !bitasset.has_feed() {
            return Err(LedgerError::state("no price feed for this asset"));
        }
        if op.delta_debt.amount > 0 {
            let dynamic = self.store.get_asset_dynamic(debt_asset.id)?;
            if dynamic.current_supply + op.delta_debt.amount > debt_asset.options.max_supply {
                return Err(LedgerError::invariant("borrow would exceed max supply"));
            }
        }

        let required = self.required_fee(&Operation::CallOrderUpdate(op.clone()));
        self.collect_fee(op.funding_account, op.fee, required)?;

        // move funds
        self.store.adjust_balance(
            op.funding_account,
            AssetAmount::new(-op.delta_collateral.amount, op.delta_collateral.asset_id),
        )?;
        self.store.adjust_balance(op.funding_account, op.delta_debt)?;
        self.store
            .modify_asset_dynamic(debt_asset.id, |data| data.current_supply += op.delta_debt.amount)?;
        if op.delta_collateral.asset_id == CORE_ASSET {
            let delta = op.delta_collateral.amount;
            self.store.modify_account(op.funding_account, |account| {
                account.statistics.total_core_in_orders += delta;
            })?;
        }

        // reshape the position
        let position_id = if new_debt == 0 {
            if let Some(call) = existing {
                self.store.remove_call_order(call.id);
            }
            None
        } else {
            let id = match existing {
                Some(call) => {
                    self.store.modify_call_order(call.id, |o| {
                        o.collateral = new_collateral;
                        o.debt = new_debt;
                        o.target_collateral_ratio = op.target_collateral_ratio;
                    })?;
                    call.id
                }
                None => {
                    let id = self.store.next_call_order_id();
                    self.store.insert_call_order(CallOrder {
                        id,
                        borrower: op.funding_account,
                        collateral: new_collateral,
                        debt: new_debt,
                        collateral_asset: op.delta_collateral.asset_id,
                        debt_asset: debt_asset.id,
                        target_collateral_ratio: op.target_collateral_ratio,
                    });
                    id
                }
            };

            // A new or grown position must reach the initial requirement; a
            // shrinking one only has to improve.
            let new_position_cr = Price::new(
                AssetAmount::new(new_collateral, op.delta_collateral.asset_id),
                AssetAmount::new(new_debt, debt_asset.id),
            );
            let initial_requirement = bitasset.current_feed.initial_collateralization();
            let meets_initial =
                new_position_cr.cmp_on_pair(&initial_requirement) != Ordering::Less;
            let improves = old_debt > 0 && {
                let old_cr = Price::new(
                    AssetAmount::new(old_collateral, op.delta_collateral.asset_id),
                    AssetAmount::new(old_debt, debt_asset.id),
                );
                new_position_cr.cmp_on_pair(&old_cr) == Ordering::Greater
            };
            if !meets_initial && !improves {
                return Err(LedgerError::precondition(
                    "position below the initial collateralization requirement",
                ));
            }
            Some(id)
        };

        // a collateral update may trigger margin calls but never a swan
        self.check_call_orders(debt_asset.id, false)?;

        let surviving = position_id.filter(|id| self.store.find_call_order(*id).is_some());
        Ok(OperationResult::CallOrder(surviving))
    }
}
