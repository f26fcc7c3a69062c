//! Validate-then-apply pairs for the asset lifecycle operations. Each apply
//! runs its pure evaluation first; the ledger's snapshot makes the whole
//! operation atomic either way.

use crate::account::COMMITTEE_ACCOUNT;
use crate::asset::{
    asset_flags, is_valid_symbol, AssetDynamicData, AssetObject, BitassetData, MAX_PRECISION,
};
use crate::error::LedgerError;
use crate::ops::{
    AssetClaimFees, AssetClaimPool, AssetCreate, AssetFundFeePool, AssetGlobalSettle, AssetIssue,
    AssetPublishFeed, AssetReserve, AssetSettle, AssetUpdate, AssetUpdateBitasset,
    AssetUpdateFeedProducers, AssetUpdateIssuer, Operation, OperationResult,
};
use crate::orders::ForceSettlement;
use crate::types::{AccountId, AssetAmount, AssetId, Price, CORE_ASSET};
use std::cmp::Ordering;

use super::Ledger;

impl Ledger {
    // --- create -----------------------------------------------------------

    pub(crate) fn apply_asset_create(&mut self, op: &AssetCreate) -> Result<OperationResult, LedgerError> {
        self.evaluate_asset_create(op)?;

        let required = self.required_fee(&Operation::AssetCreate(op.clone()));
        let core_paid = self.deduct_fee(op.issuer, op.fee, required, true)?;
        // odd-satoshi rule: the rounded-down half seeds the new asset's fee
        // pool, the rest leaves circulation
        let pool_seed = core_paid / 2;
        self.burn_core(core_paid - pool_seed)?;

        let id = self.store.peek_next_asset_id();
        let mut options = op.common_options.clone();
        // the CER was quoted against a placeholder id; bind it now
        if options.core_exchange_rate.base.asset_id == CORE_ASSET {
            options.core_exchange_rate.quote.asset_id = id;
        } else {
            options.core_exchange_rate.base.asset_id = id;
        }

        let asset = AssetObject {
            id,
            symbol: op.symbol.clone(),
            precision: op.precision,
            issuer: op.issuer,
            options,
            market_issued: op.bitasset_options.is_some(),
        };
        let dynamic = AssetDynamicData {
            fee_pool: pool_seed,
            ..AssetDynamicData::default()
        };
        let bitasset = op
            .bitasset_options
            .clone()
            .map(|opts| BitassetData::new(id, opts, op.is_prediction_market));
        self.store.insert_asset(asset, dynamic, bitasset);
        Ok(OperationResult::NewAsset(id))
    }

    fn evaluate_asset_create(&self, op: &AssetCreate) -> Result<(), LedgerError> {
        let is_mia = op.bitasset_options.is_some();
        self.store.get_account(op.issuer)?;
        op.common_options.validate(is_mia)?;

        if !is_valid_symbol(&op.symbol) {
            return Err(LedgerError::precondition("invalid asset symbol"));
        }
        if op.precision > MAX_PRECISION {
            return Err(LedgerError::precondition("precision above the maximum"));
        }
        let max_authorities = self.config.maximum_asset_whitelist_authorities;
        if op.common_options.whitelist_authorities.len() > max_authorities
            || op.common_options.blacklist_authorities.len() > max_authorities
        {
            return Err(LedgerError::precondition("too many list authorities"));
        }
        for authority in op
            .common_options
            .whitelist_authorities
            .iter()
            .chain(op.common_options.blacklist_authorities.iter())
        {
            self.store.get_account(*authority)?;
        }

        if self.store.asset_id_by_symbol(&op.symbol).is_some() {
            return Err(LedgerError::invariant("asset symbol already exists"));
        }
        if let Some(dot) = op.symbol.rfind('.') {
            let prefix = &op.symbol[..dot];
            let parent = self
                .store
                .asset_id_by_symbol(prefix)
                .ok_or_else(|| LedgerError::precondition("sub-asset prefix does not exist"))?;
            if self.store.get_asset(parent)?.issuer != op.issuer {
                return Err(LedgerError::precondition(
                    "sub-assets may only be created by the prefix issuer",
                ));
            }
        }

        if let Some(bitasset_opts) = &op.bitasset_options {
            bitasset_opts.validate()?;
            self.store.get_asset(bitasset_opts.short_backing_asset)?;
            self.check_backing_grounds(op.issuer, bitasset_opts.short_backing_asset)?;
            if bitasset_opts.feed_lifetime_sec <= self.config.block_interval_sec
                || bitasset_opts.force_settlement_delay_sec <= self.config.block_interval_sec
            {
                return Err(LedgerError::precondition(
                    "feed lifetime and settlement delay must exceed the block interval",
                ));
            }
        }

        if op.is_prediction_market {
            let opts = op
                .bitasset_options
                .as_ref()
                .ok_or_else(|| LedgerError::precondition("prediction markets are bitassets"))?;
            let backing = self.store.get_asset(opts.short_backing_asset)?;
            if op.precision != backing.precision {
                return Err(LedgerError::precondition(
                    "prediction market precision must equal its backing asset's",
                ));
            }
            if op.common_options.issuer_permissions & asset_flags::GLOBAL_SETTLE == 0 {
                return Err(LedgerError::precondition(
                    "prediction markets require the global-settle permission",
                ));
            }
        }
        Ok(())
    }

    /// No bitasset backed by a bitasset backed by a bitasset, and a
    /// committee-issued market asset must (transitively) be backed by CORE.
    fn check_backing_grounds(&self, issuer: AccountId, backing_id: AssetId) -> Result<(), LedgerError> {
        let backing = self.store.get_asset(backing_id)?;
        if backing.is_market_issued() {
            let grand_backing = self.store.get_bitasset(backing_id)?.options.short_backing_asset;
            if self.store.get_asset(grand_backing)?.is_market_issued() {
                return Err(LedgerError::invariant(
                    "may not create a bitasset backed by a bitasset backed by a bitasset",
                ));
            }
            if issuer == COMMITTEE_ACCOUNT && grand_backing != CORE_ASSET {
                return Err(LedgerError::precondition(
                    "a committee market asset must be backed by CORE",
                ));
            }
        } else if issuer == COMMITTEE_ACCOUNT && backing_id != CORE_ASSET {
            return Err(LedgerError::precondition(
                "a committee market asset must be backed by CORE",
            ));
        }
        Ok(())
    }

    // --- update (common options) -----------------------------------------

    pub(crate) fn apply_asset_update(&mut self, op: &AssetUpdate) -> Result<OperationResult, LedgerError> {
        self.evaluate_asset_update(op)?;
        let required = self.required_fee(&Operation::AssetUpdate(op.clone()));
        self.collect_fee(op.issuer, op.fee, required)?;

        let asset = self.store.get_asset(op.asset_to_update)?.clone();

        // disabling force settlement cancels every pending request
        if op.new_options.flags & asset_flags::DISABLE_FORCE_SETTLE != 0 && asset.can_force_settle()
        {
            loop {
                let next = self
                    .store
                    .settlements_of_asset(op.asset_to_update)
                    .next()
                    .map(|s| s.id);
                match next {
                    Some(id) => self.cancel_settle_order(id)?,
                    None => break,
                }
            }
        }

        if asset.is_market_issued()
            && !asset
                .options
                .core_exchange_rate
                .same_ratio(&op.new_options.core_exchange_rate)
        {
            self.store.modify_bitasset(op.asset_to_update, |bitasset| {
                bitasset.asset_cer_updated = true;
            })?;
        }

        self.store.modify_asset(op.asset_to_update, |asset| {
            if let Some(precision) = op.new_precision {
                asset.precision = precision;
            }
            asset.options = op.new_options.clone();
        })?;
        Ok(OperationResult::Void)
    }

    fn evaluate_asset_update(&self, op: &AssetUpdate) -> Result<(), LedgerError> {
        let asset = self.store.get_asset(op.asset_to_update)?;
        if op.issuer != asset.issuer {
            return Err(LedgerError::IssuerMismatch);
        }
        let is_mia = asset.is_market_issued();
        op.new_options.validate(is_mia)?;

        let mut enabled_mask = asset.options.enabled_permissions_mask(is_mia);
        if is_mia {
            let bitasset = self.store.get_bitasset(asset.id)?;
            if bitasset.is_prediction_market {
                if op.new_options.issuer_permissions & asset_flags::GLOBAL_SETTLE == 0 {
                    return Err(LedgerError::precondition(
                        "prediction markets must keep the global-settle permission",
                    ));
                }
                enabled_mask |= asset_flags::GLOBAL_SETTLE;
            }
        }

        let dynamic = self.store.get_asset_dynamic(asset.id)?;
        if dynamic.current_supply != 0 {
            if op.new_options.issuer_permissions & !enabled_mask != 0 {
                return Err(LedgerError::precondition(
                    "cannot reinstate revoked permissions while supply is outstanding",
                ));
            }
            if op.new_precision.is_some() {
                return Err(LedgerError::precondition(
                    "cannot change precision while supply is outstanding",
                ));
            }
            if dynamic.current_supply > op.new_options.max_supply {
                return Err(LedgerError::precondition(
                    "max supply cannot drop below the current supply",
                ));
            }
        }

        let valid_flags = if is_mia {
            asset_flags::MIA_VALID_FLAGS
        } else {
            asset_flags::UIA_VALID_FLAGS
        };
        if (op.new_options.flags ^ asset.options.flags) & valid_flags & !enabled_mask != 0 {
            return Err(LedgerError::precondition(
                "flag change is forbidden by issuer permissions",
            ));
        }

        if let Some(precision) = op.new_precision {
            if precision == asset.precision {
                return Err(LedgerError::precondition("new precision does not change"));
            }
            if precision > MAX_PRECISION {
                return Err(LedgerError::precondition("precision above the maximum"));
            }
            if is_mia && self.store.get_bitasset(asset.id)?.is_prediction_market {
                return Err(LedgerError::precondition(
                    "cannot change the precision of a prediction market",
                ));
            }
            if !self.store.bitassets_backed_by(asset.id).is_empty() {
                return Err(LedgerError::precondition(
                    "cannot change precision while another bitasset is backed by this asset",
                ));
            }
        }

        let max_authorities = self.config.maximum_asset_whitelist_authorities;
        if op.new_options.whitelist_authorities.len() > max_authorities
            || op.new_options.blacklist_authorities.len() > max_authorities
        {
            return Err(LedgerError::precondition("too many list authorities"));
        }
        for authority in op
            .new_options
            .whitelist_authorities
            .iter()
            .chain(op.new_options.blacklist_authorities.iter())
        {
            self.store.get_account(*authority)?;
        }
        Ok(())
    }

    // --- update issuer ----------------------------------------------------

    pub(crate) fn apply_asset_update_issuer(
        &mut self,
        op: &AssetUpdateIssuer,
    ) -> Result<OperationResult, LedgerError> {
        let asset = self.store.get_asset(op.asset_to_update)?.clone();
        if op.issuer != asset.issuer {
            return Err(LedgerError::IssuerMismatch);
        }
        self.validate_new_issuer(&asset, op.new_issuer)?;
        let required = self.required_fee(&Operation::AssetUpdateIssuer(op.clone()));
        self.collect_fee(op.issuer, op.fee, required)?;
        self.store
            .modify_asset(op.asset_to_update, |asset| asset.issuer = op.new_issuer)?;
        Ok(OperationResult::Void)
    }

    fn validate_new_issuer(&self, asset: &AssetObject, new_issuer: AccountId) -> Result<(), LedgerError> {
        self.store.get_account(new_issuer)?;
        if asset.is_market_issued() && new_issuer == COMMITTEE_ACCOUNT {
            let backing_id = self.store.get_bitasset(asset.id)?.options.short_backing_asset;
            let backing = self.store.get_asset(backing_id)?;
            if backing.is_market_issued() {
                let grand = self.store.get_bitasset(backing_id)?.options.short_backing_asset;
                if grand != CORE_ASSET {
                    return Err(LedgerError::precondition(
                        "a committee market asset must be backed by CORE",
                    ));
                }
            } else if backing_id != CORE_ASSET {
                return Err(LedgerError::precondition(
                    "a committee market asset must be backed by CORE",
                ));
            }
        }
        Ok(())
    }

    // --- update bitasset options -----------------------------------------

    pub(crate) fn apply_asset_update_bitasset(
        &mut self,
        op: &AssetUpdateBitasset,
    ) -> Result<OperationResult, LedgerError> {
        self.evaluate_asset_update_bitasset(op)?;
        let required = self.required_fee(&Operation::AssetUpdateBitasset(op.clone()));
        self.collect_fee(op.issuer, op.fee, required)?;

        let asset = self.store.get_asset(op.asset_to_update)?.clone();
        let bitasset = self.store.get_bitasset(op.asset_to_update)?.clone();
        let old = &bitasset.options;
        let new = &op.new_options;

        let backing_changed = new.short_backing_asset != old.short_backing_asset;
        let should_update_feeds = backing_changed
            || new.minimum_feeds != old.minimum_feeds
            || new.feed_lifetime_sec != old.feed_lifetime_sec
            || new.initial_collateral_ratio != old.initial_collateral_ratio
            || new.maintenance_collateral_ratio != old.maintenance_collateral_ratio
            || new.maximum_short_squeeze_ratio != old.maximum_short_squeeze_ratio;
        let mcfr_changed = new.margin_call_fee_ratio != old.margin_call_fee_ratio;
        let reset_all_feeds = backing_changed && (asset.is_witness_fed() || asset.is_committee_fed());

        let old_feed = bitasset.current_feed;
        let now = self.time();
        let permissions = asset.options.issuer_permissions;
        self.store.modify_bitasset(op.asset_to_update, |bitasset| {
            bitasset.options = op.new_options.clone();
            if backing_changed {
                if reset_all_feeds {
                    bitasset.feeds.clear();
                } else {
                    // producers cannot be implicitly unsubscribed; keep the
                    // entries but strip their prices
                    for (_, feed) in bitasset.feeds.values_mut() {
                        feed.settlement_price = Price::null();
                    }
                }
            }
            if should_update_feeds || mcfr_changed {
                bitasset.update_median_feeds(now, permissions);
            }
        })?;

        let feed_changed = if should_update_feeds || mcfr_changed {
            let current = &self.store.get_bitasset(op.asset_to_update)?.current_feed;
            !old_feed.margin_call_params_equal(current)
        } else {
            false
        };

        if feed_changed || mcfr_changed {
            self.check_call_orders(op.asset_to_update, true)?;
        }
        Ok(OperationResult::Void)
    }

    fn evaluate_asset_update_bitasset(&self, op: &AssetUpdateBitasset) -> Result<(), LedgerError> {
        let asset = self.store.get_asset(op.asset_to_update)?;
        if !asset.is_market_issued() {
            return Err(LedgerError::NotMarketIssued(asset.id));
        }
        if op.issuer != asset.issuer {
            return Err(LedgerError::IssuerMismatch);
        }
        let bitasset = self.store.get_bitasset(asset.id)?;
        if bitasset.has_settlement() {
            return Err(LedgerError::state(
                "cannot update a bitasset after a global settlement",
            ));
        }
        op.new_options.validate()?;
        if op.new_options.feed_lifetime_sec <= self.config.block_interval_sec
            || op.new_options.force_settlement_delay_sec <= self.config.block_interval_sec
        {
            return Err(LedgerError::precondition(
                "feed lifetime and settlement delay must exceed the block interval",
            ));
        }

        if !asset.can_owner_update_mcr()
            && op.new_options.maintenance_collateral_ratio
                != bitasset.options.maintenance_collateral_ratio
        {
            return Err(LedgerError::MissingPermission("owner may update MCR"));
        }
        if !asset.can_owner_update_icr()
            && op.new_options.initial_collateral_ratio != bitasset.options.initial_collateral_ratio
        {
            return Err(LedgerError::MissingPermission("owner may update ICR"));
        }
        if !asset.can_owner_update_mssr()
            && op.new_options.maximum_short_squeeze_ratio
                != bitasset.options.maximum_short_squeeze_ratio
        {
            return Err(LedgerError::MissingPermission("owner may update MSSR"));
        }

        if op.new_options.short_backing_asset != bitasset.options.short_backing_asset {
            let dynamic = self.store.get_asset_dynamic(asset.id)?;
            if dynamic.current_supply != 0 {
                return Err(LedgerError::precondition(
                    "cannot change the backing asset while supply is outstanding",
                ));
            }
            if dynamic.accumulated_collateral_fees != 0 {
                return Err(LedgerError::precondition(
                    "claim collateral-denominated fees before changing the backing asset",
                ));
            }
            if op.new_options.short_backing_asset == asset.id {
                return Err(LedgerError::invariant("an asset cannot back itself"));
            }
            let new_backing = self.store.get_asset(op.new_options.short_backing_asset)?;
            if bitasset.is_prediction_market && asset.precision != new_backing.precision {
                return Err(LedgerError::precondition(
                    "prediction market precision must equal its backing asset's",
                ));
            }

            if asset.issuer == COMMITTEE_ACCOUNT {
                if new_backing.is_market_issued() {
                    let grand =
                        self.store.get_bitasset(new_backing.id)?.options.short_backing_asset;
                    if grand != CORE_ASSET {
                        return Err(LedgerError::precondition(
                            "a committee market asset must be backed by CORE",
                        ));
                    }
                    self.check_children_of_bitasset(asset.id, new_backing)?;
                } else if new_backing.id != CORE_ASSET {
                    return Err(LedgerError::precondition(
                        "a committee market asset must be backed by CORE or a market asset",
                    ));
                }
            } else if new_backing.id != CORE_ASSET {
                self.check_children_of_bitasset(asset.id, new_backing)?;
            }

            if new_backing.is_market_issued() {
                let grand = self.store.get_bitasset(new_backing.id)?.options.short_backing_asset;
                if grand != CORE_ASSET && self.store.get_asset(grand)?.is_market_issued() {
                    return Err(LedgerError::invariant(
                        "a bitasset cannot be backed by a bitasset backed by a bitasset",
                    ));
                }
            }
        }
        Ok(())
    }

    /// Re-check every bitasset backed by `parent` against a prospective new
    /// backing asset for `parent`.
    fn check_children_of_bitasset(
        &self,
        parent: AssetId,
        new_backing: &AssetObject,
    ) -> Result<(), LedgerError> {
        if new_backing.id == CORE_ASSET {
            return Ok(());
        }
        for child_id in self.store.bitassets_backed_by(parent) {
            let child = self.store.get_asset(child_id)?;
            if child.id == new_backing.id {
                return Err(LedgerError::invariant(
                    "backing change would create a bitasset cycle",
                ));
            }
            if child.issuer == COMMITTEE_ACCOUNT {
                return Err(LedgerError::precondition(
                    "backing change would invalidate a committee-owned child asset",
                ));
            }
            if new_backing.is_market_issued() {
                return Err(LedgerError::invariant(
                    "backing change would stack a child bitasset three deep",
                ));
            }
        }
        Ok(())
    }

    // --- feed producers & feeds ------------------------------------------

    pub(crate) fn apply_asset_update_feed_producers(
        &mut self,
        op: &AssetUpdateFeedProducers,
    ) -> Result<OperationResult, LedgerError> {
        if op.new_feed_producers.len() > self.config.maximum_asset_feed_publishers {
            return Err(LedgerError::precondition("too many feed producers"));
        }
        let asset = self.store.get_asset(op.asset_to_update)?.clone();
        if !asset.is_market_issued() {
            return Err(LedgerError::NotMarketIssued(asset.id));
        }
        if asset.is_witness_fed() || asset.is_committee_fed() {
            return Err(LedgerError::precondition(
                "feed producers are implied for witness- and committee-fed assets",
            ));
        }
        if asset.issuer != op.issuer {
            return Err(LedgerError::IssuerMismatch);
        }
        for producer in &op.new_feed_producers {
            self.store.get_account(*producer)?;
        }

        let required = self.required_fee(&Operation::AssetUpdateFeedProducers(op.clone()));
        self.collect_fee(op.issuer, op.fee, required)?;

        let now = self.time();
        let permissions = asset.options.issuer_permissions;
        self.store.modify_bitasset(op.asset_to_update, |bitasset| {
            bitasset
                .feeds
                .retain(|producer, _| op.new_feed_producers.contains(producer));
            for producer in &op.new_feed_producers {
                bitasset
                    .feeds
                    .entry(*producer)
                    .or_insert_with(|| (crate::types::Timestamp::from_secs(0), Default::default()));
            }
            bitasset.update_median_feeds(now, permissions);
        })?;

        self.check_call_orders(op.asset_to_update, true)?;
        Ok(OperationResult::Void)
    }

    pub(crate) fn apply_asset_publish_feed(
        &mut self,
        op: &AssetPublishFeed,
    ) -> Result<OperationResult, LedgerError> {
        self.evaluate_asset_publish_feed(op)?;
        let required = self.required_fee(&Operation::AssetPublishFeed(op.clone()));
        self.collect_fee(op.publisher, op.fee, required)?;

        let asset = self.store.get_asset(op.asset_id)?.clone();
        let old_feed = self.store.get_bitasset(op.asset_id)?.current_feed;

        let now = self.time();
        let permissions = asset.options.issuer_permissions;
        self.store.modify_bitasset(op.asset_id, |bitasset| {
            bitasset.feeds.insert(op.publisher, (now, op.feed));
            bitasset.update_median_feeds(now, permissions);
        })?;

        let bitasset = self.store.get_bitasset(op.asset_id)?.clone();
        if !old_feed.margin_call_params_equal(&bitasset.current_feed) {
            if bitasset.has_settlement() && bitasset.has_feed() {
                let supply = self.store.get_asset_dynamic(op.asset_id)?.current_supply;
                let should_revive = supply == 0 || {
                    let fund_collateralization = Price::new(
                        AssetAmount::new(
                            bitasset.settlement_fund,
                            bitasset.options.short_backing_asset,
                        ),
                        AssetAmount::new(supply, op.asset_id),
                    );
                    !bitasset.current_maintenance_collateralization.is_null()
                        && fund_collateralization
                            .cmp_on_pair(&bitasset.current_maintenance_collateralization)
                            == Ordering::Greater
                };
                if should_revive {
                    self.revive_bitasset(op.asset_id)?;
                }
            }
            self.check_call_orders(op.asset_id, true)?;
        }
        Ok(OperationResult::Void)
    }

    fn evaluate_asset_publish_feed(&self, op: &AssetPublishFeed) -> Result<(), LedgerError> {
        let asset = self.store.get_asset(op.asset_id)?;
        if !asset.is_market_issued() {
            return Err(LedgerError::NotMarketIssued(asset.id));
        }
        let bitasset = self.store.get_bitasset(op.asset_id)?;
        if bitasset.is_prediction_market && bitasset.has_settlement() {
            return Err(LedgerError::state(
                "no feeds may be published after a settlement event",
            ));
        }
        if op.feed.settlement_price.is_null() {
            return Err(LedgerError::precondition("feed settlement price is null"));
        }
        op.feed.validate()?;
        if op.feed.settlement_price.base.asset_id != op.asset_id
            || op.feed.settlement_price.quote.asset_id != bitasset.options.short_backing_asset
        {
            return Err(LedgerError::precondition(
                "feed must quote the asset against its backing asset",
            ));
        }
        if !op.feed.core_exchange_rate.is_null()
            && op.feed.core_exchange_rate.quote.asset_id != CORE_ASSET
        {
            return Err(LedgerError::precondition(
                "feed core exchange rate must be quoted in CORE",
            ));
        }

        if asset.is_witness_fed() {
            if !self.store.is_active_witness(op.publisher) {
                return Err(LedgerError::precondition(
                    "only active witnesses may feed this asset",
                ));
            }
        } else if asset.is_committee_fed() {
            if !self.store.is_active_committee_member(op.publisher) {
                return Err(LedgerError::precondition(
                    "only active committee members may feed this asset",
                ));
            }
        } else if !bitasset.feeds.contains_key(&op.publisher) {
            return Err(LedgerError::precondition(
                "publisher is not among the configured feed producers",
            ));
        }
        Ok(())
    }

    // --- supply & pools ---------------------------------------------------

    pub(crate) fn apply_asset_issue(&mut self, op: &AssetIssue) -> Result<OperationResult, LedgerError> {
        let asset = self.store.get_asset(op.asset_to_issue.asset_id)?.clone();
        if op.issuer != asset.issuer {
            return Err(LedgerError::IssuerMismatch);
        }
        if asset.is_market_issued() {
            return Err(LedgerError::MarketIssued(asset.id));
        }
        if op.asset_to_issue.amount <= 0 {
            return Err(LedgerError::precondition("issue amount must be positive"));
        }
        let recipient = self.store.get_account(op.issue_to_account)?;
        if !crate::account::is_authorized_asset(recipient, &asset) {
            return Err(LedgerError::precondition("recipient is not authorized to hold this asset"));
        }
        let dynamic = self.store.get_asset_dynamic(asset.id)?;
        if dynamic.current_supply + op.asset_to_issue.amount > asset.options.max_supply {
            return Err(LedgerError::invariant("issue would exceed max supply"));
        }

        let required = self.required_fee(&Operation::AssetIssue(op.clone()));
        self.collect_fee(op.issuer, op.fee, required)?;

        self.store.adjust_balance(op.issue_to_account, op.asset_to_issue)?;
        self.store.modify_asset_dynamic(asset.id, |data| {
            data.current_supply += op.asset_to_issue.amount;
        })?;
        Ok(OperationResult::Void)
    }

    pub(crate) fn apply_asset_reserve(&mut self, op: &AssetReserve) -> Result<OperationResult, LedgerError> {
        let asset = self.store.get_asset(op.amount_to_reserve.asset_id)?.clone();
        if asset.is_market_issued() {
            return Err(LedgerError::MarketIssued(asset.id));
        }
        if op.amount_to_reserve.amount <= 0 {
            return Err(LedgerError::precondition("reserve amount must be positive"));
        }
        let payer = self.store.get_account(op.payer)?;
        if !crate::account::is_authorized_asset(payer, &asset) {
            return Err(LedgerError::precondition("payer is not authorized for this asset"));
        }
        if self.store.get_balance(op.payer, asset.id) < op.amount_to_reserve.amount {
            return Err(LedgerError::InsufficientBalance(op.payer));
        }

        let required = self.required_fee(&Operation::AssetReserve(op.clone()));
        self.collect_fee(op.payer, op.fee, required)?;

        self.store.adjust_balance(
            op.payer,
            AssetAmount::new(-op.amount_to_reserve.amount, asset.id),
        )?;
        self.store.modify_asset_dynamic(asset.id, |data| {
            data.current_supply -= op.amount_to_reserve.amount;
        })?;
        Ok(OperationResult::Void)
    }

    pub(crate) fn apply_asset_fund_fee_pool(
        &mut self,
        op: &AssetFundFeePool,
    ) -> Result<OperationResult, LedgerError> {
        self.store.get_asset(op.asset_id)?;
        if op.amount <= 0 {
            return Err(LedgerError::precondition("pool funding must be positive"));
        }
        let required = self.required_fee(&Operation::AssetFundFeePool(op.clone()));
        self.collect_fee(op.from_account, op.fee, required)?;

        self.store
            .adjust_balance(op.from_account, AssetAmount::new(-op.amount, CORE_ASSET))?;
        self.store
            .modify_asset_dynamic(op.asset_id, |data| data.fee_pool += op.amount)?;
        Ok(OperationResult::Void)
    }

    pub(crate) fn apply_asset_claim_fees(
        &mut self,
        op: &AssetClaimFees,
    ) -> Result<OperationResult, LedgerError> {
        if op.amount_to_claim.amount <= 0 {
            return Err(LedgerError::precondition("claim must be positive"));
        }
        let container_id = op.claim_from_asset.unwrap_or(op.amount_to_claim.asset_id);
        let container = self.store.get_asset(container_id)?.clone();
        if container.issuer != op.issuer {
            return Err(LedgerError::IssuerMismatch);
        }

        let own_asset = container.id == op.amount_to_claim.asset_id;
        if !own_asset {
            let backing = self
                .store
                .find_bitasset(container.id)
                .map(|bitasset| bitasset.options.short_backing_asset);
            if backing != Some(op.amount_to_claim.asset_id) {
                return Err(LedgerError::precondition(
                    "container asset holds no fees in the claimed asset",
                ));
            }
        }
        let dynamic = self.store.get_asset_dynamic(container.id)?;
        let available = if own_asset {
            dynamic.accumulated_fees
        } else {
            dynamic.accumulated_collateral_fees
        };
        if op.amount_to_claim.amount > available {
            return Err(LedgerError::precondition("claim exceeds the accumulated fees"));
        }

        let required = self.required_fee(&Operation::AssetClaimFees(op.clone()));
        self.collect_fee(op.issuer, op.fee, required)?;

        self.store.modify_asset_dynamic(container.id, |data| {
            if own_asset {
                data.accumulated_fees -= op.amount_to_claim.amount;
            } else {
                data.accumulated_collateral_fees -= op.amount_to_claim.amount;
            }
        })?;
        self.store.adjust_balance(op.issuer, op.amount_to_claim)?;
        Ok(OperationResult::Void)
    }

    pub(crate) fn apply_asset_claim_pool(
        &mut self,
        op: &AssetClaimPool,
    ) -> Result<OperationResult, LedgerError> {
        let asset = self.store.get_asset(op.asset_id)?;
        if asset.issuer != op.issuer {
            return Err(LedgerError::IssuerMismatch);
        }
        if op.amount_to_claim <= 0 {
            return Err(LedgerError::precondition("claim must be positive"));
        }
        if op.amount_to_claim > self.store.get_asset_dynamic(op.asset_id)?.fee_pool {
            return Err(LedgerError::precondition("claim exceeds the fee pool"));
        }

        let required = self.required_fee(&Operation::AssetClaimPool(op.clone()));
        self.collect_fee(op.issuer, op.fee, required)?;

        self.store
            .modify_asset_dynamic(op.asset_id, |data| data.fee_pool -= op.amount_to_claim)?;
        self.store
            .adjust_balance(op.issuer, AssetAmount::new(op.amount_to_claim, CORE_ASSET))?;
        Ok(OperationResult::Void)
    }

    // --- settlement operations -------------------------------------------

    pub(crate) fn apply_asset_global_settle(
        &mut self,
        op: &AssetGlobalSettle,
    ) -> Result<OperationResult, LedgerError> {
        let asset = self.store.get_asset(op.asset_to_settle)?.clone();
        if !asset.is_market_issued() {
            return Err(LedgerError::NotMarketIssued(asset.id));
        }
        if !asset.can_global_settle() {
            return Err(LedgerError::MissingPermission("global settle"));
        }
        if asset.issuer != op.issuer {
            return Err(LedgerError::IssuerMismatch);
        }
        if self.store.get_asset_dynamic(asset.id)?.current_supply <= 0 {
            return Err(LedgerError::state("cannot globally settle an asset with zero supply"));
        }
        let bitasset = self.store.get_bitasset(asset.id)?;
        if bitasset.has_settlement() {
            return Err(LedgerError::state("asset is already globally settled"));
        }
        if op.settle_price.base.asset_id != asset.id
            || op.settle_price.quote.asset_id != bitasset.options.short_backing_asset
        {
            return Err(LedgerError::precondition(
                "settle price must quote the asset against its backing asset",
            ));
        }
        let least = self
            .store
            .least_collateralized_call(asset.id)
            .copied()
            .ok_or_else(|| LedgerError::state("no debt position exists for this asset"))?;
        if least.get_debt().mul_floor(&op.settle_price)?.amount > least.collateral {
            return Err(LedgerError::precondition(
                "the least collateralized short cannot settle at the supplied price",
            ));
        }

        let required = self.required_fee(&Operation::AssetGlobalSettle(op.clone()));
        self.collect_fee(op.issuer, op.fee, required)?;

        self.globally_settle_asset(op.asset_to_settle, op.settle_price)?;
        Ok(OperationResult::Void)
    }

    pub(crate) fn apply_asset_settle(&mut self, op: &AssetSettle) -> Result<OperationResult, LedgerError> {
        if op.amount.amount <= 0 {
            return Err(LedgerError::precondition("settle amount must be positive"));
        }
        let asset = self.store.get_asset(op.amount.asset_id)?.clone();
        if !asset.is_market_issued() {
            return Err(LedgerError::NotMarketIssued(asset.id));
        }
        let bitasset = self.store.get_bitasset(asset.id)?.clone();
        if !asset.can_force_settle() && !bitasset.has_settlement() {
            return Err(LedgerError::MissingPermission("force settle"));
        }
        if bitasset.is_prediction_market && !bitasset.has_settlement() {
            return Err(LedgerError::state(
                "a prediction market settles only after the settlement event",
            ));
        }
        if !bitasset.has_feed() && !bitasset.has_settlement() {
            return Err(LedgerError::InsufficientFeeds(
                "cannot force settle with no price feed",
            ));
        }
        if self.store.get_balance(op.account, asset.id) < op.amount.amount {
            return Err(LedgerError::InsufficientBalance(op.account));
        }

        let required = self.required_fee(&Operation::AssetSettle(op.clone()));
        self.collect_fee(op.account, op.fee, required)?;

        if bitasset.has_settlement() {
            let credited = self.instant_settle(op.account, op.amount)?;
            return Ok(OperationResult::SettledAmount(credited));
        }

        self.store
            .adjust_balance(op.account, AssetAmount::new(-op.amount.amount, asset.id))?;
        let id = self.store.next_settlement_id();
        let delay = bitasset.options.force_settlement_delay_sec as i64;
        self.store.insert_settlement(ForceSettlement {
            id,
            owner: op.account,
            balance: op.amount,
            settlement_date: self.time().plus_secs(delay),
        });
        Ok(OperationResult::NewSettlement(id))
    }
}
