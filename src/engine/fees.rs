//! The fee router: market-fee calculation and its four-way split between
//! issuer, network, registrar and referrer, plus the collateral-denominated
//! force-settle fee.
//!
//! Splits are computed floor-wise from the original amounts, never from
//! running totals, so `network + referrer + registrar + residue` always
//! reproduces the total fee bit-exactly.

use crate::account::{is_authorized_asset, COMMITTEE_ACCOUNT, TEMP_ACCOUNT};
use crate::asset::AssetObject;
use crate::error::LedgerError;
use crate::types::{percent, AccountId, AssetAmount, AssetId};

use super::Ledger;

impl Ledger {
    /// The market fee charged on `receives` of `trade_asset`. Maker fills
    /// use the maker percent; taker fills use the taker percent when one is
    /// configured, else the maker percent. Capped at `max_market_fee`.
    pub(crate) fn calculate_market_fee(
        &self,
        trade_asset: &AssetObject,
        trade_amount: AssetAmount,
        is_maker: bool,
    ) -> Result<AssetAmount, LedgerError> {
        debug_assert_eq!(trade_asset.id, trade_amount.asset_id);
        if !trade_asset.charges_market_fees() {
            return Ok(trade_asset.amount(0));
        }
        if is_maker && trade_asset.options.market_fee_percent == 0 {
            return Ok(trade_asset.amount(0));
        }
        let taker_percent = trade_asset.options.taker_fee_percent;
        if !is_maker && taker_percent == Some(0) {
            return Ok(trade_asset.amount(0));
        }
        let fee_percent = if is_maker {
            trade_asset.options.market_fee_percent
        } else {
            taker_percent.unwrap_or(trade_asset.options.market_fee_percent)
        };
        let mut fee = percent(trade_amount.amount, fee_percent)?;
        if fee > trade_asset.options.max_market_fee {
            fee = trade_asset.options.max_market_fee;
        }
        Ok(trade_asset.amount(fee))
    }

    /// Charge the market fee on a fill and distribute it: network share to
    /// the committee's vesting balance, reward share split between the
    /// seller's referrer and registrar (each gated on asset authorization),
    /// residue accumulated for the issuer. Returns the total fee charged.
    pub(crate) fn pay_market_fees(
        &mut self,
        seller: Option<AccountId>,
        recv_asset: &AssetObject,
        receives: AssetAmount,
        is_maker: bool,
    ) -> Result<AssetAmount, LedgerError> {
        let market_fees = self.calculate_market_fee(recv_asset, receives, is_maker)?;
        if market_fees.amount > receives.amount {
            return Err(LedgerError::invariant("market fee exceeds the fill"));
        }
        let mut issuer_fee = market_fees.amount;
        if issuer_fee > 0 {
            let network_percent = self.config.market_fee_network_percent;
            if network_percent > 0 {
                let network_fee = percent(issuer_fee, network_percent)?;
                if network_fee > 0 {
                    self.store.deposit_market_fee_vesting(
                        COMMITTEE_ACCOUNT,
                        AssetAmount::new(network_fee, recv_asset.id),
                    );
                    issuer_fee -= network_fee;
                }
            }
        }

        if issuer_fee > 0 {
            let mut reward = 0i64;
            if let Some(seller_id) = seller {
                let seller_account = self.store.get_account(seller_id)?.clone();
                let sharing_allowed = match &recv_asset.options.whitelist_market_fee_sharing {
                    None => true,
                    Some(list) => list.is_empty() || list.contains(&seller_account.registrar),
                };
                let reward_percent = recv_asset.options.reward_percent.unwrap_or(0);
                if sharing_allowed && reward_percent > 0 {
                    let reward_value = percent(issuer_fee, reward_percent)?;
                    let registrar_account = self.store.get_account(seller_account.registrar)?;
                    if reward_value > 0 && is_authorized_asset(registrar_account, recv_asset) {
                        reward = reward_value;

                        // funds aimed at the temp account go to the committee
                        let mut registrar = seller_account.registrar;
                        let mut referrer = seller_account.referrer;
                        if registrar == TEMP_ACCOUNT {
                            registrar = COMMITTEE_ACCOUNT;
                        }
                        if referrer == TEMP_ACCOUNT {
                            referrer = COMMITTEE_ACCOUNT;
                        }

                        let mut registrar_reward = reward;
                        if referrer != registrar {
                            let referrer_reward =
                                percent(reward, seller_account.referrer_rewards_percentage)?;
                            let referrer_account = self.store.get_account(referrer)?;
                            if referrer_reward > 0
                                && is_authorized_asset(referrer_account, recv_asset)
                            {
                                registrar_reward -= referrer_reward;
                                self.store.deposit_market_fee_vesting(
                                    referrer,
                                    AssetAmount::new(referrer_reward, recv_asset.id),
                                );
                            }
                        }
                        if registrar_reward > 0 {
                            self.store.deposit_market_fee_vesting(
                                registrar,
                                AssetAmount::new(registrar_reward, recv_asset.id),
                            );
                        }
                    }
                }
            }
            if issuer_fee > reward {
                let residue = issuer_fee - reward;
                self.store
                    .modify_asset_dynamic(recv_asset.id, |data| data.accumulated_fees += residue)?;
            }
        }

        Ok(market_fees)
    }

    /// The settled asset's issuer takes a cut of the collateral leaving the
    /// settlement, accumulated in the backing asset.
    pub(crate) fn pay_force_settle_fees(
        &mut self,
        settled_asset_id: AssetId,
        collateral_receives: AssetAmount,
    ) -> Result<AssetAmount, LedgerError> {
        debug_assert_ne!(settled_asset_id, collateral_receives.asset_id);
        let bitasset = self.store.get_bitasset(settled_asset_id)?;
        let fee_percent = bitasset.options.force_settle_fee_percent.unwrap_or(0);
        if fee_percent == 0 {
            return Ok(AssetAmount::zero(collateral_receives.asset_id));
        }
        let fee = percent(collateral_receives.amount, fee_percent)?;
        let fee = AssetAmount::new(fee, collateral_receives.asset_id);
        if fee.amount > 0 {
            self.accumulate_fee(settled_asset_id, fee)?;
        }
        Ok(fee)
    }
}
