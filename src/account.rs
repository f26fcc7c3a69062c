//! The thin slice of the account model the market core needs: identity for
//! fee routing (registrar and referrer), running statistics, and the
//! whitelist machinery that gates who may hold a restricted asset.
//!
//! Account creation, authorities and the rest of the account lifecycle live
//! outside this core.

use crate::asset::{asset_flags, AssetObject};
use crate::types::{AccountId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Receives the network share of market fees and any reward whose recipient
/// resolves to the temp account.
pub const COMMITTEE_ACCOUNT: AccountId = AccountId(0);
/// Feeds for witness-fed assets must come from members of this set's roster.
pub const WITNESS_ACCOUNT: AccountId = AccountId(1);
/// Sentinel for "nobody"; funds routed here are redirected to the committee.
pub const TEMP_ACCOUNT: AccountId = AccountId(2);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountStatistics {
    /// Core-asset value locked in open orders and call positions.
    pub total_core_in_orders: i64,
    /// Fees paid, pending the maintenance-interval cashback split.
    pub pending_fees: i64,
    /// Fees small enough to skip vesting.
    pub pending_vested_fees: i64,
}

impl AccountStatistics {
    /// Route a paid core fee. Amounts above the vesting threshold go to the
    /// vesting bucket, dust pays out directly at the next maintenance.
    pub fn pay_fee(&mut self, core_fee: i64, vesting_threshold: i64) {
        if core_fee > vesting_threshold {
            self.pending_fees += core_fee;
        } else {
            self.pending_vested_fees += core_fee;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub registrar: AccountId,
    pub referrer: AccountId,
    /// Share of the registrar's market-fee reward passed on to the
    /// referrer, in bp.
    pub referrer_rewards_percentage: u16,
    /// Whitelist authorities that have listed this account.
    pub whitelisting_accounts: BTreeSet<AccountId>,
    /// Blacklist authorities that have listed this account.
    pub blacklisting_accounts: BTreeSet<AccountId>,
    pub statistics: AccountStatistics,
    pub created_at: Timestamp,
}

impl Account {
    pub fn new(id: AccountId, registrar: AccountId, referrer: AccountId, created_at: Timestamp) -> Self {
        Self {
            id,
            registrar,
            referrer,
            referrer_rewards_percentage: 0,
            whitelisting_accounts: BTreeSet::new(),
            blacklisting_accounts: BTreeSet::new(),
            statistics: AccountStatistics::default(),
            created_at,
        }
    }
}

/// Whether `account` may hold or trade `asset`. Unrestricted assets admit
/// everyone; a whitelisting asset requires a listing from one of its
/// whitelist authorities and no listing from a blacklist authority.
pub fn is_authorized_asset(account: &Account, asset: &AssetObject) -> bool {
    if asset.options.flags & asset_flags::WHITE_LIST == 0 {
        return true;
    }
    if !asset.options.whitelist_authorities.is_empty()
        && asset
            .options
            .whitelist_authorities
            .intersection(&account.whitelisting_accounts)
            .next()
            .is_none()
    {
        return false;
    }
    asset
        .options
        .blacklist_authorities
        .intersection(&account.blacklisting_accounts)
        .next()
        .is_none()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::{AssetObject, AssetOptions};
    use crate::types::{AssetId, Price};

    fn account(id: u64) -> Account {
        Account::new(AccountId(id), COMMITTEE_ACCOUNT, COMMITTEE_ACCOUNT, Timestamp::from_secs(0))
    }

    fn listed_asset(whitelist: &[u64], blacklist: &[u64], flags: u16) -> AssetObject {
        let mut options = AssetOptions::new(1_000_000, Price::null());
        options.flags = flags;
        options.issuer_permissions |= flags;
        options.whitelist_authorities = whitelist.iter().map(|id| AccountId(*id)).collect();
        options.blacklist_authorities = blacklist.iter().map(|id| AccountId(*id)).collect();
        AssetObject {
            id: AssetId(5),
            symbol: "TEST".to_string(),
            precision: 4,
            issuer: AccountId(1),
            options,
            market_issued: false,
        }
    }

    #[test]
    fn fee_routing_respects_threshold() {
        let mut stats = AccountStatistics::default();
        stats.pay_fee(50, 100);
        stats.pay_fee(500, 100);
        assert_eq!(stats.pending_vested_fees, 50);
        assert_eq!(stats.pending_fees, 500);
    }

    #[test]
    fn unrestricted_asset_admits_everyone() {
        let asset = listed_asset(&[9], &[], 0);
        assert!(is_authorized_asset(&account(3), &asset));
    }

    #[test]
    fn whitelist_gates_membership() {
        let asset = listed_asset(&[9], &[], asset_flags::WHITE_LIST);
        let mut member = account(3);
        assert!(!is_authorized_asset(&member, &asset));
        member.whitelisting_accounts.insert(AccountId(9));
        assert!(is_authorized_asset(&member, &asset));
    }

    #[test]
    fn blacklist_overrides_whitelist() {
        let asset = listed_asset(&[9], &[9], asset_flags::WHITE_LIST);
        let mut member = account(3);
        member.whitelisting_accounts.insert(AccountId(9));
        member.blacklisting_accounts.insert(AccountId(9));
        assert!(!is_authorized_asset(&member, &asset));
    }
}
