//! Asset entities: static options, dynamic supply data, and the bitasset
//! (market-issued) extension with its feed machinery.
//!
//! The median feed computed here is the single source of truth for margin
//! calls: `check_call_orders` prices everything off `current_feed` and
//! `current_maintenance_collateralization`, so this module must be exactly
//! reproducible across nodes.

use crate::types::{
    percent, AccountId, AssetAmount, AssetId, Price, Timestamp, COLLATERAL_RATIO_DENOM,
    HUNDRED_PERCENT, MAX_SHARE_SUPPLY,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Flag and permission bits. Flags toggle live behavior; `issuer_permissions`
/// bounds which flags the issuer may ever enable. `GLOBAL_SETTLE` and the
/// `CAN_OWNER_UPDATE_*` bits are permission-only and never valid as flags.
pub mod asset_flags {
    pub const CHARGE_MARKET_FEE: u16 = 0x0001;
    pub const WHITE_LIST: u16 = 0x0002;
    pub const OVERRIDE_AUTHORITY: u16 = 0x0004;
    pub const TRANSFER_RESTRICTED: u16 = 0x0008;
    pub const DISABLE_FORCE_SETTLE: u16 = 0x0010;
    pub const GLOBAL_SETTLE: u16 = 0x0020;
    pub const DISABLE_CONFIDENTIAL: u16 = 0x0040;
    pub const WITNESS_FED: u16 = 0x0080;
    pub const COMMITTEE_FED: u16 = 0x0100;
    pub const CAN_OWNER_UPDATE_MCR: u16 = 0x0200;
    pub const CAN_OWNER_UPDATE_ICR: u16 = 0x0400;
    pub const CAN_OWNER_UPDATE_MSSR: u16 = 0x0800;

    /// Flags a user-issued asset may carry.
    pub const UIA_VALID_FLAGS: u16 = CHARGE_MARKET_FEE
        | WHITE_LIST
        | OVERRIDE_AUTHORITY
        | TRANSFER_RESTRICTED
        | DISABLE_CONFIDENTIAL;

    /// Flags a market-issued asset may carry.
    pub const MIA_VALID_FLAGS: u16 =
        UIA_VALID_FLAGS | DISABLE_FORCE_SETTLE | WITNESS_FED | COMMITTEE_FED;

    pub const UIA_VALID_PERMISSIONS: u16 = UIA_VALID_FLAGS;

    pub const MIA_VALID_PERMISSIONS: u16 = MIA_VALID_FLAGS
        | GLOBAL_SETTLE
        | CAN_OWNER_UPDATE_MCR
        | CAN_OWNER_UPDATE_ICR
        | CAN_OWNER_UPDATE_MSSR;
}

/// Collateral ratios are x1000 and must stay within this band.
pub const MIN_COLLATERAL_RATIO: u16 = 1_001;
pub const MAX_COLLATERAL_RATIO: u16 = 32_000;

pub const MAX_PRECISION: u8 = 12;

/// Symbol grammar: 3 to 16 characters, `A-Z` and digits, starting with a
/// letter, with at most one structural dot (sub-asset separator).
pub fn is_valid_symbol(symbol: &str) -> bool {
    let len = symbol.len();
    if !(3..=16).contains(&len) {
        return false;
    }
    let mut chars = symbol.chars();
    match chars.next() {
        Some(c) if c.is_ascii_uppercase() => {}
        _ => return false,
    }
    let mut dots = 0;
    for c in symbol.chars() {
        match c {
            'A'..='Z' | '0'..='9' => {}
            '.' => dots += 1,
            _ => return false,
        }
    }
    dots <= 1 && !symbol.ends_with('.') && !symbol.starts_with('.')
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetOptions {
    pub max_supply: i64,
    /// Maker-side market fee, in bp.
    pub market_fee_percent: u16,
    /// Taker-side market fee, in bp; falls back to the maker percent when
    /// absent.
    pub taker_fee_percent: Option<u16>,
    /// Absolute cap applied after the percentage.
    pub max_market_fee: i64,
    pub issuer_permissions: u16,
    pub flags: u16,
    /// Rate at which this asset's fee pool converts operation fees to CORE.
    pub core_exchange_rate: Price,
    pub whitelist_authorities: BTreeSet<AccountId>,
    pub blacklist_authorities: BTreeSet<AccountId>,
    /// Share of the issuer's market fee rewarded to registrars/referrers,
    /// in bp.
    pub reward_percent: Option<u16>,
    /// When present and non-empty, only sellers with a listed registrar
    /// earn the reward.
    pub whitelist_market_fee_sharing: Option<BTreeSet<AccountId>>,
}

impl AssetOptions {
    pub fn new(max_supply: i64, core_exchange_rate: Price) -> Self {
        Self {
            max_supply,
            market_fee_percent: 0,
            taker_fee_percent: None,
            max_market_fee: MAX_SHARE_SUPPLY,
            issuer_permissions: asset_flags::UIA_VALID_PERMISSIONS,
            flags: 0,
            core_exchange_rate,
            whitelist_authorities: BTreeSet::new(),
            blacklist_authorities: BTreeSet::new(),
            reward_percent: None,
            whitelist_market_fee_sharing: None,
        }
    }

    /// The permission bits currently enabled, restricted to the bits valid
    /// for this asset kind.
    pub fn enabled_permissions_mask(&self, market_issued: bool) -> u16 {
        let valid = if market_issued {
            asset_flags::MIA_VALID_PERMISSIONS
        } else {
            asset_flags::UIA_VALID_PERMISSIONS
        };
        self.issuer_permissions & valid
    }

    pub fn validate(&self, market_issued: bool) -> Result<(), crate::error::LedgerError> {
        use crate::error::LedgerError;
        if self.max_supply <= 0 || self.max_supply > MAX_SHARE_SUPPLY {
            return Err(LedgerError::precondition("max_supply out of range"));
        }
        if self.market_fee_percent > HUNDRED_PERCENT {
            return Err(LedgerError::precondition("market_fee_percent above 100%"));
        }
        if let Some(taker) = self.taker_fee_percent {
            if taker > HUNDRED_PERCENT {
                return Err(LedgerError::precondition("taker_fee_percent above 100%"));
            }
        }
        if let Some(reward) = self.reward_percent {
            if reward > HUNDRED_PERCENT {
                return Err(LedgerError::precondition("reward_percent above 100%"));
            }
        }
        if self.max_market_fee < 0 || self.max_market_fee > MAX_SHARE_SUPPLY {
            return Err(LedgerError::precondition("max_market_fee out of range"));
        }
        self.validate_flags(market_issued)
    }

    pub fn validate_flags(&self, market_issued: bool) -> Result<(), crate::error::LedgerError> {
        use crate::error::LedgerError;
        let valid_flags = if market_issued {
            asset_flags::MIA_VALID_FLAGS
        } else {
            asset_flags::UIA_VALID_FLAGS
        };
        if self.flags & !valid_flags != 0 {
            return Err(LedgerError::precondition("invalid flag bits for this asset kind"));
        }
        if self.flags & !self.issuer_permissions != 0 {
            return Err(LedgerError::precondition(
                "flags outside of issuer permissions",
            ));
        }
        let valid_permissions = if market_issued {
            asset_flags::MIA_VALID_PERMISSIONS
        } else {
            asset_flags::UIA_VALID_PERMISSIONS
        };
        if self.issuer_permissions & !valid_permissions != 0 {
            return Err(LedgerError::precondition(
                "invalid permission bits for this asset kind",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetObject {
    pub id: AssetId,
    pub symbol: String,
    /// Number of display decimals, 0..=12. Never enters arithmetic.
    pub precision: u8,
    pub issuer: AccountId,
    pub options: AssetOptions,
    /// True when a bitasset record exists for this asset.
    pub market_issued: bool,
}

impl AssetObject {
    pub fn is_market_issued(&self) -> bool {
        self.market_issued
    }

    pub fn amount(&self, value: i64) -> AssetAmount {
        AssetAmount::new(value, self.id)
    }

    pub fn charges_market_fees(&self) -> bool {
        self.options.flags & asset_flags::CHARGE_MARKET_FEE != 0
    }

    pub fn can_force_settle(&self) -> bool {
        self.options.flags & asset_flags::DISABLE_FORCE_SETTLE == 0
    }

    pub fn can_global_settle(&self) -> bool {
        self.options.issuer_permissions & asset_flags::GLOBAL_SETTLE != 0
    }

    pub fn can_owner_update_mcr(&self) -> bool {
        self.options.issuer_permissions & asset_flags::CAN_OWNER_UPDATE_MCR != 0
    }

    pub fn can_owner_update_icr(&self) -> bool {
        self.options.issuer_permissions & asset_flags::CAN_OWNER_UPDATE_ICR != 0
    }

    pub fn can_owner_update_mssr(&self) -> bool {
        self.options.issuer_permissions & asset_flags::CAN_OWNER_UPDATE_MSSR != 0
    }

    pub fn is_witness_fed(&self) -> bool {
        self.options.flags & asset_flags::WITNESS_FED != 0
    }

    pub fn is_committee_fed(&self) -> bool {
        self.options.flags & asset_flags::COMMITTEE_FED != 0
    }
}

/// Supply-side state, mutated on every issue, fill and fee event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetDynamicData {
    pub current_supply: i64,
    pub confidential_supply: i64,
    /// Fees accumulated in the asset itself.
    pub accumulated_fees: i64,
    /// Fees accumulated in the backing asset (margin call and force settle
    /// fees).
    pub accumulated_collateral_fees: i64,
    /// CORE held to pay operation fees quoted in this asset.
    pub fee_pool: i64,
}

/// A published feed: the settlement price plus the margin parameters the
/// publisher vouches for. Every numeric field is median-filtered
/// independently across publishers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceFeed {
    /// Debt per collateral; base asset is the market-issued asset.
    pub settlement_price: Price,
    /// Optional CORE quote used to refresh the asset's core exchange rate.
    pub core_exchange_rate: Price,
    /// MCR x1000.
    pub maintenance_collateral_ratio: u16,
    /// MSSR x1000.
    pub maximum_short_squeeze_ratio: u16,
    /// ICR x1000.
    pub initial_collateral_ratio: u16,
    /// MCFR x1000; collateral retained by the issuer on margin-call fills.
    pub margin_call_fee_ratio: u16,
}

impl Default for PriceFeed {
    fn default() -> Self {
        Self {
            settlement_price: Price::null(),
            core_exchange_rate: Price::null(),
            maintenance_collateral_ratio: 1_750,
            maximum_short_squeeze_ratio: 1_500,
            initial_collateral_ratio: 1_750,
            margin_call_fee_ratio: 0,
        }
    }
}

impl PriceFeed {
    pub fn is_null(&self) -> bool {
        self.settlement_price.is_null()
    }

    pub fn validate(&self) -> Result<(), crate::error::LedgerError> {
        use crate::error::LedgerError;
        for ratio in [
            self.maintenance_collateral_ratio,
            self.maximum_short_squeeze_ratio,
            self.initial_collateral_ratio,
        ] {
            if !(MIN_COLLATERAL_RATIO..=MAX_COLLATERAL_RATIO).contains(&ratio) {
                return Err(LedgerError::precondition("collateral ratio out of range"));
            }
        }
        if self.margin_call_fee_ratio >= self.maximum_short_squeeze_ratio {
            return Err(LedgerError::precondition("MCFR must be below MSSR"));
        }
        Ok(())
    }

    /// Collateral per debt at which a position enters margin-call
    /// territory: `~settlement_price * MCR / 1000`.
    pub fn maintenance_collateralization(&self) -> Price {
        self.settlement_price
            .invert()
            .scaled(self.maintenance_collateral_ratio as u32, COLLATERAL_RATIO_DENOM as u32)
    }

    /// Collateral per debt a fresh or grown position must reach:
    /// `~settlement_price * ICR / 1000`.
    pub fn initial_collateralization(&self) -> Price {
        self.settlement_price
            .invert()
            .scaled(self.initial_collateral_ratio as u32, COLLATERAL_RATIO_DENOM as u32)
    }

    /// The worst (fewest debt per collateral) price a margin call can be
    /// forced to accept: `settlement_price * 1000 / MSSR`.
    pub fn max_short_squeeze_price(&self) -> Price {
        self.settlement_price
            .scaled(COLLATERAL_RATIO_DENOM as u32, self.maximum_short_squeeze_ratio as u32)
    }

    /// Price at which margin calls sit on the book:
    /// `settlement_price * 1000 / (MSSR - MCFR)`. Equal to the short
    /// squeeze price when no margin call fee is configured; the spread
    /// between the two is the issuer's fee.
    pub fn margin_call_order_price(&self) -> Price {
        let numerator = if self.margin_call_fee_ratio < self.maximum_short_squeeze_ratio {
            self.maximum_short_squeeze_ratio - self.margin_call_fee_ratio
        } else {
            1
        };
        self.settlement_price
            .scaled(COLLATERAL_RATIO_DENOM as u32, numerator as u32)
    }

    /// `MSSR / (MSSR - MCFR)` as an exact ratio; scales a match price up to
    /// the price the call actually relinquishes collateral at.
    pub fn margin_call_pays_ratio(&self) -> (u32, u32) {
        let numerator = if self.margin_call_fee_ratio < self.maximum_short_squeeze_ratio {
            self.maximum_short_squeeze_ratio - self.margin_call_fee_ratio
        } else {
            1
        };
        (self.maximum_short_squeeze_ratio as u32, numerator as u32)
    }

    /// Two median feeds are interchangeable for margin-call purposes when
    /// these four parameters agree.
    pub fn margin_call_params_equal(&self, other: &PriceFeed) -> bool {
        self.settlement_price.same_ratio(&other.settlement_price)
            && self.maintenance_collateral_ratio == other.maintenance_collateral_ratio
            && self.maximum_short_squeeze_ratio == other.maximum_short_squeeze_ratio
            && self.margin_call_fee_ratio == other.margin_call_fee_ratio
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitassetOptions {
    pub short_backing_asset: AssetId,
    /// Feeds older than this are ignored by the median.
    pub feed_lifetime_sec: u32,
    /// Below this many live feeds the asset has no price.
    pub minimum_feeds: u8,
    pub force_settlement_delay_sec: u32,
    /// Haircut a settler takes relative to the feed, in bp.
    pub force_settlement_offset_percent: u16,
    /// Owner overrides; each only takes effect with the matching
    /// `CAN_OWNER_UPDATE_*` permission, except MCFR and the settle fee
    /// which are always issuer-controlled.
    pub maintenance_collateral_ratio: Option<u16>,
    pub initial_collateral_ratio: Option<u16>,
    pub maximum_short_squeeze_ratio: Option<u16>,
    pub margin_call_fee_ratio: Option<u16>,
    pub force_settle_fee_percent: Option<u16>,
}

impl BitassetOptions {
    pub fn new(short_backing_asset: AssetId) -> Self {
        Self {
            short_backing_asset,
            feed_lifetime_sec: 60 * 60 * 24,
            minimum_feeds: 1,
            force_settlement_delay_sec: 60 * 60 * 24,
            force_settlement_offset_percent: 0,
            maintenance_collateral_ratio: None,
            initial_collateral_ratio: None,
            maximum_short_squeeze_ratio: None,
            margin_call_fee_ratio: None,
            force_settle_fee_percent: None,
        }
    }

    pub fn validate(&self) -> Result<(), crate::error::LedgerError> {
        use crate::error::LedgerError;
        if self.minimum_feeds == 0 {
            return Err(LedgerError::precondition("minimum_feeds must be positive"));
        }
        if self.force_settlement_offset_percent >= HUNDRED_PERCENT {
            return Err(LedgerError::precondition(
                "force_settlement_offset_percent must stay below 100%",
            ));
        }
        for ratio in [
            self.maintenance_collateral_ratio,
            self.initial_collateral_ratio,
            self.maximum_short_squeeze_ratio,
        ]
        .into_iter()
        .flatten()
        {
            if !(MIN_COLLATERAL_RATIO..=MAX_COLLATERAL_RATIO).contains(&ratio) {
                return Err(LedgerError::precondition("collateral ratio override out of range"));
            }
        }
        if let Some(mcfr) = self.margin_call_fee_ratio {
            if mcfr >= COLLATERAL_RATIO_DENOM {
                return Err(LedgerError::precondition("MCFR override out of range"));
            }
        }
        if let Some(fsf) = self.force_settle_fee_percent {
            if fsf > HUNDRED_PERCENT {
                return Err(LedgerError::precondition("force_settle_fee_percent above 100%"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitassetData {
    pub asset_id: AssetId,
    pub options: BitassetOptions,
    /// Publisher -> (publication time, feed). Kept for exactly the
    /// configured producers (or whoever the witness/committee roster
    /// admits).
    pub feeds: BTreeMap<AccountId, (Timestamp, PriceFeed)>,
    /// The median feed all market machinery prices off.
    pub current_feed: PriceFeed,
    pub current_feed_publication_time: Timestamp,
    /// `~settlement_price * MCR / 1000`; null while there is no feed.
    pub current_maintenance_collateralization: Price,
    pub is_prediction_market: bool,
    /// Set when globally settled: supply per gathered collateral.
    pub settlement_price: Price,
    /// Backing-asset amount held for settled holders.
    pub settlement_fund: i64,
    /// The issuer changed the CER through an asset update; maintenance may
    /// skip the feed-derived refresh.
    pub asset_cer_updated: bool,
    /// Amount force-settled in the current maintenance period.
    pub force_settled_volume: i64,
}

impl BitassetData {
    pub fn new(asset_id: AssetId, options: BitassetOptions, is_prediction_market: bool) -> Self {
        Self {
            asset_id,
            options,
            feeds: BTreeMap::new(),
            current_feed: PriceFeed::default(),
            current_feed_publication_time: Timestamp::from_secs(0),
            current_maintenance_collateralization: Price::null(),
            is_prediction_market,
            settlement_price: Price::null(),
            settlement_fund: 0,
            asset_cer_updated: false,
            force_settled_volume: 0,
        }
    }

    pub fn has_settlement(&self) -> bool {
        !self.settlement_price.is_null()
    }

    pub fn has_feed(&self) -> bool {
        !self.current_feed.settlement_price.is_null()
    }

    /// Cap on force settlement for the current maintenance period.
    pub fn max_force_settlement_volume(
        &self,
        current_supply: i64,
        volume_bp: u16,
    ) -> Result<i64, crate::error::LedgerError> {
        percent(current_supply, volume_bp)
    }

    /// Recompute `current_feed` from the published feeds.
    ///
    /// Entries older than the feed lifetime or with a null price are
    /// discarded; short of `minimum_feeds` the asset has no price. Each
    /// numeric field takes the median of the live samples independently
    /// (even counts take the lower middle), then the owner overrides are
    /// applied subject to `issuer_permissions`.
    pub fn update_median_feeds(&mut self, now: Timestamp, issuer_permissions: u16) {
        let lifetime = self.options.feed_lifetime_sec as i64;
        let mut live: Vec<PriceFeed> = Vec::new();
        let mut oldest = now;
        for (published_at, feed) in self.feeds.values() {
            if now.as_secs() - published_at.as_secs() < lifetime && !feed.settlement_price.is_null() {
                live.push(*feed);
                if *published_at < oldest {
                    oldest = *published_at;
                }
            }
        }
        self.current_feed_publication_time = now;
        if live.is_empty() || live.len() < self.options.minimum_feeds as usize {
            self.current_feed = PriceFeed::default();
            self.current_maintenance_collateralization = Price::null();
            return;
        }
        self.current_feed_publication_time = oldest;

        let mid = (live.len() - 1) / 2;
        let median_ratio = |mut samples: Vec<u16>| -> u16 {
            samples.sort_unstable();
            samples[mid]
        };
        let mut median = PriceFeed {
            maintenance_collateral_ratio: median_ratio(
                live.iter().map(|f| f.maintenance_collateral_ratio).collect(),
            ),
            maximum_short_squeeze_ratio: median_ratio(
                live.iter().map(|f| f.maximum_short_squeeze_ratio).collect(),
            ),
            initial_collateral_ratio: median_ratio(
                live.iter().map(|f| f.initial_collateral_ratio).collect(),
            ),
            margin_call_fee_ratio: median_ratio(
                live.iter().map(|f| f.margin_call_fee_ratio).collect(),
            ),
            ..PriceFeed::default()
        };
        let mut prices: Vec<Price> = live.iter().map(|f| f.settlement_price).collect();
        prices.sort_by(|a, b| a.cmp_on_pair(b));
        median.settlement_price = prices[mid];

        let mut cers: Vec<Price> = live
            .iter()
            .map(|f| f.core_exchange_rate)
            .filter(|p| !p.is_null())
            .collect();
        if !cers.is_empty() {
            cers.sort_by(|a, b| a.cmp_on_pair(b));
            median.core_exchange_rate = cers[(cers.len() - 1) / 2];
        }

        if issuer_permissions & asset_flags::CAN_OWNER_UPDATE_MCR != 0 {
            if let Some(mcr) = self.options.maintenance_collateral_ratio {
                median.maintenance_collateral_ratio = mcr;
            }
        }
        if issuer_permissions & asset_flags::CAN_OWNER_UPDATE_ICR != 0 {
            if let Some(icr) = self.options.initial_collateral_ratio {
                median.initial_collateral_ratio = icr;
            }
        }
        if issuer_permissions & asset_flags::CAN_OWNER_UPDATE_MSSR != 0 {
            if let Some(mssr) = self.options.maximum_short_squeeze_ratio {
                median.maximum_short_squeeze_ratio = mssr;
            }
        }
        if let Some(mcfr) = self.options.margin_call_fee_ratio {
            median.margin_call_fee_ratio = mcfr;
        }

        self.current_feed = median;
        self.current_maintenance_collateralization = median.maintenance_collateralization();
    }
}
