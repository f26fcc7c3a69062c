//! The three order kinds the matching engine interleaves: limit orders,
//! call orders (collateralized debt positions) and force-settlement
//! requests.

use crate::error::LedgerError;
use crate::types::{
    AccountId, AssetAmount, AssetId, CallOrderId, LimitOrderId, Price, SettlementId, Timestamp,
    COLLATERAL_RATIO_DENOM,
};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// An offer to sell `for_sale` of the price's base asset at `sell_price`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitOrder {
    pub id: LimitOrderId,
    pub seller: AccountId,
    pub for_sale: i64,
    pub sell_price: Price,
    pub expiration: Timestamp,
    /// Creation fee (CORE equivalent) withheld until first fill or cancel.
    pub deferred_fee: i64,
    /// The fee as originally paid when it was quoted in a non-CORE asset.
    pub deferred_paid_fee: AssetAmount,
}

impl LimitOrder {
    pub fn sell_asset_id(&self) -> AssetId {
        self.sell_price.base.asset_id
    }

    pub fn receive_asset_id(&self) -> AssetId {
        self.sell_price.quote.asset_id
    }

    pub fn amount_for_sale(&self) -> AssetAmount {
        AssetAmount::new(self.for_sale, self.sell_asset_id())
    }

    /// What the rest of the order would buy at its own price. Zero means
    /// the order is dust and must be culled.
    pub fn amount_to_receive(&self) -> Result<AssetAmount, LedgerError> {
        self.amount_for_sale().mul_floor(&self.sell_price)
    }
}

/// A margin position: `debt` of a market-issued asset owed against
/// `collateral` of its backing asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallOrder {
    pub id: CallOrderId,
    pub borrower: AccountId,
    pub collateral: i64,
    pub debt: i64,
    pub collateral_asset: AssetId,
    pub debt_asset: AssetId,
    /// When set, a margin call only covers enough debt to restore this
    /// ratio (x1000) instead of closing the whole position.
    pub target_collateral_ratio: Option<u16>,
}

impl CallOrder {
    pub fn get_debt(&self) -> AssetAmount {
        AssetAmount::new(self.debt, self.debt_asset)
    }

    pub fn get_collateral(&self) -> AssetAmount {
        AssetAmount::new(self.collateral, self.collateral_asset)
    }

    /// Collateral per debt as an exact price; the ordering key of the
    /// margin-call queue.
    pub fn collateralization(&self) -> Price {
        Price::new(self.get_collateral(), self.get_debt())
    }

    /// How much debt a margin call against this position should cover.
    ///
    /// Zero when the position is above the maintenance requirement (feed
    /// protection). Without a target collateral ratio the whole debt is
    /// covered. With one, solve for the least `x` such that paying
    /// `ceil(x * call_pays_price)` collateral to cover `x` debt lifts the
    /// position to `max(tcr, mcr)`, then nudge upward until the rounded
    /// payment actually satisfies the target. Falls back to the full debt
    /// when no amount of covering can reach it.
    pub fn get_max_debt_to_cover(
        &self,
        call_pays_price: &Price,
        feed_price: &Price,
        maintenance_collateral_ratio: u16,
        maintenance_collateralization: &Price,
    ) -> Result<i64, LedgerError> {
        if maintenance_collateralization.is_null() {
            return Ok(0);
        }
        if self
            .collateralization()
            .cmp_on_pair(maintenance_collateralization)
            == Ordering::Greater
        {
            return Ok(0);
        }
        let target = match self.target_collateral_ratio {
            None => return Ok(self.debt),
            Some(tcr) => tcr.max(maintenance_collateral_ratio) as i128,
        };

        // Normalize both prices to collateral / debt.
        let feed = if feed_price.base.asset_id == self.collateral_asset {
            *feed_price
        } else {
            feed_price.invert()
        };
        let pays = if call_pays_price.base.asset_id == self.collateral_asset {
            *call_pays_price
        } else {
            call_pays_price.invert()
        };
        if feed.is_null() || pays.is_null() {
            return Ok(0);
        }

        let fc = feed.base.amount as i128; // collateral side of the feed
        let fd = feed.quote.amount as i128; // debt side of the feed
        let mn = pays.base.amount as i128; // collateral paid ...
        let md = pays.quote.amount as i128; // ... per debt covered
        let debt = self.debt as i128;
        let collateral = self.collateral as i128;
        let denom = COLLATERAL_RATIO_DENOM as i128;

        // (collateral - x*mn/md) / (debt - x) >= target/1000 * fc/fd
        // <=> x * (target*fc*md - 1000*fd*mn) >= md * (target*fc*D - 1000*fd*C)
        let lhs_factor = target * fc * md - denom * fd * mn;
        let shortfall = target * fc * debt - denom * fd * collateral;
        if lhs_factor <= 0 {
            // covering can never restore the target ratio
            return Ok(self.debt);
        }
        let mut cover = if shortfall <= 0 {
            0
        } else {
            match md.checked_mul(shortfall) {
                Some(numerator) => (numerator + lhs_factor - 1) / lhs_factor,
                None => {
                    // md * shortfall exceeds 128 bits. If the denominator is
                    // small the exact quotient would dwarf any real debt, so
                    // cover everything. Otherwise shift both sides; the
                    // result stays a lower bound (the walk below corrects
                    // the last few units) because the shifted denominator
                    // rounds up.
                    if lhs_factor <= i128::MAX / crate::types::MAX_SHARE_SUPPLY as i128 {
                        return Ok(self.debt);
                    }
                    let mut scaled_shortfall = shortfall;
                    let mut scaled_factor = lhs_factor;
                    while scaled_shortfall.checked_mul(md).is_none() {
                        scaled_shortfall >>= 1;
                        scaled_factor = (scaled_factor >> 1) + 1;
                    }
                    (scaled_shortfall * md) / scaled_factor
                }
            }
        };

        // The closed form ignores that the payment itself rounds up; walk
        // forward until the post-fill position really meets the target.
        loop {
            if cover >= debt {
                return Ok(self.debt);
            }
            let paid = AssetAmount::new(cover as i64, self.debt_asset).mul_ceil(&pays)?;
            if paid.amount as i128 > collateral {
                return Ok(self.debt);
            }
            let new_collateral = collateral - paid.amount as i128;
            let new_debt = debt - cover;
            if new_collateral * fd * denom >= target * fc * new_debt {
                return Ok(cover as i64);
            }
            cover += 1;
        }
    }
}

/// A holder's request to redeem a market-issued asset for backing
/// collateral, executed after the configured delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForceSettlement {
    pub id: SettlementId,
    pub owner: AccountId,
    pub balance: AssetAmount,
    pub settlement_date: Timestamp,
}
