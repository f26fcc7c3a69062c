// Primitives shared by the whole ledger: ids, amounts, prices, timestamps.
// Every value-flow computation goes through the two rounded multiplications
// defined here, so that every node reproduces fills bit for bit.

use crate::error::LedgerError;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Hard cap on any single-asset amount, including every 128-bit intermediate.
pub const MAX_SHARE_SUPPLY: i64 = 1_000_000_000_000_000;

/// Basis-point denominator: 10_000 == 100%.
pub const HUNDRED_PERCENT: u16 = 10_000;

/// Denominator for collateral ratios: MCR, ICR, MSSR and MCFR are all x1000.
pub const COLLATERAL_RATIO_DENOM: u16 = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AssetId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccountId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LimitOrderId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CallOrderId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SettlementId(pub u64);

/// The core asset of the chain. Fee pools are denominated in it and every
/// committee-issued market asset must eventually be backed by it.
pub const CORE_ASSET: AssetId = AssetId(0);

/// Second-precision timestamp. The core never reads the wall clock; callers
/// inject time with every block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn from_secs(secs: i64) -> Self {
        Self(secs)
    }

    pub fn as_secs(&self) -> i64 {
        self.0
    }

    pub fn now() -> Self {
        Self(chrono::Utc::now().timestamp())
    }

    pub fn plus_secs(&self, secs: i64) -> Self {
        Self(self.0 + secs)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.0)
    }
}

/// A quantity of a specific asset. Amounts are satoshi-style integers; the
/// asset's `precision` only affects display, never arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetAmount {
    pub amount: i64,
    pub asset_id: AssetId,
}

impl AssetAmount {
    pub fn new(amount: i64, asset_id: AssetId) -> Self {
        Self { amount, asset_id }
    }

    pub fn zero(asset_id: AssetId) -> Self {
        Self { amount: 0, asset_id }
    }

    pub fn is_zero(&self) -> bool {
        self.amount == 0
    }

    /// Convert through `price`, rounding down. Used in favor of the larger
    /// order when filling.
    pub fn mul_floor(&self, price: &Price) -> Result<AssetAmount, LedgerError> {
        self.mul_rounded(price, false)
    }

    /// Convert through `price`, rounding up. Used to back-compute the
    /// counter-amount after `mul_floor`, so a maker never pays something
    /// for nothing.
    pub fn mul_ceil(&self, price: &Price) -> Result<AssetAmount, LedgerError> {
        self.mul_rounded(price, true)
    }

    fn mul_rounded(&self, price: &Price, round_up: bool) -> Result<AssetAmount, LedgerError> {
        let (num, den, out_asset) = if self.asset_id == price.base.asset_id {
            (price.quote.amount, price.base.amount, price.quote.asset_id)
        } else if self.asset_id == price.quote.asset_id {
            (price.base.amount, price.quote.amount, price.base.asset_id)
        } else {
            return Err(LedgerError::Invariant(
                "amount multiplied by a price of a different market".into(),
            ));
        };
        if den <= 0 || num < 0 {
            return Err(LedgerError::Invariant("multiplication by a null price".into()));
        }
        let value = mul_div(self.amount, num, den, round_up)?;
        Ok(AssetAmount::new(value, out_asset))
    }
}

impl fmt::Display for AssetAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} of asset {}", self.amount, self.asset_id.0)
    }
}

/// `floor(amount * numerator / denominator)` (or ceiling) over an i128
/// intermediate, rejecting any result past the share-supply cap.
fn mul_div(amount: i64, numerator: i64, denominator: i64, round_up: bool) -> Result<i64, LedgerError> {
    debug_assert!(amount >= 0 && numerator >= 0 && denominator > 0);
    let wide = amount as i128 * numerator as i128;
    let value = if round_up {
        (wide + denominator as i128 - 1) / denominator as i128
    } else {
        wide / denominator as i128
    };
    if value > MAX_SHARE_SUPPLY as i128 {
        return Err(LedgerError::Overflow("price multiplication"));
    }
    Ok(value as i64)
}

/// `floor(value * bp / 10_000)` with the same overflow rule.
pub fn percent(value: i64, bp: u16) -> Result<i64, LedgerError> {
    debug_assert!(value >= 0);
    let wide = value as i128 * bp as i128 / HUNDRED_PERCENT as i128;
    if wide > MAX_SHARE_SUPPLY as i128 {
        return Err(LedgerError::Overflow("percent"));
    }
    Ok(wide as i64)
}

/// An exchange rate between two assets, kept as the exact integer pair it
/// was quoted with: `base.amount` of `base.asset_id` per `quote.amount` of
/// `quote.asset_id`. A feed's settlement price has base = debt (the market
/// issued asset) and quote = collateral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    pub base: AssetAmount,
    pub quote: AssetAmount,
}

impl Price {
    pub fn new(base: AssetAmount, quote: AssetAmount) -> Self {
        Self { base, quote }
    }

    /// The null price: not a quote at all. Feeds start here and return here
    /// when they expire.
    pub fn null() -> Self {
        Self {
            base: AssetAmount::zero(CORE_ASSET),
            quote: AssetAmount::zero(CORE_ASSET),
        }
    }

    pub fn is_null(&self) -> bool {
        self.base.amount == 0 || self.quote.amount == 0
    }

    /// Swap base and quote (`~p` in the original notation).
    pub fn invert(&self) -> Price {
        Price {
            base: self.quote,
            quote: self.base,
        }
    }

    /// Multiply the base/quote ratio by `num/den`, reducing by gcd and then
    /// halving both sides deterministically if the 64-bit range would be
    /// exceeded. Ratio arguments stay at collateral-ratio scale, so the
    /// i128 intermediates cannot overflow.
    pub fn scaled(&self, num: u32, den: u32) -> Price {
        if self.is_null() || num == 0 || den == 0 {
            return Price::null();
        }
        let mut b = self.base.amount as i128 * num as i128;
        let mut q = self.quote.amount as i128 * den as i128;
        let g = gcd(b, q);
        if g > 1 {
            b /= g;
            q /= g;
        }
        while b > MAX_SHARE_SUPPLY as i128 || q > MAX_SHARE_SUPPLY as i128 {
            b = (b >> 1).max(1);
            q = (q >> 1).max(1);
        }
        Price {
            base: AssetAmount::new(b as i64, self.base.asset_id),
            quote: AssetAmount::new(q as i64, self.quote.asset_id),
        }
    }

    /// Total order on prices of the same asset pair, by cross-product
    /// comparison of the base/quote ratios. Never divides, so it is exact.
    pub fn cmp_on_pair(&self, other: &Price) -> Ordering {
        debug_assert_eq!(self.base.asset_id, other.base.asset_id);
        debug_assert_eq!(self.quote.asset_id, other.quote.asset_id);
        let lhs = self.base.amount as i128 * other.quote.amount as i128;
        let rhs = other.base.amount as i128 * self.quote.amount as i128;
        lhs.cmp(&rhs)
    }

    /// Ratio equality for the same pair; null prices are equal only to
    /// other null prices.
    pub fn same_ratio(&self, other: &Price) -> bool {
        if self.is_null() || other.is_null() {
            return self.is_null() == other.is_null();
        }
        if self.base.asset_id != other.base.asset_id || self.quote.asset_id != other.quote.asset_id {
            return false;
        }
        self.cmp_on_pair(other) == Ordering::Equal
    }

    pub fn base_asset_id(&self) -> AssetId {
        self.base.asset_id
    }

    pub fn quote_asset_id(&self) -> AssetId {
        self.quote.asset_id
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} per {}:{}",
            self.base.amount, self.base.asset_id.0, self.quote.amount, self.quote.asset_id.0
        )
    }
}

fn gcd(mut a: i128, mut b: i128) -> i128 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn price(b: i64, ba: u32, q: i64, qa: u32) -> Price {
        Price::new(AssetAmount::new(b, AssetId(ba)), AssetAmount::new(q, AssetId(qa)))
    }

    #[test]
    fn mul_floor_and_ceil_round_in_opposite_directions() {
        // 3 of asset 1 per 2 of asset 2
        let p = price(3, 1, 2, 2);
        let a = AssetAmount::new(7, AssetId(1));
        assert_eq!(a.mul_floor(&p).unwrap(), AssetAmount::new(4, AssetId(2))); // 7*2/3
        assert_eq!(a.mul_ceil(&p).unwrap(), AssetAmount::new(5, AssetId(2)));

        let b = AssetAmount::new(7, AssetId(2));
        assert_eq!(b.mul_floor(&p).unwrap(), AssetAmount::new(10, AssetId(1))); // 7*3/2
        assert_eq!(b.mul_ceil(&p).unwrap(), AssetAmount::new(11, AssetId(1)));
    }

    #[test]
    fn mul_rejects_foreign_asset() {
        let p = price(3, 1, 2, 2);
        let a = AssetAmount::new(7, AssetId(9));
        assert!(a.mul_floor(&p).is_err());
    }

    #[test]
    fn mul_overflow_is_detected() {
        let p = price(1, 1, 1_000_000, 2);
        let a = AssetAmount::new(MAX_SHARE_SUPPLY, AssetId(1));
        assert!(matches!(a.mul_floor(&p), Err(LedgerError::Overflow(_))));
    }

    #[test]
    fn percent_floors() {
        assert_eq!(percent(10_000, 200).unwrap(), 200); // 2%
        assert_eq!(percent(99, 100).unwrap(), 0); // 1% of 99 floors to 0
        assert_eq!(percent(0, 5_000).unwrap(), 0);
    }

    #[test]
    fn cross_product_ordering() {
        let cheap = price(1, 1, 3, 2); // 1/3
        let rich = price(2, 1, 3, 2); // 2/3
        assert_eq!(cheap.cmp_on_pair(&rich), Ordering::Less);
        assert_eq!(rich.cmp_on_pair(&cheap), Ordering::Greater);
        // equal ratios in different terms
        let a = price(2, 1, 4, 2);
        let b = price(1, 1, 2, 2);
        assert_eq!(a.cmp_on_pair(&b), Ordering::Equal);
        assert!(a.same_ratio(&b));
    }

    #[test]
    fn scaled_keeps_the_exact_ratio() {
        let p = price(10, 1, 11, 2);
        let s = p.scaled(1000, 1100);
        // 10/11 * 1000/1100 = 100/121
        assert_eq!(s.cmp_on_pair(&price(100, 1, 121, 2)), Ordering::Equal);
    }

    #[test]
    fn null_price_handling() {
        assert!(Price::null().is_null());
        assert!(!price(1, 1, 1, 2).is_null());
        assert!(Price::null().same_ratio(&Price::null()));
        assert!(!Price::null().same_ratio(&price(1, 1, 1, 2)));
    }

    #[test]
    fn invert_swaps_sides() {
        let p = price(3, 1, 2, 2);
        let i = p.invert();
        assert_eq!(i.base.asset_id, AssetId(2));
        assert_eq!(i.quote.asset_id, AssetId(1));
        assert_eq!(i.invert(), p);
    }
}
