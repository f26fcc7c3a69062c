// All chain-wide knobs in one place. These mirror the committee-controlled
// parameters of the host chain; the core treats them as an immutable
// configuration reference handed in per block.

use crate::types::{HUNDRED_PERCENT, MAX_SHARE_SUPPLY};
use serde::{Deserialize, Serialize};

/// Flat per-operation fee schedule, quoted in the core asset. A real
/// deployment feeds this from committee-approved parameters; the shape is
/// all the market core needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub asset_create: i64,
    pub limit_order_create: i64,
    pub default_fee: i64,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            asset_create: 50_000,
            limit_order_create: 10,
            default_fee: 100,
        }
    }
}

impl FeeSchedule {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.asset_create < 0 || self.limit_order_create < 0 || self.default_fee < 0 {
            return Err(ConfigError::InvalidFees {
                reason: "fees cannot be negative".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Symbol of the core asset created at genesis.
    pub core_symbol: String,
    pub core_precision: u8,
    /// Target block interval; feed lifetimes and settlement delays must
    /// exceed it.
    pub block_interval_sec: u32,
    pub maximum_asset_whitelist_authorities: usize,
    pub maximum_asset_feed_publishers: usize,
    /// Share of every market fee redirected to the network, in bp.
    pub market_fee_network_percent: u16,
    /// Creation-fee discount refunded to makers on first fill, in bp.
    pub maker_fee_discount_percent: u16,
    /// Core fees above this threshold vest instead of paying out instantly.
    pub cashback_vesting_threshold: i64,
    /// Cap on force settlement per maintenance period, in bp of supply.
    pub max_force_settlement_volume: u16,
    pub fees: FeeSchedule,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            core_symbol: "CORE".to_string(),
            core_precision: 5,
            block_interval_sec: 3,
            maximum_asset_whitelist_authorities: 10,
            maximum_asset_feed_publishers: 10,
            market_fee_network_percent: 0,
            maker_fee_discount_percent: 0,
            cashback_vesting_threshold: 100_000,
            max_force_settlement_volume: 2_000, // 20%
            fees: FeeSchedule::default(),
        }
    }
}

impl ChainConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.core_symbol.is_empty() {
            return Err(ConfigError::InvalidCore {
                reason: "core symbol must be set".to_string(),
            });
        }
        if self.core_precision > 12 {
            return Err(ConfigError::InvalidCore {
                reason: "core precision above 12".to_string(),
            });
        }
        if self.block_interval_sec == 0 {
            return Err(ConfigError::InvalidCore {
                reason: "block interval must be positive".to_string(),
            });
        }
        if self.market_fee_network_percent > HUNDRED_PERCENT
            || self.maker_fee_discount_percent > HUNDRED_PERCENT
            || self.max_force_settlement_volume > HUNDRED_PERCENT
        {
            return Err(ConfigError::InvalidPercent);
        }
        if self.cashback_vesting_threshold < 0 || self.cashback_vesting_threshold > MAX_SHARE_SUPPLY {
            return Err(ConfigError::InvalidCore {
                reason: "cashback threshold out of range".to_string(),
            });
        }
        self.fees.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidCore { reason: String },
    InvalidFees { reason: String },
    InvalidPercent,
}
