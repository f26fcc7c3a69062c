//! Shared fixtures for the integration suites.

#![allow(dead_code)]

use smartcoin_core::*;

/// A config with zero flat operation fees, so scenario arithmetic stays
/// focused on market fees and fills.
pub fn free_fee_config() -> ChainConfig {
    let mut config = ChainConfig::default();
    config.fees = FeeSchedule {
        asset_create: 0,
        limit_order_create: 0,
        default_fee: 0,
    };
    config
}

pub fn new_ledger() -> Ledger {
    let mut ledger = Ledger::new(free_fee_config());
    ledger.set_time(Timestamp::from_secs(1_000_000));
    ledger
}

pub fn core(amount: i64) -> AssetAmount {
    AssetAmount::new(amount, CORE_ASSET)
}

pub fn no_fee() -> AssetAmount {
    core(0)
}

pub fn register(ledger: &mut Ledger) -> AccountId {
    ledger.register_account(COMMITTEE_ACCOUNT, COMMITTEE_ACCOUNT, 0)
}

/// The placeholder exchange rate an asset-create op carries; the quote id
/// is rewritten to the new asset at apply time.
pub fn cer_placeholder() -> Price {
    Price::new(core(1), core(1))
}

pub fn create_uia(
    ledger: &mut Ledger,
    issuer: AccountId,
    symbol: &str,
    market_fee_bp: u16,
    max_supply: i64,
) -> AssetId {
    let mut options = AssetOptions::new(max_supply, cer_placeholder());
    if market_fee_bp > 0 {
        options.market_fee_percent = market_fee_bp;
        options.flags |= asset_flags::CHARGE_MARKET_FEE;
    }
    let result = ledger
        .apply(&Operation::AssetCreate(AssetCreate {
            fee: no_fee(),
            issuer,
            symbol: symbol.to_string(),
            precision: 2,
            common_options: options,
            bitasset_options: None,
            is_prediction_market: false,
        }))
        .unwrap();
    match result {
        OperationResult::NewAsset(id) => id,
        other => panic!("unexpected result {other:?}"),
    }
}

pub fn create_mia(
    ledger: &mut Ledger,
    issuer: AccountId,
    symbol: &str,
    producer: AccountId,
    tweak: impl FnOnce(&mut AssetOptions, &mut BitassetOptions),
) -> AssetId {
    let mut options = AssetOptions::new(MAX_SHARE_SUPPLY, cer_placeholder());
    options.issuer_permissions = asset_flags::MIA_VALID_PERMISSIONS;
    let mut bitasset_options = BitassetOptions::new(CORE_ASSET);
    tweak(&mut options, &mut bitasset_options);
    let result = ledger
        .apply(&Operation::AssetCreate(AssetCreate {
            fee: no_fee(),
            issuer,
            symbol: symbol.to_string(),
            precision: 5,
            common_options: options,
            bitasset_options: Some(bitasset_options),
            is_prediction_market: false,
        }))
        .unwrap();
    let id = match result {
        OperationResult::NewAsset(id) => id,
        other => panic!("unexpected result {other:?}"),
    };
    ledger
        .apply(&Operation::AssetUpdateFeedProducers(AssetUpdateFeedProducers {
            fee: no_fee(),
            issuer,
            asset_to_update: id,
            new_feed_producers: [producer].into_iter().collect(),
        }))
        .unwrap();
    id
}

/// Publish a feed quoting `base` of the asset per `quote` of its backing
/// asset. ICR is pinned to MCR so the initial requirement follows the
/// maintenance one.
pub fn publish_feed(
    ledger: &mut Ledger,
    producer: AccountId,
    asset: AssetId,
    backing: AssetId,
    base: i64,
    quote: i64,
    mcr: u16,
    mssr: u16,
    mcfr: u16,
) {
    let feed = PriceFeed {
        settlement_price: Price::new(
            AssetAmount::new(base, asset),
            AssetAmount::new(quote, backing),
        ),
        core_exchange_rate: Price::null(),
        maintenance_collateral_ratio: mcr,
        maximum_short_squeeze_ratio: mssr,
        initial_collateral_ratio: mcr,
        margin_call_fee_ratio: mcfr,
    };
    ledger
        .apply(&Operation::AssetPublishFeed(AssetPublishFeed {
            fee: no_fee(),
            publisher: producer,
            asset_id: asset,
            feed,
        }))
        .unwrap();
}

pub fn borrow(
    ledger: &mut Ledger,
    who: AccountId,
    asset: AssetId,
    debt: i64,
    collateral: i64,
) -> OperationResult {
    ledger
        .apply(&Operation::CallOrderUpdate(CallOrderUpdate {
            fee: no_fee(),
            funding_account: who,
            delta_collateral: core(collateral),
            delta_debt: AssetAmount::new(debt, asset),
            target_collateral_ratio: None,
        }))
        .unwrap()
}

pub fn sell(
    ledger: &mut Ledger,
    seller: AccountId,
    amount_to_sell: AssetAmount,
    min_to_receive: AssetAmount,
) -> LimitOrderId {
    let result = ledger
        .apply(&Operation::LimitOrderCreate(LimitOrderCreate {
            fee: no_fee(),
            seller,
            amount_to_sell,
            min_to_receive,
            expiration: ledger.time().plus_secs(86_400),
        }))
        .unwrap();
    match result {
        OperationResult::NewLimitOrder(id) => id,
        other => panic!("unexpected result {other:?}"),
    }
}

pub fn settle(ledger: &mut Ledger, account: AccountId, amount: AssetAmount) -> OperationResult {
    ledger
        .apply(&Operation::AssetSettle(AssetSettle {
            fee: no_fee(),
            account,
            amount,
        }))
        .unwrap()
}

pub fn supply_of(ledger: &Ledger, asset: AssetId) -> i64 {
    ledger.store().get_asset_dynamic(asset).unwrap().current_supply
}

pub fn accumulated_fees_of(ledger: &Ledger, asset: AssetId) -> i64 {
    ledger.store().get_asset_dynamic(asset).unwrap().accumulated_fees
}

pub fn collateral_fees_of(ledger: &Ledger, asset: AssetId) -> i64 {
    ledger
        .store()
        .get_asset_dynamic(asset)
        .unwrap()
        .accumulated_collateral_fees
}
