//! Force settlement and global settlement: instant exchange against the
//! fund, the delayed settlement queue, volume caps, offsets, and revival.

mod common;

use common::*;
use smartcoin_core::*;

/// A globally settled asset: supply 1_000, settlement fund 1_500 CORE.
fn settled_asset(ledger: &mut Ledger, fsf_percent: Option<u16>) -> (AssetId, AccountId, AccountId) {
    let issuer = register(ledger);
    let producer = register(ledger);
    let borrower = register(ledger);

    let usd = create_mia(ledger, issuer, "USD", producer, |_, bitasset| {
        bitasset.force_settle_fee_percent = fsf_percent;
    });
    ledger.seed_balance(borrower, core(50_000)).unwrap();
    publish_feed(ledger, producer, usd, CORE_ASSET, 1_000, 1_000, 1_750, 1_100, 0);
    borrow(ledger, borrower, usd, 1_000, 2_000);

    ledger
        .apply(&Operation::AssetGlobalSettle(AssetGlobalSettle {
            fee: no_fee(),
            issuer,
            asset_to_settle: usd,
            settle_price: Price::new(
                AssetAmount::new(1_000, usd),
                AssetAmount::new(1_500, CORE_ASSET),
            ),
        }))
        .unwrap();
    (usd, issuer, borrower)
}

#[test]
fn global_settle_moves_collateral_into_the_fund() {
    let mut ledger = new_ledger();
    let (usd, _, borrower) = settled_asset(&mut ledger, None);

    let bitasset = ledger.store().get_bitasset(usd).unwrap();
    assert!(bitasset.has_settlement());
    assert_eq!(bitasset.settlement_fund, 1_500);
    // position closed at the settle price; excess collateral returned
    assert!(ledger.store().find_call_order_by_account(borrower, usd).is_none());
    assert_eq!(ledger.balance(borrower, CORE_ASSET), 50_000 - 2_000 + 500);
    // supply restored after the forced fills
    assert_eq!(supply_of(&ledger, usd), 1_000);
}

#[test]
fn settling_a_settled_asset_pays_from_the_fund() {
    let mut ledger = new_ledger();
    let (usd, _, borrower) = settled_asset(&mut ledger, None);

    let result = settle(&mut ledger, borrower, AssetAmount::new(100, usd));

    // floor(100 * 1500/1000) = 150 CORE, no fees configured
    assert_eq!(
        result,
        OperationResult::SettledAmount(AssetAmount::new(150, CORE_ASSET))
    );
    assert_eq!(ledger.balance(borrower, CORE_ASSET), 50_000 - 2_000 + 500 + 150);
    assert_eq!(ledger.balance(borrower, usd), 900);
    assert_eq!(supply_of(&ledger, usd), 900);
    assert_eq!(ledger.store().get_bitasset(usd).unwrap().settlement_fund, 1_350);
}

#[test]
fn force_settle_fee_is_charged_on_the_fund_exchange() {
    let mut ledger = new_ledger();
    // 1% force-settle fee
    let (usd, _, borrower) = settled_asset(&mut ledger, Some(100));

    let result = settle(&mut ledger, borrower, AssetAmount::new(100, usd));

    // 150 gross minus floor(150 * 1%) = 1
    assert_eq!(
        result,
        OperationResult::SettledAmount(AssetAmount::new(149, CORE_ASSET))
    );
    assert_eq!(collateral_fees_of(&ledger, usd), 1);
    // the fund is reduced by the gross amount
    assert_eq!(ledger.store().get_bitasset(usd).unwrap().settlement_fund, 1_350);
    assert_eq!(supply_of(&ledger, usd), 900);
}

#[test]
fn settling_the_entire_supply_routes_the_whole_fund() {
    let mut ledger = new_ledger();
    let (usd, _, borrower) = settled_asset(&mut ledger, None);

    settle(&mut ledger, borrower, AssetAmount::new(100, usd));
    let result = settle(&mut ledger, borrower, AssetAmount::new(900, usd));

    // the remaining 1_350, with no rounding residue left behind
    assert_eq!(
        result,
        OperationResult::SettledAmount(AssetAmount::new(1_350, CORE_ASSET))
    );
    assert_eq!(supply_of(&ledger, usd), 0);
    assert_eq!(ledger.store().get_bitasset(usd).unwrap().settlement_fund, 0);
    assert_eq!(ledger.balance(borrower, usd), 0);
}

#[test]
fn revival_clears_the_settlement_once_supply_is_gone() {
    let mut ledger = new_ledger();
    let issuer = register(&mut ledger);
    let producer = register(&mut ledger);
    let borrower = register(&mut ledger);

    let usd = create_mia(&mut ledger, issuer, "USD", producer, |_, _| {});
    ledger.seed_balance(borrower, core(50_000)).unwrap();
    publish_feed(&mut ledger, producer, usd, CORE_ASSET, 1_000, 1_000, 1_750, 1_100, 0);
    borrow(&mut ledger, borrower, usd, 1_000, 2_000);
    ledger
        .apply(&Operation::AssetGlobalSettle(AssetGlobalSettle {
            fee: no_fee(),
            issuer,
            asset_to_settle: usd,
            settle_price: Price::new(
                AssetAmount::new(1_000, usd),
                AssetAmount::new(1_500, CORE_ASSET),
            ),
        }))
        .unwrap();

    settle(&mut ledger, borrower, AssetAmount::new(1_000, usd));
    assert_eq!(supply_of(&ledger, usd), 0);
    assert!(ledger.store().get_bitasset(usd).unwrap().has_settlement());

    // a feed with changed parameters triggers the revival check
    publish_feed(&mut ledger, producer, usd, CORE_ASSET, 1_000, 900, 1_750, 1_100, 0);
    assert!(!ledger.store().get_bitasset(usd).unwrap().has_settlement());
}

#[test]
fn dust_settlement_against_the_fund_is_rejected() {
    let mut ledger = new_ledger();
    let issuer = register(&mut ledger);
    let producer = register(&mut ledger);
    let borrower = register(&mut ledger);

    let usd = create_mia(&mut ledger, issuer, "USD", producer, |_, _| {});
    ledger.seed_balance(borrower, core(50_000)).unwrap();
    publish_feed(&mut ledger, producer, usd, CORE_ASSET, 1_000, 1_000, 1_750, 1_100, 0);
    borrow(&mut ledger, borrower, usd, 1_000, 2_000);
    // settle at half parity: 1 USD redeems floor(0.5) = 0 CORE
    ledger
        .apply(&Operation::AssetGlobalSettle(AssetGlobalSettle {
            fee: no_fee(),
            issuer,
            asset_to_settle: usd,
            settle_price: Price::new(
                AssetAmount::new(1_000, usd),
                AssetAmount::new(500, CORE_ASSET),
            ),
        }))
        .unwrap();

    let result = ledger.apply(&Operation::AssetSettle(AssetSettle {
        fee: no_fee(),
        account: borrower,
        amount: AssetAmount::new(1, usd),
    }));
    assert!(matches!(result, Err(LedgerError::Precondition(_))));
    // nothing moved
    assert_eq!(supply_of(&ledger, usd), 1_000);
    assert_eq!(ledger.balance(borrower, usd), 1_000);
}

#[test]
fn pending_settlement_executes_after_the_delay() {
    let mut ledger = new_ledger();
    let issuer = register(&mut ledger);
    let producer = register(&mut ledger);
    let borrower = register(&mut ledger);

    let usd = create_mia(&mut ledger, issuer, "USD", producer, |_, _| {});
    ledger.seed_balance(borrower, core(50_000)).unwrap();
    publish_feed(&mut ledger, producer, usd, CORE_ASSET, 1_000, 1_000, 1_750, 1_100, 0);
    borrow(&mut ledger, borrower, usd, 1_000, 2_000);

    let settlement_id = match settle(&mut ledger, borrower, AssetAmount::new(300, usd)) {
        OperationResult::NewSettlement(id) => id,
        other => panic!("unexpected result {other:?}"),
    };
    assert_eq!(ledger.balance(borrower, usd), 700);

    // nothing happens before the delay elapses
    ledger.execute_due_settlements(ledger.time()).unwrap();
    assert!(ledger.store().find_settlement(settlement_id).is_some());

    ledger.advance_time(86_400 + 1);
    ledger.execute_due_settlements(ledger.time()).unwrap();

    // the per-period cap is 20% of 1_000 supply: only 200 settles now
    let remaining = ledger.store().find_settlement(settlement_id).unwrap();
    assert_eq!(remaining.balance.amount, 100);
    assert_eq!(ledger.balance(borrower, CORE_ASSET), 50_000 - 2_000 + 200);
    let call = ledger.store().find_call_order_by_account(borrower, usd).unwrap();
    assert_eq!(call.debt, 800);
    assert_eq!(call.collateral, 1_800);
    assert_eq!(supply_of(&ledger, usd), 800);
    assert_eq!(ledger.store().get_bitasset(usd).unwrap().force_settled_volume, 200);

    // the next maintenance period clears the counter and the rest settles
    ledger.reset_force_settled_volumes();
    ledger.execute_due_settlements(ledger.time()).unwrap();
    assert!(ledger.store().find_settlement(settlement_id).is_none());
    assert_eq!(ledger.balance(borrower, CORE_ASSET), 50_000 - 2_000 + 300);
    assert_eq!(supply_of(&ledger, usd), 700);
}

#[test]
fn settlement_offset_reduces_what_the_settler_receives() {
    let mut ledger = new_ledger();
    let issuer = register(&mut ledger);
    let producer = register(&mut ledger);
    let borrower = register(&mut ledger);

    // 5% settlement offset
    let usd = create_mia(&mut ledger, issuer, "USD", producer, |_, bitasset| {
        bitasset.force_settlement_offset_percent = 500;
    });
    ledger.seed_balance(borrower, core(50_000)).unwrap();
    publish_feed(&mut ledger, producer, usd, CORE_ASSET, 1_000, 1_000, 1_750, 1_100, 0);
    borrow(&mut ledger, borrower, usd, 1_000, 2_000);

    settle(&mut ledger, borrower, AssetAmount::new(200, usd));
    ledger.advance_time(86_400 + 1);
    ledger.execute_due_settlements(ledger.time()).unwrap();

    // 200 USD at 0.95 CORE per USD
    assert_eq!(ledger.balance(borrower, CORE_ASSET), 50_000 - 2_000 + 190);
    let call = ledger.store().find_call_order_by_account(borrower, usd).unwrap();
    assert_eq!(call.debt, 800);
    assert_eq!(call.collateral, 2_000 - 190);
}

#[test]
fn disabling_force_settle_cancels_pending_requests() {
    let mut ledger = new_ledger();
    let issuer = register(&mut ledger);
    let producer = register(&mut ledger);
    let borrower = register(&mut ledger);

    let usd = create_mia(&mut ledger, issuer, "USD", producer, |_, _| {});
    ledger.seed_balance(borrower, core(50_000)).unwrap();
    publish_feed(&mut ledger, producer, usd, CORE_ASSET, 1_000, 1_000, 1_750, 1_100, 0);
    borrow(&mut ledger, borrower, usd, 1_000, 2_000);

    let settlement_id = match settle(&mut ledger, borrower, AssetAmount::new(300, usd)) {
        OperationResult::NewSettlement(id) => id,
        other => panic!("unexpected result {other:?}"),
    };

    let asset = ledger.store().get_asset(usd).unwrap().clone();
    let mut new_options = asset.options.clone();
    new_options.flags |= asset_flags::DISABLE_FORCE_SETTLE;
    ledger
        .apply(&Operation::AssetUpdate(AssetUpdate {
            fee: no_fee(),
            issuer,
            asset_to_update: usd,
            new_options,
            new_precision: None,
        }))
        .unwrap();

    // refunded, removed, and announced
    assert!(ledger.store().find_settlement(settlement_id).is_none());
    assert_eq!(ledger.balance(borrower, usd), 1_000);
    assert!(ledger.events().iter().any(|event| matches!(
        event.payload,
        EventPayload::SettleCancel(SettleCancelEvent { settlement, .. }) if settlement == settlement_id
    )));

    // and new requests are refused
    let result = ledger.apply(&Operation::AssetSettle(AssetSettle {
        fee: no_fee(),
        account: borrower,
        amount: AssetAmount::new(100, usd),
    }));
    assert!(matches!(result, Err(LedgerError::MissingPermission(_))));
}

#[test]
fn global_settle_requires_a_position_and_a_payable_price() {
    let mut ledger = new_ledger();
    let issuer = register(&mut ledger);
    let producer = register(&mut ledger);
    let borrower = register(&mut ledger);

    let usd = create_mia(&mut ledger, issuer, "USD", producer, |_, _| {});
    ledger.seed_balance(borrower, core(50_000)).unwrap();
    publish_feed(&mut ledger, producer, usd, CORE_ASSET, 1_000, 1_000, 1_750, 1_100, 0);

    // no supply yet
    let result = ledger.apply(&Operation::AssetGlobalSettle(AssetGlobalSettle {
        fee: no_fee(),
        issuer,
        asset_to_settle: usd,
        settle_price: Price::new(
            AssetAmount::new(1_000, usd),
            AssetAmount::new(1_000, CORE_ASSET),
        ),
    }));
    assert!(matches!(result, Err(LedgerError::State(_))));

    borrow(&mut ledger, borrower, usd, 1_000, 2_000);

    // the least collateralized short cannot pay 2.5 CORE per USD
    let result = ledger.apply(&Operation::AssetGlobalSettle(AssetGlobalSettle {
        fee: no_fee(),
        issuer,
        asset_to_settle: usd,
        settle_price: Price::new(
            AssetAmount::new(1_000, usd),
            AssetAmount::new(2_500, CORE_ASSET),
        ),
    }));
    assert!(matches!(result, Err(LedgerError::Precondition(_))));
}

#[test]
fn settle_without_feed_or_settlement_reports_insufficient_feeds() {
    let mut ledger = new_ledger();
    let issuer = register(&mut ledger);
    let producer = register(&mut ledger);
    let holder = register(&mut ledger);

    let usd = create_mia(&mut ledger, issuer, "USD", producer, |_, _| {});
    // hand the holder some units without any feed ever existing
    ledger
        .seed_balance(holder, AssetAmount::new(100, usd))
        .unwrap();

    let result = ledger.apply(&Operation::AssetSettle(AssetSettle {
        fee: no_fee(),
        account: holder,
        amount: AssetAmount::new(100, usd),
    }));
    assert!(matches!(result, Err(LedgerError::InsufficientFeeds(_))));
}
