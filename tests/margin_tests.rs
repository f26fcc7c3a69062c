//! Margin-call scenarios: call matching with and without the margin call
//! fee, target collateral ratios, feed protection, and black swans.

mod common;

use common::*;
use smartcoin_core::*;

/// A bitasset with a margin position that is already in call territory at
/// the 1:1 feed: the position opens against a low feed, then the feed moves
/// to parity.
fn callable_position(
    ledger: &mut Ledger,
    mcfr: u16,
) -> (AssetId, AccountId, AccountId, AccountId) {
    let issuer = register(ledger);
    let producer = register(ledger);
    let borrower = register(ledger);

    let usd = create_mia(ledger, issuer, "USD", producer, |_, _| {});
    ledger.seed_balance(borrower, core(50_000)).unwrap();

    // open at 1 USD = 0.25 CORE so a 1.43 collateralization is acceptable
    publish_feed(ledger, producer, usd, CORE_ASSET, 1_000, 250, 1_750, 1_100, mcfr);
    borrow(ledger, borrower, usd, 7_000, 10_000);
    (usd, issuer, producer, borrower)
}

#[test]
fn margin_call_without_fee_pays_the_limit_in_full() {
    let mut ledger = new_ledger();
    let (usd, _, producer, borrower) = callable_position(&mut ledger, 0);

    // the borrower offers their debt on the book at 0.95 CORE per USD;
    // too expensive for margin calls at the current feed
    let order = sell(
        &mut ledger,
        borrower,
        AssetAmount::new(7_000, usd),
        core(6_650),
    );
    assert!(ledger.store().find_limit_order(order).is_some());

    // feed moves to parity: collateralization 1.43 < MCR 1.75
    publish_feed(&mut ledger, producer, usd, CORE_ASSET, 1_000, 1_000, 1_750, 1_100, 0);

    // the call was covered entirely against the resting order at the
    // order's own price
    assert!(ledger.store().find_limit_order(order).is_none());
    assert!(ledger
        .store()
        .find_call_order_by_account(borrower, usd)
        .is_none());
    // 7_000 USD at 0.95 = 6_650 CORE to the seller, zero margin call fee
    assert_eq!(ledger.balance(borrower, CORE_ASSET), 50_000 - 10_000 + 6_650 + 3_350);
    assert_eq!(collateral_fees_of(&ledger, usd), 0);
    assert_eq!(supply_of(&ledger, usd), 0);
    assert_eq!(ledger.balance(borrower, usd), 0);
}

#[test]
fn margin_call_fee_is_retained_in_collateral() {
    let mut ledger = new_ledger();
    // 50 bp margin call fee (5 per mille)
    let (usd, _, producer, borrower) = callable_position(&mut ledger, 5);

    let order = sell(
        &mut ledger,
        borrower,
        AssetAmount::new(7_000, usd),
        core(6_650),
    );
    publish_feed(&mut ledger, producer, usd, CORE_ASSET, 1_000, 1_000, 1_750, 1_100, 5);

    assert!(ledger.store().find_limit_order(order).is_none());
    // the limit receives the same 6_650 as without the fee
    // the call pays ceil(6_650 * 1100/1095) = 6_681; the spread is the fee
    let expected_fee = 6_681 - 6_650;
    assert_eq!(collateral_fees_of(&ledger, usd), expected_fee);
    assert_eq!(
        ledger.balance(borrower, CORE_ASSET),
        50_000 - 10_000 + 6_650 + (10_000 - 6_681)
    );
    assert_eq!(supply_of(&ledger, usd), 0);
}

#[test]
fn incoming_order_matches_the_call_at_the_margin_call_order_price() {
    let mut ledger = new_ledger();
    let (usd, _, producer, borrower) = callable_position(&mut ledger, 5);

    // feed to parity first; the book is empty so nothing fills yet
    publish_feed(&mut ledger, producer, usd, CORE_ASSET, 1_000, 1_000, 1_750, 1_100, 5);
    assert!(ledger
        .store()
        .find_call_order_by_account(borrower, usd)
        .is_some());

    // now a seller arrives willing to take the margin-call price
    let order = sell(
        &mut ledger,
        borrower,
        AssetAmount::new(7_000, usd),
        core(7_000),
    );

    // matched against the call at ~MCOP = 1095/1000 CORE per USD, while
    // the call pays at ~MSSP = 1100/1000
    assert!(ledger.store().find_limit_order(order).is_none());
    assert!(ledger
        .store()
        .find_call_order_by_account(borrower, usd)
        .is_none());
    let seller_receives = 7_665; // ceil(7_000 * 1095/1000)
    let call_pays = 7_700; // ceil(7_000 * 1100/1000)
    assert_eq!(collateral_fees_of(&ledger, usd), call_pays - seller_receives);
    assert_eq!(
        ledger.balance(borrower, CORE_ASSET),
        50_000 - 10_000 + seller_receives + (10_000 - call_pays)
    );
}

#[test]
fn target_collateral_ratio_limits_the_cover() {
    let mut ledger = new_ledger();
    let issuer = register(&mut ledger);
    let producer = register(&mut ledger);
    let borrower = register(&mut ledger);

    let usd = create_mia(&mut ledger, issuer, "USD", producer, |_, _| {});
    ledger.seed_balance(borrower, core(100_000)).unwrap();

    // open at 1 USD = 0.7 CORE: 15_000 / 10_000 = 1.5 >= 0.7 * 1.75
    publish_feed(&mut ledger, producer, usd, CORE_ASSET, 1_000, 700, 1_750, 1_100, 0);
    ledger
        .apply(&Operation::CallOrderUpdate(CallOrderUpdate {
            fee: no_fee(),
            funding_account: borrower,
            delta_collateral: core(15_000),
            delta_debt: AssetAmount::new(10_000, usd),
            target_collateral_ratio: Some(2_000),
        }))
        .unwrap();

    let order = sell(
        &mut ledger,
        borrower,
        AssetAmount::new(10_000, usd),
        core(10_000),
    );
    // parity feed puts the position at 1.5 < 1.75
    publish_feed(&mut ledger, producer, usd, CORE_ASSET, 1_000, 1_000, 1_750, 1_100, 0);

    // only enough debt is covered to lift the position back to 2.0
    let call = ledger
        .store()
        .find_call_order_by_account(borrower, usd)
        .expect("position survives");
    assert_eq!(call.debt, 5_000);
    assert_eq!(call.collateral, 10_000);
    assert!(call.collateral as i128 * 1_000 >= 2_000 * call.debt as i128);
    // the rest of the limit order stays on the book
    assert_eq!(ledger.store().find_limit_order(order).unwrap().for_sale, 5_000);
}

#[test]
fn well_collateralized_positions_are_feed_protected() {
    let mut ledger = new_ledger();
    let issuer = register(&mut ledger);
    let producer = register(&mut ledger);
    let borrower = register(&mut ledger);

    let usd = create_mia(&mut ledger, issuer, "USD", producer, |_, _| {});
    ledger.seed_balance(borrower, core(100_000)).unwrap();

    publish_feed(&mut ledger, producer, usd, CORE_ASSET, 1_000, 1_000, 1_750, 1_100, 0);
    borrow(&mut ledger, borrower, usd, 10_000, 20_000); // 2.0 > 1.75

    // a very attractive ask sits on the book, but the position is safe
    let order = sell(
        &mut ledger,
        borrower,
        AssetAmount::new(10_000, usd),
        core(9_500),
    );

    assert!(ledger.store().find_limit_order(order).is_some());
    let call = ledger
        .store()
        .find_call_order_by_account(borrower, usd)
        .unwrap();
    assert_eq!(call.debt, 10_000);
    assert_eq!(call.collateral, 20_000);
}

#[test]
fn black_swan_globally_settles_at_the_feed_price() {
    let mut ledger = new_ledger();
    let issuer = register(&mut ledger);
    let producer = register(&mut ledger);
    let borrower = register(&mut ledger);

    let usd = create_mia(&mut ledger, issuer, "USD", producer, |_, _| {});
    ledger.seed_balance(borrower, core(100_000)).unwrap();

    publish_feed(&mut ledger, producer, usd, CORE_ASSET, 1_000, 1_000, 1_750, 1_100, 0);
    borrow(&mut ledger, borrower, usd, 9_000, 20_000); // 2.22

    // feed collapses to 1 USD = 2.5 CORE: even the squeeze price cannot
    // cover 9_000 debt from 20_000 collateral
    publish_feed(&mut ledger, producer, usd, CORE_ASSET, 1_000, 2_500, 1_750, 1_100, 0);

    let bitasset = ledger.store().get_bitasset(usd).unwrap();
    assert!(bitasset.has_settlement());
    // the whole collateral went to the fund: ceil(9_000 * 2.5) > 20_000
    assert_eq!(bitasset.settlement_fund, 20_000);
    assert!(ledger
        .store()
        .find_call_order_by_account(borrower, usd)
        .is_none());
    // supply is restored after the forced fills; holders still own it
    assert_eq!(supply_of(&ledger, usd), 9_000);
    assert_eq!(ledger.balance(borrower, usd), 9_000);
}

#[test]
fn black_swan_with_handling_disabled_fails_the_operation() {
    let mut ledger = new_ledger();
    let issuer = register(&mut ledger);
    let producer = register(&mut ledger);
    let alice = register(&mut ledger);

    // 60% margin call fee keeps the saving bid outside the matchable range
    let usd = create_mia(&mut ledger, issuer, "USD", producer, |_, bitasset| {
        bitasset.margin_call_fee_ratio = Some(600);
    });
    ledger.seed_balance(alice, core(100_000)).unwrap();

    publish_feed(&mut ledger, producer, usd, CORE_ASSET, 1_000, 1_000, 1_750, 1_100, 0);
    borrow(&mut ledger, alice, usd, 9_000, 20_000);

    // a bid above the debt-per-collateral ratio but below the margin call
    // order price: it keeps the swan check at bay without being matchable
    let saving_bid = sell(
        &mut ledger,
        alice,
        AssetAmount::new(500, usd),
        core(1_000),
    );

    // feed drops to 1 USD = 2.5 CORE; the bid holds the swan off
    publish_feed(&mut ledger, producer, usd, CORE_ASSET, 1_000, 2_500, 1_750, 1_100, 0);
    assert!(!ledger.store().get_bitasset(usd).unwrap().has_settlement());
    assert!(ledger.store().find_limit_order(saving_bid).is_some());

    // pulling the bid exposes the swan; no scan runs on cancellation
    ledger
        .apply(&Operation::LimitOrderCancel(LimitOrderCancel {
            fee: no_fee(),
            fee_paying_account: alice,
            order: saving_bid,
        }))
        .unwrap();

    // a collateral update must not trigger a black swan: it fails instead
    let before = ledger.store().find_call_order_by_account(alice, usd).copied();
    let result = ledger.apply(&Operation::CallOrderUpdate(CallOrderUpdate {
        fee: no_fee(),
        funding_account: alice,
        delta_collateral: core(1),
        delta_debt: AssetAmount::new(0, usd),
        target_collateral_ratio: None,
    }));
    assert!(matches!(result, Err(LedgerError::State(_))));
    // and the rollback left the position untouched
    assert_eq!(
        ledger.store().find_call_order_by_account(alice, usd).copied(),
        before
    );
    assert!(!ledger.store().get_bitasset(usd).unwrap().has_settlement());

    // an explicit scan with swans enabled settles it
    assert!(ledger.check_call_orders(usd, true).unwrap());
    assert!(ledger.store().get_bitasset(usd).unwrap().has_settlement());
}

#[test]
fn borrowing_requires_the_initial_collateralization() {
    let mut ledger = new_ledger();
    let issuer = register(&mut ledger);
    let producer = register(&mut ledger);
    let borrower = register(&mut ledger);

    let usd = create_mia(&mut ledger, issuer, "USD", producer, |_, _| {});
    ledger.seed_balance(borrower, core(100_000)).unwrap();
    publish_feed(&mut ledger, producer, usd, CORE_ASSET, 1_000, 1_000, 1_750, 1_100, 0);

    // 1.5 < 1.75: rejected outright
    let result = ledger.apply(&Operation::CallOrderUpdate(CallOrderUpdate {
        fee: no_fee(),
        funding_account: borrower,
        delta_collateral: core(15_000),
        delta_debt: AssetAmount::new(10_000, usd),
        target_collateral_ratio: None,
    }));
    assert!(result.is_err());
    assert!(ledger
        .store()
        .find_call_order_by_account(borrower, usd)
        .is_none());

    // 1.75 exactly is enough
    borrow(&mut ledger, borrower, usd, 10_000, 17_500);
    assert_eq!(ledger.balance(borrower, usd), 10_000);
    assert_eq!(supply_of(&ledger, usd), 10_000);
}

#[test]
fn repaying_debt_releases_collateral() {
    let mut ledger = new_ledger();
    let issuer = register(&mut ledger);
    let producer = register(&mut ledger);
    let borrower = register(&mut ledger);

    let usd = create_mia(&mut ledger, issuer, "USD", producer, |_, _| {});
    ledger.seed_balance(borrower, core(100_000)).unwrap();
    publish_feed(&mut ledger, producer, usd, CORE_ASSET, 1_000, 1_000, 1_750, 1_100, 0);

    borrow(&mut ledger, borrower, usd, 10_000, 20_000);
    assert_eq!(ledger.balance(borrower, CORE_ASSET), 80_000);

    // close the position entirely
    let result = ledger
        .apply(&Operation::CallOrderUpdate(CallOrderUpdate {
            fee: no_fee(),
            funding_account: borrower,
            delta_collateral: core(-20_000),
            delta_debt: AssetAmount::new(-10_000, usd),
            target_collateral_ratio: None,
        }))
        .unwrap();
    assert_eq!(result, OperationResult::CallOrder(None));
    assert_eq!(ledger.balance(borrower, CORE_ASSET), 100_000);
    assert_eq!(ledger.balance(borrower, usd), 0);
    assert_eq!(supply_of(&ledger, usd), 0);
}
