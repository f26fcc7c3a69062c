//! Property-based checks of the arithmetic laws the matching engine
//! depends on.

use proptest::prelude::*;
use smartcoin_core::*;

const DEBT: AssetId = AssetId(1);
const COLLATERAL: AssetId = AssetId(2);

fn amount_strategy() -> impl Strategy<Value = i64> {
    1i64..1_000_000_000_000
}

fn price_strategy() -> impl Strategy<Value = Price> {
    (1i64..1_000_000, 1i64..1_000_000).prop_map(|(base, quote)| {
        Price::new(
            AssetAmount::new(base, DEBT),
            AssetAmount::new(quote, COLLATERAL),
        )
    })
}

fn bp_strategy() -> impl Strategy<Value = u16> {
    0u16..=HUNDRED_PERCENT
}

proptest! {
    /// The ceiling back-computation never manufactures value: converting
    /// down and back up cannot exceed the original amount.
    #[test]
    fn ceil_after_floor_round_trip(a in amount_strategy(), p in price_strategy()) {
        let amount = AssetAmount::new(a, DEBT);
        let down = amount.mul_floor(&p).unwrap();
        let back = down.mul_ceil(&p).unwrap();
        prop_assert!(back.amount <= a, "{} -> {} -> {}", a, down.amount, back.amount);
    }

    /// Whenever the floor conversion is non-zero, the maker's
    /// back-computed counter-amount is non-zero too: nobody pays
    /// something for nothing.
    #[test]
    fn nonzero_fill_pays_nonzero_counterpart(a in amount_strategy(), p in price_strategy()) {
        let amount = AssetAmount::new(a, DEBT);
        let down = amount.mul_floor(&p).unwrap();
        if down.amount > 0 {
            let back = down.mul_ceil(&p).unwrap();
            prop_assert!(back.amount > 0);
        }
    }

    /// `percent` is bounded and exact at the extremes.
    #[test]
    fn percent_is_bounded(v in 0i64..MAX_SHARE_SUPPLY, bp in bp_strategy()) {
        let cut = percent(v, bp).unwrap();
        prop_assert!(cut <= v);
        prop_assert!(cut >= 0);
        prop_assert_eq!(percent(v, 0).unwrap(), 0);
        prop_assert_eq!(percent(v, HUNDRED_PERCENT).unwrap(), v);
    }

    /// The fee split reassembles the whole fee bit-exactly: network share,
    /// referrer and registrar rewards, and the issuer residue.
    #[test]
    fn fee_split_is_exact(
        fee in 0i64..1_000_000_000_000,
        network_bp in bp_strategy(),
        reward_bp in bp_strategy(),
        referrer_bp in bp_strategy(),
    ) {
        let network = percent(fee, network_bp).unwrap();
        let issuer_share = fee - network;
        let reward = percent(issuer_share, reward_bp).unwrap();
        let referrer = percent(reward, referrer_bp).unwrap();
        let registrar = reward - referrer;
        let residue = issuer_share - reward;
        prop_assert_eq!(network + referrer + registrar + residue, fee);
        prop_assert!(network >= 0 && referrer >= 0 && registrar >= 0 && residue >= 0);
    }

    /// Median computation is idempotent: recomputing without new feeds
    /// changes nothing.
    #[test]
    fn median_feed_is_idempotent(quotes in prop::collection::vec(1i64..1_000_000, 1..8)) {
        let mut bitasset = BitassetData::new(DEBT, BitassetOptions::new(COLLATERAL), false);
        for (index, quote) in quotes.iter().enumerate() {
            let feed = PriceFeed {
                settlement_price: Price::new(
                    AssetAmount::new(1_000, DEBT),
                    AssetAmount::new(*quote, COLLATERAL),
                ),
                ..PriceFeed::default()
            };
            bitasset
                .feeds
                .insert(AccountId(index as u64), (Timestamp::from_secs(100), feed));
        }
        bitasset.update_median_feeds(Timestamp::from_secs(200), 0);
        let first = bitasset.current_feed;
        let first_maintenance = bitasset.current_maintenance_collateralization;
        bitasset.update_median_feeds(Timestamp::from_secs(200), 0);
        prop_assert_eq!(bitasset.current_feed, first);
        prop_assert_eq!(bitasset.current_maintenance_collateralization, first_maintenance);
    }

    /// A margin call against a position with a target collateral ratio
    /// covers no more than the debt, and any partial cover actually
    /// restores the target with the ceiling-rounded payment.
    #[test]
    fn max_debt_to_cover_restores_the_target(
        collateral in 1_000i64..1_000_000_000,
        debt in 1_000i64..1_000_000_000,
        tcr in 1_751u16..4_000,
    ) {
        let call = CallOrder {
            id: CallOrderId(1),
            borrower: AccountId(1),
            collateral,
            debt,
            collateral_asset: COLLATERAL,
            debt_asset: DEBT,
            target_collateral_ratio: Some(tcr),
        };
        // parity feed; the call pays at a 10% premium
        let feed = Price::new(AssetAmount::new(1, DEBT), AssetAmount::new(1, COLLATERAL));
        let maintenance = feed.invert().scaled(1_750, 1_000);
        let pays = Price::new(
            AssetAmount::new(1_000, DEBT),
            AssetAmount::new(1_100, COLLATERAL),
        );

        let cover = call
            .get_max_debt_to_cover(&pays, &feed, 1_750, &maintenance)
            .unwrap();
        prop_assert!(cover >= 0 && cover <= debt);

        let protected = collateral as i128 * 1_000 > debt as i128 * 1_750;
        if protected {
            prop_assert_eq!(cover, 0);
        } else if cover > 0 && cover < debt {
            let paid = AssetAmount::new(cover, DEBT).mul_ceil(&pays).unwrap();
            let new_collateral = collateral - paid.amount;
            let new_debt = debt - cover;
            prop_assert!(new_collateral as i128 * 1_000 >= tcr as i128 * new_debt as i128);
            // one unit less would not have been enough
            let smaller = cover - 1;
            let paid_less = AssetAmount::new(smaller, DEBT).mul_ceil(&pays).unwrap();
            let collateral_less = collateral - paid_less.amount;
            let debt_less = debt - smaller;
            prop_assert!((collateral_less as i128) * 1_000 < tcr as i128 * debt_less as i128);
        }
    }

    /// Cross-product price comparison agrees with rational comparison.
    #[test]
    fn price_ordering_matches_rationals(
        b1 in 1i64..1_000_000, q1 in 1i64..1_000_000,
        b2 in 1i64..1_000_000, q2 in 1i64..1_000_000,
    ) {
        let p1 = Price::new(AssetAmount::new(b1, DEBT), AssetAmount::new(q1, COLLATERAL));
        let p2 = Price::new(AssetAmount::new(b2, DEBT), AssetAmount::new(q2, COLLATERAL));
        let expected = ((b1 as f64 / q1 as f64) - (b2 as f64 / q2 as f64)).signum();
        let got = match p1.cmp_on_pair(&p2) {
            std::cmp::Ordering::Less => -1.0,
            std::cmp::Ordering::Equal => 0.0,
            std::cmp::Ordering::Greater => 1.0,
        };
        // floats only disagree when the ratios are extremely close; the
        // cross product is the ground truth, so only check clear cases
        if expected != 0.0 && (b1 as i128 * q2 as i128 - b2 as i128 * q1 as i128).abs() > 1 {
            prop_assert_eq!(got, expected);
        }
    }
}
