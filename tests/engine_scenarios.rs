//! End-to-end scenarios from `spec.md` §8, exercised against the public API.

use surface_lib::calibration::{fit_delta_shells, fit_pc_smile, DeltaShellOutcome, PcLeg, ShellQuote};
use surface_lib::config::{CoreContext, FitOptions};
use surface_lib::engine::DualSurfaceEngine;
use surface_lib::market_spec::{MarketSpec, PremiumConvention};
use surface_lib::pricing::{implied_vol, price_and_greeks};
use surface_lib::svi::{check_calendar_k, svi_w, to_metrics, validate, LogMoneyness, SVIParams, TraderMetrics};

fn btc_spec() -> MarketSpec {
    MarketSpec::new("BTC", PremiumConvention::CryptoQuote, 5e-5)
}

/// Scenario A — Black-76 round-trip.
#[test]
fn scenario_a_black76_round_trip() {
    let f = 100_000.0;
    let k = 100_000.0;
    let t = 0.25;
    let sigma = 0.5;
    let df = 1.0;

    let pg = price_and_greeks(f, k, t, sigma, true, df).unwrap();
    assert!((pg.price - 9947.645).abs() < 1e-3, "price = {}", pg.price);

    let iv = implied_vol(pg.price, f, k, t, df, Some(0.4));
    assert!((iv - sigma).abs() < 1e-8, "iv = {}", iv);

    let pg2 = price_and_greeks(f, k, t, iv, true, df).unwrap();
    assert!((pg2.price / pg.price - 1.0).abs() < 1e-8 * (1.0 + pg.price));
}

/// Scenario B — delta-shell calibration against a tight five-strike book.
#[test]
fn scenario_b_delta_shell_calibration() {
    let forward = 97_000.0;
    let t = 0.0274;
    let market_spec = btc_spec();
    let fit_options = FitOptions {
        min_tick: 5e-5,
        ..FitOptions::default()
    };

    // Back out the market's own ATM IV from the quoted mid first -- real
    // callers feed the calibrator IVs backed out by the market-data layer,
    // not bare premiums, and the ATM-lock step (`spec.md` §4.4 step 1)
    // only has a real level to anchor to once that IV is known.
    let atm_mid_quoted = 0.5 * (0.0170 + 0.0175);
    let atm_mid_base = market_spec.from_quoted_to_base(atm_mid_quoted, forward);
    let atm_iv_market = implied_vol(atm_mid_base, forward, forward, t, 1.0, Some(0.3)).clamp(0.20, 2.0);

    let quotes = vec![
        ShellQuote { strike: 95_000.0, mid_quoted: 0.5 * (0.0280 + 0.0285), iv: None, weight: None },
        ShellQuote { strike: 96_000.0, mid_quoted: 0.5 * (0.0220 + 0.0225), iv: None, weight: None },
        ShellQuote { strike: 97_000.0, mid_quoted: atm_mid_quoted, iv: Some(atm_iv_market), weight: None },
        ShellQuote { strike: 98_000.0, mid_quoted: 0.5 * (0.0130 + 0.0135), iv: None, weight: None },
        ShellQuote { strike: 99_000.0, mid_quoted: 0.5 * (0.0095 + 0.0100), iv: None, weight: None },
    ];

    let outcome = fit_delta_shells(&quotes, forward, t, &market_spec, &fit_options).unwrap();
    let fitted = outcome.params();

    let atm_k = LogMoneyness::from_strike_forward(forward, forward).unwrap();
    let atm_iv_fitted = surface_lib::svi::svi_iv(atm_k, t, fitted);
    assert!(
        (atm_iv_fitted - atm_iv_market).abs() < 0.005,
        "atm iv fitted={} market={}",
        atm_iv_fitted,
        atm_iv_market
    );

    let mut max_err_bps = 0.0_f64;
    for q in &quotes {
        let k = LogMoneyness::from_strike_forward(q.strike, forward).unwrap();
        let iv = surface_lib::svi::svi_iv(k, t, fitted);
        let is_call = q.strike >= forward;
        let pg = price_and_greeks(forward, q.strike, t, iv, is_call, 1.0).unwrap();
        let model_quoted = market_spec.from_base_to_quoted(pg.price, forward);
        let err_bps = 10_000.0 * (model_quoted - q.mid_quoted).abs() / q.mid_quoted;
        max_err_bps = max_err_bps.max(err_bps);
    }
    assert!(max_err_bps < 100.0, "max premium error {} bps", max_err_bps);
}

/// Scenario C — a trade that leaves the maker short the wing should
/// richen that wing's smile and widen the edge at the traded strike more
/// than at a strike further away. `on_trade`'s convention is
/// `position += -size` (customer-buy is `size > 0`, so the maker ends up
/// short); this test passes a positive `size` so the maker is left short
/// at K=95, matching the "puts richer when short" direction of `spec.md`
/// §8 Scenario C.
#[test]
fn scenario_c_inventory_smile_deformation() {
    let ctx = CoreContext::new(btc_spec());
    let mut engine = DualSurfaceEngine::new(ctx);

    let base_metrics = TraderMetrics {
        l0: 0.04,
        s0: -0.002,
        c0: 0.5,
        s_neg: 0.8,
        s_pos: 0.9,
    };
    let t = 0.25;
    let forward = 100.0;
    engine.update_cc(t, base_metrics).unwrap();

    engine.on_trade(t, 95.0, forward, 5.34, 200.0, 0.0).unwrap();

    let (_, by_bucket, adjustments) = engine.get_inventory_summary();
    assert!(!by_bucket.is_empty());
    let (_, delta_95) = adjustments.iter().find(|(tt, _)| (*tt - t).abs() < 1e-9).unwrap();
    // K=95 at F=100 has |put-delta| in Rr25 (0.20, 0.40), not Atm; being
    // short that bucket must richen puts (S0 up) and shrink the left wing's
    // magnitude (S_neg down), per spec.md's Scenario C.
    assert!(delta_95.d_s0 > 0.0, "expected S0 to increase, delta={:?}", delta_95);
    assert!(delta_95.d_s_neg < 0.0, "expected S_neg to decrease in magnitude, delta={:?}", delta_95);

    let q95 = engine.get_quote(t, 95.0, forward, true, 0.0).unwrap();
    assert!(q95.pc_mid > q95.cc_mid, "pc={} cc={}", q95.pc_mid, q95.cc_mid);

    let q80 = engine.get_quote(t, 80.0, forward, true, 0.0).unwrap();
    let edge_80 = (q80.pc_mid - q80.cc_mid).abs();
    let edge_95 = (q95.pc_mid - q95.cc_mid).abs();
    assert!(edge_80 < edge_95, "edge_80={} edge_95={}", edge_80, edge_95);
}

/// Scenario D — a single outlier leg gets trimmed by the PC fitter.
#[test]
fn scenario_d_pc_convex_repair_trims_outlier() {
    let opts = FitOptions {
        max_outlier_trim_bps: 100.0,
        ..FitOptions::default()
    };
    let forward = 100.0;
    let strikes = [90.0, 95.0, 100.0, 105.0, 110.0];
    let cc_tvs = [0.03, 0.045, 0.05, 0.045, 0.03];
    let mut market_mids = cc_tvs;
    market_mids[2] = 0.20;

    let legs: Vec<PcLeg> = strikes
        .iter()
        .zip(cc_tvs.iter())
        .zip(market_mids.iter())
        .map(|((&strike, &cc_tv), &mid)| {
            let k = (strike / forward).ln();
            let phi = (1.0 - (k.abs() / opts.taper_band).powf(opts.taper_exp)).max(0.0);
            PcLeg {
                strike,
                k,
                tv_market: mid,
                cc_tv,
                phi,
                weight: None,
                vega: Some(20.0),
            }
        })
        .collect();

    let result = fit_pc_smile(&legs, forward, &opts).unwrap();
    assert!(!result.used_mask[2], "K=100 outlier row should be trimmed");
    assert!(result.trim_count >= 1);
}

/// Scenario E — two SVI slices with equal shape but unequal ATM level at
/// different T must violate the calendar-in-k check.
#[test]
fn scenario_e_calendar_check_flags_violation() {
    let shape = SVIParams {
        a: 0.01,
        b: 0.3,
        rho: -0.3,
        sigma: 0.4,
        m: 0.0,
    };
    let t1 = 0.1;
    let t2 = 0.5;
    let shrunk = SVIParams { a: shape.a * 0.2, ..shape };

    let grid = vec![-1.0, -0.5, 0.0, 0.5, 1.0];
    let violations = check_calendar_k(t1, &shape, t2, &shrunk, &grid, 2.0);

    assert!(!violations.is_empty());
    let at_zero = violations.iter().find(|v| v.k.abs() < 1e-9);
    assert!(at_zero.is_some(), "expected a violation at k=0");
    assert!(at_zero.unwrap().rel_err_bps > 2.0);
}

/// Scenario F — implied-vol edge cases: intrinsic returns 0, unreachable
/// target returns NaN.
#[test]
fn scenario_f_implied_vol_edge_cases() {
    let f = 100.0;
    let k = 110.0;
    let t = 0.5;
    let df = 1.0;

    let intrinsic = df * (f - k).max(0.0);
    assert_eq!(implied_vol(intrinsic, f, k, t, df, None), 0.0);

    let unreachable = df * f + 1.0;
    assert!(implied_vol(unreachable, f, k, t, df, None).is_nan());
}

/// Cross-cutting: after update_cc the CC always validates, and the
/// fitted delta-shell outcome's L0 matches the locked ATM input exactly.
#[test]
fn quantified_invariant_l0_locked_and_cc_valid() {
    let ctx = CoreContext::new(btc_spec());
    let mut engine = DualSurfaceEngine::new(ctx);
    let metrics = TraderMetrics {
        l0: 0.05,
        s0: -0.05,
        c0: 0.4,
        s_neg: 0.3,
        s_pos: 0.35,
    };
    engine.update_cc(0.5, metrics).unwrap();

    let forward = 50_000.0;
    let t = 30.0 / 365.0;
    let truth = SVIParams {
        a: 0.015,
        b: 0.25,
        rho: -0.2,
        sigma: 0.35,
        m: 0.0,
    };
    let strikes = [
        forward * 0.80,
        forward * 0.90,
        forward * 0.95,
        forward,
        forward * 1.05,
        forward * 1.10,
        forward * 1.20,
    ];
    let quotes: Vec<ShellQuote> = strikes
        .iter()
        .map(|&strike| {
            let k = LogMoneyness::from_strike_forward(strike, forward).unwrap();
            let iv = surface_lib::svi::svi_iv(k, t, &truth);
            let is_call = strike >= forward;
            let price = price_and_greeks(forward, strike, t, iv, is_call, 1.0).unwrap().price;
            ShellQuote {
                strike,
                mid_quoted: price / forward,
                iv: if (strike - forward).abs() < 1e-6 { Some(iv) } else { None },
                weight: None,
            }
        })
        .collect();

    let market_spec = btc_spec();
    let fit_options = FitOptions::default();
    let outcome = fit_delta_shells(&quotes, forward, t, &market_spec, &fit_options).unwrap();
    match outcome {
        DeltaShellOutcome::Fitted(p) => {
            let l0_fitted = p.a + p.b * p.sigma;
            let atm_quote = quotes.iter().min_by(|a, b| {
                (a.strike - forward).abs().partial_cmp(&(b.strike - forward).abs()).unwrap()
            }).unwrap();
            let l0_locked = atm_quote.iv.unwrap().powi(2) * t;
            assert!((l0_fitted - l0_locked).abs() < 1e-9);

            let res = validate(&p, &surface_lib::config::SviValidationConfig::default());
            assert!(res.valid, "errors: {:?}", res.errors);
        }
        DeltaShellOutcome::Degenerate { .. } => panic!("expected a full fit with 7 quotes"),
    }

    let cc_metrics = to_metrics(&surface_lib::svi::from_metrics(&metrics, Default::default()));
    assert!(cc_metrics.l0 > 0.0);
    let _ = svi_w(LogMoneyness::raw(0.0), &surface_lib::svi::from_metrics(&metrics, Default::default()));
}
