//! Black-76 pricing, greeks, and implied-vol kernel (`spec.md` §4.1).
//!
//! This is the leaf of the whole system: every other module prices through
//! `price_and_greeks` and inverts through `implied_vol`. Pricing primitives
//! never fail the call — out-of-domain inputs are rejected with a typed
//! `Error`, but once inputs are valid, every branch saturates or returns a
//! finite number; the implied-vol solver returns `NaN` rather than `Err`
//! when the target price cannot be bracketed (`spec.md` §8 Scenario F).

use statrs::distribution::{Continuous, ContinuousCDF, Normal};
use std::sync::OnceLock;

use crate::error::{Error, Result};

fn standard_normal() -> &'static Normal {
    static CELL: OnceLock<Normal> = OnceLock::new();
    CELL.get_or_init(|| Normal::new(0.0, 1.0).expect("standard normal is always valid"))
}

fn norm_cdf(x: f64) -> f64 {
    standard_normal().cdf(x)
}

fn norm_pdf(x: f64) -> f64 {
    standard_normal().pdf(x)
}

/// Black-76 price plus first and second-order greeks for a single option.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceGreeks {
    pub price: f64,
    pub delta: f64,
    pub gamma: f64,
    pub vega: f64,
    pub theta: f64,
    pub d1: f64,
    pub d2: f64,
}

fn check_domain(what: &'static str, value: f64, ok: bool) -> Result<()> {
    if ok && value.is_finite() {
        Ok(())
    } else {
        Err(Error::InvalidInput { what, value })
    }
}

/// Black-76 price and greeks for forward `f`, strike `k`, time `t` (years),
/// volatility `sigma`, call/put flag, and discount factor `df`.
///
/// At `t == 0.0` or `sigma == 0.0`, returns the discounted intrinsic value
/// with all greeks except delta (which saturates to 0/±df) set to zero.
pub fn price_and_greeks(
    f: f64,
    k: f64,
    t: f64,
    sigma: f64,
    is_call: bool,
    df: f64,
) -> Result<PriceGreeks> {
    check_domain("F", f, f > 0.0)?;
    check_domain("K", k, k > 0.0)?;
    check_domain("T", t, t >= 0.0)?;
    check_domain("sigma", sigma, sigma >= 0.0)?;
    check_domain("df", df, df > 0.0)?;

    if t <= 0.0 || sigma <= 0.0 {
        let intrinsic = if is_call { (f - k).max(0.0) } else { (k - f).max(0.0) };
        let delta = if is_call {
            if f > k { df } else { 0.0 }
        } else if f < k {
            -df
        } else {
            0.0
        };
        return Ok(PriceGreeks {
            price: df * intrinsic,
            delta,
            gamma: 0.0,
            vega: 0.0,
            theta: 0.0,
            d1: f64::NAN,
            d2: f64::NAN,
        });
    }

    let sqrt_t = t.sqrt();
    let std_dev = sigma * sqrt_t;
    let d1 = ((f / k).ln() + 0.5 * sigma * sigma * t) / std_dev;
    let d2 = d1 - std_dev;

    let nd1 = norm_cdf(d1);
    let nd2 = norm_cdf(d2);
    let pdf_d1 = norm_pdf(d1);

    let price = if is_call {
        df * (f * nd1 - k * nd2)
    } else {
        df * (k * norm_cdf(-d2) - f * norm_cdf(-d1))
    };

    let delta = if is_call { df * nd1 } else { df * (nd1 - 1.0) };
    let gamma = df * pdf_d1 / (f * std_dev);
    let vega = df * f * pdf_d1 * sqrt_t;
    let theta = -df * f * pdf_d1 * sigma / (2.0 * sqrt_t);

    Ok(PriceGreeks {
        price,
        delta,
        gamma,
        vega,
        theta,
        d1,
        d2,
    })
}

const IV_LO0: f64 = 1e-9;
const IV_HI0: f64 = 1.0;
const IV_HI_CAP: f64 = 5.0;
const IV_HI_GROWTH: f64 = 1.5;
const IV_PRICE_TOL_ABS: f64 = 1e-12;
const IV_BRACKET_TOL: f64 = 1e-12;
const IV_VEGA_FLOOR: f64 = 1e-14;
const IV_MAX_ITER: usize = 100;

/// Hybrid Newton-with-bracket/bisection implied-vol solver (`spec.md`
/// §4.1). Returns `0.0` when `target_price` is at or below intrinsic value
/// (within tolerance), and `NaN` when the target cannot be bracketed (it
/// exceeds the price reachable at the bracket cap).
pub fn implied_vol(
    target_price: f64,
    f: f64,
    k: f64,
    t: f64,
    df: f64,
    init: Option<f64>,
) -> f64 {
    if !(target_price.is_finite() && f > 0.0 && k > 0.0 && t >= 0.0 && df > 0.0) {
        return f64::NAN;
    }

    let price_at = |sigma: f64| -> (f64, f64) {
        match price_and_greeks(f, k, t, sigma, true, df) {
            Ok(pg) => (pg.price, pg.vega),
            Err(_) => (f64::NAN, f64::NAN),
        }
    };

    let intrinsic = df * (f - k).max(0.0);
    let tol = |target: f64| IV_PRICE_TOL_ABS * (1.0 + target.abs());
    if target_price <= intrinsic + tol(target_price) {
        return 0.0;
    }

    let mut lo = IV_LO0;
    let mut hi = IV_HI0;
    let mut price_hi = price_at(hi).0;

    while price_hi < target_price && hi < IV_HI_CAP {
        hi = (hi * IV_HI_GROWTH).min(IV_HI_CAP);
        let (p, _) = price_at(hi);
        price_hi = p;
    }

    if price_hi < target_price {
        return f64::NAN;
    }

    let mut v = init
        .filter(|x| x.is_finite() && *x > lo && *x < hi)
        .unwrap_or((lo + hi) / 2.0);

    for _ in 0..IV_MAX_ITER {
        let (price_v, vega_v) = price_at(v);
        let diff = price_v - target_price;

        if diff.abs() <= tol(target_price) || (hi - lo) < IV_BRACKET_TOL {
            return v;
        }

        if diff > 0.0 {
            hi = v;
        } else {
            lo = v;
        }

        let newton = v - diff / vega_v;
        v = if vega_v.abs() > IV_VEGA_FLOOR && newton > lo && newton < hi {
            newton
        } else {
            0.5 * (lo + hi)
        };
    }

    v
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atm_call_price_matches_closed_form() {
        let pg = price_and_greeks(100_000.0, 100_000.0, 0.25, 0.5, true, 1.0).unwrap();
        assert!((pg.price - 9947.645).abs() < 1.0, "price = {}", pg.price);
    }

    #[test]
    fn call_and_put_are_monotone_in_vol() {
        let lo = price_and_greeks(100.0, 100.0, 1.0, 0.1, true, 1.0).unwrap();
        let hi = price_and_greeks(100.0, 100.0, 1.0, 0.5, true, 1.0).unwrap();
        assert!(hi.price > lo.price);
        let lo_p = price_and_greeks(100.0, 100.0, 1.0, 0.1, false, 1.0).unwrap();
        let hi_p = price_and_greeks(100.0, 100.0, 1.0, 0.5, false, 1.0).unwrap();
        assert!(hi_p.price > lo_p.price);
    }

    #[test]
    fn put_call_parity_holds() {
        let f = 100.0;
        let k = 95.0;
        let t = 0.3;
        let sigma = 0.35;
        let df = 0.99;
        let call = price_and_greeks(f, k, t, sigma, true, df).unwrap();
        let put = price_and_greeks(f, k, t, sigma, false, df).unwrap();
        let parity = df * (f - k);
        assert!((call.price - put.price - parity).abs() < 1e-8 * f.max(1.0));
    }

    #[test]
    fn implied_vol_roundtrips() {
        let f = 100_000.0;
        let k = 100_000.0;
        let t = 0.25;
        let df = 1.0;
        let sigma = 0.5;
        let pg = price_and_greeks(f, k, t, sigma, true, df).unwrap();
        let iv = implied_vol(pg.price, f, k, t, df, Some(0.4));
        assert!((iv - sigma).abs() < 1e-8, "iv = {}", iv);
        let pg2 = price_and_greeks(f, k, t, iv, true, df).unwrap();
        assert!((pg2.price / pg.price - 1.0).abs() < 1e-7);
    }

    #[test]
    fn implied_vol_edge_cases() {
        let f = 100.0;
        let k = 110.0;
        let t = 0.5;
        let df = 1.0;
        let intrinsic = df * (f - k).max(0.0);
        assert_eq!(implied_vol(intrinsic, f, k, t, df, None), 0.0);

        let unreachable = df * f + 1.0;
        assert!(implied_vol(unreachable, f, k, t, df, None).is_nan());
    }

    #[test]
    fn greeks_are_finite_for_varied_inputs() {
        for &f in &[10.0, 100.0, 10_000.0] {
            for &k in &[8.0, 100.0, 12_000.0] {
                for &t in &[0.01, 0.25, 2.0] {
                    for &sigma in &[0.05, 0.5, 2.0] {
                        for is_call in [true, false] {
                            let pg = price_and_greeks(f, k, t, sigma, is_call, 1.0).unwrap();
                            assert!(pg.price.is_finite());
                            assert!(pg.delta.is_finite());
                            assert!(pg.gamma.is_finite());
                            assert!(pg.vega.is_finite());
                            assert!(pg.theta.is_finite());
                        }
                    }
                }
            }
        }
    }
}
