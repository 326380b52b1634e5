//! Static no-arbitrage checks against market strikes and across expiries
//! (`spec.md` §4.3). Every check here is an observer: it returns a
//! structured diagnostic and never mutates its inputs.

use crate::pricing;
use crate::svi::model::{total_variance, LogMoneyness, SVIParams};

/// A single no-arbitrage violation: the offending location (`k` or `K`),
/// the signed margin by which the invariant failed, and which check raised
/// it.
#[derive(Debug, Clone, PartialEq)]
pub struct ArbViolation {
    pub kind: &'static str,
    pub location: f64,
    pub margin: f64,
}

/// Aggregate result of [`check_static_arb`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StaticArbCheck {
    pub violations: Vec<ArbViolation>,
}

impl StaticArbCheck {
    pub fn passes(&self) -> bool {
        self.violations.is_empty()
    }
}

const CONVEXITY_K_LO: f64 = -2.5;
const CONVEXITY_K_HI: f64 = 2.5;
const CONVEXITY_STEP: f64 = 0.1;

/// Runs wing-slope, variance-convexity, butterfly, and call-price
/// convexity checks for a single SVI slice against a set of market
/// strikes.
pub fn check_static_arb(
    strikes: &[f64],
    forward: f64,
    t: f64,
    p: &SVIParams,
    wing_max_slope: f64,
    convexity_tol: f64,
    butterfly_tol: f64,
) -> StaticArbCheck {
    let mut violations = Vec::new();

    // 1. Wing slopes.
    let s_neg = p.b * (1.0 - p.rho);
    let s_pos = p.b * (1.0 + p.rho);
    if !(0.0..=wing_max_slope).contains(&s_neg) {
        violations.push(ArbViolation {
            kind: "wing_slope_left",
            location: f64::NEG_INFINITY,
            margin: s_neg,
        });
    }
    if !(0.0..=wing_max_slope).contains(&s_pos) {
        violations.push(ArbViolation {
            kind: "wing_slope_right",
            location: f64::INFINITY,
            margin: s_pos,
        });
    }

    // 2. Variance convexity on a uniform k-grid.
    for (k, d2) in
        crate::svi::model::variance_second_differences(p, CONVEXITY_K_LO, CONVEXITY_K_HI, CONVEXITY_STEP)
    {
        if d2 < -convexity_tol {
            violations.push(ArbViolation {
                kind: "variance_convexity",
                location: k,
                margin: d2,
            });
        }
    }

    // 3 & 4. Butterflies and call-price convexity at market strikes.
    let mut sorted: Vec<f64> = strikes.iter().copied().filter(|k| *k > 0.0).collect();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    sorted.dedup();

    if sorted.len() >= 3 {
        for i in 1..sorted.len() - 1 {
            let (k1, k2, k3) = (sorted[i - 1], sorted[i], sorted[i + 1]);
            let w1 = total_variance(LogMoneyness::raw((k1 / forward).ln()), p);
            let w2 = total_variance(LogMoneyness::raw((k2 / forward).ln()), p);
            let w3 = total_variance(LogMoneyness::raw((k3 / forward).ln()), p);

            let combo = w1 * (k3 - k2) / (k3 - k1) - w2 + w3 * (k2 - k1) / (k3 - k1);
            if combo < -butterfly_tol {
                violations.push(ArbViolation {
                    kind: "butterfly",
                    location: k2,
                    margin: combo,
                });
            }

            let iv1 = crate::svi::model::implied_vol(LogMoneyness::raw((k1 / forward).ln()), t, p);
            let iv2 = crate::svi::model::implied_vol(LogMoneyness::raw((k2 / forward).ln()), t, p);
            let iv3 = crate::svi::model::implied_vol(LogMoneyness::raw((k3 / forward).ln()), t, p);

            let call_price = |k: f64, iv: f64| {
                pricing::price_and_greeks(forward, k, t, iv, true, 1.0)
                    .map(|pg| pg.price)
                    .unwrap_or(f64::NAN)
            };
            let c0 = call_price(k1, iv1);
            let c1 = call_price(k2, iv2);
            let c2 = call_price(k3, iv3);

            let h1 = k2 - k1;
            let h2 = k3 - k2;
            let stencil = 2.0 * ((c2 - c1) / (h2 * (h1 + h2)) - (c1 - c0) / (h1 * (h1 + h2)));
            if stencil.is_finite() && stencil < 0.0 {
                violations.push(ArbViolation {
                    kind: "call_convexity",
                    location: k2,
                    margin: stencil,
                });
            }
        }
    }

    StaticArbCheck { violations }
}

/// A calendar-arbitrage violation detected in log-moneyness space.
#[derive(Debug, Clone, PartialEq)]
pub struct CalendarViolation {
    pub k: f64,
    pub margin: f64,
    pub rel_err_bps: f64,
}

/// Checks `w(k; p2) >= w(k; p1)` for `T2 > T1` across a k-grid
/// (`spec.md` §4.3 item 5). Returns every grid point where the relative
/// margin exceeds the configured bps threshold and the absolute margin is
/// not numerical noise.
pub fn check_calendar_k(
    t1: f64,
    p1: &SVIParams,
    t2: f64,
    p2: &SVIParams,
    k_grid: &[f64],
    calendar_tol_bps: f64,
) -> Vec<CalendarViolation> {
    assert!(t2 > t1, "check_calendar_k requires t2 > t1");

    let mut out = Vec::new();
    for &k in k_grid {
        let w1 = total_variance(LogMoneyness::raw(k), p1);
        let w2 = total_variance(LogMoneyness::raw(k), p2);
        let margin = w2 - w1;
        let rel_err_bps = -10_000.0 * margin / w1.max(1e-12);

        if margin < -1e-10 && rel_err_bps > calendar_tol_bps {
            out.push(CalendarViolation {
                k,
                margin,
                rel_err_bps,
            });
        }
    }
    out
}

/// Default calendar check grid: `[-2.5, 2.5]` step `0.1` (`spec.md` §4.3).
pub fn default_calendar_grid() -> Vec<f64> {
    let mut grid = Vec::new();
    let mut k = CONVEXITY_K_LO;
    while k <= CONVEXITY_K_HI + 1e-9 {
        grid.push(k);
        k += CONVEXITY_STEP;
    }
    grid
}

#[cfg(test)]
mod tests {
    use super::*;

    fn well_formed() -> SVIParams {
        SVIParams {
            a: 0.01,
            b: 0.3,
            rho: -0.3,
            sigma: 0.4,
            m: 0.0,
        }
    }

    #[test]
    fn static_arb_passes_for_well_formed_slice() {
        let strikes = vec![80.0, 90.0, 100.0, 110.0, 120.0];
        let check = check_static_arb(&strikes, 100.0, 0.5, &well_formed(), 2.0, 3e-6, 1e-8);
        assert!(check.passes(), "violations: {:?}", check.violations);
    }

    #[test]
    fn calendar_check_flags_equal_a_different_t() {
        let p = well_formed();
        let t1 = 0.1;
        let t2 = 0.5;
        let grid = default_calendar_grid();
        let violations = check_calendar_k(t1, &p, t2, &p, &grid, 2.0);
        // identical params at two different T means w(k) is identical, so
        // w2 >= w1 trivially; construct a genuine violation by shrinking p2.
        assert!(violations.is_empty());

        let shrunk = SVIParams { a: p.a * 0.3, ..p };
        let violations = check_calendar_k(t1, &p, t2, &shrunk, &grid, 2.0);
        assert!(violations.iter().any(|v| (v.k).abs() < 1e-9));
    }
}
