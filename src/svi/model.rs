//! SVI raw smile parameterisation and the trader-metrics bijection
//! (`spec.md` §3, §4.2).

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::config::SviValidationConfig;
use crate::error::{Error, Result};

/// Log-moneyness `k = ln(K/F)` — the only moneyness convention used by this
/// system. A distinct type from unbranded `f64` so a raw strike can never
/// be passed where a log-moneyness is expected (`spec.md` §9 design note
/// "branded moneyness").
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct LogMoneyness(f64);

impl LogMoneyness {
    /// Builds `k = ln(K/F)` from a strike and forward, rejecting
    /// non-positive or non-finite inputs.
    pub fn from_strike_forward(strike: f64, forward: f64) -> Result<Self> {
        if !(strike > 0.0 && strike.is_finite()) {
            return Err(Error::InvalidInput {
                what: "K",
                value: strike,
            });
        }
        if !(forward > 0.0 && forward.is_finite()) {
            return Err(Error::InvalidInput {
                what: "F",
                value: forward,
            });
        }
        Ok(Self((strike / forward).ln()))
    }

    /// Wraps an already-computed log-moneyness value directly (e.g. from a
    /// grid sweep), bypassing the strike/forward derivation.
    pub fn raw(k: f64) -> Self {
        Self(k)
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

/// Raw SVI parameters for a single expiry slice: total variance
/// `w(k) = a + b(ρ(k-m) + sqrt((k-m)² + σ²))`. `m` is held at `0.0`
/// throughout this system (`spec.md` §4.2).
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SVIParams {
    pub a: f64,
    pub b: f64,
    pub rho: f64,
    pub sigma: f64,
    pub m: f64,
}

/// Trader-facing smile metrics, bijective with `SVIParams` at `m = 0`
/// (`spec.md` §3).
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TraderMetrics {
    /// ATM total variance: `a + b·σ`.
    pub l0: f64,
    /// ATM skew: `b·ρ`.
    pub s0: f64,
    /// Curvature: `b/σ`.
    pub c0: f64,
    /// Left-wing slope: `b(1-ρ)`.
    pub s_neg: f64,
    /// Right-wing slope: `b(1+ρ)`.
    pub s_pos: f64,
}

pub const B_MIN: f64 = 1e-6;
pub const SIGMA_MIN: f64 = 1e-3;
pub const RHO_MAX: f64 = 0.995;
pub const C0_MIN: f64 = 1e-6;
/// Weight given to the wing-derived `S0/b` skew estimate when
/// `S_pos + S_neg ≈ 0` and the caller asks to preserve existing bump/skew
/// information (`spec.md` §4.2, §9 Open Question 2 — tunable).
pub const WING_BLEND_WEIGHT: f64 = 0.25;
const S_SUM_EPS: f64 = 1e-9;
const W_FLOOR: f64 = 1e-12;
const T_FLOOR: f64 = 1e-12;

/// Total variance `w(k)` for the raw SVI parameterisation.
pub fn total_variance(k: LogMoneyness, p: &SVIParams) -> f64 {
    let x = k.value() - p.m;
    p.a + p.b * (p.rho * x + (x * x + p.sigma * p.sigma).sqrt())
}

/// Annualised implied volatility `sqrt(max(w, floor)/max(T, floor))`.
pub fn implied_vol(k: LogMoneyness, t: f64, p: &SVIParams) -> f64 {
    let w = total_variance(k, p).max(W_FLOOR);
    (w / t.max(T_FLOOR)).sqrt()
}

/// Pure projection from raw parameters to trader metrics.
pub fn to_metrics(p: &SVIParams) -> TraderMetrics {
    TraderMetrics {
        l0: p.a + p.b * p.sigma,
        s0: p.b * p.rho,
        c0: p.b / p.sigma,
        s_neg: p.b * (1.0 - p.rho),
        s_pos: p.b * (1.0 + p.rho),
    }
}

/// Options controlling the metrics-to-params projection.
#[derive(Debug, Clone, Copy, Default)]
pub struct FromMetricsOptions {
    /// When `S_pos + S_neg` is near zero (no wing-slope information), blend
    /// the (degenerate) wing-derived ρ with `S0/b` rather than discarding
    /// the ATM skew signal outright.
    pub preserve_bumps: bool,
}

/// Reconstructs raw SVI parameters from trader metrics (`spec.md` §4.2).
/// `m` is always fixed at `0.0`. Clamps `b`, `σ`, `ρ` to their documented
/// floors/caps rather than failing — callers validate the result
/// separately via [`validate`].
pub fn from_metrics(m: &TraderMetrics, opts: FromMetricsOptions) -> SVIParams {
    let s_sum = m.s_pos + m.s_neg;
    let b = (s_sum / 2.0).max(B_MIN);

    let rho = if s_sum.abs() > S_SUM_EPS {
        (m.s_pos - m.s_neg) / s_sum
    } else if opts.preserve_bumps && b > 0.0 {
        let wing_rho = 0.0; // wings carry no information when s_sum ~ 0
        let atm_rho = (m.s0 / b).clamp(-1.0, 1.0);
        (1.0 - WING_BLEND_WEIGHT) * wing_rho + WING_BLEND_WEIGHT * atm_rho
    } else {
        0.0
    };
    let rho = rho.clamp(-RHO_MAX, RHO_MAX);

    let sigma = (b / m.c0.max(C0_MIN)).max(SIGMA_MIN);
    let a = m.l0 - b * sigma;

    SVIParams {
        a,
        b,
        rho,
        sigma,
        m: 0.0,
    }
}

/// Result of validating an `SVIParams` against the static no-arbitrage
/// invariants of `spec.md` §3.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
}

/// Central second difference of `w(k)` on a uniform grid — shared by
/// `validate` and the standalone convexity check in [`crate::svi::noarb`].
pub fn variance_second_differences(p: &SVIParams, k_lo: f64, k_hi: f64, step: f64) -> Vec<(f64, f64)> {
    let n = ((k_hi - k_lo) / step).round() as i64;
    let mut out = Vec::with_capacity((n - 1).max(0) as usize);
    let mut i = 1;
    while i < n {
        let k = k_lo + (i as f64) * step;
        let w_m = total_variance(LogMoneyness::raw(k - step), p);
        let w_0 = total_variance(LogMoneyness::raw(k), p);
        let w_p = total_variance(LogMoneyness::raw(k + step), p);
        let d2 = (w_p - 2.0 * w_0 + w_m) / (step * step);
        out.push((k, d2));
        i += 1;
    }
    out
}

/// Validates `p` against the invariants of `spec.md` §3: `b >= 0`,
/// `|ρ| < 1`, `σ > 0`, both wing slopes in `[0, 2]`, and non-negative
/// variance convexity on `[-2, 2]` step `0.1`.
pub fn validate(p: &SVIParams, cfg: &SviValidationConfig) -> ValidationResult {
    let mut errors = Vec::new();

    if p.b < 0.0 || !p.b.is_finite() {
        errors.push(format!("b must be >= 0, got {}", p.b));
    }
    if !(p.rho.abs() < 1.0) || !p.rho.is_finite() {
        errors.push(format!("|rho| must be < 1, got {}", p.rho));
    }
    if p.sigma <= 0.0 || !p.sigma.is_finite() {
        errors.push(format!("sigma must be > 0, got {}", p.sigma));
    }
    if !p.a.is_finite() {
        errors.push(format!("a must be finite, got {}", p.a));
    }

    let s_neg = p.b * (1.0 - p.rho);
    let s_pos = p.b * (1.0 + p.rho);
    if !(0.0..=cfg.wing_max_slope).contains(&s_neg) {
        errors.push(format!(
            "left wing slope b(1-rho)={} out of [0, {}]",
            s_neg, cfg.wing_max_slope
        ));
    }
    if !(0.0..=cfg.wing_max_slope).contains(&s_pos) {
        errors.push(format!(
            "right wing slope b(1+rho)={} out of [0, {}]",
            s_pos, cfg.wing_max_slope
        ));
    }

    if errors.is_empty() {
        for (k, d2) in variance_second_differences(p, -2.0, 2.0, 0.1) {
            if d2 < -cfg.convexity_tol {
                errors.push(format!(
                    "variance convexity violated at k={:.2}: d2w={:.3e} < -{:.1e}",
                    k, d2, cfg.convexity_tol
                ));
            }
        }
    }

    ValidationResult {
        valid: errors.is_empty(),
        errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_params() -> SVIParams {
        SVIParams {
            a: 0.01,
            b: 0.3,
            rho: -0.3,
            sigma: 0.4,
            m: 0.0,
        }
    }

    #[test]
    fn metrics_roundtrip_identity() {
        let p = sample_params();
        let metrics = to_metrics(&p);
        let back = from_metrics(&metrics, FromMetricsOptions::default());
        assert!((back.a - p.a).abs() < 1e-9);
        assert!((back.b - p.b).abs() < 1e-9);
        assert!((back.rho - p.rho).abs() < 1e-9);
        assert!((back.sigma - p.sigma).abs() < 1e-9);
    }

    #[test]
    fn wing_blend_preserves_skew_when_degenerate() {
        let metrics = TraderMetrics {
            l0: 0.04,
            s0: -0.1,
            c0: 0.5,
            s_neg: 0.0,
            s_pos: 0.0,
        };
        let p = from_metrics(&metrics, FromMetricsOptions { preserve_bumps: true });
        assert!(p.b >= B_MIN);
        assert_ne!(p.rho, 0.0);
    }

    #[test]
    fn validate_accepts_well_formed_params() {
        let p = sample_params();
        let res = validate(&p, &SviValidationConfig::default());
        assert!(res.valid, "errors: {:?}", res.errors);
    }

    #[test]
    fn validate_rejects_excessive_wing_slope() {
        let p = SVIParams {
            a: 0.0,
            b: 3.0,
            rho: -0.9,
            sigma: 0.2,
            m: 0.0,
        };
        let res = validate(&p, &SviValidationConfig::default());
        assert!(!res.valid);
    }
}
