//! ATM-anchored delta-shell SVI calibrator (`spec.md` §4.4).
//!
//! Unlike the teacher's CMA-ES/L-BFGS-B global optimizer, this calibrator
//! never takes a gradient step: it locks the ATM level from the nearest
//! quote, then grows symmetric delta shells outward and grid-sweeps a
//! shrinking window around the current best point at each resolution,
//! always scoring candidates against observed *time value* in the
//! market's quoted convention (not variance) so the Huber threshold
//! `k_huber = 6·minTick` is in the same units as the residuals it
//! penalizes.

use crate::calibration::robust::huber_rho;
use crate::config::FitOptions;
use crate::error::{Error, Result};
use crate::market_spec::MarketSpec;
use crate::pricing;
use crate::svi::model::{
    from_metrics, implied_vol as svi_iv, FromMetricsOptions, LogMoneyness, SVIParams, TraderMetrics, B_MIN,
    RHO_MAX, SIGMA_MIN,
};

/// A single market quote offered to the calibrator: strike, quoted mid
/// premium, and optional IV/weight hints.
#[derive(Debug, Clone, Copy)]
pub struct ShellQuote {
    pub strike: f64,
    pub mid_quoted: f64,
    pub iv: Option<f64>,
    pub weight: Option<f64>,
}

/// Outcome of [`fit_delta_shells`]: either a normal fit, or a degenerate
/// one that still carries an ATM-only slice (`spec.md` §4.4 "fewer than 5
/// usable rows").
#[derive(Debug, Clone)]
pub enum DeltaShellOutcome {
    Fitted(SVIParams),
    Degenerate { partial: SVIParams, usable_rows: usize },
}

impl DeltaShellOutcome {
    pub fn params(&self) -> &SVIParams {
        match self {
            DeltaShellOutcome::Fitted(p) => p,
            DeltaShellOutcome::Degenerate { partial, .. } => partial,
        }
    }
}

const MIN_USABLE_ROWS: usize = 5;
const SHELL_TARGET_START: f64 = 0.49;
const SHELL_TARGET_FLOOR: f64 = 0.20;
const SHELL_TARGET_STEP: f64 = 0.01;

struct Resolution {
    grid: usize,
    span: f64,
}

const SHELL_RESOLUTIONS: [Resolution; 3] = [
    Resolution { grid: 15, span: 0.25 },
    Resolution { grid: 9, span: 0.12 },
    Resolution { grid: 7, span: 0.06 },
];

const WING_GRID: usize = 17;
const S_NEG_LO: f64 = -1.5;
const S_NEG_HI: f64 = -0.05;
const S_POS_LO: f64 = 0.05;
const S_POS_HI: f64 = 1.5;

fn call_delta(forward: f64, strike: f64, t: f64, sigma: f64) -> f64 {
    pricing::price_and_greeks(forward, strike, t, sigma.max(1e-6), true, 1.0)
        .map(|pg| pg.delta)
        .unwrap_or(f64::NAN)
}

/// Quoted time value of a market row, using the payoff formula matching
/// the instrument actually quoted (put for strikes at/below the forward,
/// call above).
fn observed_tv_quoted(q: &ShellQuote, forward: f64, is_put_role: bool, market_spec: &MarketSpec, min_tick: f64) -> f64 {
    let intrinsic_base = if is_put_role {
        (q.strike - forward).max(0.0)
    } else {
        (forward - q.strike).max(0.0)
    };
    let intrinsic_quoted = market_spec.from_base_to_quoted(intrinsic_base, forward);
    (q.mid_quoted - intrinsic_quoted).max(min_tick / 2.0)
}

/// Model time value under a candidate SVI slice, in the market's quoted
/// convention. Time value is option-type invariant under Black-76 (call
/// and put time value coincide for the same `(F,K,T,σ)` by put-call
/// parity), so this always prices the call leg regardless of which side
/// of the forward `strike` sits on.
fn model_tv_quoted(forward: f64, strike: f64, t: f64, p: &SVIParams, market_spec: &MarketSpec) -> Option<f64> {
    let k = LogMoneyness::from_strike_forward(strike, forward).ok()?;
    let sigma = svi_iv(k, t, p);
    let pg = pricing::price_and_greeks(forward, strike, t, sigma, true, 1.0).ok()?;
    let intrinsic_base = (forward - strike).max(0.0);
    Some(market_spec.from_base_to_quoted(pg.price - intrinsic_base, forward))
}

struct FitRow {
    strike: f64,
    tv_obs: f64,
    weight: f64,
}

fn sweep_axis(center: f64, span: f64, n: usize) -> Vec<f64> {
    if n <= 1 {
        return vec![center];
    }
    (0..n)
        .map(|i| center - span + 2.0 * span * (i as f64) / ((n - 1) as f64))
        .collect()
}

fn huber_loss_on_rows(rows: &[FitRow], p: &SVIParams, forward: f64, t: f64, market_spec: &MarketSpec, k_huber: f64) -> f64 {
    rows.iter()
        .map(|r| {
            let model = model_tv_quoted(forward, r.strike, t, p, market_spec).unwrap_or(r.tv_obs);
            r.weight * huber_rho(model - r.tv_obs, k_huber)
        })
        .sum()
}

fn degenerate_atm_only(l0: f64, sigma_atm: f64, usable_rows: usize) -> DeltaShellOutcome {
    let metrics = TraderMetrics {
        l0,
        s0: 0.0,
        c0: 1.0 / sigma_atm,
        s_neg: 1.0,
        s_pos: 1.0,
    };
    let partial = from_metrics(&metrics, FromMetricsOptions { preserve_bumps: false });
    DeltaShellOutcome::Degenerate { partial, usable_rows }
}

/// Fits an ATM-anchored SVI slice from delta-bucketed market quotes
/// (`spec.md` §4.4). Returns [`DeltaShellOutcome::Degenerate`] (not an
/// error) when fewer than five usable rows are available, carrying a flat
/// ATM-only slice; fails only when there are no rows at all.
pub fn fit_delta_shells(
    quotes: &[ShellQuote],
    forward: f64,
    t_expiry: f64,
    market_spec: &MarketSpec,
    fit_options: &FitOptions,
) -> Result<DeltaShellOutcome> {
    if quotes.is_empty() {
        return Err(Error::Degenerate {
            stage: "fit_delta_shells:empty",
            usable_rows: 0,
            required: 1,
        });
    }

    let min_tick = fit_options.min_tick;
    let k_huber = 6.0 * min_tick;

    // ATM lock: the quote nearest the forward pins L0.
    let atm_quote = quotes
        .iter()
        .min_by(|a, b| {
            (a.strike - forward)
                .abs()
                .partial_cmp(&(b.strike - forward).abs())
                .unwrap()
        })
        .unwrap();
    let sigma_atm = atm_quote.iv.map(|iv| iv.clamp(0.20, 2.0)).unwrap_or(0.50);
    let l0 = sigma_atm * sigma_atm * t_expiry;

    if quotes.len() < MIN_USABLE_ROWS {
        return Ok(degenerate_atm_only(l0, sigma_atm, quotes.len()));
    }

    // Shell growth: each quote plays a put or call role by which side of
    // the forward it sits on. Walk target call-deltas from near-ATM
    // outward, each step picking the unused strike on each side whose
    // call-delta (under the *current* working SVI) is nearest the target.
    let mut current = SVIParams {
        a: l0 - sigma_atm,
        b: 1.0,
        rho: 0.0,
        sigma: sigma_atm,
        m: 0.0,
    };
    current.a = l0 - current.b * current.sigma;

    let mut used = vec![false; quotes.len()];
    let mut shell_rows: Vec<FitRow> = Vec::new();

    let mut target = SHELL_TARGET_START;
    while target >= SHELL_TARGET_FLOOR - 1e-9 {
        let mut best_put: Option<(usize, f64)> = None;
        let mut best_call: Option<(usize, f64)> = None;

        for (i, q) in quotes.iter().enumerate() {
            if used[i] {
                continue;
            }
            let k = match LogMoneyness::from_strike_forward(q.strike, forward) {
                Ok(k) => k,
                Err(_) => continue,
            };
            let sigma_here = svi_iv(k, t_expiry, &current);
            let cd = call_delta(forward, q.strike, t_expiry, sigma_here);
            if !cd.is_finite() {
                continue;
            }
            if q.strike <= forward {
                let dist = (cd - target).abs();
                if best_put.map(|(_, d)| dist < d).unwrap_or(true) {
                    best_put = Some((i, dist));
                }
            } else {
                let dist = (cd - (1.0 - target)).abs();
                if best_call.map(|(_, d)| dist < d).unwrap_or(true) {
                    best_call = Some((i, dist));
                }
            }
        }

        if let Some((i, _)) = best_put {
            used[i] = true;
            let q = &quotes[i];
            shell_rows.push(FitRow {
                strike: q.strike,
                tv_obs: observed_tv_quoted(q, forward, true, market_spec, min_tick),
                weight: q.weight.unwrap_or(1.0),
            });
        }
        if let Some((i, _)) = best_call {
            used[i] = true;
            let q = &quotes[i];
            shell_rows.push(FitRow {
                strike: q.strike,
                tv_obs: observed_tv_quoted(q, forward, false, market_spec, min_tick),
                weight: q.weight.unwrap_or(1.0),
            });
        }

        if best_put.is_none() && best_call.is_none() {
            break;
        }
        target -= SHELL_TARGET_STEP;
    }

    if shell_rows.len() < MIN_USABLE_ROWS {
        return Ok(degenerate_atm_only(l0, sigma_atm, shell_rows.len()));
    }

    // Core refit: grid-sweep (S0, C0) at three shrinking resolutions,
    // holding L0 locked and carrying sigma forward between resolutions so
    // C0 stays meaningfully tied to curvature.
    let mut s0_best = 0.0_f64;
    let mut c0_best = 1.0 / sigma_atm;
    let mut sigma_current = sigma_atm;

    for res in SHELL_RESOLUTIONS.iter() {
        let s0_candidates = sweep_axis(s0_best, res.span, res.grid);
        let c0_candidates = sweep_axis(c0_best, res.span, res.grid);

        let mut best_loss = f64::INFINITY;
        let mut best = (s0_best, c0_best, sigma_current);

        for &s0 in &s0_candidates {
            for &c0 in &c0_candidates {
                if c0 <= 1e-6 {
                    continue;
                }
                let b = (c0 * sigma_current).max(B_MIN);
                let rho = (s0 / b).clamp(-RHO_MAX, RHO_MAX);
                let sigma = (b / c0).max(SIGMA_MIN);
                let a = l0 - b * sigma;
                let p = SVIParams { a, b, rho, sigma, m: 0.0 };

                let loss = huber_loss_on_rows(&shell_rows, &p, forward, t_expiry, market_spec, k_huber);
                if loss < best_loss {
                    best_loss = loss;
                    best = (s0, c0, sigma);
                }
            }
        }

        s0_best = best.0;
        c0_best = best.1;
        sigma_current = best.2;
    }

    let b_core = (c0_best * sigma_current).max(B_MIN);
    let rho_core = (s0_best / b_core).clamp(-RHO_MAX, RHO_MAX);
    current = SVIParams {
        a: l0 - b_core * sigma_current,
        b: b_core,
        rho: rho_core,
        sigma: sigma_current,
        m: 0.0,
    };

    // Wing refit: among the outer shells (call-delta <= 0.15 or >= 0.85),
    // grid-sweep (S_neg, S_pos) directly.
    let wing_rows: Vec<&FitRow> = shell_rows
        .iter()
        .filter(|r| {
            let k = LogMoneyness::from_strike_forward(r.strike, forward).unwrap();
            let sigma_here = svi_iv(k, t_expiry, &current);
            let cd = call_delta(forward, r.strike, t_expiry, sigma_here);
            cd.is_finite() && (cd <= 0.15 || cd >= 0.85)
        })
        .collect();

    let (mut s_neg_best, mut s_pos_best) = (b_core * (1.0 - rho_core), b_core * (1.0 + rho_core));

    if !wing_rows.is_empty() {
        let s_neg_candidates = sweep_axis((S_NEG_LO + S_NEG_HI) / 2.0, (S_NEG_HI - S_NEG_LO) / 2.0, WING_GRID);
        let s_pos_candidates = sweep_axis((S_POS_LO + S_POS_HI) / 2.0, (S_POS_HI - S_POS_LO) / 2.0, WING_GRID);

        let mut best_loss = f64::INFINITY;
        for &s_neg in &s_neg_candidates {
            for &s_pos in &s_pos_candidates {
                let s_sum = s_pos + s_neg;
                if s_sum.abs() < 1e-6 {
                    continue;
                }
                let b_w = (s_sum / 2.0).max(B_MIN);
                let rho_w = ((s_pos - s_neg) / s_sum).clamp(-RHO_MAX, RHO_MAX);
                let sigma_w = (b_w / c0_best).max(SIGMA_MIN);
                let a_w = l0 - b_w * sigma_w;
                let p = SVIParams { a: a_w, b: b_w, rho: rho_w, sigma: sigma_w, m: 0.0 };

                let loss: f64 = wing_rows
                    .iter()
                    .map(|r| {
                        let model = model_tv_quoted(forward, r.strike, t_expiry, &p, market_spec).unwrap_or(r.tv_obs);
                        r.weight * huber_rho(model - r.tv_obs, k_huber)
                    })
                    .sum();
                if loss < best_loss {
                    best_loss = loss;
                    s_neg_best = s_neg;
                    s_pos_best = s_pos;
                }
            }
        }
    }

    let final_metrics = TraderMetrics {
        l0,
        s0: s0_best,
        c0: c0_best,
        s_neg: s_neg_best,
        s_pos: s_pos_best,
    };
    let fitted = from_metrics(&final_metrics, FromMetricsOptions { preserve_bumps: true });
    Ok(DeltaShellOutcome::Fitted(fitted))
}
