//! Price Curve (PC) time-value fitter (`spec.md` §4.5).
//!
//! The Core Curve (CC) gives a clean, no-arbitrage SVI smile. The Price
//! Curve layers a single scalar correction `θ` on top of it, scaled by an
//! ATM-concentrated taper, so the quotes the desk actually shows track
//! flow-driven microstructure without throwing away the CC's arbitrage
//! guarantees: `tv_model[i] = ccTV[i] + θ·taper[i]`. `θ` is fit by
//! closed-form WLS, refined by IRLS (Huber or Tukey per
//! [`crate::config::RobustLoss`]), trimmed for outliers, shrunk until the
//! resulting call-price sequence is convex, then floor-enforced and
//! convex-repaired as a TV sequence before being handed back to callers.

use crate::calibration::robust::mad;
use crate::config::{FitOptions, RobustLoss};
use crate::error::{Error, Result};

/// A single sanitised leg offered to the PC fitter: a strike with its
/// log-moneyness, observed market time value (quoted convention), the
/// Core Curve's time value at that strike, and the ATM taper weight.
#[derive(Debug, Clone, Copy)]
pub struct PcLeg {
    pub strike: f64,
    pub k: f64,
    pub tv_market: f64,
    pub cc_tv: f64,
    pub phi: f64,
    pub weight: Option<f64>,
    pub vega: Option<f64>,
}

/// Result of [`fit_pc_smile`]. `tv_fitted`/`used_mask` are aligned to the
/// sanitised, k-sorted row order (duplicates collapsed, non-finite/negative
/// legs dropped) -- not necessarily the caller's input order.
#[derive(Debug, Clone)]
pub struct PcFitResult {
    pub theta: f64,
    pub tv_fitted: Vec<f64>,
    pub used_mask: Vec<bool>,
    pub rmse_bps: f64,
    pub shrink_count: u32,
    pub trim_count: usize,
    pub min_tv_slack: f64,
}

const KAPPA: f64 = 2.0;
const DELTA: f64 = 0.1;
const MIN_ACTIVE_ROWS: usize = 5;
const IRLS_MAX_ITERS: usize = 5;
const IRLS_CONVERGE_TOL: f64 = 1e-4;
const SHRINK_FACTOR: f64 = 0.8;
const SHRINK_MAX_ITERS: u32 = 10;

struct SanitizedLeg {
    strike: f64,
    k: f64,
    tv_market: f64,
    cc_tv: f64,
    phi: f64,
    base_weight: f64,
    vega: Option<f64>,
}

fn sanitize(legs: &[PcLeg]) -> Vec<SanitizedLeg> {
    let mut by_strike: Vec<SanitizedLeg> = Vec::new();
    for leg in legs {
        if !(leg.tv_market.is_finite() && leg.tv_market >= 0.0 && leg.cc_tv.is_finite() && leg.phi.is_finite()) {
            continue;
        }
        let weight = leg.weight.unwrap_or(1.0);
        if let Some(existing) = by_strike.iter_mut().find(|r| (r.strike - leg.strike).abs() < 1e-9) {
            if weight > existing.base_weight {
                existing.tv_market = leg.tv_market;
                existing.cc_tv = leg.cc_tv;
                existing.phi = leg.phi;
                existing.base_weight = weight;
                existing.vega = leg.vega;
            }
            continue;
        }
        by_strike.push(SanitizedLeg {
            strike: leg.strike,
            k: leg.k,
            tv_market: leg.tv_market,
            cc_tv: leg.cc_tv,
            phi: leg.phi,
            base_weight: weight,
            vega: leg.vega,
        });
    }
    by_strike.sort_by(|a, b| a.k.partial_cmp(&b.k).unwrap());
    by_strike
}

fn scale_for(vega: Option<f64>, cc_tv: f64) -> f64 {
    let vega_term = KAPPA * vega.unwrap_or(0.0) * 1e-4;
    let tv_term = DELTA * 1e-4 * cc_tv.abs();
    vega_term.max(tv_term).max(1e-6)
}

/// Closed-form weighted least squares for the single scalar `θ` in
/// `y = θ·x`, `θ = Σwᵢxᵢyᵢ / Σwᵢxᵢ²`.
fn solve_theta(rows: &[SanitizedLeg], w0: &[f64], irls_w: &[f64], y: &[f64]) -> f64 {
    let mut num = 0.0;
    let mut den = 0.0;
    for (i, row) in rows.iter().enumerate() {
        let w = w0[i] * irls_w[i];
        let x = row.phi;
        num += w * x * y[i];
        den += w * x * x;
    }
    if den.abs() < 1e-14 {
        0.0
    } else {
        num / den
    }
}

/// 3-point non-uniform convexity stencil on an already strike-sorted
/// sequence of quoted-unit call prices. Constant rescaling of price units
/// does not change the sign of the stencil, so quoted prices (rather than
/// base-denominated ones) are used directly.
fn min_convexity_stencil(strikes: &[f64], prices: &[f64]) -> f64 {
    let n = prices.len();
    if n < 3 {
        return f64::INFINITY;
    }
    let mut worst = f64::INFINITY;
    for i in 1..n - 1 {
        let (k0, k1, k2) = (strikes[i - 1], strikes[i], strikes[i + 1]);
        let (c0, c1, c2) = (prices[i - 1], prices[i], prices[i + 1]);
        let h1 = k1 - k0;
        let h2 = k2 - k1;
        let stencil = 2.0 * ((c2 - c1) / (h2 * (h1 + h2)) - (c1 - c0) / (h1 * (h1 + h2)));
        worst = worst.min(stencil);
    }
    worst
}

/// Pool-adjacent-violators on slopes between successive strikes: merges
/// adjacent slope blocks whenever a later block's average is not greater
/// than or equal to the previous one, enforcing a non-decreasing slope
/// sequence (i.e. convexity of `y(x)`).
fn pav_convex_repair(xs: &[f64], ys: &[f64]) -> Vec<f64> {
    let n = ys.len();
    if n < 3 {
        return ys.to_vec();
    }
    let mut slopes: Vec<f64> = (1..n).map(|i| (ys[i] - ys[i - 1]) / (xs[i] - xs[i - 1]).max(1e-12)).collect();
    let mut weights: Vec<f64> = (1..n).map(|i| xs[i] - xs[i - 1]).collect();

    let mut i = 0;
    while i + 1 < slopes.len() {
        if slopes[i] > slopes[i + 1] + 1e-12 {
            let pooled_w = weights[i] + weights[i + 1];
            let pooled = (slopes[i] * weights[i] + slopes[i + 1] * weights[i + 1]) / pooled_w;
            slopes[i] = pooled;
            weights[i] = pooled_w;
            slopes.remove(i + 1);
            weights.remove(i + 1);
            if i > 0 {
                i -= 1;
            }
        } else {
            i += 1;
        }
    }

    // Re-expand pooled blocks back across their original per-step widths.
    let mut out = vec![ys[0]; n];
    let mut idx = 0;
    let step_widths: Vec<f64> = (1..n).map(|i| xs[i] - xs[i - 1]).collect();
    let mut step_idx = 0;
    for (&slope, &block_w) in slopes.iter().zip(weights.iter()) {
        let mut consumed = 0.0;
        while consumed < block_w - 1e-9 && step_idx < step_widths.len() {
            let w = step_widths[step_idx];
            out[idx + 1] = out[idx] + slope * w;
            idx += 1;
            step_idx += 1;
            consumed += w;
        }
    }
    out
}

/// Fits the Price Curve time-value correction on top of a Core Curve
/// (`spec.md` §4.5). Fails only when `legs` is empty after sanitisation
/// fundamentally cannot proceed (handled via the early-degeneracy path,
/// which returns `Ok` with `theta=0`, not an error -- this mirrors
/// [`crate::calibration::delta_shell::fit_delta_shells`]'s Empty-vs-Degenerate
/// split).
pub fn fit_pc_smile(legs: &[PcLeg], forward: f64, fit_options: &FitOptions) -> Result<PcFitResult> {
    if legs.is_empty() {
        return Err(Error::Degenerate {
            stage: "fit_pc_smile:empty",
            usable_rows: 0,
            required: 1,
        });
    }

    let rows = sanitize(legs);
    let n = rows.len();

    let w0: Vec<f64> = rows
        .iter()
        .map(|r| {
            if r.phi <= 0.0 {
                0.0
            } else {
                let scale = scale_for(r.vega, r.cc_tv);
                r.base_weight * r.phi / (scale * scale)
            }
        })
        .collect();

    let active_count = w0.iter().filter(|&&w| w > 0.0).count();
    let all_phi_zero = rows.iter().all(|r| r.phi <= 0.0);

    let min_tick = fit_options.min_tick;
    let abs_floor = fit_options.min_tv_abs_floor_ticks * min_tick;
    let floor_for = |r: &SanitizedLeg| -> f64 {
        let band_floor = if fit_options.apply_tick_floor_within_band && r.k.abs() <= fit_options.taper_band {
            fit_options.min_tv_ticks * min_tick
        } else {
            0.0
        };
        let frac_floor = fit_options.min_tv_frac_of_cc * r.cc_tv;
        abs_floor.max(band_floor).max(frac_floor)
    };

    if n == 0 || active_count < MIN_ACTIVE_ROWS {
        let tv_fitted: Vec<f64> = rows.iter().map(|r| r.cc_tv.max(floor_for(r))).collect();
        return Ok(PcFitResult {
            theta: 0.0,
            used_mask: vec![false; n],
            min_tv_slack: tv_fitted
                .iter()
                .zip(rows.iter())
                .map(|(tv, r)| tv - floor_for(r))
                .fold(f64::INFINITY, f64::min),
            tv_fitted,
            rmse_bps: 0.0,
            shrink_count: 0,
            trim_count: 0,
        });
    }

    if all_phi_zero {
        // theta is fixed at 0 (no taper to fit against), but the floor ->
        // convex-repair -> re-floor sequence still applies: flooring alone
        // can break convexity of the raw CC time-value sequence, and
        // `spec.md` §4.5 step 4 mandates repair even on this path.
        let mut tv_raw: Vec<f64> = rows.iter().map(|r| r.cc_tv.max(floor_for(r))).collect();
        let strikes: Vec<f64> = rows.iter().map(|r| r.strike).collect();
        tv_raw = pav_convex_repair(&strikes, &tv_raw);
        for (tv, r) in tv_raw.iter_mut().zip(rows.iter()) {
            *tv = tv.max(floor_for(r));
        }
        let tv_fitted = tv_raw;
        return Ok(PcFitResult {
            theta: 0.0,
            used_mask: vec![true; n],
            min_tv_slack: tv_fitted
                .iter()
                .zip(rows.iter())
                .map(|(tv, r)| tv - floor_for(r))
                .fold(f64::INFINITY, f64::min),
            tv_fitted,
            rmse_bps: 0.0,
            shrink_count: 0,
            trim_count: 0,
        });
    }

    let y: Vec<f64> = rows.iter().map(|r| r.tv_market - r.cc_tv).collect();
    let mut irls_w = vec![1.0_f64; n];
    let mut theta = solve_theta(&rows, &w0, &irls_w, &y);

    for _ in 0..IRLS_MAX_ITERS {
        let resid: Vec<f64> = rows.iter().zip(y.iter()).map(|(r, &yi)| theta * r.phi - yi).collect();
        let scale = mad(&resid).max(1e-10);
        let prev_wr: Vec<f64> = irls_w.iter().zip(resid.iter()).map(|(w, r)| w * r).collect();

        irls_w = resid
            .iter()
            .map(|r| {
                let u = r / scale;
                match fit_options.robust_loss {
                    RobustLoss::Huber => (fit_options.huber_c / u.abs().max(1e-12)).min(1.0),
                    RobustLoss::Tukey => {
                        let t = u / fit_options.tukey_c;
                        if t.abs() < 1.0 {
                            let v = 1.0 - t * t;
                            v * v
                        } else {
                            0.0
                        }
                    }
                }
            })
            .collect();

        let new_theta = solve_theta(&rows, &w0, &irls_w, &y);
        let new_wr: Vec<f64> = irls_w
            .iter()
            .zip(rows.iter())
            .zip(y.iter())
            .map(|((w, r), &yi)| w * (new_theta * r.phi - yi))
            .collect();
        let max_delta = prev_wr
            .iter()
            .zip(new_wr.iter())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0_f64, f64::max);
        theta = new_theta;
        if max_delta < IRLS_CONVERGE_TOL {
            break;
        }
    }

    // Outlier trim.
    let resid: Vec<f64> = rows.iter().zip(y.iter()).map(|(r, &yi)| theta * r.phi - yi).collect();
    let scale = mad(&resid).max(1e-10);
    let mut used_mask = vec![false; n];
    let mut trim_count = 0usize;
    for (i, r) in resid.iter().enumerate() {
        let rel_bps = 10_000.0 * r.abs() / rows[i].tv_market.max(1e-10);
        let mad_outlier = r.abs() > 3.0 * scale;
        let bps_outlier = rel_bps > fit_options.max_outlier_trim_bps;
        let is_active = w0[i] > 0.0;
        if is_active && !(mad_outlier && bps_outlier) {
            used_mask[i] = true;
        } else if is_active {
            trim_count += 1;
        }
    }

    let kept_w0: Vec<f64> = (0..n).map(|i| if used_mask[i] { w0[i] } else { 0.0 }).collect();
    theta = solve_theta(&rows, &kept_w0, &irls_w, &y);

    // Convex-repair of theta: shrink until the call-price stencil (in
    // quoted units, using cc_tv+theta*phi as the time-value layer on top
    // of call intrinsic) is convex everywhere.
    let mut shrink_count = 0u32;
    if fit_options.enforce_call_convexity {
        let strikes: Vec<f64> = rows.iter().map(|r| r.strike).collect();
        loop {
            let prices: Vec<f64> = rows
                .iter()
                .map(|r| (forward - r.strike).max(0.0) + r.cc_tv + theta * r.phi)
                .collect();
            let worst = min_convexity_stencil(&strikes, &prices);
            if worst >= -fit_options.convexity_tol || shrink_count >= SHRINK_MAX_ITERS {
                break;
            }
            theta *= SHRINK_FACTOR;
            shrink_count += 1;
        }
    }

    // Build tv_raw and apply floors.
    let mut tv_raw: Vec<f64> = rows.iter().map(|r| r.cc_tv + theta * r.phi).collect();
    for (tv, r) in tv_raw.iter_mut().zip(rows.iter()) {
        *tv = tv.max(floor_for(r));
    }

    // Convex repair of the TV sequence itself, then re-clamp to floors.
    let strikes: Vec<f64> = rows.iter().map(|r| r.strike).collect();
    let mut tv_fitted = pav_convex_repair(&strikes, &tv_raw);
    for (tv, r) in tv_fitted.iter_mut().zip(rows.iter()) {
        *tv = tv.max(floor_for(r));
    }

    let sq_err: f64 = tv_fitted
        .iter()
        .zip(rows.iter())
        .map(|(tv, r)| {
            let e_bps = 10_000.0 * (tv - r.tv_market) / r.tv_market.max(1e-10);
            e_bps * e_bps
        })
        .sum();
    let rmse_bps = (sq_err / n as f64).sqrt();

    let min_tv_slack = tv_fitted
        .iter()
        .zip(rows.iter())
        .map(|(tv, r)| tv - floor_for(r))
        .fold(f64::INFINITY, f64::min);

    Ok(PcFitResult {
        theta,
        tv_fitted,
        used_mask,
        rmse_bps,
        shrink_count,
        trim_count,
        min_tv_slack,
    })
}
