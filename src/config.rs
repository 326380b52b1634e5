//! Enumerated configuration records (see `spec.md` §9 design note 2 and
//! §6 "Config constants"). Replaces the source's dynamic config objects and
//! global config manager with plain structs injected explicitly.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::market_spec::MarketSpec;

/// Robust loss family used by the PC time-value fitter's IRLS stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum RobustLoss {
    Huber,
    Tukey,
}

/// Tunable no-arbitrage validation constants for SVI parameters (§6).
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SviValidationConfig {
    /// Maximum allowed wing slope `b(1±ρ)`.
    pub wing_max_slope: f64,
    /// Tolerance for variance-convexity `d²w/dk² >= -tol`.
    pub convexity_tol: f64,
    /// Tolerance for butterfly weighted-combination check.
    pub butterfly_tol: f64,
    /// Relative tolerance (in bps) for calendar-in-k margin.
    pub calendar_tol_bps: f64,
}

impl Default for SviValidationConfig {
    fn default() -> Self {
        Self {
            wing_max_slope: 2.0,
            convexity_tol: 3e-6,
            butterfly_tol: 1e-8,
            calendar_tol_bps: 2.0,
        }
    }
}

/// Fit options for the PC time-value fitter (§4.5, §9 design note 2).
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FitOptions {
    pub min_tick: f64,
    pub min_tv_ticks: f64,
    pub min_tv_frac_of_cc: f64,
    pub apply_tick_floor_within_band: bool,
    pub min_tv_abs_floor_ticks: f64,
    pub max_outlier_trim_bps: f64,
    pub robust_loss: RobustLoss,
    pub huber_c: f64,
    pub tukey_c: f64,
    pub enforce_call_convexity: bool,
    pub convexity_tol: f64,
    pub taper_band: f64,
    pub taper_exp: f64,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            min_tick: 5e-5,
            min_tv_ticks: 2.0,
            min_tv_frac_of_cc: 0.5,
            apply_tick_floor_within_band: true,
            min_tv_abs_floor_ticks: 1.0,
            max_outlier_trim_bps: 150.0,
            robust_loss: RobustLoss::Huber,
            huber_c: 1.345,
            tukey_c: 4.685,
            enforce_call_convexity: true,
            convexity_tol: 1e-6,
            taper_band: 0.25,
            taper_exp: 1.0,
        }
    }
}

/// Explicit context passed to every entry point instead of a process-wide
/// config singleton (§9 design note 3).
#[derive(Debug, Clone)]
pub struct CoreContext {
    pub market_spec: MarketSpec,
    pub svi_cfg: SviValidationConfig,
    pub fit_options: FitOptions,
    /// Half-life used by the stale-confidence blend in `getQuote` (§9 Open
    /// Question 3: configurable per surface, default 24h).
    pub stale_hours: f64,
}

impl CoreContext {
    pub fn new(market_spec: MarketSpec) -> Self {
        Self {
            market_spec,
            svi_cfg: SviValidationConfig::default(),
            fit_options: FitOptions::default(),
            stale_hours: 24.0,
        }
    }
}
