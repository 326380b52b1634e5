//! Structured error type for the pricing and calibration core.
//!
//! Mirrors the error-kind taxonomy of a quant pricing library: one
//! `thiserror`-derived enum, one variant per failure mode, each carrying the
//! context a caller needs to branch on without string-matching. Pricing
//! primitives never return `Err` — they saturate or return a sentinel
//! (`NaN`, `0.0`) per their own documented contract; `Error` is surfaced only
//! from calibrators and the dual-surface engine.

use thiserror::Error;

/// The result type used throughout the core.
pub type Result<T> = std::result::Result<T, Error>;

/// Structured error kinds for the pricing and calibration core (see
/// `spec.md` §7).
#[derive(Debug, Clone, Error, PartialEq)]
pub enum Error {
    /// A non-finite or out-of-domain argument was passed to an entry point.
    #[error("invalid input: {what} = {value}")]
    InvalidInput { what: &'static str, value: f64 },

    /// `from_metrics` produced parameters that fail `validate`.
    #[error("invalid SVI parameters ({reason}): {errors:?}")]
    InvalidSvi { reason: String, errors: Vec<String> },

    /// A calibrator or PC fitter did not have enough usable rows to fit
    /// confidently; the caller still receives the best partial result
    /// alongside this diagnosis.
    #[error("degenerate fit at stage `{stage}`: {usable_rows} usable rows (need >= {required})")]
    Degenerate {
        stage: &'static str,
        usable_rows: usize,
        required: usize,
    },

    /// The implied-vol solver could not bracket the target price (target
    /// above the maximum reachable price at the bracket cap).
    #[error("no bracket for target price {target} (max reachable {max_reachable})")]
    NoBracket { target: f64, max_reachable: f64 },

    /// `on_trade` / `get_quote` referenced an expiry with no Core Curve.
    #[error("stale surface: no CC for T={expiry_years} ({operation})")]
    StaleSurface {
        expiry_years: f64,
        operation: &'static str,
    },
}
