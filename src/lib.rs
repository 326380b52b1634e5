//! # dual-surface-core
//!
//! Core pricing and smile-calibration engine for an options market maker:
//! Black-76 pricing and greeks, a raw-SVI smile with a trader-metrics
//! bijection and static/calendar no-arbitrage checks, an ATM-anchored
//! delta-shell calibrator and a price-curve time-value fitter, and a
//! dual Core-Curve/Price-Curve quoting engine that deforms the smile from
//! observed inventory.
//!
//! The crate is a synchronous library: every operation completes in
//! bounded CPU time, nothing here performs I/O, and nothing here logs.
//! Pricing primitives never fail the call (they saturate or return a
//! sentinel); calibrators and the engine return a typed [`error::Error`].
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use surface_lib::{
//!     config::CoreContext,
//!     engine::DualSurfaceEngine,
//!     market_spec::{MarketSpec, PremiumConvention},
//!     svi::TraderMetrics,
//! };
//!
//! let ctx = CoreContext::new(MarketSpec::new("BTC", PremiumConvention::CryptoQuote, 5e-5));
//! let mut engine = DualSurfaceEngine::new(ctx);
//!
//! let metrics = TraderMetrics { l0: 0.04, s0: -0.1, c0: 0.5, s_neg: 0.2, s_pos: 0.2 };
//! engine.update_cc(0.25, metrics)?;
//!
//! let quote = engine.get_quote(0.25, 100_000.0, 97_000.0, true, 0.0)?;
//! println!("bid={} ask={}", quote.bid, quote.ask);
//! # Ok::<(), surface_lib::error::Error>(())
//! ```

pub mod calibration;
pub mod config;
pub mod engine;
pub mod error;
pub mod inventory;
pub mod market_spec;
pub mod pricing;
pub mod svi;

pub use calibration::{fit_delta_shells, fit_pc_smile, DeltaShellOutcome, PcFitResult, PcLeg, ShellQuote};
pub use config::{CoreContext, FitOptions, RobustLoss, SviValidationConfig};
pub use engine::{DisplayPolicy, DualSurfaceEngine, NodeState, Quote, RiskScorer, Surface};
pub use error::{Error, Result};
pub use inventory::{BucketEdgeParams, BucketInventory, DeltaBucket, EdgeParams, MetricDelta};
pub use market_spec::{MarketSpec, PremiumConvention};
pub use pricing::{implied_vol, price_and_greeks, PriceGreeks};
pub use svi::{
    check_calendar_k, check_static_arb, from_metrics, svi_iv, svi_w, to_metrics, validate, ArbViolation,
    CalendarViolation, FromMetricsOptions, LogMoneyness, SVIParams, StaticArbCheck, TraderMetrics,
    ValidationResult,
};
