//! SVI raw smile model (`model`) and the static no-arbitrage checks that
//! validate it against market strikes and across expiries (`noarb`).

pub mod model;
pub mod noarb;

pub use model::{
    from_metrics, implied_vol as svi_iv, to_metrics, total_variance as svi_w, validate,
    FromMetricsOptions, LogMoneyness, SVIParams, TraderMetrics, ValidationResult,
};
pub use noarb::{check_calendar_k, check_static_arb, ArbViolation, CalendarViolation, StaticArbCheck};
