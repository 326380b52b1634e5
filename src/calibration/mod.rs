//! Calibration stage: the ATM-anchored delta-shell SVI calibrator (§4.4)
//! and the Price Curve time-value fitter (§4.5). Both search by grid
//! sweep or closed-form WLS/IRLS rather than a general nonlinear
//! optimizer -- the teacher's CMA-ES/L-BFGS-B stack has no remaining use
//! here (see `DESIGN.md`).

pub mod delta_shell;
pub mod pc_fitter;
pub mod robust;

pub use delta_shell::{fit_delta_shells, DeltaShellOutcome, ShellQuote};
pub use pc_fitter::{fit_pc_smile, PcFitResult, PcLeg};
