//! Calibration fitting.
//!
//! - `objective`: the joint chi-square as a residual vector
//! - `minimizer`: damped Gauss-Newton with convergence diagnostics
//! - `engine`: multi-start global fit producing a `FitResult`
//! - `bootstrap`: anchor extrapolation used to seed the global fit

pub mod bootstrap;
pub mod engine;
pub mod minimizer;
pub mod objective;

pub use bootstrap::*;
pub use engine::*;
pub use minimizer::*;
pub use objective::*;
