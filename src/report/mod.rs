//! Reporting utilities: per-point residuals and pull rankings.

pub mod format;

pub use format::*;

use crate::domain::{FitResult, MeasurementSet, SystematicSourceLibrary};
use crate::error::CalibError;
use crate::fit::FitContext;

/// Fitted value and pull of one measurement point.
#[derive(Debug, Clone, PartialEq)]
pub struct PointResidual {
    pub channel: String,
    pub pt: f64,
    pub pt_ref: f64,
    pub data: f64,
    /// Sum of nuisance shifts applied to the data.
    pub shift: f64,
    pub fit: f64,
    pub pull: f64,
}

/// Compute residuals of every point at the fitted parameters.
pub fn compute_residuals(
    set: &MeasurementSet,
    sources: &SystematicSourceLibrary,
    result: &FitResult,
) -> Result<Vec<PointResidual>, CalibError> {
    let ctx = FitContext::new(set, sources, result.anchor)?;
    let mut par = result.shape.to_vec();
    par.extend_from_slice(&result.nuisance);

    let mut out = Vec::with_capacity(set.n_points());
    for (c, ch) in set.channels().iter().enumerate() {
        for i in 0..ch.len() {
            let t = ctx.point_terms(c, i, &par);
            let fit = t.fit_value();
            // A non-finite prediction keeps its row with a NaN pull.
            let pull = if fit.is_finite() { t.residual() } else { f64::NAN };
            out.push(PointResidual {
                channel: ch.name().to_string(),
                pt: t.pt_recoil,
                pt_ref: t.pt_ref,
                data: t.data,
                shift: t.shift,
                fit,
                pull,
            });
        }
    }
    Ok(out)
}

/// The `top_n` points with the largest absolute pull. NaN pulls rank last.
pub fn rank_pulls(residuals: &[PointResidual], top_n: usize) -> Vec<PointResidual> {
    let key = |r: &PointResidual| {
        if r.pull.is_nan() {
            f64::NEG_INFINITY
        } else {
            r.pull.abs()
        }
    };
    let mut sorted = residuals.to_vec();
    sorted.sort_by(|a, b| key(b).total_cmp(&key(a)));
    sorted.truncate(top_n);
    sorted
}
