//! Post-fit uncertainty propagation.
//!
//! Only converged fits are propagated; a non-converged covariance is not a
//! statement about the parameters and is refused.

pub mod eigen;
pub mod envelope;

pub use eigen::*;
pub use envelope::*;

use log::info;

use crate::domain::{Binning, ChannelGraphs, FitResult, MeasurementPoint, VariationTemplate};
use crate::error::CalibError;
use crate::models::{N_SHAPE, evaluate};

/// Envelope, templates and graph decoration for one converged fit.
#[derive(Debug, Clone, Copy)]
pub struct UncertaintyPropagator<'a> {
    result: &'a FitResult,
}

impl<'a> UncertaintyPropagator<'a> {
    pub fn new(result: &'a FitResult) -> Result<Self, CalibError> {
        if !result.is_converged() {
            return Err(CalibError::NotConverged(format!(
                "refusing to propagate uncertainties of a fit that is {:?}",
                result.status
            )));
        }
        Ok(Self { result })
    }

    pub fn shape(&self) -> &[f64; N_SHAPE] {
        &self.result.shape
    }

    pub fn nominal(&self, pt: f64) -> f64 {
        evaluate(pt, &self.result.shape)
    }

    /// One-sigma uncertainty of the curve at `pt`.
    pub fn error(&self, pt: f64) -> f64 {
        fit_error(evaluate, pt, &self.result.shape, &self.result.covariance)
    }

    /// `f(pt) + k σ_f(pt)`.
    pub fn envelope(&self, pt: f64, k: f64) -> f64 {
        envelope(evaluate, pt, &self.result.shape, &self.result.covariance, k)
    }

    /// `(pt, f - σ, f, f + σ)` at each momentum.
    pub fn band(&self, pts: &[f64]) -> Vec<(f64, f64, f64, f64)> {
        pts.iter()
            .map(|&pt| {
                let f = self.nominal(pt);
                let e = self.error(pt);
                (pt, f - e, f, f + e)
            })
            .collect()
    }

    pub fn eigen_variations(&self) -> Vec<EigenVariation> {
        eigen_variations(&self.result.covariance)
    }

    /// One template per eigenvector of the shape covariance.
    ///
    /// Bins are evaluated at the first channel's data momentum inside them,
    /// falling back to the bin's logarithmic centre.
    pub fn templates(&self, binning: &Binning, prefix: &str) -> Vec<VariationTemplate> {
        let data_pts: Vec<f64> = self
            .result
            .graphs
            .first()
            .map(|g| g.shifted.iter().map(|p| p.x).collect())
            .unwrap_or_default();
        let eval_pts = bin_eval_points(binning, &data_pts);
        let templates = build_templates(
            &self.result.shape,
            &self.result.covariance,
            binning,
            &eval_pts,
            prefix,
        );
        for t in &templates {
            info!(
                "{}: eigenvalue {:.3e}, eigenvector [{:.4}, {:.4}, {:.4}]",
                t.name, t.eigenvalue, t.eigenvector[0], t.eigenvector[1], t.eigenvector[2]
            );
        }
        templates
    }

    /// Fold the curve uncertainty into the derived graphs: reference points
    /// take the envelope width as their error, shifted data points add it in
    /// quadrature to their statistical error.
    pub fn decorate_graphs(&self) -> Vec<ChannelGraphs> {
        self.result
            .graphs
            .iter()
            .map(|g| ChannelGraphs {
                channel: g.channel.clone(),
                shifted: g
                    .shifted
                    .iter()
                    .map(|p| {
                        let env = self.error(p.x);
                        MeasurementPoint::new(p.x, p.y, p.y_err.hypot(env))
                    })
                    .collect(),
                reference: g
                    .reference
                    .iter()
                    .map(|p| MeasurementPoint::new(p.x, p.y, self.error(p.x)))
                    .collect(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AnchorPoint, Chi2Breakdown, FitStatus, NonConvergence};
    use nalgebra::{DMatrix, DVector};

    fn result(status: FitStatus) -> FitResult {
        let cov = DMatrix::from_diagonal(&DVector::from_row_slice(&[1e-6, 4e-6, 0.04]));
        FitResult {
            status,
            shape: [0.99, -0.015, 0.0],
            nuisance: Vec::new(),
            source_names: Vec::new(),
            covariance: cov.clone(),
            full_covariance: cov,
            chi2: Chi2Breakdown::default(),
            n_points: 4,
            dof: 1,
            anchor: AnchorPoint::new(120.0, 0.982, 0.004).unwrap(),
            iterations: 3,
            edm: 1e-9,
            graphs: vec![ChannelGraphs {
                channel: "mjb".to_string(),
                shifted: vec![MeasurementPoint::new(400.0, 0.99, 0.003)],
                reference: vec![MeasurementPoint::new(200.0, 0.991, 0.004)],
            }],
        }
    }

    #[test]
    fn refuses_non_converged_fit() {
        let r = result(FitStatus::NotConverged(NonConvergence::Stalled));
        assert!(matches!(
            UncertaintyPropagator::new(&r),
            Err(CalibError::NotConverged(_))
        ));
    }

    #[test]
    fn band_brackets_nominal_symmetrically() {
        let r = result(FitStatus::Converged);
        let prop = UncertaintyPropagator::new(&r).unwrap();
        for (pt, lo, f, hi) in prop.band(&[150.0, 400.0, 1200.0]) {
            assert!(lo < f && f < hi, "{pt}");
            assert!(((hi - f) - (f - lo)).abs() < 1e-14);
            assert!((prop.envelope(pt, 1.0) - hi).abs() < 1e-14);
        }
    }

    #[test]
    fn decorated_errors_include_envelope() {
        let r = result(FitStatus::Converged);
        let prop = UncertaintyPropagator::new(&r).unwrap();
        let g = prop.decorate_graphs();
        let env = prop.error(400.0);
        assert!((g[0].shifted[0].y_err - (0.003f64.powi(2) + env * env).sqrt()).abs() < 1e-15);
        assert_eq!(g[0].reference[0].y_err, prop.error(200.0));
        assert_eq!(g[0].shifted[0].y, 0.99);
    }

    #[test]
    fn templates_use_data_momentum() {
        let r = result(FitStatus::Converged);
        let prop = UncertaintyPropagator::new(&r).unwrap();
        let t = prop.templates(&Binning::default(), "jes");
        assert_eq!(t.len(), 3);
        // 400 GeV falls in [400, 450).
        assert_eq!(t[0].pt[4], 400.0);
        // Largest eigenvalue is the p2 variance.
        assert!((t[0].eigenvalue - 0.04).abs() < 1e-12);
    }
}
