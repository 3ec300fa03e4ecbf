//! Eigen-decomposition of the shape covariance into independent variations.
//!
//! Each eigenpair `(λ_k, v_k)` gives one uncorrelated source:
//! `p_k = p + sqrt(λ_k) v_k`, turned into a per-bin template
//! `f(pt; p_k) - f(pt; p)`.
//!
//! Conventions:
//! - eigenpairs are ordered by decreasing eigenvalue
//! - each eigenvector's largest-magnitude component is positive
//! - slightly negative eigenvalues from rounding are treated as zero

use nalgebra::DMatrix;

use crate::domain::{Binning, VariationTemplate};
use crate::models::{N_SHAPE, evaluate};

#[derive(Debug, Clone, PartialEq)]
pub struct EigenVariation {
    pub eigenvalue: f64,
    pub eigenvector: Vec<f64>,
}

impl EigenVariation {
    /// One-sigma parameter displacement along this direction.
    pub fn displacement(&self) -> Vec<f64> {
        let scale = self.eigenvalue.max(0.0).sqrt();
        self.eigenvector.iter().map(|v| scale * v).collect()
    }
}

pub fn eigen_variations(cov: &DMatrix<f64>) -> Vec<EigenVariation> {
    let sym = (cov + cov.transpose()) * 0.5;
    let eig = sym.symmetric_eigen();

    let mut out: Vec<EigenVariation> = (0..eig.eigenvalues.len())
        .map(|k| {
            let mut v: Vec<f64> = eig.eigenvectors.column(k).iter().copied().collect();
            let lead = v
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))
                .map_or(0, |(i, _)| i);
            if v[lead] < 0.0 {
                v.iter_mut().for_each(|c| *c = -*c);
            }
            EigenVariation {
                eigenvalue: eig.eigenvalues[k],
                eigenvector: v,
            }
        })
        .collect();

    out.sort_by(|a, b| b.eigenvalue.total_cmp(&a.eigenvalue));
    out
}

/// Momentum to evaluate each bin at: the last of `data_pts` inside the bin,
/// or the bin's logarithmic centre when no data point falls in it.
pub fn bin_eval_points(binning: &Binning, data_pts: &[f64]) -> Vec<f64> {
    (0..binning.n_bins())
        .map(|bin| {
            data_pts
                .iter()
                .copied()
                .rfind(|&x| binning.find_bin(x) == Some(bin))
                .unwrap_or_else(|| binning.log_center(bin))
        })
        .collect()
}

/// Build one template per eigenpair of `cov`.
pub fn build_templates(
    shape: &[f64; N_SHAPE],
    cov: &DMatrix<f64>,
    binning: &Binning,
    eval_pts: &[f64],
    prefix: &str,
) -> Vec<VariationTemplate> {
    let nominal: Vec<f64> = eval_pts.iter().map(|&pt| evaluate(pt, shape)).collect();

    eigen_variations(cov)
        .into_iter()
        .enumerate()
        .map(|(k, var)| {
            let delta = var.displacement();
            let varied: Vec<f64> = shape.iter().zip(&delta).map(|(p, d)| p + d).collect();
            let shift = eval_pts
                .iter()
                .zip(&nominal)
                .map(|(&pt, nom)| evaluate(pt, &varied) - nom)
                .collect();
            VariationTemplate {
                name: format!("{prefix}_eig{k}"),
                index: k,
                eigenvalue: var.eigenvalue,
                eigenvector: var.eigenvector,
                binning: binning.clone(),
                pt: eval_pts.to_vec(),
                nominal: nominal.clone(),
                shift,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SHAPE_ANCHOR_PT;

    fn sample_cov() -> DMatrix<f64> {
        DMatrix::from_row_slice(
            3,
            3,
            &[
                4e-6, -1e-6, 2e-6, //
                -1e-6, 9e-6, -3e-6, //
                2e-6, -3e-6, 0.25,
            ],
        )
    }

    #[test]
    fn eigenvalues_sum_to_trace_in_descending_order() {
        let cov = sample_cov();
        let vars = eigen_variations(&cov);
        assert_eq!(vars.len(), 3);
        let sum: f64 = vars.iter().map(|v| v.eigenvalue).sum();
        assert!((sum - cov.trace()).abs() < 1e-12);
        assert!(vars.windows(2).all(|w| w[0].eigenvalue >= w[1].eigenvalue));
    }

    #[test]
    fn eigenvectors_are_unit_with_positive_lead() {
        for var in eigen_variations(&sample_cov()) {
            let norm: f64 = var.eigenvector.iter().map(|c| c * c).sum::<f64>().sqrt();
            assert!((norm - 1.0).abs() < 1e-10);
            let lead = var
                .eigenvector
                .iter()
                .copied()
                .max_by(|a, b| a.abs().total_cmp(&b.abs()))
                .unwrap();
            assert!(lead > 0.0);
        }
    }

    #[test]
    fn negative_rounding_eigenvalue_gives_zero_shift() {
        let cov = DMatrix::from_diagonal(&nalgebra::DVector::from_row_slice(&[1e-4, -1e-20, 0.0]));
        let vars = eigen_variations(&cov);
        assert!(vars[2].displacement().iter().all(|d| *d == 0.0));
    }

    #[test]
    fn offset_variance_gives_flat_template() {
        // Only p0 uncertain: every bin shifts by σ(p0).
        let cov = DMatrix::from_diagonal(&nalgebra::DVector::from_row_slice(&[1e-4, 0.0, 0.0]));
        let binning = Binning::default();
        let pts = bin_eval_points(&binning, &[]);
        let templates = build_templates(&[0.98, -0.01, 0.0], &cov, &binning, &pts, "ptchs_multijet");

        assert_eq!(templates.len(), 3);
        assert_eq!(templates[0].name, "ptchs_multijet_eig0");
        for b in 0..binning.n_bins() {
            assert!((templates[0].shift[b] - 0.01).abs() < 1e-12);
            assert!((templates[0].error(b) - 0.01).abs() < 1e-12);
            assert_eq!(templates[1].shift[b], 0.0);
        }
    }

    #[test]
    fn eval_points_take_the_last_data_point_in_the_bin() {
        let binning = Binning::default();
        let pts = bin_eval_points(&binning, &[320.0, 330.0, SHAPE_ANCHOR_PT]);
        assert_eq!(pts[0], SHAPE_ANCHOR_PT);
        assert_eq!(pts[2], 330.0);
        assert!((pts[1] - (250.0f64 * 300.0).sqrt()).abs() < 1e-9);
    }
}
