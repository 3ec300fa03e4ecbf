//! Weighted least squares solver.
//!
//! The bootstrap seeder and the seed-to-curve projection repeatedly solve small
//! linear regression problems of the form:
//!
//! ```text
//! minimize Σ w_i (y_i - x_i^T β)^2
//! ```
//!
//! Implementation choices:
//! - We scale rows by `sqrt(w_i)` and solve an ordinary least squares problem.
//! - SVD handles tall design matrices (more rows than columns) robustly.
//! - With `w_i = 1/σ_i²` the parameter covariance is `(Xᵀ W X)⁻¹`, which is
//!   what a chi-square fit reports as parameter errors.

use nalgebra::{DMatrix, DVector};

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = x.clone().svd(true, true);

    // Try progressively looser tolerances if strict solve fails.
    for &tol in &[1e-10, 1e-8, 1e-6] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
}

/// Result of a weighted linear fit.
#[derive(Debug, Clone)]
pub struct LinearFit {
    pub beta: DVector<f64>,
    pub covariance: DMatrix<f64>,
    pub chi2: f64,
    /// Observations minus fitted parameters; negative when underdetermined.
    pub ndf: i64,
}

/// Weighted least squares with parameter covariance.
///
/// `design` is `n × p`, `weights` are `1/σ²`. Returns `None` when the normal
/// matrix cannot be inverted.
pub fn weighted_fit(design: &DMatrix<f64>, y: &[f64], weights: &[f64]) -> Option<LinearFit> {
    let (n, p) = design.shape();
    if y.len() != n || weights.len() != n || n == 0 || p == 0 {
        return None;
    }
    if weights.iter().any(|w| !(w.is_finite() && *w > 0.0)) {
        return None;
    }

    let mut xw = design.clone();
    let mut yw = DVector::<f64>::zeros(n);
    for i in 0..n {
        let sw = weights[i].sqrt();
        for j in 0..p {
            xw[(i, j)] *= sw;
        }
        yw[i] = y[i] * sw;
    }

    let beta = solve_least_squares(&xw, &yw)?;
    let normal = xw.transpose() * &xw;
    let covariance = normal.try_inverse()?;
    if covariance.iter().any(|v| !v.is_finite()) {
        return None;
    }

    let resid = &yw - &xw * &beta;
    Some(LinearFit {
        beta,
        covariance,
        chi2: resid.norm_squared(),
        ndf: n as i64 - p as i64,
    })
}
