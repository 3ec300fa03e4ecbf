//! Linear error propagation for a fitted curve.
//!
//! ```text
//! df_i  = (f(p + dp_i e_i) - f(p - dp_i e_i)) / (2 dp_i),  dp_i = 0.1 σ_i
//! σ_f²  = Σ_ij cov_ij df_i df_j
//! band  = f(x; p) + k σ_f
//! ```
//!
//! Parameters with zero variance get a zero derivative, so fixed parameters
//! can sit in the covariance as zero rows and columns.
//!
//! This is first-order Gaussian propagation. It only holds while the curve is
//! close to linear over about one standard deviation of each parameter.

use nalgebra::DMatrix;

/// Fraction of a parameter's standard deviation used as the difference step.
const STEP_FRACTION: f64 = 0.1;

/// Uncertainty of `f(x; params)` given the parameter covariance.
///
/// `cov` must be `params.len()` square.
pub fn fit_error<F>(f: F, x: f64, params: &[f64], cov: &DMatrix<f64>) -> f64
where
    F: Fn(f64, &[f64]) -> f64,
{
    let n = params.len();
    let mut work = params.to_vec();
    let mut df = vec![0.0; n];

    for i in 0..n {
        let dp = STEP_FRACTION * cov[(i, i)].max(0.0).sqrt();
        if dp > 0.0 {
            work[i] = params[i] + dp;
            let up = f(x, &work);
            work[i] = params[i] - dp;
            let down = f(x, &work);
            work[i] = params[i];
            df[i] = (up - down) / (2.0 * dp);
        }
    }

    let mut var = 0.0;
    for i in 0..n {
        for j in 0..n {
            var += cov[(i, j)] * df[i] * df[j];
        }
    }
    var.max(0.0).sqrt()
}

/// `f(x; params) + k * fit_error(...)`; `k = 0` gives the nominal value.
pub fn envelope<F>(f: F, x: f64, params: &[f64], cov: &DMatrix<f64>, k: f64) -> f64
where
    F: Fn(f64, &[f64]) -> f64,
{
    let nominal = f(x, params);
    if k == 0.0 {
        return nominal;
    }
    nominal + k * fit_error(f, x, params, cov)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(x: f64, p: &[f64]) -> f64 {
        p[0] + p[1] * x
    }

    #[test]
    fn linear_model_gives_textbook_error() {
        let cov = DMatrix::from_row_slice(2, 2, &[0.04, -0.01, -0.01, 0.09]);
        let p = [1.0, 2.0];
        // σ² = 0.04 + 2x(-0.01) + x² 0.09 at x = 2
        let expected = (0.04 - 0.04 + 0.36f64).sqrt();
        assert!((fit_error(line, 2.0, &p, &cov) - expected).abs() < 1e-12);
    }

    #[test]
    fn band_is_symmetric_and_k_zero_is_nominal() {
        let cov = DMatrix::from_diagonal(&nalgebra::DVector::from_row_slice(&[1e-4, 4e-6]));
        let p = [0.98, -0.01];
        for &x in &[0.0, 1.5, 7.0] {
            let nom = envelope(line, x, &p, &cov, 0.0);
            let up = envelope(line, x, &p, &cov, 1.0);
            let dn = envelope(line, x, &p, &cov, -1.0);
            assert_eq!(nom, line(x, &p));
            assert!(((up - nom) - (nom - dn)).abs() < 1e-14);
            assert!(up >= nom);
        }
    }

    #[test]
    fn fixed_parameters_do_not_contribute() {
        let mut cov = DMatrix::zeros(2, 2);
        cov[(0, 0)] = 0.01;
        let err = fit_error(line, 10.0, &[1.0, 5.0], &cov);
        assert!((err - 0.1).abs() < 1e-12);
    }
}
