//! Damped Gauss-Newton (Levenberg-Marquardt) minimizer for residual problems.
//!
//! Each iteration:
//! 1. central-difference Jacobian `J` of the residual vector
//! 2. gradient `g = Jᵀr`, curvature `H = JᵀJ`
//! 3. stop when the estimated distance to minimum `gᵀH⁻¹g` is below tolerance
//! 4. otherwise solve `(H + λ diag H) δ = -g`, accept when chi2 decreases
//!
//! `λ` shrinks after an accepted step and grows after a rejected one; a step
//! that cannot be found before `λ` explodes means the minimizer stalled.
//!
//! The chi2 here is `Σ r²`, so with an error definition of one unit of chi2
//! the parameter covariance is `H⁻¹` at the minimum.

use log::debug;
use nalgebra::{DMatrix, DVector};

use crate::domain::{FitStatus, MinimizerConfig, NonConvergence};
use crate::error::CalibError;
use crate::fit::objective::Residuals;

const JACOBIAN_REL_STEP: f64 = 1e-6;
const LAMBDA_DOWN: f64 = 0.1;
const LAMBDA_UP: f64 = 10.0;
const LAMBDA_MIN: f64 = 1e-12;
const LAMBDA_MAX: f64 = 1e12;
/// Floor on the damping diagonal so flat directions still get damped.
const DIAG_FLOOR: f64 = 1e-12;

/// Outcome of one minimization.
#[derive(Debug, Clone)]
pub struct Minimum {
    pub params: Vec<f64>,
    pub chi2: f64,
    pub edm: f64,
    pub iterations: usize,
    pub status: FitStatus,
    /// `H⁻¹` at `params`; zero-filled when `H` is not positive definite.
    pub covariance: DMatrix<f64>,
}

impl Minimum {
    pub fn is_converged(&self) -> bool {
        self.status.is_converged()
    }
}

pub fn validate_config(config: &MinimizerConfig) -> Result<(), CalibError> {
    if config.max_iterations == 0 {
        return Err(CalibError::InvalidConfig(
            "max_iterations must be at least 1".to_string(),
        ));
    }
    if !(config.edm_tolerance.is_finite() && config.edm_tolerance > 0.0) {
        return Err(CalibError::InvalidConfig(format!(
            "edm tolerance {} must be > 0",
            config.edm_tolerance
        )));
    }
    if !(config.initial_lambda.is_finite() && config.initial_lambda > 0.0) {
        return Err(CalibError::InvalidConfig(format!(
            "initial damping {} must be > 0",
            config.initial_lambda
        )));
    }
    if config.n_starts == 0 {
        return Err(CalibError::InvalidConfig("n_starts must be at least 1".to_string()));
    }
    Ok(())
}

fn chi2_at<P: Residuals + ?Sized>(problem: &P, par: &[f64], r: &mut [f64]) -> f64 {
    problem.residuals_into(par, r);
    r.iter().map(|v| v * v).sum()
}

fn fill_jacobian<P: Residuals + ?Sized>(problem: &P, par: &[f64], jac: &mut DMatrix<f64>) {
    let m = problem.n_residuals();
    let mut work = par.to_vec();
    let mut plus = vec![0.0; m];
    let mut minus = vec![0.0; m];

    for j in 0..par.len() {
        let h = JACOBIAN_REL_STEP * (1.0 + par[j].abs());
        work[j] = par[j] + h;
        problem.residuals_into(&work, &mut plus);
        work[j] = par[j] - h;
        problem.residuals_into(&work, &mut minus);
        work[j] = par[j];
        for i in 0..m {
            jac[(i, j)] = (plus[i] - minus[i]) / (2.0 * h);
        }
    }
}

/// Gradient and curvature at `par`.
fn linearize<P: Residuals + ?Sized>(
    problem: &P,
    par: &[f64],
    r: &[f64],
    jac: &mut DMatrix<f64>,
) -> (DVector<f64>, DMatrix<f64>) {
    fill_jacobian(problem, par, jac);
    let rv = DVector::from_column_slice(r);
    let grad = jac.transpose() * rv;
    let hess = jac.transpose() * &*jac;
    (grad, hess)
}

/// `gᵀH⁻¹g` and `H⁻¹`, or `None` when `H` is not positive definite.
fn curvature(grad: &DVector<f64>, hess: &DMatrix<f64>) -> Option<(f64, DMatrix<f64>)> {
    let chol = hess.clone().cholesky()?;
    let edm = grad.dot(&chol.solve(grad));
    let inv = chol.inverse();
    let cov = (&inv + inv.transpose()) * 0.5;
    let finite = edm.is_finite() && cov.iter().all(|v| v.is_finite());
    let positive = (0..cov.nrows()).all(|i| cov[(i, i)] > 0.0);
    (finite && positive).then_some((edm, cov))
}

/// Try damped steps until chi2 decreases. Returns the accepted point.
#[allow(clippy::too_many_arguments)]
fn damped_step<P: Residuals + ?Sized>(
    problem: &P,
    par: &[f64],
    chi2: f64,
    grad: &DVector<f64>,
    hess: &DMatrix<f64>,
    lambda: &mut f64,
    trial_r: &mut [f64],
) -> Option<(Vec<f64>, f64)> {
    let n = par.len();
    loop {
        let mut a = hess.clone();
        for i in 0..n {
            a[(i, i)] += *lambda * hess[(i, i)].max(DIAG_FLOOR);
        }
        if let Some(chol) = a.cholesky() {
            let delta = chol.solve(grad);
            let trial: Vec<f64> = par.iter().zip(delta.iter()).map(|(p, d)| p - d).collect();
            let trial_chi2 = chi2_at(problem, &trial, trial_r);
            if trial_chi2.is_finite() && trial_chi2 < chi2 {
                *lambda = (*lambda * LAMBDA_DOWN).max(LAMBDA_MIN);
                return Some((trial, trial_chi2));
            }
        }
        *lambda *= LAMBDA_UP;
        if *lambda > LAMBDA_MAX {
            return None;
        }
    }
}

/// Minimize `Σ r(par)²` starting from `start`.
///
/// Never fails outright: problems are reported through `Minimum::status`.
pub fn minimize<P: Residuals + ?Sized>(problem: &P, start: &[f64], config: &MinimizerConfig) -> Minimum {
    let n = problem.n_params();
    let m = problem.n_residuals();
    let mut params = start.to_vec();
    let mut r = vec![0.0; m];
    let mut trial_r = vec![0.0; m];
    let mut jac = DMatrix::<f64>::zeros(m, n);

    let mut chi2 = chi2_at(problem, &params, &mut r);
    if !chi2.is_finite() {
        return Minimum {
            params,
            chi2,
            edm: f64::INFINITY,
            iterations: 0,
            status: FitStatus::NotConverged(NonConvergence::NonFinite),
            covariance: DMatrix::zeros(n, n),
        };
    }

    let mut lambda = config.initial_lambda;
    let mut iterations = 0;
    let mut stop = NonConvergence::IterationLimit;

    while iterations < config.max_iterations {
        let (grad, hess) = linearize(problem, &params, &r, &mut jac);
        if let Some((edm, _)) = curvature(&grad, &hess) {
            debug!("iteration {iterations}: chi2 = {chi2:.6}, edm = {edm:.3e}, lambda = {lambda:.1e}");
            if edm < config.edm_tolerance {
                break;
            }
        }

        iterations += 1;
        match damped_step(problem, &params, chi2, &grad, &hess, &mut lambda, &mut trial_r) {
            Some((next, next_chi2)) => {
                params = next;
                chi2 = next_chi2;
                std::mem::swap(&mut r, &mut trial_r);
            }
            None => {
                stop = NonConvergence::Stalled;
                break;
            }
        }
    }

    // Final curvature at the reported point decides the status.
    let (grad, hess) = linearize(problem, &params, &r, &mut jac);
    let (status, edm, covariance) = match curvature(&grad, &hess) {
        Some((edm, cov)) if edm < config.edm_tolerance => (FitStatus::Converged, edm, cov),
        Some((edm, cov)) => (FitStatus::NotConverged(stop), edm, cov),
        None => (
            FitStatus::NotConverged(NonConvergence::NotPositiveDefinite),
            f64::INFINITY,
            DMatrix::zeros(n, n),
        ),
    };

    debug!("minimization finished after {iterations} iterations: chi2 = {chi2:.6}, edm = {edm:.3e}, {status:?}");
    Minimum {
        params,
        chi2,
        edm,
        iterations,
        status,
        covariance,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Straight line `a + b x` through fixed points with unit errors.
    struct Line {
        x: Vec<f64>,
        y: Vec<f64>,
    }

    impl Residuals for Line {
        fn n_params(&self) -> usize {
            2
        }
        fn n_residuals(&self) -> usize {
            self.x.len()
        }
        fn residuals_into(&self, par: &[f64], out: &mut [f64]) {
            for i in 0..self.x.len() {
                out[i] = self.y[i] - (par[0] + par[1] * self.x[i]);
            }
        }
    }

    /// Rosenbrock as residuals: `(1 - a, 10 (b - a²))`.
    struct Rosenbrock;

    impl Residuals for Rosenbrock {
        fn n_params(&self) -> usize {
            2
        }
        fn n_residuals(&self) -> usize {
            2
        }
        fn residuals_into(&self, par: &[f64], out: &mut [f64]) {
            out[0] = 1.0 - par[0];
            out[1] = 10.0 * (par[1] - par[0] * par[0]);
        }
    }

    #[test]
    fn linear_problem_matches_closed_form() {
        let line = Line {
            x: vec![0.0, 1.0, 2.0, 3.0],
            y: vec![1.1, 2.9, 5.2, 6.8],
        };
        let min = minimize(&line, &[0.0, 0.0], &MinimizerConfig::default());
        assert!(min.is_converged(), "{:?}", min.status);

        // Closed form: b = Sxy/Sxx with centred x, a = ȳ - b x̄.
        let b = 1.94;
        let a = 4.0 - b * 1.5;
        assert!((min.params[0] - a).abs() < 1e-6);
        assert!((min.params[1] - b).abs() < 1e-6);
        // Var(b) = 1/Sxx = 1/5
        assert!((min.covariance[(1, 1)] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn rosenbrock_valley_converges() {
        // Zero-residual problem: the EDM equals chi2 here, so ask for a tight one.
        let cfg = MinimizerConfig {
            edm_tolerance: 1e-12,
            ..MinimizerConfig::default()
        };
        let min = minimize(&Rosenbrock, &[-1.2, 1.0], &cfg);
        assert!(min.is_converged(), "{:?}", min.status);
        assert!((min.params[0] - 1.0).abs() < 1e-4);
        assert!((min.params[1] - 1.0).abs() < 1e-4);
        assert!(min.chi2 < 1e-8);
    }

    #[test]
    fn iteration_cap_is_reported() {
        let cfg = MinimizerConfig {
            max_iterations: 1,
            ..MinimizerConfig::default()
        };
        let min = minimize(&Rosenbrock, &[-1.2, 1.0], &cfg);
        assert_eq!(
            min.status,
            FitStatus::NotConverged(NonConvergence::IterationLimit)
        );
        assert_eq!(min.iterations, 1);
    }

    #[test]
    fn flat_direction_is_not_positive_definite() {
        struct Flat;
        impl Residuals for Flat {
            fn n_params(&self) -> usize {
                2
            }
            fn n_residuals(&self) -> usize {
                1
            }
            fn residuals_into(&self, par: &[f64], out: &mut [f64]) {
                out[0] = par[0] - 1.0;
            }
        }
        let min = minimize(&Flat, &[0.0, 0.0], &MinimizerConfig::default());
        assert_eq!(
            min.status,
            FitStatus::NotConverged(NonConvergence::NotPositiveDefinite)
        );
    }

    #[test]
    fn config_validation() {
        assert!(validate_config(&MinimizerConfig::default()).is_ok());
        let bad = MinimizerConfig {
            edm_tolerance: 0.0,
            ..MinimizerConfig::default()
        };
        assert!(validate_config(&bad).is_err());
    }
}
