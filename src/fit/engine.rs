//! Global fit orchestration.
//!
//! A single minimization of the joint objective can end on a shallow local
//! plateau, so the engine:
//! - minimizes from a small deterministic set of starting points (parallel)
//! - keeps the best converged candidate (lowest chi2, ties by start index)
//! - restarts the minimizer from that candidate `n_refits` times
//!
//! Nuisance parameters always start at zero.

use log::{info, warn};
use rayon::prelude::*;

use crate::domain::{
    AnchorPoint, FitResult, FitStatus, MeasurementSet, MinimizerConfig, SystematicSourceLibrary,
};
use crate::error::CalibError;
use crate::fit::minimizer::{Minimum, minimize, validate_config};
use crate::fit::objective::{FitContext, Residuals};
use crate::models::N_SHAPE;

/// Offsets added to the initial shape for each extra start.
const START_OFFSETS: [[f64; N_SHAPE]; 5] = [
    [0.0, 0.0, 0.0],
    [0.01, -0.01, 0.0],
    [-0.01, 0.01, 0.0],
    [0.0, 0.0, 0.5],
    [0.0, 0.0, -0.5],
];

#[derive(Debug, Clone)]
struct Candidate {
    idx: usize,
    minimum: Minimum,
}

impl Candidate {
    /// Converged beats non-converged, then lower chi2, then lower index.
    fn better_than(&self, other: &Candidate) -> bool {
        match (self.minimum.is_converged(), other.minimum.is_converged()) {
            (true, false) => true,
            (false, true) => false,
            _ => {
                self.minimum.chi2 < other.minimum.chi2
                    || (self.minimum.chi2 == other.minimum.chi2 && self.idx < other.idx)
            }
        }
    }
}

/// Fits the correction curve and nuisance parameters to a measurement set.
#[derive(Debug, Clone)]
pub struct GlobalFitEngine<'a> {
    context: FitContext<'a>,
    config: MinimizerConfig,
}

impl<'a> GlobalFitEngine<'a> {
    pub fn new(
        set: &'a MeasurementSet,
        sources: &'a SystematicSourceLibrary,
        anchor: AnchorPoint,
        config: &MinimizerConfig,
    ) -> Result<Self, CalibError> {
        validate_config(config)?;
        Ok(Self {
            context: FitContext::new(set, sources, anchor)?,
            config: config.clone(),
        })
    }

    pub fn context(&self) -> &FitContext<'a> {
        &self.context
    }

    fn start_points(&self, initial_shape: &[f64; N_SHAPE]) -> Vec<Vec<f64>> {
        let n_starts = self.config.n_starts.clamp(1, START_OFFSETS.len());
        START_OFFSETS[..n_starts]
            .iter()
            .map(|offset| {
                let mut start = vec![0.0; self.context.n_params()];
                for k in 0..N_SHAPE {
                    start[k] = initial_shape[k] + offset[k];
                }
                start
            })
            .collect()
    }

    /// Run the fit. Failure to converge is reported through the result's
    /// status, never as an error.
    pub fn fit(&self, initial_shape: &[f64; N_SHAPE]) -> FitResult {
        let ctx = &self.context;
        let starts = self.start_points(initial_shape);

        let candidates: Vec<Candidate> = starts
            .par_iter()
            .enumerate()
            .map(|(idx, start)| Candidate {
                idx,
                minimum: minimize(ctx, start, &self.config),
            })
            .collect();

        for c in &candidates {
            info!(
                "start {}: chi2 = {:.4}, {} iterations, {:?}",
                c.idx, c.minimum.chi2, c.minimum.iterations, c.minimum.status
            );
        }

        let mut best = candidates[0].clone();
        for c in &candidates[1..] {
            if c.better_than(&best) {
                best = c.clone();
            }
        }
        let mut iterations: usize = candidates.iter().map(|c| c.minimum.iterations).sum();

        for pass in 0..self.config.n_refits {
            let refit = Candidate {
                idx: best.idx,
                minimum: minimize(ctx, &best.minimum.params, &self.config),
            };
            iterations += refit.minimum.iterations;
            if refit.better_than(&best)
                || (refit.minimum.is_converged() && refit.minimum.chi2 <= best.minimum.chi2)
            {
                best = refit;
            }
            info!("refit {}: chi2 = {:.4}", pass + 1, best.minimum.chi2);
        }

        self.build_result(best.minimum, iterations)
    }

    fn build_result(&self, minimum: Minimum, iterations: usize) -> FitResult {
        let ctx = &self.context;
        let params = &minimum.params;
        let shape: [f64; N_SHAPE] = std::array::from_fn(|k| params[k]);
        let chi2 = ctx.breakdown(params);
        let n_points = ctx.n_points();
        let dof = n_points as i64 - N_SHAPE as i64;

        let graphs = if minimum.is_converged() {
            ctx.derived_graphs(params)
        } else {
            Vec::new()
        };

        match minimum.status {
            FitStatus::Converged => info!(
                "global fit converged: chi2 = {:.3} / {} (data {:.3}, sources {:.3}, anchor {:.3}), p = [{:.5}, {:.5}, {:.5}]",
                chi2.total, dof, chi2.data, chi2.sources, chi2.anchor, shape[0], shape[1], shape[2]
            ),
            FitStatus::NotConverged(reason) => warn!(
                "global fit did not converge ({reason}): chi2 = {:.3}, edm = {:.3e}",
                chi2.total, minimum.edm
            ),
        }

        FitResult {
            status: minimum.status,
            shape,
            nuisance: params[N_SHAPE..].to_vec(),
            source_names: ctx.sources().names(),
            covariance: minimum.covariance.view((0, 0), (N_SHAPE, N_SHAPE)).into_owned(),
            full_covariance: minimum.covariance,
            chi2,
            n_points,
            dof,
            anchor: ctx.anchor(),
            iterations,
            edm: minimum.edm,
            graphs,
        }
    }
}
