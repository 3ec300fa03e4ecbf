//! Shared configuration and result types.
//!
//! Results are plain data: they are created once per fit run and not mutated
//! afterwards. Anything derived from a result (envelopes, templates) is
//! recomputed from it rather than patched in place.

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::domain::measurement::{MeasurementPoint, MeasurementSet};
use crate::domain::systematics::Binning;
use crate::error::CalibError;
use crate::models::N_SHAPE;

/// Recoil-momentum window applied jointly to measurement/fraction pairs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IngestWindow {
    pub pt_min: f64,
    pub pt_max: f64,
}

impl IngestWindow {
    pub fn new(pt_min: f64, pt_max: f64) -> Self {
        Self { pt_min, pt_max }
    }

    pub fn unbounded() -> Self {
        Self {
            pt_min: 0.0,
            pt_max: f64::INFINITY,
        }
    }

    pub fn contains(&self, pt: f64) -> bool {
        pt >= self.pt_min && pt <= self.pt_max
    }

    pub fn validate(&self) -> Result<(), CalibError> {
        if self.pt_min.is_nan() || self.pt_max.is_nan() || self.pt_max < self.pt_min {
            return Err(CalibError::InvalidConfig(format!(
                "invalid ingestion window [{}, {}]",
                self.pt_min, self.pt_max
            )));
        }
        Ok(())
    }
}

impl Default for IngestWindow {
    /// Data below 250 GeV is not described well by the simulation, and the
    /// reference fractions are only trusted up to 1350 GeV.
    fn default() -> Self {
        Self::new(250.0, 1350.0)
    }
}

/// The fixed, trusted absolute-scale point the fit is pinned to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnchorPoint {
    pub pt: f64,
    pub jes: f64,
    pub err: f64,
}

impl AnchorPoint {
    pub fn new(pt: f64, jes: f64, err: f64) -> Result<Self, CalibError> {
        if !(pt.is_finite() && pt > 0.0) {
            return Err(CalibError::InvalidConfig(format!("anchor momentum {pt} must be > 0")));
        }
        if !jes.is_finite() {
            return Err(CalibError::InvalidConfig("anchor JES must be finite".to_string()));
        }
        if !(err.is_finite() && err > 0.0) {
            return Err(CalibError::InvalidConfig(format!("anchor uncertainty {err} must be > 0")));
        }
        Ok(Self { pt, jes, err })
    }

    /// Anchor at the configured momentum, or at the reference momentum of the
    /// first measured point when none is configured.
    pub fn resolve(config: &FitConfig, set: &MeasurementSet) -> Result<Self, CalibError> {
        let pt = match config.anchor_pt {
            Some(pt) => pt,
            None => set.first_reference_pt().ok_or_else(|| {
                CalibError::EmptyInput("no point to place the anchor at".to_string())
            })?,
        };
        Self::new(pt, config.anchor_jes, config.anchor_err)
    }
}

/// Minimizer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinimizerConfig {
    pub max_iterations: usize,
    /// Convergence target on the estimated distance to minimum (chi2 units).
    pub edm_tolerance: f64,
    pub initial_lambda: f64,
    /// Number of starting points tried (the first is the initial guess).
    pub n_starts: usize,
    /// Extra minimization passes restarted from the best start.
    pub n_refits: usize,
}

impl Default for MinimizerConfig {
    fn default() -> Self {
        Self {
            max_iterations: 500,
            edm_tolerance: 1e-6,
            initial_lambda: 1e-3,
            n_starts: 4,
            n_refits: 1,
        }
    }
}

/// Full configuration of one calibration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitConfig {
    pub anchor_jes: f64,
    pub anchor_err: f64,
    /// Anchor momentum; `None` places it at the first reference point.
    pub anchor_pt: Option<f64>,
    pub window: IngestWindow,
    pub template_bins: Binning,
    pub minimizer: MinimizerConfig,
    /// Starting shape parameters when no seed curve is used.
    pub initial_shape: [f64; N_SHAPE],
    /// Seed the global fit from the bootstrap extrapolation of this channel.
    pub seed_channel: Option<usize>,
    /// Prefix for variation-template names (`<prefix>_eig<k>`).
    pub template_prefix: String,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            anchor_jes: 0.982,
            anchor_err: 0.004,
            anchor_pt: None,
            window: IngestWindow::default(),
            template_bins: Binning::default(),
            minimizer: MinimizerConfig::default(),
            initial_shape: [0.982, -0.005, 0.0],
            seed_channel: Some(0),
            template_prefix: "ptchs_multijet".to_string(),
        }
    }
}

/// Why a fit is not trusted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NonConvergence {
    /// The iteration cap was reached before the EDM target.
    IterationLimit,
    /// Damping grew without finding a downhill step.
    Stalled,
    /// The Hessian at the final point is not positive definite.
    NotPositiveDefinite,
    /// The objective produced non-finite values.
    NonFinite,
}

impl std::fmt::Display for NonConvergence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            NonConvergence::IterationLimit => "iteration limit reached",
            NonConvergence::Stalled => "minimizer stalled",
            NonConvergence::NotPositiveDefinite => "Hessian not positive definite",
            NonConvergence::NonFinite => "non-finite objective",
        };
        f.write_str(msg)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum FitStatus {
    Converged,
    NotConverged(NonConvergence),
}

impl FitStatus {
    pub fn is_converged(&self) -> bool {
        matches!(self, FitStatus::Converged)
    }
}

/// Chi-square split into its contributions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Chi2Breakdown {
    pub total: f64,
    /// Sum over all data points (with nuisance shifts applied).
    pub data: f64,
    /// Sum of squared nuisance parameters.
    pub sources: f64,
    pub anchor: f64,
    pub per_channel: Vec<f64>,
    pub per_source: Vec<f64>,
}

/// Per-channel graphs derived from the converged parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelGraphs {
    pub channel: String,
    /// `(data + shift) * jesref` at the recoil momentum.
    pub shifted: Vec<MeasurementPoint>,
    /// `jesref` at the reference momentum.
    pub reference: Vec<MeasurementPoint>,
}

#[derive(Debug, Clone)]
pub struct FitResult {
    pub status: FitStatus,
    pub shape: [f64; N_SHAPE],
    pub nuisance: Vec<f64>,
    pub source_names: Vec<String>,
    /// Covariance of the shape parameters (nuisances profiled).
    pub covariance: DMatrix<f64>,
    /// Covariance of all parameters, shape first.
    pub full_covariance: DMatrix<f64>,
    pub chi2: Chi2Breakdown,
    pub n_points: usize,
    pub dof: i64,
    pub anchor: AnchorPoint,
    pub iterations: usize,
    pub edm: f64,
    /// Empty unless the fit converged.
    pub graphs: Vec<ChannelGraphs>,
}

impl FitResult {
    pub fn is_converged(&self) -> bool {
        self.status.is_converged()
    }

    pub fn shape_errors(&self) -> [f64; N_SHAPE] {
        std::array::from_fn(|i| self.covariance[(i, i)].max(0.0).sqrt())
    }

    /// Post-fit uncertainty of each nuisance parameter.
    pub fn nuisance_errors(&self) -> Vec<f64> {
        (0..self.nuisance.len())
            .map(|s| self.full_covariance[(N_SHAPE + s, N_SHAPE + s)].max(0.0).sqrt())
            .collect()
    }

    pub fn chi2_per_dof(&self) -> Option<f64> {
        (self.dof > 0).then(|| self.chi2.total / self.dof as f64)
    }
}

/// One eigenvector variation of the fitted curve over a fixed binning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariationTemplate {
    pub name: String,
    pub index: usize,
    pub eigenvalue: f64,
    pub eigenvector: Vec<f64>,
    pub binning: Binning,
    /// Momentum each bin was evaluated at.
    pub pt: Vec<f64>,
    /// Nominal curve value per bin. Sources are signed, so the central value
    /// travels with the shift.
    pub nominal: Vec<f64>,
    /// Varied minus nominal per bin.
    pub shift: Vec<f64>,
}

impl VariationTemplate {
    pub fn error(&self, bin: usize) -> f64 {
        self.shift[bin].abs()
    }
}
