//! Command-line parsing for the JES calibration fitter.
//!
//! The goal of this module is to keep **argument parsing** and **command dispatch**
//! separate from the fitting code.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::domain::{Binning, FitConfig, IngestWindow, MinimizerConfig};
use crate::error::CalibError;

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "jesfit", version, about = "Global jet energy scale calibration fit")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fit measurement tables from CSV, print diagnostics, and optionally export.
    Fit(FitArgs),
    /// Run only the bootstrap extrapolation on one channel.
    Seed(SeedArgs),
    /// Fit a synthetic sample generated from a known curve.
    Demo(DemoArgs),
    /// Print a previously exported fit report.
    Show(ShowArgs),
}

/// Options shared by every command that runs the global fit.
#[derive(Debug, Args, Clone)]
pub struct FitOptions {
    /// Absolute JES at the anchor momentum.
    #[arg(long, default_value_t = 0.982)]
    pub anchor_jes: f64,

    /// Uncertainty of the anchor JES.
    #[arg(long, default_value_t = 0.004)]
    pub anchor_err: f64,

    /// Anchor momentum (GeV); defaults to the first reference momentum.
    #[arg(long)]
    pub anchor_pt: Option<f64>,

    /// Lower edge of the recoil-momentum window (GeV).
    #[arg(long, default_value_t = 250.0)]
    pub pt_min: f64,

    /// Upper edge of the recoil-momentum window (GeV).
    #[arg(long, default_value_t = 1350.0)]
    pub pt_max: f64,

    /// Template and source bin edges (GeV), comma separated.
    #[arg(long, value_delimiter = ',')]
    pub bins: Option<Vec<f64>>,

    /// Iteration cap per minimization.
    #[arg(long, default_value_t = 500)]
    pub max_iterations: usize,

    /// Convergence target on the estimated distance to minimum.
    #[arg(long, default_value_t = 1e-6)]
    pub edm_tolerance: f64,

    /// Number of starting points.
    #[arg(long, default_value_t = 4)]
    pub starts: usize,

    /// Extra passes restarted from the best start.
    #[arg(long, default_value_t = 1)]
    pub refits: usize,

    /// Start from the fixed initial guess instead of the bootstrap seed.
    #[arg(long)]
    pub no_seed: bool,

    /// Channel index the bootstrap seed is built from.
    #[arg(long, default_value_t = 0)]
    pub seed_channel: usize,

    /// Prefix of the template names.
    #[arg(long, default_value = "ptchs_multijet")]
    pub template_prefix: String,

    /// Show the N points with the largest pulls.
    #[arg(long, default_value_t = 10)]
    pub top: usize,

    /// Export the fit report to JSON.
    #[arg(long = "export-json")]
    pub export_json: Option<PathBuf>,

    /// Export variation templates to CSV.
    #[arg(long = "export-templates")]
    pub export_templates: Option<PathBuf>,

    /// Export shifted-data and reference graphs to CSV.
    #[arg(long = "export-graphs")]
    pub export_graphs: Option<PathBuf>,

    /// Export the fitted curve with its one-sigma band to CSV.
    #[arg(long = "export-band")]
    pub export_band: Option<PathBuf>,
}

#[derive(Debug, Parser, Clone)]
pub struct FitArgs {
    /// Measurement table (channel,pt,response,response_err,ref_fraction[,ref_pt]).
    #[arg(long, value_name = "CSV")]
    pub measurements: PathBuf,

    /// Systematic-source table (source,pt,value).
    #[arg(long, value_name = "CSV")]
    pub sources: Option<PathBuf>,

    #[command(flatten)]
    pub options: FitOptions,
}

#[derive(Debug, Parser, Clone)]
pub struct SeedArgs {
    /// Measurement table (channel,pt,response,response_err,ref_fraction[,ref_pt]).
    #[arg(long, value_name = "CSV")]
    pub measurements: PathBuf,

    /// Channel name to seed from; defaults to the first channel.
    #[arg(long)]
    pub channel: Option<String>,

    #[arg(long, default_value_t = 0.982)]
    pub anchor_jes: f64,

    #[arg(long, default_value_t = 0.004)]
    pub anchor_err: f64,

    #[arg(long, default_value_t = 250.0)]
    pub pt_min: f64,

    #[arg(long, default_value_t = 1350.0)]
    pub pt_max: f64,
}

#[derive(Debug, Parser, Clone)]
pub struct DemoArgs {
    /// Random seed for the synthetic sample.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Noise as a multiple of the quoted point errors.
    #[arg(long, default_value_t = 1.0)]
    pub noise_scale: f64,

    /// Inject a flat source on the first channel with this pull.
    #[arg(long)]
    pub inject_pull: Option<f64>,

    #[command(flatten)]
    pub options: FitOptions,
}

#[derive(Debug, Parser)]
pub struct ShowArgs {
    /// Report JSON produced by `jesfit fit --export-json`.
    #[arg(long, value_name = "JSON")]
    pub report: PathBuf,
}

impl FitOptions {
    pub fn to_config(&self) -> Result<FitConfig, CalibError> {
        let template_bins = match &self.bins {
            Some(edges) => Binning::new(edges.clone())?,
            None => Binning::default(),
        };
        let defaults = FitConfig::default();
        Ok(FitConfig {
            anchor_jes: self.anchor_jes,
            anchor_err: self.anchor_err,
            anchor_pt: self.anchor_pt,
            window: IngestWindow::new(self.pt_min, self.pt_max),
            template_bins,
            minimizer: MinimizerConfig {
                max_iterations: self.max_iterations,
                edm_tolerance: self.edm_tolerance,
                n_starts: self.starts,
                n_refits: self.refits,
                ..MinimizerConfig::default()
            },
            seed_channel: (!self.no_seed).then_some(self.seed_channel),
            template_prefix: self.template_prefix.clone(),
            ..defaults
        })
    }
}
