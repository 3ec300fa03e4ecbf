//! Shared calibration pipeline used by every front-end command.
//!
//! Keeping this in one place avoids duplicating the core workflow:
//! ingest -> anchor -> seed -> global fit -> propagation -> residuals
//!
//! The commands can then focus on presentation (printing and exports).

use log::{info, warn};

use crate::domain::{
    AnchorPoint, ChannelGraphs, ChannelInput, ChannelMeasurements, FitConfig, FitResult,
    IngestWindow, MeasurementSet, SystematicSource, SystematicSourceLibrary, VariationTemplate,
};
use crate::error::CalibError;
use crate::fit::{BootstrapSeeder, GlobalFitEngine, SeedResult};
use crate::report::{PointResidual, compute_residuals};
use crate::uncertainty::UncertaintyPropagator;

/// All computed outputs of a single calibration run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub set: MeasurementSet,
    pub sources: SystematicSourceLibrary,
    pub seed: Option<SeedResult>,
    pub result: FitResult,
    /// Derived graphs with the curve uncertainty folded in; empty when the
    /// fit did not converge.
    pub graphs: Vec<ChannelGraphs>,
    pub templates: Vec<VariationTemplate>,
    pub residuals: Vec<PointResidual>,
}

impl RunOutput {
    pub fn propagator(&self) -> Result<UncertaintyPropagator<'_>, CalibError> {
        UncertaintyPropagator::new(&self.result)
    }
}

/// Execute the full calibration on in-memory inputs.
pub fn run_calibration(
    inputs: Vec<ChannelInput>,
    sources: Vec<SystematicSource>,
    config: &FitConfig,
) -> Result<RunOutput, CalibError> {
    // 1) Validate, sort and window the measurements.
    let set = MeasurementSet::new(inputs, &config.window)?;
    let sources = SystematicSourceLibrary::new(sources, set.n_channels())?;
    let anchor = AnchorPoint::resolve(config, &set)?;
    info!(
        "{} points in {} channels, {} sources, anchor JES({:.1}) = {} ± {}",
        set.n_points(),
        set.n_channels(),
        sources.len(),
        anchor.pt,
        anchor.jes,
        anchor.err
    );

    // 2) Optional bootstrap seed.
    let seed = match config.seed_channel {
        Some(c) => seed_from_channel(&set, c, &anchor),
        None => None,
    };
    let initial_shape = seed
        .as_ref()
        .and_then(SeedResult::initial_shape)
        .unwrap_or(config.initial_shape);

    // 3) Global fit.
    let engine = GlobalFitEngine::new(&set, &sources, anchor, &config.minimizer)?;
    let result = engine.fit(&initial_shape);

    // 4) Uncertainty propagation, only for a trusted fit.
    let (graphs, templates) = match UncertaintyPropagator::new(&result) {
        Ok(prop) => (
            prop.decorate_graphs(),
            prop.templates(&config.template_bins, &config.template_prefix),
        ),
        Err(e) => {
            warn!("{e}; skipping templates and graph decoration");
            (Vec::new(), Vec::new())
        }
    };

    // 5) Residuals at the fitted parameters.
    let residuals = compute_residuals(&set, &sources, &result)?;

    Ok(RunOutput {
        set,
        sources,
        seed,
        result,
        graphs,
        templates,
        residuals,
    })
}

fn seed_from_channel(set: &MeasurementSet, channel: usize, anchor: &AnchorPoint) -> Option<SeedResult> {
    let Some(ch) = set.channel(channel) else {
        warn!("seed channel {channel} does not exist; using the fixed initial guess");
        return None;
    };
    if let Some(seed_pt) = seed_anchor_mismatch(anchor, ch) {
        warn!(
            "seed from '{}' places the anchor JES {} at {:.1} GeV, the global fit at {:.1} GeV",
            ch.name(),
            anchor.jes,
            seed_pt,
            anchor.pt
        );
    }
    let seeded = BootstrapSeeder::new(anchor.jes, anchor.err).and_then(|seeder| seeder.run_channel(ch));
    match seeded {
        Ok(seed) => Some(seed),
        Err(e) => {
            warn!("bootstrap seed from '{}' failed ({e}); using the fixed initial guess", ch.name());
            None
        }
    }
}

/// The seeder anchors at the channel's first reference momentum. Returns that
/// momentum when it is not the global-fit anchor momentum.
fn seed_anchor_mismatch(anchor: &AnchorPoint, ch: &ChannelMeasurements) -> Option<f64> {
    if ch.is_empty() {
        return None;
    }
    let seed_pt = ch.reference_pt(0);
    ((seed_pt - anchor.pt).abs() > 1e-9 * anchor.pt.max(1.0)).then_some(seed_pt)
}

/// Run the bootstrap extrapolation alone on the named channel (or the first).
pub fn run_seed(
    inputs: Vec<ChannelInput>,
    channel: Option<&str>,
    anchor_jes: f64,
    anchor_err: f64,
    window: &IngestWindow,
) -> Result<SeedResult, CalibError> {
    let set = MeasurementSet::new(inputs, window)?;
    let index = match channel {
        Some(name) => set.channel_index(name).ok_or_else(|| {
            CalibError::InvalidConfig(format!("unknown channel '{name}'"))
        })?,
        None => 0,
    };
    let ch = set
        .channel(index)
        .ok_or_else(|| CalibError::EmptyInput("no channels".to_string()))?;
    BootstrapSeeder::new(anchor_jes, anchor_err)?.run_channel(ch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{SampleConfig, flat_source, generate_sample};
    use crate::domain::{Binning, FitStatus, NonConvergence};

    fn demo_config(sample: &crate::data::SampleData) -> FitConfig {
        let cfg = FitConfig::default();
        FitConfig {
            anchor_pt: Some(200.0),
            anchor_jes: sample.truth_at(200.0),
            ..cfg
        }
    }

    #[test]
    fn end_to_end_on_synthetic_sample() {
        let sample_cfg = SampleConfig {
            noise_scale: 0.5,
            ..SampleConfig::default()
        };
        let sample = generate_sample(&sample_cfg, &[]).unwrap();
        let config = demo_config(&sample);
        let run = run_calibration(sample.channels.clone(), Vec::new(), &config).unwrap();

        assert!(run.result.is_converged(), "{:?}", run.result.status);
        assert!(run.seed.is_some());
        let err = run.result.shape_errors();
        for k in 0..2 {
            assert!((run.result.shape[k] - sample_cfg.truth[k]).abs() < 3.0 * err[k]);
        }
        assert_eq!(run.templates.len(), 3);
        assert_eq!(run.templates[0].nominal.len(), config.template_bins.n_bins());
        assert_eq!(run.graphs.len(), 2);
        assert_eq!(run.residuals.len(), run.set.n_points());
        // Decorated reference errors are the envelope width, not the placeholder.
        let prop = run.propagator().unwrap();
        let r0 = run.graphs[0].reference[0];
        assert_eq!(r0.y_err, prop.error(r0.x));
    }

    #[test]
    fn injected_source_enters_the_fit() {
        let sample_cfg = SampleConfig {
            noise_scale: 0.5,
            ..SampleConfig::default()
        };
        let injected = flat_source("scale", 0b01, 0.01, 1.0, &Binning::default()).unwrap();
        let sample = generate_sample(&sample_cfg, std::slice::from_ref(&injected)).unwrap();
        let config = demo_config(&sample);
        let run = run_calibration(sample.channels.clone(), vec![injected.source], &config).unwrap();

        assert!(run.result.is_converged());
        assert_eq!(run.result.nuisance.len(), 1);
        assert!(run.result.nuisance[0] > 0.5);
    }

    #[test]
    fn non_converged_fit_skips_propagation() {
        let sample = generate_sample(&SampleConfig::default(), &[]).unwrap();
        let mut config = demo_config(&sample);
        config.minimizer.max_iterations = 1;
        config.minimizer.n_starts = 1;
        config.minimizer.n_refits = 0;
        config.minimizer.edm_tolerance = 1e-30;
        config.seed_channel = None;
        config.initial_shape = [0.5, 0.3, 2.0];

        let run = run_calibration(sample.channels.clone(), Vec::new(), &config).unwrap();
        assert!(!run.result.is_converged());
        assert!(run.templates.is_empty());
        assert!(run.graphs.is_empty());
        assert!(matches!(run.propagator(), Err(CalibError::NotConverged(_))));
    }

    #[test]
    fn non_finite_start_is_reported_on_the_result() {
        let sample = generate_sample(&SampleConfig::default(), &[]).unwrap();
        let mut config = demo_config(&sample);
        config.minimizer.n_starts = 1;
        config.seed_channel = None;
        config.initial_shape = [0.0, 0.0, 0.0];

        let run = run_calibration(sample.channels.clone(), Vec::new(), &config).unwrap();
        assert_eq!(
            run.result.status,
            FitStatus::NotConverged(NonConvergence::NonFinite)
        );
        assert!(run.templates.is_empty());
        assert!(run.graphs.is_empty());
        assert_eq!(run.residuals.len(), run.set.n_points());
        assert!(run.residuals.iter().all(|r| r.pull.is_nan()));
    }

    #[test]
    fn seed_anchor_mismatch_only_when_momenta_differ() {
        let sample = generate_sample(&SampleConfig::default(), &[]).unwrap();
        let set = MeasurementSet::new(sample.channels, &IngestWindow::default()).unwrap();
        let ch = set.channel(0).unwrap();
        let first_ref = ch.reference_pt(0);

        let at_first = AnchorPoint::new(first_ref, 0.982, 0.004).unwrap();
        assert_eq!(seed_anchor_mismatch(&at_first, ch), None);

        let elsewhere = AnchorPoint::new(200.0, 0.982, 0.004).unwrap();
        assert_eq!(seed_anchor_mismatch(&elsewhere, ch), Some(first_ref));
    }

    #[test]
    fn seed_only_run_by_name() {
        let sample = generate_sample(&SampleConfig::default(), &[]).unwrap();
        let seed = run_seed(
            sample.channels.clone(),
            Some("multijet_mpf"),
            0.982,
            0.004,
            &IngestWindow::default(),
        )
        .unwrap();
        assert_eq!(seed.channel, "multijet_mpf");
        assert_eq!(seed.inferred[0].y, 0.982);

        assert!(run_seed(sample.channels, Some("nope"), 0.982, 0.004, &IngestWindow::default()).is_err());
    }
}
