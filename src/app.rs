//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments
//! - loads measurement and source tables (or generates a synthetic sample)
//! - runs the calibration pipeline
//! - prints reports
//! - writes optional exports

use std::path::Path;

use clap::Parser;
use log::info;

use crate::cli::{Command, DemoArgs, FitArgs, FitOptions, SeedArgs, ShowArgs};
use crate::data::{SampleConfig, flat_source, generate_sample};
use crate::domain::{ChannelInput, FitConfig, IngestWindow, SystematicSource};
use crate::error::AppError;
use crate::io::{FitReport, load_measurements, load_sources, read_report_json};

pub mod pipeline;

/// Points on the exported curve grid.
const GRID_POINTS: usize = 101;

/// Entry point for the `jesfit` binary.
pub fn run() -> Result<(), AppError> {
    // `jesfit` and `jesfit --seed 7` behave like `jesfit demo ...`.
    let argv = rewrite_args(std::env::args().collect());
    let cli = crate::cli::Cli::parse_from(argv);

    match cli.command {
        Command::Fit(args) => handle_fit(args),
        Command::Seed(args) => handle_seed(args),
        Command::Demo(args) => handle_demo(args),
        Command::Show(args) => handle_show(args),
    }
}

fn handle_fit(args: FitArgs) -> Result<(), AppError> {
    let config = args.options.to_config()?;
    let table = load_measurements(&args.measurements)?;
    info!(
        "read {} rows from '{}' ({} skipped)",
        table.rows_read,
        args.measurements.display(),
        table.row_errors.len()
    );
    let sources = match &args.sources {
        Some(path) => load_sources(path, &config.template_bins)?.sources,
        None => Vec::new(),
    };
    run_and_report(table.channels, sources, &config, &args.options)
}

fn handle_demo(args: DemoArgs) -> Result<(), AppError> {
    let mut config = args.options.to_config()?;
    let sample_cfg = SampleConfig {
        seed: args.seed,
        noise_scale: args.noise_scale,
        ..SampleConfig::default()
    };
    let injected = match args.inject_pull {
        Some(pull) => vec![flat_source("demo_scale", 0b01, 0.01, pull, &config.template_bins)?],
        None => Vec::new(),
    };
    let sample = generate_sample(&sample_cfg, &injected)?;

    // Place the anchor on the truth unless the user overrides the momentum.
    if config.anchor_pt.is_none() {
        config.anchor_pt = Some(200.0);
        config.anchor_jes = sample.truth_at(200.0);
    }
    println!("Truth: p = {:?}", sample_cfg.truth);

    let sources = injected.into_iter().map(|s| s.source).collect();
    run_and_report(sample.channels, sources, &config, &args.options)
}

fn run_and_report(
    channels: Vec<ChannelInput>,
    sources: Vec<SystematicSource>,
    config: &FitConfig,
    options: &FitOptions,
) -> Result<(), AppError> {
    let run = pipeline::run_calibration(channels, sources, config)?;

    if let Some(seed) = &run.seed {
        println!("{}", crate::report::format_seed_summary(seed));
    }
    println!("{}", crate::report::format_fit_summary(&run.set, &run.result));
    println!(
        "{}",
        crate::report::format_residual_table(&crate::report::rank_pulls(&run.residuals, options.top))
    );
    if !run.templates.is_empty() {
        println!("{}", crate::report::format_templates(&run.templates));
    }

    // Optional exports.
    let (pt_min, pt_max) = grid_range(&config.window, config.template_bins.edges());
    if let Some(path) = &options.export_json {
        let report = FitReport::from_result(&run.result, &run.templates, pt_min, pt_max, GRID_POINTS);
        crate::io::write_report_json(path, &report)?;
    }
    if let Some(path) = &options.export_templates {
        crate::io::write_templates_csv(path, &run.templates)?;
    }
    if let Some(path) = &options.export_graphs {
        crate::io::write_graphs_csv(path, &run.graphs)?;
    }
    if let Some(path) = &options.export_band {
        let prop = run.propagator()?;
        let grid = crate::io::log_grid(pt_min, pt_max, GRID_POINTS);
        crate::io::write_band_csv(path, &prop.band(&grid))?;
    }

    if !run.result.is_converged() {
        return Err(AppError::new(4, "Global fit did not converge; results are not trusted."));
    }
    Ok(())
}

/// Curve grid range: the template binning, extended down to the window's lower edge.
fn grid_range(window: &IngestWindow, edges: &[f64]) -> (f64, f64) {
    let lo = edges.first().copied().unwrap_or(window.pt_min);
    let hi = edges.last().copied().unwrap_or(window.pt_max);
    (lo.min(window.pt_min.max(1.0)), hi)
}

fn handle_seed(args: SeedArgs) -> Result<(), AppError> {
    let table = load_measurements(&args.measurements)?;
    let seed = pipeline::run_seed(
        table.channels,
        args.channel.as_deref(),
        args.anchor_jes,
        args.anchor_err,
        &IngestWindow::new(args.pt_min, args.pt_max),
    )?;
    println!("{}", crate::report::format_seed_summary(&seed));
    if let Some(shape) = seed.initial_shape() {
        println!("Projected starting shape: {shape:?}");
    }
    Ok(())
}

fn handle_show(args: ShowArgs) -> Result<(), AppError> {
    let report = read_report_json(&args.report)?;
    print!("{}", format_report(&report, &args.report));
    Ok(())
}

fn format_report(report: &FitReport, path: &Path) -> String {
    let mut out = String::new();
    out.push_str(&format!("Report '{}' ({})\n", path.display(), report.created));
    out.push_str(&format!("Status: {:?}\n", report.status));
    for k in 0..report.shape.len() {
        out.push_str(&format!(
            "  p{k} = {:>10.6} ± {:.6}\n",
            report.shape[k], report.shape_errors[k]
        ));
    }
    for n in &report.nuisance {
        out.push_str(&format!("  {:<28} {:>8.3} ± {:.3}\n", n.name, n.value, n.error));
    }
    out.push_str(&format!("chi2 / ndf = {:.2} / {}\n", report.chi2.total, report.dof));
    out.push_str(&format!("{:>10} {:>10} {:>10}\n", "pt", "jes", "err"));
    let step = (report.grid.pt.len() / 10).max(1);
    for i in (0..report.grid.pt.len()).step_by(step) {
        let err = report.grid.err.get(i).map(|e| format!("{e:.5}")).unwrap_or_default();
        out.push_str(&format!(
            "{:>10.1} {:>10.5} {:>10}\n",
            report.grid.pt[i], report.grid.jes[i], err
        ));
    }
    out
}

/// Rewrite argv so `jesfit` defaults to `jesfit demo`.
///
/// Rules:
/// - `jesfit`                     -> `jesfit demo`
/// - `jesfit --seed 7 ...`        -> `jesfit demo --seed 7 ...`
/// - `jesfit --help/--version/-h` -> unchanged (show top-level help/version)
fn rewrite_args(mut argv: Vec<String>) -> Vec<String> {
    let Some(arg1) = argv.get(1).cloned() else {
        argv.push("demo".to_string());
        return argv;
    };

    let is_top_level_help_or_version = matches!(
        arg1.as_str(),
        "-h" | "--help" | "-V" | "--version" | "help"
    );
    if is_top_level_help_or_version {
        return argv;
    }

    let is_subcommand = matches!(arg1.as_str(), "fit" | "seed" | "demo" | "show");
    if is_subcommand {
        return argv;
    }

    // If the first token is a flag, treat it as "demo flags".
    if arg1.starts_with('-') {
        argv.insert(1, "demo".to_string());
        return argv;
    }

    argv
}
