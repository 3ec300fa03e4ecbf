//! Read/write fit-report JSON files.
//!
//! The report is the portable representation of one calibration run:
//! - status, shape parameters, covariance and nuisance pulls
//! - the chi2 breakdown and anchor
//! - a precomputed curve grid with its one-sigma band for quick plotting
//! - the eigenvector variation templates

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{AnchorPoint, Chi2Breakdown, FitResult, FitStatus, VariationTemplate};
use crate::error::CalibError;
use crate::models::{N_SHAPE, evaluate};
use crate::uncertainty::UncertaintyPropagator;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NuisanceEntry {
    pub name: String,
    pub value: f64,
    pub error: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurveGrid {
    pub pt: Vec<f64>,
    pub jes: Vec<f64>,
    /// Empty when the fit did not converge.
    pub err: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitReport {
    pub tool: String,
    pub created: DateTime<Utc>,
    pub status: FitStatus,
    pub shape: [f64; N_SHAPE],
    pub shape_errors: [f64; N_SHAPE],
    /// Row-major shape covariance.
    pub covariance: Vec<Vec<f64>>,
    pub nuisance: Vec<NuisanceEntry>,
    pub chi2: Chi2Breakdown,
    pub n_points: usize,
    pub dof: i64,
    pub anchor: AnchorPoint,
    pub iterations: usize,
    /// `None` when the Hessian at the final point was not positive definite.
    pub edm: Option<f64>,
    pub grid: CurveGrid,
    pub templates: Vec<VariationTemplate>,
}

impl FitReport {
    /// Build a report with a log-spaced grid of `n` points over `[pt_min, pt_max]`.
    pub fn from_result(
        result: &FitResult,
        templates: &[VariationTemplate],
        pt_min: f64,
        pt_max: f64,
        n: usize,
    ) -> Self {
        let pt = log_grid(pt_min, pt_max, n);
        let jes = pt.iter().map(|&x| evaluate(x, &result.shape)).collect();
        let err = match UncertaintyPropagator::new(result) {
            Ok(prop) => pt.iter().map(|&x| prop.error(x)).collect(),
            Err(_) => Vec::new(),
        };

        let nuisance = result
            .source_names
            .iter()
            .zip(&result.nuisance)
            .zip(result.nuisance_errors())
            .map(|((name, &value), error)| NuisanceEntry {
                name: name.clone(),
                value,
                error,
            })
            .collect();

        Self {
            tool: "jesfit".to_string(),
            created: Utc::now(),
            status: result.status,
            shape: result.shape,
            shape_errors: result.shape_errors(),
            covariance: result
                .covariance
                .row_iter()
                .map(|r| r.iter().copied().collect())
                .collect(),
            nuisance,
            chi2: result.chi2.clone(),
            n_points: result.n_points,
            dof: result.dof,
            anchor: result.anchor,
            iterations: result.iterations,
            edm: result.edm.is_finite().then_some(result.edm),
            grid: CurveGrid { pt, jes, err },
            templates: templates.to_vec(),
        }
    }
}

/// `n` log-spaced momenta over `[pt_min, pt_max]`.
pub fn log_grid(pt_min: f64, pt_max: f64, n: usize) -> Vec<f64> {
    let n = n.max(2);
    let (mut lo, mut hi) = (pt_min, pt_max);
    if !(lo.is_finite() && hi.is_finite() && lo > 0.0 && hi > lo) {
        lo = 100.0;
        hi = 2000.0;
    }
    let (l0, l1) = (lo.ln(), hi.ln());
    (0..n)
        .map(|i| (l0 + (l1 - l0) * i as f64 / (n as f64 - 1.0)).exp())
        .collect()
}

pub fn write_report_json(path: &Path, report: &FitReport) -> Result<(), CalibError> {
    let file = File::create(path).map_err(|e| {
        CalibError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to create report JSON '{}': {e}", path.display()),
        ))
    })?;
    write_report(file, report)
}

pub fn write_report<W: Write>(out: W, report: &FitReport) -> Result<(), CalibError> {
    serde_json::to_writer_pretty(out, report)?;
    Ok(())
}

pub fn read_report_json(path: &Path) -> Result<FitReport, CalibError> {
    let file = File::open(path).map_err(|e| {
        CalibError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to open report JSON '{}': {e}", path.display()),
        ))
    })?;
    read_report(file)
}

pub fn read_report<R: Read>(input: R) -> Result<FitReport, CalibError> {
    Ok(serde_json::from_reader(input)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::NonConvergence;
    use nalgebra::DMatrix;

    fn result(status: FitStatus) -> FitResult {
        let mut cov = DMatrix::zeros(4, 4);
        for (i, v) in [1e-6, 4e-6, 0.04, 0.25].iter().enumerate() {
            cov[(i, i)] = *v;
        }
        FitResult {
            status,
            shape: [0.99, -0.015, 0.1],
            nuisance: vec![0.3],
            source_names: vec!["bm1_jer".to_string()],
            covariance: cov.view((0, 0), (3, 3)).into_owned(),
            full_covariance: cov,
            chi2: Chi2Breakdown::default(),
            n_points: 6,
            dof: 3,
            anchor: AnchorPoint::new(120.0, 0.982, 0.004).unwrap(),
            iterations: 12,
            edm: 1e-8,
            graphs: Vec::new(),
        }
    }

    #[test]
    fn report_survives_json() {
        let report = FitReport::from_result(&result(FitStatus::Converged), &[], 200.0, 1500.0, 11);
        assert_eq!(report.grid.pt.len(), 11);
        assert!((report.grid.pt[0] - 200.0).abs() < 1e-9);
        assert!((report.grid.pt[10] - 1500.0).abs() < 1e-9);
        assert_eq!(report.grid.err.len(), 11);
        assert_eq!(report.nuisance[0].name, "bm1_jer");
        assert!((report.nuisance[0].error - 0.5).abs() < 1e-12);

        let mut buf = Vec::new();
        write_report(&mut buf, &report).unwrap();
        let text = String::from_utf8(buf.clone()).unwrap();
        assert!(text.contains("\"state\": \"converged\""));
        let back = read_report(buf.as_slice()).unwrap();
        for k in 0..N_SHAPE {
            assert!((back.shape[k] - report.shape[k]).abs() < 1e-12);
        }
        assert_eq!(back.status, FitStatus::Converged);
    }

    #[test]
    fn non_converged_report_has_no_band() {
        let r = result(FitStatus::NotConverged(NonConvergence::IterationLimit));
        let report = FitReport::from_result(&r, &[], 200.0, 1500.0, 5);
        assert!(report.grid.err.is_empty());
        assert_eq!(report.grid.jes.len(), 5);
    }
}
