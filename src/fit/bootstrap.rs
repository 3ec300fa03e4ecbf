//! Step-by-step extrapolation of the absolute scale from an anchor.
//!
//! Walking one channel in increasing recoil momentum:
//!
//! - the first point is the anchor itself, placed at the reference momentum
//!   of the first measurement
//! - for every measurement, the JES at its reference momentum is read off a
//!   local weighted fit `a + b ln(pt/pt_ref)` through the points inferred so
//!   far, then multiplied by the measured ratio to give the JES at the recoil
//!   momentum
//!
//! A log-quadratic curve through the inferred points serves as a smooth
//! summary and as the starting guess for the global fit. The local fit is
//! linear while the summary is quadratic; the seed is only a starting point,
//! so the mismatch is accepted.

use log::{debug, info, warn};
use nalgebra::DMatrix;

use crate::domain::{ChannelMeasurements, MeasurementPoint, ReferenceFractionPoint};
use crate::error::CalibError;
use crate::math::{PT_FLOOR, weighted_fit};
use crate::models::{LOG_QUADRATIC_PIVOT, N_SHAPE, fill_design_row, log_quadratic};

/// Smooth curve through the inferred points.
#[derive(Debug, Clone)]
pub struct SeedCurve {
    /// `c0 + c1 ln(pt/100) + c2 ln²(pt/100)`; trailing terms are zero when
    /// there were too few points to fit them.
    pub coeffs: [f64; 3],
    /// 3×3; rows and columns of unfitted terms are zero.
    pub covariance: DMatrix<f64>,
    pub chi2: f64,
    pub ndf: i64,
}

impl SeedCurve {
    pub fn eval(&self, pt: f64) -> f64 {
        log_quadratic(pt, &self.coeffs)
    }
}

#[derive(Debug, Clone)]
pub struct SeedResult {
    pub channel: String,
    /// Anchor first, then the inferred JES at each recoil momentum.
    pub inferred: Vec<MeasurementPoint>,
    /// Interpolated JES at each reference momentum.
    pub interpolated: Vec<MeasurementPoint>,
    pub curve: SeedCurve,
}

impl SeedResult {
    /// Project the seed curve onto the correction-curve family, sampled at
    /// the inferred momenta. Only `p0` and `p1` are projected; `p2` starts
    /// at zero.
    pub fn initial_shape(&self) -> Option<[f64; N_SHAPE]> {
        if self.inferred.len() < 2 {
            return None;
        }
        let n = self.inferred.len();
        let mut design = DMatrix::<f64>::zeros(n, 2);
        let mut y = Vec::with_capacity(n);
        let mut row = [0.0; N_SHAPE];
        for (i, p) in self.inferred.iter().enumerate() {
            fill_design_row(p.x, &mut row);
            design[(i, 0)] = row[0];
            design[(i, 1)] = row[1];
            y.push(self.curve.eval(p.x));
        }
        let fit = weighted_fit(&design, &y, &vec![1.0; n])?;
        Some([fit.beta[0], fit.beta[1], 0.0])
    }
}

/// Extrapolates the anchor across one channel.
#[derive(Debug, Clone, Copy)]
pub struct BootstrapSeeder {
    anchor_jes: f64,
    anchor_err: f64,
}

impl BootstrapSeeder {
    pub fn new(anchor_jes: f64, anchor_err: f64) -> Result<Self, CalibError> {
        if !anchor_jes.is_finite() || !(anchor_err.is_finite() && anchor_err > 0.0) {
            return Err(CalibError::InvalidConfig(format!(
                "invalid seed anchor {anchor_jes} ± {anchor_err}"
            )));
        }
        Ok(Self {
            anchor_jes,
            anchor_err,
        })
    }

    pub fn run_channel(&self, channel: &ChannelMeasurements) -> Result<SeedResult, CalibError> {
        self.run(channel.name(), channel.points(), channel.fractions())
    }

    /// Run over raw, possibly unsorted points. Points with a non-positive
    /// response (empty bins) or an invalid fraction are skipped.
    pub fn run(
        &self,
        channel: &str,
        points: &[MeasurementPoint],
        fractions: &[ReferenceFractionPoint],
    ) -> Result<SeedResult, CalibError> {
        if points.len() != fractions.len() {
            return Err(CalibError::shape_mismatch(
                channel,
                format!(
                    "{} measurement points but {} reference-fraction points",
                    points.len(),
                    fractions.len()
                ),
            ));
        }

        let mut order: Vec<usize> = (0..points.len())
            .filter(|&i| points[i].is_valid() && fractions[i].is_valid())
            .collect();
        if order.is_empty() {
            return Err(CalibError::EmptyInput(format!(
                "channel '{channel}' has no usable points to seed from"
            )));
        }
        order.sort_by(|&a, &b| points[a].x.total_cmp(&points[b].x));

        let mut inferred: Vec<MeasurementPoint> = Vec::with_capacity(order.len() + 1);
        let mut interpolated = Vec::with_capacity(order.len());

        for &i in &order {
            let m = points[i];
            let pt_ref = m.x * fractions[i].y;

            let (jes_ref, jes_ref_err) = if inferred.is_empty() {
                inferred.push(MeasurementPoint::new(pt_ref, self.anchor_jes, self.anchor_err));
                (self.anchor_jes, self.anchor_err)
            } else {
                local_reference(&inferred, pt_ref, m.y_err)
            };

            let jes = jes_ref * m.y;
            let err = ((m.y * jes_ref_err).powi(2) + (jes_ref * m.y_err).powi(2)).sqrt();
            debug!(
                "{channel}: pt_ref = {pt_ref:.1}, jes_ref = {jes_ref:.5} ± {jes_ref_err:.5}, jes({:.1}) = {jes:.5} ± {err:.5}",
                m.x
            );
            interpolated.push(MeasurementPoint::new(pt_ref, jes_ref, jes_ref_err));
            inferred.push(MeasurementPoint::new(m.x, jes, err));
        }

        let curve = fit_seed_curve(&inferred);
        info!(
            "seeded {} points from channel '{}': c = [{:.5}, {:.5}, {:.5}], chi2 = {:.2} / {}",
            inferred.len() - 1,
            channel,
            curve.coeffs[0],
            curve.coeffs[1],
            curve.coeffs[2],
            curve.chi2,
            curve.ndf
        );

        Ok(SeedResult {
            channel: channel.to_string(),
            inferred,
            interpolated,
            curve,
        })
    }
}

/// JES at `pt_ref` from a local `a + b ln(x/pt_ref)` fit through `known`.
///
/// The intercept is the value at `pt_ref`. With fewer points than parameters
/// the slope is dropped; if nothing can be fitted the last known point is
/// carried over.
fn local_reference(known: &[MeasurementPoint], pt_ref: f64, fallback_err: f64) -> (f64, f64) {
    let n = known.len();
    let y: Vec<f64> = known.iter().map(|p| p.y).collect();
    let w: Vec<f64> = known.iter().map(|p| 1.0 / (p.y_err * p.y_err)).collect();

    let n_params = if n >= 2 { 2 } else { 1 };
    let design = DMatrix::from_fn(n, n_params, |i, j| {
        if j == 0 {
            1.0
        } else {
            (known[i].x.max(PT_FLOOR) / pt_ref).ln()
        }
    });

    match weighted_fit(&design, &y, &w) {
        Some(fit) => {
            let err = if fit.ndf >= 0 {
                fit.covariance[(0, 0)].max(0.0).sqrt()
            } else {
                fallback_err
            };
            (fit.beta[0], err)
        }
        None => {
            warn!("local fit at {pt_ref:.1} GeV failed; carrying the last inferred point");
            let last = known[n - 1];
            (last.y, last.y_err)
        }
    }
}

/// Weighted log-quadratic through the inferred points, dropping terms when
/// there are too few points.
fn fit_seed_curve(points: &[MeasurementPoint]) -> SeedCurve {
    let n = points.len();
    let y: Vec<f64> = points.iter().map(|p| p.y).collect();
    let w: Vec<f64> = points.iter().map(|p| 1.0 / (p.y_err * p.y_err)).collect();

    for order in (1..=n.min(3)).rev() {
        let design = DMatrix::from_fn(n, order, |i, j| {
            let l = (points[i].x.max(PT_FLOOR) / LOG_QUADRATIC_PIVOT).ln();
            l.powi(j as i32)
        });
        if let Some(fit) = weighted_fit(&design, &y, &w) {
            let mut coeffs = [0.0; 3];
            let mut covariance = DMatrix::zeros(3, 3);
            for a in 0..order {
                coeffs[a] = fit.beta[a];
                for b in 0..order {
                    covariance[(a, b)] = fit.covariance[(a, b)];
                }
            }
            return SeedCurve {
                coeffs,
                covariance,
                chi2: fit.chi2,
                ndf: fit.ndf,
            };
        }
    }

    // Unreachable with positive weights; keep the anchor value as a constant.
    SeedCurve {
        coeffs: [points[0].y, 0.0, 0.0],
        covariance: DMatrix::zeros(3, 3),
        chi2: 0.0,
        ndf: n as i64 - 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CorrectionCurve;

    fn channel(
        truth: &CorrectionCurve,
        pts: &[f64],
        frac: f64,
    ) -> (Vec<MeasurementPoint>, Vec<ReferenceFractionPoint>) {
        let m = pts
            .iter()
            .map(|&pt| MeasurementPoint::new(pt, truth.ratio(pt, frac * pt), 0.003))
            .collect();
        let f = pts.iter().map(|&pt| ReferenceFractionPoint::new(pt, frac)).collect();
        (m, f)
    }

    #[test]
    fn first_point_is_the_anchor() {
        let truth = CorrectionCurve::new([1.0, -0.02, 0.0]);
        let (m, f) = channel(&truth, &[300.0, 400.0, 550.0, 700.0, 900.0], 0.6);
        let seeder = BootstrapSeeder::new(0.982, 0.004).unwrap();
        let seed = seeder.run("mjb", &m, &f).unwrap();

        let first = seed.inferred[0];
        assert_eq!(first.x, 300.0 * 0.6);
        assert_eq!(first.y, 0.982);
        assert_eq!(first.y_err, 0.004);
        assert_eq!(seed.inferred.len(), 6);
        assert_eq!(seed.interpolated.len(), 5);
        // The first reference JES is the anchor, so the first inferred JES is
        // the anchor times the first ratio.
        assert!((seed.inferred[1].y - 0.982 * m[0].y).abs() < 1e-12);
    }

    #[test]
    fn skips_empty_bins_and_sorts() {
        let truth = CorrectionCurve::new([1.0, -0.02, 0.0]);
        let (mut m, mut f) = channel(&truth, &[300.0, 400.0, 550.0, 700.0], 0.6);
        m[2].y = 0.0;
        m.reverse();
        f.reverse();
        let seeder = BootstrapSeeder::new(1.0, 0.004).unwrap();
        let seed = seeder.run("mjb", &m, &f).unwrap();

        assert_eq!(seed.inferred.len(), 4);
        let expected = [180.0, 300.0, 400.0, 700.0];
        for (p, x) in seed.inferred.iter().zip(expected) {
            assert!((p.x - x).abs() < 1e-9);
        }
    }

    #[test]
    fn tracks_a_known_curve() {
        // Anchored at the truth, noiseless ratios reproduce the truth closely.
        let truth = CorrectionCurve::new([1.0, -0.02, 0.0]);
        let frac = 0.7;
        let pts: Vec<f64> = (0..10).map(|i| 300.0 * 1.15f64.powi(i)).collect();
        let (m, f) = channel(&truth, &pts, frac);
        let seeder = BootstrapSeeder::new(truth.eval(pts[0] * frac), 0.004).unwrap();
        let seed = seeder.run("mjb", &m, &f).unwrap();

        for p in &seed.inferred {
            assert!((p.y - truth.eval(p.x)).abs() < 2e-3, "{p:?}");
        }
        for p in &seed.inferred {
            assert!((seed.curve.eval(p.x) - truth.eval(p.x)).abs() < 2e-3);
        }

        let shape = seed.initial_shape().unwrap();
        assert!((shape[0] - 1.0).abs() < 5e-3);
        assert!(shape[1] < 0.0);
        assert_eq!(shape[2], 0.0);
    }

    #[test]
    fn rejects_mismatched_and_empty_input() {
        let seeder = BootstrapSeeder::new(0.982, 0.004).unwrap();
        let m = vec![MeasurementPoint::new(300.0, 1.0, 0.01)];
        assert!(matches!(
            seeder.run("mjb", &m, &[]),
            Err(CalibError::InputShapeMismatch { .. })
        ));

        let empty = vec![MeasurementPoint::new(300.0, 0.0, 0.01)];
        let f = vec![ReferenceFractionPoint::new(300.0, 0.5)];
        assert!(matches!(
            seeder.run("mjb", &empty, &f),
            Err(CalibError::EmptyInput(_))
        ));
    }

    #[test]
    fn two_point_seed_drops_quadratic_term() {
        let seeder = BootstrapSeeder::new(0.982, 0.004).unwrap();
        let m = vec![MeasurementPoint::new(300.0, 1.0, 0.01)];
        let f = vec![ReferenceFractionPoint::new(300.0, 0.5)];
        let seed = seeder.run("mjb", &m, &f).unwrap();
        // Two points: anchor and one inferred, so a straight line in ln(pt).
        assert_eq!(seed.curve.coeffs[2], 0.0);
        assert_eq!(seed.curve.ndf, 0);
    }
}
