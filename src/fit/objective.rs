//! Global chi-square objective.
//!
//! For a trial vector `par = [p0, p1, p2, ν_0, …, ν_{S-1}]`:
//!
//! ```text
//! chi2 = Σ_c Σ_i ((data + Σ_{s ∋ c} ν_s shape_s(pt)) - f(pt)/f(frac·pt))² / err²
//!      + Σ_s ν_s²
//!      + ((jes_anchor - f(pt_anchor)) / err_anchor)²
//! ```
//!
//! Every term is a residual, so the objective is exposed as a residual vector
//! (data points channel-major, then one pull per source, then the anchor).
//! The context only borrows immutable inputs; each minimization owns its own
//! parameter buffers.

use crate::domain::{
    AnchorPoint, ChannelGraphs, Chi2Breakdown, MeasurementPoint, MeasurementSet,
    SystematicSourceLibrary,
};
use crate::error::CalibError;
use crate::models::{N_SHAPE, evaluate};

/// A least-squares problem: parameters in, residuals out.
pub trait Residuals {
    fn n_params(&self) -> usize;
    fn n_residuals(&self) -> usize;
    /// Fill `out` (length `n_residuals()`) with the residuals at `par`.
    fn residuals_into(&self, par: &[f64], out: &mut [f64]);
}

/// Everything the objective needs for one data point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointTerms {
    pub pt_recoil: f64,
    pub pt_ref: f64,
    pub data: f64,
    pub err: f64,
    pub jes: f64,
    pub jes_ref: f64,
    pub shift: f64,
}

impl PointTerms {
    /// `f(pt) / f(pt_ref)`, the prediction for the measured response.
    pub fn fit_value(&self) -> f64 {
        self.jes / self.jes_ref
    }

    pub fn residual(&self) -> f64 {
        (self.data + self.shift - self.fit_value()) / self.err
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FitContext<'a> {
    set: &'a MeasurementSet,
    sources: &'a SystematicSourceLibrary,
    anchor: AnchorPoint,
}

impl<'a> FitContext<'a> {
    pub fn new(
        set: &'a MeasurementSet,
        sources: &'a SystematicSourceLibrary,
        anchor: AnchorPoint,
    ) -> Result<Self, CalibError> {
        for src in sources.sources() {
            if !src.channels().iter().any(|c| c < set.n_channels()) {
                return Err(CalibError::DegenerateSource(src.name().to_string()));
            }
        }
        Ok(Self {
            set,
            sources,
            anchor,
        })
    }

    pub fn set(&self) -> &'a MeasurementSet {
        self.set
    }

    pub fn sources(&self) -> &'a SystematicSourceLibrary {
        self.sources
    }

    pub fn anchor(&self) -> AnchorPoint {
        self.anchor
    }

    pub fn n_sources(&self) -> usize {
        self.sources.len()
    }

    pub fn n_points(&self) -> usize {
        self.set.n_points()
    }

    pub fn point_terms(&self, channel: usize, i: usize, par: &[f64]) -> PointTerms {
        let ch = &self.set.channels()[channel];
        let p = ch.points()[i];
        let pt_ref = ch.reference_pt(i);
        PointTerms {
            pt_recoil: p.x,
            pt_ref,
            data: p.y,
            err: p.y_err,
            jes: evaluate(p.x, par),
            jes_ref: evaluate(pt_ref, par),
            shift: self.sources.shift(channel, p.x, &par[N_SHAPE..]),
        }
    }

    pub fn anchor_residual(&self, par: &[f64]) -> f64 {
        (self.anchor.jes - evaluate(self.anchor.pt, par)) / self.anchor.err
    }

    pub fn residuals(&self, par: &[f64]) -> Vec<f64> {
        let mut out = vec![0.0; self.n_residuals()];
        self.residuals_into(par, &mut out);
        out
    }

    pub fn chi2(&self, par: &[f64]) -> f64 {
        self.residuals(par).iter().map(|r| r * r).sum()
    }

    pub fn breakdown(&self, par: &[f64]) -> Chi2Breakdown {
        let per_channel: Vec<f64> = (0..self.set.n_channels())
            .map(|c| {
                (0..self.set.channels()[c].len())
                    .map(|i| self.point_terms(c, i, par).residual().powi(2))
                    .sum()
            })
            .collect();
        let per_source: Vec<f64> = par[N_SHAPE..].iter().map(|nu| nu * nu).collect();
        let data: f64 = per_channel.iter().sum();
        let sources: f64 = per_source.iter().sum();
        let anchor = self.anchor_residual(par).powi(2);

        Chi2Breakdown {
            total: data + sources + anchor,
            data,
            sources,
            anchor,
            per_channel,
            per_source,
        }
    }

    /// Shifted data and reference points at `par`.
    ///
    /// The shifted data point is `(data + shift) * jesref` at the recoil
    /// momentum, i.e. the inferred absolute JES; its error is the statistical
    /// error on the same scale. Reference points carry the anchor uncertainty
    /// until a propagated envelope replaces it.
    pub fn derived_graphs(&self, par: &[f64]) -> Vec<ChannelGraphs> {
        self.set
            .channels()
            .iter()
            .enumerate()
            .map(|(c, ch)| {
                let mut shifted = Vec::with_capacity(ch.len());
                let mut reference = Vec::with_capacity(ch.len());
                for i in 0..ch.len() {
                    let t = self.point_terms(c, i, par);
                    shifted.push(MeasurementPoint::new(
                        t.pt_recoil,
                        (t.data + t.shift) * t.jes_ref,
                        t.err * t.jes_ref,
                    ));
                    reference.push(MeasurementPoint::new(t.pt_ref, t.jes_ref, self.anchor.err));
                }
                ChannelGraphs {
                    channel: ch.name().to_string(),
                    shifted,
                    reference,
                }
            })
            .collect()
    }
}

impl Residuals for FitContext<'_> {
    fn n_params(&self) -> usize {
        N_SHAPE + self.sources.len()
    }

    fn n_residuals(&self) -> usize {
        self.set.n_points() + self.sources.len() + 1
    }

    fn residuals_into(&self, par: &[f64], out: &mut [f64]) {
        let mut k = 0;
        for (c, ch) in self.set.channels().iter().enumerate() {
            for i in 0..ch.len() {
                out[k] = self.point_terms(c, i, par).residual();
                k += 1;
            }
        }
        for &nu in &par[N_SHAPE..] {
            out[k] = nu;
            k += 1;
        }
        out[k] = self.anchor_residual(par);
    }
}
