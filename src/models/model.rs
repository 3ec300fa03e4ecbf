//! Correction-curve evaluation.
//!
//! The global fit relies on two primitive operations:
//! - build a design row `[1, g1(pt), g2(pt)]` (the curve is linear in its
//!   parameters, which the seed projection uses)
//! - evaluate `f(pt)` for given parameters
//!
//! ```text
//! f(pt) = p0 + p1 * g1(pt) + p2 * g2(pt)
//! g1(pt) = (100/3) * (fhb(pt) - fhb(208))
//! g2(pt) =            fl1(pt) - fl1(208)
//! ```
//!
//! Both shapes vanish at 208 GeV, the momentum that minimizes the correlation
//! between `p0` and `p1`. `p0` is therefore the JES at 208 GeV.

use serde::{Deserialize, Serialize};

use crate::math::{l1_offset, single_pion_hcal};

/// Number of free shape parameters.
pub const N_SHAPE: usize = 3;

/// Momentum (GeV) at which the auxiliary shapes are anchored to zero.
pub const SHAPE_ANCHOR_PT: f64 = 208.0;

/// Scale of the single-pion term so that `p1` is of order a percent.
const SPR_SCALE: f64 = 100.0 / 3.0;

/// Fill the design row `[1, g1(pt), g2(pt)]`.
pub fn fill_design_row(pt: f64, out: &mut [f64; N_SHAPE]) {
    out[0] = 1.0;
    out[1] = SPR_SCALE * (single_pion_hcal(pt) - single_pion_hcal(SHAPE_ANCHOR_PT));
    out[2] = l1_offset(pt) - l1_offset(SHAPE_ANCHOR_PT);
}

/// Evaluate the correction curve.
///
/// # Panics
/// Panics if `params` has fewer than `N_SHAPE` entries. Trailing entries
/// (nuisance parameters in a full fit vector) are ignored.
pub fn evaluate(pt: f64, params: &[f64]) -> f64 {
    let mut row = [0.0; N_SHAPE];
    fill_design_row(pt, &mut row);
    params[0] + params[1] * row[1] + params[2] * row[2]
}

/// A correction curve with frozen parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CorrectionCurve {
    pub params: [f64; N_SHAPE],
}

impl CorrectionCurve {
    pub fn new(params: [f64; N_SHAPE]) -> Self {
        Self { params }
    }

    pub fn eval(&self, pt: f64) -> f64 {
        evaluate(pt, &self.params)
    }

    /// Self-referencing ratio `f(pt) / f(pt_ref)` compared against a
    /// channel's measured response.
    pub fn ratio(&self, pt: f64, pt_ref: f64) -> f64 {
        self.eval(pt) / self.eval(pt_ref)
    }
}

/// Momentum (GeV) the seed curve's logarithm is taken relative to.
pub const LOG_QUADRATIC_PIVOT: f64 = 100.0;

/// `c0 + c1 * ln(pt/100) + c2 * ln²(pt/100)`, the smooth curve drawn through
/// the bootstrap points.
pub fn log_quadratic(pt: f64, coeffs: &[f64]) -> f64 {
    let l = (pt.max(crate::math::PT_FLOOR) / LOG_QUADRATIC_PIVOT).ln();
    coeffs[0] + coeffs[1] * l + coeffs[2] * l * l
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluate_at_shape_anchor_is_exactly_p0() {
        for &p0 in &[0.982, 1.0, 1.0375, -3.5] {
            assert_eq!(evaluate(SHAPE_ANCHOR_PT, &[p0, 0.0, 0.0]), p0);
        }
        // The shapes vanish there, so the slope parameters drop out as well.
        let with_slopes = evaluate(SHAPE_ANCHOR_PT, &[0.99, -0.02, 0.7]);
        assert_eq!(with_slopes, 0.99);
    }

    #[test]
    fn evaluate_is_finite_over_log_spaced_range() {
        let params_grid = [
            [1.0, -0.02, 0.0],
            [0.982, -0.005, 0.0],
            [1.1, 0.5, -10.0],
            [0.0, -100.0, 100.0],
        ];
        for params in params_grid {
            for k in -300..=300 {
                let pt = 10f64.powf(k as f64 / 10.0);
                let v = evaluate(pt, &params);
                assert!(v.is_finite(), "f({pt}) with {params:?} = {v}");
            }
        }
    }

    #[test]
    fn slope_term_follows_single_pion_response() {
        // The HCAL response rises with pt, so a negative p1 lowers high-pt JES.
        let curve = CorrectionCurve::new([1.0, -0.02, 0.0]);
        assert!(curve.eval(1000.0) < 1.0);
        assert!(curve.eval(100.0) > 1.0);
        assert!(curve.ratio(1000.0, 400.0) < 1.0);
    }

    #[test]
    fn log_quadratic_pivot() {
        assert_eq!(log_quadratic(100.0, &[0.98, 0.3, 0.1]), 0.98);
    }
}
