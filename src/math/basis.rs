//! Auxiliary response shapes composed by the correction curve.
//!
//! Both are empirical parameterizations with separately calibrated constants:
//!
//! - `single_pion_hcal(x) = max(0, a + b * x^c)`: HCAL single-pion response
//! - `l1_offset(x) = 1 + (d + e * ln x) / x`: residual pile-up offset
//!
//! Numerical notes:
//! - Inputs are clamped to `PT_FLOOR` so `ln x / x` and `x^c` stay finite for
//!   any positive input, including subnormals.
//! - `single_pion_hcal` carries its own floor at zero.

/// Smallest momentum (GeV) the shapes are evaluated at.
pub const PT_FLOOR: f64 = 1.0;

const SPRH_A: f64 = 1.03091;
const SPRH_B: f64 = -5.11540e-02;
const SPRH_C: f64 = -1.54227e-01;

const L1_D: f64 = -2.36997;
const L1_E: f64 = 0.413917;

pub fn single_pion_hcal(pt: f64) -> f64 {
    let x = pt.max(PT_FLOOR);
    (SPRH_A + SPRH_B * x.powf(SPRH_C)).max(0.0)
}

pub fn l1_offset(pt: f64) -> f64 {
    let x = pt.max(PT_FLOOR);
    1.0 + (L1_D + L1_E * x.ln()) / x
}
