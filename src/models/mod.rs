//! Correction-curve family.
//!
//! Curves are implemented as small, pure functions so that the fit objective
//! and the uncertainty propagation can stay generic over parameter vectors.

pub mod model;

pub use model::*;
