//! Input/output helpers.
//!
//! - CSV ingest of measurement and source tables (`ingest`)
//! - CSV exports of templates, graphs and bands (`export`)
//! - fit-report JSON read/write (`curve`)

pub mod curve;
pub mod export;
pub mod ingest;

pub use curve::*;
pub use export::*;
pub use ingest::*;
