//! Domain types used throughout the calibration pipeline.
//!
//! This module defines:
//!
//! - per-channel measurement inputs (`MeasurementSet`, `ChannelMeasurements`)
//! - systematic sources and their channel applicability (`SystematicSourceLibrary`)
//! - configuration (`FitConfig`, `AnchorPoint`, `IngestWindow`)
//! - fit outputs (`FitResult`, `ChannelGraphs`, `VariationTemplate`)

pub mod channels;
pub mod measurement;
pub mod systematics;
pub mod types;

pub use channels::*;
pub use measurement::*;
pub use systematics::*;
pub use types::*;
