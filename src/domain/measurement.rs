//! Per-channel measurement inputs and their validation.
//!
//! A channel carries two aligned sequences:
//!
//! - the measured response ratio (data/MC) at recoil momentum `x`
//! - the reference fraction mapping that recoil momentum onto the reference
//!   momentum `x * fraction`
//!
//! The alignment is by index and is a hard precondition. Ingestion:
//!
//! 1. rejects sequences of different length
//! 2. sorts both sequences by recoil momentum (once) and rejects reference
//!    fractions that fall out of step with that order
//! 3. builds a filtered copy with invalid points and points outside the
//!    ingestion window removed (counts are logged, not individual points)

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::domain::channels::MAX_CHANNELS;
use crate::domain::types::IngestWindow;
use crate::error::CalibError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeasurementPoint {
    /// Recoil momentum (GeV).
    pub x: f64,
    /// Response ratio.
    pub y: f64,
    pub y_err: f64,
}

impl MeasurementPoint {
    pub fn new(x: f64, y: f64, y_err: f64) -> Self {
        Self { x, y, y_err }
    }

    /// Zero or negative errors and non-positive values mark empty bins.
    pub fn is_valid(&self) -> bool {
        self.x.is_finite()
            && self.x > 0.0
            && self.y.is_finite()
            && self.y > 0.0
            && self.y_err.is_finite()
            && self.y_err > 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReferenceFractionPoint {
    /// Recoil momentum (GeV).
    pub x: f64,
    /// Fraction of the recoil momentum carried by the reference.
    pub y: f64,
}

impl ReferenceFractionPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn is_valid(&self) -> bool {
        self.y.is_finite() && self.y > 0.0
    }
}

/// Raw channel input, as handed over by the measurement store.
#[derive(Debug, Clone)]
pub struct ChannelInput {
    pub name: String,
    pub measurements: Vec<MeasurementPoint>,
    pub fractions: Vec<ReferenceFractionPoint>,
}

impl ChannelInput {
    pub fn new(
        name: impl Into<String>,
        measurements: Vec<MeasurementPoint>,
        fractions: Vec<ReferenceFractionPoint>,
    ) -> Self {
        Self {
            name: name.into(),
            measurements,
            fractions,
        }
    }
}

/// What ingestion did to one channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestCounts {
    pub read: usize,
    pub invalid: usize,
    pub outside_window: usize,
    pub used: usize,
}

/// A validated, sorted, filtered channel.
#[derive(Debug, Clone)]
pub struct ChannelMeasurements {
    name: String,
    points: Vec<MeasurementPoint>,
    fractions: Vec<ReferenceFractionPoint>,
    counts: IngestCounts,
}

impl ChannelMeasurements {
    fn ingest(input: ChannelInput, window: &IngestWindow) -> Result<Self, CalibError> {
        let ChannelInput {
            name,
            measurements,
            fractions,
        } = input;

        if measurements.len() != fractions.len() {
            return Err(CalibError::shape_mismatch(
                &name,
                format!(
                    "{} measurement points but {} reference-fraction points",
                    measurements.len(),
                    fractions.len()
                ),
            ));
        }

        let mut order: Vec<usize> = (0..measurements.len()).collect();
        order.sort_by(|&a, &b| measurements[a].x.total_cmp(&measurements[b].x));

        for pair in order.windows(2) {
            let (prev, next) = (&fractions[pair[0]], &fractions[pair[1]]);
            if next.x < prev.x {
                return Err(CalibError::shape_mismatch(
                    &name,
                    format!(
                        "reference-fraction point at {:.1} GeV is out of order with the measurement at {:.1} GeV",
                        next.x, measurements[pair[1]].x
                    ),
                ));
            }
        }

        let mut counts = IngestCounts {
            read: measurements.len(),
            ..IngestCounts::default()
        };
        let mut points = Vec::with_capacity(measurements.len());
        let mut kept_fractions = Vec::with_capacity(measurements.len());

        for idx in order {
            let m = measurements[idx];
            let f = fractions[idx];
            if !(m.is_valid() && f.is_valid()) {
                counts.invalid += 1;
                continue;
            }
            if !window.contains(m.x) {
                counts.outside_window += 1;
                continue;
            }
            points.push(m);
            kept_fractions.push(f);
        }
        counts.used = points.len();

        info!(
            "channel '{}': read {} points, dropped {} invalid and {} outside [{}, {}] GeV, kept {}",
            name, counts.read, counts.invalid, counts.outside_window, window.pt_min, window.pt_max, counts.used
        );
        if counts.used == 0 {
            warn!("channel '{}' has no usable points", name);
        }

        Ok(Self {
            name,
            points,
            fractions: kept_fractions,
            counts,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn points(&self) -> &[MeasurementPoint] {
        &self.points
    }

    pub fn fractions(&self) -> &[ReferenceFractionPoint] {
        &self.fractions
    }

    pub fn counts(&self) -> &IngestCounts {
        &self.counts
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Reference momentum of point `i`: `recoil * fraction`.
    pub fn reference_pt(&self, i: usize) -> f64 {
        self.points[i].x * self.fractions[i].y
    }
}

/// All channels entering one calibration fit. Channel indices are stable and
/// are what systematic-source channel sets refer to.
#[derive(Debug, Clone)]
pub struct MeasurementSet {
    channels: Vec<ChannelMeasurements>,
}

impl MeasurementSet {
    pub fn new(inputs: Vec<ChannelInput>, window: &IngestWindow) -> Result<Self, CalibError> {
        if inputs.len() > MAX_CHANNELS {
            return Err(CalibError::TooManyChannels(inputs.len()));
        }
        window.validate()?;

        let channels = inputs
            .into_iter()
            .map(|input| ChannelMeasurements::ingest(input, window))
            .collect::<Result<Vec<_>, _>>()?;

        let set = Self { channels };
        if set.n_points() == 0 {
            return Err(CalibError::EmptyInput(
                "no valid measurement points in any channel".to_string(),
            ));
        }
        Ok(set)
    }

    pub fn channels(&self) -> &[ChannelMeasurements] {
        &self.channels
    }

    pub fn channel(&self, index: usize) -> Option<&ChannelMeasurements> {
        self.channels.get(index)
    }

    pub fn channel_index(&self, name: &str) -> Option<usize> {
        self.channels.iter().position(|c| c.name == name)
    }

    pub fn n_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn n_points(&self) -> usize {
        self.channels.iter().map(|c| c.len()).sum()
    }

    /// Reference momentum of the first point of the first non-empty channel.
    ///
    /// This is where the absolute-scale anchor sits when no explicit anchor
    /// momentum is configured.
    pub fn first_reference_pt(&self) -> Option<f64> {
        self.channels
            .iter()
            .find(|c| !c.is_empty())
            .map(|c| c.reference_pt(0))
    }
}
