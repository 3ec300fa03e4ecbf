//! Systematic-uncertainty sources.
//!
//! Each source is a signed step function over a fixed momentum binning plus the
//! set of channels it shifts. In the global fit every source gets one nuisance
//! parameter `ν_s`, and the data of an affected channel is shifted by
//! `ν_s * shape_s(pt)`.

use log::warn;
use serde::{Deserialize, Serialize};

use crate::domain::channels::ChannelSet;
use crate::error::CalibError;

/// Default momentum binning (GeV) for source shapes and variation templates.
pub const DEFAULT_PT_BINS: [f64; 14] = [
    200.0, 250.0, 300.0, 360.0, 400.0, 450.0, 500.0, 550.0, 600.0, 700.0, 800.0, 1000.0, 1200.0,
    1500.0,
];

/// Strictly increasing bin edges. Bin `i` covers `[edges[i], edges[i + 1])`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binning {
    edges: Vec<f64>,
}

impl Binning {
    pub fn new(edges: Vec<f64>) -> Result<Self, CalibError> {
        if edges.len() < 2 {
            return Err(CalibError::InvalidBinning(format!(
                "need at least two edges, got {}",
                edges.len()
            )));
        }
        if edges.iter().any(|e| !e.is_finite()) {
            return Err(CalibError::InvalidBinning("non-finite bin edge".to_string()));
        }
        if edges.windows(2).any(|w| w[1] <= w[0]) {
            return Err(CalibError::InvalidBinning(
                "bin edges must be strictly increasing".to_string(),
            ));
        }
        Ok(Self { edges })
    }

    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    pub fn n_bins(&self) -> usize {
        self.edges.len() - 1
    }

    /// Bin containing `x`, or `None` for underflow/overflow.
    pub fn find_bin(&self, x: f64) -> Option<usize> {
        if !(x >= self.edges[0] && x < self.edges[self.edges.len() - 1]) {
            return None;
        }
        Some(self.edges.partition_point(|&e| e <= x) - 1)
    }

    pub fn bin_bounds(&self, bin: usize) -> (f64, f64) {
        (self.edges[bin], self.edges[bin + 1])
    }

    /// Geometric centre of a bin (momentum spectra are close to log-uniform).
    pub fn log_center(&self, bin: usize) -> f64 {
        let (lo, hi) = self.bin_bounds(bin);
        (lo * hi).sqrt()
    }
}

impl Default for Binning {
    fn default() -> Self {
        Self {
            edges: DEFAULT_PT_BINS.to_vec(),
        }
    }
}

/// Histogram-like step function. Outside the binning it evaluates to zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepFunction {
    binning: Binning,
    values: Vec<f64>,
}

impl StepFunction {
    pub fn new(binning: Binning, values: Vec<f64>) -> Result<Self, CalibError> {
        if values.len() != binning.n_bins() {
            return Err(CalibError::InvalidBinning(format!(
                "{} values for {} bins",
                values.len(),
                binning.n_bins()
            )));
        }
        Ok(Self { binning, values })
    }

    /// Fill a step function from scattered `(pt, value)` points: each point
    /// sets the content of the bin it falls into, later points win. Points
    /// outside the binning are ignored.
    pub fn from_points(binning: Binning, points: &[(f64, f64)]) -> Self {
        let mut values = vec![0.0; binning.n_bins()];
        for &(x, y) in points {
            if let Some(bin) = binning.find_bin(x) {
                values[bin] = y;
            }
        }
        Self { binning, values }
    }

    pub fn at(&self, x: f64) -> f64 {
        self.binning.find_bin(x).map_or(0.0, |bin| self.values[bin])
    }

    pub fn binning(&self) -> &Binning {
        &self.binning
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystematicSource {
    name: String,
    channels: ChannelSet,
    shape: StepFunction,
}

impl SystematicSource {
    pub fn new(
        name: impl Into<String>,
        channels: ChannelSet,
        shape: StepFunction,
    ) -> Result<Self, CalibError> {
        let name = name.into();
        if channels.is_empty() {
            return Err(CalibError::DegenerateSource(name));
        }
        Ok(Self {
            name,
            channels,
            shape,
        })
    }

    /// Build from a tagged name `bm<mask>_<label>` as written by the
    /// measurement store.
    pub fn from_tagged(name: &str, shape: StepFunction) -> Result<Self, CalibError> {
        let (channels, _) = ChannelSet::parse_tagged(name).ok_or_else(|| {
            CalibError::InvalidConfig(format!(
                "source name '{name}' is not of the form bm<mask>_<label>"
            ))
        })?;
        Self::new(name, channels, shape)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn channels(&self) -> &ChannelSet {
        &self.channels
    }

    pub fn applies_to(&self, channel: usize) -> bool {
        self.channels.contains(channel)
    }

    pub fn shape(&self) -> &StepFunction {
        &self.shape
    }

    pub fn at(&self, pt: f64) -> f64 {
        self.shape.at(pt)
    }
}

/// All sources entering one fit, validated against the channel count.
#[derive(Debug, Clone, Default)]
pub struct SystematicSourceLibrary {
    sources: Vec<SystematicSource>,
}

impl SystematicSourceLibrary {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Validate `sources` against a measurement set with `n_channels` channels.
    ///
    /// A source that selects none of those channels would be an unidentifiable
    /// nuisance parameter and is rejected.
    pub fn new(sources: Vec<SystematicSource>, n_channels: usize) -> Result<Self, CalibError> {
        for src in &sources {
            let in_range = src.channels.iter().filter(|&c| c < n_channels).count();
            if in_range == 0 {
                return Err(CalibError::DegenerateSource(src.name.clone()));
            }
            if in_range < src.channels.len() {
                warn!(
                    "source '{}' selects channels beyond the {} available; those bits are ignored",
                    src.name, n_channels
                );
            }
        }
        Ok(Self { sources })
    }

    pub fn sources(&self) -> &[SystematicSource] {
        &self.sources
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.name.clone()).collect()
    }

    /// Total data shift on `channel` at `pt` for the given nuisance values.
    pub fn shift(&self, channel: usize, pt: f64, nuisance: &[f64]) -> f64 {
        self.sources
            .iter()
            .zip(nuisance)
            .filter(|(src, _)| src.applies_to(channel))
            .map(|(src, &nu)| nu * src.at(pt))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_bin_uses_half_open_bins() {
        let b = Binning::default();
        assert_eq!(b.find_bin(199.9), None);
        assert_eq!(b.find_bin(200.0), Some(0));
        assert_eq!(b.find_bin(249.999), Some(0));
        assert_eq!(b.find_bin(250.0), Some(1));
        assert_eq!(b.find_bin(1499.0), Some(12));
        assert_eq!(b.find_bin(1500.0), None);
    }

    #[test]
    fn binning_rejects_unsorted_edges() {
        assert!(Binning::new(vec![100.0, 100.0, 200.0]).is_err());
        assert!(Binning::new(vec![100.0]).is_err());
    }

    #[test]
    fn step_function_from_points() {
        let b = Binning::new(vec![100.0, 200.0, 400.0]).unwrap();
        let s = StepFunction::from_points(b, &[(150.0, 0.01), (300.0, -0.02), (900.0, 5.0)]);
        assert_eq!(s.values(), &[0.01, -0.02]);
        assert_eq!(s.at(120.0), 0.01);
        assert_eq!(s.at(50.0), 0.0);
        assert_eq!(s.at(900.0), 0.0);
    }

    #[test]
    fn zero_bitmask_is_degenerate() {
        let shape = StepFunction::from_points(Binning::default(), &[]);
        let err = SystematicSource::new("bm0_jec", ChannelSet::from_bits(0), shape.clone()).unwrap_err();
        assert!(matches!(err, CalibError::DegenerateSource(_)));

        let err = SystematicSource::from_tagged("bm0_ptchs_multijet_src0", shape).unwrap_err();
        assert!(matches!(err, CalibError::DegenerateSource(_)));
    }

    #[test]
    fn library_rejects_source_outside_channel_range() {
        let shape = StepFunction::from_points(Binning::default(), &[]);
        let src = SystematicSource::new("bm4_pu", ChannelSet::from_bits(4), shape).unwrap();
        let err = SystematicSourceLibrary::new(vec![src], 2).unwrap_err();
        assert!(matches!(err, CalibError::DegenerateSource(_)));
    }

    #[test]
    fn shift_respects_channel_sets() {
        let b = Binning::new(vec![100.0, 1000.0]).unwrap();
        let a = SystematicSource::new(
            "bm1_a",
            ChannelSet::from_bits(1),
            StepFunction::new(b.clone(), vec![0.02]).unwrap(),
        )
        .unwrap();
        let c = SystematicSource::new(
            "bm3_c",
            ChannelSet::from_bits(3),
            StepFunction::new(b, vec![0.01]).unwrap(),
        )
        .unwrap();
        let lib = SystematicSourceLibrary::new(vec![a, c], 2).unwrap();
        let nu = [0.5, -1.0];
        assert!((lib.shift(0, 300.0, &nu) - (0.01 - 0.01)).abs() < 1e-15);
        assert!((lib.shift(1, 300.0, &nu) + 0.01).abs() < 1e-15);
    }
}
