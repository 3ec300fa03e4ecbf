//! Channel applicability sets.
//!
//! Systematic sources are tagged with an integer bitmask where bit `i` means
//! "applies to channel `i`". Inside the crate we carry an explicit set of
//! channel indices and only convert to/from the bit encoding when reading or
//! writing tagged names (`bm<mask>_<label>`).

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::CalibError;

/// Largest number of channels a bitmask can address.
pub const MAX_CHANNELS: usize = 32;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSet(BTreeSet<usize>);

impl ChannelSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_indices(indices: impl IntoIterator<Item = usize>) -> Result<Self, CalibError> {
        let mut set = BTreeSet::new();
        for idx in indices {
            if idx >= MAX_CHANNELS {
                return Err(CalibError::TooManyChannels(idx));
            }
            set.insert(idx);
        }
        Ok(Self(set))
    }

    pub fn from_bits(bits: u32) -> Self {
        Self((0..MAX_CHANNELS).filter(|i| bits & (1u32 << i) != 0).collect())
    }

    pub fn to_bits(&self) -> u32 {
        self.0.iter().fold(0u32, |acc, &i| acc | (1u32 << i))
    }

    pub fn contains(&self, channel: usize) -> bool {
        self.0.contains(&channel)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().copied()
    }

    /// Split a tagged source name `bm<mask>_<label>` into its channel set and label.
    pub fn parse_tagged(name: &str) -> Option<(ChannelSet, &str)> {
        let rest = name.strip_prefix("bm")?;
        let (mask, label) = rest.split_once('_')?;
        let bits: u32 = mask.parse().ok()?;
        Some((ChannelSet::from_bits(bits), label))
    }

    /// Inverse of [`ChannelSet::parse_tagged`].
    pub fn tagged_name(&self, label: &str) -> String {
        format!("bm{}_{}", self.to_bits(), label)
    }
}
