//! Input data sources other than files on disk.

pub mod sample;

pub use sample::*;
