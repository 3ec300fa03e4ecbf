//! `jes-calib` library crate.
//!
//! The binary (`jesfit`) is a thin wrapper around this library so that:
//!
//! - core logic is testable without spawning processes
//! - the fit engine can be driven from other tools with in-memory inputs

pub mod app;
pub mod cli;
pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod math;
pub mod models;
pub mod report;
pub mod uncertainty;
