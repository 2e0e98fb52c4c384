//! ScreenLab Runner — screening orchestration over the data layer.
//!
//! Resolves a ticker universe, acquires one shared dataset through the
//! cache/batch-fetch chain, and fans a per-ticker analysis function across
//! a bounded worker pool.

pub mod job;
pub mod result;
pub mod runner;

pub use job::{ScreeningJob, TimeFrame};
pub use result::{ScreenError, ScreenResult};
pub use runner::ScreeningRunner;
