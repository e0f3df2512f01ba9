//! Crucible library crate
//!
//! Exposes the validation core so the CLI, benchmarks and embedding
//! front-ends can run gates, parse diagnostics and drive generation
//! episodes without going through CLI startup.

pub mod artifact;
pub mod config;
pub mod diagnostics;
pub mod episode;
pub mod error;
pub mod escalation;
pub mod gates;
pub mod harness;
pub mod pipeline;
pub mod sandbox;
pub mod util;
