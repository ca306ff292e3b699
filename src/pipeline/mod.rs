//! Pipeline controller
//!
//! Startup order and the shutdown/drain protocol.

mod controller;

pub use controller::{Pipeline, PipelineError, PipelineSummary};
