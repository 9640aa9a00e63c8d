//! Shared pipeline state and per-frame result types
//!
//! These types are produced by the scan controller and consumed by callers
//! and the telemetry recorder alike.

pub mod outcome;
pub mod state;

pub use outcome::{FrameOutcome, FrameRejection, FrameResult, TickOutcome};
pub use state::PipelineState;
