//! Card Scanner - camera-based trading card recognition
//!
//! Turns a live video stream into a validated catalog entry: the collector
//! number printed on the card is read with OCR, the ink banner color is
//! classified, and both are resolved against an in-memory catalog.

pub mod analysis;
pub mod app;
pub mod capture;
pub mod config;
pub mod shared;
pub mod storage;
pub mod telemetry;
pub mod vision;

pub use app::{ControllerError, MatchCallback, ScanController};
