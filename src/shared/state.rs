//! Pipeline state owned by the scan controller

use crate::capture::AcquisitionError;
use crate::storage::CatalogEntry;

/// Externally observable state of the scanning pipeline
#[derive(Debug, Clone, PartialEq, Default)]
pub enum PipelineState {
    /// Camera closed
    #[default]
    Idle,
    /// Waiting for the camera stream
    Requesting,
    /// Scanning, waiting for the next tick
    Streaming,
    /// A frame is being evaluated
    Processing,
    /// A card was accepted and is on display
    Matched(CatalogEntry),
    /// Several cards matched; waiting for the user to pick one
    Disambiguating {
        candidates: Vec<CatalogEntry>,
        /// Candidates dropped by the cap
        suppressed: usize,
    },
    /// Camera acquisition failed; terminal until retried
    Error(AcquisitionError),
}

impl PipelineState {
    /// Short lowercase name for logs and diagnostics
    pub fn name(&self) -> &'static str {
        match self {
            PipelineState::Idle => "idle",
            PipelineState::Requesting => "requesting",
            PipelineState::Streaming => "streaming",
            PipelineState::Processing => "processing",
            PipelineState::Matched(_) => "matched",
            PipelineState::Disambiguating { .. } => "disambiguating",
            PipelineState::Error(_) => "error",
        }
    }

    /// Whether the camera stream is held
    pub fn is_open(&self) -> bool {
        !matches!(self, PipelineState::Idle | PipelineState::Error(_))
    }

    /// Card on display, if any
    pub fn matched(&self) -> Option<&CatalogEntry> {
        match self {
            PipelineState::Matched(card) => Some(card),
            _ => None,
        }
    }

    /// Candidates offered to the user, if disambiguating
    pub fn candidates(&self) -> &[CatalogEntry] {
        match self {
            PipelineState::Disambiguating { candidates, .. } => candidates,
            _ => &[],
        }
    }
}
