//! Per-frame and per-tick results
//!
//! Every evaluated frame ends in a [`FrameResult`]; the controller drives
//! state transitions from it and the telemetry recorder logs it.

use thiserror::Error;

use crate::storage::{CardKey, CatalogEntry};
use crate::vision::RecognitionError;

/// A frame that made it through recognition and parsing
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    /// Single card accepted and reported
    Matched(CatalogEntry),
    /// Several cards matched
    Disambiguating {
        candidates: Vec<CatalogEntry>,
        suppressed: usize,
    },
    /// Valid number, no catalog card
    NoMatch,
    /// Matched a card accepted moments ago
    Cooling(CardKey),
}

/// Why a frame produced no usable reading
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FrameRejection {
    #[error("no frame available")]
    NoFrame,
    #[error("frame or viewport has zero size")]
    GeometryUnavailable,
    #[error("collector-number region is empty")]
    EmptyRegion,
    #[error(transparent)]
    Recognition(#[from] RecognitionError),
    #[error("no text recognized")]
    NoText,
    #[error("recognition confidence {confidence:.1} below threshold")]
    LowConfidence { confidence: f32 },
    #[error("no collector number in {text:?}")]
    ParseFailed { text: String },
    #[error("pipeline state changed while the frame was processed")]
    Interrupted,
}

pub type FrameResult = Result<FrameOutcome, FrameRejection>;

/// What a single timer tick did
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Previous frame still in flight; tick dropped
    Skipped,
    /// Pipeline not streaming
    NotStreaming,
    Processed(FrameResult),
}

impl FrameOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            FrameOutcome::Matched(_) => "matched",
            FrameOutcome::Disambiguating { .. } => "ambiguous",
            FrameOutcome::NoMatch => "no_match",
            FrameOutcome::Cooling(_) => "cooldown",
        }
    }

    pub fn detail(&self) -> Option<String> {
        match self {
            FrameOutcome::Matched(card) => Some(format!("{} ({} #{})", card.full_name, card.set_code, card.collector_number)),
            FrameOutcome::Disambiguating { candidates, suppressed } => {
                let mut detail = candidates
                    .iter()
                    .map(|c| format!("{}#{}", c.set_code, c.collector_number))
                    .collect::<Vec<_>>()
                    .join(", ");
                if *suppressed > 0 {
                    detail.push_str(&format!(" (+{} more)", suppressed));
                }
                Some(detail)
            }
            FrameOutcome::NoMatch => None,
            FrameOutcome::Cooling(key) => Some(format!("{}#{}", key.set_code, key.collector_number)),
        }
    }
}

impl FrameRejection {
    pub fn label(&self) -> &'static str {
        match self {
            FrameRejection::NoFrame => "no_frame",
            FrameRejection::GeometryUnavailable => "geometry_unavailable",
            FrameRejection::EmptyRegion => "empty_region",
            FrameRejection::Recognition(_) => "recognition_error",
            FrameRejection::NoText => "no_text",
            FrameRejection::LowConfidence { .. } => "low_confidence",
            FrameRejection::ParseFailed { .. } => "parse_failed",
            FrameRejection::Interrupted => "interrupted",
        }
    }
}
