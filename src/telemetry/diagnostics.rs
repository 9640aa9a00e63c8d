//! Diagnostics bundle
//!
//! A JSON document for field triage: summary stats, the retained frames,
//! where the crops landed and what the scanner was running on.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use uuid::Uuid;

use super::FrameSnapshot;
use crate::vision::CropPlan;

/// Aggregates over the retained frames
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetrySummary {
    /// Frames recorded since the last reset
    pub frames_recorded: u64,
    pub frames_retained: usize,
    pub capacity: usize,
    pub avg_latency_ms: Option<f64>,
    pub peak_latency_ms: Option<f64>,
    /// Retained frames whose recognition call had to wait
    pub contended: usize,
    pub locked: bool,
    pub queue_depth: usize,
    pub peak_queue_depth: usize,
    /// Retained frames per outcome label
    pub outcomes: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnvironmentInfo {
    pub crate_version: &'static str,
    pub os: &'static str,
    pub arch: &'static str,
    pub family: &'static str,
    pub session_id: Uuid,
}

impl EnvironmentInfo {
    pub fn current(session_id: Uuid) -> Self {
        Self {
            crate_version: env!("CARGO_PKG_VERSION"),
            os: std::env::consts::OS,
            arch: std::env::consts::ARCH,
            family: std::env::consts::FAMILY,
            session_id,
        }
    }
}

/// Frame and viewport sizes with the crops computed from them
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeometryReport {
    pub frame_width: u32,
    pub frame_height: u32,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub plan: CropPlan,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticsReport {
    pub generated_at: DateTime<Utc>,
    pub environment: EnvironmentInfo,
    pub summary: TelemetrySummary,
    pub frames: Vec<FrameSnapshot>,
    pub geometry: Option<GeometryReport>,
}

impl DiagnosticsReport {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize diagnostics")
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = self.to_json()?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write diagnostics to {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::shared::{FrameOutcome, FrameRejection};
    use crate::telemetry::{FrameTrace, Telemetry};
    use crate::vision::RegionLayout;
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_export_json_shape() {
        let telemetry = Telemetry::new(5);
        telemetry.record(FrameTrace::default(), &Ok(FrameOutcome::NoMatch));
        telemetry.record(FrameTrace::default(), &Err(FrameRejection::NoText));

        let plan = RegionLayout::default().plan(1280, 720, 1280, 720);
        let geometry = plan.map(|plan| GeometryReport {
            frame_width: 1280,
            frame_height: 720,
            viewport_width: 1280,
            viewport_height: 720,
            plan,
        });

        let report = telemetry.export(geometry);
        let value: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();

        assert_eq!(value["summary"]["frames_recorded"], 2);
        assert_eq!(value["frames"].as_array().map(Vec::len), Some(2));
        assert_eq!(value["frames"][1]["outcome"], "no_text");
        assert_eq!(value["environment"]["crate_version"], env!("CARGO_PKG_VERSION"));
        assert_eq!(value["environment"]["session_id"], telemetry.session_id().to_string());
        assert!(value["geometry"]["plan"]["number"].is_object());
    }

    #[test]
    fn test_save_writes_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("diagnostics.json");
        Telemetry::default().export(None).save(&path).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("\"geometry\": null"));
    }
}
