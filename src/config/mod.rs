//! Application Configuration
//!
//! Scanner settings stored in TOML format. Every section falls back to its
//! defaults when omitted.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::analysis::DEFAULT_MAX_CANDIDATES;
use crate::telemetry::DEFAULT_CAPACITY;
use crate::vision::{InkConfig, RegionLayout, TesseractConfig};

/// Application settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Scan loop settings
    pub scanner: ScannerSettings,
    /// Guide rectangle and crop layout
    pub geometry: RegionLayout,
    /// Ink palette and classification thresholds
    pub ink: InkConfig,
    /// Recognition engine settings
    pub recognition: TesseractConfig,
    /// Telemetry settings
    pub telemetry: TelemetrySettings,
}

/// Displayed viewport size in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    /// Parse "WIDTHxHEIGHT", e.g. "390x844"
    pub fn parse(value: &str) -> Option<Self> {
        let (w, h) = value.trim().split_once(['x', 'X'])?;
        let width = w.trim().parse().ok()?;
        let height = h.trim().parse().ok()?;
        (width > 0 && height > 0).then_some(Self { width, height })
    }
}

/// Scan loop settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerSettings {
    /// Interval between frame evaluations
    pub tick_interval_ms: u64,
    /// How long an accepted card stays on display
    pub matched_display_ms: u64,
    /// How long an accepted card is ignored afterwards
    pub cooldown_ms: u64,
    /// Minimum engine confidence (0 - 100) for a reading to be parsed
    pub min_recognition_confidence: f32,
    /// Maximum candidates offered for disambiguation
    pub max_candidates: usize,
    /// Displayed viewport; the frame size is used when unset
    pub viewport: Option<Viewport>,
}

impl Default for ScannerSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            matched_display_ms: 1500,
            cooldown_ms: 5000,
            min_recognition_confidence: 20.0,
            max_candidates: DEFAULT_MAX_CANDIDATES,
            viewport: None,
        }
    }
}

impl ScannerSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn matched_display(&self) -> Duration {
        Duration::from_millis(self.matched_display_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

/// Telemetry settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    /// Frames retained in the ring buffer
    pub capacity: usize,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Invalid config {}", path.display()))?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_app_config() {
        let config = AppConfig::default();

        // Check scanner defaults
        assert_eq!(config.scanner.tick_interval_ms, 1000);
        assert_eq!(config.scanner.matched_display_ms, 1500);
        assert_eq!(config.scanner.cooldown_ms, 5000);
        assert!((config.scanner.min_recognition_confidence - 20.0).abs() < 0.01);
        assert_eq!(config.scanner.max_candidates, 6);
        assert!(config.scanner.viewport.is_none());

        // Check geometry defaults
        assert_eq!(config.geometry.number_upscale, 2);
        assert!((config.geometry.number_band_height - 0.20).abs() < 0.001);

        // Check ink defaults
        assert_eq!(config.ink.palette.len(), 6);
        assert!((config.ink.min_brightness - 30.0).abs() < 0.01);
        assert!((config.ink.max_brightness - 240.0).abs() < 0.01);

        // Check telemetry defaults
        assert_eq!(config.telemetry.capacity, 20);
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let mut config = AppConfig::default();
        config.scanner.viewport = Some(Viewport { width: 390, height: 844 });
        config.recognition.whitelist = Some("0123456789/".to_string());

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config, parsed);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let parsed: AppConfig = toml::from_str(
            "[scanner]\ncooldown_ms = 2000\n\n[telemetry]\ncapacity = 50\n",
        )
        .unwrap();

        assert_eq!(parsed.scanner.cooldown_ms, 2000);
        assert_eq!(parsed.scanner.tick_interval_ms, 1000);
        assert_eq!(parsed.telemetry.capacity, 50);
        assert_eq!(parsed.geometry, RegionLayout::default());
    }

    #[test]
    fn test_save_and_load_config() {
        let config = AppConfig::default();
        let temp_file = NamedTempFile::new().unwrap();

        save_config(&config, temp_file.path()).unwrap();
        let loaded = load_config(temp_file.path()).unwrap();

        assert_eq!(config, loaded);
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/path/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "this is not valid toml {{{{").unwrap();

        let result = load_config(temp_file.path());
        assert!(result.is_err());
    }

    #[test]
    fn test_viewport_parse() {
        assert_eq!(Viewport::parse("390x844"), Some(Viewport { width: 390, height: 844 }));
        assert_eq!(Viewport::parse(" 1280 X 720 "), Some(Viewport { width: 1280, height: 720 }));
        assert_eq!(Viewport::parse("0x720"), None);
        assert_eq!(Viewport::parse("wide"), None);
    }

    #[test]
    fn test_scanner_durations() {
        let settings = ScannerSettings {
            tick_interval_ms: 0,
            ..ScannerSettings::default()
        };
        assert_eq!(settings.tick_interval(), Duration::from_millis(1));
        assert_eq!(settings.matched_display(), Duration::from_millis(1500));
    }
}
