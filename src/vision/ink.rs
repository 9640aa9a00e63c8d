//! Ink color classification
//!
//! Nearest-reference-color voting over the central part of the ink sample.

use image::RgbaImage;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A known ink and its reference color
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InkReference {
    pub name: String,
    pub rgb: [u8; 3],
}

impl InkReference {
    fn new(name: &str, rgb: [u8; 3]) -> Self {
        Self { name: name.to_string(), rgb }
    }
}

/// Ink classifier settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InkConfig {
    /// Known inks
    pub palette: Vec<InkReference>,
    /// Pixels farther than this (Euclidean RGB) from every ink are discarded
    pub max_distance: f32,
    /// Minimum vote share for a second ink to be reported
    pub min_secondary_share: f32,
    /// Pixels with mean brightness below this are shadow
    pub min_brightness: f32,
    /// Pixels with mean brightness above this are glare
    pub max_brightness: f32,
    /// Detections below this confidence are ignored when narrowing matches
    pub min_confidence: f32,
}

impl Default for InkConfig {
    fn default() -> Self {
        Self {
            palette: vec![
                InkReference::new("Amber", [243, 178, 45]),
                InkReference::new("Amethyst", [124, 65, 145]),
                InkReference::new("Emerald", [41, 138, 64]),
                InkReference::new("Ruby", [210, 35, 45]),
                InkReference::new("Sapphire", [30, 120, 190]),
                InkReference::new("Steel", [150, 160, 170]),
            ],
            max_distance: 100.0,
            min_secondary_share: 0.2,
            min_brightness: 30.0,
            max_brightness: 240.0,
            min_confidence: 0.3,
        }
    }
}

/// Result of classifying an ink sample
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InkDetection {
    pub primary: String,
    /// Second ink of a dual-ink card
    pub secondary: Option<String>,
    /// Share of classified pixels belonging to the reported ink(s)
    pub confidence: f32,
    /// Every ink that received votes, most votes first
    pub detected_inks: Vec<String>,
}

impl InkDetection {
    /// Reported ink labels (one or two)
    pub fn inks(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.primary.as_str()).chain(self.secondary.as_deref())
    }
}

/// Per-pixel nearest-color ink classifier
#[derive(Debug, Clone, Default)]
pub struct InkClassifier {
    config: InkConfig,
}

impl InkClassifier {
    pub fn new(config: InkConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &InkConfig {
        &self.config
    }

    /// Classify the central 50% of an ink sample.
    ///
    /// Returns `None` when no pixel is close enough to a known ink.
    pub fn classify(&self, region: &RgbaImage) -> Option<InkDetection> {
        let (w, h) = region.dimensions();
        if w == 0 || h == 0 || self.config.palette.is_empty() {
            return None;
        }

        let x0 = w / 4;
        let y0 = h / 4;
        let x1 = (x0 + (w / 2).max(1)).min(w);
        let y1 = (y0 + (h / 2).max(1)).min(h);

        let max_dist_sq = self.config.max_distance * self.config.max_distance;
        let mut votes = vec![0u32; self.config.palette.len()];
        let mut classified = 0u32;

        for y in y0..y1 {
            for x in x0..x1 {
                let px = region.get_pixel(x, y);
                let (r, g, b) = (px[0] as f32, px[1] as f32, px[2] as f32);

                let brightness = (r + g + b) / 3.0;
                if brightness < self.config.min_brightness || brightness > self.config.max_brightness {
                    continue;
                }

                let nearest = self
                    .config
                    .palette
                    .iter()
                    .enumerate()
                    .map(|(i, ink)| {
                        let dr = r - ink.rgb[0] as f32;
                        let dg = g - ink.rgb[1] as f32;
                        let db = b - ink.rgb[2] as f32;
                        (i, dr * dr + dg * dg + db * db)
                    })
                    .min_by(|a, b| a.1.total_cmp(&b.1));

                if let Some((i, dist_sq)) = nearest {
                    if dist_sq <= max_dist_sq {
                        votes[i] += 1;
                        classified += 1;
                    }
                }
            }
        }

        if classified == 0 {
            debug!("Ink sample: no classifiable pixels");
            return None;
        }

        // Stable sort keeps palette order on ties
        let mut ranked: Vec<(usize, u32)> = votes
            .iter()
            .copied()
            .enumerate()
            .filter(|&(_, v)| v > 0)
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));

        let total = classified as f32;
        let name = |i: usize| self.config.palette[i].name.clone();

        let (primary_idx, primary_votes) = ranked[0];
        let mut confidence = primary_votes as f32 / total;
        let mut secondary = None;

        if let Some(&(idx, v)) = ranked.get(1) {
            let share = v as f32 / total;
            if share >= self.config.min_secondary_share {
                secondary = Some(name(idx));
                confidence += share;
            }
        }

        let detection = InkDetection {
            primary: name(primary_idx),
            secondary,
            confidence: confidence.min(1.0),
            detected_inks: ranked.iter().map(|&(i, _)| name(i)).collect(),
        };

        debug!(
            "Ink sample: primary={} secondary={:?} confidence={:.2} ({} px)",
            detection.primary, detection.secondary, detection.confidence, classified
        );

        Some(detection)
    }
}
