//! Guide geometry mapping
//!
//! The video is displayed aspect-filled ("cover") inside the viewport, so part
//! of the frame is cropped from view and display fractions are not frame
//! fractions. Crop rectangles are derived from the current frame and viewport
//! sizes on every frame; nothing here is cached.

use serde::{Deserialize, Serialize};

/// Rectangle expressed as fractions (0.0 - 1.0) of some reference area
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FracRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl FracRect {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }
}

/// Where, in display space, the card is expected to appear
pub type GuideGeometry = FracRect;

/// Rectangle in frame pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Clamp to a frame of the given size; the part cut off a negative origin is dropped
    fn clamped(x: f32, y: f32, width: f32, height: f32, frame_w: u32, frame_h: u32) -> Self {
        let x0 = (x.max(0.0).floor() as u32).min(frame_w);
        let y0 = (y.max(0.0).floor() as u32).min(frame_h);
        let w = ((width + x.min(0.0)).max(0.0).round() as u32).min(frame_w - x0);
        let h = ((height + y.min(0.0)).max(0.0).round() as u32).min(frame_h - y0);
        Self { x: x0, y: y0, width: w, height: h }
    }
}

/// Mapping from display fractions to frame pixels under an aspect-fill display
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CoverTransform {
    pub frame_width: u32,
    pub frame_height: u32,
    pub offset_x: f32,
    pub offset_y: f32,
    pub visible_width: f32,
    pub visible_height: f32,
}

impl CoverTransform {
    /// Derive the transform for the given frame and viewport sizes.
    ///
    /// Returns `None` when any dimension is zero.
    pub fn compute(frame_width: u32, frame_height: u32, viewport_width: u32, viewport_height: u32) -> Option<Self> {
        if frame_width == 0 || frame_height == 0 || viewport_width == 0 || viewport_height == 0 {
            return None;
        }

        let (fw, fh) = (frame_width as f32, frame_height as f32);
        let (vw, vh) = (viewport_width as f32, viewport_height as f32);

        let scale = (vw / fw).max(vh / fh);
        let visible_width = vw / scale;
        let visible_height = vh / scale;

        Some(Self {
            frame_width,
            frame_height,
            offset_x: (fw - visible_width) / 2.0,
            offset_y: (fh - visible_height) / 2.0,
            visible_width,
            visible_height,
        })
    }

    /// Map a display fraction to a frame pixel position
    pub fn map_point(&self, fx: f32, fy: f32) -> (f32, f32) {
        (
            self.offset_x + fx * self.visible_width,
            self.offset_y + fy * self.visible_height,
        )
    }

    /// Map a display-fraction rectangle to a clamped frame pixel rectangle
    pub fn map_rect(&self, rect: &FracRect) -> PixelRect {
        let (x, y) = self.map_point(rect.x, rect.y);
        PixelRect::clamped(
            x,
            y,
            rect.width * self.visible_width,
            rect.height * self.visible_height,
            self.frame_width,
            self.frame_height,
        )
    }
}

/// Layout of the card regions relative to the guide rectangle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionLayout {
    /// Guide rectangle in display fractions
    pub guide: GuideGeometry,
    /// Height of the collector-number band, as a fraction of guide height,
    /// measured up from the guide's bottom edge
    pub number_band_height: f32,
    /// Linear upscale applied to the collector-number crop
    pub number_upscale: u32,
    /// Centre of the ink sample square, as fractions of the guide
    pub ink_center_x: f32,
    pub ink_center_y: f32,
    /// Side of the ink sample square, as a fraction of guide width
    pub ink_size: f32,
}

impl Default for RegionLayout {
    fn default() -> Self {
        Self {
            guide: FracRect::new(0.1, 0.15, 0.8, 0.7),
            number_band_height: 0.20,
            number_upscale: 2,
            ink_center_x: 0.12,
            ink_center_y: 0.58,
            ink_size: 0.08,
        }
    }
}

/// Pixel crop rectangles for one frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CropPlan {
    pub transform: CoverTransform,
    pub guide: PixelRect,
    pub number: PixelRect,
    pub ink: PixelRect,
}

impl RegionLayout {
    /// Collector-number band in display fractions: full guide width, bottom of the guide
    pub fn number_region(&self) -> FracRect {
        let band = self.guide.height * self.number_band_height.clamp(0.0, 1.0);
        FracRect::new(
            self.guide.x,
            self.guide.y + self.guide.height - band,
            self.guide.width,
            band,
        )
    }

    /// Compute the crop rectangles for a frame shown in the given viewport
    pub fn plan(&self, frame_width: u32, frame_height: u32, viewport_width: u32, viewport_height: u32) -> Option<CropPlan> {
        let transform = CoverTransform::compute(frame_width, frame_height, viewport_width, viewport_height)?;

        let guide = transform.map_rect(&self.guide);
        let number = transform.map_rect(&self.number_region());

        // Square in frame pixels, sized from the guide's pixel width
        let (cx, cy) = transform.map_point(
            self.guide.x + self.ink_center_x * self.guide.width,
            self.guide.y + self.ink_center_y * self.guide.height,
        );
        let side = self.ink_size * self.guide.width * transform.visible_width;
        let ink = PixelRect::clamped(
            cx - side / 2.0,
            cy - side / 2.0,
            side,
            side,
            frame_width,
            frame_height,
        );

        Some(CropPlan { transform, guide, number, ink })
    }
}
