//! Region preprocessing for collector-number OCR and ink sampling
//!
//! The collector-number band is upscaled, converted to grayscale, inverted on
//! dark backgrounds and binarized with an Otsu threshold so the recognizer
//! always sees dark text on a light background. The ink square is cropped at
//! native resolution with its true colors.

use image::{DynamicImage, GrayImage, RgbaImage};
use imageproc::contrast::otsu_level;
use tracing::debug;

use super::geometry::{CropPlan, PixelRect};

/// Mean brightness below which the band is treated as light-on-dark
const INVERT_BELOW_MEAN: f32 = 128.0;

/// Statistics from the last binarization pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BinarizeStats {
    /// Otsu threshold applied
    pub threshold: u8,
    /// Mean grayscale brightness before inversion
    pub mean: f32,
    /// Whether the band was inverted
    pub inverted: bool,
}

/// Output of preprocessing one frame
pub struct PreparedRegions<'a> {
    /// Binarized collector-number band, dark text on white
    pub number: &'a GrayImage,
    /// Raw-color ink sample
    pub ink: RgbaImage,
    pub stats: BinarizeStats,
}

/// A labelled image buffer for visual troubleshooting
#[derive(Debug, Clone)]
pub struct DebugImage {
    pub label: &'static str,
    pub image: DynamicImage,
}

/// Per-stream preprocessor owning the reusable scratch buffers
pub struct RegionPreprocessor {
    /// Upscaled RGBA collector-number band
    upscaled: Vec<u8>,
    /// Grayscale/binarized back buffer handed to the recognizer
    binary: GrayImage,
}

impl Default for RegionPreprocessor {
    fn default() -> Self {
        Self::new()
    }
}

impl RegionPreprocessor {
    pub fn new() -> Self {
        Self {
            upscaled: Vec::new(),
            binary: GrayImage::new(1, 1),
        }
    }

    /// Crop and preprocess both regions of a frame.
    ///
    /// Returns `None` when either crop is empty.
    pub fn prepare(&mut self, frame: &RgbaImage, plan: &CropPlan, upscale: u32) -> Option<PreparedRegions<'_>> {
        if plan.number.is_empty() || plan.ink.is_empty() {
            return None;
        }

        let scale = upscale.max(1);
        let (width, height) = upscale_region(frame, &plan.number, scale, &mut self.upscaled);
        self.resize_binary(width, height);

        let stats = binarize(&self.upscaled, &mut self.binary);
        debug!(
            "Number band {}x{} -> {}x{}, threshold={}, mean={:.1}, inverted={}",
            plan.number.width, plan.number.height, width, height, stats.threshold, stats.mean, stats.inverted
        );

        let ink = crop(frame, &plan.ink);

        Some(PreparedRegions {
            number: &self.binary,
            ink,
            stats,
        })
    }

    /// Labelled buffers of the full frame and each crop
    pub fn debug_capture(&mut self, frame: &RgbaImage, plan: &CropPlan, upscale: u32) -> Vec<DebugImage> {
        let mut images = vec![DebugImage {
            label: "frame",
            image: DynamicImage::ImageRgba8(frame.clone()),
        }];

        let Some(prepared) = self.prepare(frame, plan, upscale) else {
            return images;
        };
        let algorithm = prepared.number.clone();
        let ink = prepared.ink;

        images.push(DebugImage {
            label: "algorithm",
            image: DynamicImage::ImageLuma8(algorithm),
        });
        images.push(DebugImage {
            label: "number",
            image: DynamicImage::ImageRgba8(crop(frame, &plan.number)),
        });
        images.push(DebugImage {
            label: "ink",
            image: DynamicImage::ImageRgba8(ink),
        });
        images
    }

    /// Reshape the back buffer, keeping its allocation
    fn resize_binary(&mut self, width: u32, height: u32) {
        if self.binary.dimensions() == (width, height) {
            return;
        }
        let mut raw = std::mem::replace(&mut self.binary, GrayImage::new(0, 0)).into_raw();
        raw.resize((width * height) as usize, 0);
        self.binary = GrayImage::from_raw(width, height, raw).unwrap_or_else(|| GrayImage::new(width, height));
    }
}

/// Copy a frame region into a new image at native resolution
fn crop(frame: &RgbaImage, rect: &PixelRect) -> RgbaImage {
    image::imageops::crop_imm(frame, rect.x, rect.y, rect.width, rect.height).to_image()
}

/// Bilinear upscale of a frame region into `dst` (RGBA).
/// Returns the output dimensions.
fn upscale_region(frame: &RgbaImage, rect: &PixelRect, scale: u32, dst: &mut Vec<u8>) -> (u32, u32) {
    let src = frame.as_raw();
    let stride = frame.width() as usize * 4;
    let w = rect.width as usize;
    let h = rect.height as usize;
    let new_width = rect.width * scale;
    let new_height = rect.height * scale;
    let nw = new_width as usize;
    let scale_f = scale as f32;

    dst.clear();
    dst.resize(nw * new_height as usize * 4, 0);

    let at = |x: usize, y: usize, c: usize| -> f32 {
        src[(rect.y as usize + y) * stride + (rect.x as usize + x) * 4 + c] as f32
    };

    for ny in 0..new_height as usize {
        let src_y = ny as f32 / scale_f;
        let y0 = (src_y.floor() as usize).min(h - 1);
        let y1 = (y0 + 1).min(h - 1);
        let y_weight = src_y - src_y.floor();

        for nx in 0..nw {
            let src_x = nx as f32 / scale_f;
            let x0 = (src_x.floor() as usize).min(w - 1);
            let x1 = (x0 + 1).min(w - 1);
            let x_weight = src_x - src_x.floor();

            let dst_idx = (ny * nw + nx) * 4;
            for c in 0..4 {
                let top = at(x0, y0, c) * (1.0 - x_weight) + at(x1, y0, c) * x_weight;
                let bottom = at(x0, y1, c) * (1.0 - x_weight) + at(x1, y1, c) * x_weight;
                let value = top * (1.0 - y_weight) + bottom * y_weight;
                dst[dst_idx + c] = value.clamp(0.0, 255.0) as u8;
            }
        }
    }

    (new_width, new_height)
}

/// Grayscale, auto-invert and Otsu-binarize RGBA data into `out`
fn binarize(rgba: &[u8], out: &mut GrayImage) -> BinarizeStats {
    let mut sum = 0u64;
    let mut min_v = u8::MAX;
    let mut max_v = u8::MIN;

    for (dst, px) in out.iter_mut().zip(rgba.chunks_exact(4)) {
        let gray = (0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32) as u8;
        *dst = gray;
        sum += gray as u64;
        min_v = min_v.min(gray);
        max_v = max_v.max(gray);
    }

    let count = out.len().max(1);
    let mean = sum as f32 / count as f32;
    let inverted = mean < INVERT_BELOW_MEAN;
    if inverted {
        for v in out.iter_mut() {
            *v = 255 - *v;
        }
    }

    // A flat band carries no text
    if min_v == max_v {
        for v in out.iter_mut() {
            *v = 255;
        }
        return BinarizeStats { threshold: 0, mean, inverted };
    }

    let threshold = otsu_level(out);
    for v in out.iter_mut() {
        *v = if *v > threshold { 255 } else { 0 };
    }

    BinarizeStats { threshold, mean, inverted }
}
