//! Frame source that replays still images
//!
//! Stands in for a live camera: frames are decoded once on acquire and
//! handed out in a loop until released.

use async_trait::async_trait;
use image::{ImageError, RgbaImage};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info};

use super::{AcquisitionError, CapturedFrame, FrameSource};

/// Replays a fixed list of image files as a video stream
pub struct StillImageSource {
    paths: Vec<PathBuf>,
    frames: Mutex<Vec<RgbaImage>>,
    cursor: AtomicUsize,
}

impl StillImageSource {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self {
            paths,
            frames: Mutex::new(Vec::new()),
            cursor: AtomicUsize::new(0),
        }
    }

    /// Build a source from frames already in memory
    pub fn from_frames(frames: Vec<RgbaImage>) -> Self {
        Self {
            paths: Vec::new(),
            frames: Mutex::new(frames),
            cursor: AtomicUsize::new(0),
        }
    }

    /// Whether the stream currently holds frames
    pub fn is_open(&self) -> bool {
        !self.frames.lock().is_empty()
    }
}

fn load_frame(path: &Path) -> Result<RgbaImage, AcquisitionError> {
    match image::open(path) {
        Ok(img) => Ok(img.to_rgba8()),
        Err(ImageError::IoError(e)) => Err(AcquisitionError::from_io(&e)),
        Err(e) => Err(AcquisitionError::Other(format!("{}: {}", path.display(), e))),
    }
}

#[async_trait]
impl FrameSource for StillImageSource {
    async fn acquire(&self) -> Result<(), AcquisitionError> {
        if self.paths.is_empty() {
            return if self.is_open() {
                Ok(())
            } else {
                Err(AcquisitionError::NoDevice)
            };
        }

        let paths = self.paths.clone();
        let frames = tokio::task::spawn_blocking(move || {
            paths.iter().map(|p| load_frame(p)).collect::<Result<Vec<_>, _>>()
        })
        .await
        .map_err(|e| AcquisitionError::Other(e.to_string()))??;

        info!("Loaded {} still frame(s)", frames.len());
        *self.frames.lock() = frames;
        self.cursor.store(0, Ordering::SeqCst);
        Ok(())
    }

    fn next_frame(&self) -> Option<CapturedFrame> {
        let frames = self.frames.lock();
        if frames.is_empty() {
            return None;
        }
        let index = self.cursor.fetch_add(1, Ordering::SeqCst) % frames.len();
        Some(CapturedFrame::new(frames[index].clone()))
    }

    fn release(&self) {
        // In-memory sources keep their frames so they can be reacquired
        if !self.paths.is_empty() {
            self.frames.lock().clear();
        }
        debug!("Still image source released");
    }

    fn describe(&self) -> String {
        match self.paths.len() {
            0 => "in-memory frames".to_string(),
            1 => format!("still image {}", self.paths[0].display()),
            n => format!("{} still images", n),
        }
    }
}
