//! Vision/OCR Layer
//!
//! Turns a raw camera frame into recognizer-ready and classifier-ready
//! buffers, and runs text recognition:
//! - Guide geometry mapping under the aspect-fill display transform
//! - Collector-number band preprocessing (upscale, grayscale, Otsu)
//! - Serialized access to the recognition engine (Tesseract by default)
//! - Ink color classification

pub mod geometry;
pub mod ink;
pub mod ocr;
pub mod ocr_preprocess;
pub mod tesseract;

pub use geometry::{CoverTransform, CropPlan, FracRect, GuideGeometry, PixelRect, RegionLayout};
pub use ink::{InkClassifier, InkConfig, InkDetection, InkReference};
pub use ocr::{
    EngineFactory, Recognition, RecognitionError, RecognitionReport, RecognitionService, TextRecognizer,
    WorkerObserver,
};
pub use ocr_preprocess::{BinarizeStats, DebugImage, PreparedRegions, RegionPreprocessor};
pub use tesseract::{TesseractConfig, TesseractEngine};
