//! facemood-core — Facial emotion detection and result annotation.
//!
//! Runs a YOLO-style emotion detector exported to ONNX via ONNX Runtime on
//! the CPU, and draws the detections back onto the input image.

pub mod annotate;
pub mod detector;
pub mod input;
pub mod types;

pub use annotate::annotate;
pub use detector::{DetectorError, DetectorOptions, EmotionDetector, EmotionModel};
pub use types::{BoundingBox, Detection, EmotionLabels};
