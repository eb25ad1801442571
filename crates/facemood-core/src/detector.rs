//! YOLO-style emotion detector via ONNX Runtime.
//!
//! Expects a single-output detection head of shape `[1, 4 + classes, anchors]`
//! (or its transpose), where each anchor carries `cx, cy, w, h` in letterboxed
//! input pixels followed by one score per class.

use crate::types::{BoundingBox, Detection, EmotionLabels};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// --- Named constants (no magic numbers) ---
const YOLO_INPUT_SIZE: u32 = 640;
const YOLO_PAD_VALUE: u8 = 114;
const YOLO_BOX_CHANNELS: usize = 4;
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.25;
const DEFAULT_IOU_THRESHOLD: f32 = 0.45;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}; export the emotion model to ONNX and point FACEMOOD_MODEL_PATH at it")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Tunables for post-processing.
#[derive(Debug, Clone)]
pub struct DetectorOptions {
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub labels: EmotionLabels,
}

impl Default for DetectorOptions {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
            labels: EmotionLabels::default(),
        }
    }
}

/// Metadata for coordinate de-mapping after letterbox resize.
#[derive(Debug, Clone, Copy)]
struct LetterboxInfo {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// Memory layout of the detection head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HeadLayout {
    channels: usize,
    anchors: usize,
    /// `[1, channels, anchors]` when true, `[1, anchors, channels]` otherwise.
    channels_first: bool,
}

impl HeadLayout {
    fn from_dims(dims: &[i64]) -> Result<Self, DetectorError> {
        let [batch, a, b] = dims else {
            return Err(DetectorError::InferenceFailed(format!(
                "expected a 3-D detection head, got shape {dims:?}"
            )));
        };
        if *batch != 1 || *a <= 0 || *b <= 0 {
            return Err(DetectorError::InferenceFailed(format!(
                "unexpected detection head shape {dims:?}"
            )));
        }

        // YOLO heads have far more anchors than channels.
        let (a, b) = (*a as usize, *b as usize);
        let layout = if a <= b {
            HeadLayout { channels: a, anchors: b, channels_first: true }
        } else {
            HeadLayout { channels: b, anchors: a, channels_first: false }
        };

        if layout.channels <= YOLO_BOX_CHANNELS {
            return Err(DetectorError::InferenceFailed(format!(
                "detection head has {} channels, need at least {}",
                layout.channels,
                YOLO_BOX_CHANNELS + 1
            )));
        }
        Ok(layout)
    }

    fn classes(&self) -> usize {
        self.channels - YOLO_BOX_CHANNELS
    }

    fn at(&self, data: &[f32], channel: usize, anchor: usize) -> f32 {
        let idx = if self.channels_first {
            channel * self.anchors + anchor
        } else {
            anchor * self.channels + channel
        };
        data.get(idx).copied().unwrap_or(0.0)
    }
}

/// Raw candidate before labels are attached.
#[derive(Debug, Clone)]
struct Candidate {
    class_id: usize,
    confidence: f32,
    bbox: BoundingBox,
}

/// Emotion detector holding a loaded ONNX session.
pub struct EmotionDetector {
    session: Session,
    input_size: u32,
    options: DetectorOptions,
}

impl EmotionDetector {
    /// Load the ONNX model from the given path.
    pub fn load(model_path: &Path, options: DetectorOptions) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let num_outputs = session.outputs().len();
        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            labels = ?options.labels.as_slice(),
            "loaded emotion model"
        );

        if num_outputs == 0 {
            return Err(DetectorError::InferenceFailed(
                "model declares no outputs".to_string(),
            ));
        }

        Ok(Self {
            session,
            input_size: YOLO_INPUT_SIZE,
            options,
        })
    }

    pub fn options(&self) -> &DetectorOptions {
        &self.options
    }

    /// Detect faces and classify their emotion, sorted by confidence.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(Vec::new());
        }

        let (input, letterbox) = preprocess(image, self.input_size);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("detection head: {e}")))?;
        let dims: Vec<i64> = shape.iter().copied().collect();
        let layout = HeadLayout::from_dims(&dims)?;

        if layout.classes() != self.options.labels.len() {
            tracing::debug!(
                classes = layout.classes(),
                labels = self.options.labels.len(),
                "label list does not match model classes"
            );
        }

        let candidates = decode_head(
            data,
            layout,
            &letterbox,
            self.options.confidence_threshold,
            image.width(),
            image.height(),
        );
        let kept = nms(candidates, self.options.iou_threshold);

        tracing::debug!(count = kept.len(), "emotion detections");

        Ok(kept
            .into_iter()
            .map(|c| Detection {
                class_id: c.class_id,
                label: self.options.labels.name(c.class_id),
                confidence: c.confidence,
                bbox: c.bbox,
            })
            .collect())
    }
}

/// Anything that turns an RGB image into emotion detections.
///
/// Implementations may keep mutable inference state, hence `&mut self`.
pub trait EmotionModel: Send {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>, DetectorError>;
}

impl EmotionModel for EmotionDetector {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
        EmotionDetector::detect(self, image)
    }
}

/// Letterbox an RGB image into a square NCHW tensor scaled to `[0, 1]`.
///
/// The image is resized with bilinear filtering to fit, centered, and padded
/// with the YOLO grey.
fn preprocess(image: &RgbImage, input_size: u32) -> (Array4<f32>, LetterboxInfo) {
    let (width, height) = image.dimensions();
    let scale = (input_size as f32 / width as f32).min(input_size as f32 / height as f32);

    let new_w = ((width as f32 * scale).round() as u32).clamp(1, input_size);
    let new_h = ((height as f32 * scale).round() as u32).clamp(1, input_size);
    let pad_x = (input_size - new_w) as f32 / 2.0;
    let pad_y = (input_size - new_h) as f32 / 2.0;

    let letterbox = LetterboxInfo { scale, pad_x, pad_y };

    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);

    let size = input_size as usize;
    let pad_norm = YOLO_PAD_VALUE as f32 / 255.0;
    let mut tensor = Array4::<f32>::from_elem((1, 3, size, size), pad_norm);

    let x0 = pad_x.floor() as usize;
    let y0 = pad_y.floor() as usize;
    for (x, y, pixel) in resized.enumerate_pixels() {
        let (tx, ty) = (x0 + x as usize, y0 + y as usize);
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = pixel.0[c] as f32 / 255.0;
        }
    }

    (tensor, letterbox)
}

/// Decode every anchor whose best class score clears `threshold`.
fn decode_head(
    data: &[f32],
    layout: HeadLayout,
    letterbox: &LetterboxInfo,
    threshold: f32,
    image_width: u32,
    image_height: u32,
) -> Vec<Candidate> {
    let mut candidates = Vec::new();

    for anchor in 0..layout.anchors {
        let mut best_class = 0usize;
        let mut best_score = f32::NEG_INFINITY;
        for class in 0..layout.classes() {
            let score = layout.at(data, YOLO_BOX_CHANNELS + class, anchor);
            if score > best_score {
                best_score = score;
                best_class = class;
            }
        }
        if best_score <= threshold {
            continue;
        }

        let cx = layout.at(data, 0, anchor);
        let cy = layout.at(data, 1, anchor);
        let w = layout.at(data, 2, anchor);
        let h = layout.at(data, 3, anchor);

        // Map from letterboxed space to original image space
        let x1 = (cx - w / 2.0 - letterbox.pad_x) / letterbox.scale;
        let y1 = (cy - h / 2.0 - letterbox.pad_y) / letterbox.scale;
        let bbox = BoundingBox {
            x: x1,
            y: y1,
            width: w / letterbox.scale,
            height: h / letterbox.scale,
        }
        .clamp_to(image_width, image_height);

        if bbox.area() <= 0.0 {
            continue;
        }

        candidates.push(Candidate {
            class_id: best_class,
            confidence: best_score,
            bbox,
        });
    }

    candidates
}

/// Per-class Non-Maximum Suppression; output is sorted by confidence.
fn nms(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep = Vec::new();
    let mut suppressed = vec![false; candidates.len()];

    for i in 0..candidates.len() {
        if suppressed[i] {
            continue;
        }
        keep.push(candidates[i].clone());

        for j in (i + 1)..candidates.len() {
            if suppressed[j] || candidates[j].class_id != candidates[i].class_id {
                continue;
            }
            if candidates[i].bbox.iou(&candidates[j].bbox) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }

    keep
}
