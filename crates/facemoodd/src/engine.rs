use facemood_core::detector::DetectorError;
use facemood_core::input::{self, InputError};
use facemood_core::{annotate, Detection, EmotionModel};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

const ENGINE_QUEUE_DEPTH: usize = 4;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("image error: {0}")]
    Input(#[from] InputError),
    #[error("failed to start engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Result of one detection request, ready for display.
pub struct DetectOutcome {
    /// The (possibly downscaled) input, PNG-encoded.
    pub uploaded_png: Vec<u8>,
    /// The input with detections drawn on it; same dimensions as `uploaded_png`.
    pub annotated_png: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub detections: Vec<Detection>,
}

/// Messages sent from HTTP handlers to the engine thread.
enum EngineRequest {
    Detect {
        path: PathBuf,
        reply: oneshot::Sender<Result<DetectOutcome, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Request detection on the image file at `path`.
    ///
    /// The file must stay in place until the returned future completes.
    pub async fn detect(&self, path: &Path) -> Result<DetectOutcome, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Detect {
                path: path.to_path_buf(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Spawn the engine on a dedicated OS thread that owns `model` for the life
/// of the process.
///
/// The thread exits once every [`EngineHandle`] has been dropped; join the
/// returned handle to wait for it.
pub fn spawn_engine<M>(
    model: M,
    max_image_side: u32,
) -> Result<(EngineHandle, std::thread::JoinHandle<()>), EngineError>
where
    M: EmotionModel + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(ENGINE_QUEUE_DEPTH);
    let mut model = model;

    let join = std::thread::Builder::new()
        .name("facemood-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Detect { path, reply } => {
                        let result = run_detect(&mut model, &path, max_image_side);
                        if let Err(err) = &result {
                            tracing::warn!(error = %err, "detect failed");
                        }
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok((EngineHandle { tx }, join))
}

/// Decode, detect, annotate, encode.
fn run_detect<M: EmotionModel>(
    model: &mut M,
    path: &Path,
    max_image_side: u32,
) -> Result<DetectOutcome, EngineError> {
    let image = input::load_image(path, Some(max_image_side))?;
    let (width, height) = image.dimensions();

    let started = std::time::Instant::now();
    let detections = model.detect(&image)?;
    tracing::info!(
        width,
        height,
        faces = detections.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "detect: inference done"
    );

    let annotated = annotate(&image, &detections);

    Ok(DetectOutcome {
        uploaded_png: input::encode_png(&image)?,
        annotated_png: input::encode_png(&annotated)?,
        width,
        height,
        detections,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use facemood_core::BoundingBox;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::{Cursor, Write};

    /// Model stand-in that reports one centered face per image.
    pub(crate) struct CenterFace;

    impl EmotionModel for CenterFace {
        fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
            let (w, h) = image.dimensions();
            Ok(vec![Detection {
                class_id: 3,
                label: "happy".to_string(),
                confidence: 0.8,
                bbox: BoundingBox {
                    x: w as f32 / 4.0,
                    y: h as f32 / 4.0,
                    width: w as f32 / 2.0,
                    height: h as f32 / 2.0,
                },
            }])
        }
    }

    pub(crate) fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
        let image = RgbImage::from_pixel(width, height, Rgb([90, 140, 200]));
        let mut buf = Cursor::new(Vec::new());
        image.write_to(&mut buf, ImageFormat::Jpeg).unwrap();
        buf.into_inner()
    }

    #[tokio::test]
    async fn test_detect_jpeg_preserves_dimensions() {
        let (engine, _join) = spawn_engine(CenterFace, 1280).unwrap();
        let mut file = tempfile::Builder::new().suffix(".jpg").tempfile().unwrap();
        file.write_all(&jpeg_bytes(160, 120)).unwrap();

        let outcome = engine.detect(file.path()).await.unwrap();
        assert_eq!((outcome.width, outcome.height), (160, 120));
        assert_eq!(outcome.detections.len(), 1);

        let annotated = image::load_from_memory(&outcome.annotated_png).unwrap();
        assert_eq!((annotated.width(), annotated.height()), (160, 120));
    }

    #[tokio::test]
    async fn test_detect_downscales_before_inference() {
        let (engine, _join) = spawn_engine(CenterFace, 100).unwrap();
        let mut file = tempfile::Builder::new().suffix(".jpg").tempfile().unwrap();
        file.write_all(&jpeg_bytes(400, 300)).unwrap();

        let outcome = engine.detect(file.path()).await.unwrap();
        assert_eq!((outcome.width, outcome.height), (100, 75));
        let uploaded = image::load_from_memory(&outcome.uploaded_png).unwrap();
        let annotated = image::load_from_memory(&outcome.annotated_png).unwrap();
        assert_eq!(uploaded.width(), annotated.width());
        assert_eq!(uploaded.height(), annotated.height());
    }

    #[tokio::test]
    async fn test_detect_bad_image_is_input_error() {
        let (engine, _join) = spawn_engine(CenterFace, 1280).unwrap();
        let mut file = tempfile::Builder::new().suffix(".png").tempfile().unwrap();
        file.write_all(b"not a png").unwrap();

        let err = engine.detect(file.path()).await.err().unwrap();
        assert!(matches!(err, EngineError::Input(_)), "got {err:?}");
    }

    #[test]
    fn test_engine_thread_exits_when_handles_dropped() {
        let (engine, join) = spawn_engine(CenterFace, 1280).unwrap();
        drop(engine);
        join.join().unwrap();
    }
}
