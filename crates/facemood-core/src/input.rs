//! Upload decoding: format check, decode to RGB, optional downscale, PNG encode.

use image::imageops::FilterType;
use image::{ImageFormat, ImageReader, RgbImage};
use std::io::Cursor;
use std::path::Path;
use thiserror::Error;

/// File extensions accepted for upload.
pub const ACCEPTED_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Error, Debug)]
pub enum InputError {
    #[error("unsupported image type: {0}")]
    Unsupported(String),
    #[error("image I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("image decode: {0}")]
    Decode(#[from] image::ImageError),
}

/// Whether `file_name` carries one of the accepted extensions.
pub fn has_accepted_extension(file_name: &str) -> bool {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| ACCEPTED_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Open an image file, sniffing the format from its contents.
///
/// Only JPEG and PNG are decoded. When `max_side` is set, images whose longer
/// side exceeds it are downscaled preserving aspect ratio.
pub fn load_image(path: &Path, max_side: Option<u32>) -> Result<RgbImage, InputError> {
    let reader = ImageReader::open(path)?.with_guessed_format()?;

    match reader.format() {
        Some(ImageFormat::Jpeg) | Some(ImageFormat::Png) => {}
        Some(other) => return Err(InputError::Unsupported(format!("{other:?}"))),
        None => return Err(InputError::Unsupported("unrecognized content".to_string())),
    }

    let decoded = reader.decode()?;
    let (width, height) = (decoded.width(), decoded.height());

    let decoded = match max_side {
        Some(max) if max > 0 && width.max(height) > max => {
            tracing::debug!(width, height, max, "downscaling upload");
            decoded.resize(max, max, FilterType::Triangle)
        }
        _ => decoded,
    };

    Ok(decoded.to_rgb8())
}

/// Encode an RGB image as PNG bytes.
pub fn encode_png(image: &RgbImage) -> Result<Vec<u8>, InputError> {
    let mut buf = Cursor::new(Vec::new());
    image.write_to(&mut buf, ImageFormat::Png)?;
    Ok(buf.into_inner())
}
