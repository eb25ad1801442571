//! Draw detections onto a copy of the input image.
//!
//! Each detection gets a class-coloured outline and a filled tab above its
//! top edge carrying `"{label} {confidence:.2}"`.

use crate::types::Detection;
use ab_glyph::{FontRef, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;

/// DejaVu Sans, see `assets/DejaVuSans-LICENSE.txt`.
const LABEL_FONT: &[u8] = include_bytes!("../assets/DejaVuSans.ttf");

/// Class colours, cycled by class id.
const PALETTE: [[u8; 3]; 10] = [
    [0xFF, 0x38, 0x38],
    [0xFF, 0x9D, 0x97],
    [0xFF, 0x70, 0x1F],
    [0xFF, 0xB2, 0x1D],
    [0xCF, 0xD2, 0x31],
    [0x48, 0xF9, 0x0A],
    [0x92, 0xCC, 0x17],
    [0x3D, 0xDB, 0x86],
    [0x1A, 0x93, 0x34],
    [0x00, 0xD4, 0xBB],
];

/// Outline thickness relative to the image's shorter side.
const THICKNESS_DIVISOR: u32 = 300;
const MIN_THICKNESS: u32 = 2;
/// Label text height relative to the outline thickness.
const TEXT_SCALE_FACTOR: u32 = 6;
const MIN_TEXT_PX: u32 = 12;
const TAB_PADDING: u32 = 2;
/// Palette entries brighter than this get dark label text.
const LIGHT_LUMA: u32 = 150;

/// Colour used for `class_id` in annotations and legends.
pub fn class_color(class_id: usize) -> [u8; 3] {
    PALETTE[class_id % PALETTE.len()]
}

fn text_color(background: [u8; 3]) -> Rgb<u8> {
    let [r, g, b] = background.map(u32::from);
    let luma = (299 * r + 587 * g + 114 * b) / 1000;
    if luma > LIGHT_LUMA {
        Rgb([0, 0, 0])
    } else {
        Rgb([255, 255, 255])
    }
}

/// Return a copy of `image` with every detection drawn on it.
///
/// The output always has the same dimensions as the input.
pub fn annotate(image: &RgbImage, detections: &[Detection]) -> RgbImage {
    let mut canvas = image.clone();
    let (width, height) = canvas.dimensions();
    if width == 0 || height == 0 {
        return canvas;
    }

    let thickness = (width.min(height) / THICKNESS_DIVISOR).max(MIN_THICKNESS);
    let scale = PxScale::from((thickness * TEXT_SCALE_FACTOR).max(MIN_TEXT_PX) as f32);
    let font = match FontRef::try_from_slice(LABEL_FONT) {
        Ok(font) => Some(font),
        Err(err) => {
            tracing::warn!(error = %err, "label font unusable, drawing boxes only");
            None
        }
    };

    for det in detections {
        let rgb = class_color(det.class_id);
        let color = Rgb(rgb);
        let bbox = det.bbox.clamp_to(width, height);

        let x = bbox.x.round() as i32;
        let y = bbox.y.round() as i32;
        let w = (bbox.width.round() as u32).max(1);
        let h = (bbox.height.round() as u32).max(1);

        for inset in 0..thickness {
            let (iw, ih) = (w.saturating_sub(2 * inset), h.saturating_sub(2 * inset));
            if iw == 0 || ih == 0 {
                break;
            }
            let rect = Rect::at(x + inset as i32, y + inset as i32).of_size(iw, ih);
            draw_hollow_rect_mut(&mut canvas, rect, color);
        }

        let Some(font) = &font else {
            continue;
        };
        let text = format!("{} {:.2}", det.label, det.confidence);
        let (text_w, text_h) = text_size(scale, font, &text);
        let tab_w = text_w + 2 * TAB_PADDING;
        let tab_h = text_h.max(1) + 2 * TAB_PADDING;

        // Tab sits above the box, or just inside it when the box touches the top.
        let tab_y = if y >= tab_h as i32 { y - tab_h as i32 } else { y };
        draw_filled_rect_mut(&mut canvas, Rect::at(x, tab_y).of_size(tab_w, tab_h), color);
        draw_text_mut(
            &mut canvas,
            text_color(rgb),
            x + TAB_PADDING as i32,
            tab_y + TAB_PADDING as i32,
            scale,
            font,
            &text,
        );
    }

    canvas
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BoundingBox;

    fn detection(class_id: usize, x: f32, y: f32, w: f32, h: f32, confidence: f32) -> Detection {
        Detection {
            class_id,
            label: format!("class {class_id}"),
            confidence,
            bbox: BoundingBox { x, y, width: w, height: h },
        }
    }

    #[test]
    fn test_annotate_preserves_dimensions() {
        let image = RgbImage::from_pixel(321, 123, Rgb([10, 20, 30]));
        let out = annotate(
            &image,
            &[
                detection(0, 10.0, 40.0, 50.0, 50.0, 0.9),
                detection(4, 300.0, 100.0, 80.0, 80.0, 0.3),
            ],
        );
        assert_eq!(out.dimensions(), image.dimensions());
    }

    #[test]
    fn test_annotate_without_detections_is_identical() {
        let image = RgbImage::from_pixel(64, 48, Rgb([1, 2, 3]));
        let out = annotate(&image, &[]);
        assert_eq!(out, image);
    }

    #[test]
    fn test_annotate_draws_class_color_on_outline() {
        let image = RgbImage::from_pixel(200, 200, Rgb([0, 0, 0]));
        let out = annotate(&image, &[detection(2, 50.0, 60.0, 40.0, 40.0, 1.0)]);

        assert_eq!(out.get_pixel(50, 80).0, class_color(2));
        // Interior stays untouched
        assert_eq!(out.get_pixel(70, 80).0, [0, 0, 0]);
    }

    #[test]
    fn test_annotate_box_at_top_edge() {
        let image = RgbImage::from_pixel(100, 100, Rgb([0, 0, 0]));
        let out = annotate(&image, &[detection(1, 0.0, 0.0, 30.0, 30.0, 0.5)]);
        assert_eq!(out.get_pixel(0, 0).0, class_color(1));
    }

    #[test]
    fn test_annotate_writes_label_text() {
        let image = RgbImage::from_pixel(200, 200, Rgb([0, 0, 0]));
        let mut happy = detection(3, 50.0, 80.0, 100.0, 100.0, 0.8);
        happy.label = "happy".into();
        let mut sad = happy.clone();
        sad.label = "sad".into();

        assert_ne!(annotate(&image, &[happy]), annotate(&image, &[sad]));
    }

    #[test]
    fn test_label_tab_has_text_pixels() {
        let image = RgbImage::from_pixel(200, 200, Rgb([0, 0, 0]));
        let out = annotate(&image, &[detection(0, 50.0, 80.0, 100.0, 100.0, 0.8)]);
        let tab_color = class_color(0);

        // Glyph pixels are neither the tab colour nor the untouched background.
        let has_ink = (50..150).any(|x| {
            (60..80).any(|y| {
                let px = out.get_pixel(x, y).0;
                px != tab_color && px != [0, 0, 0]
            })
        });
        assert!(has_ink, "expected label glyphs inside the tab");
    }

    #[test]
    fn test_text_color_contrasts_palette() {
        assert_eq!(text_color([0xFF, 0xB2, 0x1D]), Rgb([0, 0, 0]));
        assert_eq!(text_color([0x1A, 0x93, 0x34]), Rgb([255, 255, 255]));
    }

    #[test]
    fn test_class_color_cycles() {
        assert_eq!(class_color(0), class_color(PALETTE.len()));
    }
}
