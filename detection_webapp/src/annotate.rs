use crate::bounding_box::BoundingBoxWithLabels;
use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
    drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
    rect::Rect,
};
use std::{fs, io, path::Path};
use thiserror::Error;

const BORDER_THICKNESS: i32 = 2;
const LABEL_FONT_SIZE: f32 = 18.0;
const LABEL_PADDING: i32 = 2;
const LABEL_TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const DEFAULT_FONT: &[u8] = include_bytes!("../assets/DejaVuSans.ttf");

#[derive(Error, Debug)]
pub enum AnnotateError {
    #[error("Failed to load font: {0}")]
    Font(String),
    #[error("Failed to decode staged image: {0}")]
    Decode(image::ImageError),
    #[error("Failed to encode annotated image: {0}")]
    Encode(#[from] image::ImageError),
    #[error("Failed to write labels: {0}")]
    Labels(#[from] io::Error),
}

/// Draws detections onto images, each box with a `class confidence` label.
pub struct Annotator {
    font: FontArc,
}

impl Annotator {
    /// Uses the bundled DejaVu Sans.
    pub fn new() -> Result<Self, AnnotateError> {
        let font =
            FontArc::try_from_slice(DEFAULT_FONT).map_err(|e| AnnotateError::Font(e.to_string()))?;
        Ok(Self { font })
    }

    pub fn with_font_file(path: &Path) -> Result<Self, AnnotateError> {
        let data = fs::read(path).map_err(|e| AnnotateError::Font(format!("{:?}: {}", path, e)))?;
        let font = FontArc::try_from_vec(data).map_err(|e| AnnotateError::Font(e.to_string()))?;
        Ok(Self { font })
    }

    pub fn annotate(&self, image: &mut RgbImage, bboxes: &[BoundingBoxWithLabels]) {
        let (width, height) = (image.width() as i32, image.height() as i32);
        if width == 0 || height == 0 {
            return;
        }

        for bbox in bboxes {
            let x1 = (bbox.x1 as i32).clamp(0, width - 1);
            let y1 = (bbox.y1 as i32).clamp(0, height - 1);
            let x2 = (bbox.x2 as i32).clamp(0, width - 1);
            let y2 = (bbox.y2 as i32).clamp(0, height - 1);
            let color = Rgb([bbox.red, bbox.green, bbox.blue]);

            for inset in 0..BORDER_THICKNESS {
                let rect_width = x2 - x1 - 2 * inset + 1;
                let rect_height = y2 - y1 - 2 * inset + 1;
                if rect_width <= 0 || rect_height <= 0 {
                    break;
                }
                let rect = Rect::at(x1 + inset, y1 + inset)
                    .of_size(rect_width as u32, rect_height as u32);
                draw_hollow_rect_mut(image, rect, color);
            }

            let label = format!("{} {:.2}", bbox.class_label, bbox.confidence);
            let scale = PxScale::from(LABEL_FONT_SIZE);
            let (text_width, text_height) = text_size(scale, &self.font, &label);
            let box_height = text_height as i32 + 2 * LABEL_PADDING;
            let label_y = if y1 >= box_height { y1 - box_height } else { y1 };
            let background = Rect::at(x1, label_y)
                .of_size(text_width + 2 * LABEL_PADDING as u32, box_height as u32);

            draw_filled_rect_mut(image, background, color);
            draw_text_mut(
                image,
                LABEL_TEXT_COLOR,
                x1 + LABEL_PADDING,
                label_y + LABEL_PADDING,
                scale,
                &self.font,
                &label,
            );
        }
    }
}

/// Label lines as `class xc yc w h [conf]`, coordinates normalised to the image size.
pub fn label_lines(
    bboxes: &[BoundingBoxWithLabels],
    image_width: u32,
    image_height: u32,
    with_confidence: bool,
) -> String {
    let (w, h) = (image_width.max(1) as f32, image_height.max(1) as f32);
    let mut lines = String::new();

    for bbox in bboxes {
        let xc = (bbox.x1 + bbox.x2) / 2. / w;
        let yc = (bbox.y1 + bbox.y2) / 2. / h;
        let bw = (bbox.x2 - bbox.x1) / w;
        let bh = (bbox.y2 - bbox.y1) / h;
        lines.push_str(&format!("{} {} {} {} {}", bbox.class_id, xc, yc, bw, bh));
        if with_confidence {
            lines.push_str(&format!(" {}", bbox.confidence));
        }
        lines.push('\n');
    }
    lines
}

/// Writes the label file; nothing is written when there are no boxes.
pub fn write_labels(
    path: &Path,
    bboxes: &[BoundingBoxWithLabels],
    image_width: u32,
    image_height: u32,
    with_confidence: bool,
) -> Result<bool, AnnotateError> {
    if bboxes.is_empty() {
        return Ok(false);
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(
        path,
        label_lines(bboxes, image_width, image_height, with_confidence),
    )?;
    Ok(true)
}
