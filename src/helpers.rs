use std::fs;
use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use image::{ImageFormat, ImageReader, RgbImage};
use imageproc::{
    drawing::{draw_hollow_rect_mut, draw_text_mut},
    rect::Rect,
};

use crate::detection::Detection;
use crate::error::{ConfigError, PipelineResult};
use crate::mapping::label_color;

const LABEL_SCALE: f32 = 14.0;
const BOX_THICKNESS: i32 = 2;

/// Draws detections onto the graded image.
pub struct Annotator {
    font: Option<FontVec>,
}

impl Annotator {
    /// Without a font, boxes are drawn but not labeled.
    pub fn new(font_path: Option<&Path>) -> Result<Self, ConfigError> {
        let font = match font_path {
            Some(path) => {
                let font_err = |reason: String| ConfigError::Font {
                    path: path.display().to_string(),
                    reason,
                };
                let data = fs::read(path).map_err(|e| font_err(e.to_string()))?;
                Some(FontVec::try_from_vec(data).map_err(|e| font_err(e.to_string()))?)
            }
            None => None,
        };
        Ok(Self { font })
    }

    pub fn has_labels(&self) -> bool {
        self.font.is_some()
    }

    pub fn draw_boxes(&self, img: &mut RgbImage, detections: &[Detection]) {
        for det in detections {
            let color = label_color(&det.label);
            let c = det.bbox.corners();
            let left = c.x0.round() as i32;
            let top = c.y0.round() as i32;
            let width = (c.x1 - c.x0).round().max(1.0) as i32;
            let height = (c.y1 - c.y0).round().max(1.0) as i32;

            // Nested rectangles give the outline its thickness.
            for inset in 0..BOX_THICKNESS {
                let w = width - 2 * inset;
                let h = height - 2 * inset;
                if w <= 0 || h <= 0 {
                    break;
                }
                let rect = Rect::at(left + inset, top + inset).of_size(w as u32, h as u32);
                draw_hollow_rect_mut(img, rect, color);
            }

            if let Some(font) = &self.font {
                let text_y = top - LABEL_SCALE as i32 - 1;
                draw_text_mut(img, color, left, text_y, PxScale::from(LABEL_SCALE), font, &det.label);
            }
        }
    }

    /// Load `src`, draw `detections` and write the result as JPEG to `dst`.
    pub fn annotate(&self, src: &Path, detections: &[Detection], dst: &Path) -> PipelineResult<()> {
        let mut img = ImageReader::open(src)?
            .with_guessed_format()?
            .decode()?
            .to_rgb8();
        self.draw_boxes(&mut img, detections);
        img.save_with_format(dst, ImageFormat::Jpeg)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::BBox;
    use image::Rgb;

    #[test]
    fn outlines_are_drawn_in_label_colour() {
        let mut img = RgbImage::from_pixel(40, 40, Rgb([255, 255, 255]));
        let det = Detection::new(BBox::new(20.0, 20.0, 20.0, 10.0), 0.9, "Normal");
        Annotator::new(None).unwrap().draw_boxes(&mut img, &[det]);

        let blue = Rgb([0, 0, 255]);
        // Outer and inner ring of the 2px outline, interior untouched.
        assert_eq!(*img.get_pixel(10, 15), blue);
        assert_eq!(*img.get_pixel(11, 16), blue);
        assert_eq!(*img.get_pixel(20, 20), Rgb([255, 255, 255]));
    }

    #[test]
    fn boxes_outside_the_image_are_clipped() {
        let mut img = RgbImage::new(10, 10);
        let det = Detection::new(BBox::new(-5.0, 50.0, 4.0, 4.0), 0.5, "Heat damage");
        Annotator::new(None).unwrap().draw_boxes(&mut img, &[det]);
        assert!(img.pixels().all(|p| *p == Rgb([0, 0, 0])));
    }

    #[test]
    fn unreadable_font_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("font.ttf");
        fs::write(&path, b"not a font").unwrap();
        assert!(matches!(
            Annotator::new(Some(path.as_path())),
            Err(ConfigError::Font { .. })
        ));
        assert!(!Annotator::new(None).unwrap().has_labels());
    }

    #[test]
    fn annotate_writes_a_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("in.png");
        let dst = dir.path().join("out.jpg");
        RgbImage::from_pixel(32, 32, Rgb([200, 200, 200])).save(&src).unwrap();

        let det = Detection::new(BBox::new(16.0, 16.0, 10.0, 10.0), 0.7, "Mold damage");
        Annotator::new(None).unwrap().annotate(&src, &[det], &dst).unwrap();

        let out = image::open(&dst).unwrap().to_rgb8();
        assert_eq!(out.dimensions(), (32, 32));
    }
}
