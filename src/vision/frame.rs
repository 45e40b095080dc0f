//! Frame types shared by the camera and vision modules.

use base64::{engine::general_purpose::STANDARD, Engine};
use image::{ImageError, Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_circle_mut, draw_line_segment_mut};
use std::io::Cursor;

use super::cascade::Detection;

/// A single camera raster. Consumed by one detection cycle, then dropped.
pub type Frame = RgbImage;

const CROSSHAIR_COLOR: Rgb<u8> = Rgb([0, 200, 255]);
const LOCKED_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

/// A frame with the detector result drawn on top, for display only.
#[derive(Debug, Clone)]
pub struct AnnotatedFrame {
    pub image: RgbImage,
    pub detection: Detection,
}

impl AnnotatedFrame {
    /// Draw the frame-center crosshair and, when present, the detected blob.
    pub fn new(frame: &Frame, detection: Detection) -> Self {
        let mut image = frame.clone();
        let (w, h) = (image.width() as f32, image.height() as f32);

        draw_line_segment_mut(&mut image, (w / 2.0, 0.0), (w / 2.0, h), CROSSHAIR_COLOR);
        draw_line_segment_mut(&mut image, (0.0, h / 2.0), (w, h / 2.0), CROSSHAIR_COLOR);

        if let Some((u, v)) = detection.position {
            let center = (u.round() as i32, v.round() as i32);
            let radius = detection.radius.round().max(1.0) as i32;
            draw_hollow_circle_mut(&mut image, center, radius, LOCKED_COLOR);
            draw_hollow_circle_mut(&mut image, center, radius + 1, LOCKED_COLOR);
            draw_line_segment_mut(
                &mut image,
                (u as f32 - 5.0, v as f32),
                (u as f32 + 5.0, v as f32),
                LOCKED_COLOR,
            );
            draw_line_segment_mut(
                &mut image,
                (u as f32, v as f32 - 5.0),
                (u as f32, v as f32 + 5.0),
                LOCKED_COLOR,
            );
        }

        Self { image, detection }
    }

    /// Encode the annotated image as a base64 PNG string.
    pub fn to_base64_png(&self) -> Result<String, ImageError> {
        let mut buffer = Cursor::new(Vec::new());
        self.image.write_to(&mut buffer, image::ImageFormat::Png)?;
        Ok(STANDARD.encode(buffer.into_inner()))
    }
}
