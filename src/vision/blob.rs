//! Contour based blob extraction with shape filters.
//!
//! Blobs are dark regions of a binarized frame. Each outer contour is measured
//! with polygon moments and filtered on area, circularity, convexity and
//! inertia ratio.

use image::{DynamicImage, GrayImage, Luma};
use imageproc::contours::{find_contours, BorderType};
use imageproc::geometry::convex_hull;
use imageproc::point::Point;
use std::f64::consts::PI;

use super::frame::Frame;

/// Luma level separating dark blob pixels from background.
pub const BINARY_LEVEL: u8 = 128;

/// Shape filter profile for blob extraction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlobParams {
    pub min_area: f64,
    pub max_area: f64,
    pub min_circularity: f64,
    pub min_convexity: f64,
    pub min_inertia_ratio: f64,
}

impl BlobParams {
    /// Tight filters for clean, round tip silhouettes.
    pub fn standard() -> Self {
        Self {
            min_area: 400.0,
            max_area: 900.0,
            min_circularity: 0.8,
            min_convexity: 0.8,
            min_inertia_ratio: 0.8,
        }
    }

    /// Loose filters for larger or irregular tips.
    pub fn relaxed() -> Self {
        Self {
            min_area: 600.0,
            max_area: 15000.0,
            min_circularity: 0.3,
            min_convexity: 0.6,
            min_inertia_ratio: 0.3,
        }
    }

    fn accepts(&self, shape: &BlobShape) -> bool {
        shape.area >= self.min_area
            && shape.area < self.max_area
            && shape.circularity >= self.min_circularity
            && shape.convexity >= self.min_convexity
            && shape.inertia_ratio >= self.min_inertia_ratio
    }
}

/// A blob that passed the filters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Blob {
    pub x: f64,
    pub y: f64,
    /// Diameter in pixels.
    pub size: f64,
}

#[derive(Debug, Clone, Copy)]
struct BlobShape {
    area: f64,
    cx: f64,
    cy: f64,
    circularity: f64,
    convexity: f64,
    inertia_ratio: f64,
}

/// Find all blobs in a preprocessed frame that satisfy `params`.
pub fn detect_blobs(frame: &Frame, params: &BlobParams) -> Vec<Blob> {
    let gray = DynamicImage::ImageRgb8(frame.clone()).to_luma8();
    // find_contours traces non-zero pixels, so dark blobs become foreground.
    let mask = GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        if gray.get_pixel(x, y)[0] < BINARY_LEVEL {
            Luma([255])
        } else {
            Luma([0])
        }
    });

    let mut blobs = Vec::new();
    for contour in find_contours::<i32>(&mask) {
        if contour.border_type != BorderType::Outer || contour.points.len() < 3 {
            continue;
        }
        let Some(shape) = measure(&contour.points) else {
            continue;
        };
        if !params.accepts(&shape) {
            continue;
        }

        let (px, py) = (shape.cx.round(), shape.cy.round());
        if px < 0.0 || py < 0.0 || px >= mask.width() as f64 || py >= mask.height() as f64 {
            continue;
        }
        if mask.get_pixel(px as u32, py as u32)[0] == 0 {
            continue;
        }

        let radius = median_radius(&contour.points, shape.cx, shape.cy);
        blobs.push(Blob {
            x: shape.cx,
            y: shape.cy,
            size: radius * 2.0,
        });
    }
    blobs
}

/// Raw and central polygon moments of a closed contour.
fn measure(points: &[Point<i32>]) -> Option<BlobShape> {
    let n = points.len();
    let (mut m00, mut m10, mut m01) = (0.0, 0.0, 0.0);
    let (mut m20, mut m11, mut m02) = (0.0, 0.0, 0.0);
    let mut perimeter = 0.0;

    for i in 0..n {
        let (x0, y0) = (points[i].x as f64, points[i].y as f64);
        let next = points[(i + 1) % n];
        let (x1, y1) = (next.x as f64, next.y as f64);

        let a = x0 * y1 - x1 * y0;
        m00 += a;
        m10 += (x0 + x1) * a;
        m01 += (y0 + y1) * a;
        m20 += (x0 * x0 + x0 * x1 + x1 * x1) * a;
        m02 += (y0 * y0 + y0 * y1 + y1 * y1) * a;
        m11 += (x0 * y1 + 2.0 * x0 * y0 + 2.0 * x1 * y1 + x1 * y0) * a;
        perimeter += ((x1 - x0).powi(2) + (y1 - y0).powi(2)).sqrt();
    }

    m00 /= 2.0;
    m10 /= 6.0;
    m01 /= 6.0;
    m20 /= 12.0;
    m02 /= 12.0;
    m11 /= 24.0;

    // Contour orientation decides the sign of every moment.
    if m00 < 0.0 {
        m00 = -m00;
        m10 = -m10;
        m01 = -m01;
        m20 = -m20;
        m02 = -m02;
        m11 = -m11;
    }
    if m00 < f64::EPSILON || perimeter < f64::EPSILON {
        return None;
    }

    let cx = m10 / m00;
    let cy = m01 / m00;
    let mu20 = m20 / m00 - cx * cx;
    let mu02 = m02 / m00 - cy * cy;
    let mu11 = m11 / m00 - cx * cy;

    let spread = (((mu20 - mu02) / 2.0).powi(2) + mu11 * mu11).sqrt();
    let major = (mu20 + mu02) / 2.0 + spread;
    let minor = (mu20 + mu02) / 2.0 - spread;
    let inertia_ratio = if major > f64::EPSILON { minor / major } else { 1.0 };

    let hull = convex_hull(points);
    let hull_area = polygon_area(&hull);
    let convexity = if hull_area > f64::EPSILON { m00 / hull_area } else { 0.0 };

    Some(BlobShape {
        area: m00,
        cx,
        cy,
        circularity: 4.0 * PI * m00 / (perimeter * perimeter),
        convexity,
        inertia_ratio,
    })
}

fn polygon_area(points: &[Point<i32>]) -> f64 {
    let n = points.len();
    if n < 3 {
        return 0.0;
    }
    let twice: f64 = (0..n)
        .map(|i| {
            let (p, q) = (points[i], points[(i + 1) % n]);
            p.x as f64 * q.y as f64 - q.x as f64 * p.y as f64
        })
        .sum();
    twice.abs() / 2.0
}

fn median_radius(points: &[Point<i32>], cx: f64, cy: f64) -> f64 {
    let mut distances: Vec<f64> = points
        .iter()
        .map(|p| ((p.x as f64 - cx).powi(2) + (p.y as f64 - cy).powi(2)).sqrt())
        .collect();
    distances.sort_by(|a, b| a.total_cmp(b));
    distances[distances.len() / 2]
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut};
    use imageproc::rect::Rect;

    fn white(width: u32, height: u32) -> RgbImage {
        RgbImage::from_pixel(width, height, Rgb([255, 255, 255]))
    }

    #[test]
    fn test_single_disc_is_found() {
        let mut frame = white(200, 150);
        draw_filled_circle_mut(&mut frame, (90, 70), 14, Rgb([0, 0, 0]));

        let blobs = detect_blobs(&frame, &BlobParams::standard());
        assert_eq!(blobs.len(), 1);
        assert!((blobs[0].x - 90.0).abs() < 1.0);
        assert!((blobs[0].y - 70.0).abs() < 1.0);
        assert!((blobs[0].size / 2.0 - 14.0).abs() < 2.0);
    }

    #[test]
    fn test_area_filter_rejects_small_disc() {
        let mut frame = white(200, 150);
        draw_filled_circle_mut(&mut frame, (90, 70), 5, Rgb([0, 0, 0]));
        assert!(detect_blobs(&frame, &BlobParams::standard()).is_empty());
    }

    #[test]
    fn test_elongated_bar_only_passes_relaxed() {
        let mut frame = white(200, 150);
        draw_filled_rect_mut(&mut frame, Rect::at(40, 60).of_size(90, 14), Rgb([0, 0, 0]));
        assert!(detect_blobs(&frame, &BlobParams::standard()).is_empty());
        assert!(detect_blobs(&frame, &BlobParams::relaxed()).is_empty());

        let mut frame = white(200, 150);
        draw_filled_rect_mut(&mut frame, Rect::at(60, 50).of_size(40, 24), Rgb([0, 0, 0]));
        assert_eq!(detect_blobs(&frame, &BlobParams::relaxed()).len(), 1);
    }

    #[test]
    fn test_ring_fails_polarity_check() {
        let mut frame = white(200, 150);
        draw_filled_circle_mut(&mut frame, (90, 70), 40, Rgb([0, 0, 0]));
        draw_filled_circle_mut(&mut frame, (90, 70), 30, Rgb([255, 255, 255]));
        assert!(detect_blobs(&frame, &BlobParams::relaxed()).is_empty());
    }

    #[test]
    fn test_polygon_area_square() {
        let square = [
            Point::new(0, 0),
            Point::new(10, 0),
            Point::new(10, 10),
            Point::new(0, 10),
        ];
        assert!((polygon_area(&square) - 100.0).abs() < 1e-9);
        let shape = measure(&square).unwrap();
        assert!((shape.cx - 5.0).abs() < 1e-9);
        assert!((shape.cy - 5.0).abs() < 1e-9);
        assert!((shape.inertia_ratio - 1.0).abs() < 1e-9);
        assert!((shape.convexity - 1.0).abs() < 1e-9);
    }
}
