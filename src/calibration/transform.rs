//! Quadratic camera-to-machine transform.
//!
//! Maps a normalized pixel position `(x, y)` through the feature vector
//! `[x², y², xy, x, y, 1]` onto machine XY:
//! ```text
//! [X, Y] = feature(x, y) · M        (M is 6×2)
//! ```

use nalgebra::{DMatrix, SMatrix};
use serde::{Deserialize, Serialize};

/// Singular values below this are treated as zero when solving.
const SVD_EPSILON: f64 = 1e-10;

/// Feature vector for a normalized pixel position.
pub fn feature(x: f64, y: f64) -> [f64; 6] {
    [x * x, y * y, x * y, x, y, 1.0]
}

/// Pixel position as a fraction of the frame, centered at zero.
pub fn normalize_pixel(u: f64, v: f64, width: u32, height: u32) -> (f64, f64) {
    (u / width as f64 - 0.5, v / height as f64 - 0.5)
}

/// 6×2 coefficient matrix from normalized pixels to machine XY.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransformMatrix {
    coefficients: [[f64; 2]; 6],
}

impl TransformMatrix {
    pub fn from_coefficients(coefficients: [[f64; 2]; 6]) -> Self {
        Self { coefficients }
    }

    pub fn coefficients(&self) -> &[[f64; 2]; 6] {
        &self.coefficients
    }

    /// Least-squares fit of `feature(pixel) · M ≈ machine`.
    ///
    /// Uses the SVD minimum-norm solution, so rank deficient inputs (all
    /// points on a circle, or all identical) still produce a usable matrix.
    /// Returns `None` when `pixels` and `machine` differ in length or are empty.
    pub fn fit(pixels: &[(f64, f64)], machine: &[(f64, f64)]) -> Option<Self> {
        let n = pixels.len();
        if n == 0 || n != machine.len() {
            return None;
        }

        let a_data: Vec<f64> = pixels.iter().flat_map(|&(x, y)| feature(x, y)).collect();
        let b_data: Vec<f64> = machine.iter().flat_map(|&(mx, my)| [mx, my]).collect();
        let a = DMatrix::from_row_slice(n, 6, &a_data);
        let b = DMatrix::from_row_slice(n, 2, &b_data);

        let svd = a.svd(true, true);
        let solution = svd.solve(&b, SVD_EPSILON).ok()?;

        let mut coefficients = [[0.0; 2]; 6];
        for (row, coefficient) in coefficients.iter_mut().enumerate() {
            coefficient[0] = solution[(row, 0)];
            coefficient[1] = solution[(row, 1)];
        }
        if coefficients.iter().flatten().any(|c| !c.is_finite()) {
            return None;
        }
        Some(Self { coefficients })
    }

    fn apply(&self, features: [f64; 6]) -> (f64, f64) {
        let m = SMatrix::<f64, 6, 2>::from_fn(|r, c| self.coefficients[r][c]);
        let f = SMatrix::<f64, 1, 6>::from_row_slice(&features);
        let out = f * m;
        (out[(0, 0)], out[(0, 1)])
    }

    /// Machine position that puts the tip at normalized pixel `(x, y)`.
    pub fn project(&self, x: f64, y: f64) -> (f64, f64) {
        self.apply(feature(x, y))
    }

    /// Machine position that centers the tip in the frame.
    pub fn camera_center(&self) -> (f64, f64) {
        self.project(0.0, 0.0)
    }

    /// Machine displacement corresponding to a normalized pixel error,
    /// i.e. `project(x, y) - project(0, 0)`.
    pub fn displacement(&self, x: f64, y: f64) -> (f64, f64) {
        let mut features = feature(x, y);
        features[5] = 0.0;
        self.apply(features)
    }
}
