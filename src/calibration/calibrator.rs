//! Camera-to-machine transform calibration.
//!
//! The carriage walks a small decagon around its starting position. At the
//! origin and at nine of the ten vertices the tip is located in the frame and
//! paired with the machine position, and a quadratic transform is fitted to
//! the collected points. The walk finishes by moving to the position the
//! transform predicts for the frame center.

use crate::machine::{wait_until_idle, MachineMotion};
use crate::progress::{self, ProgressCallback};
use crate::vision::{round3, PixelSample, TipLocator};

use super::config::AlignConfig;
use super::controller::AbortSignal;
use super::session::{CalibrationPoint, CalibrationSession};
use super::transform::TransformMatrix;
use super::CalibrationError;

/// Decagon vertices relative to the starting position, in millimeters.
pub const DECAGON: [(f64, f64); 10] = [
    (0.0, -0.5),
    (0.294, -0.405),
    (0.476, -0.155),
    (0.476, 0.155),
    (0.294, 0.405),
    (0.0, 0.5),
    (-0.294, 0.405),
    (-0.476, 0.155),
    (-0.476, -0.155),
    (-0.294, -0.405),
];

/// Calibration points per run: the origin plus nine vertices.
pub const CALIBRATION_STEPS: usize = 10;

/// Distance between the origin and the first vertex, in millimeters.
const FIRST_MOVE_MM: f64 = 0.5;

/// Relative move from point `step - 1` to point `step`.
pub fn step_move(step: usize) -> (f64, f64) {
    match step {
        0 => (0.0, 0.0),
        1 => DECAGON[0],
        _ => {
            let (from, to) = (DECAGON[step - 2], DECAGON[step - 1]);
            (round3(to.0 - from.0), round3(to.1 - from.1))
        }
    }
}

/// Millimeters per pixel from the first calibration move.
pub fn mm_per_pixel(origin: &PixelSample, first: &PixelSample) -> Option<f64> {
    let distance = origin.distance_to(first);
    if distance > 0.0 {
        Some(FIRST_MOVE_MM / distance)
    } else {
        None
    }
}

/// Turns a zero axis into "don't move this axis".
pub(crate) fn axis(value: f64) -> Option<f64> {
    if value == 0.0 {
        None
    } else {
        Some(value)
    }
}

/// False when the carriage moved between points but the pixel never did.
///
/// A detector locked onto something fixed in the frame looks like this, and
/// fitting it would park every tool at the same spot.
fn tip_followed_carriage(points: &[CalibrationPoint]) -> bool {
    let Some(first) = points.first() else {
        return true;
    };
    let carriage_moved = points.iter().any(|p| p.machine != first.machine);
    let pixel_moved = points.iter().any(|p| p.pixel != first.pixel);
    pixel_moved || !carriage_moved
}

/// Runs the decagon walk and fits the transform.
pub struct TransformCalibrator<'a> {
    config: &'a AlignConfig,
    abort: &'a AbortSignal,
    progress: &'a Option<ProgressCallback>,
}

impl<'a> TransformCalibrator<'a> {
    pub fn new(config: &'a AlignConfig, abort: &'a AbortSignal, progress: &'a Option<ProgressCallback>) -> Self {
        Self {
            config,
            abort,
            progress,
        }
    }

    /// Calibrate from the current carriage position.
    ///
    /// Returns the session in the centering state with the fitted transform,
    /// parked at the predicted camera center.
    pub async fn run<M, L>(
        &self,
        machine: &M,
        locator: &mut L,
        session: CalibrationSession,
    ) -> Result<CalibrationSession, CalibrationError>
    where
        M: MachineMotion,
        L: TipLocator,
    {
        let tool = session.tool;
        let mut session = session.begin_calibration();
        let mut origin: Option<PixelSample> = None;
        let mut first: Option<PixelSample> = None;

        for step in 0..CALIBRATION_STEPS {
            self.abort.check()?;
            session = session.advance_step(step);

            if step > 0 {
                let (dx, dy) = step_move(step);
                machine.move_relative(axis(dx), axis(dy), self.config.move_speed).await?;
                wait_until_idle(machine, self.config.poll_interval).await?;
            }

            let Some(sample) = locator.locate(self.config.calibration_samples).await? else {
                tracing::warn!("Tool {}: no tip found at calibration step {}, skipping", tool, step);
                progress::status(
                    self.progress,
                    format!("Tool {}: calibration step {} failed, skipping", tool, step),
                );
                continue;
            };

            let position = machine.coordinates().await?;
            tracing::debug!(
                "Tool {} step {}: machine ({:.3}, {:.3}) pixel ({:.3}, {:.3})",
                tool,
                step,
                position.x,
                position.y,
                sample.u,
                sample.v
            );
            match step {
                0 => origin = Some(sample),
                1 => first = Some(sample),
                _ => {}
            }
            session = session.record_point(CalibrationPoint {
                machine: (position.x, position.y),
                pixel: sample.normalized(),
            });
        }

        let collected = session.points.len();
        if collected < 2 {
            return Err(CalibrationError::InsufficientPoints { tool, collected });
        }
        if !tip_followed_carriage(&session.points) {
            tracing::warn!("Tool {}: tip stayed put in the frame while the carriage walked", tool);
            return Err(CalibrationError::DegenerateTransform { tool });
        }

        let mm_per_pixel = match (origin, first) {
            (Some(origin), Some(first)) => mm_per_pixel(&origin, &first),
            _ => None,
        };
        if mm_per_pixel.is_none() {
            tracing::warn!("Tool {}: first calibration move produced no pixel motion", tool);
        }

        let pixels: Vec<(f64, f64)> = session.points.iter().map(|p| p.pixel).collect();
        let positions: Vec<(f64, f64)> = session.points.iter().map(|p| p.machine).collect();
        let transform = TransformMatrix::fit(&pixels, &positions)
            .ok_or(CalibrationError::DegenerateTransform { tool })?;

        let (cx, cy) = transform.camera_center();
        progress::status(
            self.progress,
            format!(
                "Tool {}: calibrated from {} points, camera center at ({:.3}, {:.3})",
                tool, collected, cx, cy
            ),
        );
        machine
            .move_absolute(Some(round3(cx)), Some(round3(cy)), self.config.move_speed)
            .await?;
        wait_until_idle(machine, self.config.poll_interval).await?;

        Ok(session.finish_calibration(transform, mm_per_pixel))
    }
}
