//! Vision-guided tool offset calibration.

pub mod calibrator;
mod config;
mod controller;
mod report;
mod session;
mod transform;

#[cfg(test)]
pub(crate) mod testing;

pub use calibrator::{TransformCalibrator, CALIBRATION_STEPS, DECAGON};
pub use config::{AlignConfig, DEFAULT_DAMPING};
pub use controller::{apply_offsets, corrective_offset, AbortSignal, ConvergenceController};
pub use report::SessionReport;
pub use session::{CalibrationPoint, CalibrationSession, CalibrationState, ControlledPoint, ToolOffset};
pub use transform::{feature, normalize_pixel, TransformMatrix};

use thiserror::Error;

use crate::camera::CameraError;
use crate::machine::MachineError;

/// Fatal calibration errors. Each one ends the session.
#[derive(Error, Debug)]
pub enum CalibrationError {
    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("Machine error: {0}")]
    Machine(#[from] MachineError),
    #[error("Tool {tool}: only {collected} calibration point(s) collected")]
    InsufficientPoints { tool: usize, collected: usize },
    #[error("Tool {tool}: calibration points do not determine a transform")]
    DegenerateTransform { tool: usize },
    #[error("Tool {tool}: not converged after {moves} corrective moves")]
    NotConverged { tool: usize, moves: u32 },
    #[error("Calibration aborted")]
    Aborted,
}
