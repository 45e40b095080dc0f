//! Per-tool calibration state, passed by value through the state machine.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::machine::{DeclaredOffset, MachineError, MachineMotion, Position};
use crate::vision::round3;

use super::transform::TransformMatrix;

/// Machine reference point shared by all tools in a session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControlledPoint {
    pub x: f64,
    pub y: f64,
}

impl ControlledPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Use the machine's current position as the controlled point.
    pub async fn capture<M: MachineMotion>(machine: &M) -> Result<Self, MachineError> {
        let position = machine.coordinates().await?;
        Ok(Self::new(round3(position.x), round3(position.y)))
    }
}

/// Machine position paired with the normalized pixel position seen there.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationPoint {
    pub machine: (f64, f64),
    pub pixel: (f64, f64),
}

/// Where a tool is in the calibration state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationState {
    Uncalibrated,
    Calibrating { step: usize },
    Centering,
    Converged,
}

/// Final result for one tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOffset {
    pub tool: usize,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// Absent when the first calibration move produced no pixel motion.
    pub mm_per_pixel: Option<f64>,
    pub elapsed_seconds: f64,
    /// Corrective moves issued while centering.
    pub moves: u32,
}

/// Everything the controller knows about one tool's run.
#[derive(Debug, Clone)]
pub struct CalibrationSession {
    pub tool: usize,
    pub state: CalibrationState,
    pub points: Vec<CalibrationPoint>,
    pub transform: Option<TransformMatrix>,
    pub mm_per_pixel: Option<f64>,
    pub moves: u32,
    started: Instant,
}

impl CalibrationSession {
    pub fn new(tool: usize) -> Self {
        Self {
            tool,
            state: CalibrationState::Uncalibrated,
            points: Vec::new(),
            transform: None,
            mm_per_pixel: None,
            moves: 0,
            started: Instant::now(),
        }
    }

    /// Start a session that reuses a transform from an earlier tool.
    pub fn with_transform(tool: usize, transform: TransformMatrix, mm_per_pixel: Option<f64>) -> Self {
        let mut session = Self::new(tool);
        session.transform = Some(transform);
        session.mm_per_pixel = mm_per_pixel;
        session
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Uncalibrated → Calibrating at step 0; clears any earlier points.
    pub fn begin_calibration(mut self) -> Self {
        self.points.clear();
        self.transform = None;
        self.state = CalibrationState::Calibrating { step: 0 };
        self
    }

    pub fn advance_step(mut self, step: usize) -> Self {
        self.state = CalibrationState::Calibrating { step };
        self
    }

    pub fn record_point(mut self, point: CalibrationPoint) -> Self {
        self.points.push(point);
        self
    }

    /// Calibrating → Centering with the fitted transform; move counter reset.
    pub fn finish_calibration(mut self, transform: TransformMatrix, mm_per_pixel: Option<f64>) -> Self {
        self.transform = Some(transform);
        self.mm_per_pixel = mm_per_pixel;
        self.begin_centering()
    }

    /// Enter centering with a reset move counter.
    pub fn begin_centering(mut self) -> Self {
        self.moves = 0;
        self.state = CalibrationState::Centering;
        self
    }

    /// Record one corrective move; converges when the offset is zero on both axes.
    pub fn record_move(mut self, offset: (f64, f64)) -> Self {
        self.moves += 1;
        if offset == (0.0, 0.0) {
            self.state = CalibrationState::Converged;
        }
        self
    }

    pub fn is_converged(&self) -> bool {
        self.state == CalibrationState::Converged
    }

    /// Tool offset relative to the controlled point, given where the machine
    /// sits once the tip is centered.
    pub fn tool_offset(
        &self,
        controlled_point: ControlledPoint,
        declared: DeclaredOffset,
        measured: Position,
    ) -> ToolOffset {
        ToolOffset {
            tool: self.tool,
            x: round3(controlled_point.x + declared.x - measured.x),
            y: round3(controlled_point.y + declared.y - measured.y),
            z: round3(declared.z),
            mm_per_pixel: self.mm_per_pixel,
            elapsed_seconds: (self.elapsed().as_secs_f64() * 10.0).round() / 10.0,
            moves: self.moves,
        }
    }
}
