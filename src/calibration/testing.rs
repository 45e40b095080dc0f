//! Fakes shared by the calibration tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::camera::CameraError;
use crate::machine::{DeclaredOffset, MachineError, MachineMotion, MachineStatus, Position};
use crate::vision::{round3, PixelSample, TipLocator};

use super::calibrator::DECAGON;
use super::controller::AbortSignal;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Command {
    Relative(Option<f64>, Option<f64>),
    Absolute(Option<f64>, Option<f64>),
    Load(usize),
    Unload,
    Jerk(f64),
    SetOffset(usize, f64, f64, f64),
    Save,
}

/// Records every command. Tracks position unless frozen.
pub(crate) struct FakeMachine {
    pub commands: Mutex<Vec<Command>>,
    position: Mutex<(f64, f64)>,
    declared: DeclaredOffset,
    frozen: bool,
    fail_on_load: bool,
}

impl FakeMachine {
    pub fn new() -> Self {
        Self {
            commands: Mutex::new(Vec::new()),
            position: Mutex::new((0.0, 0.0)),
            declared: DeclaredOffset::default(),
            frozen: false,
            fail_on_load: false,
        }
    }

    /// Always reports the origin regardless of moves.
    pub fn frozen() -> Self {
        Self {
            frozen: true,
            ..Self::new()
        }
    }

    pub fn failing_tool_change() -> Self {
        Self {
            fail_on_load: true,
            ..Self::new()
        }
    }

    pub fn commands(&self) -> Vec<Command> {
        self.commands.lock().unwrap().clone()
    }

    fn record(&self, command: Command) {
        self.commands.lock().unwrap().push(command);
    }
}

impl MachineMotion for FakeMachine {
    async fn move_relative(&self, x: Option<f64>, y: Option<f64>, _: f64) -> Result<(), MachineError> {
        self.record(Command::Relative(x, y));
        if !self.frozen {
            let mut position = self.position.lock().unwrap();
            position.0 += x.unwrap_or(0.0);
            position.1 += y.unwrap_or(0.0);
        }
        Ok(())
    }

    async fn move_absolute(&self, x: Option<f64>, y: Option<f64>, _: f64) -> Result<(), MachineError> {
        self.record(Command::Absolute(x, y));
        if !self.frozen {
            let mut position = self.position.lock().unwrap();
            position.0 = x.unwrap_or(position.0);
            position.1 = y.unwrap_or(position.1);
        }
        Ok(())
    }

    async fn status(&self) -> Result<MachineStatus, MachineError> {
        Ok(MachineStatus::Idle)
    }

    async fn coordinates(&self) -> Result<Position, MachineError> {
        let (x, y) = *self.position.lock().unwrap();
        Ok(Position::new(round3(x), round3(y), 0.0))
    }

    async fn load_tool(&self, tool: usize) -> Result<(), MachineError> {
        self.record(Command::Load(tool));
        if self.fail_on_load {
            return Err(MachineError::Timeout(60, format!("tool {} to load", tool)));
        }
        Ok(())
    }

    async fn unload_tools(&self) -> Result<(), MachineError> {
        self.record(Command::Unload);
        Ok(())
    }

    async fn tool_offset(&self, _: usize) -> Result<DeclaredOffset, MachineError> {
        Ok(self.declared)
    }

    async fn set_tool_offset(&self, tool: usize, x: f64, y: f64, z: f64) -> Result<(), MachineError> {
        self.record(Command::SetOffset(tool, x, y, z));
        Ok(())
    }

    async fn set_max_jerk(&self, mm_per_min: f64) -> Result<(), MachineError> {
        self.record(Command::Jerk(mm_per_min));
        Ok(())
    }

    async fn save_tool_offsets(&self) -> Result<(), MachineError> {
        self.record(Command::Save);
        Ok(())
    }
}

/// Replays scripted samples, then repeats `fallback`.
pub(crate) struct ScriptedLocator {
    script: VecDeque<Option<PixelSample>>,
    fallback: Option<PixelSample>,
    camera_failure_at: Option<usize>,
    abort_at: Option<(usize, AbortSignal)>,
    pub calls: usize,
    pub resets: usize,
}

impl ScriptedLocator {
    pub fn new(script: Vec<Option<PixelSample>>, fallback: Option<PixelSample>) -> Self {
        Self {
            script: script.into(),
            fallback,
            camera_failure_at: None,
            abort_at: None,
            calls: 0,
            resets: 0,
        }
    }

    /// The camera disconnects on call number `call` (1-based).
    pub fn with_camera_failure_at(mut self, call: usize) -> Self {
        self.camera_failure_at = Some(call);
        self
    }

    /// Raise `signal` during call number `call` (1-based).
    pub fn with_abort_at(mut self, call: usize, signal: AbortSignal) -> Self {
        self.abort_at = Some((call, signal));
        self
    }

    pub fn centered() -> Self {
        Self::new(Vec::new(), Some(pixel(160.0, 120.0)))
    }
}

impl TipLocator for ScriptedLocator {
    async fn locate(&mut self, _samples: usize) -> Result<Option<PixelSample>, CameraError> {
        self.calls += 1;
        if let Some((call, signal)) = &self.abort_at {
            if *call == self.calls {
                signal.abort();
            }
        }
        if self.camera_failure_at == Some(self.calls) {
            return Err(CameraError::Disconnected);
        }
        Ok(self.script.pop_front().unwrap_or(self.fallback))
    }

    fn reset(&mut self) {
        self.resets += 1;
    }
}

/// Sample in a 320x240 frame.
pub(crate) fn pixel(u: f64, v: f64) -> PixelSample {
    PixelSample {
        u,
        v,
        radius: 14.0,
        frame_width: 320,
        frame_height: 240,
    }
}

/// Samples seen during a decagon walk by a camera with Y pointing down.
pub(crate) fn decagon_walk(mm_per_pixel: f64) -> Vec<Option<PixelSample>> {
    std::iter::once((0.0, 0.0))
        .chain(DECAGON.iter().take(9).copied())
        .map(|(x, y)| Some(pixel(160.0 + x / mm_per_pixel, 120.0 - y / mm_per_pixel)))
        .collect()
}
