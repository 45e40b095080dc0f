//! Simulated machine and camera for dry runs.
//!
//! The rig models a fixed camera looking at the nozzle of the loaded tool.
//! The tip sits at `carriage + true_offset - declared_offset`, so a session
//! against the camera center recovers each tool's true offset.

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_filled_circle_mut;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::camera::{CameraError, FrameSource};
use crate::machine::{DeclaredOffset, MachineError, MachineMotion, MachineStatus, Position};
use crate::vision::{round3, Frame};

const BACKGROUND: Rgb<u8> = Rgb([235, 235, 235]);
const NOZZLE: Rgb<u8> = Rgb([15, 15, 15]);

/// A tool as the simulation sees it.
#[derive(Debug, Clone, Copy)]
pub struct SimulatedTool {
    /// Where the nozzle really is relative to the carriage.
    pub true_offset: (f64, f64),
    /// What the machine's tool table says.
    pub declared: DeclaredOffset,
}

#[derive(Debug)]
struct RigState {
    camera_center: (f64, f64),
    mm_per_pixel: f64,
    width: u32,
    height: u32,
    tip_radius: i32,
    tools: BTreeMap<usize, SimulatedTool>,
    position: (f64, f64),
    loaded: Option<usize>,
}

impl RigState {
    /// Pixel position of the loaded tool's tip.
    fn tip_pixel(&self) -> Option<(f64, f64)> {
        let tool = self.tools.get(&self.loaded?)?;
        let tip_x = self.position.0 + tool.true_offset.0 - tool.declared.x;
        let tip_y = self.position.1 + tool.true_offset.1 - tool.declared.y;
        Some((
            self.width as f64 / 2.0 + (tip_x - self.camera_center.0) / self.mm_per_pixel,
            self.height as f64 / 2.0 - (tip_y - self.camera_center.1) / self.mm_per_pixel,
        ))
    }

    fn render(&self) -> Frame {
        let mut frame = RgbImage::from_pixel(self.width, self.height, BACKGROUND);
        if let Some((u, v)) = self.tip_pixel() {
            draw_filled_circle_mut(&mut frame, (u.round() as i32, v.round() as i32), self.tip_radius, NOZZLE);
        }
        frame
    }
}

/// Shared state behind a simulated machine and camera pair.
#[derive(Debug, Clone)]
pub struct SimulatedRig {
    state: Arc<Mutex<RigState>>,
}

impl SimulatedRig {
    /// Rig whose camera is centered on machine position `camera_center`.
    pub fn new(camera_center: (f64, f64)) -> Self {
        Self {
            state: Arc::new(Mutex::new(RigState {
                camera_center,
                mm_per_pixel: 0.02,
                width: 320,
                height: 240,
                tip_radius: 14,
                tools: BTreeMap::new(),
                position: (0.0, 0.0),
                loaded: None,
            })),
        }
    }

    /// Three tools with small, distinct misalignments.
    pub fn demo(camera_center: (f64, f64)) -> Self {
        Self::new(camera_center)
            .with_tool(0, (0.0, 0.0), DeclaredOffset::default())
            .with_tool(
                1,
                (-12.27, 7.84),
                DeclaredOffset {
                    x: -12.0,
                    y: 8.0,
                    z: -1.5,
                },
            )
            .with_tool(
                2,
                (24.61, -0.33),
                DeclaredOffset {
                    x: 24.8,
                    y: -0.1,
                    z: -0.75,
                },
            )
    }

    pub fn with_tool(self, tool: usize, true_offset: (f64, f64), declared: DeclaredOffset) -> Self {
        self.lock().tools.insert(tool, SimulatedTool { true_offset, declared });
        self
    }

    pub fn machine(&self) -> SimulatedMachine {
        SimulatedMachine { rig: self.clone() }
    }

    pub fn camera(&self) -> SimulatedCamera {
        SimulatedCamera { rig: self.clone() }
    }

    pub fn tool(&self, tool: usize) -> Option<SimulatedTool> {
        self.lock().tools.get(&tool).copied()
    }

    pub fn position(&self) -> (f64, f64) {
        self.lock().position
    }

    pub fn loaded_tool(&self) -> Option<usize> {
        self.lock().loaded
    }

    fn lock(&self) -> MutexGuard<'_, RigState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Machine half of the rig. Moves complete instantly.
#[derive(Debug, Clone)]
pub struct SimulatedMachine {
    rig: SimulatedRig,
}

impl MachineMotion for SimulatedMachine {
    async fn move_relative(&self, x: Option<f64>, y: Option<f64>, _speed: f64) -> Result<(), MachineError> {
        let mut state = self.rig.lock();
        state.position.0 += x.unwrap_or(0.0);
        state.position.1 += y.unwrap_or(0.0);
        Ok(())
    }

    async fn move_absolute(&self, x: Option<f64>, y: Option<f64>, _speed: f64) -> Result<(), MachineError> {
        let mut state = self.rig.lock();
        if let Some(x) = x {
            state.position.0 = x;
        }
        if let Some(y) = y {
            state.position.1 = y;
        }
        Ok(())
    }

    async fn status(&self) -> Result<MachineStatus, MachineError> {
        Ok(MachineStatus::Idle)
    }

    async fn coordinates(&self) -> Result<Position, MachineError> {
        let (x, y) = self.rig.lock().position;
        Ok(Position::new(round3(x), round3(y), 0.0))
    }

    async fn load_tool(&self, tool: usize) -> Result<(), MachineError> {
        let mut state = self.rig.lock();
        if !state.tools.contains_key(&tool) {
            return Err(MachineError::ParseError(format!("tool {} not defined", tool)));
        }
        state.loaded = Some(tool);
        Ok(())
    }

    async fn unload_tools(&self) -> Result<(), MachineError> {
        self.rig.lock().loaded = None;
        Ok(())
    }

    async fn tool_offset(&self, tool: usize) -> Result<DeclaredOffset, MachineError> {
        self.rig
            .tool(tool)
            .map(|t| t.declared)
            .ok_or_else(|| MachineError::ParseError(format!("tool {} not defined", tool)))
    }

    async fn set_tool_offset(&self, tool: usize, x: f64, y: f64, z: f64) -> Result<(), MachineError> {
        let mut state = self.rig.lock();
        let entry = state
            .tools
            .get_mut(&tool)
            .ok_or_else(|| MachineError::ParseError(format!("tool {} not defined", tool)))?;
        entry.declared = DeclaredOffset { x, y, z };
        Ok(())
    }

    async fn set_max_jerk(&self, _mm_per_min: f64) -> Result<(), MachineError> {
        Ok(())
    }
}

/// Camera half of the rig.
#[derive(Debug, Clone)]
pub struct SimulatedCamera {
    rig: SimulatedRig,
}

impl FrameSource for SimulatedCamera {
    fn grab(&mut self) -> Result<Frame, CameraError> {
        Ok(self.rig.lock().render())
    }
}
