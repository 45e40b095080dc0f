//! Machine motion interface and drivers.

mod duet;
pub mod gcode;

pub use duet::{DuetClient, DuetConfig};

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Machine communication errors.
#[derive(Error, Debug)]
pub enum MachineError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Failed to parse response: {0}")]
    ParseError(String),
    #[error("Machine halted")]
    Halted,
    #[error("Timed out after {0}s waiting for {1}")]
    Timeout(u64, String),
}

/// Motion state reported by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineStatus {
    Idle,
    Processing,
    Paused,
}

/// Machine XYZ position in millimeters.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// Declared tool offset as stored in the machine's tool table.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DeclaredOffset {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Commands the calibration engine needs from a machine.
///
/// Move commands return once the command is accepted; callers poll
/// [`MachineMotion::status`] for completion. Tool changes block until done.
#[allow(async_fn_in_trait)]
pub trait MachineMotion {
    async fn move_relative(&self, x: Option<f64>, y: Option<f64>, speed: f64) -> Result<(), MachineError>;
    async fn move_absolute(&self, x: Option<f64>, y: Option<f64>, speed: f64) -> Result<(), MachineError>;
    async fn status(&self) -> Result<MachineStatus, MachineError>;
    async fn coordinates(&self) -> Result<Position, MachineError>;
    async fn load_tool(&self, tool: usize) -> Result<(), MachineError>;
    async fn unload_tools(&self) -> Result<(), MachineError>;
    async fn tool_offset(&self, tool: usize) -> Result<DeclaredOffset, MachineError>;
    async fn set_tool_offset(&self, tool: usize, x: f64, y: f64, z: f64) -> Result<(), MachineError>;
    /// Limit XY jerk for small corrective moves.
    async fn set_max_jerk(&self, mm_per_min: f64) -> Result<(), MachineError>;
    /// Persist the tool table, if the machine supports it.
    async fn save_tool_offsets(&self) -> Result<(), MachineError> {
        Ok(())
    }
}

/// Poll until the machine reports idle.
///
/// There is deliberately no timeout here; drivers may impose one.
pub async fn wait_until_idle<M: MachineMotion>(machine: &M, poll_interval: Duration) -> Result<(), MachineError> {
    loop {
        match machine.status().await? {
            MachineStatus::Idle => return Ok(()),
            MachineStatus::Processing | MachineStatus::Paused => {
                tokio::time::sleep(poll_interval).await;
            }
        }
    }
}
