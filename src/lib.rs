// Copyright 2025 ModerRAS (Rust implementation)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # Tool Aligner
//!
//! Camera-guided tool offset calibration for multi-tool motion machines.
//!
//! A fixed camera looks up at the nozzle of the loaded tool. For each tool the
//! engine walks a small decagon to learn how machine motion maps onto the
//! image, then nudges the carriage until the tip sits in the middle of the
//! frame. The carriage position at that point, compared with a shared
//! controlled point, gives the tool's offset.
//!
//! ## Example
//!
//! ```rust,no_run
//! use tool_aligner::calibration::{AlignConfig, ControlledPoint, ConvergenceController};
//! use tool_aligner::camera::{CommandCamera, FrameGrabber};
//! use tool_aligner::machine::{DuetClient, DuetConfig};
//! use tool_aligner::vision::VisionLocator;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let machine = DuetClient::new(DuetConfig::default().with_base_url("http://duet.local"))?;
//!     machine.connect().await?;
//!
//!     let camera = CommandCamera::from_command_line("fswebcam --no-banner --png -1 -")?;
//!     let locator = VisionLocator::new(FrameGrabber::spawn(camera)?);
//!
//!     let mut controller = ConvergenceController::new(machine, locator, AlignConfig::default());
//!     let offsets = controller
//!         .run_session(ControlledPoint::new(150.0, 100.0), &[0, 1])
//!         .await?;
//!
//!     for offset in offsets {
//!         println!("T{}: X{:.3} Y{:.3}", offset.tool, offset.x, offset.y);
//!     }
//!     Ok(())
//! }
//! ```

pub mod calibration;
pub mod camera;
pub mod machine;
pub mod progress;
pub mod settings;
pub mod simulation;
pub mod vision;

pub use calibration::{
    AbortSignal, AlignConfig, CalibrationError, ControlledPoint, ConvergenceController, SessionReport,
    ToolOffset, TransformMatrix,
};
pub use camera::{CameraError, FrameSource};
pub use machine::{MachineError, MachineMotion};
pub use progress::{ProgressCallback, ProgressEvent};
pub use settings::AlignSettings;
