//! Camera module: frame sources and the producer/consumer frame hand-off.

mod grabber;
mod source;

pub use grabber::{DirectFeed, FrameFeed, FrameGrabber};
pub use source::{decode_frame, CommandCamera, FrameSource, StillFrameSource};

use thiserror::Error;

/// Camera errors.
#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Failed to capture frame: {0}")]
    CaptureFailed(String),
    #[error("Failed to read image: {0}")]
    ImageReadFailed(String),
    #[error("Frame grabber disconnected")]
    Disconnected,
}
