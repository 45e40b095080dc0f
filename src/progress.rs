//! Progress notifications for presentation layers.
//!
//! Events are informational only; nothing in the engine depends on how they
//! are handled.

use std::sync::Arc;

use crate::calibration::ToolOffset;
use crate::vision::AnnotatedFrame;

/// Notification emitted by the engine.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// Human readable status line.
    Status(String),
    /// Camera frame with the detection drawn on top.
    Frame(AnnotatedFrame),
    /// A tool finished calibrating.
    ToolFinished(ToolOffset),
}

/// Callback for progress events, shareable between the locator and controller.
pub type ProgressCallback = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

pub(crate) fn emit(callback: &Option<ProgressCallback>, event: ProgressEvent) {
    if let Some(callback) = callback {
        callback(&event);
    }
}

pub(crate) fn status(callback: &Option<ProgressCallback>, message: impl Into<String>) {
    let message = message.into();
    tracing::info!("{}", message);
    emit(callback, ProgressEvent::Status(message));
}
