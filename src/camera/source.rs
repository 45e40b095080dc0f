//! Frame sources.

use std::process::Command;

use crate::vision::Frame;

use super::CameraError;

/// Supplies successive raster frames on demand.
///
/// Implementations may block; the grabber runs them on a dedicated thread.
pub trait FrameSource: Send {
    fn grab(&mut self) -> Result<Frame, CameraError>;
}

/// Captures frames by running an external command that writes a single
/// encoded image (PNG, JPEG, ...) to stdout.
///
/// # Example
/// ```rust,no_run
/// use tool_aligner::camera::{CommandCamera, FrameSource};
///
/// let mut camera = CommandCamera::from_command_line(
///     "ffmpeg -loglevel error -f v4l2 -i /dev/video0 -frames:v 1 -f image2pipe -vcodec png -",
/// ).unwrap();
/// let frame = camera.grab();
/// ```
#[derive(Debug, Clone)]
pub struct CommandCamera {
    program: String,
    args: Vec<String>,
}

impl CommandCamera {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Split a whitespace separated command line into program and arguments.
    pub fn from_command_line(command: &str) -> Result<Self, CameraError> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| CameraError::CaptureFailed("empty camera command".to_string()))?;
        Ok(Self::new(program, parts.collect()))
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl FrameSource for CommandCamera {
    fn grab(&mut self) -> Result<Frame, CameraError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .output()
            .map_err(|e| CameraError::CaptureFailed(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CameraError::CaptureFailed(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        decode_frame(&output.stdout)
    }
}

/// Decode an encoded image into a frame.
pub fn decode_frame(bytes: &[u8]) -> Result<Frame, CameraError> {
    if bytes.is_empty() {
        return Err(CameraError::ImageReadFailed("no image data".to_string()));
    }
    let image = image::load_from_memory(bytes)
        .map_err(|e| CameraError::ImageReadFailed(e.to_string()))?;
    let frame = image.to_rgb8();
    if frame.width() == 0 || frame.height() == 0 {
        return Err(CameraError::ImageReadFailed("empty frame".to_string()));
    }
    Ok(frame)
}

/// Returns the same frame on every call.
#[derive(Debug, Clone)]
pub struct StillFrameSource {
    frame: Frame,
}

impl StillFrameSource {
    pub fn new(frame: Frame) -> Self {
        Self { frame }
    }
}

impl FrameSource for StillFrameSource {
    fn grab(&mut self) -> Result<Frame, CameraError> {
        Ok(self.frame.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::io::Cursor;

    #[test]
    fn test_from_command_line() {
        let camera = CommandCamera::from_command_line("fswebcam --no-banner --png -1 -").unwrap();
        assert_eq!(camera.program(), "fswebcam");
        assert_eq!(camera.args(), ["--no-banner", "--png", "-1", "-"]);
        assert!(CommandCamera::from_command_line("   ").is_err());
    }

    #[test]
    fn test_decode_png() {
        let image = RgbImage::from_pixel(8, 6, Rgb([1, 2, 3]));
        let mut buffer = Cursor::new(Vec::new());
        image.write_to(&mut buffer, image::ImageFormat::Png).unwrap();

        let frame = decode_frame(&buffer.into_inner()).unwrap();
        assert_eq!(frame.dimensions(), (8, 6));
        assert_eq!(frame.get_pixel(0, 0).0, [1, 2, 3]);
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(matches!(decode_frame(&[]), Err(CameraError::ImageReadFailed(_))));
        assert!(matches!(decode_frame(b"not an image"), Err(CameraError::ImageReadFailed(_))));
    }

    #[test]
    fn test_missing_program_fails() {
        let mut camera = CommandCamera::new("definitely-not-a-camera-binary", Vec::new());
        assert!(matches!(camera.grab(), Err(CameraError::CaptureFailed(_))));
    }
}
