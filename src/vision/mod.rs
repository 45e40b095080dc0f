//! Vision module: preprocessing, blob detection, detector cascade and sample
//! averaging for locating the tool tip in camera frames.

pub mod averager;
pub mod blob;
pub mod cascade;
mod frame;
mod locator;
pub mod preprocess;

pub use averager::{
    round3, DetectionSource, PixelSample, SampleAverager, BURST_SAMPLES, CALIBRATION_SAMPLES,
    DEFAULT_RETRY_BUDGET,
};
pub use blob::{detect_blobs, Blob, BlobParams};
pub use cascade::{default_strategies, Detection, DetectorCascade, DetectorStrategy};
pub use frame::{AnnotatedFrame, Frame};
pub use locator::{TipLocator, VisionLocator};
pub use preprocess::{preprocess, Pipeline, DEFAULT_GAMMA};
