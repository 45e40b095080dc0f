//! Tip locator: frames in, averaged tip positions out.

use std::sync::Arc;

use crate::camera::{CameraError, FrameFeed};
use crate::progress::{ProgressCallback, ProgressEvent};

use super::averager::{DetectionSource, PixelSample, SampleAverager, DEFAULT_RETRY_BUDGET};
use super::cascade::{Detection, DetectorCascade};
use super::frame::AnnotatedFrame;
use super::preprocess::DEFAULT_GAMMA;

/// Produces averaged tool-tip pixel positions.
///
/// `Ok(None)` means the detector could not lock on within its retry budget.
#[allow(async_fn_in_trait)]
pub trait TipLocator {
    async fn locate(&mut self, samples: usize) -> Result<Option<PixelSample>, CameraError>;

    /// Called when a new tool is loaded so cached detector state can be dropped.
    fn reset(&mut self) {}
}

/// Locator backed by a frame feed and the detector cascade.
pub struct VisionLocator<F> {
    feed: F,
    cascade: DetectorCascade,
    retry_budget: usize,
    progress: Option<ProgressCallback>,
}

impl<F: FrameFeed> VisionLocator<F> {
    pub fn new(feed: F) -> Self {
        Self {
            feed,
            cascade: DetectorCascade::new(DEFAULT_GAMMA),
            retry_budget: DEFAULT_RETRY_BUDGET,
            progress: None,
        }
    }

    /// Set the gamma used by the preprocessing pipelines.
    pub fn with_gamma(mut self, gamma: f64) -> Self {
        self.cascade = DetectorCascade::new(gamma);
        self
    }

    /// Set the consecutive failure budget of the averager.
    pub fn with_retry_budget(mut self, retry_budget: usize) -> Self {
        self.retry_budget = retry_budget;
        self
    }

    /// Receive annotated frames for display.
    pub fn with_progress_callback<C>(mut self, callback: C) -> Self
    where
        C: Fn(&ProgressEvent) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(callback));
        self
    }

    pub fn with_shared_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn cascade(&self) -> &DetectorCascade {
        &self.cascade
    }
}

impl<F: FrameFeed> DetectionSource for VisionLocator<F> {
    async fn next_detection(&mut self) -> Result<Detection, CameraError> {
        let frame = self.feed.next_frame().await?;
        let detection = self.cascade.detect(&frame);
        if let Some(ref callback) = self.progress {
            callback(&ProgressEvent::Frame(AnnotatedFrame::new(&frame, detection)));
        }
        Ok(detection)
    }
}

impl<F: FrameFeed> TipLocator for VisionLocator<F> {
    async fn locate(&mut self, samples: usize) -> Result<Option<PixelSample>, CameraError> {
        let averager = SampleAverager::new(samples, self.retry_budget);
        averager.sample(self).await
    }

    fn reset(&mut self) {
        self.cascade.reset();
    }
}
