//! Multi-frame averaging of detections.

use crate::camera::CameraError;

use super::cascade::Detection;

/// Samples required per position during transform calibration.
pub const CALIBRATION_SAMPLES: usize = 5;

/// Samples required per position in fast burst mode (centering).
pub const BURST_SAMPLES: usize = 3;

/// Consecutive empty or ambiguous detections tolerated before giving up.
pub const DEFAULT_RETRY_BUDGET: usize = 5;

/// Something that produces one detection per call, usually from a fresh frame.
#[allow(async_fn_in_trait)]
pub trait DetectionSource {
    async fn next_detection(&mut self) -> Result<Detection, CameraError>;
}

/// Averaged pixel position of the tool tip.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelSample {
    pub u: f64,
    pub v: f64,
    pub radius: f64,
    pub frame_width: u32,
    pub frame_height: u32,
}

impl PixelSample {
    /// Position as a fraction of the frame, centered at zero.
    pub fn normalized(&self) -> (f64, f64) {
        (
            self.u / self.frame_width as f64 - 0.5,
            self.v / self.frame_height as f64 - 0.5,
        )
    }

    /// Euclidean distance in pixels.
    pub fn distance_to(&self, other: &PixelSample) -> f64 {
        ((self.u - other.u).powi(2) + (self.v - other.v).powi(2)).sqrt()
    }
}

/// Averages `required` successful detections, tolerating up to
/// `retry_budget` consecutive failures.
#[derive(Debug, Clone, Copy)]
pub struct SampleAverager {
    pub required: usize,
    pub retry_budget: usize,
}

impl Default for SampleAverager {
    fn default() -> Self {
        Self::new(CALIBRATION_SAMPLES, DEFAULT_RETRY_BUDGET)
    }
}

impl SampleAverager {
    pub fn new(required: usize, retry_budget: usize) -> Self {
        Self {
            required: required.max(1),
            retry_budget,
        }
    }

    /// Collect detections until the sample is complete or the budget is spent.
    ///
    /// Returns `Ok(None)` when the retry budget is exhausted. Camera errors are
    /// propagated as-is.
    pub async fn sample<S: DetectionSource>(
        &self,
        source: &mut S,
    ) -> Result<Option<PixelSample>, CameraError> {
        let (mut sum_u, mut sum_v, mut sum_r) = (0.0, 0.0, 0.0);
        let mut count = 0usize;
        let mut failures = 0usize;
        let mut frame_size = (0u32, 0u32);

        while count < self.required {
            let detection = source.next_detection().await?;
            match detection.position {
                Some((u, v)) => {
                    sum_u += u;
                    sum_v += v;
                    sum_r += detection.radius;
                    count += 1;
                    failures = 0;
                    frame_size = (detection.frame_width, detection.frame_height);
                }
                None => {
                    failures += 1;
                    if failures >= self.retry_budget {
                        tracing::debug!(
                            "Detector exhausted after {} failed frames ({} of {} samples)",
                            failures,
                            count,
                            self.required
                        );
                        return Ok(None);
                    }
                }
            }
        }

        let n = count as f64;
        Ok(Some(PixelSample {
            u: round3(sum_u / n),
            v: round3(sum_v / n),
            radius: round3(sum_r / n),
            frame_width: frame_size.0,
            frame_height: frame_size.1,
        }))
    }
}

/// Round to three decimals.
pub fn round3(value: f64) -> f64 {
    let rounded = (value * 1000.0).round() / 1000.0;
    // Normalize -0.0 so equality checks against zero behave.
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct Scripted {
        script: VecDeque<Option<(f64, f64)>>,
        calls: usize,
    }

    impl Scripted {
        fn new(script: Vec<Option<(f64, f64)>>) -> Self {
            Self {
                script: script.into(),
                calls: 0,
            }
        }
    }

    impl DetectionSource for Scripted {
        async fn next_detection(&mut self) -> Result<Detection, CameraError> {
            self.calls += 1;
            let position = self.script.pop_front().flatten();
            Ok(Detection {
                position,
                radius: if position.is_some() { 14.0 } else { 0.0 },
                algorithm: position.map(|_| 0),
                frame_width: 640,
                frame_height: 480,
            })
        }
    }

    #[tokio::test]
    async fn test_five_valid_detections_average() {
        let mut source = Scripted::new(vec![Some((100.0, 100.0)); 5]);
        let sample = SampleAverager::new(5, 5).sample(&mut source).await.unwrap().unwrap();
        assert_eq!(sample.u, 100.000);
        assert_eq!(sample.v, 100.000);
        assert_eq!(sample.frame_width, 640);
        assert_eq!(source.calls, 5);
    }

    #[tokio::test]
    async fn test_all_failing_is_absent_after_budget() {
        let mut source = Scripted::new(vec![None; 20]);
        let sample = SampleAverager::new(5, 5).sample(&mut source).await.unwrap();
        assert!(sample.is_none());
        assert_eq!(source.calls, 5);
    }

    #[tokio::test]
    async fn test_interleaved_failures_are_tolerated() {
        let script = vec![
            Some((10.0, 20.0)),
            None,
            None,
            Some((11.0, 21.0)),
            None,
            Some((12.0, 22.0)),
        ];
        let mut source = Scripted::new(script);
        let sample = SampleAverager::new(3, 3).sample(&mut source).await.unwrap().unwrap();
        assert_eq!(sample.u, 11.0);
        assert_eq!(sample.v, 21.0);
        assert_eq!(source.calls, 6);
    }

    #[tokio::test]
    async fn test_mean_rounded_to_three_decimals() {
        let script = vec![Some((1.0, 1.0)), Some((1.0, 2.0)), Some((2.0, 2.0))];
        let mut source = Scripted::new(script);
        let sample = SampleAverager::new(3, 5).sample(&mut source).await.unwrap().unwrap();
        assert_eq!(sample.u, 1.333);
        assert_eq!(sample.v, 1.667);
    }

    #[test]
    fn test_normalized_center_is_zero() {
        let sample = PixelSample {
            u: 320.0,
            v: 240.0,
            radius: 10.0,
            frame_width: 640,
            frame_height: 480,
        };
        assert_eq!(sample.normalized(), (0.0, 0.0));
    }

    #[test]
    fn test_round3_clears_negative_zero() {
        assert!(round3(-0.0001).is_sign_positive());
        assert_eq!(round3(0.12345), 0.123);
    }
}
