//! Detector cascade with sticky strategy selection.

use super::blob::{detect_blobs, BlobParams};
use super::frame::Frame;
use super::preprocess::{preprocess, Pipeline, DEFAULT_GAMMA};

/// One detector configuration: a shape profile paired with a pipeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorStrategy {
    pub name: &'static str,
    pub params: BlobParams,
    pub pipeline: Pipeline,
}

/// Strategies in priority order: strict before relaxed, adaptive before Otsu.
pub fn default_strategies() -> Vec<DetectorStrategy> {
    vec![
        DetectorStrategy {
            name: "standard/adaptive",
            params: BlobParams::standard(),
            pipeline: Pipeline::Adaptive,
        },
        DetectorStrategy {
            name: "standard/otsu",
            params: BlobParams::standard(),
            pipeline: Pipeline::Otsu,
        },
        DetectorStrategy {
            name: "relaxed/adaptive",
            params: BlobParams::relaxed(),
            pipeline: Pipeline::Adaptive,
        },
        DetectorStrategy {
            name: "relaxed/otsu",
            params: BlobParams::relaxed(),
            pipeline: Pipeline::Otsu,
        },
    ]
}

/// Outcome of one cascade run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    /// Blob center rounded to the nearest pixel; `None` for zero or several blobs.
    pub position: Option<(f64, f64)>,
    pub radius: f64,
    /// Index of the strategy that produced the blob.
    pub algorithm: Option<usize>,
    pub frame_width: u32,
    pub frame_height: u32,
}

impl Detection {
    pub fn absent(frame_width: u32, frame_height: u32) -> Self {
        Self {
            position: None,
            radius: 0.0,
            algorithm: None,
            frame_width,
            frame_height,
        }
    }

    pub fn is_found(&self) -> bool {
        self.position.is_some()
    }
}

/// Ordered detector strategies with a remembered last winner.
#[derive(Debug, Clone)]
pub struct DetectorCascade {
    strategies: Vec<DetectorStrategy>,
    gamma: f64,
    sticky: Option<usize>,
}

impl Default for DetectorCascade {
    fn default() -> Self {
        Self::new(DEFAULT_GAMMA)
    }
}

impl DetectorCascade {
    pub fn new(gamma: f64) -> Self {
        Self::with_strategies(default_strategies(), gamma)
    }

    pub fn with_strategies(strategies: Vec<DetectorStrategy>, gamma: f64) -> Self {
        Self {
            strategies,
            gamma,
            sticky: None,
        }
    }

    /// Index of the strategy that will be tried first on the next call.
    pub fn sticky(&self) -> Option<usize> {
        self.sticky
    }

    pub fn strategies(&self) -> &[DetectorStrategy] {
        &self.strategies
    }

    /// Forget the remembered strategy, e.g. after a tool change.
    pub fn reset(&mut self) {
        self.sticky = None;
    }

    /// Locate exactly one blob in `frame`.
    pub fn detect(&mut self, frame: &Frame) -> Detection {
        let (width, height) = frame.dimensions();
        let mut prepared = PreparedFrames::new(frame, self.gamma);

        if let Some(index) = self.sticky {
            if let Some(detection) = self.try_strategy(index, &mut prepared) {
                return detection;
            }
            tracing::debug!(
                "Sticky detector '{}' lost the blob, running full cascade",
                self.strategies[index].name
            );
        }

        for index in 0..self.strategies.len() {
            if Some(index) == self.sticky {
                continue;
            }
            if let Some(detection) = self.try_strategy(index, &mut prepared) {
                if self.sticky != Some(index) {
                    tracing::debug!("Detector '{}' locked on", self.strategies[index].name);
                }
                self.sticky = Some(index);
                return detection;
            }
        }

        self.sticky = None;
        Detection::absent(width, height)
    }

    fn try_strategy(&self, index: usize, prepared: &mut PreparedFrames<'_>) -> Option<Detection> {
        let strategy = &self.strategies[index];
        let binary = prepared.get(strategy.pipeline);
        let blobs = detect_blobs(binary, &strategy.params);
        match blobs.as_slice() {
            [blob] => Some(Detection {
                position: Some((blob.x.round(), blob.y.round())),
                radius: blob.size / 2.0,
                algorithm: Some(index),
                frame_width: binary.width(),
                frame_height: binary.height(),
            }),
            _ => None,
        }
    }
}

/// Lazily computed pipeline outputs for one raw frame.
struct PreparedFrames<'a> {
    raw: &'a Frame,
    gamma: f64,
    adaptive: Option<Frame>,
    otsu: Option<Frame>,
}

impl<'a> PreparedFrames<'a> {
    fn new(raw: &'a Frame, gamma: f64) -> Self {
        Self {
            raw,
            gamma,
            adaptive: None,
            otsu: None,
        }
    }

    fn get(&mut self, pipeline: Pipeline) -> &Frame {
        let (raw, gamma) = (self.raw, self.gamma);
        let slot = match pipeline {
            Pipeline::Adaptive => &mut self.adaptive,
            Pipeline::Otsu => &mut self.otsu,
        };
        slot.get_or_insert_with(|| preprocess(raw, gamma, pipeline))
    }
}
