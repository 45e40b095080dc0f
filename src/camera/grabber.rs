//! Frame hand-off between a capture thread and the control loop.
//!
//! The producer thread grabs continuously and keeps only the newest frame.
//! A request takes that frame, or waits for a fresh grab when none is held.
//! Requests go through a channel of capacity one, so at most one frame is
//! ever in flight and the consumer never sees a queued, stale image.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::sync::oneshot;

use crate::vision::Frame;

use super::source::FrameSource;
use super::CameraError;

type FrameReply = oneshot::Sender<Result<Frame, CameraError>>;

/// Shortest time between two idle captures.
const MIN_IDLE_PERIOD: Duration = Duration::from_millis(5);

const IDLE_RETRY_DELAY: Duration = Duration::from_millis(20);

/// Delivers frames to the control loop.
#[allow(async_fn_in_trait)]
pub trait FrameFeed {
    async fn next_frame(&mut self) -> Result<Frame, CameraError>;
}

/// Feed that calls the source inline, without a producer thread.
pub struct DirectFeed<S> {
    source: S,
}

impl<S: FrameSource> DirectFeed<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }
}

impl<S: FrameSource> FrameFeed for DirectFeed<S> {
    async fn next_frame(&mut self) -> Result<Frame, CameraError> {
        self.source.grab()
    }
}

/// Owns the capture thread and serves frame requests.
pub struct FrameGrabber {
    request_tx: mpsc::Sender<FrameReply>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl FrameGrabber {
    /// Start the capture thread for `source`.
    pub fn spawn<S: FrameSource + 'static>(source: S) -> Result<Self, CameraError> {
        let (request_tx, request_rx) = mpsc::channel::<FrameReply>(1);
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();

        let worker = thread::Builder::new()
            .name("frame-grabber".to_string())
            .spawn(move || produce(source, request_rx, flag))
            .map_err(|e| CameraError::CaptureFailed(format!("cannot start grabber: {}", e)))?;

        Ok(Self {
            request_tx,
            running,
            worker: Some(worker),
        })
    }

    /// Request the freshest frame.
    pub async fn request_frame(&self) -> Result<Frame, CameraError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.request_tx
            .send(reply_tx)
            .await
            .map_err(|_| CameraError::Disconnected)?;
        reply_rx.await.map_err(|_| CameraError::Disconnected)?
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop the capture thread and wait for it to exit.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("Frame grabber thread panicked");
            }
        }
    }
}

impl FrameFeed for FrameGrabber {
    async fn next_frame(&mut self) -> Result<Frame, CameraError> {
        self.request_frame().await
    }
}

impl Drop for FrameGrabber {
    fn drop(&mut self) {
        self.stop();
    }
}

fn produce<S: FrameSource>(
    mut source: S,
    mut requests: mpsc::Receiver<FrameReply>,
    running: Arc<AtomicBool>,
) {
    tracing::debug!("Frame grabber started");
    // Newest idle capture; replaced on every grab, emptied when handed over.
    let mut latest: Option<Frame> = None;

    while running.load(Ordering::SeqCst) {
        match requests.try_recv() {
            Ok(reply) => {
                let frame = match latest.take() {
                    Some(frame) => Ok(frame),
                    None => source.grab(),
                };
                if let Err(ref e) = frame {
                    tracing::warn!("Frame capture failed: {}", e);
                }
                // The requester may have given up; nothing to do then.
                let _ = reply.send(frame);
            }
            Err(TryRecvError::Empty) => {
                let started = Instant::now();
                match source.grab() {
                    Ok(frame) => {
                        latest = Some(frame);
                        // Instant sources would otherwise spin a core.
                        if let Some(rest) = MIN_IDLE_PERIOD.checked_sub(started.elapsed()) {
                            thread::sleep(rest);
                        }
                    }
                    Err(e) => {
                        tracing::trace!("Idle capture failed: {}", e);
                        latest = None;
                        thread::sleep(IDLE_RETRY_DELAY);
                    }
                }
            }
            Err(TryRecvError::Disconnected) => break,
        }
    }

    running.store(false, Ordering::SeqCst);
    tracing::debug!("Frame grabber stopped");
}
