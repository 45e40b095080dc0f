//! Closed-loop centering and the per-tool calibration sequence.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::machine::{wait_until_idle, MachineError, MachineMotion};
use crate::progress::{self, ProgressCallback, ProgressEvent};
use crate::vision::{round3, TipLocator};

use super::calibrator::{axis, TransformCalibrator};
use super::config::AlignConfig;
use super::session::{CalibrationSession, ControlledPoint, ToolOffset};
use super::transform::TransformMatrix;
use super::CalibrationError;

/// Shared flag for stopping a running session.
///
/// Checked between moves; a move already in flight completes first.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn check(&self) -> Result<(), CalibrationError> {
        if self.is_aborted() {
            Err(CalibrationError::Aborted)
        } else {
            Ok(())
        }
    }
}

/// Damped machine move that brings a tip seen at normalized `error` toward
/// the frame center, rounded to 0.001 mm.
pub fn corrective_offset(transform: &TransformMatrix, error: (f64, f64), damping: f64) -> (f64, f64) {
    let (dx, dy) = transform.displacement(error.0, error.1);
    (round3(-damping * dx), round3(-damping * dy))
}

/// Program measured offsets into the machine's tool table.
pub async fn apply_offsets<M: MachineMotion>(
    machine: &M,
    offsets: &[ToolOffset],
    persist: bool,
) -> Result<(), MachineError> {
    for offset in offsets {
        tracing::info!(
            "Setting tool {} offset to X{:.3} Y{:.3} Z{:.3}",
            offset.tool,
            offset.x,
            offset.y,
            offset.z
        );
        machine.set_tool_offset(offset.tool, offset.x, offset.y, offset.z).await?;
    }
    if persist {
        machine.save_tool_offsets().await?;
    }
    Ok(())
}

/// Drives each tool through calibration and centering.
pub struct ConvergenceController<M, L> {
    machine: M,
    locator: L,
    config: AlignConfig,
    abort: AbortSignal,
    progress: Option<ProgressCallback>,
    shared_transform: Option<(TransformMatrix, Option<f64>)>,
}

impl<M, L> ConvergenceController<M, L>
where
    M: MachineMotion,
    L: TipLocator,
{
    pub fn new(machine: M, locator: L, config: AlignConfig) -> Self {
        Self {
            machine,
            locator,
            config,
            abort: AbortSignal::new(),
            progress: None,
            shared_transform: None,
        }
    }

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

    pub fn with_abort_signal(mut self, abort: AbortSignal) -> Self {
        self.abort = abort;
        self
    }

    pub fn abort_signal(&self) -> AbortSignal {
        self.abort.clone()
    }

    pub fn machine(&self) -> &M {
        &self.machine
    }

    pub fn config(&self) -> &AlignConfig {
        &self.config
    }

    pub fn into_parts(self) -> (M, L) {
        (self.machine, self.locator)
    }

    /// Calibrate every tool in order against the controlled point.
    ///
    /// Any failure unloads all tools and parks the carriage at the controlled
    /// point before the error is returned; no partial results are reported.
    pub async fn run_session(
        &mut self,
        controlled_point: ControlledPoint,
        tools: &[usize],
    ) -> Result<Vec<ToolOffset>, CalibrationError> {
        tracing::info!(
            "Starting session for tools {:?} at ({:.3}, {:.3})",
            tools,
            controlled_point.x,
            controlled_point.y
        );
        self.shared_transform = None;

        let mut offsets = Vec::with_capacity(tools.len());
        for &tool in tools {
            match self.calibrate_tool(controlled_point, tool).await {
                Ok(offset) => {
                    progress::emit(&self.progress, ProgressEvent::ToolFinished(offset.clone()));
                    offsets.push(offset);
                }
                Err(e) => {
                    tracing::error!("Tool {} failed: {}", tool, e);
                    self.park(controlled_point).await;
                    return Err(e);
                }
            }
        }

        self.machine
            .move_absolute(Some(controlled_point.x), Some(controlled_point.y), self.config.travel_speed)
            .await?;
        wait_until_idle(&self.machine, self.config.poll_interval).await?;
        progress::status(&self.progress, format!("Session finished: {} tool(s)", offsets.len()));
        Ok(offsets)
    }

    /// Best-effort cleanup after a failure.
    async fn park(&self, controlled_point: ControlledPoint) {
        progress::status(&self.progress, "Unloading tools and returning to controlled point");
        if let Err(e) = self.machine.unload_tools().await {
            tracing::warn!("Failed to unload tools during cleanup: {}", e);
        }
        if let Err(e) = self
            .machine
            .move_absolute(Some(controlled_point.x), Some(controlled_point.y), self.config.travel_speed)
            .await
        {
            tracing::warn!("Failed to return to controlled point during cleanup: {}", e);
        }
    }

    /// Load, calibrate, center and unload one tool.
    pub async fn calibrate_tool(
        &mut self,
        controlled_point: ControlledPoint,
        tool: usize,
    ) -> Result<ToolOffset, CalibrationError> {
        self.abort.check()?;
        progress::status(&self.progress, format!("Loading tool {}", tool));
        self.locator.reset();
        self.machine.load_tool(tool).await?;
        let declared = self.machine.tool_offset(tool).await?;

        self.machine
            .move_absolute(Some(controlled_point.x), Some(controlled_point.y), self.config.travel_speed)
            .await?;
        wait_until_idle(&self.machine, self.config.poll_interval).await?;

        let reused = self.shared_transform.filter(|_| self.config.reuse_transform);
        let session = match reused {
            Some((transform, mm_per_pixel)) => {
                tracing::debug!("Tool {}: reusing transform", tool);
                CalibrationSession::with_transform(tool, transform, mm_per_pixel).begin_centering()
            }
            None => {
                progress::status(&self.progress, format!("Tool {}: calibrating camera transform", tool));
                let session = TransformCalibrator::new(&self.config, &self.abort, &self.progress)
                    .run(&self.machine, &mut self.locator, CalibrationSession::new(tool))
                    .await?;
                if let Some(transform) = session.transform {
                    self.shared_transform = Some((transform, session.mm_per_pixel));
                }
                session
            }
        };

        let session = self.center(session).await?;
        let measured = self.machine.coordinates().await?;
        let offset = session.tool_offset(controlled_point, declared, measured);
        progress::status(
            &self.progress,
            format!(
                "Tool {}: offset X{:.3} Y{:.3} Z{:.3} after {} move(s)",
                tool, offset.x, offset.y, offset.z, offset.moves
            ),
        );

        self.machine.unload_tools().await?;
        Ok(offset)
    }

    /// Move until the corrective offset rounds to zero on both axes.
    async fn center(&mut self, session: CalibrationSession) -> Result<CalibrationSession, CalibrationError> {
        let tool = session.tool;
        let transform = session
            .transform
            .ok_or(CalibrationError::DegenerateTransform { tool })?;
        let mut session = session;

        while !session.is_converged() {
            self.abort.check()?;
            if session.moves >= self.config.max_centering_moves {
                return Err(CalibrationError::NotConverged {
                    tool,
                    moves: session.moves,
                });
            }

            let Some(sample) = self.locator.locate(self.config.burst_samples).await? else {
                tracing::warn!("Tool {}: lost the tip while centering, retrying", tool);
                progress::status(&self.progress, format!("Tool {}: tip not found, retrying", tool));
                continue;
            };

            let (dx, dy) = corrective_offset(&transform, sample.normalized(), self.config.damping);
            if session.moves == 0 {
                self.machine.set_max_jerk(self.config.max_jerk).await?;
            }
            if (dx, dy) != (0.0, 0.0) {
                self.machine.move_relative(axis(dx), axis(dy), self.config.move_speed).await?;
                wait_until_idle(&self.machine, self.config.poll_interval).await?;
            }
            session = session.record_move((dx, dy));
            tracing::debug!(
                "Tool {} move {}: pixel ({:.3}, {:.3}) offset ({:.3}, {:.3})",
                tool,
                session.moves,
                sample.u,
                sample.v,
                dx,
                dy
            );
        }

        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::testing::{decagon_walk, pixel, Command, FakeMachine, ScriptedLocator};
    use crate::camera::CameraError;
    use std::sync::Mutex;

    /// Machine X grows with u, machine Y shrinks with v, 0.02 mm per pixel.
    fn linear() -> TransformMatrix {
        TransformMatrix::from_coefficients([[0.0, 0.0], [0.0, 0.0], [0.0, 0.0], [6.4, 0.0], [0.0, -4.8], [10.0, 20.0]])
    }

    fn controller(
        machine: FakeMachine,
        locator: ScriptedLocator,
        config: AlignConfig,
    ) -> ConvergenceController<FakeMachine, ScriptedLocator> {
        ConvergenceController::new(machine, locator, config)
    }

    #[test]
    fn test_corrective_offset_is_damped_and_opposed() {
        let (dx, dy) = corrective_offset(&linear(), (0.1, 0.05), 0.55);
        assert_eq!(dx, -0.352);
        assert_eq!(dy, 0.132);
        assert_eq!(corrective_offset(&linear(), (0.0, 0.0), 0.55), (0.0, 0.0));
    }

    #[test]
    fn test_abort_signal_is_shared() {
        let signal = AbortSignal::new();
        let other = signal.clone();
        other.abort();
        assert!(signal.is_aborted());
        assert!(matches!(signal.check(), Err(CalibrationError::Aborted)));
        signal.reset();
        assert!(signal.check().is_ok());
    }

    #[tokio::test]
    async fn test_zero_error_converges_in_one_move() {
        let mut controller = controller(FakeMachine::new(), ScriptedLocator::centered(), AlignConfig::default());
        let session = CalibrationSession::with_transform(0, linear(), Some(0.02)).begin_centering();

        let session = controller.center(session).await.unwrap();
        assert!(session.is_converged());
        assert_eq!(session.moves, 1);

        let commands = controller.machine().commands();
        assert_eq!(commands, vec![Command::Jerk(60.0)]);
    }

    #[tokio::test]
    async fn test_absent_samples_do_not_count_as_moves() {
        let locator = ScriptedLocator::new(vec![None, None, Some(pixel(170.0, 120.0))], Some(pixel(160.0, 120.0)));
        let mut controller = controller(FakeMachine::new(), locator, AlignConfig::default());
        let session = CalibrationSession::with_transform(0, linear(), None).begin_centering();

        let session = controller.center(session).await.unwrap();
        assert_eq!(session.moves, 2);
        let commands = controller.machine().commands();
        assert_eq!(commands.iter().filter(|c| matches!(c, Command::Jerk(_))).count(), 1);
        assert_eq!(commands[1], Command::Relative(Some(-0.11), None));
    }

    #[tokio::test]
    async fn test_end_to_end_centered_tip() {
        let mut controller = controller(FakeMachine::frozen(), ScriptedLocator::centered(), AlignConfig::default());
        let offsets = controller
            .run_session(ControlledPoint::new(50.0, 50.0), &[0])
            .await
            .unwrap();

        assert_eq!(offsets.len(), 1);
        let offset = &offsets[0];
        assert_eq!((offset.x, offset.y, offset.z), (50.0, 50.0, 0.0));
        assert_eq!(offset.moves, 1);
        assert!(offset.mm_per_pixel.is_none());

        let commands = controller.machine().commands();
        assert_eq!(commands.first(), Some(&Command::Load(0)));
        assert_eq!(commands.last(), Some(&Command::Absolute(Some(50.0), Some(50.0))));
        assert!(commands.contains(&Command::Unload));
    }

    #[tokio::test]
    async fn test_progress_reports_finished_tools() {
        let finished = Arc::new(Mutex::new(Vec::new()));
        let sink = finished.clone();
        let mut controller = controller(FakeMachine::frozen(), ScriptedLocator::centered(), AlignConfig::default())
            .with_progress_callback(move |event| {
                if let ProgressEvent::ToolFinished(offset) = event {
                    sink.lock().unwrap().push(offset.tool);
                }
            });

        controller
            .run_session(ControlledPoint::new(0.0, 0.0), &[0, 2])
            .await
            .unwrap();
        assert_eq!(*finished.lock().unwrap(), vec![0, 2]);
    }

    #[tokio::test]
    async fn test_not_converged_parks_machine() {
        let locator = ScriptedLocator::new(decagon_walk(0.02), Some(pixel(200.0, 120.0)));
        let config = AlignConfig::default().with_max_centering_moves(3);
        let mut controller = controller(FakeMachine::new(), locator, config);

        let result = controller.run_session(ControlledPoint::new(5.0, 5.0), &[1]).await;
        assert!(matches!(result, Err(CalibrationError::NotConverged { tool: 1, moves: 3 })));

        let commands = controller.machine().commands();
        let n = commands.len();
        assert_eq!(commands[n - 2], Command::Unload);
        assert_eq!(commands[n - 1], Command::Absolute(Some(5.0), Some(5.0)));
    }

    #[tokio::test]
    async fn test_machine_failure_parks_machine() {
        let mut controller = controller(
            FakeMachine::failing_tool_change(),
            ScriptedLocator::centered(),
            AlignConfig::default(),
        );
        let result = controller.run_session(ControlledPoint::new(1.0, 2.0), &[0, 1]).await;
        assert!(matches!(result, Err(CalibrationError::Machine(MachineError::Timeout(..)))));
        assert_eq!(
            controller.machine().commands(),
            vec![Command::Load(0), Command::Unload, Command::Absolute(Some(1.0), Some(2.0))]
        );
    }

    #[tokio::test]
    async fn test_abort_before_start() {
        let abort = AbortSignal::new();
        let mut controller = controller(FakeMachine::new(), ScriptedLocator::centered(), AlignConfig::default())
            .with_abort_signal(abort.clone());
        abort.abort();

        let result = controller.run_session(ControlledPoint::new(0.0, 0.0), &[0]).await;
        assert!(matches!(result, Err(CalibrationError::Aborted)));
        assert_eq!(
            controller.machine().commands(),
            vec![Command::Unload, Command::Absolute(Some(0.0), Some(0.0))]
        );
    }

    #[tokio::test]
    async fn test_transform_reuse_skips_second_walk() {
        let config = AlignConfig::default().with_transform_reuse(true);
        let locator = ScriptedLocator::new(decagon_walk(0.02), Some(pixel(160.0, 120.0)));
        let mut controller = controller(FakeMachine::new(), locator, config);
        controller
            .run_session(ControlledPoint::new(0.0, 0.0), &[0, 1])
            .await
            .unwrap();

        let (_, locator) = controller.into_parts();
        assert_eq!(locator.calls, 10 + 1 + 1);
        assert_eq!(locator.resets, 2);
    }

    fn assert_parked_at(commands: &[Command], x: f64, y: f64) {
        let n = commands.len();
        assert!(n >= 2, "commands = {:?}", commands);
        assert_eq!(commands[n - 2], Command::Unload);
        assert_eq!(commands[n - 1], Command::Absolute(Some(x), Some(y)));
    }

    #[tokio::test]
    async fn test_static_detection_fails_and_parks() {
        // The carriage walks but the detector keeps reporting the same spot
        let locator = ScriptedLocator::new(Vec::new(), Some(pixel(200.0, 120.0)));
        let mut controller = controller(FakeMachine::new(), locator, AlignConfig::default());

        let result = controller.run_session(ControlledPoint::new(3.0, 4.0), &[2]).await;
        assert!(matches!(result, Err(CalibrationError::DegenerateTransform { tool: 2 })));
        assert_parked_at(&controller.machine().commands(), 3.0, 4.0);
        assert!(!controller
            .machine()
            .commands()
            .iter()
            .any(|c| matches!(c, Command::Jerk(_))));
    }

    #[tokio::test]
    async fn test_camera_failure_mid_walk_parks_machine() {
        let locator = ScriptedLocator::new(decagon_walk(0.02), None).with_camera_failure_at(4);
        let mut controller = controller(FakeMachine::new(), locator, AlignConfig::default());

        let result = controller.run_session(ControlledPoint::new(7.0, 8.0), &[0, 1]).await;
        assert!(matches!(
            result,
            Err(CalibrationError::Camera(CameraError::Disconnected))
        ));
        let commands = controller.machine().commands();
        assert_eq!(commands.iter().filter(|c| matches!(c, Command::Load(_))).count(), 1);
        assert_parked_at(&commands, 7.0, 8.0);
    }

    #[tokio::test]
    async fn test_abort_while_tip_is_lost_parks_machine() {
        let abort = AbortSignal::new();
        let locator = ScriptedLocator::new(decagon_walk(0.02), None).with_abort_at(13, abort.clone());
        let mut controller =
            controller(FakeMachine::new(), locator, AlignConfig::default()).with_abort_signal(abort);

        let result = controller.run_session(ControlledPoint::new(0.0, 0.0), &[0]).await;
        assert!(matches!(result, Err(CalibrationError::Aborted)));
        assert_parked_at(&controller.machine().commands(), 0.0, 0.0);

        let (_, locator) = controller.into_parts();
        assert_eq!(locator.calls, 13);
    }

    #[tokio::test]
    async fn test_apply_offsets_persists() {
        let machine = FakeMachine::new();
        let offsets = vec![ToolOffset {
            tool: 3,
            x: -1.5,
            y: 2.25,
            z: 0.0,
            mm_per_pixel: None,
            elapsed_seconds: 1.0,
            moves: 2,
        }];
        apply_offsets(&machine, &offsets, true).await.unwrap();
        assert_eq!(
            machine.commands(),
            vec![Command::SetOffset(3, -1.5, 2.25, 0.0), Command::Save]
        );
    }
}
