//! Tool Aligner - camera-guided tool offset calibration
//!
//! This is the CLI entry point for the tool-aligner tool.
//! Run with: cargo run --bin tool-aligner -- [--simulate] [--apply] [--json]

use chrono::Utc;
use std::env;
use tool_aligner::calibration::{apply_offsets, AbortSignal, ControlledPoint, ConvergenceController, SessionReport};
use tool_aligner::camera::{CommandCamera, FrameGrabber, FrameSource};
use tool_aligner::machine::{DuetClient, MachineMotion};
use tool_aligner::settings::parse_tools;
use tool_aligner::simulation::SimulatedRig;
use tool_aligner::vision::VisionLocator;
use tool_aligner::{AlignSettings, ProgressEvent};
use tracing_subscriber::EnvFilter;

/// Camera position used by `--simulate` when no controlled point is configured.
const SIMULATED_CAMERA: (f64, f64) = (150.0, 100.0);

const USAGE: &str = "Usage: tool-aligner [OPTIONS]

Options:
  --simulate       Run against the built-in simulated machine and camera
  --tools LIST     Comma separated tools to calibrate (default: ALIGNER_TOOLS or 0)
  --capture-cp     Use the current machine position as the controlled point
  --apply          Write the measured offsets to the machine (G10)
  --save           With --apply, also persist the tool table (M500)
  --json           Print the session report as JSON
  -h, --help       Show this help

Environment: ALIGNER_MACHINE_URL, ALIGNER_MACHINE_PASSWORD, ALIGNER_CAMERA_COMMAND,
ALIGNER_TOOLS, ALIGNER_CP_X, ALIGNER_CP_Y, ALIGNER_GAMMA, ALIGNER_MOVE_SPEED,
ALIGNER_TRAVEL_SPEED, ALIGNER_MAX_JERK, ALIGNER_POLL_MS, ALIGNER_MAX_MOVES,
ALIGNER_REUSE_TRANSFORM, ALIGNER_TOOL_CHANGE_TIMEOUT";

struct Options {
    capture_cp: bool,
    apply: bool,
    save: bool,
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (ignore errors if file doesn't exist)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = env::args().collect();
    let has_flag = |flag: &str| args.iter().any(|arg| arg == flag);
    if has_flag("--help") || has_flag("-h") {
        println!("{}", USAGE);
        return Ok(());
    }

    let simulate = has_flag("--simulate");
    let options = Options {
        capture_cp: has_flag("--capture-cp"),
        apply: has_flag("--apply"),
        save: has_flag("--save"),
        json: has_flag("--json"),
    };

    let mut settings = AlignSettings::from_env();
    if let Some(list) = args.iter().position(|arg| arg == "--tools").and_then(|i| args.get(i + 1)) {
        let tools = parse_tools(list);
        if tools.is_empty() {
            anyhow::bail!("--tools expects a comma separated list such as 0,1,2");
        }
        settings.tools = tools;
    }

    println!("🎯 Tool Aligner - camera-guided tool offset calibration");
    println!("================================================");
    if simulate {
        println!("Machine: simulated");
    } else {
        println!("Machine: {}", settings.machine_url);
        println!("Camera: {}", settings.camera_command);
    }
    println!("Tools: {:?}", settings.tools);
    match settings.controlled_point() {
        Some(cp) if !options.capture_cp => println!("Controlled point: ({:.3}, {:.3})", cp.x, cp.y),
        _ => println!("Controlled point: current machine position"),
    }
    println!("Gamma: {:.2}", settings.gamma);
    if options.apply {
        println!("Apply offsets: yes{}", if options.save { " (and save)" } else { "" });
    }
    println!("================================================\n");

    // Ctrl+C stops the session between moves
    let abort = AbortSignal::new();
    let abort_on_signal = abort.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\n⏹️ Abort requested, parking machine...");
            abort_on_signal.abort();
        }
    });

    if simulate {
        let camera_center = settings
            .controlled_point()
            .map(|cp| (cp.x, cp.y))
            .unwrap_or(SIMULATED_CAMERA);
        settings.cp_x = Some(camera_center.0);
        settings.cp_y = Some(camera_center.1);
        let rig = SimulatedRig::demo(camera_center);
        run(rig.machine(), rig.camera(), &settings, &options, abort).await?;
    } else {
        let machine = DuetClient::new(settings.duet_config())?;
        machine.connect().await?;
        let camera = CommandCamera::from_command_line(&settings.camera_command)?;
        let machine = run(machine, camera, &settings, &options, abort).await?;
        if let Err(e) = machine.disconnect().await {
            tracing::warn!("Failed to disconnect: {}", e);
        }
    }

    Ok(())
}

/// Run one session and hand the machine back.
async fn run<M, S>(
    machine: M,
    camera: S,
    settings: &AlignSettings,
    options: &Options,
    abort: AbortSignal,
) -> anyhow::Result<M>
where
    M: MachineMotion,
    S: FrameSource + 'static,
{
    let controlled_point = match settings.controlled_point() {
        Some(cp) if !options.capture_cp => cp,
        _ => {
            let cp = ControlledPoint::capture(&machine).await?;
            println!("📍 Captured controlled point: ({:.3}, {:.3})", cp.x, cp.y);
            cp
        }
    };

    let config = settings.align_config();
    let locator = VisionLocator::new(FrameGrabber::spawn(camera)?)
        .with_gamma(config.gamma)
        .with_retry_budget(config.retry_budget);

    let json = options.json;
    let mut controller = ConvergenceController::new(machine, locator, config)
        .with_abort_signal(abort)
        .with_progress_callback(move |event| match event {
            ProgressEvent::Status(message) if !json => println!("📡 {}", message),
            ProgressEvent::ToolFinished(offset) if !json => {
                println!(
                    "✅ T{}: X{:.3} Y{:.3} Z{:.3} ({} moves, {:.1}s)",
                    offset.tool, offset.x, offset.y, offset.z, offset.moves, offset.elapsed_seconds
                );
            }
            _ => {}
        });

    let started_at = Utc::now();
    let offsets = match controller.run_session(controlled_point, &settings.tools).await {
        Ok(offsets) => offsets,
        Err(e) => {
            eprintln!("\n❌ Calibration failed: {}", e);
            return Err(e.into());
        }
    };
    let report = SessionReport::new(started_at, controlled_point, offsets);

    if options.json {
        println!("{}", report.to_json()?);
    } else {
        println!("\n✅ Calibration complete! Session {}", report.id);
        for offset in &report.offsets {
            let scale = offset
                .mm_per_pixel
                .map(|s| format!("{:.4} mm/px", s))
                .unwrap_or_else(|| "unknown scale".to_string());
            println!(
                "   G10 P{} X{:.3} Y{:.3} Z{:.3}   ; {}",
                offset.tool, offset.x, offset.y, offset.z, scale
            );
        }
    }

    let (machine, _locator) = controller.into_parts();
    if options.apply {
        apply_offsets(&machine, &report.offsets, options.save).await?;
        if !options.json {
            println!("\n💾 Offsets written to the machine");
        }
    }
    Ok(machine)
}
