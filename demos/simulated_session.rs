//! Calibrate three simulated tools and compare against their true offsets.
//!
//! Run with: cargo run --example simulated_session

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tool_aligner::calibration::{AlignConfig, ControlledPoint, ConvergenceController};
use tool_aligner::camera::FrameGrabber;
use tool_aligner::simulation::SimulatedRig;
use tool_aligner::vision::VisionLocator;
use tool_aligner::ProgressEvent;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let camera_center = (150.0, 100.0);
    let rig = SimulatedRig::demo(camera_center);
    let tools = [0, 1, 2];

    let frames = Arc::new(AtomicUsize::new(0));
    let frame_counter = frames.clone();
    let locator = VisionLocator::new(FrameGrabber::spawn(rig.camera())?).with_progress_callback(move |event| {
        if let ProgressEvent::Frame(_) = event {
            frame_counter.fetch_add(1, Ordering::Relaxed);
        }
    });

    let mut controller = ConvergenceController::new(rig.machine(), locator, AlignConfig::default())
        .with_progress_callback(|event| {
            if let ProgressEvent::Status(message) = event {
                println!("📡 {}", message);
            }
        });

    let cp = ControlledPoint::new(camera_center.0, camera_center.1);
    let offsets = controller.run_session(cp, &tools).await?;

    println!("\n🎯 Results ({} frames analysed)", frames.load(Ordering::Relaxed));
    println!("   tool   measured X/Y        true X/Y            error");
    for offset in &offsets {
        let Some(tool) = rig.tool(offset.tool) else {
            continue;
        };
        let (tx, ty) = tool.true_offset;
        println!(
            "   T{:<4} {:>8.3} {:>8.3}   {:>8.3} {:>8.3}   {:.3}",
            offset.tool,
            offset.x,
            offset.y,
            tx,
            ty,
            ((offset.x - tx).powi(2) + (offset.y - ty).powi(2)).sqrt()
        );
    }
    Ok(())
}
