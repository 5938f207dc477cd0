//! Record a capture device to segments, with an optional post-stop merge.

use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lenscast_capture_engine::{
    list_devices, CaptureDevice, CaptureEvents, CaptureMode, CaptureSupervisor, Frame,
    SessionConfig, VideoSegment,
};
use lenscast_common::config::AppConfig;

/// Event sink printing session activity to the terminal.
struct TerminalEvents {
    frames: AtomicU64,
}

impl CaptureEvents for TerminalEvents {
    fn on_frame(&self, _frame: &Frame) {
        self.frames.fetch_add(1, Ordering::Relaxed);
    }

    fn on_preview_error(&self, message: &str) {
        eprintln!("\npreview error: {message}");
    }

    fn on_recording_started(&self) {
        println!("Recording started");
    }

    fn on_recording_stopped(&self) {
        println!("\nRecording stopped");
    }

    fn on_segment_completed(&self, segment: &VideoSegment) {
        println!(
            "\n  segment: {} ({} KiB)",
            segment.path.display(),
            segment.size_bytes / 1024
        );
    }

    fn on_recording_error(&self, message: &str) {
        eprintln!("\nrecording error: {message}");
    }

    fn on_time_update(&self, formatted: &str) {
        let frames = self.frames.load(Ordering::Relaxed);
        print!("\r  {formatted}  ({frames} preview frames)");
        let _ = std::io::stdout().flush();
    }
}

#[allow(clippy::too_many_arguments)]
pub async fn run(
    device: Option<String>,
    output: Option<PathBuf>,
    fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    bitrate: Option<u32>,
    segment_secs: Option<u32>,
    no_preview: bool,
    merge_after: bool,
) -> anyhow::Result<()> {
    let app_config = AppConfig::load();

    let device = resolve_device(device)?;
    let output_dir = output.unwrap_or_else(|| app_config.output_dir.clone());
    let mode = if no_preview {
        CaptureMode::Record
    } else {
        CaptureMode::PreviewAndRecord
    };

    let mut config =
        SessionConfig::from_defaults(device.clone(), mode, &output_dir, &app_config.recording);
    if let Some(fps) = fps {
        config.fps = fps;
    }
    if let Some(width) = width {
        config.width = width;
    }
    if let Some(height) = height {
        config.height = height;
    }
    if let Some(bitrate) = bitrate {
        config.video_bitrate_kbps = bitrate;
    }
    if let Some(segment_secs) = segment_secs {
        config.segment_secs = segment_secs;
    }
    let fps = config.fps;
    let bitrate_kbps = config.video_bitrate_kbps;
    let approx_segment_secs = config.segment_secs as f64;

    println!("Recording from: {} ({})", device.name, device.id);
    println!("  Output: {}", output_dir.display());
    println!("  {}x{} @ {fps}fps", config.width, config.height);
    println!();
    println!("Press Ctrl+C to stop recording...");
    println!();

    let supervisor = CaptureSupervisor::new();
    let events = Arc::new(TerminalEvents {
        frames: AtomicU64::new(0),
    });
    supervisor.start(config, events)?;

    tokio::signal::ctrl_c().await?;

    let mut segments = supervisor.stop()?;
    supervisor.shutdown();

    if segments.is_empty() {
        println!("No segments were recorded.");
        return Ok(());
    }
    println!("Recorded {} segment(s)", segments.len());

    if merge_after {
        // Discovery order is not guaranteed to be recording order; the
        // zero-padded index in the file name is.
        segments.sort_by(|a, b| a.path.cmp(&b.path));
        let job = lenscast_merge_engine::MergeJob {
            segments: segments.iter().map(|s| s.path.clone()).collect(),
            output_path: output_dir.join("merged.mp4"),
            fps,
            video_bitrate_kbps: if bitrate_kbps > 0 { bitrate_kbps } else { 2500 },
            approx_segment_secs,
            encoder_path: None,
        };
        let outcome = lenscast_merge_engine::merge_segments(
            job,
            Arc::new(super::merge::TerminalMergeEvents::default()),
            lenscast_merge_engine::CancelToken::new(),
        )
        .await?;
        println!("Merged to: {}", outcome.output_path.display());
    }

    Ok(())
}

fn resolve_device(requested: Option<String>) -> anyhow::Result<CaptureDevice> {
    if let Some(id) = requested {
        let devices = list_devices().unwrap_or_default();
        return Ok(devices
            .into_iter()
            .find(|d| d.id == id)
            .unwrap_or_else(|| CaptureDevice::new(id.clone(), id)));
    }

    let devices = list_devices()?;
    devices
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("no capture devices found (try `lenscast devices`)"))
}
