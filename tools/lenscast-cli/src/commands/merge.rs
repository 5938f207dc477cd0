//! Merge recorded segments into one seekable file.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lenscast_merge_engine::{merge_segments, CancelToken, MergeEvents, MergeJob};

/// Merge progress printed to the terminal.
#[derive(Default)]
pub struct TerminalMergeEvents;

impl MergeEvents for TerminalMergeEvents {
    fn on_progress(&self, percent: u8) {
        print!("\r  merging... {percent:3}%");
        let _ = std::io::stdout().flush();
    }

    fn on_log(&self, message: &str) {
        tracing::info!("{message}");
    }

    fn on_completed(&self, output: &Path) {
        println!("\nMerge complete: {}", output.display());
    }

    fn on_error(&self, message: &str) {
        eprintln!("\nmerge failed: {message}");
    }
}

pub async fn run(
    dir: Option<PathBuf>,
    inputs: Vec<PathBuf>,
    output: PathBuf,
    fps: u32,
    bitrate: u32,
    segment_secs: u32,
) -> anyhow::Result<()> {
    let segments = match dir {
        Some(dir) => collect_segments(&dir)?,
        None => inputs,
    };
    if segments.is_empty() {
        anyhow::bail!("no segment files to merge");
    }

    println!("Merging {} segment(s) into {}", segments.len(), output.display());

    let job = MergeJob {
        segments,
        output_path: output,
        fps,
        video_bitrate_kbps: bitrate,
        approx_segment_secs: segment_secs as f64,
        encoder_path: None,
    };

    let outcome = merge_segments(job, Arc::new(TerminalMergeEvents), CancelToken::new()).await?;

    if !outcome.undeleted_sources.is_empty() {
        println!(
            "Note: {} source segment(s) could not be deleted:",
            outcome.undeleted_sources.len()
        );
        for path in &outcome.undeleted_sources {
            println!("  {}", path.display());
        }
    }

    Ok(())
}

/// All `.mp4` files in a directory, in filename order. The zero-padded
/// segment index makes that the recording order.
fn collect_segments(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut segments: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("mp4"))
        .collect();
    segments.sort();
    Ok(segments)
}
