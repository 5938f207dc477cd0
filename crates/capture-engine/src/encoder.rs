//! Encoder binary discovery and invocation building.
//!
//! One ffmpeg invocation serves up to two outputs from a single capture
//! pass: an MJPEG preview stream on stdout and H.264 segment files on disk.

use std::path::{Path, PathBuf};
use std::process::Command;

use chrono::{DateTime, Local};
use lenscast_common::error::{LenscastError, LenscastResult};

use crate::device::CaptureDevice;

/// Well-known encoder installation locations probed before falling back to
/// `$PATH` resolution.
const FFMPEG_PROBE_PATHS: &[&str] = &[
    "/usr/bin/ffmpeg",
    "/usr/local/bin/ffmpeg",
    "/opt/ffmpeg/bin/ffmpeg",
    "/snap/bin/ffmpeg",
];

/// What outputs a session produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    /// MJPEG preview frames on stdout only.
    Preview,
    /// Segment files on disk only.
    Record,
    /// Tee: both outputs from one capture pass.
    PreviewAndRecord,
}

impl CaptureMode {
    pub fn has_preview(&self) -> bool {
        matches!(self, CaptureMode::Preview | CaptureMode::PreviewAndRecord)
    }

    pub fn records(&self) -> bool {
        matches!(self, CaptureMode::Record | CaptureMode::PreviewAndRecord)
    }
}

/// Locate a working ffmpeg binary.
///
/// Probes fixed installation paths first, then the bare name via `$PATH`.
/// A candidate counts only if `-version` runs successfully.
pub fn find_ffmpeg() -> LenscastResult<PathBuf> {
    for candidate in FFMPEG_PROBE_PATHS {
        let path = Path::new(candidate);
        if path.exists() && version_check(path) {
            return Ok(path.to_path_buf());
        }
    }

    let bare = PathBuf::from("ffmpeg");
    if version_check(&bare) {
        return Ok(bare);
    }

    Err(LenscastError::unsupported(
        "ffmpeg not found (probed standard locations and $PATH)",
    ))
}

/// Liveness check: run `<binary> -version` and require success.
pub fn version_check(binary: &Path) -> bool {
    Command::new(binary)
        .arg("-version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

/// File-name prefix for one recording session's segments, encoding the
/// session start timestamp. Segment files are `<prefix><NNN>.mp4`.
pub fn segment_file_prefix(session_start: DateTime<Local>) -> String {
    format!("rec_{}_", session_start.format("%Y%m%d_%H%M%S"))
}

/// Builder for the encoder argument list.
#[derive(Debug, Clone)]
pub struct EncoderCommand {
    pub device: CaptureDevice,
    pub mode: CaptureMode,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Bitrate for recorded segments in kbit/s.
    pub video_bitrate_kbps: u32,
    /// MJPEG quality for the preview stream (2..=31, lower is better).
    pub preview_quality: u32,
    /// Duration of each segment file in seconds.
    pub segment_secs: u32,
    /// Segment output pattern, e.g. `<dir>/rec_20260807_101500_%03d.mp4`.
    pub segment_pattern: PathBuf,
    /// Input demuxer name. `v4l2` for local camera nodes.
    pub input_format: String,
}

impl EncoderCommand {
    pub fn build(&self) -> Vec<String> {
        let mut args = vec![
            "-hide_banner".to_string(),
            "-f".to_string(),
            self.input_format.clone(),
            "-framerate".to_string(),
            self.fps.to_string(),
            "-video_size".to_string(),
            format!("{}x{}", self.width, self.height),
            "-i".to_string(),
            self.device.id.clone(),
        ];

        if self.mode.has_preview() {
            args.extend([
                "-map".to_string(),
                "0:v".to_string(),
                "-c:v".to_string(),
                "mjpeg".to_string(),
                "-q:v".to_string(),
                self.preview_quality.clamp(2, 31).to_string(),
                "-f".to_string(),
                "mjpeg".to_string(),
                "pipe:1".to_string(),
            ]);
        }

        if self.mode.records() {
            args.extend([
                "-map".to_string(),
                "0:v".to_string(),
                "-c:v".to_string(),
                "libx264".to_string(),
                "-preset".to_string(),
                "veryfast".to_string(),
                "-pix_fmt".to_string(),
                "yuv420p".to_string(),
                "-b:v".to_string(),
                format!("{}k", self.video_bitrate_kbps.max(500)),
                "-g".to_string(),
                (self.fps * 2).to_string(),
                "-f".to_string(),
                "segment".to_string(),
                "-segment_time".to_string(),
                self.segment_secs.max(1).to_string(),
                "-reset_timestamps".to_string(),
                "1".to_string(),
                self.segment_pattern.display().to_string(),
            ]);
        }

        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn command(mode: CaptureMode) -> EncoderCommand {
        EncoderCommand {
            device: CaptureDevice::new("/dev/video0", "Test Camera"),
            mode,
            width: 1280,
            height: 720,
            fps: 30,
            video_bitrate_kbps: 2500,
            preview_quality: 5,
            segment_secs: 60,
            segment_pattern: PathBuf::from("/tmp/out/rec_20260807_101500_%03d.mp4"),
            input_format: "v4l2".to_string(),
        }
    }

    #[test]
    fn test_preview_args_stream_to_stdout() {
        let args = command(CaptureMode::Preview).build();
        assert!(args.contains(&"pipe:1".to_string()));
        assert!(args.contains(&"mjpeg".to_string()));
        assert!(!args.iter().any(|a| a == "segment"));
    }

    #[test]
    fn test_record_args_use_segment_muxer() {
        let args = command(CaptureMode::Record).build();
        assert!(!args.contains(&"pipe:1".to_string()));
        assert!(args.contains(&"segment".to_string()));
        assert!(args.contains(&"-reset_timestamps".to_string()));
        assert!(args.contains(&"2500k".to_string()));
        // Normalized keyframe interval: two seconds of frames.
        let g_pos = args.iter().position(|a| a == "-g").unwrap();
        assert_eq!(args[g_pos + 1], "60");
        assert_eq!(
            args.last().unwrap(),
            "/tmp/out/rec_20260807_101500_%03d.mp4"
        );
    }

    #[test]
    fn test_tee_mode_emits_both_outputs() {
        let args = command(CaptureMode::PreviewAndRecord).build();
        assert!(args.contains(&"pipe:1".to_string()));
        assert!(args.contains(&"segment".to_string()));
        // Single input, mapped twice.
        assert_eq!(args.iter().filter(|a| *a == "-i").count(), 1);
        assert_eq!(args.iter().filter(|a| *a == "-map").count(), 2);
    }

    #[test]
    fn test_segment_file_prefix_encodes_timestamp() {
        let start = Local.with_ymd_and_hms(2026, 8, 7, 10, 15, 0).unwrap();
        assert_eq!(segment_file_prefix(start), "rec_20260807_101500_");
    }
}
