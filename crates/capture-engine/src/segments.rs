//! Segment discovery and tracking.
//!
//! The encoder writes time-bounded segment files on its own schedule; the
//! scanner is the authoritative record of what exists on disk. Discovery is
//! poll-based, which races against files still being written — a candidate
//! is admitted only once its size clears the floor and holds steady across
//! a re-measure. The list is discovery-ordered; callers wanting recording
//! order sort by the zero-padded index in the file name.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use lenscast_common::error::LenscastResult;

/// A completed segment file on disk.
#[derive(Debug, Clone)]
pub struct VideoSegment {
    pub path: PathBuf,

    /// Approximate duration; the configured segment length, not a probe.
    pub approx_duration_secs: f64,

    pub created_at: DateTime<Utc>,

    pub size_bytes: u64,
}

/// Scanner admission thresholds.
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Files below this size are placeholders, not segments.
    pub min_segment_bytes: u64,

    /// Delay between the two size measurements of the stability check.
    pub stability_delay: Duration,

    /// Re-polls performed by the final sweep after stop.
    pub final_sweep_polls: u32,

    /// Delay before each final-sweep re-poll.
    pub final_sweep_delay: Duration,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            min_segment_bytes: 8 * 1024,
            stability_delay: Duration::from_millis(250),
            final_sweep_polls: 3,
            final_sweep_delay: Duration::from_millis(500),
        }
    }
}

/// Polls one output directory for segments belonging to one recording
/// session.
///
/// The `seen` set is scoped to the session: a new scanner is built per
/// recording, so stale names from a prior run can never suppress detection.
pub struct SegmentScanner {
    dir: PathBuf,
    prefix: String,
    segment_secs: u32,
    config: ScannerConfig,
    seen: HashSet<String>,
    segments: Vec<VideoSegment>,
}

impl SegmentScanner {
    pub fn new(
        dir: impl Into<PathBuf>,
        prefix: impl Into<String>,
        segment_secs: u32,
        config: ScannerConfig,
    ) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
            segment_secs,
            config,
            seen: HashSet::new(),
            segments: Vec::new(),
        }
    }

    /// All segments discovered so far, in discovery order.
    pub fn segments(&self) -> &[VideoSegment] {
        &self.segments
    }

    /// One poll pass. Returns only the newly admitted segments.
    pub fn scan(&mut self) -> Vec<VideoSegment> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(dir = %self.dir.display(), error = %e, "Segment scan failed");
                return Vec::new();
            }
        };

        let mut candidates: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| {
                        n.starts_with(&self.prefix) && n.ends_with(".mp4") && !self.seen.contains(n)
                    })
                    .unwrap_or(false)
            })
            .collect();
        candidates.sort();

        let mut discovered = Vec::new();
        for path in candidates {
            if let Some(segment) = self.admit(&path) {
                let name = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or_default()
                    .to_string();
                self.seen.insert(name);
                tracing::info!(
                    path = %segment.path.display(),
                    size = segment.size_bytes,
                    "Segment completed"
                );
                self.segments.push(segment.clone());
                discovered.push(segment);
            }
        }
        discovered
    }

    /// Admission check: size floor plus size stability across a short
    /// re-measure. A growing file is still being written and is left for a
    /// later poll.
    fn admit(&self, path: &Path) -> Option<VideoSegment> {
        let meta = std::fs::metadata(path).ok()?;
        let first_size = meta.len();
        if first_size < self.config.min_segment_bytes {
            return None;
        }

        std::thread::sleep(self.config.stability_delay);
        let second_size = std::fs::metadata(path).ok()?.len();
        if second_size != first_size {
            tracing::debug!(path = %path.display(), "Segment still growing, deferring");
            return None;
        }

        let created_at = meta
            .created()
            .or_else(|_| meta.modified())
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        Some(VideoSegment {
            path: path.to_path_buf(),
            approx_duration_secs: self.segment_secs as f64,
            created_at,
            size_bytes: second_size,
        })
    }

    /// Post-stop sweep: the encoder may still be flushing its final segment
    /// when termination completes, so re-poll a few times with a delay
    /// before declaring the list final.
    pub fn final_sweep(&mut self) -> Vec<VideoSegment> {
        let mut discovered = Vec::new();
        for _ in 0..self.config.final_sweep_polls {
            std::thread::sleep(self.config.final_sweep_delay);
            discovered.extend(self.scan());
        }
        discovered
    }
}

/// Delete segment files left behind by a previous aborted session.
///
/// Run before starting a new recording so failed runs cannot accumulate
/// segments indefinitely. Only files matching the segment naming pattern
/// are touched.
pub fn clean_stale_segments(dir: &Path) -> LenscastResult<u32> {
    if !dir.exists() {
        return Ok(0);
    }

    let mut removed = 0u32;
    for entry in std::fs::read_dir(dir)?.filter_map(|e| e.ok()) {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !is_segment_file_name(name) {
            continue;
        }
        match std::fs::remove_file(&path) {
            Ok(()) => {
                tracing::info!(path = %path.display(), "Removed stale segment");
                removed += 1;
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove stale segment");
            }
        }
    }
    Ok(removed)
}

/// Whether a file name matches the segment pattern
/// `rec_<YYYYmmdd>_<HHMMSS>_<NNN>.mp4`.
pub(crate) fn is_segment_file_name(name: &str) -> bool {
    let Some(rest) = name.strip_prefix("rec_") else {
        return false;
    };
    let Some(rest) = rest.strip_suffix(".mp4") else {
        return false;
    };

    let parts: Vec<&str> = rest.split('_').collect();
    if parts.len() != 3 {
        return false;
    }
    let all_digits = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());
    parts[0].len() == 8
        && parts[1].len() == 6
        && parts[2].len() == 3
        && parts.iter().all(|p| all_digits(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "lenscast-segments-{}-{}",
            tag,
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn fast_config() -> ScannerConfig {
        ScannerConfig {
            min_segment_bytes: 64,
            stability_delay: Duration::from_millis(20),
            final_sweep_polls: 2,
            final_sweep_delay: Duration::from_millis(10),
        }
    }

    #[test]
    fn test_discovers_matching_segments_once() {
        let dir = test_dir("dedup");
        std::fs::write(dir.join("rec_20260807_101500_000.mp4"), vec![0u8; 128]).unwrap();
        std::fs::write(dir.join("rec_20260807_101500_001.mp4"), vec![0u8; 128]).unwrap();
        std::fs::write(dir.join("unrelated.mp4"), vec![0u8; 128]).unwrap();

        let mut scanner =
            SegmentScanner::new(&dir, "rec_20260807_101500_", 60, fast_config());
        let first = scanner.scan();
        assert_eq!(first.len(), 2);
        assert!(first[0].path.to_str().unwrap().ends_with("_000.mp4"));

        // Never double-reported, however often the poller runs.
        assert!(scanner.scan().is_empty());
        assert!(scanner.scan().is_empty());
        assert_eq!(scanner.segments().len(), 2);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_undersized_file_deferred_until_it_clears_floor() {
        let dir = test_dir("floor");
        let path = dir.join("rec_20260807_101500_000.mp4");
        std::fs::write(&path, vec![0u8; 16]).unwrap();

        let mut scanner =
            SegmentScanner::new(&dir, "rec_20260807_101500_", 60, fast_config());
        assert!(scanner.scan().is_empty());

        std::fs::write(&path, vec![0u8; 256]).unwrap();
        let found = scanner.scan();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].size_bytes, 256);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_growing_file_is_skipped() {
        use std::io::Write;

        let dir = test_dir("growing");
        let path = dir.join("rec_20260807_101500_000.mp4");
        std::fs::write(&path, vec![0u8; 128]).unwrap();

        let config = ScannerConfig {
            stability_delay: Duration::from_millis(200),
            ..fast_config()
        };
        let mut scanner = SegmentScanner::new(&dir, "rec_20260807_101500_", 60, config);

        // Append while the scanner sits in its stability window.
        let writer_path = path.clone();
        let writer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            let mut f = std::fs::OpenOptions::new()
                .append(true)
                .open(&writer_path)
                .unwrap();
            f.write_all(&[0u8; 64]).unwrap();
        });

        assert!(scanner.scan().is_empty());
        writer.join().unwrap();

        // Once the file stops growing, the next poll admits it.
        let found = scanner.scan();
        assert_eq!(found.len(), 1);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_final_sweep_picks_up_late_segment() {
        let dir = test_dir("sweep");
        let mut scanner =
            SegmentScanner::new(&dir, "rec_20260807_101500_", 60, fast_config());
        assert!(scanner.scan().is_empty());

        // Segment lands after "stop", as a flushing encoder would write it.
        std::fs::write(dir.join("rec_20260807_101500_004.mp4"), vec![0u8; 128]).unwrap();
        let found = scanner.final_sweep();
        assert_eq!(found.len(), 1);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_clean_stale_segments_matches_pattern_only() {
        let dir = test_dir("clean");
        std::fs::write(dir.join("rec_20250101_090000_000.mp4"), b"old").unwrap();
        std::fs::write(dir.join("rec_20250101_090000_001.mp4"), b"old").unwrap();
        std::fs::write(dir.join("keepme.mp4"), b"keep").unwrap();
        std::fs::write(dir.join("rec_notes.txt"), b"keep").unwrap();

        let removed = clean_stale_segments(&dir).unwrap();
        assert_eq!(removed, 2);
        assert!(dir.join("keepme.mp4").exists());
        assert!(dir.join("rec_notes.txt").exists());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_segment_file_name_pattern() {
        assert!(is_segment_file_name("rec_20260807_101500_000.mp4"));
        assert!(is_segment_file_name("rec_20260807_101500_123.mp4"));
        assert!(!is_segment_file_name("rec_20260807_101500_000.mkv"));
        assert!(!is_segment_file_name("rec_2026_1015_000.mp4"));
        assert!(!is_segment_file_name("clip_20260807_101500_000.mp4"));
        assert!(!is_segment_file_name("rec_20260807_101500.mp4"));
        assert!(!is_segment_file_name("rec_20260807_101500_00a.mp4"));
    }
}
