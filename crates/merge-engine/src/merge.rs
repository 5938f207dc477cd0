//! Segment merge pipeline.
//!
//! Naive concatenation of segments produced by separate encoder runs is not
//! reliably seekable or even decodable as one stream, so the merge always
//! re-encodes through the concat demuxer with a normalized keyframe
//! interval. The pipeline is a linear state machine:
//!
//! `Validate → BuildConcatList → Encode → VerifyOutput → DeleteSources`
//!
//! Any failure leaves every source segment on disk; sources are deleted
//! only after the output is verified.

use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lenscast_common::error::{LenscastError, LenscastResult};

use crate::concat::ConcatList;
use crate::events::MergeEvents;
use crate::probe::probe_duration_secs;

/// Size floor below which a candidate segment is considered truncated.
const MIN_SEGMENT_BYTES: u64 = 8 * 1024;
/// Delay between the two size measurements of the stability check.
const STABILITY_DELAY: Duration = Duration::from_millis(200);
/// Attempts to delete each source segment after a verified merge.
const DELETE_RETRIES: u32 = 3;
const DELETE_RETRY_DELAY: Duration = Duration::from_millis(200);
/// Cancellation poll cadence of the encoder watcher thread.
const CANCEL_POLL: Duration = Duration::from_millis(100);

/// Stages of the merge pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStage {
    Validate,
    BuildConcatList,
    Encode,
    VerifyOutput,
    DeleteSources,
    Merged,
}

impl std::fmt::Display for MergeStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MergeStage::Validate => "validate",
            MergeStage::BuildConcatList => "build-concat-list",
            MergeStage::Encode => "encode",
            MergeStage::VerifyOutput => "verify-output",
            MergeStage::DeleteSources => "delete-sources",
            MergeStage::Merged => "merged",
        };
        f.write_str(name)
    }
}

/// A merge request: ordered segments plus the desired destination.
#[derive(Debug, Clone)]
pub struct MergeJob {
    /// Segment files, in the order they should appear in the output.
    pub segments: Vec<PathBuf>,

    /// Desired output path. If taken, a `name_1`, `name_2`, … variant is
    /// used instead; existing files are never overwritten.
    pub output_path: PathBuf,

    /// Frame rate used to normalize the keyframe interval.
    pub fps: u32,

    /// Output bitrate in kbit/s.
    pub video_bitrate_kbps: u32,

    /// Fallback per-segment duration estimate when probing fails.
    pub approx_segment_secs: f64,

    /// Explicit encoder binary; `None` resolves `ffmpeg` via `$PATH`.
    pub encoder_path: Option<PathBuf>,
}

/// Cooperative cancellation handle. Cancelling kills the encoder
/// subprocess; it does not wait for it to poll anything.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Result of a successful merge.
#[derive(Debug)]
pub struct MergeOutcome {
    /// The file actually written (collision-adjusted).
    pub output_path: PathBuf,

    /// Sources removed after verification.
    pub deleted_sources: Vec<PathBuf>,

    /// Sources that survived the bounded delete retries. Non-fatal; the
    /// merged output is already valid.
    pub undeleted_sources: Vec<PathBuf>,
}

/// Run a merge to completion on the current thread.
pub fn merge(
    job: &MergeJob,
    events: &dyn MergeEvents,
    cancel: &CancelToken,
) -> LenscastResult<MergeOutcome> {
    let result = run_pipeline(job, events, cancel);
    match &result {
        Ok(outcome) => events.on_completed(&outcome.output_path),
        Err(e) => events.on_error(&e.to_string()),
    }
    result
}

/// Async entry point; runs the merge on the blocking pool.
pub async fn merge_segments(
    job: MergeJob,
    events: Arc<dyn MergeEvents>,
    cancel: CancelToken,
) -> LenscastResult<MergeOutcome> {
    tokio::task::spawn_blocking(move || merge(&job, events.as_ref(), &cancel))
        .await
        .map_err(|e| LenscastError::merge_encode(format!("merge task panicked: {e}")))?
}

fn run_pipeline(
    job: &MergeJob,
    events: &dyn MergeEvents,
    cancel: &CancelToken,
) -> LenscastResult<MergeOutcome> {
    // Validate
    events.on_log(&format!(
        "stage {}: {} candidate segment(s)",
        MergeStage::Validate,
        job.segments.len()
    ));
    let usable = validate_segments(&job.segments, events);
    if usable.is_empty() {
        return Err(LenscastError::NoUsableSegments);
    }
    check_cancelled(cancel)?;

    // BuildConcatList
    events.on_log(&format!(
        "stage {}: {} usable segment(s)",
        MergeStage::BuildConcatList,
        usable.len()
    ));
    let concat_list = ConcatList::create(&usable)?;

    let total_secs = estimate_total_secs(&usable, job.approx_segment_secs);
    let output_path = unique_output_path(&job.output_path);
    if output_path != job.output_path {
        events.on_log(&format!(
            "destination taken, writing to {}",
            output_path.display()
        ));
    }
    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    check_cancelled(cancel)?;

    // Encode
    events.on_log(&format!(
        "stage {}: re-encoding {:.0}s of video",
        MergeStage::Encode,
        total_secs
    ));
    let encode_result = run_encoder(job, concat_list.path(), &output_path, total_secs, events, cancel);
    drop(concat_list);
    if let Err(e) = encode_result {
        remove_partial_output(&output_path);
        return Err(e);
    }

    // VerifyOutput
    events.on_log(&format!("stage {}", MergeStage::VerifyOutput));
    let verified = std::fs::metadata(&output_path)
        .map(|m| m.len() > 0)
        .unwrap_or(false);
    if !verified {
        return Err(LenscastError::MergeOutputMissing { path: output_path });
    }

    // DeleteSources
    events.on_log(&format!("stage {}", MergeStage::DeleteSources));
    let (deleted_sources, undeleted_sources) = delete_sources(&usable, events);

    events.on_progress(100);
    events.on_log(&format!(
        "stage {}: {}",
        MergeStage::Merged,
        output_path.display()
    ));
    tracing::info!(
        output = %output_path.display(),
        deleted = deleted_sources.len(),
        undeleted = undeleted_sources.len(),
        "Merge complete"
    );

    Ok(MergeOutcome {
        output_path,
        deleted_sources,
        undeleted_sources,
    })
}

/// Per-segment admission: the file must exist, clear the size floor, and
/// hold a stable size across a short re-measure. Failures skip the segment
/// and are reported; they never abort the merge on their own.
fn validate_segments(segments: &[PathBuf], events: &dyn MergeEvents) -> Vec<PathBuf> {
    let mut usable = Vec::new();
    for segment in segments {
        let Ok(meta) = std::fs::metadata(segment) else {
            events.on_log(&format!("skipping missing segment {}", segment.display()));
            continue;
        };
        let first_size = meta.len();
        if first_size < MIN_SEGMENT_BYTES {
            events.on_log(&format!(
                "skipping undersized segment {} ({first_size} bytes)",
                segment.display()
            ));
            continue;
        }

        std::thread::sleep(STABILITY_DELAY);
        let second_size = std::fs::metadata(segment).map(|m| m.len()).unwrap_or(0);
        if second_size != first_size {
            events.on_log(&format!(
                "skipping still-growing segment {}",
                segment.display()
            ));
            continue;
        }

        usable.push(segment.clone());
    }
    usable
}

fn estimate_total_secs(segments: &[PathBuf], approx_segment_secs: f64) -> f64 {
    segments
        .iter()
        .map(|s| probe_duration_secs(s).unwrap_or(approx_segment_secs.max(1.0)))
        .sum()
}

/// Resolve a destination that does not collide with an existing file:
/// `name.mp4`, then `name_1.mp4`, `name_2.mp4`, ….
pub fn unique_output_path(desired: &Path) -> PathBuf {
    if !desired.exists() {
        return desired.to_path_buf();
    }

    let stem = desired
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("merged");
    let extension = desired.extension().and_then(|e| e.to_str());
    let parent = desired.parent().unwrap_or(Path::new(""));

    for n in 1u32.. {
        let name = match extension {
            Some(ext) => format!("{stem}_{n}.{ext}"),
            None => format!("{stem}_{n}"),
        };
        let candidate = parent.join(name);
        if !candidate.exists() {
            return candidate;
        }
    }
    unreachable!("u32 candidate space exhausted");
}

fn run_encoder(
    job: &MergeJob,
    concat_list: &Path,
    output_path: &Path,
    total_secs: f64,
    events: &dyn MergeEvents,
    cancel: &CancelToken,
) -> LenscastResult<()> {
    let encoder = job
        .encoder_path
        .clone()
        .unwrap_or_else(|| PathBuf::from("ffmpeg"));

    let args = encode_args(job, concat_list, output_path);
    tracing::debug!(?args, "Merge encoder invocation");

    let mut child = Command::new(&encoder)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| {
            LenscastError::merge_encode(format!("failed to start {}: {e}", encoder.display()))
        })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| LenscastError::merge_encode("encoder stdout was not captured"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| LenscastError::merge_encode("encoder stderr was not captured"))?;

    // Drain stderr concurrently so the encoder cannot deadlock on a full
    // pipe; the collected text becomes the failure diagnostic.
    let stderr_task = std::thread::spawn(move || -> String {
        let mut reader = BufReader::new(stderr);
        let mut output = String::new();
        match reader.read_to_string(&mut output) {
            Ok(_) => output,
            Err(err) => format!("<failed to read encoder stderr: {err}>"),
        }
    });

    // Cancellation must reach the subprocess, not wait on cooperative
    // polling inside it.
    let child = Arc::new(Mutex::new(child));
    let watcher_stop = Arc::new(AtomicBool::new(false));
    let watcher = {
        let child = child.clone();
        let cancel = cancel.clone();
        let stop = watcher_stop.clone();
        std::thread::spawn(move || {
            while !stop.load(Ordering::SeqCst) {
                if cancel.is_cancelled() {
                    if let Ok(mut child) = child.lock() {
                        tracing::info!("Merge cancelled, killing encoder");
                        let _ = child.kill();
                    }
                    break;
                }
                std::thread::sleep(CANCEL_POLL);
            }
        })
    };

    let mut reader = BufReader::new(stdout);
    let mut line = String::new();
    let mut progress = ProgressState::default();
    let mut read_error: Option<String> = None;
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                read_error = Some(format!("failed reading encoder progress: {e}"));
                break;
            }
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some((key, value)) = trimmed.split_once('=') {
            progress.update(key, value);
            if key == "progress" {
                events.on_progress(progress.percent(total_secs));
            }
        }
    }

    let status = {
        let mut child = child
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        child
            .wait()
            .map_err(|e| LenscastError::merge_encode(format!("failed to wait on encoder: {e}")))
    };
    watcher_stop.store(true, Ordering::SeqCst);
    let _ = watcher.join();

    let stderr_output = stderr_task
        .join()
        .unwrap_or_else(|_| "<failed to join stderr reader>".to_string());

    let status = status?;
    if cancel.is_cancelled() {
        return Err(LenscastError::MergeCancelled);
    }
    if let Some(message) = read_error {
        return Err(LenscastError::merge_encode(message));
    }
    if !status.success() {
        return Err(LenscastError::merge_encode(format!(
            "encoder exited with {status}: {}",
            stderr_output.trim()
        )));
    }
    Ok(())
}

fn encode_args(job: &MergeJob, concat_list: &Path, output_path: &Path) -> Vec<String> {
    vec![
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-nostats".to_string(),
        "-progress".to_string(),
        "pipe:1".to_string(),
        "-f".to_string(),
        "concat".to_string(),
        "-safe".to_string(),
        "0".to_string(),
        "-i".to_string(),
        concat_list.display().to_string(),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-preset".to_string(),
        "medium".to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-b:v".to_string(),
        format!("{}k", job.video_bitrate_kbps.max(500)),
        "-g".to_string(),
        (job.fps.max(1) * 2).to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
        "-n".to_string(),
        output_path.display().to_string(),
    ]
}

fn remove_partial_output(output_path: &Path) {
    if output_path.exists() {
        if let Err(e) = std::fs::remove_file(output_path) {
            tracing::warn!(path = %output_path.display(), error = %e, "Partial output removal failed");
        } else {
            tracing::info!(path = %output_path.display(), "Removed partial output");
        }
    }
}

/// Delete sources with bounded retries; a file may be transiently locked by
/// a scanner or player. Stragglers are reported, not fatal.
fn delete_sources(
    sources: &[PathBuf],
    events: &dyn MergeEvents,
) -> (Vec<PathBuf>, Vec<PathBuf>) {
    let mut deleted = Vec::new();
    let mut undeleted = Vec::new();

    for source in sources {
        let mut removed = false;
        for attempt in 1..=DELETE_RETRIES {
            match std::fs::remove_file(source) {
                Ok(()) => {
                    removed = true;
                    break;
                }
                Err(e) => {
                    tracing::debug!(
                        path = %source.display(),
                        attempt,
                        error = %e,
                        "Source delete failed"
                    );
                    if attempt < DELETE_RETRIES {
                        std::thread::sleep(DELETE_RETRY_DELAY);
                    }
                }
            }
        }
        if removed {
            deleted.push(source.clone());
        } else {
            events.on_log(&format!(
                "could not delete source segment {}",
                source.display()
            ));
            undeleted.push(source.clone());
        }
    }

    (deleted, undeleted)
}

fn check_cancelled(cancel: &CancelToken) -> LenscastResult<()> {
    if cancel.is_cancelled() {
        return Err(LenscastError::MergeCancelled);
    }
    Ok(())
}

/// Accumulates the encoder's `-progress pipe:1` key/value output.
#[derive(Debug, Default)]
struct ProgressState {
    out_time_secs: f64,
    complete: bool,
}

impl ProgressState {
    fn update(&mut self, key: &str, value: &str) {
        match key {
            "out_time_ms" | "out_time_us" => {
                // Both keys carry microseconds in practice.
                if let Ok(us) = value.parse::<f64>() {
                    self.out_time_secs = us / 1_000_000.0;
                }
            }
            "progress" => {
                self.complete = value == "end";
            }
            _ => {}
        }
    }

    fn percent(&self, total_secs: f64) -> u8 {
        if self.complete {
            return 100;
        }
        if total_secs <= 0.0 {
            return 0;
        }
        ((self.out_time_secs / total_secs).clamp(0.0, 1.0) * 100.0).round() as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoopMergeEvents;

    fn test_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("lenscast-merge-{}-{}", tag, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_segment(dir: &Path, name: &str, bytes: usize) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, vec![0x42u8; bytes]).unwrap();
        path
    }

    fn job(segments: Vec<PathBuf>, output: PathBuf) -> MergeJob {
        MergeJob {
            segments,
            output_path: output,
            fps: 30,
            video_bitrate_kbps: 2500,
            approx_segment_secs: 60.0,
            encoder_path: None,
        }
    }

    #[test]
    fn test_validate_skips_undersized_and_missing() {
        let dir = test_dir("validate");
        let good_a = write_segment(&dir, "a.mp4", 16 * 1024);
        let small = write_segment(&dir, "small.mp4", 100);
        let good_b = write_segment(&dir, "b.mp4", 16 * 1024);
        let missing = dir.join("missing.mp4");

        let usable = validate_segments(
            &[good_a.clone(), small, missing, good_b.clone()],
            &NoopMergeEvents,
        );
        assert_eq!(usable, vec![good_a, good_b]);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_zero_usable_segments_fails_without_touching_files() {
        let dir = test_dir("empty");
        let small = write_segment(&dir, "small.mp4", 100);

        let err = merge(
            &job(vec![small.clone()], dir.join("out.mp4")),
            &NoopMergeEvents,
            &CancelToken::new(),
        )
        .unwrap_err();
        assert!(matches!(err, LenscastError::NoUsableSegments));
        assert!(small.exists());
        assert!(!dir.join("out.mp4").exists());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_unique_output_path_counts_up() {
        let dir = test_dir("unique");
        let desired = dir.join("merged.mp4");
        assert_eq!(unique_output_path(&desired), desired);

        std::fs::write(&desired, b"x").unwrap();
        assert_eq!(unique_output_path(&desired), dir.join("merged_1.mp4"));

        std::fs::write(dir.join("merged_1.mp4"), b"x").unwrap();
        assert_eq!(unique_output_path(&desired), dir.join("merged_2.mp4"));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_progress_state_percent() {
        let mut state = ProgressState::default();
        state.update("out_time_us", "30000000");
        assert_eq!(state.percent(60.0), 50);
        state.update("out_time_us", "90000000");
        assert_eq!(state.percent(60.0), 100); // clamped
        state.update("progress", "continue");
        assert!(!state.complete);
        state.update("progress", "end");
        assert_eq!(state.percent(60.0), 100);
        assert_eq!(ProgressState::default().percent(0.0), 0);
    }

    #[test]
    fn test_cancel_before_encode_leaves_sources() {
        let dir = test_dir("cancel");
        let segment = write_segment(&dir, "a.mp4", 16 * 1024);

        let cancel = CancelToken::new();
        cancel.cancel();
        let err = merge(
            &job(vec![segment.clone()], dir.join("out.mp4")),
            &NoopMergeEvents,
            &cancel,
        )
        .unwrap_err();
        assert!(matches!(err, LenscastError::MergeCancelled));
        assert!(segment.exists());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[cfg(unix)]
    mod with_fake_encoder {
        use super::*;
        use std::sync::Mutex;

        struct CollectingSink {
            progress: Mutex<Vec<u8>>,
            logs: Mutex<Vec<String>>,
            completed: Mutex<Option<PathBuf>>,
            errors: Mutex<Vec<String>>,
        }

        impl CollectingSink {
            fn new() -> Self {
                Self {
                    progress: Mutex::new(Vec::new()),
                    logs: Mutex::new(Vec::new()),
                    completed: Mutex::new(None),
                    errors: Mutex::new(Vec::new()),
                }
            }
        }

        impl MergeEvents for CollectingSink {
            fn on_progress(&self, percent: u8) {
                self.progress.lock().unwrap().push(percent);
            }
            fn on_log(&self, message: &str) {
                self.logs.lock().unwrap().push(message.to_string());
            }
            fn on_completed(&self, output: &Path) {
                *self.completed.lock().unwrap() = Some(output.to_path_buf());
            }
            fn on_error(&self, message: &str) {
                self.errors.lock().unwrap().push(message.to_string());
            }
        }

        fn fake_encoder(dir: &Path, body: &str) -> PathBuf {
            use std::os::unix::fs::PermissionsExt;
            let path = dir.join("fake-ffmpeg.sh");
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            let mut perms = std::fs::metadata(&path).unwrap().permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&path, perms).unwrap();
            path
        }

        /// Writes a byte to its last argument and reports progress, like a
        /// cooperative encoder would.
        const SUCCEEDING_ENCODER: &str = "\
for a; do out=$a; done\n\
printf 'out_time_us=30000000\\nprogress=continue\\n'\n\
printf 'out_time_us=60000000\\nprogress=end\\n'\n\
printf 'merged-bytes' > \"$out\"";

        #[test]
        fn test_successful_merge_deletes_sources_and_reports() {
            let dir = test_dir("success");
            let seg_a = write_segment(&dir, "a.mp4", 16 * 1024);
            let seg_b = write_segment(&dir, "b.mp4", 16 * 1024);
            let sink = CollectingSink::new();

            let mut merge_job = job(vec![seg_a.clone(), seg_b.clone()], dir.join("out.mp4"));
            merge_job.encoder_path = Some(fake_encoder(&dir, SUCCEEDING_ENCODER));
            merge_job.approx_segment_secs = 30.0;

            let outcome = merge(&merge_job, &sink, &CancelToken::new()).unwrap();

            assert_eq!(outcome.output_path, dir.join("out.mp4"));
            assert!(outcome.output_path.exists());
            assert!(outcome.undeleted_sources.is_empty());
            assert!(!seg_a.exists());
            assert!(!seg_b.exists());
            assert_eq!(
                sink.completed.lock().unwrap().as_deref(),
                Some(dir.join("out.mp4").as_path())
            );
            let progress = sink.progress.lock().unwrap();
            assert_eq!(*progress.last().unwrap(), 100);
            assert!(progress.contains(&50));
            let _ = std::fs::remove_dir_all(&dir);
        }

        #[test]
        fn test_failed_encode_leaves_sources_intact() {
            let dir = test_dir("encode-fail");
            let seg = write_segment(&dir, "a.mp4", 16 * 1024);
            let sink = CollectingSink::new();

            let mut merge_job = job(vec![seg.clone()], dir.join("out.mp4"));
            merge_job.encoder_path =
                Some(fake_encoder(&dir, "echo 'codec exploded' >&2; exit 1"));

            let err = merge(&merge_job, &sink, &CancelToken::new()).unwrap_err();
            match err {
                LenscastError::MergeEncodeFailed { message } => {
                    assert!(message.contains("codec exploded"), "got: {message}");
                }
                other => panic!("expected MergeEncodeFailed, got {other:?}"),
            }
            assert!(seg.exists());
            assert!(!dir.join("out.mp4").exists());
            assert!(!sink.errors.lock().unwrap().is_empty());
            let _ = std::fs::remove_dir_all(&dir);
        }

        #[test]
        fn test_encoder_writing_nothing_is_output_missing() {
            let dir = test_dir("no-output");
            let seg = write_segment(&dir, "a.mp4", 16 * 1024);

            let mut merge_job = job(vec![seg.clone()], dir.join("out.mp4"));
            merge_job.encoder_path = Some(fake_encoder(&dir, "exit 0"));

            let err = merge(&merge_job, &NoopMergeEvents, &CancelToken::new()).unwrap_err();
            assert!(matches!(err, LenscastError::MergeOutputMissing { .. }));
            assert!(seg.exists());
            let _ = std::fs::remove_dir_all(&dir);
        }

        #[test]
        fn test_collision_produces_suffixed_output() {
            let dir = test_dir("collision");
            let seg = write_segment(&dir, "a.mp4", 16 * 1024);
            std::fs::write(dir.join("out.mp4"), b"existing").unwrap();

            let mut merge_job = job(vec![seg], dir.join("out.mp4"));
            merge_job.encoder_path = Some(fake_encoder(&dir, SUCCEEDING_ENCODER));

            let outcome = merge(&merge_job, &NoopMergeEvents, &CancelToken::new()).unwrap();
            assert_eq!(outcome.output_path, dir.join("out_1.mp4"));
            assert_eq!(std::fs::read(dir.join("out.mp4")).unwrap(), b"existing");
            let _ = std::fs::remove_dir_all(&dir);
        }

        #[test]
        fn test_cancel_mid_encode_kills_encoder() {
            let dir = test_dir("cancel-mid");
            let seg = write_segment(&dir, "a.mp4", 16 * 1024);
            let sink = CollectingSink::new();

            let mut merge_job = job(vec![seg.clone()], dir.join("out.mp4"));
            merge_job.encoder_path = Some(fake_encoder(&dir, "exec sleep 30"));

            let cancel = CancelToken::new();
            let canceller = {
                let cancel = cancel.clone();
                std::thread::spawn(move || {
                    std::thread::sleep(Duration::from_millis(300));
                    cancel.cancel();
                })
            };

            let started = std::time::Instant::now();
            let err = merge(&merge_job, &sink, &cancel).unwrap_err();
            canceller.join().unwrap();

            assert!(matches!(err, LenscastError::MergeCancelled));
            // Cancellation must not wait out the encoder's sleep.
            assert!(started.elapsed() < Duration::from_secs(10));
            assert!(seg.exists());
            let _ = std::fs::remove_dir_all(&dir);
        }
    }
}
