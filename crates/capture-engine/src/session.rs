//! Capture session orchestration.
//!
//! A session owns one encoder process and the threads around it: a preview
//! reader demultiplexing stdout, a stderr drain, a dispatch loop that is the
//! single consumer of stream events, and a timer driving elapsed-time
//! updates and segment polling. All state is per-session; nothing lives in
//! process-wide globals.

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::Local;
use lenscast_common::config::RecordingDefaults;
use lenscast_common::error::{LenscastError, LenscastResult};
use lenscast_common::timing::{format_hms, RecordingTimeline};

use crate::demux::{run_preview_reader, DemuxConfig, FrameDemuxer, StreamEvent};
use crate::device::CaptureDevice;
use crate::encoder::{find_ffmpeg, segment_file_prefix, CaptureMode, EncoderCommand};
use crate::events::{CaptureEvents, NoopEvents};
use crate::process::EncoderProcess;
use crate::segments::{clean_stale_segments, ScannerConfig, SegmentScanner, VideoSegment};

/// Kept stderr lines for startup diagnostics.
const STDERR_KEEP_LINES: usize = 200;

/// State of a capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Session created but not started.
    Idle,
    /// Capture in progress.
    Recording,
    /// Recording paused (timeline frozen, encoder still running).
    Paused,
    /// Session stopped, segment list final.
    Stopped,
    /// Startup failed.
    Error,
}

/// Configuration for starting a new capture session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Capture device to read from.
    pub device: CaptureDevice,

    /// Which outputs to produce.
    pub mode: CaptureMode,

    /// Directory segment files are written to.
    pub output_dir: PathBuf,

    pub width: u32,
    pub height: u32,
    pub fps: u32,

    /// Segment bitrate in kbit/s; zero selects the bits-per-pixel estimate.
    pub video_bitrate_kbps: u32,

    /// Segment duration in seconds.
    pub segment_secs: u32,

    /// MJPEG preview quality (2..=31).
    pub preview_quality: u32,

    /// Input demuxer name handed to the encoder.
    pub input_format: String,

    /// Explicit encoder binary; `None` runs discovery.
    pub encoder_path: Option<PathBuf>,

    /// Demultiplexer thresholds.
    pub demux: DemuxConfig,

    /// Segment scanner thresholds.
    pub scanner: ScannerConfig,

    /// How long the encoder may take to come up before it is declared dead.
    pub startup_window: Duration,

    /// Graceful-termination wait before escalating to a kill.
    pub graceful_stop_wait: Duration,

    /// Cadence of `on_time_update`.
    pub time_update_interval: Duration,

    /// Cadence of segment polling.
    pub segment_poll_interval: Duration,
}

impl SessionConfig {
    pub fn new(device: CaptureDevice, mode: CaptureMode, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            device,
            mode,
            output_dir: output_dir.into(),
            width: 1280,
            height: 720,
            fps: 30,
            video_bitrate_kbps: 0,
            segment_secs: 60,
            preview_quality: 5,
            input_format: "v4l2".to_string(),
            encoder_path: None,
            demux: DemuxConfig::default(),
            scanner: ScannerConfig::default(),
            startup_window: Duration::from_millis(1500),
            graceful_stop_wait: Duration::from_secs(3),
            time_update_interval: Duration::from_millis(250),
            segment_poll_interval: Duration::from_secs(2),
        }
    }

    /// Build a config from the application defaults.
    pub fn from_defaults(
        device: CaptureDevice,
        mode: CaptureMode,
        output_dir: impl Into<PathBuf>,
        defaults: &RecordingDefaults,
    ) -> Self {
        let mut config = Self::new(device, mode, output_dir);
        config.width = defaults.width;
        config.height = defaults.height;
        config.fps = defaults.fps;
        config.video_bitrate_kbps = defaults.video_bitrate_kbps;
        config.segment_secs = defaults.segment_secs;
        config.preview_quality = defaults.preview_quality;
        config
    }

    fn effective_bitrate_kbps(&self) -> u32 {
        if self.video_bitrate_kbps > 0 {
            return self.video_bitrate_kbps;
        }
        let pixels = self.width as u64 * self.height as u64;
        ((pixels * self.fps as u64 / 10) / 1000) as u32
    }
}

/// One capture session: encoder process plus its reader, dispatch, and
/// timer threads.
pub struct CaptureSession {
    config: SessionConfig,
    state: SessionState,
    events: Arc<dyn CaptureEvents>,
    process: Option<EncoderProcess>,
    timeline: Option<Arc<Mutex<RecordingTimeline>>>,
    scanner: Option<Arc<Mutex<SegmentScanner>>>,
    stop_flag: Arc<AtomicBool>,
    stderr_lines: Arc<Mutex<Vec<String>>>,
    threads: Vec<JoinHandle<()>>,
}

impl CaptureSession {
    pub fn new(config: SessionConfig, events: Arc<dyn CaptureEvents>) -> Self {
        Self {
            config,
            state: SessionState::Idle,
            events,
            process: None,
            timeline: None,
            scanner: None,
            stop_flag: Arc::new(AtomicBool::new(false)),
            stderr_lines: Arc::new(Mutex::new(Vec::new())),
            threads: Vec::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Start the encoder and all session threads.
    pub fn start(&mut self) -> LenscastResult<()> {
        if self.state != SessionState::Idle {
            return Err(LenscastError::capture("Session already started"));
        }

        tracing::info!(
            device = %self.config.device.id,
            mode = ?self.config.mode,
            "Starting capture session"
        );

        if self.config.mode.records() {
            std::fs::create_dir_all(&self.config.output_dir)?;
            let removed = clean_stale_segments(&self.config.output_dir)?;
            if removed > 0 {
                tracing::info!(removed, "Cleaned stale segments from previous session");
            }
        }

        let encoder = match &self.config.encoder_path {
            Some(path) => path.clone(),
            None => find_ffmpeg()?,
        };

        let prefix = segment_file_prefix(Local::now());
        let command = EncoderCommand {
            device: self.config.device.clone(),
            mode: self.config.mode,
            width: self.config.width,
            height: self.config.height,
            fps: self.config.fps,
            video_bitrate_kbps: self.config.effective_bitrate_kbps(),
            preview_quality: self.config.preview_quality,
            segment_secs: self.config.segment_secs,
            segment_pattern: self.config.output_dir.join(format!("{prefix}%03d.mp4")),
            input_format: self.config.input_format.clone(),
        };
        let args = command.build();
        tracing::debug!(?args, "Encoder invocation");

        let mut process = EncoderProcess::spawn(&encoder, &args)?;
        let active = process.active_flag();

        if let Some(stderr) = process.take_stderr() {
            self.threads.push(self.spawn_stderr_drain(stderr, active.clone()));
        }

        if self.config.mode.has_preview() {
            let stdout = process.take_stdout().ok_or_else(|| {
                LenscastError::capture("Encoder stdout endpoint was not captured")
            })?;
            let (tx, rx) = mpsc::channel::<StreamEvent>();
            let demuxer = FrameDemuxer::new(self.config.demux.clone());

            let reader_active = active.clone();
            self.threads.push(std::thread::spawn(move || {
                run_preview_reader(stdout, demuxer, tx, reader_active);
            }));
            self.threads.push(self.spawn_dispatch(rx, active.clone(), process.frame_counter()));
        } else {
            // No preview output; release the endpoint.
            drop(process.take_stdout());
        }

        if let Err(e) = process.wait_until_ready(self.config.startup_window, &self.stderr_lines) {
            self.stop_flag.store(true, Ordering::SeqCst);
            for handle in self.threads.drain(..) {
                let _ = handle.join();
            }
            self.state = SessionState::Error;
            return Err(e);
        }

        let started = RecordingTimeline::start();
        tracing::info!(started_wall = %started.started_wall(), "Recording timeline started");
        let timeline = Arc::new(Mutex::new(started));
        self.timeline = Some(timeline.clone());

        let scanner = if self.config.mode.records() {
            let scanner = Arc::new(Mutex::new(SegmentScanner::new(
                &self.config.output_dir,
                prefix,
                self.config.segment_secs,
                self.config.scanner.clone(),
            )));
            self.scanner = Some(scanner.clone());
            Some(scanner)
        } else {
            None
        };

        self.threads.push(self.spawn_timer(timeline, scanner));

        self.process = Some(process);
        self.state = SessionState::Recording;
        if self.config.mode.records() {
            self.events.on_recording_started();
        }

        tracing::info!("Capture session started");
        Ok(())
    }

    /// Stop the session. Idempotent: calling on a stopped (or never
    /// started) session is a no-op that returns the current segment list.
    pub fn stop(&mut self) -> LenscastResult<Vec<VideoSegment>> {
        if self.state != SessionState::Recording && self.state != SessionState::Paused {
            return Ok(self.segments());
        }

        tracing::info!("Stopping capture session");
        self.stop_flag.store(true, Ordering::SeqCst);

        if let Some(process) = self.process.as_mut() {
            process.stop(self.config.graceful_stop_wait);
        }
        self.process = None;

        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }

        // The encoder may have flushed a final segment after the last poll.
        if let Some(scanner) = &self.scanner {
            let late = lock_unpoisoned(scanner).final_sweep();
            for segment in &late {
                self.events.on_segment_completed(segment);
            }
        }

        self.state = SessionState::Stopped;
        if self.config.mode.records() {
            self.events.on_recording_stopped();
        }

        let segments = self.segments();
        tracing::info!(segments = segments.len(), "Capture session stopped");
        Ok(segments)
    }

    /// Pause the recording timeline. No-op unless actively recording.
    pub fn pause(&mut self) -> LenscastResult<()> {
        if self.state != SessionState::Recording {
            return Err(LenscastError::capture("Not recording"));
        }
        if let Some(timeline) = &self.timeline {
            lock_unpoisoned(timeline).pause();
        }
        self.state = SessionState::Paused;
        self.events.on_recording_paused();
        tracing::info!("Recording paused");
        Ok(())
    }

    /// Resume a paused recording.
    pub fn resume(&mut self) -> LenscastResult<()> {
        if self.state != SessionState::Paused {
            return Err(LenscastError::capture("Not paused"));
        }
        if let Some(timeline) = &self.timeline {
            lock_unpoisoned(timeline).resume();
        }
        self.state = SessionState::Recording;
        self.events.on_recording_resumed();
        tracing::info!("Recording resumed");
        Ok(())
    }

    /// Teardown superset of `stop` for process exit: swallows every
    /// internal error, tolerates a partially constructed session, and
    /// detaches the event sink.
    pub fn shutdown(&mut self) {
        self.events = Arc::new(NoopEvents);
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Some(process) = self.process.as_mut() {
            process.stop(Duration::from_millis(500));
        }
        self.process = None;
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
        self.state = SessionState::Stopped;
    }

    /// Elapsed recording time, excluding pauses.
    pub fn elapsed(&self) -> Duration {
        self.timeline
            .as_ref()
            .map(|t| lock_unpoisoned(t).elapsed())
            .unwrap_or(Duration::ZERO)
    }

    /// Segments discovered so far, in discovery order.
    pub fn segments(&self) -> Vec<VideoSegment> {
        self.scanner
            .as_ref()
            .map(|s| lock_unpoisoned(s).segments().to_vec())
            .unwrap_or_default()
    }

    fn spawn_stderr_drain(
        &self,
        stderr: std::process::ChildStderr,
        active: Arc<AtomicBool>,
    ) -> JoinHandle<()> {
        let sink = self.stderr_lines.clone();
        let events = self.events.clone();
        let report_death = !self.config.mode.has_preview();
        let records = self.config.mode.records();

        std::thread::spawn(move || {
            for line in std::io::BufReader::new(stderr).lines() {
                match line {
                    Ok(line) => {
                        if !line.trim().is_empty() {
                            tracing::debug!(target: "lenscast::encoder", "{line}");
                        }
                        let mut lines = match sink.lock() {
                            Ok(guard) => guard,
                            Err(poisoned) => poisoned.into_inner(),
                        };
                        if lines.len() >= STDERR_KEEP_LINES {
                            lines.remove(0);
                        }
                        lines.push(line);
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "Encoder stderr closed");
                        break;
                    }
                }
            }
            // Without a preview reader, stderr EOF is the death signal.
            if report_death && active.load(Ordering::SeqCst) {
                let message = "encoder process exited unexpectedly";
                tracing::warn!("{message}");
                if records {
                    events.on_recording_error(message);
                }
            }
        })
    }

    fn spawn_dispatch(
        &self,
        rx: mpsc::Receiver<StreamEvent>,
        active: Arc<AtomicBool>,
        frame_counter: Arc<std::sync::atomic::AtomicU64>,
    ) -> JoinHandle<()> {
        let events = self.events.clone();
        let records = self.config.mode.records();

        std::thread::spawn(move || {
            while let Ok(event) = rx.recv() {
                match event {
                    StreamEvent::Frame(frame) => {
                        frame_counter.fetch_add(1, Ordering::Relaxed);
                        events.on_frame(&frame);
                    }
                    StreamEvent::Ended => {
                        if active.load(Ordering::SeqCst) {
                            let message = "encoder process exited unexpectedly";
                            tracing::warn!("{message}");
                            events.on_preview_error(message);
                            if records {
                                events.on_recording_error(message);
                            }
                        }
                        break;
                    }
                    StreamEvent::Failed(message) => {
                        events.on_preview_error(&message);
                        break;
                    }
                }
            }
            tracing::debug!("Dispatch loop exiting");
        })
    }

    fn spawn_timer(
        &self,
        timeline: Arc<Mutex<RecordingTimeline>>,
        scanner: Option<Arc<Mutex<SegmentScanner>>>,
    ) -> JoinHandle<()> {
        let events = self.events.clone();
        let stop_flag = self.stop_flag.clone();
        let tick = self.config.time_update_interval;
        let poll_interval = self.config.segment_poll_interval;

        std::thread::spawn(move || {
            let mut since_poll = Duration::ZERO;
            while !stop_flag.load(Ordering::SeqCst) {
                std::thread::sleep(tick);

                let elapsed = lock_unpoisoned(&timeline).elapsed();
                events.on_time_update(&format_hms(elapsed));

                since_poll += tick;
                if since_poll >= poll_interval {
                    since_poll = Duration::ZERO;
                    if let Some(scanner) = &scanner {
                        let discovered = lock_unpoisoned(scanner).scan();
                        if !discovered.is_empty() {
                            let mut timeline = lock_unpoisoned(&timeline);
                            for _ in &discovered {
                                timeline.advance_segment();
                            }
                        }
                        for segment in &discovered {
                            events.on_segment_completed(segment);
                        }
                    }
                }
            }
        })
    }
}

/// Enforces the one-active-session invariant: starting while a session is
/// active fully stops the previous one first, so two encoder processes can
/// never contend for the same capture target.
pub struct CaptureSupervisor {
    active: Mutex<Option<CaptureSession>>,
}

impl CaptureSupervisor {
    pub fn new() -> Self {
        Self {
            active: Mutex::new(None),
        }
    }

    /// Start a session, stopping any existing one first.
    pub fn start(
        &self,
        config: SessionConfig,
        events: Arc<dyn CaptureEvents>,
    ) -> LenscastResult<()> {
        let mut guard = lock_unpoisoned(&self.active);

        if let Some(mut existing) = guard.take() {
            tracing::info!("Stopping existing session before starting a new one");
            if let Err(e) = existing.stop() {
                tracing::warn!(error = %e, "Failed to stop previous session cleanly");
            }
        }

        let mut session = CaptureSession::new(config, events);
        match session.start() {
            Ok(()) => {
                *guard = Some(session);
                Ok(())
            }
            Err(e) => {
                session.shutdown();
                Err(e)
            }
        }
    }

    /// Stop the active session. No-op when nothing is running.
    pub fn stop(&self) -> LenscastResult<Vec<VideoSegment>> {
        let mut guard = lock_unpoisoned(&self.active);
        match guard.as_mut() {
            Some(session) => session.stop(),
            None => Ok(Vec::new()),
        }
    }

    pub fn pause(&self) -> LenscastResult<()> {
        let mut guard = lock_unpoisoned(&self.active);
        match guard.as_mut() {
            Some(session) => session.pause(),
            None => Err(LenscastError::capture("No active session")),
        }
    }

    pub fn resume(&self) -> LenscastResult<()> {
        let mut guard = lock_unpoisoned(&self.active);
        match guard.as_mut() {
            Some(session) => session.resume(),
            None => Err(LenscastError::capture("No active session")),
        }
    }

    /// Process-exit teardown. Never errors.
    pub fn shutdown(&self) {
        let mut guard = lock_unpoisoned(&self.active);
        if let Some(mut session) = guard.take() {
            session.shutdown();
        }
    }

    pub fn is_active(&self) -> bool {
        lock_unpoisoned(&self.active)
            .as_ref()
            .map(|s| {
                matches!(
                    s.state(),
                    SessionState::Recording | SessionState::Paused
                )
            })
            .unwrap_or(false)
    }

    /// Segments of the active (or last) session.
    pub fn segments(&self) -> Vec<VideoSegment> {
        lock_unpoisoned(&self.active)
            .as_ref()
            .map(|s| s.segments())
            .unwrap_or_default()
    }
}

impl Default for CaptureSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
