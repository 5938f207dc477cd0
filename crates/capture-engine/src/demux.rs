//! Preview frame demultiplexing.
//!
//! The encoder's preview output is a continuous MJPEG byte stream with no
//! framing guarantees. Frames are recovered by scanning for the JPEG
//! start-of-image / end-of-image marker pairs, then filtered through the
//! warm-up skip, minimum-size, blank-frame, and delivery-rate policies
//! before they reach the caller.

use std::io::Read;
use std::process::ChildStdout;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::Instant;

use lenscast_common::timing::RateController;

/// JPEG start-of-image marker.
pub const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];
/// JPEG end-of-image marker.
pub const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];

/// Demultiplexer thresholds.
///
/// The filter values are empirically tuned defaults, not guarantees; callers
/// with unusual hardware can override them per session.
#[derive(Debug, Clone)]
pub struct DemuxConfig {
    pub start_marker: [u8; 2],
    pub end_marker: [u8; 2],

    /// Candidate frames discarded at stream start; encoder warm-up often
    /// emits corrupt leading frames.
    pub warmup_skip: u64,

    /// Candidates below this size are discarded as noise.
    pub min_frame_bytes: usize,

    /// Sample prefix length for the blank-frame check.
    pub blank_sample_bytes: usize,

    /// A frame is "blank" when the zero-byte fraction of the sample prefix
    /// exceeds this value.
    pub blank_zero_fraction: f64,

    /// Accumulator hard cap; exceeding it without a terminator resets
    /// framing.
    pub max_buffer_bytes: usize,

    /// Delivery ceiling; frames arriving faster are dropped.
    pub max_fps: u32,
}

impl Default for DemuxConfig {
    fn default() -> Self {
        Self {
            start_marker: JPEG_SOI,
            end_marker: JPEG_EOI,
            warmup_skip: 2,
            min_frame_bytes: 1024,
            blank_sample_bytes: 4096,
            blank_zero_fraction: 0.8,
            max_buffer_bytes: 2 * 1024 * 1024,
            max_fps: 60,
        }
    }
}

/// One complete preview frame. Constructed here, handed to the caller's
/// frame callback, never retained.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Raw frame bytes, including both markers.
    pub data: Vec<u8>,

    /// Delivery sequence number (post-filtering).
    pub sequence: u64,
}

/// Incremental marker-scanning parser.
///
/// Feed it raw chunks via [`FrameDemuxer::push`]; it returns the frames that
/// survive filtering. Arrival timestamps are passed in explicitly so the
/// rate ceiling is deterministic under test.
pub struct FrameDemuxer {
    config: DemuxConfig,
    buffer: Vec<u8>,
    in_frame: bool,
    scan_from: usize,
    candidates_seen: u64,
    delivered: u64,
    rate: RateController,
}

impl FrameDemuxer {
    pub fn new(config: DemuxConfig) -> Self {
        let rate = RateController::new(config.max_fps);
        Self {
            config,
            buffer: Vec::new(),
            in_frame: false,
            scan_from: 0,
            candidates_seen: 0,
            delivered: 0,
            rate,
        }
    }

    /// Frames delivered so far.
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    /// Feed a chunk of stream bytes, returning any complete frames that
    /// pass the filters. `now_ns` is the chunk's arrival time on any
    /// monotonic nanosecond scale.
    pub fn push(&mut self, bytes: &[u8], now_ns: u64) -> Vec<Frame> {
        let mut out = Vec::new();
        self.buffer.extend_from_slice(bytes);

        loop {
            if !self.in_frame {
                match find_marker(&self.buffer, self.config.start_marker, self.scan_from) {
                    Some(start) => {
                        // Everything before the marker is stream garbage.
                        self.buffer.drain(..start);
                        self.in_frame = true;
                        self.scan_from = self.config.start_marker.len();
                    }
                    None => {
                        // Keep the trailing byte; it may be the first half
                        // of a marker split across chunks.
                        if self.buffer.len() > 1 {
                            self.buffer.drain(..self.buffer.len() - 1);
                        }
                        self.scan_from = 0;
                        break;
                    }
                }
            } else {
                match find_marker(&self.buffer, self.config.end_marker, self.scan_from) {
                    Some(end) => {
                        let candidate_len = end + self.config.end_marker.len();
                        let candidate: Vec<u8> = self.buffer.drain(..candidate_len).collect();
                        self.in_frame = false;
                        self.scan_from = 0;
                        if let Some(frame) = self.accept(candidate, now_ns) {
                            out.push(frame);
                        }
                    }
                    None => {
                        if self.buffer.len() > self.config.max_buffer_bytes {
                            tracing::warn!(
                                bytes = self.buffer.len(),
                                "No frame terminator within buffer cap, restarting framing"
                            );
                            self.buffer.clear();
                            self.in_frame = false;
                            self.scan_from = 0;
                        } else {
                            self.scan_from = self.buffer.len().saturating_sub(1).max(2);
                        }
                        break;
                    }
                }
            }
        }

        out
    }

    fn accept(&mut self, candidate: Vec<u8>, now_ns: u64) -> Option<Frame> {
        self.candidates_seen += 1;

        if self.candidates_seen <= self.config.warmup_skip {
            tracing::trace!(candidate = self.candidates_seen, "Skipping warm-up frame");
            return None;
        }
        if candidate.len() < self.config.min_frame_bytes {
            tracing::trace!(bytes = candidate.len(), "Dropping undersized frame");
            return None;
        }
        if self.is_blank(&candidate) {
            tracing::trace!("Dropping blank frame");
            return None;
        }
        if !self.rate.should_tick(now_ns) {
            return None;
        }

        let frame = Frame {
            data: candidate,
            sequence: self.delivered,
        };
        self.delivered += 1;
        Some(frame)
    }

    /// Cheap blankness heuristic: fraction of zero bytes over a fixed-size
    /// sample prefix. Not image analysis.
    fn is_blank(&self, data: &[u8]) -> bool {
        let sample = &data[..data.len().min(self.config.blank_sample_bytes)];
        if sample.is_empty() {
            return true;
        }
        let zeros = sample.iter().filter(|b| **b == 0).count();
        zeros as f64 / sample.len() as f64 > self.config.blank_zero_fraction
    }
}

fn find_marker(buf: &[u8], marker: [u8; 2], from: usize) -> Option<usize> {
    if buf.len() < 2 {
        return None;
    }
    let start = from.min(buf.len() - 1);
    (start..buf.len() - 1).find(|&i| buf[i] == marker[0] && buf[i + 1] == marker[1])
}

/// Event emitted by the preview reader thread toward the dispatch loop.
pub(crate) enum StreamEvent {
    Frame(Frame),
    /// End of stream. Unexpected while the session is still active.
    Ended,
    /// Read error while the session was still active.
    Failed(String),
}

/// Blocking read loop over the encoder's preview pipe.
///
/// Exits on end-of-stream, on channel shutdown, or on I/O error. Errors
/// after teardown has begun are the expected consequence of closing the
/// pipe and are only logged.
pub(crate) fn run_preview_reader(
    mut stdout: ChildStdout,
    mut demuxer: FrameDemuxer,
    tx: Sender<StreamEvent>,
    active: Arc<AtomicBool>,
) {
    let started = Instant::now();
    let mut chunk = [0u8; 8192];

    loop {
        match stdout.read(&mut chunk) {
            Ok(0) => {
                let _ = tx.send(StreamEvent::Ended);
                break;
            }
            Ok(n) => {
                let now_ns = started.elapsed().as_nanos() as u64;
                for frame in demuxer.push(&chunk[..n], now_ns) {
                    if tx.send(StreamEvent::Frame(frame)).is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                if active.load(Ordering::SeqCst) {
                    tracing::warn!(error = %e, "Unexpected preview read failure");
                    let _ = tx.send(StreamEvent::Failed(e.to_string()));
                } else {
                    tracing::debug!(error = %e, "Preview pipe closed during stop");
                }
                break;
            }
        }
    }
    tracing::debug!(delivered = demuxer.delivered(), "Preview reader exiting");
}
