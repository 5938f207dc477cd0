//! Session event sink.
//!
//! One capability set covers every notification the engine emits. Every
//! method has a no-op default, so callers implement only what they consume
//! and no runtime capability probing is ever needed.

use crate::demux::Frame;
use crate::segments::VideoSegment;

/// Callbacks delivered by a capture session.
///
/// All methods are invoked from the session's dispatch or timer threads,
/// never from the pipe reader itself; implementations must be cheap or hand
/// off to their own executor. Frames are not retained by the engine after
/// delivery.
pub trait CaptureEvents: Send + Sync {
    /// A validated preview frame.
    fn on_frame(&self, _frame: &Frame) {}

    /// Preview stream failure (stream read error, encoder death during a
    /// preview-only session).
    fn on_preview_error(&self, _message: &str) {}

    fn on_recording_started(&self) {}

    fn on_recording_paused(&self) {}

    fn on_recording_resumed(&self) {}

    fn on_recording_stopped(&self) {}

    /// A new segment file was validated and appended to the session list.
    fn on_segment_completed(&self, _segment: &VideoSegment) {}

    /// Recording failure (encoder death while recording).
    fn on_recording_error(&self, _message: &str) {}

    /// Periodic `HH:MM:SS` elapsed-time update. Cosmetic; never blocks the
    /// capture or segment paths.
    fn on_time_update(&self, _formatted: &str) {}
}

/// Sink that ignores every event.
pub struct NoopEvents;

impl CaptureEvents for NoopEvents {}
