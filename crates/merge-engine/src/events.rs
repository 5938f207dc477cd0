//! Merge progress sink.

use std::path::Path;

/// Callbacks delivered while a merge runs. All methods default to no-ops.
pub trait MergeEvents: Send + Sync {
    /// Encode progress in percent, 0..=100.
    fn on_progress(&self, _percent: u8) {}

    /// Stage transitions and per-segment skip notes.
    fn on_log(&self, _message: &str) {}

    /// Merge finished; the output file exists and is non-empty.
    fn on_completed(&self, _output: &Path) {}

    /// Merge failed or was cancelled; source segments are intact.
    fn on_error(&self, _message: &str) {}
}

/// Sink that ignores every event.
pub struct NoopMergeEvents;

impl MergeEvents for NoopMergeEvents {}
