//! Lenscast Merge Engine
//!
//! Combines an ordered list of recorded segment files into one continuous,
//! seekable video. Segments from separate encoder runs cannot simply be
//! byte-concatenated, so the engine re-encodes through the concat demuxer
//! with a normalized keyframe interval, verifies the output, and only then
//! deletes the sources.

pub mod concat;
pub mod events;
pub mod merge;
pub mod probe;

pub use events::{MergeEvents, NoopMergeEvents};
pub use merge::{
    merge, merge_segments, unique_output_path, CancelToken, MergeJob, MergeOutcome, MergeStage,
};
pub use probe::{command_exists, probe_duration_secs};
