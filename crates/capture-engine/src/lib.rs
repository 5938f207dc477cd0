//! Lenscast Capture Engine
//!
//! Supervises an external encoder process that turns one camera capture
//! pass into a live MJPEG preview stream and time-bounded segment files.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                 CaptureSession                    │
//! │  ┌────────────┐  stdout  ┌───────────────┐       │
//! │  │  Encoder   │─────────▶│ FrameDemuxer  │──┐    │
//! │  │  Process   │  stderr  ├───────────────┤  │mpsc│
//! │  │ (ffmpeg)   │─────────▶│ stderr drain  │  ▼    │
//! │  └─────┬──────┘          └───────────────┘ dispatch ─▶ CaptureEvents
//! │        │ segment files                       ▲    │
//! │        ▼                                     │    │
//! │  ┌───────────────┐   poll    ┌────────────┐ │    │
//! │  │  output dir   │◀──────────│   timer    │─┘    │
//! │  └───────────────┘           └────────────┘      │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! The reader threads never invoke caller code; every event funnels through
//! the dispatch loop or the timer so presentation can never stall capture.

pub mod demux;
pub mod device;
pub mod encoder;
pub mod events;
pub mod process;
pub mod segments;
pub mod session;

pub use demux::{DemuxConfig, Frame};
pub use device::{list_devices, CaptureDevice};
pub use encoder::{find_ffmpeg, version_check, CaptureMode};
pub use events::{CaptureEvents, NoopEvents};
pub use segments::{ScannerConfig, VideoSegment};
pub use session::{CaptureSession, CaptureSupervisor, SessionConfig, SessionState};
