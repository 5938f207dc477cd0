//! Lenscast CLI — Record and merge camera captures from the command line.
//!
//! Usage:
//!   lenscast record [OPTIONS]     Record segments (with live preview stats)
//!   lenscast merge [OPTIONS]      Merge recorded segments into one file
//!   lenscast devices              List capture devices
//!   lenscast check                Check system capabilities

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "lenscast",
    about = "Live camera preview and segmented recording via ffmpeg",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a capture device to time-bounded segments
    Record {
        /// Device node to capture (defaults to the first detected device)
        #[arg(short, long)]
        device: Option<String>,

        /// Output directory for segments (defaults to the configured dir)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Capture frame rate
        #[arg(long)]
        fps: Option<u32>,

        /// Capture width
        #[arg(long)]
        width: Option<u32>,

        /// Capture height
        #[arg(long)]
        height: Option<u32>,

        /// Segment bitrate in kbit/s (0 = auto)
        #[arg(long)]
        bitrate: Option<u32>,

        /// Segment duration in seconds
        #[arg(long)]
        segment_secs: Option<u32>,

        /// Disable the preview stream (record only)
        #[arg(long)]
        no_preview: bool,

        /// Merge the recorded segments into one file after stopping
        #[arg(long)]
        merge: bool,
    },

    /// Merge recorded segments into one seekable file
    Merge {
        /// Directory containing segment files (merged in filename order)
        #[arg(short, long, conflicts_with = "inputs")]
        dir: Option<PathBuf>,

        /// Explicit segment files, in order
        #[arg(required_unless_present = "dir")]
        inputs: Vec<PathBuf>,

        /// Output file path
        #[arg(short, long, default_value = "merged.mp4")]
        output: PathBuf,

        /// Frame rate used to normalize the keyframe interval
        #[arg(long, default_value = "30")]
        fps: u32,

        /// Output bitrate in kbit/s
        #[arg(long, default_value = "2500")]
        bitrate: u32,

        /// Per-segment duration estimate when probing fails (seconds)
        #[arg(long, default_value = "60")]
        segment_secs: u32,
    },

    /// List capture devices
    Devices,

    /// Check system capabilities
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    lenscast_common::logging::init_logging(&lenscast_common::config::LoggingConfig {
        level: log_level.to_string(),
        json: false,
    });

    match cli.command {
        Commands::Record {
            device,
            output,
            fps,
            width,
            height,
            bitrate,
            segment_secs,
            no_preview,
            merge,
        } => {
            commands::record::run(
                device,
                output,
                fps,
                width,
                height,
                bitrate,
                segment_secs,
                no_preview,
                merge,
            )
            .await
        }
        Commands::Merge {
            dir,
            inputs,
            output,
            fps,
            bitrate,
            segment_secs,
        } => commands::merge::run(dir, inputs, output, fps, bitrate, segment_secs).await,
        Commands::Devices => commands::devices::run(),
        Commands::Check => commands::check::run(),
    }
}
