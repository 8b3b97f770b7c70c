//! live-hls-mux command line
//!
//! Replays recorded H.264 Annex B and AAC ADTS elementary streams through
//! the live muxer, producing a playlist and segments exactly as a live
//! encoder feeding the library would.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use live_hls_mux::config_file::{generate_default_config, ConfigFile};
use live_hls_mux::replay::{self, ReplayInputs};
use live_hls_mux::{MuxError, MuxOptions, Result};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
const APP_NAME: &str = "live-hls-mux";

#[derive(Debug, Parser)]
#[command(name = APP_NAME, version = VERSION, about = "Mux live encoder output into segmented containers")]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Replay recorded elementary streams into an output
    Replay {
        /// Output path; the playlist for segmenting formats
        #[arg(short, long)]
        output: PathBuf,
        /// H.264 Annex B input
        #[arg(long)]
        video: Option<PathBuf>,
        /// AAC ADTS input
        #[arg(long)]
        audio: Option<PathBuf>,
        /// Output format, overrides the configuration
        #[arg(short, long)]
        format: Option<String>,
        /// Segment duration in seconds, overrides the configuration
        #[arg(long)]
        segment_secs: Option<u32>,
        /// Video frame rate of the recording
        #[arg(long)]
        fps: Option<u32>,
        /// Pace packets to their timestamps
        #[arg(long)]
        realtime: bool,
    },
    /// Write a default configuration file
    InitConfig {
        /// Where to write it
        path: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration before logging so it can pick the level
    let config = match &cli.config {
        Some(path) => Some(ConfigFile::from_file(path)?),
        None => None,
    };
    let (level, json) = config
        .as_ref()
        .map(|c| (c.log_level().to_string(), c.json_logs()))
        .unwrap_or_else(|| ("info".to_string(), false));
    init_logging(&level, json);

    tracing::info!("{} v{} starting", APP_NAME, VERSION);
    tracing::info!("FFmpeg version: {}", live_hls_mux::ffmpeg_version_info());

    live_hls_mux::init()?;
    live_hls_mux::install_log_filter();

    match cli.command {
        Command::InitConfig { path } => {
            generate_default_config(&path)?;
            tracing::info!("Wrote default configuration to {}", path.display());
        }
        Command::Replay {
            output,
            video,
            audio,
            format,
            segment_secs,
            fps,
            realtime,
        } => {
            let mut options = match config {
                Some(config) => config.into_mux_options()?,
                None => MuxOptions::default(),
            };
            if let Some(format) = format {
                options.format = format;
            }
            if let Some(secs) = segment_secs {
                options.segment_duration_secs = secs;
            }
            if let Some(fps) = fps {
                options.video_frame_rate = fps;
            }
            tracing::debug!("Options: {:?}", options);

            let inputs = ReplayInputs {
                video,
                audio,
                realtime,
            };
            let summary = replay::replay(&output, options, &inputs)?;
            serde_json::to_writer_pretty(std::io::stdout().lock(), &summary)
                .map_err(|e| MuxError::Io(e.into()))?;
            println!();
        }
    }

    Ok(())
}

/// Initialize logging with tracing
fn init_logging(level: &str, json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("live_hls_mux={},ffmpeg={}", level, level).into());
    let registry = tracing_subscriber::registry().with(filter);

    // stdout carries the JSON summary
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
