//! Live audio/video muxing into segmented containers
//!
//! Pre-encoded access units (H.264/HEVC video, AAC/Opus audio) are
//! timestamped, interleaved and written through an FFmpeg muxer, typically
//! `hls`, producing a playlist plus media segments while the stream is live.

pub mod api;
pub mod config;
pub mod config_file;
pub mod error;
pub mod ffmpeg_utils;
pub mod replay;
pub mod report;
pub mod session;
pub mod stream;
pub mod timestamp;
pub mod writer;

#[cfg(test)]
pub(crate) mod tests;

pub use api::{LiveMuxer, AUDIO_STREAM_INDEX, VIDEO_STREAM_INDEX};
pub use config::MuxOptions;
pub use error::{FfmpegError, MuxError, Result};
pub use ffmpeg_utils::version_info as ffmpeg_version_info;
pub use ffmpeg_utils::{init, install_log_filter};
pub use report::ErrorClass;
pub use session::{ContainerSession, OutputTarget, SessionState};
pub use writer::{PacketFlags, SessionStats};
