//! The container backend a session writes into

use crate::error::Result;
use crate::stream::StreamDescriptor;
use crate::writer::ContainerPacket;
use ffmpeg_next as ffmpeg;
use std::fmt;
use std::path::PathBuf;

/// Where the muxed bytes go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    /// A file path; for segmenting formats, the playlist/manifest path
    Path(PathBuf),
    /// An in-memory buffer (single-file formats only)
    Memory,
}

impl OutputTarget {
    /// Name handed to the muxer for the output.
    pub fn url(&self) -> String {
        match self {
            OutputTarget::Path(path) => path.to_string_lossy().into_owned(),
            OutputTarget::Memory => "memory:".to_string(),
        }
    }
}

impl fmt::Display for OutputTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputTarget::Path(path) => write!(f, "{}", path.display()),
            OutputTarget::Memory => f.write_str("<memory>"),
        }
    }
}

/// Option key carrying the segment duration for a segmenting format.
pub fn segment_duration_option(format: &str) -> Option<&'static str> {
    match format {
        "hls" => Some("hls_time"),
        "segment" | "stream_segment" | "ssegment" => Some("segment_time"),
        "dash" => Some("seg_duration"),
        _ => None,
    }
}

/// Operations a [`ContainerSession`](super::ContainerSession) needs from its
/// output backend.
///
/// The session enforces lifecycle ordering; a sink only performs each step.
pub trait MuxSink {
    /// Create the output context for `format` writing to `target`.
    fn allocate(&mut self, target: &OutputTarget, format: &str) -> Result<()>;

    /// Allocate a stream slot and return its index.
    fn add_stream(&mut self, descriptor: &StreamDescriptor) -> Result<usize>;

    /// Open the output for writing. Must be a no-op when already open or
    /// when the format manages its own files.
    fn open(&mut self) -> Result<()>;

    /// Write the container header with format private options.
    fn write_header(&mut self, options: &[(String, String)]) -> Result<()>;

    /// The current time base of a stream, which may differ from the one
    /// declared once the header has been written.
    fn stream_time_base(&self, index: usize) -> Option<ffmpeg::Rational>;

    /// Write one packet; ordering has already been taken care of.
    fn write_packet(&mut self, packet: &ContainerPacket<'_>) -> Result<()>;

    fn write_trailer(&mut self) -> Result<()>;

    /// Free the output context and close any file. Idempotent.
    fn release(&mut self);
}
