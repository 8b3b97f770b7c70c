use thiserror::Error;

use crate::session::SessionState;

/// Main error type for the live muxer
#[derive(Error, Debug)]
pub enum MuxError {
    /// An error originating from the underlying FFmpeg library
    #[error("FFmpeg error: {0}")]
    Ffmpeg(#[from] FfmpegError),

    /// A standard I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid options or an output format/path pair that cannot be resolved
    #[error("Configuration error: {0}")]
    Config(String),

    /// A stream slot or output context could not be allocated
    #[error("Resource error: {0}")]
    Resource(String),

    /// An operation was invoked in a lifecycle state that does not allow it
    #[error("Cannot {operation} while session is {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    /// A packet referenced a stream index that was never registered
    #[error("Unknown stream index {0}")]
    UnknownStream(usize),

    /// A packet payload that cannot be muxed (empty, out of bounds)
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// A single packet could not be submitted; the session stays usable
    #[error("Packet write failed on stream {stream_index}: {source}")]
    PacketWrite {
        stream_index: usize,
        #[source]
        source: Box<MuxError>,
    },

    /// A bad or unexpected timestamp was processed
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),
}

/// FFmpeg-specific errors
#[derive(Error, Debug)]
pub enum FfmpegError {
    /// Failure during global FFmpeg initialization
    #[error("FFmpeg initialization failed: {0}")]
    InitFailed(String),

    /// The output context could not be allocated for the format/target pair
    #[error("Failed to create muxer for format {format}: {source}")]
    MuxerCreate {
        format: String,
        #[source]
        source: ffmpeg_next::Error,
    },

    /// The output sink could not be opened for writing
    #[error("Failed to open output {path}: {source}")]
    OpenOutput {
        path: String,
        #[source]
        source: ffmpeg_next::Error,
    },

    /// Failure allocating a stream slot in the output context
    #[error("Failed to add stream: {0}")]
    AddStream(#[source] ffmpeg_next::Error),

    /// Failure writing the container header
    #[error("Failed to write header: {0}")]
    WriteHeader(#[source] ffmpeg_next::Error),

    /// Failure writing a media packet to the container
    #[error("Failed to write packet: {0}")]
    WritePacket(#[source] ffmpeg_next::Error),

    /// Failure writing the container trailer
    #[error("Failed to write trailer: {0}")]
    WriteTrailer(#[source] ffmpeg_next::Error),

    /// Allocation of an FFmpeg-owned buffer or context failed
    #[error("Allocation failed: {0}")]
    Alloc(String),

    /// An invalid or unexpected timebase was encountered
    #[error("Invalid timebase {num}/{den}")]
    InvalidTimebase { num: i32, den: i32 },
}

impl FfmpegError {
    /// The raw FFmpeg status carried by this error, if any.
    pub fn status(&self) -> Option<ffmpeg_next::Error> {
        match self {
            FfmpegError::MuxerCreate { source, .. } | FfmpegError::OpenOutput { source, .. } => {
                Some(*source)
            }
            FfmpegError::AddStream(e)
            | FfmpegError::WriteHeader(e)
            | FfmpegError::WritePacket(e)
            | FfmpegError::WriteTrailer(e) => Some(*e),
            FfmpegError::InitFailed(_) | FfmpegError::Alloc(_) | FfmpegError::InvalidTimebase { .. } => {
                None
            }
        }
    }
}

impl MuxError {
    /// Wrap an error raised while handling one packet as a packet write failure.
    pub(crate) fn packet(stream_index: usize, source: impl Into<MuxError>) -> Self {
        MuxError::PacketWrite {
            stream_index,
            source: Box::new(source.into()),
        }
    }

    /// The raw FFmpeg status behind this error, looking through packet wrappers.
    pub fn status(&self) -> Option<ffmpeg_next::Error> {
        match self {
            MuxError::Ffmpeg(e) => e.status(),
            MuxError::PacketWrite { source, .. } => source.status(),
            _ => None,
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, MuxError>;
