//! Error classification and reporting
//!
//! Reporting never changes control flow: callers still get the error value
//! and decide what to do with it.

use crate::error::{FfmpegError, MuxError};
use ffmpeg_next as ffmpeg;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorClass {
    /// Bad options, unknown format, unresolvable output
    Configuration,
    /// Stream slot or context allocation failed
    Resource,
    /// The output could not be opened or written
    Io,
    /// Header or trailer rejected by the muxer
    Format,
    /// A single packet was refused
    PacketWrite,
    /// Operation called in the wrong lifecycle state
    Sequencing,
    Timestamp,
    Other,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Configuration => "configuration",
            ErrorClass::Resource => "resource",
            ErrorClass::Io => "io",
            ErrorClass::Format => "format",
            ErrorClass::PacketWrite => "packet-write",
            ErrorClass::Sequencing => "sequencing",
            ErrorClass::Timestamp => "timestamp",
            ErrorClass::Other => "other",
        }
    }

    /// Whether the session can keep going after an error of this class.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ErrorClass::PacketWrite | ErrorClass::Sequencing | ErrorClass::Timestamp
        )
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a raw FFmpeg status.
pub fn classify_status(status: ffmpeg::Error) -> ErrorClass {
    match status {
        ffmpeg::Error::MuxerNotFound
        | ffmpeg::Error::EncoderNotFound
        | ffmpeg::Error::ProtocolNotFound
        | ffmpeg::Error::OptionNotFound => ErrorClass::Configuration,
        ffmpeg::Error::InvalidData => ErrorClass::Format,
        ffmpeg::Error::Eof | ffmpeg::Error::Exit => ErrorClass::Io,
        ffmpeg::Error::Other { errno } if errno == ffmpeg::error::ENOMEM => ErrorClass::Resource,
        ffmpeg::Error::Other { errno }
            if errno == ffmpeg::error::EIO
                || errno == ffmpeg::error::ENOENT
                || errno == ffmpeg::error::EACCES
                || errno == ffmpeg::error::ENOSPC
                || errno == ffmpeg::error::EPIPE =>
        {
            ErrorClass::Io
        }
        ffmpeg::Error::Other { errno } if errno == ffmpeg::error::EINVAL => ErrorClass::Format,
        _ => ErrorClass::Other,
    }
}

/// Human-readable text for a raw FFmpeg status code (a negative `AVERROR`).
pub fn describe_status(code: i32) -> String {
    format!("{} ({})", ffmpeg::Error::from(code), code)
}

impl MuxError {
    pub fn class(&self) -> ErrorClass {
        match self {
            MuxError::Ffmpeg(e) => e.class(),
            MuxError::Io(_) => ErrorClass::Io,
            MuxError::Config(_) => ErrorClass::Configuration,
            MuxError::Resource(_) => ErrorClass::Resource,
            MuxError::InvalidState { .. } => ErrorClass::Sequencing,
            MuxError::UnknownStream(_) | MuxError::InvalidPayload(_) => ErrorClass::PacketWrite,
            MuxError::PacketWrite { .. } => ErrorClass::PacketWrite,
            MuxError::InvalidTimestamp(_) => ErrorClass::Timestamp,
        }
    }

    /// Class of the underlying FFmpeg status, when there is one.
    ///
    /// [`class`](Self::class) says which operation failed (a packet write,
    /// the header); this says why (out of space, bad data).
    pub fn status_class(&self) -> Option<ErrorClass> {
        self.status().map(classify_status)
    }
}

impl FfmpegError {
    pub fn class(&self) -> ErrorClass {
        match self {
            FfmpegError::InitFailed(_) => ErrorClass::Other,
            FfmpegError::MuxerCreate { .. } => ErrorClass::Configuration,
            FfmpegError::OpenOutput { .. } => ErrorClass::Io,
            FfmpegError::AddStream(_) | FfmpegError::Alloc(_) => ErrorClass::Resource,
            FfmpegError::WriteHeader(_) | FfmpegError::WriteTrailer(_) => ErrorClass::Format,
            FfmpegError::WritePacket(_) => ErrorClass::PacketWrite,
            FfmpegError::InvalidTimebase { .. } => ErrorClass::Timestamp,
        }
    }
}

/// One-line summary: operation class, status class and status text.
pub fn summarize(error: &MuxError) -> String {
    let class = error.class();
    match error.status() {
        Some(status) => format!(
            "{} error ({}): {} [status {}]",
            class,
            classify_status(status),
            error,
            describe_status(status.into())
        ),
        None => format!("{} error: {}", class, error),
    }
}

/// Log an error with its classification.
///
/// Severity follows the failed operation; a recoverable packet write whose
/// status is a resource failure is still logged as an error.
pub fn report(error: &MuxError) {
    let summary = summarize(error);
    let resource_exhausted = error.status_class() == Some(ErrorClass::Resource);

    if error.class().is_recoverable() && !resource_exhausted {
        tracing::warn!("{}", summary);
    } else {
        tracing::error!("{}", summary);
    }
}
