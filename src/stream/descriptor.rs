//! Output stream descriptions

use ffmpeg_next as ffmpeg;
use serde::Serialize;

/// Elementary stream kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Video,
    Audio,
}

impl StreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Video => "video",
            StreamKind::Audio => "audio",
        }
    }
}

/// How packets for a stream reach the container.
///
/// Only passthrough exists: access units arrive already encoded and are
/// muxed as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    Passthrough,
}

#[derive(Debug, Clone)]
pub struct VideoStreamConfig {
    pub codec_id: ffmpeg::codec::Id,
    pub pixel_format: ffmpeg::format::Pixel,
    pub width: u32,
    pub height: u32,
    pub time_base: ffmpeg::Rational,
    /// Container-level bit rate metadata only
    pub bit_rate: Option<u64>,
    /// SPS/PPS (avcC or Annex B) when the muxer needs them out of band
    pub extradata: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct AudioStreamConfig {
    pub codec_id: ffmpeg::codec::Id,
    pub sample_format: ffmpeg::format::Sample,
    pub sample_rate: u32,
    pub channels: u16,
    pub time_base: ffmpeg::Rational,
    pub bit_rate: Option<u64>,
    /// AudioSpecificConfig for raw (non-ADTS) AAC
    pub extradata: Option<Vec<u8>>,
}

/// Parameters of one output stream, as supplied at registration.
#[derive(Debug, Clone)]
pub enum StreamConfig {
    Video(VideoStreamConfig),
    Audio(AudioStreamConfig),
}

impl StreamConfig {
    pub fn kind(&self) -> StreamKind {
        match self {
            StreamConfig::Video(_) => StreamKind::Video,
            StreamConfig::Audio(_) => StreamKind::Audio,
        }
    }

    pub fn codec_id(&self) -> ffmpeg::codec::Id {
        match self {
            StreamConfig::Video(v) => v.codec_id,
            StreamConfig::Audio(a) => a.codec_id,
        }
    }

    /// Time base declared at registration. The muxer may replace it when
    /// the header is written.
    pub fn time_base(&self) -> ffmpeg::Rational {
        match self {
            StreamConfig::Video(v) => v.time_base,
            StreamConfig::Audio(a) => a.time_base,
        }
    }

    pub fn extradata(&self) -> Option<&[u8]> {
        match self {
            StreamConfig::Video(v) => v.extradata.as_deref(),
            StreamConfig::Audio(a) => a.extradata.as_deref(),
        }
    }
}

/// A registered output stream.
#[derive(Debug, Clone)]
pub struct StreamDescriptor {
    index: usize,
    pub config: StreamConfig,
    pub mode: StreamMode,
    /// Name of the encoder matching the codec id, if FFmpeg has one
    pub encoder: Option<String>,
}

impl StreamDescriptor {
    pub(crate) fn new(index: usize, config: StreamConfig, encoder: Option<String>) -> Self {
        Self {
            index,
            config,
            mode: StreamMode::Passthrough,
            encoder,
        }
    }

    /// Index assigned at registration; never changes afterwards.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn kind(&self) -> StreamKind {
        self.config.kind()
    }
}
