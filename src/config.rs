//! Muxer options

use crate::error::{MuxError, Result};
use crate::stream::{AudioStreamConfig, VideoStreamConfig};
use crate::writer::interleave::DEFAULT_MAX_INTERLEAVE_DELTA_MICROS;
use ffmpeg_next as ffmpeg;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    H264,
    Hevc,
    Vp8,
    Vp9,
    Av1,
}

impl VideoCodec {
    pub fn codec_id(&self) -> ffmpeg::codec::Id {
        match self {
            VideoCodec::H264 => ffmpeg::codec::Id::H264,
            VideoCodec::Hevc => ffmpeg::codec::Id::HEVC,
            VideoCodec::Vp8 => ffmpeg::codec::Id::VP8,
            VideoCodec::Vp9 => ffmpeg::codec::Id::VP9,
            VideoCodec::Av1 => ffmpeg::codec::Id::AV1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Yuv420p,
    Nv12,
}

impl PixelFormat {
    pub fn pixel(&self) -> ffmpeg::format::Pixel {
        match self {
            PixelFormat::Yuv420p => ffmpeg::format::Pixel::YUV420P,
            PixelFormat::Nv12 => ffmpeg::format::Pixel::NV12,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    Aac,
    Opus,
    Mp3,
    Ac3,
}

impl AudioCodec {
    pub fn codec_id(&self) -> ffmpeg::codec::Id {
        match self {
            AudioCodec::Aac => ffmpeg::codec::Id::AAC,
            AudioCodec::Opus => ffmpeg::codec::Id::OPUS,
            AudioCodec::Mp3 => ffmpeg::codec::Id::MP3,
            AudioCodec::Ac3 => ffmpeg::codec::Id::AC3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    S16,
    Fltp,
}

impl SampleFormat {
    pub fn sample(&self) -> ffmpeg::format::Sample {
        match self {
            SampleFormat::S16 => ffmpeg::format::Sample::I16(ffmpeg::format::sample::Type::Packed),
            SampleFormat::Fltp => ffmpeg::format::Sample::F32(ffmpeg::format::sample::Type::Planar),
        }
    }
}

/// Options for a [`LiveMuxer`](crate::LiveMuxer) session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MuxOptions {
    /// FFmpeg output format name (hls, segment, dash, mpegts, ...)
    pub format: String,

    pub video_codec: VideoCodec,
    pub pixel_format: PixelFormat,
    pub video_width: u32,
    pub video_height: u32,
    /// Nominal frame rate; the video time base is its reciprocal
    pub video_frame_rate: u32,
    /// Bit rate metadata written into the container, not a rate control target
    pub video_bit_rate: Option<u64>,
    pub video_extradata: Option<Vec<u8>>,

    pub audio_codec: AudioCodec,
    pub sample_format: SampleFormat,
    pub audio_sample_rate: u32,
    pub audio_channel_count: u16,
    pub audio_bit_rate: Option<u64>,
    pub audio_extradata: Option<Vec<u8>>,

    /// Target segment duration for segmenting formats
    pub segment_duration_secs: u32,
    /// Playlist window for hls (0 keeps every segment)
    pub playlist_size: u32,
    /// Segment file name pattern for hls, e.g. `seg_%05d.ts`
    pub segment_filename: Option<String>,
    /// Extra muxer private options
    pub format_options: BTreeMap<String, String>,

    /// Make the first timestamp of the session zero
    pub rebase_timestamps: bool,
    /// Longest span the interleaver holds packets back waiting for a lagging
    /// stream. Must be positive; there is no "wait forever" setting.
    pub max_interleave_delta_micros: i64,
}

impl Default for MuxOptions {
    fn default() -> Self {
        Self {
            format: "hls".to_string(),
            video_codec: VideoCodec::H264,
            pixel_format: PixelFormat::Yuv420p,
            video_width: 1280,
            video_height: 720,
            video_frame_rate: 30,
            video_bit_rate: Some(2_000_000),
            video_extradata: None,
            audio_codec: AudioCodec::Aac,
            sample_format: SampleFormat::Fltp,
            audio_sample_rate: 44100,
            audio_channel_count: 1,
            audio_bit_rate: Some(96_000),
            audio_extradata: None,
            segment_duration_secs: 10,
            playlist_size: 0,
            segment_filename: None,
            format_options: BTreeMap::new(),
            rebase_timestamps: false,
            max_interleave_delta_micros: DEFAULT_MAX_INTERLEAVE_DELTA_MICROS,
        }
    }
}

impl MuxOptions {
    /// Check the options before any FFmpeg state is created.
    pub fn validate(&self) -> Result<()> {
        if self.format.trim().is_empty() {
            return Err(MuxError::Config("output format is empty".to_string()));
        }
        if self.video_width == 0 || self.video_height == 0 {
            return Err(MuxError::Config(format!(
                "invalid video size {}x{}",
                self.video_width, self.video_height
            )));
        }
        if self.video_width % 2 != 0 || self.video_height % 2 != 0 {
            return Err(MuxError::Config(format!(
                "video size {}x{} must be even",
                self.video_width, self.video_height
            )));
        }
        if self.video_frame_rate == 0 || self.video_frame_rate > i32::MAX as u32 {
            return Err(MuxError::Config(format!(
                "invalid frame rate {}",
                self.video_frame_rate
            )));
        }
        if self.audio_sample_rate == 0 || self.audio_sample_rate > i32::MAX as u32 {
            return Err(MuxError::Config(format!(
                "invalid sample rate {}",
                self.audio_sample_rate
            )));
        }
        if !(1..=8).contains(&self.audio_channel_count) {
            return Err(MuxError::Config(format!(
                "unsupported channel count {}",
                self.audio_channel_count
            )));
        }
        if self.segment_duration_secs == 0 {
            return Err(MuxError::Config(
                "segment duration must be at least one second".to_string(),
            ));
        }
        if self.max_interleave_delta_micros <= 0 {
            return Err(MuxError::Config(format!(
                "max interleave delta must be positive, got {}us",
                self.max_interleave_delta_micros
            )));
        }
        Ok(())
    }

    pub fn video_stream_config(&self) -> VideoStreamConfig {
        VideoStreamConfig {
            codec_id: self.video_codec.codec_id(),
            pixel_format: self.pixel_format.pixel(),
            width: self.video_width,
            height: self.video_height,
            time_base: ffmpeg::Rational(1, self.video_frame_rate as i32),
            bit_rate: self.video_bit_rate,
            extradata: self.video_extradata.clone(),
        }
    }

    pub fn audio_stream_config(&self) -> AudioStreamConfig {
        AudioStreamConfig {
            codec_id: self.audio_codec.codec_id(),
            sample_format: self.sample_format.sample(),
            sample_rate: self.audio_sample_rate,
            channels: self.audio_channel_count,
            time_base: ffmpeg::Rational(1, self.audio_sample_rate as i32),
            bit_rate: self.audio_bit_rate,
            extradata: self.audio_extradata.clone(),
        }
    }

    /// Muxer private options besides the segment duration.
    pub fn header_options(&self) -> Vec<(String, String)> {
        let mut options = Vec::new();
        if self.format == "hls" {
            options.push(("hls_list_size".to_string(), self.playlist_size.to_string()));
            if let Some(pattern) = &self.segment_filename {
                options.push(("hls_segment_filename".to_string(), pattern.clone()));
            }
        }
        options.extend(
            self.format_options
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        options
    }
}
