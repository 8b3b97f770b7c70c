//! Configuration file support
//!
//! Loads muxer configuration from TOML files.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::config::{AudioCodec, MuxOptions, PixelFormat, SampleFormat, VideoCodec};
use crate::error::{MuxError, Result};

/// Configuration file format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Output settings
    pub output: OutputSettings,
    /// Video stream settings
    pub video: VideoSettings,
    /// Audio stream settings
    pub audio: AudioSettings,
    /// Segment settings
    pub segment: SegmentSettings,
    /// Logging settings
    pub logging: Option<LoggingSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSettings {
    /// FFmpeg format name
    pub format: String,
    /// Subtract the first timestamp from every packet
    pub rebase_timestamps: Option<bool>,
    /// Longest span the interleaver waits for a lagging stream, in milliseconds
    pub max_interleave_delta_ms: Option<u64>,
    /// Extra muxer private options
    pub options: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoSettings {
    pub codec: VideoCodec,
    pub pixel_format: Option<PixelFormat>,
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    /// Bit rate metadata in bps
    pub bit_rate: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioSettings {
    pub codec: AudioCodec,
    pub sample_format: Option<SampleFormat>,
    pub sample_rate: u32,
    pub channels: u16,
    /// Bit rate metadata in bps
    pub bit_rate: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentSettings {
    /// Target segment duration in seconds
    pub duration_secs: u32,
    /// Number of segments kept in the playlist (0 = all)
    pub playlist_size: Option<u32>,
    /// Segment file name pattern
    pub filename: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: Option<String>,
}

impl ConfigFile {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        toml::from_str(&content).map_err(|e| {
            MuxError::Config(format!("{}: {}", path.as_ref().display(), e))
        })
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| MuxError::Config(e.to_string()))?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }

    /// Generate default configuration
    pub fn default_config() -> Self {
        let defaults = MuxOptions::default();
        Self {
            output: OutputSettings {
                format: defaults.format.clone(),
                rebase_timestamps: Some(defaults.rebase_timestamps),
                max_interleave_delta_ms: Some((defaults.max_interleave_delta_micros / 1000) as u64),
                options: None,
            },
            video: VideoSettings {
                codec: defaults.video_codec,
                pixel_format: Some(defaults.pixel_format),
                width: defaults.video_width,
                height: defaults.video_height,
                frame_rate: defaults.video_frame_rate,
                bit_rate: defaults.video_bit_rate,
            },
            audio: AudioSettings {
                codec: defaults.audio_codec,
                sample_format: Some(defaults.sample_format),
                sample_rate: defaults.audio_sample_rate,
                channels: defaults.audio_channel_count,
                bit_rate: defaults.audio_bit_rate,
            },
            segment: SegmentSettings {
                duration_secs: defaults.segment_duration_secs,
                playlist_size: Some(defaults.playlist_size),
                filename: None,
            },
            logging: Some(LoggingSettings {
                level: "info".to_string(),
                format: Some("pretty".to_string()),
            }),
        }
    }

    /// Convert to validated MuxOptions
    pub fn into_mux_options(self) -> Result<MuxOptions> {
        let defaults = MuxOptions::default();
        let max_interleave_delta_micros = match self.output.max_interleave_delta_ms {
            Some(ms) => i64::try_from(ms.saturating_mul(1000)).map_err(|_| {
                MuxError::Config(format!("max_interleave_delta_ms {} is too large", ms))
            })?,
            None => defaults.max_interleave_delta_micros,
        };

        let options = MuxOptions {
            format: self.output.format,
            video_codec: self.video.codec,
            pixel_format: self.video.pixel_format.unwrap_or(defaults.pixel_format),
            video_width: self.video.width,
            video_height: self.video.height,
            video_frame_rate: self.video.frame_rate,
            video_bit_rate: self.video.bit_rate,
            video_extradata: None,
            audio_codec: self.audio.codec,
            sample_format: self.audio.sample_format.unwrap_or(defaults.sample_format),
            audio_sample_rate: self.audio.sample_rate,
            audio_channel_count: self.audio.channels,
            audio_bit_rate: self.audio.bit_rate,
            audio_extradata: None,
            segment_duration_secs: self.segment.duration_secs,
            playlist_size: self.segment.playlist_size.unwrap_or(defaults.playlist_size),
            segment_filename: self.segment.filename,
            format_options: self.output.options.unwrap_or_default(),
            rebase_timestamps: self.output.rebase_timestamps.unwrap_or(false),
            max_interleave_delta_micros,
        };
        options.validate()?;
        Ok(options)
    }

    /// Log level from the `[logging]` section
    pub fn log_level(&self) -> &str {
        self.logging
            .as_ref()
            .map(|l| l.level.as_str())
            .unwrap_or("info")
    }

    /// Whether the `[logging]` section asks for JSON output
    pub fn json_logs(&self) -> bool {
        self.logging
            .as_ref()
            .and_then(|l| l.format.as_deref())
            .map(|f| f.eq_ignore_ascii_case("json"))
            .unwrap_or(false)
    }
}

/// Generate default configuration file at the specified path
pub fn generate_default_config<P: AsRef<Path>>(path: P) -> Result<()> {
    let config = ConfigFile::default_config();
    config.to_file(path)?;
    Ok(())
}
