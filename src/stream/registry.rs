//! Stream registration and index assignment

use super::descriptor::{AudioStreamConfig, StreamConfig, StreamDescriptor, VideoStreamConfig};
use crate::error::{MuxError, Result};
use crate::session::sink::MuxSink;
use ffmpeg_next as ffmpeg;

/// Ordered set of output streams. Index `i` is the `i`-th registration.
#[derive(Debug, Default)]
pub struct StreamRegistry {
    streams: Vec<StreamDescriptor>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a video stream on `sink` and return its index.
    pub fn add_video_stream<S: MuxSink>(
        &mut self,
        sink: &mut S,
        config: VideoStreamConfig,
    ) -> Result<usize> {
        self.register(sink, StreamConfig::Video(config))
    }

    /// Declare an audio stream on `sink` and return its index.
    pub fn add_audio_stream<S: MuxSink>(
        &mut self,
        sink: &mut S,
        config: AudioStreamConfig,
    ) -> Result<usize> {
        self.register(sink, StreamConfig::Audio(config))
    }

    pub fn register<S: MuxSink>(&mut self, sink: &mut S, config: StreamConfig) -> Result<usize> {
        let index = self.streams.len();
        let encoder = resolve_encoder(&config, index);
        let descriptor = StreamDescriptor::new(index, config, encoder);

        let slot = sink.add_stream(&descriptor)?;
        if slot != index {
            return Err(MuxError::Resource(format!(
                "container assigned slot {} to stream {}",
                slot, index
            )));
        }

        tracing::debug!(
            "Registered {} stream {} ({:?}, time base {})",
            descriptor.kind().as_str(),
            index,
            descriptor.config.codec_id(),
            descriptor.config.time_base()
        );
        self.streams.push(descriptor);
        Ok(index)
    }

    pub fn get(&self, index: usize) -> Option<&StreamDescriptor> {
        self.streams.get(index)
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StreamDescriptor> {
        self.streams.iter()
    }
}

/// Look up an encoder for the codec, only to record container metadata.
///
/// Builds without the encoder (e.g. no libx264) are normal for passthrough
/// streams, so a miss is logged and registration continues.
fn resolve_encoder(config: &StreamConfig, index: usize) -> Option<String> {
    match ffmpeg::encoder::find(config.codec_id()) {
        Some(codec) => Some(codec.name().to_string()),
        None => {
            tracing::info!(
                "No encoder for {:?} on stream {}; muxing as passthrough",
                config.codec_id(),
                index
            );
            None
        }
    }
}
