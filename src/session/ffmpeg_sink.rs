//! FFmpeg-backed output sink

use super::sink::{MuxSink, OutputTarget};
use crate::error::{FfmpegError, MuxError, Result};
use crate::ffmpeg_utils::helpers;
use crate::ffmpeg_utils::io::MemoryIo;
use crate::stream::{StreamConfig, StreamDescriptor};
use crate::writer::ContainerPacket;
use ffmpeg_next as ffmpeg;
use std::ffi::CString;

/// Muxes into an FFmpeg output context.
///
/// One scratch `AVPacket` is reused for every write: the caller's payload is
/// attached to it without copying for the duration of `av_write_frame` and
/// detached straight after.
pub struct FfmpegSink {
    output: Option<ffmpeg::format::context::Output>,
    memory: Option<MemoryIo>,
    /// Bytes of a memory target, kept after release
    memory_output: Option<Vec<u8>>,
    scratch: ffmpeg::Packet,
    url: CString,
    format: String,
    opened: bool,
}

impl FfmpegSink {
    pub fn new() -> Self {
        Self {
            output: None,
            memory: None,
            memory_output: None,
            scratch: ffmpeg::Packet::empty(),
            url: CString::default(),
            format: String::new(),
            opened: false,
        }
    }

    /// Take everything written to a memory target since the last take.
    ///
    /// Taking mid-session is meant for streamable formats (mpegts, flv).
    /// Bytes already taken cannot be patched, so a format that must rewrite
    /// earlier bytes (non-fragmented mp4) fails its trailer instead.
    pub fn take_memory_output(&mut self) -> Option<Vec<u8>> {
        if let Some(memory) = self.memory.as_mut() {
            return Some(memory.take());
        }
        self.memory_output.take()
    }

    fn output_mut(&mut self) -> Result<&mut ffmpeg::format::context::Output> {
        self.output
            .as_mut()
            .ok_or_else(|| MuxError::Resource("output context not allocated".to_string()))
    }
}

impl Default for FfmpegSink {
    fn default() -> Self {
        Self::new()
    }
}

impl MuxSink for FfmpegSink {
    fn allocate(&mut self, target: &OutputTarget, format: &str) -> Result<()> {
        if self.output.is_some() {
            return Err(MuxError::Config("output context already allocated".to_string()));
        }

        let format_name = CString::new(format)
            .map_err(|_| MuxError::Config(format!("invalid format name {:?}", format)))?;
        let url = CString::new(target.url())
            .map_err(|_| MuxError::Config(format!("invalid output path {}", target)))?;

        let mut output =
            helpers::alloc_output(&format_name, &url).map_err(|e| FfmpegError::MuxerCreate {
                format: format.to_string(),
                source: e,
            })?;

        if *target == OutputTarget::Memory {
            if !helpers::output_requires_file(&output) {
                return Err(MuxError::Config(format!(
                    "format {} writes its own files and cannot target memory",
                    format
                )));
            }
            self.memory = Some(MemoryIo::attach(&mut output)?);
        }

        tracing::debug!("Allocated {} output context for {}", format, target);
        self.output = Some(output);
        self.url = url;
        self.format = format.to_string();
        Ok(())
    }

    fn add_stream(&mut self, descriptor: &StreamDescriptor) -> Result<usize> {
        let codec = descriptor
            .encoder
            .as_deref()
            .and_then(ffmpeg::encoder::find_by_name);
        let output = self.output_mut()?;
        let mut stream = output.add_stream(codec).map_err(FfmpegError::AddStream)?;

        match &descriptor.config {
            StreamConfig::Video(video) => helpers::stream_set_video_params(
                &mut stream,
                video.codec_id,
                video.pixel_format,
                video.width,
                video.height,
                video.bit_rate,
            ),
            StreamConfig::Audio(audio) => helpers::stream_set_audio_params(
                &mut stream,
                audio.codec_id,
                audio.sample_format,
                audio.sample_rate,
                audio.channels,
                audio.bit_rate,
            ),
        }
        stream.set_time_base(descriptor.config.time_base());
        if let Some(extradata) = descriptor.config.extradata() {
            helpers::stream_set_extradata(&mut stream, extradata)?;
        }

        Ok(stream.index())
    }

    fn open(&mut self) -> Result<()> {
        if self.opened {
            return Ok(());
        }
        let url = self.url.clone();
        let output = self.output_mut()?;

        if helpers::output_requires_file(output) && !helpers::output_has_io(output) {
            helpers::output_open_file(output, &url).map_err(|e| FfmpegError::OpenOutput {
                path: url.to_string_lossy().into_owned(),
                source: e,
            })?;
            tracing::debug!("Opened {}", url.to_string_lossy());
        }

        self.opened = true;
        Ok(())
    }

    fn write_header(&mut self, options: &[(String, String)]) -> Result<()> {
        let output = self.output_mut()?;

        let mut dict = ffmpeg::Dictionary::new();
        for (key, value) in options {
            dict.set(key, value);
        }
        let unused = output
            .write_header_with(dict)
            .map_err(FfmpegError::WriteHeader)?;

        for (key, value) in unused.iter() {
            tracing::warn!("Muxer ignored option {}={}", key, value);
        }
        Ok(())
    }

    fn stream_time_base(&self, index: usize) -> Option<ffmpeg::Rational> {
        self.output
            .as_ref()
            .and_then(|output| output.stream(index))
            .map(|stream| stream.time_base())
    }

    fn write_packet(&mut self, packet: &ContainerPacket<'_>) -> Result<()> {
        let output = self
            .output
            .as_mut()
            .ok_or_else(|| MuxError::Resource("output context not allocated".to_string()))?;
        let scratch = &mut self.scratch;

        helpers::packet_attach_data(scratch, packet.data);
        scratch.set_stream(packet.stream_index);
        scratch.set_pts(Some(packet.pts));
        scratch.set_dts(Some(packet.dts));
        scratch.set_position(-1);
        if packet.key {
            scratch.set_flags(ffmpeg::codec::packet::Flags::KEY);
        } else {
            scratch.set_flags(ffmpeg::codec::packet::Flags::empty());
        }

        let result = scratch.write(output);
        helpers::packet_detach_data(scratch);

        result.map_err(FfmpegError::WritePacket)?;
        Ok(())
    }

    fn write_trailer(&mut self) -> Result<()> {
        let output = self.output_mut()?;
        output.write_trailer().map_err(FfmpegError::WriteTrailer)?;
        if let Some(memory) = self.memory.as_mut() {
            memory.flush();
        }
        Ok(())
    }

    fn release(&mut self) {
        let Some(mut output) = self.output.take() else {
            return;
        };
        if let Some(mut memory) = self.memory.take() {
            memory.flush();
            helpers::detach_avio(&mut output);
            drop(output);
            memory.release();
            self.memory_output = Some(memory.writer_mut().take());
        } else {
            // closes the file handle, if any
            drop(output);
        }
        self.opened = false;
        tracing::debug!("Released {} output context", self.format);
    }
}

impl Drop for FfmpegSink {
    fn drop(&mut self) {
        self.release();
    }
}
