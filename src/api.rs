//! Caller-facing muxer facade

use crate::config::MuxOptions;
use crate::error::{MuxError, Result};
use crate::session::{ContainerSession, FfmpegSink, MuxSink, OutputTarget, SessionState};
use crate::stream::{StreamConfig, StreamKind};
use crate::writer::{EncodedAccessUnit, PacketFlags, PacketWriter, SessionStats};
use std::path::Path;
use uuid::Uuid;

/// Video is always stream 0 and audio stream 1.
pub const VIDEO_STREAM_INDEX: usize = 0;
pub const AUDIO_STREAM_INDEX: usize = 1;

/// A live audio/video muxing session with one video and one audio stream.
///
/// ```no_run
/// use live_hls_mux::{LiveMuxer, MuxOptions};
///
/// # fn frames() -> Vec<(bool, Vec<u8>, u32, i64)> { Vec::new() }
/// let mut muxer = LiveMuxer::prepare("/tmp/live/stream.m3u8", MuxOptions::default())?;
/// for (is_video, data, flags, pts) in frames() {
///     // a bad packet is dropped; the session carries on
///     let _ = muxer.write_packet(&data, is_video, 0, data.len(), flags, pts);
/// }
/// muxer.finalize()?;
/// # Ok::<(), live_hls_mux::MuxError>(())
/// ```
pub struct LiveMuxer<S: MuxSink = FfmpegSink> {
    session: ContainerSession<S>,
    writer: PacketWriter,
}

impl LiveMuxer<FfmpegSink> {
    /// Set up a session writing to `output_path`: streams are registered,
    /// the output opened and the header written.
    pub fn prepare<P: AsRef<Path>>(output_path: P, options: MuxOptions) -> Result<Self> {
        let target = OutputTarget::Path(output_path.as_ref().to_path_buf());
        Self::prepare_target(target, options)
    }

    /// Like [`prepare`](Self::prepare), muxing into memory instead of a
    /// file. Only single-file formats can do this.
    pub fn prepare_in_memory(options: MuxOptions) -> Result<Self> {
        Self::prepare_target(OutputTarget::Memory, options)
    }

    /// Like [`prepare`](Self::prepare) for any [`OutputTarget`].
    pub fn prepare_target(target: OutputTarget, options: MuxOptions) -> Result<Self> {
        crate::ffmpeg_utils::init()?;
        Self::prepare_with_sink(FfmpegSink::new(), target, options)
    }

    /// Bytes muxed so far into a memory target.
    pub fn take_output(&mut self) -> Option<Vec<u8>> {
        self.session.sink_mut().take_memory_output()
    }
}

impl<S: MuxSink> LiveMuxer<S> {
    /// Set up a session on a caller-supplied sink.
    pub fn prepare_with_sink(sink: S, target: OutputTarget, options: MuxOptions) -> Result<Self> {
        options.validate()?;

        let mut session = ContainerSession::with_sink(sink);
        session.set_max_interleave_delta_micros(options.max_interleave_delta_micros);
        tracing::info!(
            "Preparing session {}: {} {}x{}@{} + {}Hz/{}ch to {}",
            session.id(),
            options.format,
            options.video_width,
            options.video_height,
            options.video_frame_rate,
            options.audio_sample_rate,
            options.audio_channel_count,
            target
        );

        session.configure(
            target,
            &options.format,
            [
                StreamConfig::Video(options.video_stream_config()),
                StreamConfig::Audio(options.audio_stream_config()),
            ],
            options.segment_duration_secs,
        )?;
        for (key, value) in options.header_options() {
            session.set_option(&key, &value)?;
        }
        session.open()?;
        session.write_header()?;

        Ok(Self {
            session,
            writer: PacketWriter::new(options.rebase_timestamps),
        })
    }

    /// Mux one access unit found at `buffer[offset..offset + size]`.
    ///
    /// `flags` is a bit set of [`PacketFlags`]. The buffer is only read
    /// during this call.
    pub fn write_packet(
        &mut self,
        buffer: &[u8],
        is_video: bool,
        offset: usize,
        size: usize,
        flags: u32,
        pts_micros: i64,
    ) -> Result<()> {
        let stream_index = if is_video {
            VIDEO_STREAM_INDEX
        } else {
            AUDIO_STREAM_INDEX
        };
        let data = offset
            .checked_add(size)
            .and_then(|end| buffer.get(offset..end))
            .ok_or_else(|| {
                MuxError::packet(
                    stream_index,
                    MuxError::InvalidPayload(format!(
                        "range {}+{} outside buffer of {} bytes",
                        offset,
                        size,
                        buffer.len()
                    )),
                )
            })?;

        let unit = EncodedAccessUnit {
            kind: if is_video {
                StreamKind::Video
            } else {
                StreamKind::Audio
            },
            data,
            flags: PacketFlags::from_bits(flags),
            pts_micros,
        };
        self.writer.write_packet(&mut self.session, &unit, stream_index)
    }

    /// Write the trailer and release the output.
    pub fn finalize(&mut self) -> Result<()> {
        if self.session.state() == SessionState::HeaderWritten {
            self.writer.flush(&mut self.session)?;
        }
        let result = self.session.finalize();
        if result.is_ok() {
            let stats = self.writer.stats();
            tracing::info!(
                "Session {} done: {} packets, {} bytes, {} dropped",
                self.session.id(),
                stats.packets_written(),
                stats.bytes_written(),
                stats.packets_dropped()
            );
        }
        result
    }

    /// Per-stream packet counters.
    pub fn stats(&self) -> &SessionStats {
        self.writer.stats()
    }

    /// Lifecycle state of the underlying session.
    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn session_id(&self) -> Uuid {
        self.session.id()
    }

    pub fn session(&self) -> &ContainerSession<S> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut ContainerSession<S> {
        &mut self.session
    }
}
