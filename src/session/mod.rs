//! Output container session
//!
//! A `ContainerSession` owns one output context for its whole life and walks
//! it through `configure → open → write_header → submit* → finalize`.
//! Calls made out of order are rejected without touching the state; fatal
//! setup failures move the session to [`SessionState::Failed`], from which
//! only `finalize` (release) is possible.

pub mod ffmpeg_sink;
pub mod sink;
pub mod state;

pub use ffmpeg_sink::FfmpegSink;
pub use sink::{MuxSink, OutputTarget};
pub use state::SessionState;

use crate::error::{MuxError, Result};
use crate::report;
use crate::stream::{AudioStreamConfig, StreamConfig, StreamRegistry, VideoStreamConfig};
use crate::writer::interleave::{DeferredFailure, Interleaver, DEFAULT_MAX_INTERLEAVE_DELTA_MICROS};
use crate::writer::ContainerPacket;
use ffmpeg_next as ffmpeg;
use uuid::Uuid;

pub struct ContainerSession<S: MuxSink = FfmpegSink> {
    id: Uuid,
    span: tracing::Span,
    state: SessionState,
    format: String,
    target: Option<OutputTarget>,
    segment_duration_secs: u32,
    format_options: Vec<(String, String)>,
    registry: StreamRegistry,
    interleaver: Interleaver,
    sink: S,
}

impl ContainerSession<FfmpegSink> {
    /// A session that muxes through FFmpeg.
    pub fn new() -> Self {
        Self::with_sink(FfmpegSink::new())
    }
}

impl Default for ContainerSession<FfmpegSink> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: MuxSink> ContainerSession<S> {
    /// An unconfigured session writing through `sink`, with a fresh id.
    pub fn with_sink(sink: S) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            span: tracing::info_span!("mux_session", id = %id),
            state: SessionState::Unconfigured,
            format: String::new(),
            target: None,
            segment_duration_secs: 0,
            format_options: Vec::new(),
            registry: StreamRegistry::new(),
            interleaver: Interleaver::new(DEFAULT_MAX_INTERLEAVE_DELTA_MICROS),
            sink,
        }
    }

    /// Session id, also recorded on the session's tracing span.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn format(&self) -> &str {
        &self.format
    }

    pub fn target(&self) -> Option<&OutputTarget> {
        self.target.as_ref()
    }

    pub fn registry(&self) -> &StreamRegistry {
        &self.registry
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Allocate the output for `format` at `target` and register `streams`
    /// in order.
    pub fn configure<I>(
        &mut self,
        target: OutputTarget,
        format: &str,
        streams: I,
        segment_duration_secs: u32,
    ) -> Result<()>
    where
        I: IntoIterator<Item = StreamConfig>,
    {
        self.expect_state("configure", SessionState::Unconfigured)?;
        let span = self.span.clone();
        let _guard = span.enter();

        match self.try_configure(target, format, streams, segment_duration_secs) {
            Ok(()) => {
                self.state = SessionState::Configured;
                tracing::info!(
                    "Configured {} output {} with {} streams",
                    self.format,
                    self.target.as_ref().map(|t| t.to_string()).unwrap_or_default(),
                    self.registry.len()
                );
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    fn try_configure<I>(
        &mut self,
        target: OutputTarget,
        format: &str,
        streams: I,
        segment_duration_secs: u32,
    ) -> Result<()>
    where
        I: IntoIterator<Item = StreamConfig>,
    {
        if format.is_empty() {
            return Err(MuxError::Config("no output format given".to_string()));
        }
        if segment_duration_secs == 0 {
            return Err(MuxError::Config(
                "segment duration must be at least one second".to_string(),
            ));
        }

        self.sink.allocate(&target, format)?;
        self.format = format.to_string();
        self.target = Some(target);
        self.segment_duration_secs = segment_duration_secs;

        for config in streams {
            self.registry.register(&mut self.sink, config)?;
        }
        Ok(())
    }

    /// Register a video stream. Only allowed before the header is written.
    pub fn add_video_stream(&mut self, config: VideoStreamConfig) -> Result<usize> {
        self.add_stream(StreamConfig::Video(config))
    }

    /// Register an audio stream. Only allowed before the header is written.
    pub fn add_audio_stream(&mut self, config: AudioStreamConfig) -> Result<usize> {
        self.add_stream(StreamConfig::Audio(config))
    }

    fn add_stream(&mut self, config: StreamConfig) -> Result<usize> {
        self.expect_state("register stream", SessionState::Configured)?;
        match self.registry.register(&mut self.sink, config) {
            Ok(index) => Ok(index),
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Set a muxer private option passed along with the header.
    pub fn set_option(&mut self, key: &str, value: &str) -> Result<()> {
        self.expect_state("set option", SessionState::Configured)?;
        self.format_options.push((key.to_string(), value.to_string()));
        Ok(())
    }

    pub fn set_max_interleave_delta_micros(&mut self, micros: i64) {
        self.interleaver.set_max_delta_micros(micros);
    }

    /// Open the output for writing.
    ///
    /// A no-op for formats that create their own files and for memory
    /// targets, and when the output is already open.
    pub fn open(&mut self) -> Result<()> {
        match self.state {
            SessionState::Configured => {}
            SessionState::HeaderWritten => return Ok(()),
            state => {
                return Err(MuxError::InvalidState {
                    operation: "open",
                    state,
                })
            }
        }
        let span = self.span.clone();
        let _guard = span.enter();

        self.sink.open().map_err(|e| self.fail(e))
    }

    /// Write the container header, including the segment duration for
    /// segmenting formats.
    pub fn write_header(&mut self) -> Result<()> {
        self.expect_state("write header", SessionState::Configured)?;
        let span = self.span.clone();
        let _guard = span.enter();

        if self.registry.is_empty() {
            return Err(self.fail(MuxError::Config("no streams registered".to_string())));
        }
        if let Err(e) = self.sink.open() {
            return Err(self.fail(e));
        }

        let mut options = Vec::with_capacity(self.format_options.len() + 1);
        if let Some(key) = sink::segment_duration_option(&self.format) {
            options.push((key.to_string(), self.segment_duration_secs.to_string()));
        }
        options.extend(self.format_options.iter().cloned());

        if let Err(e) = self.sink.write_header(&options) {
            return Err(self.fail(e));
        }

        self.interleaver.reset(self.registry.len());
        self.state = SessionState::HeaderWritten;
        for stream in self.registry.iter() {
            tracing::debug!(
                "Stream {} ({}) time base {}",
                stream.index(),
                stream.kind().as_str(),
                self.stream_time_base(stream.index())
                    .unwrap_or(stream.config.time_base())
            );
        }
        tracing::info!("Header written ({} segments of {}s)", self.format, self.segment_duration_secs);
        Ok(())
    }

    /// Current time base of a stream; the muxer may have changed it while
    /// writing the header.
    pub fn stream_time_base(&self, index: usize) -> Option<ffmpeg::Rational> {
        self.sink
            .stream_time_base(index)
            .or_else(|| self.registry.get(index).map(|s| s.config.time_base()))
    }

    /// Hand a packet to the interleaver.
    ///
    /// `Err` means this packet was refused. Held-back packets the sink
    /// refused while draining are returned, each with its own stream index.
    /// Neither moves the session out of `HeaderWritten`.
    pub fn submit(&mut self, packet: &ContainerPacket<'_>) -> Result<Vec<DeferredFailure>> {
        self.expect_state("write packet", SessionState::HeaderWritten)?;
        let index = packet.stream_index;
        if self.registry.get(index).is_none() {
            return Err(MuxError::packet(index, MuxError::UnknownStream(index)));
        }
        self.interleaver
            .push(packet, &mut self.sink)
            .map_err(|e| wrap_packet_error(index, e))
    }

    /// Mark a stream as finished so it stops holding back the others.
    pub fn end_stream(&mut self, index: usize) -> Result<Vec<DeferredFailure>> {
        self.expect_state("end stream", SessionState::HeaderWritten)?;
        self.interleaver
            .end_stream(index, &mut self.sink)
            .map_err(|e| wrap_packet_error(index, e))
    }

    /// Write every held-back packet now, ahead of `finalize`.
    pub fn flush(&mut self) -> Result<Vec<DeferredFailure>> {
        self.expect_state("flush", SessionState::HeaderWritten)?;
        Ok(self.interleaver.flush(&mut self.sink))
    }

    /// Packets held back by the interleaver.
    pub fn queued_packets(&self) -> usize {
        self.interleaver.queued()
    }

    /// Flush pending packets, write the trailer and release the output.
    ///
    /// The trailer is only written if the header was. Any other live state
    /// just releases the output. Calling this twice is an error.
    pub fn finalize(&mut self) -> Result<()> {
        let span = self.span.clone();
        let _guard = span.enter();

        match self.state {
            SessionState::Finalized => Err(MuxError::InvalidState {
                operation: "finalize",
                state: SessionState::Finalized,
            }),
            SessionState::HeaderWritten => {
                for failure in self.interleaver.flush(&mut self.sink) {
                    report::report(&failure.error);
                }
                let trailer = self.sink.write_trailer();
                self.release();
                match trailer {
                    Ok(()) => {
                        tracing::info!("Trailer written, session finalized");
                        Ok(())
                    }
                    Err(e) => {
                        report::report(&e);
                        Err(e)
                    }
                }
            }
            state => {
                tracing::debug!("Releasing session in state {} without trailer", state);
                self.release();
                Ok(())
            }
        }
    }

    fn release(&mut self) {
        self.interleaver.reset(0);
        self.sink.release();
        self.state = SessionState::Finalized;
    }

    fn expect_state(&self, operation: &'static str, expected: SessionState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(MuxError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    fn fail(&mut self, error: MuxError) -> MuxError {
        self.state = SessionState::Failed;
        report::report(&error);
        error
    }
}

impl<S: MuxSink> Drop for ContainerSession<S> {
    fn drop(&mut self) {
        if self.state.is_live() {
            if let Err(e) = self.finalize() {
                tracing::warn!("Finalize on drop failed: {}", e);
            }
        }
    }
}

fn wrap_packet_error(index: usize, error: MuxError) -> MuxError {
    match error {
        MuxError::PacketWrite { .. } => error,
        other => MuxError::packet(index, other),
    }
}
