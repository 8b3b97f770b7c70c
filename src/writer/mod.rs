//! Packet writing
//!
//! Turns encoder access units into container packets:
//! - validates routing (stream index, kind, payload)
//! - rescales the microsecond timestamp into the stream's time base
//! - drops units that would break per-stream monotonicity
//! - re-inserts cached video parameter sets ahead of key frames
//! - hands the packet to the session's interleaver

pub mod interleave;
pub mod packet;
pub mod pool;

pub use packet::{ContainerPacket, EncodedAccessUnit, PacketFlags};

use crate::error::{MuxError, Result};
use interleave::DeferredFailure;
use crate::report;
use crate::session::{ContainerSession, MuxSink, SessionState};
use crate::stream::StreamKind;
use crate::timestamp;
use serde::Serialize;

/// Counters for one output stream.
#[derive(Debug, Clone, Serialize)]
pub struct StreamStats {
    pub index: usize,
    pub kind: StreamKind,
    pub packets: u64,
    pub bytes: u64,
    pub key_frames: u64,
    pub dropped: u64,
    /// Last timestamp accepted, in microseconds
    pub last_pts_micros: Option<i64>,
}

/// Per-stream packet counters for a session.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionStats {
    pub streams: Vec<StreamStats>,
}

impl SessionStats {
    pub fn packets_written(&self) -> u64 {
        self.streams.iter().map(|s| s.packets).sum()
    }

    pub fn bytes_written(&self) -> u64 {
        self.streams.iter().map(|s| s.bytes).sum()
    }

    pub fn packets_dropped(&self) -> u64 {
        self.streams.iter().map(|s| s.dropped).sum()
    }
}

#[derive(Debug, Default)]
struct StreamState {
    last_ts: Option<i64>,
    codec_config: Option<Vec<u8>>,
}

/// Builds and submits container packets for one session.
#[derive(Debug, Default)]
pub struct PacketWriter {
    rebase_timestamps: bool,
    base_micros: Option<i64>,
    streams: Vec<StreamState>,
    stats: SessionStats,
    /// Scratch for key frames that need parameter sets prepended
    joined: Vec<u8>,
}

impl PacketWriter {
    /// With `rebase_timestamps`, the first timestamp seen on any stream
    /// becomes zero for all streams.
    pub fn new(rebase_timestamps: bool) -> Self {
        Self {
            rebase_timestamps,
            ..Self::default()
        }
    }

    /// Counters so far. A held-back packet counts as written until the
    /// sink refuses it, then moves to `dropped` on its own stream.
    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Write out everything the session's interleaver holds back, counting
    /// any packet the sink refuses against its stream.
    pub fn flush<S: MuxSink>(&mut self, session: &mut ContainerSession<S>) -> Result<()> {
        let failures = session.flush()?;
        self.record_deferred(failures);
        Ok(())
    }

    /// Write one access unit to stream `stream_index` of `session`.
    ///
    /// `unit.data` is not retained after this returns. A failure affects
    /// only this unit; the session state is left as it was.
    pub fn write_packet<S: MuxSink>(
        &mut self,
        session: &mut ContainerSession<S>,
        unit: &EncodedAccessUnit<'_>,
        stream_index: usize,
    ) -> Result<()> {
        self.sync_streams(session);
        let result = self.submit(session, unit, stream_index);
        if let Err(e) = &result {
            if let (MuxError::PacketWrite { .. }, Some(stats)) =
                (e, self.stats.streams.get_mut(stream_index))
            {
                stats.dropped += 1;
            }
            report::report(e);
        }
        result
    }

    fn submit<S: MuxSink>(
        &mut self,
        session: &mut ContainerSession<S>,
        unit: &EncodedAccessUnit<'_>,
        index: usize,
    ) -> Result<()> {
        if session.state() != SessionState::HeaderWritten {
            return Err(MuxError::InvalidState {
                operation: "write packet",
                state: session.state(),
            });
        }
        let kind = session
            .registry()
            .get(index)
            .map(|s| s.kind())
            .ok_or_else(|| MuxError::packet(index, MuxError::UnknownStream(index)))?;
        if kind != unit.kind {
            return Err(MuxError::packet(
                index,
                MuxError::InvalidPayload(format!(
                    "{} unit sent to {} stream",
                    unit.kind.as_str(),
                    kind.as_str()
                )),
            ));
        }

        if unit.data.is_empty() {
            if unit.flags.is_end_of_stream() {
                let failures = session.end_stream(index)?;
                self.record_deferred(failures);
                return Ok(());
            }
            return Err(MuxError::packet(
                index,
                MuxError::InvalidPayload("empty access unit".to_string()),
            ));
        }

        if unit.flags.is_codec_config() {
            match kind {
                StreamKind::Video => {
                    tracing::debug!(
                        "Caching {} bytes of codec config for stream {}",
                        unit.data.len(),
                        index
                    );
                    self.streams[index].codec_config = Some(unit.data.to_vec());
                }
                StreamKind::Audio => {
                    tracing::info!("Ignoring codec config unit on audio stream {}", index);
                }
            }
            return Ok(());
        }

        let pts_micros = self.rebase(unit.pts_micros).map_err(|e| MuxError::packet(index, e))?;
        let time_base = session.stream_time_base(index).ok_or_else(|| {
            MuxError::packet(index, MuxError::UnknownStream(index))
        })?;
        let ts = timestamp::rescale(pts_micros, timestamp::MICROSECONDS, time_base)
            .map_err(|e| MuxError::packet(index, e))?;

        let state = &self.streams[index];
        if let Some(last) = state.last_ts {
            if ts <= last {
                return Err(MuxError::packet(
                    index,
                    MuxError::InvalidTimestamp(format!(
                        "{} is not after previous {} (time base {})",
                        ts, last, time_base
                    )),
                ));
            }
        }

        let key = unit.flags.is_key_frame();
        let data: &[u8] = match state.codec_config.as_deref() {
            Some(config) if key && !unit.data.starts_with(config) => {
                self.joined.clear();
                self.joined.extend_from_slice(config);
                self.joined.extend_from_slice(unit.data);
                &self.joined
            }
            _ => unit.data,
        };
        let size = data.len();

        // pre-encoded input carries no reordering information
        let packet = ContainerPacket {
            stream_index: index,
            pts: ts,
            dts: ts,
            time_base,
            key,
            data,
        };
        let failures = session.submit(&packet)?;

        // accepted: it is queued or written, so later units must be after it
        self.streams[index].last_ts = Some(ts);
        let stats = &mut self.stats.streams[index];
        stats.packets += 1;
        stats.bytes += size as u64;
        if key {
            stats.key_frames += 1;
        }
        stats.last_pts_micros = Some(pts_micros);

        let own_failure = self.record_deferred(failures);
        if unit.flags.is_end_of_stream() {
            let failures = session.end_stream(index)?;
            self.record_deferred(failures);
        }
        own_failure.map_or(Ok(()), Err)
    }

    /// Move refused held-back packets from written to dropped on their own
    /// stream. The failure of the packet being submitted is returned instead
    /// of reported, so the caller of `write_packet` sees it.
    fn record_deferred(&mut self, failures: Vec<DeferredFailure>) -> Option<MuxError> {
        let mut own = None;
        for failure in failures {
            if let Some(stats) = self.stats.streams.get_mut(failure.stream_index) {
                stats.packets = stats.packets.saturating_sub(1);
                stats.bytes = stats.bytes.saturating_sub(failure.bytes as u64);
                if failure.key {
                    stats.key_frames = stats.key_frames.saturating_sub(1);
                }
                if !failure.current {
                    stats.dropped += 1;
                }
            }
            if failure.current {
                own = Some(failure.error);
            } else {
                report::report(&failure.error);
            }
        }
        own
    }

    fn rebase(&mut self, pts_micros: i64) -> Result<i64> {
        if !self.rebase_timestamps {
            return Ok(pts_micros);
        }
        let base = *self.base_micros.get_or_insert_with(|| {
            tracing::debug!("Rebasing timestamps on {}us", pts_micros);
            pts_micros
        });
        if pts_micros < base {
            return Err(MuxError::InvalidTimestamp(format!(
                "{}us is before the session start {}us",
                pts_micros, base
            )));
        }
        Ok(pts_micros - base)
    }

    fn sync_streams<S: MuxSink>(&mut self, session: &ContainerSession<S>) {
        for descriptor in session.registry().iter().skip(self.streams.len()) {
            self.streams.push(StreamState::default());
            self.stats.streams.push(StreamStats {
                index: descriptor.index(),
                kind: descriptor.kind(),
                packets: 0,
                bytes: 0,
                key_frames: 0,
                dropped: 0,
                last_pts_micros: None,
            });
        }
    }
}
