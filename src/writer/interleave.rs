//! Interleaved emission across streams
//!
//! Packets leave in non-decreasing decode-time order across all streams.
//! A packet is held back until every live stream has something queued, so
//! nothing earlier can still arrive, or until the queued span exceeds the
//! maximum interleave delta, which keeps a stalled stream from blocking the
//! others forever.  Equal timestamps leave in arrival order.

use super::packet::ContainerPacket;
use super::pool::BufferPool;
use crate::error::{MuxError, Result};
use crate::session::sink::MuxSink;
use crate::timestamp;
use bytes::BytesMut;
use ffmpeg_next as ffmpeg;
use std::cmp::Ordering;
use std::collections::VecDeque;

/// Same value as FFmpeg's default `max_interleave_delta` (10 s).
///
/// Unlike FFmpeg, where 0 means "wait without limit", a delta of 0 here
/// writes the earliest packet as soon as anything is queued.
/// `MuxOptions::validate` rejects 0 for that reason.
pub const DEFAULT_MAX_INTERLEAVE_DELTA_MICROS: i64 = 10_000_000;

/// A held-back packet the sink refused while the queue was draining.
#[derive(Debug)]
pub struct DeferredFailure {
    pub stream_index: usize,
    pub bytes: usize,
    pub key: bool,
    /// The refused packet is the one passed to the `push` that drained it
    pub current: bool,
    pub error: MuxError,
}

#[derive(Debug)]
struct Queued {
    seq: u64,
    pts: i64,
    dts: i64,
    time_base: ffmpeg::Rational,
    key: bool,
    data: BytesMut,
}

#[derive(Debug, Default)]
struct Lane {
    queue: VecDeque<Queued>,
    ended: bool,
}

#[derive(Debug)]
pub struct Interleaver {
    lanes: Vec<Lane>,
    pool: BufferPool,
    next_seq: u64,
    max_delta_micros: i64,
}

impl Interleaver {
    pub fn new(max_delta_micros: i64) -> Self {
        Self {
            lanes: Vec::new(),
            pool: BufferPool::new(),
            next_seq: 0,
            max_delta_micros,
        }
    }

    /// Start interleaving `stream_count` streams, discarding any queued state.
    pub fn reset(&mut self, stream_count: usize) {
        self.drain_to_pool();
        self.lanes = (0..stream_count).map(|_| Lane::default()).collect();
        self.next_seq = 0;
    }

    pub fn set_max_delta_micros(&mut self, micros: i64) {
        self.max_delta_micros = micros;
    }

    /// Number of packets currently held back.
    pub fn queued(&self) -> usize {
        self.lanes.iter().map(|l| l.queue.len()).sum()
    }

    /// Accept one packet and write whatever has become ready.
    ///
    /// The payload is written straight from the borrowed slice when the
    /// packet is already the earliest one pending; otherwise it is copied
    /// into a pooled buffer before this call returns.
    ///
    /// `Err` means the packet was not accepted. Once it is queued, sink
    /// failures of queued packets (this one included) come back as
    /// [`DeferredFailure`]s, each tagged with its own stream.
    pub fn push<S: MuxSink>(
        &mut self,
        packet: &ContainerPacket<'_>,
        sink: &mut S,
    ) -> Result<Vec<DeferredFailure>> {
        let index = packet.stream_index;
        let lane = self.lanes.get(index).ok_or(MuxError::UnknownStream(index))?;
        if lane.ended {
            return Err(MuxError::InvalidPayload(format!(
                "stream {} already ended",
                index
            )));
        }

        if lane.queue.is_empty() && self.is_earliest(packet) {
            sink.write_packet(packet)
                .map_err(|e| MuxError::packet(index, e))?;
            return Ok(Vec::new());
        }

        let data = self.pool.copy_from(packet.data);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.lanes[index].queue.push_back(Queued {
            seq,
            pts: packet.pts,
            dts: packet.dts,
            time_base: packet.time_base,
            key: packet.key,
            data,
        });

        Ok(self.drain(sink, false, Some(seq)))
    }

    /// Mark a stream as finished; it no longer holds the others back.
    pub fn end_stream<S: MuxSink>(
        &mut self,
        index: usize,
        sink: &mut S,
    ) -> Result<Vec<DeferredFailure>> {
        let lane = self
            .lanes
            .get_mut(index)
            .ok_or(MuxError::UnknownStream(index))?;
        if !lane.ended {
            lane.ended = true;
            tracing::debug!("Stream {} ended, {} packets still queued", index, lane.queue.len());
        }
        Ok(self.drain(sink, false, None))
    }

    /// Write every queued packet in order, keeping going past failures.
    pub fn flush<S: MuxSink>(&mut self, sink: &mut S) -> Vec<DeferredFailure> {
        if self.queued() > 0 {
            tracing::debug!("Flushing {} interleaved packets", self.queued());
        }
        self.drain(sink, true, None)
    }

    /// Whether `packet` is strictly earlier than every queued packet, with
    /// every other live stream already waiting.
    fn is_earliest(&self, packet: &ContainerPacket<'_>) -> bool {
        self.lanes
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != packet.stream_index)
            .all(|(_, lane)| match lane.queue.front() {
                Some(head) => {
                    timestamp::compare(packet.dts, packet.time_base, head.dts, head.time_base)
                        == Ordering::Less
                }
                None => lane.ended,
            })
    }

    fn drain<S: MuxSink>(
        &mut self,
        sink: &mut S,
        force: bool,
        current: Option<u64>,
    ) -> Vec<DeferredFailure> {
        let mut failures = Vec::new();
        while let Some(index) = self.next_ready(force) {
            let Some(queued) = self.lanes[index].queue.pop_front() else {
                break;
            };
            let packet = ContainerPacket {
                stream_index: index,
                pts: queued.pts,
                dts: queued.dts,
                time_base: queued.time_base,
                key: queued.key,
                data: &queued.data,
            };
            if let Err(e) = sink.write_packet(&packet) {
                failures.push(DeferredFailure {
                    stream_index: index,
                    bytes: queued.data.len(),
                    key: queued.key,
                    current: current == Some(queued.seq),
                    error: MuxError::packet(index, e),
                });
            }
            self.pool.recycle(queued.data);
        }
        failures
    }

    /// Lane holding the earliest queued packet, if it may be written now.
    fn next_ready(&self, force: bool) -> Option<usize> {
        let mut earliest: Option<(usize, &Queued)> = None;
        let mut waiting_on_live_stream = false;

        for (i, lane) in self.lanes.iter().enumerate() {
            match lane.queue.front() {
                Some(head) => {
                    let earlier = match earliest {
                        None => true,
                        Some((_, best)) => {
                            match timestamp::compare(head.dts, head.time_base, best.dts, best.time_base) {
                                Ordering::Less => true,
                                Ordering::Equal => head.seq < best.seq,
                                Ordering::Greater => false,
                            }
                        }
                    };
                    if earlier {
                        earliest = Some((i, head));
                    }
                }
                None if !lane.ended => waiting_on_live_stream = true,
                None => {}
            }
        }

        let (index, head) = earliest?;
        if force || !waiting_on_live_stream {
            return Some(index);
        }

        let oldest = timestamp::to_micros(head.dts, head.time_base);
        let newest = self
            .lanes
            .iter()
            .filter_map(|l| l.queue.back())
            .map(|q| timestamp::to_micros(q.dts, q.time_base))
            .max()
            .unwrap_or(oldest);
        if newest.saturating_sub(oldest) > self.max_delta_micros {
            tracing::debug!(
                "Interleave delta {}us exceeded, writing stream {} without waiting",
                newest.saturating_sub(oldest),
                index
            );
            return Some(index);
        }
        None
    }

    fn drain_to_pool(&mut self) {
        for lane in &mut self.lanes {
            for queued in lane.queue.drain(..) {
                self.pool.recycle(queued.data);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::OutputTarget;
    use crate::tests::recording_sink::RecordingSink;

    const VIDEO: ffmpeg::Rational = ffmpeg::Rational(1, 30);
    const AUDIO: ffmpeg::Rational = ffmpeg::Rational(1, 44100);

    fn sink(streams: usize) -> RecordingSink {
        let mut sink = RecordingSink::new();
        sink.allocate(&OutputTarget::Memory, "mpegts").unwrap();
        for _ in 0..streams {
            sink.push_stream_slot();
        }
        sink
    }

    fn packet(stream_index: usize, ts: i64, time_base: ffmpeg::Rational, data: &[u8]) -> ContainerPacket<'_> {
        ContainerPacket {
            stream_index,
            pts: ts,
            dts: ts,
            time_base,
            key: true,
            data,
        }
    }

    #[test]
    fn test_single_stream_writes_through() {
        let mut sink = sink(1);
        let mut interleaver = Interleaver::new(DEFAULT_MAX_INTERLEAVE_DELTA_MICROS);
        interleaver.reset(1);

        for ts in 0..5 {
            interleaver.push(&packet(0, ts, VIDEO, b"v"), &mut sink).unwrap();
        }
        assert_eq!(sink.written().len(), 5);
        assert_eq!(interleaver.queued(), 0);
    }

    #[test]
    fn test_audio_video_output_is_non_decreasing() {
        let mut sink = sink(2);
        let mut interleaver = Interleaver::new(DEFAULT_MAX_INTERLEAVE_DELTA_MICROS);
        interleaver.reset(2);

        for (v, a) in [(0, 0), (1, 10), (2, 20)] {
            interleaver.push(&packet(0, v, VIDEO, b"v"), &mut sink).unwrap();
            interleaver.push(&packet(1, a, AUDIO, b"a"), &mut sink).unwrap();
        }
        assert!(interleaver.flush(&mut sink).is_empty());

        let written = sink.written();
        assert_eq!(written.len(), 6);
        let micros: Vec<i64> = written
            .iter()
            .map(|p| timestamp::to_micros(p.dts, p.time_base))
            .collect();
        assert!(micros.windows(2).all(|w| w[0] <= w[1]), "{:?}", micros);
        // equal timestamps keep arrival order
        assert_eq!(written[0].stream_index, 0);
        assert_eq!(written[1].stream_index, 1);
    }

    #[test]
    fn test_waits_for_lagging_stream() {
        let mut sink = sink(2);
        let mut interleaver = Interleaver::new(DEFAULT_MAX_INTERLEAVE_DELTA_MICROS);
        interleaver.reset(2);

        for v in 0..10 {
            interleaver.push(&packet(0, v, VIDEO, b"v"), &mut sink).unwrap();
        }
        assert!(sink.written().is_empty());
        assert_eq!(interleaver.queued(), 10);

        interleaver.push(&packet(1, 0, AUDIO, b"a"), &mut sink).unwrap();
        // only v0 (<= a0 by arrival) may go; everything else is later than a0
        assert_eq!(sink.written().len(), 2);
    }

    #[test]
    fn test_max_delta_unblocks_stalled_stream() {
        let mut sink = sink(2);
        let mut interleaver = Interleaver::new(1_000_000);
        interleaver.reset(2);

        // 2 seconds of video and no audio at all
        for v in 0..60 {
            interleaver.push(&packet(0, v, VIDEO, b"v"), &mut sink).unwrap();
        }
        assert!(!sink.written().is_empty());
        let last = sink.written().last().unwrap().dts;
        assert!(last >= 28, "last written frame {}", last);
        assert!(interleaver.queued() <= 31);
    }

    #[test]
    fn test_ended_stream_releases_the_others() {
        let mut sink = sink(2);
        let mut interleaver = Interleaver::new(DEFAULT_MAX_INTERLEAVE_DELTA_MICROS);
        interleaver.reset(2);

        for v in 0..3 {
            interleaver.push(&packet(0, v, VIDEO, b"v"), &mut sink).unwrap();
        }
        interleaver.end_stream(1, &mut sink).unwrap();
        assert_eq!(sink.written().len(), 3);

        let err = interleaver.push(&packet(1, 0, AUDIO, b"a"), &mut sink).unwrap_err();
        assert!(matches!(err, MuxError::InvalidPayload(_)));
    }

    #[test]
    fn test_unknown_stream() {
        let mut sink = sink(1);
        let mut interleaver = Interleaver::new(DEFAULT_MAX_INTERLEAVE_DELTA_MICROS);
        interleaver.reset(1);
        let err = interleaver.push(&packet(3, 0, VIDEO, b"v"), &mut sink).unwrap_err();
        assert!(matches!(err, MuxError::UnknownStream(3)));
    }

    #[test]
    fn test_deferred_payload_is_copied() {
        let mut sink = sink(2);
        let mut interleaver = Interleaver::new(DEFAULT_MAX_INTERLEAVE_DELTA_MICROS);
        interleaver.reset(2);

        {
            let mut transient = vec![1u8, 2, 3];
            interleaver.push(&packet(0, 0, VIDEO, &transient), &mut sink).unwrap();
            transient.fill(0);
        }
        interleaver.push(&packet(1, 0, AUDIO, b"a"), &mut sink).unwrap();
        assert_eq!(sink.written()[0].data, vec![1u8, 2, 3]);
    }

    #[test]
    fn test_queued_failure_is_charged_to_its_own_stream() {
        let mut sink = sink(2);
        let mut interleaver = Interleaver::new(DEFAULT_MAX_INTERLEAVE_DELTA_MICROS);
        interleaver.reset(2);

        interleaver.push(&packet(0, 0, VIDEO, b"v0"), &mut sink).unwrap();
        interleaver.push(&packet(0, 1, VIDEO, b"v1"), &mut sink).unwrap();

        // a1 is accepted even though writing v0 ahead of it fails
        sink.fail_packets = true;
        let failures = interleaver
            .push(&packet(1, 44100, AUDIO, b"a1"), &mut sink)
            .unwrap();
        assert_eq!(failures.len(), 2);
        assert!(failures.iter().all(|f| f.stream_index == 0 && !f.current));
        assert_eq!(failures[0].bytes, 2);
        assert_eq!(interleaver.queued(), 1);

        sink.fail_packets = false;
        assert!(interleaver.flush(&mut sink).is_empty());
        assert_eq!(sink.written().len(), 1);
        assert_eq!(sink.written()[0].stream_index, 1);
    }

    #[test]
    fn test_failure_of_the_pushed_packet_is_marked_current() {
        let mut sink = sink(2);
        let mut interleaver = Interleaver::new(DEFAULT_MAX_INTERLEAVE_DELTA_MICROS);
        interleaver.reset(2);

        // a0 stays queued: the video lane is live and empty
        interleaver.push(&packet(1, 0, AUDIO, b"a0"), &mut sink).unwrap();
        assert!(interleaver.end_stream(1, &mut sink).unwrap().is_empty());
        assert_eq!(interleaver.queued(), 1);

        // v0 ties with a0, queues behind it and both drain in this call
        sink.fail_packets = true;
        let failures = interleaver.push(&packet(0, 0, VIDEO, b"v0"), &mut sink).unwrap();
        assert_eq!(failures.len(), 2);
        assert_eq!((failures[0].stream_index, failures[0].current), (1, false));
        assert_eq!((failures[1].stream_index, failures[1].current), (0, true));
        assert_eq!(interleaver.queued(), 0);

        // nothing queued ahead of v1, so it goes straight to the sink
        assert!(interleaver.push(&packet(0, 1, VIDEO, b"v1"), &mut sink).is_err());
    }
}
