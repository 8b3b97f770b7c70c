//! Session lifecycle and packet writing against a recording sink

use super::fixtures;
use super::recording_sink::{RecordingSink, SinkEvent};
use crate::api::{LiveMuxer, AUDIO_STREAM_INDEX, VIDEO_STREAM_INDEX};
use crate::config::MuxOptions;
use crate::error::MuxError;
use crate::ffmpeg_utils::ffmpeg;
use crate::report::ErrorClass;
use crate::session::{ContainerSession, OutputTarget, SessionState};
use crate::stream::{StreamConfig, StreamKind};
use crate::timestamp;
use crate::writer::{EncodedAccessUnit, PacketFlags, PacketWriter};
use std::cmp::Ordering;

const KEY: u32 = 1;
const CONFIG: u32 = 2;
const EOS: u32 = 4;

fn configured(sink: RecordingSink) -> ContainerSession<RecordingSink> {
    let mut session = ContainerSession::with_sink(sink);
    session
        .configure(
            OutputTarget::Memory,
            "hls",
            [
                StreamConfig::Video(fixtures::video_config()),
                StreamConfig::Audio(fixtures::audio_config()),
            ],
            4,
        )
        .unwrap();
    session
}

fn ready(sink: RecordingSink) -> ContainerSession<RecordingSink> {
    let mut session = configured(sink);
    session.open().unwrap();
    session.write_header().unwrap();
    session
}

fn muxer(options: MuxOptions) -> LiveMuxer<RecordingSink> {
    LiveMuxer::prepare_with_sink(RecordingSink::new(), OutputTarget::Memory, options).unwrap()
}

fn video_unit(data: &[u8], flags: u32, pts_micros: i64) -> EncodedAccessUnit<'_> {
    EncodedAccessUnit {
        kind: StreamKind::Video,
        data,
        flags: PacketFlags::from_bits(flags),
        pts_micros,
    }
}

#[test]
fn test_streams_get_sequential_indices() {
    let mut session = configured(RecordingSink::new());
    assert_eq!(session.state(), SessionState::Configured);
    assert_eq!(session.add_audio_stream(fixtures::audio_config()).unwrap(), 2);
    assert_eq!(session.add_video_stream(fixtures::video_config()).unwrap(), 3);

    let indices: Vec<usize> = session.registry().iter().map(|s| s.index()).collect();
    assert_eq!(indices, vec![0, 1, 2, 3]);
    assert_eq!(session.sink().stream_count(), 4);
}

#[test]
fn test_registration_after_header_rejected() {
    let mut session = ready(RecordingSink::new());
    let err = session.add_audio_stream(fixtures::audio_config()).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Sequencing);
    assert_eq!(session.state(), SessionState::HeaderWritten);
    assert_eq!(session.registry().len(), 2);
}

#[test]
fn test_registration_after_finalize_rejected() {
    let mut session = ready(RecordingSink::new());
    session.finalize().unwrap();
    let err = session.add_video_stream(fixtures::video_config()).unwrap_err();
    assert!(matches!(
        err,
        MuxError::InvalidState {
            state: SessionState::Finalized,
            ..
        }
    ));
}

#[test]
fn test_write_before_header_rejected() {
    let mut session = configured(RecordingSink::new());
    let mut writer = PacketWriter::new(false);
    let frame = fixtures::h264_access_unit(true, 0);

    let err = writer
        .write_packet(&mut session, &video_unit(&frame, KEY, 0), 0)
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::Sequencing);
    assert_eq!(session.state(), SessionState::Configured);
    assert!(session.sink().written().is_empty());
}

#[test]
fn test_finalize_twice() {
    let mut session = ready(RecordingSink::new());
    session.finalize().unwrap();
    assert_eq!(session.state(), SessionState::Finalized);

    let err = session.finalize().unwrap_err();
    assert_eq!(err.class(), ErrorClass::Sequencing);
    assert_eq!(session.sink().releases(), 1);

    let trailers = session
        .sink()
        .events()
        .iter()
        .filter(|e| **e == SinkEvent::Trailer)
        .count();
    assert_eq!(trailers, 1);
}

#[test]
fn test_finalize_without_header_skips_trailer() {
    let mut session = configured(RecordingSink::new());
    session.finalize().unwrap();
    assert_eq!(session.state(), SessionState::Finalized);
    assert!(!session.sink().events().contains(&SinkEvent::Trailer));
    assert_eq!(session.sink().releases(), 1);
}

#[test]
fn test_drop_releases_unfinalized_session() {
    let sink = RecordingSink::new();
    let releases = sink.release_counter();
    {
        let _session = ready(sink);
    }
    assert_eq!(releases.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[test]
fn test_configure_failure() {
    let mut session = ContainerSession::with_sink(RecordingSink {
        fail_allocate: true,
        ..RecordingSink::new()
    });
    let err = session
        .configure(OutputTarget::Memory, "bogus", Vec::<StreamConfig>::new(), 10)
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::Configuration);
    assert_eq!(session.state(), SessionState::Failed);
    assert!(session.finalize().is_ok());
}

#[test]
fn test_slot_failure_fails_configure() {
    let mut session = ContainerSession::with_sink(RecordingSink {
        fail_add_stream: true,
        ..RecordingSink::new()
    });
    let err = session
        .configure(
            OutputTarget::Memory,
            "hls",
            [StreamConfig::Video(fixtures::video_config())],
            10,
        )
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::Resource);
    assert_eq!(session.state(), SessionState::Failed);
}

#[test]
fn test_open_failure_moves_to_failed() {
    let mut session = configured(RecordingSink {
        fail_open: true,
        ..RecordingSink::new()
    });
    let err = session.open().unwrap_err();
    assert_eq!(err.class(), ErrorClass::Io);
    assert_eq!(session.state(), SessionState::Failed);
    assert!(session.write_header().is_err());

    session.finalize().unwrap();
    assert_eq!(session.sink().releases(), 1);
}

#[test]
fn test_header_failure_moves_to_failed() {
    let mut session = configured(RecordingSink {
        fail_header: true,
        ..RecordingSink::new()
    });
    session.open().unwrap();
    let err = session.write_header().unwrap_err();
    assert_eq!(err.class(), ErrorClass::Format);
    assert_eq!(session.state(), SessionState::Failed);

    session.finalize().unwrap();
    assert!(!session.sink().events().contains(&SinkEvent::Trailer));
    assert_eq!(session.sink().releases(), 1);
}

#[test]
fn test_trailer_failure_still_releases() {
    let mut session = ready(RecordingSink {
        fail_trailer: true,
        ..RecordingSink::new()
    });
    let err = session.finalize().unwrap_err();
    assert_eq!(err.class(), ErrorClass::Format);
    assert_eq!(session.state(), SessionState::Finalized);
    assert_eq!(session.sink().releases(), 1);
}

#[test]
fn test_open_is_idempotent() {
    let mut session = configured(RecordingSink::new());
    session.open().unwrap();
    session.open().unwrap();
    session.write_header().unwrap();
    session.open().unwrap();
    let opens = session
        .sink()
        .events()
        .iter()
        .filter(|e| **e == SinkEvent::Open)
        .count();
    assert_eq!(opens, 1);
}

#[test]
fn test_segment_duration_reaches_the_muxer() {
    let mut session = configured(RecordingSink::new());
    session.set_option("hls_list_size", "6").unwrap();
    session.write_header().unwrap();

    let options = session.sink().header_options().unwrap();
    assert_eq!(options[0], ("hls_time".to_string(), "4".to_string()));
    assert!(options.contains(&("hls_list_size".to_string(), "6".to_string())));
}

#[test]
fn test_header_requires_streams() {
    let mut session = ContainerSession::with_sink(RecordingSink::new());
    session
        .configure(OutputTarget::Memory, "mpegts", Vec::<StreamConfig>::new(), 10)
        .unwrap();
    assert_eq!(session.write_header().unwrap_err().class(), ErrorClass::Configuration);
    assert_eq!(session.state(), SessionState::Failed);
}

#[test]
fn test_invalid_index_does_not_fail_session() {
    let mut muxer = muxer(MuxOptions::default());
    let mut writer = PacketWriter::new(false);
    let frame = fixtures::h264_access_unit(true, 0);

    let err = muxer
        .session_mut()
        .submit(&crate::writer::ContainerPacket {
            stream_index: 7,
            pts: 0,
            dts: 0,
            time_base: ffmpeg::Rational(1, 30),
            key: true,
            data: &frame,
        })
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::PacketWrite);
    assert_eq!(muxer.state(), SessionState::HeaderWritten);

    let err = writer
        .write_packet(muxer.session_mut(), &video_unit(&frame, KEY, 0), 7)
        .unwrap_err();
    assert!(matches!(err, MuxError::PacketWrite { stream_index: 7, .. }));
    assert_eq!(muxer.state(), SessionState::HeaderWritten);

    muxer.write_packet(&frame, true, 0, frame.len(), KEY, 0).unwrap();
    muxer.finalize().unwrap();
    assert_eq!(muxer.session().sink().written().len(), 1);
}

#[test]
fn test_audio_video_interleave_in_order() {
    let mut muxer = muxer(MuxOptions::default());
    let audio = fixtures::adts_frame(32);

    for (v, a) in [(0i64, 0i64), (1, 10), (2, 20)] {
        let frame = fixtures::h264_access_unit(v == 0, v as u32);
        let video_pts = timestamp::to_micros(v, ffmpeg::Rational(1, 30));
        let audio_pts = timestamp::to_micros(a, ffmpeg::Rational(1, 44100));
        muxer
            .write_packet(&frame, true, 0, frame.len(), if v == 0 { KEY } else { 0 }, video_pts)
            .unwrap();
        muxer
            .write_packet(&audio, false, 0, audio.len(), KEY, audio_pts)
            .unwrap();
    }
    muxer.finalize().unwrap();

    let written = muxer.session().sink().written();
    assert_eq!(written.len(), 6);
    for pair in written.windows(2) {
        assert_ne!(
            timestamp::compare(pair[0].dts, pair[0].time_base, pair[1].dts, pair[1].time_base),
            Ordering::Greater,
            "{:?} before {:?}",
            (pair[0].stream_index, pair[0].dts),
            (pair[1].stream_index, pair[1].dts)
        );
    }
    let video: Vec<i64> = written
        .iter()
        .filter(|p| p.stream_index == VIDEO_STREAM_INDEX)
        .map(|p| p.pts)
        .collect();
    let audio: Vec<i64> = written
        .iter()
        .filter(|p| p.stream_index == AUDIO_STREAM_INDEX)
        .map(|p| p.pts)
        .collect();
    assert_eq!(video, vec![0, 1, 2]);
    assert_eq!(audio, vec![0, 10, 20]);
}

#[test]
fn test_header_time_base_change_is_respected() {
    let mut muxer = LiveMuxer::prepare_with_sink(
        RecordingSink {
            header_time_base: Some(ffmpeg::Rational(1, 90000)),
            ..RecordingSink::new()
        },
        OutputTarget::Memory,
        MuxOptions::default(),
    )
    .unwrap();
    let frame = fixtures::h264_access_unit(true, 0);

    muxer.write_packet(&[], false, 0, 0, EOS, 0).unwrap();
    muxer
        .write_packet(&frame, true, 0, frame.len(), KEY, 1_000_000)
        .unwrap();

    let written = muxer.session().sink().written();
    assert_eq!(written.len(), 1);
    assert_eq!(written[0].pts, 90000);
    assert_eq!(written[0].time_base, ffmpeg::Rational(1, 90000));
    assert!(written[0].key);
}

#[test]
fn test_non_monotonic_unit_is_dropped() {
    let mut muxer = muxer(MuxOptions::default());
    let frame = fixtures::h264_access_unit(true, 0);

    muxer.write_packet(&frame, true, 0, frame.len(), KEY, 100_000).unwrap();
    let err = muxer
        .write_packet(&frame, true, 0, frame.len(), 0, 100_000)
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::PacketWrite);
    // rounds onto the same 1/30 tick as the previous frame
    assert!(muxer.write_packet(&frame, true, 0, frame.len(), 0, 110_000).is_err());
    muxer.write_packet(&frame, true, 0, frame.len(), 0, 133_333).unwrap();

    let stats = &muxer.stats().streams[VIDEO_STREAM_INDEX];
    assert_eq!(stats.packets, 2);
    assert_eq!(stats.dropped, 2);
    assert_eq!(muxer.state(), SessionState::HeaderWritten);
}

#[test]
fn test_rebase_timestamps() {
    let mut muxer = muxer(MuxOptions {
        rebase_timestamps: true,
        ..MuxOptions::default()
    });
    let frame = fixtures::h264_access_unit(true, 0);
    let audio = fixtures::adts_frame(16);
    let start = 3_600_000_000i64;

    muxer.write_packet(&frame, true, 0, frame.len(), KEY, start).unwrap();
    muxer
        .write_packet(&audio, false, 0, audio.len(), 0, start + 1_000_000)
        .unwrap();
    let err = muxer
        .write_packet(&audio, false, 0, audio.len(), 0, start - 1)
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::PacketWrite);
    muxer.finalize().unwrap();

    let written = muxer.session().sink().written();
    assert_eq!(written[0].stream_index, VIDEO_STREAM_INDEX);
    assert_eq!(written[0].pts, 0);
    assert_eq!(written[1].pts, 44100);
}

#[test]
fn test_codec_config_is_prepended_to_key_frames() {
    let mut muxer = muxer(MuxOptions::default());
    let config = fixtures::h264_parameter_sets();
    let idr = [0u8, 0, 0, 1, 0x65, 0x88, 0x84, 0x11];
    let inter = [0u8, 0, 0, 1, 0x41, 0x9a, 0x02, 0x12];

    muxer.write_packet(&[], false, 0, 0, EOS, 0).unwrap();
    muxer.write_packet(&config, true, 0, config.len(), CONFIG, 0).unwrap();
    muxer.write_packet(&idr, true, 0, idr.len(), KEY, 0).unwrap();
    muxer.write_packet(&inter, true, 0, inter.len(), 0, 33_333).unwrap();

    let written = muxer.session().sink().written();
    assert_eq!(written.len(), 2);
    assert!(written[0].data.starts_with(&config));
    assert!(written[0].data.ends_with(&idr));
    assert_eq!(written[1].data, inter.to_vec());
    // config units are not media packets
    assert_eq!(muxer.stats().streams[VIDEO_STREAM_INDEX].packets, 2);
}

#[test]
fn test_audio_codec_config_is_ignored() {
    let mut muxer = muxer(MuxOptions::default());
    let asc = [0x12u8, 0x08];
    muxer.write_packet(&asc, false, 0, asc.len(), CONFIG, 0).unwrap();
    muxer.finalize().unwrap();
    assert!(muxer.session().sink().written().is_empty());
}

#[test]
fn test_payload_window_and_empty_units() {
    let mut muxer = muxer(MuxOptions::default());
    let buffer = [0xaau8; 16];

    let err = muxer.write_packet(&buffer, true, 10, 10, KEY, 0).unwrap_err();
    assert_eq!(err.class(), ErrorClass::PacketWrite);
    let err = muxer
        .write_packet(&buffer, true, usize::MAX, 2, KEY, 0)
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::PacketWrite);
    let err = muxer.write_packet(&buffer, true, 4, 0, KEY, 0).unwrap_err();
    assert_eq!(err.class(), ErrorClass::PacketWrite);

    // end of stream without payload is accepted
    muxer.write_packet(&buffer, false, 0, 0, EOS, 0).unwrap();
    muxer.write_packet(&buffer, true, 4, 8, KEY, 0).unwrap();
    let written = muxer.session().sink().written();
    assert_eq!(written.len(), 1);
    assert_eq!(written[0].data, vec![0xaau8; 8]);
}

#[test]
fn test_sink_write_failure_leaves_session_open() {
    let mut muxer = LiveMuxer::prepare_with_sink(
        RecordingSink {
            fail_packets: true,
            ..RecordingSink::new()
        },
        OutputTarget::Memory,
        MuxOptions::default(),
    )
    .unwrap();
    let frame = fixtures::h264_access_unit(true, 0);

    muxer.write_packet(&[], false, 0, 0, EOS, 0).unwrap();
    let err = muxer
        .write_packet(&frame, true, 0, frame.len(), KEY, 0)
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::PacketWrite);
    assert_eq!(err.status(), Some(ffmpeg::Error::Other { errno: ffmpeg::error::EIO }));
    assert_eq!(muxer.state(), SessionState::HeaderWritten);
    assert!(muxer.finalize().is_ok());
}

#[test]
fn test_held_back_failure_is_charged_to_its_own_stream() {
    let mut muxer = muxer(MuxOptions::default());
    let frame = fixtures::h264_access_unit(true, 0);
    let audio = fixtures::adts_frame(16);

    // both frames wait for audio
    muxer.write_packet(&frame, true, 0, frame.len(), KEY, 0).unwrap();
    muxer.write_packet(&frame, true, 0, frame.len(), 0, 33_333).unwrap();
    assert_eq!(muxer.session().queued_packets(), 2);

    // the audio unit is accepted; the two video frames it releases are not
    muxer.session_mut().sink_mut().fail_packets = true;
    muxer
        .write_packet(&audio, false, 0, audio.len(), 0, 1_000_000)
        .unwrap();
    let video = &muxer.stats().streams[VIDEO_STREAM_INDEX];
    assert_eq!((video.packets, video.dropped, video.key_frames), (0, 2, 0));
    let sound = &muxer.stats().streams[AUDIO_STREAM_INDEX];
    assert_eq!((sound.packets, sound.dropped), (1, 0));

    // an earlier audio timestamp must not slip in behind the queued one
    muxer.session_mut().sink_mut().fail_packets = false;
    let err = muxer
        .write_packet(&audio, false, 0, audio.len(), 0, 500_000)
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::PacketWrite);
    assert_eq!(muxer.stats().streams[AUDIO_STREAM_INDEX].dropped, 1);

    muxer.finalize().unwrap();
    let written = muxer.session().sink().written();
    assert_eq!(written.len(), 1);
    assert_eq!(written[0].stream_index, AUDIO_STREAM_INDEX);
    assert_eq!(written[0].pts, 44100);
}

#[test]
fn test_flush_failures_are_counted_on_finalize() {
    let mut muxer = muxer(MuxOptions::default());
    let frame = fixtures::h264_access_unit(true, 0);

    muxer.write_packet(&frame, true, 0, frame.len(), KEY, 0).unwrap();
    muxer.session_mut().sink_mut().fail_packets = true;
    muxer.finalize().unwrap();

    let video = &muxer.stats().streams[VIDEO_STREAM_INDEX];
    assert_eq!((video.packets, video.dropped), (0, 1));
    assert_eq!(muxer.state(), SessionState::Finalized);
}

#[test]
fn test_prepare_rejects_invalid_options() {
    let result = LiveMuxer::prepare_with_sink(
        RecordingSink::new(),
        OutputTarget::Memory,
        MuxOptions {
            video_height: 0,
            ..MuxOptions::default()
        },
    );
    assert!(matches!(result, Err(MuxError::Config(_))));
}

#[test]
fn test_session_is_send() {
    fn assert_send<T: Send>() {}
    assert_send::<ContainerSession>();
    assert_send::<LiveMuxer>();
}
