//! Replay of recorded elementary streams
//!
//! Splits an H.264 Annex B byte stream into access units and an ADTS file
//! into AAC frames, then feeds both through a [`LiveMuxer`] in presentation
//! order, as a live encoder would.

use crate::api::LiveMuxer;
use crate::config::{AudioCodec, MuxOptions, VideoCodec};
use crate::error::{MuxError, Result};
use crate::session::MuxSink;
use crate::stream::StreamKind;
use crate::writer::{PacketFlags, SessionStats};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const ADTS_HEADER_LEN: usize = 7;
const AAC_SAMPLES_PER_BLOCK: i64 = 1024;
const ADTS_SAMPLE_RATES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

/// One access unit read from a recording.
#[derive(Debug, Clone)]
pub struct RecordedUnit {
    pub kind: StreamKind,
    pub data: Vec<u8>,
    pub flags: PacketFlags,
    pub pts_micros: i64,
}

/// Stream parameters found in an ADTS header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AdtsInfo {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Positions of NAL units: (start of start code, start of NAL header).
fn nal_positions(data: &[u8]) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    let mut i = 0;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            let start = if i > 0 && data[i - 1] == 0 { i - 1 } else { i };
            out.push((start, i + 3));
            i += 3;
        } else {
            i += 1;
        }
    }
    out
}

/// Split an H.264 Annex B stream into access units timed at `frame_rate`.
///
/// A unit ends before an access unit delimiter, SEI or parameter set that
/// follows a slice, or before a slice whose `first_mb_in_slice` is zero.
/// Parameter sets before the first slice travel with it.
pub fn split_annexb(data: &[u8], frame_rate: u32) -> Vec<RecordedUnit> {
    let positions = nal_positions(data);
    let mut units = Vec::new();
    let mut current: Vec<u8> = Vec::new();
    let mut has_slice = false;
    let mut key = false;

    let finish = |current: &mut Vec<u8>, key: bool, units: &mut Vec<RecordedUnit>| {
        let n = units.len() as i64;
        units.push(RecordedUnit {
            kind: StreamKind::Video,
            data: std::mem::take(current),
            flags: if key {
                PacketFlags::KEY_FRAME
            } else {
                PacketFlags::NONE
            },
            pts_micros: n * 1_000_000 / frame_rate.max(1) as i64,
        });
    };

    for (k, &(start, header)) in positions.iter().enumerate() {
        let end = positions.get(k + 1).map(|p| p.0).unwrap_or(data.len());
        if header >= end {
            continue;
        }
        let nal_type = data[header] & 0x1f;
        let is_slice = (1..=5).contains(&nal_type);
        let first_slice = is_slice && header + 1 < end && data[header + 1] & 0x80 != 0;

        if has_slice && ((6..=9).contains(&nal_type) || first_slice) {
            finish(&mut current, key, &mut units);
            has_slice = false;
            key = false;
        }

        current.extend_from_slice(&data[start..end]);
        has_slice |= is_slice;
        key |= nal_type == 5;
    }
    if has_slice {
        finish(&mut current, key, &mut units);
    }
    units
}

/// Split an ADTS stream into AAC frames, timed by their sample counts.
///
/// Stops at the first damaged header.
pub fn split_adts(data: &[u8]) -> Result<(Vec<RecordedUnit>, AdtsInfo)> {
    let mut units = Vec::new();
    let mut info = None;
    let mut samples: i64 = 0;
    let mut pos = 0;

    while pos + ADTS_HEADER_LEN <= data.len() {
        let header = &data[pos..pos + ADTS_HEADER_LEN];
        if header[0] != 0xff || header[1] & 0xf0 != 0xf0 {
            tracing::warn!("Lost ADTS sync at byte {}, stopping", pos);
            break;
        }
        let rate_index = ((header[2] >> 2) & 0x0f) as usize;
        let channels = (((header[2] & 0x01) << 2) | (header[3] >> 6)) as u16;
        let frame_len = (((header[3] & 0x03) as usize) << 11)
            | ((header[4] as usize) << 3)
            | ((header[5] as usize) >> 5);
        let blocks = (header[6] & 0x03) as i64 + 1;

        let sample_rate = *ADTS_SAMPLE_RATES.get(rate_index).ok_or_else(|| {
            MuxError::InvalidPayload(format!("bad ADTS sample rate index {}", rate_index))
        })?;
        if frame_len < ADTS_HEADER_LEN || pos + frame_len > data.len() {
            tracing::warn!("Truncated ADTS frame at byte {}, stopping", pos);
            break;
        }
        let stream_info = *info.get_or_insert(AdtsInfo {
            sample_rate,
            channels,
        });

        units.push(RecordedUnit {
            kind: StreamKind::Audio,
            data: data[pos..pos + frame_len].to_vec(),
            flags: PacketFlags::KEY_FRAME,
            pts_micros: samples * 1_000_000 / stream_info.sample_rate as i64,
        });
        samples += blocks * AAC_SAMPLES_PER_BLOCK;
        pos += frame_len;
    }

    let info = info.ok_or_else(|| MuxError::InvalidPayload("no ADTS frames found".to_string()))?;
    Ok((units, info))
}

/// Merge two timed unit lists into presentation order; video first on ties.
pub fn merge(video: Vec<RecordedUnit>, audio: Vec<RecordedUnit>) -> Vec<RecordedUnit> {
    let mut all: Vec<RecordedUnit> = video.into_iter().chain(audio).collect();
    all.sort_by_key(|u| (u.pts_micros, u.kind == StreamKind::Audio));
    all
}

/// Inputs for a replay run
#[derive(Debug, Clone, Default)]
pub struct ReplayInputs {
    pub video: Option<PathBuf>,
    pub audio: Option<PathBuf>,
    /// Pace writes to the presentation timestamps
    pub realtime: bool,
}

/// Outcome of a replay run
#[derive(Debug, Clone, Serialize)]
pub struct ReplaySummary {
    pub session_id: String,
    pub output: String,
    pub format: String,
    pub video_units: usize,
    pub audio_units: usize,
    pub rejected_units: usize,
    pub audio: Option<AdtsInfo>,
    pub elapsed_ms: u128,
    pub stats: SessionStats,
}

/// Load the recordings named by `inputs`, adjusting `options` to what they
/// contain.
pub fn load(inputs: &ReplayInputs, options: &mut MuxOptions) -> Result<(Vec<RecordedUnit>, Option<AdtsInfo>)> {
    if inputs.video.is_none() && inputs.audio.is_none() {
        return Err(MuxError::Config("nothing to replay".to_string()));
    }

    let video = match &inputs.video {
        Some(path) => {
            if options.video_codec != VideoCodec::H264 {
                return Err(MuxError::Config(format!(
                    "replay reads H.264 Annex B only, not {:?}",
                    options.video_codec
                )));
            }
            let units = split_annexb(&read(path)?, options.video_frame_rate);
            tracing::info!("{}: {} video access units", path.display(), units.len());
            units
        }
        None => Vec::new(),
    };

    let (audio, adts) = match &inputs.audio {
        Some(path) => {
            if options.audio_codec != AudioCodec::Aac {
                return Err(MuxError::Config(format!(
                    "replay reads ADTS AAC only, not {:?}",
                    options.audio_codec
                )));
            }
            let (units, info) = split_adts(&read(path)?)?;
            if info.sample_rate != options.audio_sample_rate
                || info.channels != options.audio_channel_count
            {
                tracing::info!(
                    "Using {}Hz/{}ch from {} instead of configured {}Hz/{}ch",
                    info.sample_rate,
                    info.channels,
                    path.display(),
                    options.audio_sample_rate,
                    options.audio_channel_count
                );
                options.audio_sample_rate = info.sample_rate;
                options.audio_channel_count = info.channels;
            }
            tracing::info!("{}: {} AAC frames", path.display(), units.len());
            (units, Some(info))
        }
        None => (Vec::new(), None),
    };

    Ok((merge(video, audio), adts))
}

fn read(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| {
        MuxError::Io(std::io::Error::new(
            e.kind(),
            format!("{}: {}", path.display(), e),
        ))
    })
}

/// Drive `muxer` with `units`. Streams without any units are ended up
/// front so they do not hold the interleaver back.
pub fn run<S: MuxSink>(
    muxer: &mut LiveMuxer<S>,
    units: &[RecordedUnit],
    realtime: bool,
) -> Result<usize> {
    for (kind, is_video) in [(StreamKind::Video, true), (StreamKind::Audio, false)] {
        if !units.iter().any(|u| u.kind == kind) {
            muxer.write_packet(&[], is_video, 0, 0, PacketFlags::END_OF_STREAM.bits(), 0)?;
        }
    }

    let started = Instant::now();
    let first_pts = units.first().map(|u| u.pts_micros).unwrap_or(0);
    let mut rejected = 0;
    for unit in units {
        if realtime {
            let due = Duration::from_micros((unit.pts_micros - first_pts).max(0) as u64);
            if let Some(wait) = due.checked_sub(started.elapsed()) {
                std::thread::sleep(wait);
            }
        }
        let is_video = unit.kind == StreamKind::Video;
        if muxer
            .write_packet(&unit.data, is_video, 0, unit.data.len(), unit.flags.bits(), unit.pts_micros)
            .is_err()
        {
            rejected += 1;
        }
    }
    Ok(rejected)
}

/// Replay `inputs` into `output` and finalize the session.
pub fn replay(output: &Path, mut options: MuxOptions, inputs: &ReplayInputs) -> Result<ReplaySummary> {
    let (units, audio) = load(inputs, &mut options)?;
    let started = Instant::now();

    let mut muxer = LiveMuxer::prepare(output, options.clone())?;
    let rejected = run(&mut muxer, &units, inputs.realtime)?;
    muxer.finalize()?;

    Ok(ReplaySummary {
        session_id: muxer.session_id().to_string(),
        output: output.display().to_string(),
        format: options.format,
        video_units: units.iter().filter(|u| u.kind == StreamKind::Video).count(),
        audio_units: units.iter().filter(|u| u.kind == StreamKind::Audio).count(),
        rejected_units: rejected,
        audio,
        elapsed_ms: started.elapsed().as_millis(),
        stats: muxer.stats().clone(),
    })
}
