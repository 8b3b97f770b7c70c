//! Timestamp conversion between time bases
//!
//! Encoders hand us presentation timestamps in microseconds; every output
//! stream has its own native time base (1/30 for 30 fps video, 1/44100 for
//! audio, 1/90000 once an MPEG-TS based muxer has written its header).

use crate::error::FfmpegError;
use ffmpeg_next as ffmpeg;
use std::cmp::Ordering;

/// Time base of the timestamps supplied by the caller (1 µs ticks).
pub const MICROSECONDS: ffmpeg::Rational = ffmpeg::Rational(1, 1_000_000);

fn check(tb: ffmpeg::Rational) -> Result<(i128, i128), FfmpegError> {
    let (num, den) = (tb.numerator(), tb.denominator());
    if num <= 0 || den <= 0 {
        return Err(FfmpegError::InvalidTimebase { num, den });
    }
    Ok((num as i128, den as i128))
}

/// Convert `ts` from time base `from` to time base `to`.
///
/// Computes `ts * from.num * to.den / (from.den * to.num)` with a 128-bit
/// intermediate and rounds to the nearest destination tick, halfway cases
/// away from zero (the same rounding as `av_rescale_q`).
pub fn rescale(
    ts: i64,
    from: ffmpeg::Rational,
    to: ffmpeg::Rational,
) -> Result<i64, crate::error::MuxError> {
    let (from_num, from_den) = check(from)?;
    let (to_num, to_den) = check(to)?;

    let num = ts as i128 * from_num * to_den;
    let den = from_den * to_num;

    let half = den / 2;
    let rounded = if num >= 0 {
        (num + half) / den
    } else {
        (num - half) / den
    };

    i64::try_from(rounded).map_err(|_| {
        crate::error::MuxError::InvalidTimestamp(format!(
            "{} rescaled from {}/{} to {}/{} overflows",
            ts,
            from.numerator(),
            from.denominator(),
            to.numerator(),
            to.denominator()
        ))
    })
}

/// Compare two timestamps expressed in different time bases, exactly.
///
/// Time bases are expected to be valid (positive); an invalid one compares
/// as if its timestamp were zero so callers on the hot path never fail.
pub fn compare(a: i64, tb_a: ffmpeg::Rational, b: i64, tb_b: ffmpeg::Rational) -> Ordering {
    let (an, ad) = check(tb_a).unwrap_or((0, 1));
    let (bn, bd) = check(tb_b).unwrap_or((0, 1));
    // a * an / ad  vs  b * bn / bd
    (a as i128 * an * bd).cmp(&(b as i128 * bn * ad))
}

/// Express `ts` in microseconds, saturating instead of failing.
pub fn to_micros(ts: i64, tb: ffmpeg::Rational) -> i64 {
    rescale(ts, tb, MICROSECONDS).unwrap_or(if ts < 0 { i64::MIN } else { i64::MAX })
}

#[cfg(test)]
mod tests {
    use super::*;

    const VIDEO_30: ffmpeg::Rational = ffmpeg::Rational(1, 30);
    const AUDIO_44K: ffmpeg::Rational = ffmpeg::Rational(1, 44100);
    const MPEGTS: ffmpeg::Rational = ffmpeg::Rational(1, 90000);

    #[test]
    fn test_rescale_zero() {
        for tb in [VIDEO_30, AUDIO_44K, MPEGTS, ffmpeg::Rational(1001, 30000)] {
            assert_eq!(rescale(0, MICROSECONDS, tb).unwrap(), 0);
        }
    }

    #[test]
    fn test_rescale_one_video_frame() {
        assert_eq!(rescale(33333, MICROSECONDS, VIDEO_30).unwrap(), 1);
        assert_eq!(rescale(66667, MICROSECONDS, VIDEO_30).unwrap(), 2);
    }

    #[test]
    fn test_rescale_one_second_of_audio() {
        assert_eq!(rescale(1_000_000, MICROSECONDS, AUDIO_44K).unwrap(), 44100);
    }

    #[test]
    fn test_rescale_rounds_half_away_from_zero() {
        // 1/60 s is exactly half a tick at 1/30
        assert_eq!(rescale(1, ffmpeg::Rational(1, 60), VIDEO_30).unwrap(), 1);
        assert_eq!(rescale(-1, ffmpeg::Rational(1, 60), VIDEO_30).unwrap(), -1);
        assert_eq!(rescale(16_666, MICROSECONDS, VIDEO_30).unwrap(), 0);
    }

    #[test]
    fn test_rescale_is_linear_within_one_tick() {
        let t = 123_457;
        let base = rescale(t, MICROSECONDS, AUDIO_44K).unwrap();
        for k in 1..50i64 {
            let scaled = rescale(k * t, MICROSECONDS, AUDIO_44K).unwrap();
            assert!(
                (scaled - k * base).abs() <= k,
                "k={} scaled={} k*base={}",
                k,
                scaled,
                k * base
            );
        }
    }

    #[test]
    fn test_rescale_long_sessions_do_not_overflow() {
        // 12 hours at microsecond resolution into a 90 kHz clock
        let twelve_hours = 12 * 3600 * 1_000_000i64;
        assert_eq!(
            rescale(twelve_hours, MICROSECONDS, MPEGTS).unwrap(),
            12 * 3600 * 90000
        );
        // raw monotonic-clock style values (days of uptime)
        let uptime = 9 * 24 * 3600 * 1_000_000i64;
        assert_eq!(rescale(uptime, MICROSECONDS, AUDIO_44K).unwrap(), 9 * 24 * 3600 * 44100);
    }

    #[test]
    fn test_rescale_matches_av_rescale_q() {
        for ts in [0i64, 1, 33333, 1_000_000, 987_654_321, -42] {
            for tb in [VIDEO_30, AUDIO_44K, MPEGTS] {
                let ours = rescale(ts, MICROSECONDS, tb).unwrap();
                let theirs = unsafe { ffmpeg::ffi::av_rescale_q(ts, MICROSECONDS.into(), tb.into()) };
                assert_eq!(ours, theirs, "ts={} tb={}", ts, tb);
            }
        }
    }

    #[test]
    fn test_rescale_rejects_invalid_time_base() {
        assert!(rescale(10, MICROSECONDS, ffmpeg::Rational(1, 0)).is_err());
        assert!(rescale(10, ffmpeg::Rational(0, 1), VIDEO_30).is_err());
    }

    #[test]
    fn test_rescale_overflow_is_an_error() {
        assert!(rescale(i64::MAX, ffmpeg::Rational(1, 1), MICROSECONDS).is_err());
    }

    #[test]
    fn test_compare_across_time_bases() {
        assert_eq!(compare(1, VIDEO_30, 1470, AUDIO_44K), Ordering::Equal);
        assert_eq!(compare(1, VIDEO_30, 20, AUDIO_44K), Ordering::Greater);
        assert_eq!(compare(0, VIDEO_30, 0, AUDIO_44K), Ordering::Equal);
        assert_eq!(compare(3000, MPEGTS, 2, VIDEO_30), Ordering::Less);
    }

    #[test]
    fn test_to_micros() {
        assert_eq!(to_micros(44100, AUDIO_44K), 1_000_000);
        assert_eq!(to_micros(3, VIDEO_30), 100_000);
    }
}
