//! FFmpeg glue
//!
//! Library setup and log forwarding live here; raw field access the safe
//! bindings do not expose is in `helpers`, the in-memory AVIOContext in `io`.

pub mod helpers;
pub mod io;

pub use ffmpeg_next as ffmpeg;

/// Initialize the FFmpeg library.
///
/// Safe to call more than once; `LiveMuxer::prepare` calls it for callers
/// that did not.
pub fn init() -> Result<(), crate::error::FfmpegError> {
    ffmpeg::init()
        .map_err(|e| crate::error::FfmpegError::InitFailed(format!("libav init: {}", e)))?;

    tracing::debug!("FFmpeg initialized");

    Ok(())
}

/// Route FFmpeg's log output through `tracing`, dropping known-noisy lines.
///
/// **Safety & Ordering:** Must be called after `init()` and before any
/// session is created on another thread, because altering the global log
/// callback is not thread-safe.
pub fn install_log_filter() {
    // SAFETY: both functions modify global FFmpeg state and are safe to call
    // after `ffmpeg::init()`.  Called once at startup.
    unsafe {
        ffmpeg_next::ffi::av_log_set_level(ffmpeg_next::ffi::AV_LOG_INFO as i32);
        ffmpeg_next::ffi::av_log_set_callback(Some(ffmpeg_log_callback));
    }
}

/// Messages that are expected when muxing pre-encoded live input.
const SUPPRESSED_MESSAGES: &[&str] = &[
    "Opening '",
    "Encoder did not produce proper pts, making some up",
    "Timestamps are unset in a packet",
];

unsafe extern "C" fn ffmpeg_log_callback(
    avcl: *mut std::ffi::c_void,
    level: std::ffi::c_int,
    fmt: *const std::ffi::c_char,
    vl: ffmpeg_next::ffi::va_list,
) {
    use std::ffi::CStr;

    if level > unsafe { ffmpeg_next::ffi::av_log_get_level() } {
        return;
    }

    let mut buf = [0 as std::ffi::c_char; 1024];
    let mut print_prefix: std::ffi::c_int = 1;
    ffmpeg_next::ffi::av_log_format_line(
        avcl,
        level,
        fmt,
        vl,
        buf.as_mut_ptr(),
        buf.len() as std::ffi::c_int,
        &mut print_prefix,
    );

    let msg = CStr::from_ptr(buf.as_ptr()).to_string_lossy();
    let msg = msg.trim_end();
    if msg.is_empty() || SUPPRESSED_MESSAGES.iter().any(|s| msg.contains(s)) {
        return;
    }

    if level <= ffmpeg_next::ffi::AV_LOG_ERROR as std::ffi::c_int {
        tracing::error!(target: "ffmpeg", "{}", msg);
    } else if level <= ffmpeg_next::ffi::AV_LOG_WARNING as std::ffi::c_int {
        tracing::warn!(target: "ffmpeg", "{}", msg);
    } else if level <= ffmpeg_next::ffi::AV_LOG_INFO as std::ffi::c_int {
        tracing::debug!(target: "ffmpeg", "{}", msg);
    } else {
        tracing::trace!(target: "ffmpeg", "{}", msg);
    }
}

/// Get the version information of the linked libavformat.
pub fn version_info() -> String {
    // SAFETY: avformat_version only reads a compile-time constant.
    let v = unsafe { ffmpeg_next::ffi::avformat_version() };
    format!("libavformat {}.{}.{}", v >> 16, (v >> 8) & 0xff, v & 0xff)
}
