//! Safe wrappers around FFmpeg FFI calls.
//!
//! Every function in this module is `pub` and **safe** to call.  All `unsafe`
//! blocks are contained here with explicit safety arguments.  Callers outside
//! this module should never need to write `unsafe` for routine FFmpeg access.

use crate::error::FfmpegError;
use ffmpeg_next as ffmpeg;
use std::ffi::CStr;
use std::ptr;

// ── Output context lifecycle ────────────────────────────────────────────────

/// Allocate an output context for `format_name` targeting `filename`,
/// without opening any I/O.
///
/// `ffmpeg::format::output_as` always calls `avio_open`, which is wrong for
/// formats that manage their own files (hls, segment) and for custom AVIO.
pub fn alloc_output(
    format_name: &CStr,
    filename: &CStr,
) -> Result<ffmpeg::format::context::Output, ffmpeg::Error> {
    let mut ctx: *mut ffmpeg::ffi::AVFormatContext = ptr::null_mut();
    // SAFETY: both strings are valid NUL-terminated C strings for the
    // duration of the call; on success FFmpeg hands us ownership of `ctx`,
    // which `Output::wrap` takes over (freed with avformat_free_context).
    unsafe {
        let ret = ffmpeg::ffi::avformat_alloc_output_context2(
            &mut ctx,
            ptr::null_mut(),
            format_name.as_ptr(),
            filename.as_ptr(),
        );
        if ret < 0 {
            return Err(ffmpeg::Error::from(ret));
        }
        if ctx.is_null() {
            return Err(ffmpeg::Error::MuxerNotFound);
        }
        Ok(ffmpeg::format::context::Output::wrap(ctx))
    }
}

/// Whether the output format writes through `pb` (i.e. lacks `AVFMT_NOFILE`).
pub fn output_requires_file(output: &ffmpeg::format::context::Output) -> bool {
    // SAFETY: an allocated output context always carries a valid `oformat`.
    unsafe {
        let ctx = output.as_ptr();
        let oformat = (*ctx).oformat;
        !oformat.is_null() && ((*oformat).flags & ffmpeg::ffi::AVFMT_NOFILE as i32) == 0
    }
}

/// Whether an AVIO context is already attached to the output.
pub fn output_has_io(output: &ffmpeg::format::context::Output) -> bool {
    // SAFETY: reading a pointer field of a live context.
    unsafe { !(*output.as_ptr()).pb.is_null() }
}

/// Open `url` for writing and attach it as the output's `pb`.
///
/// The handle is closed by `Output`'s destructor (`avio_close`).
pub fn output_open_file(
    output: &mut ffmpeg::format::context::Output,
    url: &CStr,
) -> Result<(), ffmpeg::Error> {
    // SAFETY: `pb` is a field of a live context; avio_open only writes it
    // on success.
    unsafe {
        let ctx = output.as_mut_ptr();
        let ret = ffmpeg::ffi::avio_open(&mut (*ctx).pb, url.as_ptr(), ffmpeg::ffi::AVIO_FLAG_WRITE as i32);
        if ret < 0 {
            return Err(ffmpeg::Error::from(ret));
        }
    }
    Ok(())
}

/// Detach the `AVIOContext` (`pb`) from an `AVFormatContext` by setting it to
/// null, preventing the `Output` destructor from closing it.
///
/// Call this before dropping an `Output` whose `pb` is owned elsewhere
/// (e.g. a `MemoryIo`).
pub fn detach_avio(output: &mut ffmpeg::format::context::Output) {
    // SAFETY: `output.as_mut_ptr()` is valid for the lifetime of `output`.
    unsafe {
        let ctx = output.as_mut_ptr();
        if !ctx.is_null() && !(*ctx).pb.is_null() {
            (*ctx).pb = ptr::null_mut();
        }
    }
}

// ── Stream codec parameters ─────────────────────────────────────────────────

/// Fill in the codec parameters of a passthrough video stream.
pub fn stream_set_video_params(
    stream: &mut ffmpeg::format::stream::StreamMut,
    codec_id: ffmpeg::codec::Id,
    pixel_format: ffmpeg::format::Pixel,
    width: u32,
    height: u32,
    bit_rate: Option<u64>,
) {
    // SAFETY: `codecpar` is allocated by avformat_new_stream and lives as
    // long as the stream.  All written fields are plain scalars.
    unsafe {
        let par = (*stream.as_mut_ptr()).codecpar;
        (*par).codec_type = ffmpeg::ffi::AVMediaType::AVMEDIA_TYPE_VIDEO;
        (*par).codec_id = codec_id.into();
        (*par).codec_tag = 0;
        (*par).format = ffmpeg::ffi::AVPixelFormat::from(pixel_format) as i32;
        (*par).width = width as i32;
        (*par).height = height as i32;
        if let Some(rate) = bit_rate {
            (*par).bit_rate = rate as i64;
        }
    }
}

/// Fill in the codec parameters of a passthrough audio stream.
pub fn stream_set_audio_params(
    stream: &mut ffmpeg::format::stream::StreamMut,
    codec_id: ffmpeg::codec::Id,
    sample_format: ffmpeg::format::Sample,
    sample_rate: u32,
    channels: u16,
    bit_rate: Option<u64>,
) {
    // SAFETY: as for `stream_set_video_params`; `ch_layout` is reset with
    // av_channel_layout_uninit before being re-initialised.
    unsafe {
        let par = (*stream.as_mut_ptr()).codecpar;
        (*par).codec_type = ffmpeg::ffi::AVMediaType::AVMEDIA_TYPE_AUDIO;
        (*par).codec_id = codec_id.into();
        (*par).codec_tag = 0;
        (*par).format = ffmpeg::ffi::AVSampleFormat::from(sample_format) as i32;
        (*par).sample_rate = sample_rate as i32;
        ffmpeg::ffi::av_channel_layout_uninit(&mut (*par).ch_layout);
        ffmpeg::ffi::av_channel_layout_default(&mut (*par).ch_layout, channels as i32);
        if let Some(rate) = bit_rate {
            (*par).bit_rate = rate as i64;
        }
    }
}

/// Copy codec extradata (SPS/PPS, AudioSpecificConfig) into the stream.
pub fn stream_set_extradata(
    stream: &mut ffmpeg::format::stream::StreamMut,
    extradata: &[u8],
) -> Result<(), FfmpegError> {
    let padding = ffmpeg::ffi::AV_INPUT_BUFFER_PADDING_SIZE as usize;
    // SAFETY: the buffer is allocated with av_mallocz (as FFmpeg requires
    // for extradata, which it frees itself) and sized for the copy plus the
    // mandatory zeroed padding.
    unsafe {
        let par = (*stream.as_mut_ptr()).codecpar;
        let buf = ffmpeg::ffi::av_mallocz(extradata.len() + padding) as *mut u8;
        if buf.is_null() {
            return Err(FfmpegError::Alloc(format!(
                "{} bytes of extradata",
                extradata.len()
            )));
        }
        ptr::copy_nonoverlapping(extradata.as_ptr(), buf, extradata.len());
        if !(*par).extradata.is_null() {
            ffmpeg::ffi::av_free((*par).extradata as *mut std::ffi::c_void);
        }
        (*par).extradata = buf;
        (*par).extradata_size = extradata.len() as i32;
    }
    Ok(())
}

// ── Borrowed packet payloads ────────────────────────────────────────────────

/// Point a scratch packet at a borrowed payload without copying it.
///
/// The packet has no `buf`, so FFmpeg treats the data as non-refcounted and
/// copies it if it needs to keep it past the write call.  The caller must
/// invoke [`packet_detach_data`] before `data` goes out of scope.
pub fn packet_attach_data(packet: &mut ffmpeg::Packet, data: &[u8]) {
    // SAFETY: only the data/size fields are written; `buf` stays null so no
    // one ever frees the caller's memory.
    unsafe {
        let pkt = packet.as_mut_ptr();
        (*pkt).buf = ptr::null_mut();
        (*pkt).data = data.as_ptr() as *mut u8;
        (*pkt).size = data.len() as i32;
    }
}

/// Clear a payload attached with [`packet_attach_data`] and reset the
/// per-packet fields so the scratch packet can be reused.
pub fn packet_detach_data(packet: &mut ffmpeg::Packet) {
    // SAFETY: `buf` is null, so unref only drops side data and resets the
    // remaining fields; data/size are cleared explicitly afterwards.
    unsafe {
        let pkt = packet.as_mut_ptr();
        (*pkt).data = ptr::null_mut();
        (*pkt).size = 0;
        ffmpeg::ffi::av_packet_unref(pkt);
    }
}
