//! Custom AVIOContext for in-memory writing
//!
//! Lets a session mux into a `Vec<u8>` instead of a file, for single-file
//! formats (mpegts, fragmented mp4, flv) handed to a network sender.
//!
//! # Thread safety
//! `MemoryWriter` is not thread-safe. It belongs to exactly one session,
//! and FFmpeg only calls back into it from inside that session's write calls.
//! A plain `Vec<u8>` is used rather than `Arc<Mutex<Vec>>`: FFmpeg can call
//! `seek_packet` from within `write_packet` (e.g. during `write_trailer`),
//! and `std::sync::Mutex` is not reentrant.

use crate::error::FfmpegError;
use ffmpeg_next as ffmpeg;
use std::ffi::c_void;
use std::io::{Seek, SeekFrom, Write};

const AVIO_BUFFER_SIZE: usize = 4096;
const AVSEEK_SIZE: i32 = 0x10000;

/// Seekable in-memory byte sink.
///
/// Positions are absolute offsets into the whole output. Bytes handed out
/// with [`take`](Self::take) are gone from the buffer; `base` is the offset
/// of the first byte still held, and writing below it is an error.
pub struct MemoryWriter {
    buffer: Vec<u8>,
    base: u64,
    position: u64,
}

impl MemoryWriter {
    /// Create a new memory writer
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(AVIO_BUFFER_SIZE),
            base: 0,
            position: 0,
        }
    }

    /// Bytes written since the last `take`
    pub fn data(&self) -> &[u8] {
        &self.buffer
    }

    /// Size of the whole output, including bytes already taken
    pub fn total_len(&self) -> u64 {
        self.base + self.buffer.len() as u64
    }

    /// Take the bytes held so far. Offsets keep counting from where the
    /// taken bytes ended.
    pub fn take(&mut self) -> Vec<u8> {
        self.base += self.buffer.len() as u64;
        std::mem::take(&mut self.buffer)
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.position < self.base {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!(
                    "write at {} rewrites bytes already taken (up to {})",
                    self.position, self.base
                ),
            ));
        }
        let pos = (self.position - self.base) as usize;
        let end = pos + buf.len();

        if end > self.buffer.len() {
            self.buffer.resize(end, 0);
        }

        self.buffer[pos..end].copy_from_slice(buf);
        self.position += buf.len() as u64;

        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Seek for MemoryWriter {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let new_pos = match pos {
            SeekFrom::Start(p) => p as i64,
            SeekFrom::Current(p) => self.position as i64 + p,
            SeekFrom::End(p) => self.total_len() as i64 + p,
        };
        if new_pos < 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "seek before start of buffer",
            ));
        }

        self.position = new_pos as u64;
        Ok(self.position)
    }
}

impl Default for MemoryWriter {
    fn default() -> Self {
        Self::new()
    }
}

// C-compatible callbacks for FFmpeg

unsafe extern "C" fn write_packet(opaque: *mut c_void, buf: *const u8, buf_size: i32) -> i32 {
    let writer = &mut *(opaque as *mut MemoryWriter);
    let slice = std::slice::from_raw_parts(buf, buf_size as usize);
    match writer.write(slice) {
        Ok(n) => n as i32,
        Err(_) => ffmpeg::Error::Other {
            errno: ffmpeg::error::EIO,
        }
        .into(),
    }
}

unsafe extern "C" fn seek_packet(opaque: *mut c_void, offset: i64, whence: i32) -> i64 {
    let writer = &mut *(opaque as *mut MemoryWriter);

    if whence & AVSEEK_SIZE != 0 {
        return writer.total_len() as i64;
    }

    let seek_from = match whence & 0xffff {
        0 => SeekFrom::Start(offset as u64),
        1 => SeekFrom::Current(offset),
        2 => SeekFrom::End(offset),
        _ => return -1,
    };
    match writer.seek(seek_from) {
        Ok(pos) => pos as i64,
        Err(_) => -1,
    }
}

/// An AVIO context writing into a boxed [`MemoryWriter`].
///
/// The writer outlives the AVIO context so the muxed bytes stay readable
/// after the session has been finalized.
pub struct MemoryIo {
    avio: *mut ffmpeg::ffi::AVIOContext,
    writer: Box<MemoryWriter>,
}

impl MemoryIo {
    /// Allocate an AVIO context and install it as the output's `pb`.
    pub fn attach(output: &mut ffmpeg::format::context::Output) -> Result<Self, FfmpegError> {
        let mut writer = Box::new(MemoryWriter::new());
        let opaque = &mut *writer as *mut MemoryWriter as *mut c_void;

        // SAFETY: the buffer is allocated with av_malloc as avio requires and
        // handed to the AVIO context, which may reallocate it; it is freed
        // through `(*avio).buffer` in `release`.  `opaque` points into the
        // heap allocation of `writer`, which never moves and outlives `avio`.
        unsafe {
            let buffer = ffmpeg::ffi::av_malloc(AVIO_BUFFER_SIZE) as *mut u8;
            if buffer.is_null() {
                return Err(FfmpegError::Alloc("AVIO buffer".to_string()));
            }

            let avio = ffmpeg::ffi::avio_alloc_context(
                buffer,
                AVIO_BUFFER_SIZE as i32,
                1,
                opaque,
                None,
                Some(write_packet),
                Some(seek_packet),
            );
            if avio.is_null() {
                ffmpeg::ffi::av_free(buffer as *mut c_void);
                return Err(FfmpegError::Alloc("AVIO context".to_string()));
            }

            let ctx = output.as_mut_ptr();
            (*ctx).pb = avio;
            (*ctx).flags |= ffmpeg::ffi::AVFMT_FLAG_CUSTOM_IO as i32;

            Ok(Self { avio, writer })
        }
    }

    /// Flush buffered AVIO bytes into the writer.
    pub fn flush(&mut self) {
        if !self.avio.is_null() {
            // SAFETY: `avio` is live until `release`.
            unsafe { ffmpeg::ffi::avio_flush(self.avio) };
        }
    }

    /// Free the AVIO context. The owning `Output` must already have been
    /// detached from it (`helpers::detach_avio`). Idempotent.
    pub fn release(&mut self) {
        if self.avio.is_null() {
            return;
        }
        // SAFETY: the context was allocated by avio_alloc_context and is no
        // longer referenced by any format context.
        unsafe {
            ffmpeg::ffi::avio_flush(self.avio);
            ffmpeg::ffi::av_freep(&mut (*self.avio).buffer as *mut *mut u8 as *mut c_void);
            ffmpeg::ffi::avio_context_free(&mut self.avio);
        }
        self.avio = std::ptr::null_mut();
    }

    /// Hand out the bytes written so far.
    ///
    /// Muxers can no longer go back and patch those bytes, so the context is
    /// marked unseekable from here on; muxers that rewrite their header at
    /// the trailer (flv) then skip the rewrite.
    pub fn take(&mut self) -> Vec<u8> {
        self.flush();
        if !self.avio.is_null() {
            // SAFETY: `avio` is live until `release`; `seekable` is a plain
            // flags field muxers read before seeking back.
            unsafe { (*self.avio).seekable = 0 };
        }
        self.writer.take()
    }

    pub fn writer(&self) -> &MemoryWriter {
        &self.writer
    }

    pub fn writer_mut(&mut self) -> &mut MemoryWriter {
        &mut self.writer
    }
}

// SAFETY: the AVIO context and the writer are owned exclusively by this value
// and only touched through `&mut self` or from FFmpeg calls made by the
// session that owns it, so moving it to another thread is sound.
unsafe impl Send for MemoryIo {}

impl Drop for MemoryIo {
    fn drop(&mut self) {
        self.release();
    }
}
