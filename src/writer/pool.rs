//! Reusable payload buffers for packets the interleaver has to hold back

use bytes::BytesMut;

const INITIAL_CAPACITY: usize = 64 * 1024;
const MAX_POOLED: usize = 32;

/// Free list of `BytesMut` buffers.
///
/// Buffers keep their capacity between uses, so a steady-state session stops
/// allocating once every stream has seen its largest access unit.
#[derive(Debug, Default)]
pub struct BufferPool {
    free: Vec<BytesMut>,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy `data` into a pooled buffer.
    pub fn copy_from(&mut self, data: &[u8]) -> BytesMut {
        let mut buf = self
            .free
            .pop()
            .unwrap_or_else(|| BytesMut::with_capacity(INITIAL_CAPACITY.max(data.len())));
        buf.clear();
        buf.extend_from_slice(data);
        buf
    }

    /// Return a buffer to the pool.
    pub fn recycle(&mut self, buf: BytesMut) {
        if self.free.len() < MAX_POOLED {
            self.free.push(buf);
        }
    }

    pub fn available(&self) -> usize {
        self.free.len()
    }
}
