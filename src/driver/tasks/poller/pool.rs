use parking_lot::Mutex;
use std::{fmt, mem, sync::Arc};

/// Recycled frame buffers shared by a poller's producer and sender loops.
#[derive(Clone)]
pub(crate) struct BufferPool {
    free: Arc<Mutex<Vec<Vec<u8>>>>,
    buf_len: usize,
    max_free: usize,
}

impl BufferPool {
    pub(crate) fn new(buf_len: usize, max_free: usize) -> Self {
        Self {
            free: Arc::new(Mutex::new(Vec::with_capacity(max_free))),
            buf_len,
            max_free,
        }
    }

    /// Takes a buffer of `buf_len` bytes, allocating only when none are free.
    pub(crate) fn take(&self) -> Vec<u8> {
        self.free
            .lock()
            .pop()
            .unwrap_or_else(|| vec![0u8; self.buf_len])
    }

    /// Wraps the first `len` bytes of `buf` as a frame, which hands `buf` back on drop.
    pub(crate) fn frame(&self, buf: Vec<u8>, len: usize) -> AudioFrame {
        AudioFrame {
            len: len.min(buf.len()),
            buf,
            pool: self.clone(),
        }
    }

    #[cfg(test)]
    pub(crate) fn free_len(&self) -> usize {
        self.free.lock().len()
    }

    fn give(&self, buf: Vec<u8>) {
        let mut free = self.free.lock();
        if free.len() < self.max_free && buf.len() == self.buf_len {
            free.push(buf);
        }
    }
}

/// One encoded Opus packet, owned by the poller pipeline until it is sent.
pub(crate) struct AudioFrame {
    buf: Vec<u8>,
    len: usize,
    pool: BufferPool,
}

impl AudioFrame {
    pub(crate) fn payload(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

impl Drop for AudioFrame {
    fn drop(&mut self) {
        self.pool.give(mem::take(&mut self.buf));
    }
}

impl fmt::Debug for AudioFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioFrame").field("len", &self.len).finish()
    }
}
