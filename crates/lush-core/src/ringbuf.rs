//! Circular byte buffer holding the scrollback of an output stream.
//!
//! Stores the last N bytes written to a stream so that a newly attached
//! observer can be sent recent history without the core keeping unbounded
//! output around.

use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard};

/// A fixed-capacity circular byte buffer.
///
/// Not synchronized; see [`Scrollback`] for the shared, locked variant.
#[derive(Debug, Clone)]
pub struct RingBuffer {
    buf: Vec<u8>,
    /// Next write position; also one past the newest byte.
    head: usize,
    /// Total bytes ever written (saturates at capacity after a resize).
    seen: u64,
}

impl RingBuffer {
    /// Create a new ring buffer with the given capacity in bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity],
            head: 0,
            seen: 0,
        }
    }

    /// Capacity in bytes.
    pub fn size(&self) -> usize {
        self.buf.len()
    }

    /// Number of valid bytes currently stored.
    pub fn len(&self) -> usize {
        self.seen.min(self.buf.len() as u64) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reallocate to `capacity`, keeping the most recent bytes that still fit.
    pub fn resize(&mut self, capacity: usize) {
        let mut buf = vec![0u8; capacity];
        let n = self.last(&mut buf);
        self.head = if capacity > 0 { n % capacity } else { 0 };
        self.seen = n as u64;
        self.buf = buf;
    }

    /// Fill `out` with the most recently written bytes, oldest first.
    ///
    /// Copies `min(out.len(), capacity, bytes seen)` bytes and returns that
    /// count. Does not modify the buffer: two calls without an intervening
    /// write yield the same result.
    pub fn last(&self, out: &mut [u8]) -> usize {
        let want = out.len().min(self.len());
        if want <= self.head {
            out[..want].copy_from_slice(&self.buf[self.head - want..self.head]);
            return want;
        }
        // Wrapped: tail of the backing array first, then the front up to head.
        let tail = want - self.head;
        let start = self.buf.len() - tail;
        out[..tail].copy_from_slice(&self.buf[start..]);
        out[tail..want].copy_from_slice(&self.buf[..self.head]);
        want
    }

    /// All buffered bytes, oldest first.
    pub fn contents(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.len()];
        let n = self.last(&mut out);
        out.truncate(n);
        out
    }

    /// Append `data`, overwriting the oldest bytes when full.
    ///
    /// Never fails and always reports the full input length as consumed, even
    /// when `data` is larger than the buffer and only its tail is kept.
    pub fn write(&mut self, data: &[u8]) -> usize {
        let n = data.len();
        self.seen += n as u64;
        let cap = self.buf.len();
        if cap == 0 {
            return n;
        }
        let data = if n > cap { &data[n - cap..] } else { data };
        let room = cap - self.head;
        if data.len() <= room {
            self.buf[self.head..self.head + data.len()].copy_from_slice(data);
            self.head = (self.head + data.len()) % cap;
        } else {
            let (first, rest) = data.split_at(room);
            self.buf[self.head..].copy_from_slice(first);
            self.buf[..rest.len()].copy_from_slice(rest);
            self.head = rest.len();
        }
        n
    }

    /// Write the buffered contents to `w` in one call.
    pub fn write_to(&self, w: &mut dyn Write) -> io::Result<u64> {
        let data = self.contents();
        w.write_all(&data)?;
        Ok(data.len() as u64)
    }

    /// Clear the buffer.
    pub fn clear(&mut self) {
        self.head = 0;
        self.seen = 0;
    }
}

/// Shared, mutex-guarded ring buffer used as a stream's scrollback.
///
/// Cloning yields another handle to the same buffer. Every operation takes
/// the lock for its whole duration, so the methods must not be called from
/// inside a writer that is itself being driven by [`Scrollback::write_to`].
#[derive(Debug, Clone)]
pub struct Scrollback {
    inner: Arc<Mutex<RingBuffer>>,
}

impl Scrollback {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RingBuffer::new(capacity))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RingBuffer> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn size(&self) -> usize {
        self.lock().size()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn resize(&self, capacity: usize) {
        self.lock().resize(capacity)
    }

    pub fn last(&self, out: &mut [u8]) -> usize {
        self.lock().last(out)
    }

    pub fn contents(&self) -> Vec<u8> {
        self.lock().contents()
    }

    pub fn write(&self, data: &[u8]) -> usize {
        self.lock().write(data)
    }

    pub fn write_to(&self, w: &mut dyn Write) -> io::Result<u64> {
        self.lock().write_to(w)
    }
}

impl Write for Scrollback {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        Ok(Scrollback::write(self, data))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
