//! Output stream of a command: one listener, many peekers, one scrollback.
//!
//! ```text
//!   process ──▶ StreamPipe ──▶ listener (required; its result goes back to the process)
//!                   ├──▶ peekers (FanoutWriter; failures drop the peeker)
//!                   └──▶ scrollback (RingBuffer; last N accepted bytes)
//! ```
//!
//! The listener is strict: if it fails, the writer sees the failure. Peekers
//! are best effort. Only bytes the listener accepted are passed on, so
//! peekers and scrollback never see output the listener refused.

use std::io;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use tracing::debug;

use crate::fanout::FanoutWriter;
use crate::ringbuf::Scrollback;
use crate::sink::{write_all, Sink, SinkRef};

pub struct StreamPipe {
    listener: RwLock<Option<SinkRef>>,
    peeker: FanoutWriter,
    scrollback: Scrollback,
    /// Serializes writes so listener, peekers and scrollback agree on order.
    write_lock: Mutex<()>,
}

impl StreamPipe {
    /// Create a stream with the given listener and scrollback capacity.
    pub fn new(listener: Option<SinkRef>, scrollback_size: usize) -> Self {
        Self {
            listener: RwLock::new(listener),
            peeker: FanoutWriter::new(),
            scrollback: Scrollback::new(scrollback_size),
            write_lock: Mutex::new(()),
        }
    }

    fn serialize(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace the primary listener.
    pub fn set_listener(&self, sink: SinkRef) {
        *self.listener.write().unwrap_or_else(|e| e.into_inner()) = Some(sink);
    }

    /// The current primary listener.
    pub fn listener(&self) -> Option<SinkRef> {
        self.listener
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// The set of best-effort observers.
    pub fn peeker(&self) -> &FanoutWriter {
        &self.peeker
    }

    /// Handle to the scrollback buffer.
    pub fn scrollback(&self) -> Scrollback {
        self.scrollback.clone()
    }

    /// Send the current scrollback to `sink`, then attach it as a peeker.
    ///
    /// No write can land between the replay and the attach, so the sink sees
    /// every byte exactly once.
    pub fn attach_with_replay(&self, sink: SinkRef) -> io::Result<()> {
        let _guard = self.serialize();
        let history = self.scrollback.contents();
        if !history.is_empty() {
            write_all(sink.as_ref(), &history)?;
        }
        self.peeker.add_sink(sink);
        Ok(())
    }

    /// Write `data` to the listener and pass the accepted prefix on.
    ///
    /// # Panics
    ///
    /// If the listener reports accepting more bytes than it was given.
    pub fn write(&self, data: &[u8]) -> io::Result<usize> {
        let _guard = self.serialize();
        let listener = self.listener().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, "stream has no listener")
        })?;
        let n = listener.write(data)?;
        assert!(
            n <= data.len(),
            "listener accepted {n} bytes of a {} byte write",
            data.len()
        );
        let accepted = &data[..n];
        if !accepted.is_empty() {
            // An empty peeker set is the normal case here, not a failure.
            let _ = self.peeker.write(accepted);
            self.scrollback.write(accepted);
        }
        Ok(n)
    }

    /// Close the listener and every peeker, returning the first error.
    pub fn close(&self) -> io::Result<()> {
        let _guard = self.serialize();
        let mut first_err = None;
        if let Some(listener) = self.listener() {
            if let Err(e) = listener.close() {
                first_err.get_or_insert(e);
            }
        }
        for sink in self.peeker.sinks() {
            if let Err(e) = sink.close() {
                first_err.get_or_insert(e);
            }
        }
        debug!(error = first_err.is_some(), "stream closed");
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Sink for StreamPipe {
    fn write(&self, data: &[u8]) -> io::Result<usize> {
        StreamPipe::write(self, data)
    }
}

/// Shared handle type used by commands.
pub type StreamRef = Arc<StreamPipe>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{BufferSink, Discard};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Accepts at most `limit` bytes in total, then fails.
    struct Capped {
        left: AtomicUsize,
        buf: BufferSink,
    }

    impl Capped {
        fn new(limit: usize) -> Arc<Self> {
            Arc::new(Self {
                left: AtomicUsize::new(limit),
                buf: BufferSink::default(),
            })
        }
    }

    impl Sink for Capped {
        fn write(&self, data: &[u8]) -> io::Result<usize> {
            let left = self.left.load(Ordering::SeqCst);
            if left == 0 {
                return Err(io::Error::new(io::ErrorKind::Other, "byte limit reached"));
            }
            let n = left.min(data.len());
            self.left.store(left - n, Ordering::SeqCst);
            self.buf.write(&data[..n])
        }
    }

    struct Liar;

    impl Sink for Liar {
        fn write(&self, data: &[u8]) -> io::Result<usize> {
            Ok(data.len() + 1)
        }
    }

    #[derive(Default)]
    struct CloseCounter(AtomicUsize);

    impl Sink for CloseCounter {
        fn write(&self, data: &[u8]) -> io::Result<usize> {
            Ok(data.len())
        }

        fn close(&self) -> io::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn output_reaches_listener() {
        let buf = BufferSink::new();
        let p = StreamPipe::new(Some(buf.clone()), 100);
        let txt = b"don't mind us, we're just piping through";
        assert_eq!(p.write(txt).unwrap(), txt.len());
        assert_eq!(buf.contents(), txt);
    }

    #[test]
    fn no_listener_is_an_error() {
        let p = StreamPipe::new(None, 10);
        assert!(p.write(b"lost").is_err());
        assert!(p.scrollback().is_empty());
    }

    #[test]
    fn scrollback_keeps_tail() {
        let p = StreamPipe::new(Some(Arc::new(Discard)), 100);
        let sb = p.scrollback();
        assert_eq!(sb.size(), 100);
        let mut buf = [0u8; 50];
        assert_eq!(sb.last(&mut buf), 0);

        p.write(b"some pipe data").unwrap();
        let mut buf = [0u8; 5];
        assert_eq!(sb.last(&mut buf), 5);
        assert_eq!(&buf, b" data");
    }

    #[test]
    fn short_write_forwards_only_accepted_prefix() {
        let capped = Capped::new(3);
        let p = StreamPipe::new(Some(capped.clone()), 100);
        let peek = BufferSink::new();
        p.peeker().add_sink(peek.clone());

        assert_eq!(p.write(b"abcdef").unwrap(), 3);
        assert_eq!(p.scrollback().contents(), b"abc");
        assert_eq!(peek.contents(), b"abc");

        assert!(p.write(b"ghi").is_err());
        assert_eq!(p.scrollback().contents(), b"abc");
        assert_eq!(peek.contents(), b"abc");
    }

    #[test]
    #[should_panic(expected = "listener accepted")]
    fn listener_overreporting_panics() {
        let p = StreamPipe::new(Some(Arc::new(Liar)), 10);
        let _ = p.write(b"abc");
    }

    #[test]
    fn peeker_failure_does_not_reach_writer() {
        let p = StreamPipe::new(Some(Arc::new(Discard)), 10);
        let dead = Capped::new(0);
        p.peeker().add_sink(dead);
        assert_eq!(p.write(b"fine").unwrap(), 4);
        assert!(p.peeker().is_empty());
    }

    #[test]
    fn attach_with_replay_sends_history_then_live() {
        let p = StreamPipe::new(Some(Arc::new(Discard)), 6);
        p.write(b"old output ").unwrap();
        let late = BufferSink::new();
        p.attach_with_replay(late.clone()).unwrap();
        p.write(b"new").unwrap();
        assert_eq!(late.contents(), b"utput new");
    }

    #[test]
    fn close_reaches_listener_and_peekers() {
        let listener = Arc::new(CloseCounter::default());
        let peek = Arc::new(CloseCounter::default());
        let p = StreamPipe::new(Some(listener.clone()), 10);
        p.peeker().add_sink(peek.clone());
        p.close().unwrap();
        assert_eq!(listener.0.load(Ordering::SeqCst), 1);
        assert_eq!(peek.0.load(Ordering::SeqCst), 1);
    }
}
