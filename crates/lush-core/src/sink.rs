//! Byte sinks: the consumers that stream bytes are written into.
//!
//! A sink is shared (`Arc<dyn Sink>`) between the stream that writes to it and
//! whoever attached it, so writes go through `&self` and each sink carries
//! its own interior locking. Sinks are compared by identity, never by value.

use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;

use crate::command::CmdId;

/// Shared handle to a sink.
pub type SinkRef = Arc<dyn Sink>;

/// A consumer of stream bytes.
pub trait Sink: Send + Sync {
    /// Write a prefix of `data`, returning how many bytes were accepted.
    ///
    /// Returning more than `data.len()` is a contract violation.
    fn write(&self, data: &[u8]) -> io::Result<usize>;

    /// Release the sink. Sinks without anything to release keep the default.
    fn close(&self) -> io::Result<()> {
        Ok(())
    }

    /// Id of the command whose standard input this sink feeds, if any.
    fn input_of(&self) -> Option<CmdId> {
        None
    }
}

/// Whether two sink handles point at the same sink.
pub fn same_sink(a: &SinkRef, b: &SinkRef) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// Write all of `data` to `sink`, retrying short writes.
pub fn write_all(sink: &dyn Sink, mut data: &[u8]) -> io::Result<()> {
    while !data.is_empty() {
        match sink.write(data) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "sink accepted zero bytes",
                ))
            }
            Ok(n) => data = &data[n.min(data.len())..],
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Accepts and discards everything. Default listener of output streams.
#[derive(Debug, Default, Clone, Copy)]
pub struct Discard;

impl Sink for Discard {
    fn write(&self, data: &[u8]) -> io::Result<usize> {
        Ok(data.len())
    }
}

/// In-memory capture of everything written.
#[derive(Debug, Default)]
pub struct BufferSink {
    buf: Mutex<Vec<u8>>,
}

impl BufferSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Copy of the bytes captured so far.
    pub fn contents(&self) -> Vec<u8> {
        lock(&self.buf).clone()
    }

    /// Captured bytes, lossily decoded as UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&lock(&self.buf)).into_owned()
    }
}

impl Sink for BufferSink {
    fn write(&self, data: &[u8]) -> io::Result<usize> {
        lock(&self.buf).extend_from_slice(data);
        Ok(data.len())
    }
}

/// Adapter turning any [`std::io::Write`] into a sink.
///
/// Closing flushes the writer and drops it; later writes fail with
/// `BrokenPipe`.
pub struct WriterSink<W: Write + Send> {
    inner: Mutex<Option<W>>,
}

impl<W: Write + Send> WriterSink<W> {
    pub fn new(writer: W) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Some(writer)),
        })
    }
}

impl<W: Write + Send> Sink for WriterSink<W> {
    fn write(&self, data: &[u8]) -> io::Result<usize> {
        match lock(&self.inner).as_mut() {
            Some(w) => w.write(data),
            None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink closed")),
        }
    }

    fn close(&self) -> io::Result<()> {
        match lock(&self.inner).take() {
            Some(mut w) => w.flush(),
            None => Ok(()),
        }
    }
}

/// Prepends a fixed prefix to every write before passing it on.
///
/// Used to multiplex several streams onto one consumer (for example tagging
/// stdout and stderr chunks with a channel marker).
pub struct PrefixedSink {
    inner: SinkRef,
    prefix: Vec<u8>,
}

impl PrefixedSink {
    pub fn new(inner: SinkRef, prefix: impl Into<Vec<u8>>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            prefix: prefix.into(),
        })
    }
}

impl Sink for PrefixedSink {
    fn write(&self, data: &[u8]) -> io::Result<usize> {
        let mut framed = Vec::with_capacity(self.prefix.len() + data.len());
        framed.extend_from_slice(&self.prefix);
        framed.extend_from_slice(data);
        write_all(self.inner.as_ref(), &framed)?;
        Ok(data.len())
    }

    fn close(&self) -> io::Result<()> {
        self.inner.close()
    }
}

/// Messages a [`ChannelSink`] queues before writes start blocking.
pub const CHANNEL_CAPACITY: usize = 256;

/// Forwards every write as one message on a bounded tokio channel.
///
/// Lets an async task (a network client, typically) consume a stream. A full
/// channel blocks the writer until the receiver catches up, like any other
/// slow sink. Once the receiver is dropped, writes fail, which gets the sink
/// removed from any fan-out it was attached to.
///
/// Writes block the calling thread, so they must not happen on an async
/// runtime worker; command output pumps run on plain threads.
pub struct ChannelSink {
    tx: mpsc::Sender<Vec<u8>>,
}

impl ChannelSink {
    pub fn new() -> (Arc<Self>, mpsc::Receiver<Vec<u8>>) {
        Self::with_capacity(CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> (Arc<Self>, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Arc::new(Self { tx }), rx)
    }
}

impl Sink for ChannelSink {
    fn write(&self, data: &[u8]) -> io::Result<usize> {
        self.tx
            .blocking_send(data.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "channel receiver dropped"))?;
        Ok(data.len())
    }
}
