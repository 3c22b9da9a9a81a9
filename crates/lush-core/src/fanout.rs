//! Tolerant multi-sink broadcaster.
//!
//! Like a tee, except a sink that fails is dropped instead of failing the
//! write: the producer is never held responsible for a misbehaving
//! consumer. Sinks can be attached and detached while writes are flowing.

use std::io;
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, warn};

use crate::sink::{same_sink, write_all, Sink, SinkRef};

/// Broadcasts every write to a dynamic set of sinks.
#[derive(Default)]
pub struct FanoutWriter {
    sinks: Mutex<Vec<SinkRef>>,
}

impl FanoutWriter {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<SinkRef>> {
        self.sinks.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Attach a sink. The same sink may be attached more than once.
    pub fn add_sink(&self, sink: SinkRef) {
        self.lock().push(sink);
    }

    /// Detach the first attachment of `sink`. Returns whether it was found.
    pub fn remove_sink(&self, sink: &SinkRef) -> bool {
        let mut sinks = self.lock();
        match sinks.iter().position(|s| same_sink(s, sink)) {
            Some(i) => {
                sinks.remove(i);
                true
            }
            None => false,
        }
    }

    /// Snapshot of the attached sinks.
    pub fn sinks(&self) -> Vec<SinkRef> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Write all of `data` to every sink.
    ///
    /// Fails only when no sink is attached. A sink whose write fails is
    /// removed and the remaining sinks still get the data.
    pub fn write(&self, data: &[u8]) -> io::Result<usize> {
        let mut sinks = self.lock();
        if sinks.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "fanout: no sinks attached",
            ));
        }
        let before = sinks.len();
        sinks.retain(|sink| match write_all(sink.as_ref(), data) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "dropping sink after failed write");
                false
            }
        });
        if sinks.len() < before {
            sinks.shrink_to_fit();
            debug!(removed = before - sinks.len(), remaining = sinks.len(), "fanout sinks pruned");
        }
        Ok(data.len())
    }
}

impl Sink for FanoutWriter {
    fn write(&self, data: &[u8]) -> io::Result<usize> {
        FanoutWriter::write(self, data)
    }
}
