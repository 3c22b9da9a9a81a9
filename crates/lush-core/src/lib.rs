//! lush-core: process orchestration with observable streams.
//!
//! Spawns commands, wires their output into listeners (including other
//! commands' input, forming pipelines), lets any number of peekers watch a
//! stream without disturbing it, keeps a scrollback of the most recent output
//! and reports lifecycle changes to subscribers.

pub mod command;
pub mod config;
pub mod error;
pub mod fanout;
pub mod input;
pub mod metadata;
pub mod ringbuf;
pub mod session;
pub mod sink;
pub mod status;
pub mod stream;

// Re-export commonly used items at crate root.
pub use command::{CmdId, Command, Signal, CWD_SUPPORTED};
pub use config::SessionConfig;
pub use error::{LushError, LushResult};
pub use fanout::FanoutWriter;
pub use input::InputHandle;
pub use metadata::{CommandMetadata, StatusInfo};
pub use ringbuf::{RingBuffer, Scrollback};
pub use session::Session;
pub use sink::{BufferSink, ChannelSink, Discard, PrefixedSink, Sink, SinkRef, WriterSink};
pub use status::{CommandStatus, StatusCode, StatusSnapshot};
pub use stream::{StreamPipe, StreamRef};
