//! Standard input handle of a command.
//!
//! The handle can be requested before the command starts (to wire up a
//! pipeline in advance); writes then block until the process is launched and
//! the handle is bound to its stdin pipe. After the process exits, writes
//! fail.

use std::io::{self, Write};
use std::process::ChildStdin;
use std::sync::{Condvar, Mutex, MutexGuard};

use tracing::trace;

use crate::command::CmdId;
use crate::sink::Sink;

enum InputState {
    /// Command not launched yet.
    Pending,
    Bound(ChildStdin),
    /// Closed by a writer; the process sees end of input.
    Closed,
    /// No process will ever read from this handle.
    Gone(&'static str),
}

/// Write end of a command's standard input.
pub struct InputHandle {
    cmd: CmdId,
    state: Mutex<InputState>,
    bound: Condvar,
}

impl InputHandle {
    pub(crate) fn new(cmd: CmdId) -> Self {
        Self {
            cmd,
            state: Mutex::new(InputState::Pending),
            bound: Condvar::new(),
        }
    }

    /// Id of the command this handle feeds.
    pub fn cmd_id(&self) -> CmdId {
        self.cmd
    }

    fn lock(&self) -> MutexGuard<'_, InputState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Attach the launched process's stdin. A handle closed before launch
    /// drops the pipe right away so the process sees end of input.
    pub(crate) fn bind(&self, stdin: ChildStdin) {
        let mut state = self.lock();
        if matches!(*state, InputState::Pending) {
            *state = InputState::Bound(stdin);
        }
        self.bound.notify_all();
    }

    /// Mark the handle dead (process exited, failed to launch, or released).
    pub(crate) fn retire(&self, reason: &'static str) {
        let mut state = self.lock();
        *state = InputState::Gone(reason);
        self.bound.notify_all();
        trace!(cmd_id = %self.cmd, reason, "stdin retired");
    }

    pub fn write(&self, data: &[u8]) -> io::Result<usize> {
        let mut state = self.lock();
        while matches!(*state, InputState::Pending) {
            state = self
                .bound
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
        match &mut *state {
            InputState::Bound(stdin) => stdin.write(data),
            InputState::Closed => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "stdin already closed",
            )),
            InputState::Gone(reason) => Err(io::Error::new(io::ErrorKind::BrokenPipe, *reason)),
            InputState::Pending => unreachable!("waited until bound"),
        }
    }

    /// Close the handle. The process reads end of input once launched.
    pub fn close(&self) -> io::Result<()> {
        let mut state = self.lock();
        match std::mem::replace(&mut *state, InputState::Closed) {
            InputState::Bound(mut stdin) => {
                let flushed = stdin.flush();
                drop(stdin);
                flushed
            }
            InputState::Gone(reason) => {
                *state = InputState::Gone(reason);
                Ok(())
            }
            InputState::Pending | InputState::Closed => Ok(()),
        }
    }
}

impl Sink for InputHandle {
    fn write(&self, data: &[u8]) -> io::Result<usize> {
        InputHandle::write(self, data)
    }

    fn close(&self) -> io::Result<()> {
        InputHandle::close(self)
    }

    fn input_of(&self) -> Option<CmdId> {
        Some(self.cmd)
    }
}
