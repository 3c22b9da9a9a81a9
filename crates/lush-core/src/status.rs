//! Command lifecycle state machine with change notification.
//!
//! ```text
//!   Unstarted ──mark_started──▶ Running ──mark_exited(err)──▶ Exited
//!       │
//!       └──set_error (launch failed)──▶ Unstarted + err  (terminal)
//! ```
//!
//! Field ordering: `started` is set before `err` for any process that
//! actually ran, and the runtime error is recorded together with `exited` in
//! a single transition. An error without a start time therefore always means
//! the launch itself failed. Both terminal states freeze the status: the
//! callback list is dropped and nothing is delivered afterwards.

use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use serde::{Serialize, Serializer};
use tracing::{debug, warn};

use crate::error::LushError;

/// Callback invoked with a snapshot on every status change. Returning an
/// error unsubscribes it.
pub type StatusCallback = Box<dyn FnMut(&StatusSnapshot) -> anyhow::Result<()> + Send>;

#[derive(Debug, Clone, Copy)]
enum Phase {
    Unstarted,
    Running { started: Instant },
    Exited { started: Instant, exited: Instant },
}

/// Coarse status as exposed to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StatusCode {
    NotStarted = 0,
    Running = 1,
    ExitedSuccess = 2,
    ExitedFailure = 3,
}

impl Serialize for StatusCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

/// Point-in-time copy of a command's status.
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    phase: Phase,
    err: Option<LushError>,
}

impl StatusSnapshot {
    /// When the process was launched; `None` if it never was.
    pub fn started(&self) -> Option<Instant> {
        match self.phase {
            Phase::Unstarted => None,
            Phase::Running { started } | Phase::Exited { started, .. } => Some(started),
        }
    }

    /// When the process exited; `None` while not started or running.
    pub fn exited(&self) -> Option<Instant> {
        match self.phase {
            Phase::Exited { exited, .. } => Some(exited),
            _ => None,
        }
    }

    pub fn success(&self) -> bool {
        self.err.is_none()
    }

    pub fn err(&self) -> Option<&LushError> {
        self.err.as_ref()
    }

    pub fn code(&self) -> StatusCode {
        if self.err.is_some() {
            return StatusCode::ExitedFailure;
        }
        match self.phase {
            Phase::Unstarted => StatusCode::NotStarted,
            Phase::Running { .. } => StatusCode::Running,
            Phase::Exited { .. } => StatusCode::ExitedSuccess,
        }
    }
}

struct StatusState {
    phase: Phase,
    err: Option<LushError>,
    callbacks: Vec<StatusCallback>,
    frozen: bool,
}

impl StatusState {
    fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            phase: self.phase,
            err: self.err.clone(),
        }
    }
}

/// Lifecycle status of one command.
///
/// Transitions are serialized and each one is delivered to every callback,
/// in subscription order, before the next transition starts. Callbacks may
/// read the status or subscribe further callbacks, but must not drive a
/// transition of the status that is notifying them.
pub struct CommandStatus {
    state: Mutex<StatusState>,
    delivery: Mutex<()>,
}

impl Default for CommandStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CommandStatus").field(&self.snapshot()).finish()
    }
}

impl CommandStatus {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StatusState {
                phase: Phase::Unstarted,
                err: None,
                callbacks: Vec::new(),
                frozen: false,
            }),
            delivery: Mutex::new(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StatusState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn begin_transition(&self) -> MutexGuard<'_, ()> {
        self.delivery.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.lock().snapshot()
    }

    pub fn started(&self) -> Option<Instant> {
        self.snapshot().started()
    }

    pub fn exited(&self) -> Option<Instant> {
        self.snapshot().exited()
    }

    pub fn success(&self) -> bool {
        self.lock().err.is_none()
    }

    pub fn err(&self) -> Option<LushError> {
        self.lock().err.clone()
    }

    pub fn code(&self) -> StatusCode {
        self.snapshot().code()
    }

    /// Subscribe to future changes. Ignored once the status is frozen.
    pub fn notify_change<F>(&self, callback: F)
    where
        F: FnMut(&StatusSnapshot) -> anyhow::Result<()> + Send + 'static,
    {
        let mut state = self.lock();
        if state.frozen {
            debug!("status frozen, dropping new subscriber");
            return;
        }
        state.callbacks.push(Box::new(callback));
    }

    /// Record the launch.
    ///
    /// # Panics
    ///
    /// If the status was already started.
    pub fn mark_started(&self) {
        let _transition = self.begin_transition();
        {
            let mut state = self.lock();
            match state.phase {
                Phase::Unstarted => {
                    state.phase = Phase::Running {
                        started: Instant::now(),
                    }
                }
                _ => panic!("command status already started"),
            }
        }
        self.deliver();
    }

    /// Record the exit along with its error, if any. Freezes the status.
    ///
    /// # Panics
    ///
    /// If the status is not running (never started, or already exited), or
    /// if an error is given while one is already recorded.
    pub fn mark_exited(&self, err: Option<LushError>) {
        let _transition = self.begin_transition();
        {
            let mut state = self.lock();
            let started = match state.phase {
                Phase::Running { started } => started,
                Phase::Unstarted => panic!("command status exited before it started"),
                Phase::Exited { .. } => panic!("command status can only exit once"),
            };
            if let Some(err) = err {
                assert!(state.err.is_none(), "cannot reset error state of command");
                state.err = Some(err);
            }
            state.phase = Phase::Exited {
                started,
                exited: Instant::now(),
            };
            state.frozen = true;
        }
        self.deliver();
    }

    /// Record an error outside of the exit transition. `None` is a no-op.
    ///
    /// An error recorded before the status started marks a failed launch and
    /// freezes the status.
    ///
    /// # Panics
    ///
    /// If an error is already recorded.
    pub fn set_error(&self, err: Option<LushError>) {
        let Some(err) = err else {
            return;
        };
        let _transition = self.begin_transition();
        {
            let mut state = self.lock();
            assert!(state.err.is_none(), "cannot reset error state of command");
            state.err = Some(err);
            if matches!(state.phase, Phase::Unstarted) {
                state.frozen = true;
            }
        }
        self.deliver();
    }

    /// Run every callback against the current state, dropping the ones that
    /// fail. Callers hold the transition lock.
    fn deliver(&self) {
        let (snapshot, mut callbacks) = {
            let mut state = self.lock();
            (state.snapshot(), std::mem::take(&mut state.callbacks))
        };
        callbacks.retain_mut(|callback| match callback(&snapshot) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "status listener failed, unsubscribing");
                false
            }
        });
        let mut state = self.lock();
        if state.frozen {
            state.callbacks.clear();
        } else {
            // Keep callbacks subscribed during delivery after the survivors.
            callbacks.append(&mut state.callbacks);
            state.callbacks = callbacks;
        }
    }
}
