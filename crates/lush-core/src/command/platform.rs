//! Host OS hooks: signal delivery and live working directory lookup.

use std::fmt;
use std::path::PathBuf;

use crate::error::LushResult;

/// Whether [`process_cwd`] can work on this platform.
pub const CWD_SUPPORTED: bool = cfg!(target_os = "linux");

/// Signals that can be sent to a running command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Interrupt,
    Terminate,
    Kill,
    Hangup,
    Quit,
    User1,
    User2,
    /// Raw signal number.
    Other(i32),
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Interrupt => f.write_str("SIGINT"),
            Signal::Terminate => f.write_str("SIGTERM"),
            Signal::Kill => f.write_str("SIGKILL"),
            Signal::Hangup => f.write_str("SIGHUP"),
            Signal::Quit => f.write_str("SIGQUIT"),
            Signal::User1 => f.write_str("SIGUSR1"),
            Signal::User2 => f.write_str("SIGUSR2"),
            Signal::Other(n) => write!(f, "signal {n}"),
        }
    }
}

#[cfg(unix)]
impl Signal {
    fn as_raw(self) -> libc::c_int {
        match self {
            Signal::Interrupt => libc::SIGINT,
            Signal::Terminate => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
            Signal::Hangup => libc::SIGHUP,
            Signal::Quit => libc::SIGQUIT,
            Signal::User1 => libc::SIGUSR1,
            Signal::User2 => libc::SIGUSR2,
            Signal::Other(n) => n,
        }
    }
}

#[cfg(unix)]
pub(crate) fn send_signal(pid: u32, sig: Signal) -> LushResult<()> {
    // SAFETY: kill(2) has no memory-safety preconditions.
    let rc = unsafe { libc::kill(pid as libc::pid_t, sig.as_raw()) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}

#[cfg(not(unix))]
pub(crate) fn send_signal(_pid: u32, sig: Signal) -> LushResult<()> {
    Err(crate::error::LushError::Unsupported(format!(
        "sending {sig} on {}",
        std::env::consts::OS
    )))
}

#[cfg(target_os = "linux")]
pub(crate) fn process_cwd(pid: u32) -> LushResult<PathBuf> {
    Ok(std::fs::read_link(format!("/proc/{pid}/cwd"))?)
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn process_cwd(_pid: u32) -> LushResult<PathBuf> {
    Err(crate::error::LushError::Unsupported(format!(
        "working directory of a child process on {}",
        std::env::consts::OS
    )))
}
