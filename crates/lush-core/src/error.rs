use std::sync::Arc;
use thiserror::Error;

use crate::command::CmdId;

/// Errors produced by the lush orchestration core.
///
/// Cloneable so that the same value can be recorded on a command's status and
/// handed back to the caller that triggered it.
#[derive(Debug, Clone, Error)]
pub enum LushError {
    #[error("command already started")]
    AlreadyStarted,

    #[error("command not started")]
    NotStarted,

    #[error("command already exited")]
    AlreadyExited,

    #[error("cannot change {0} after command has started")]
    ArgvFrozen(&'static str),

    #[error("empty argv")]
    EmptyArgv,

    #[error("no such command: {0}")]
    CommandNotFound(CmdId),

    #[error("command {0} is still running")]
    StillRunning(CmdId),

    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: Arc<std::io::Error>,
    },

    #[error("exit status {code}")]
    Exit { code: i32 },

    #[error("killed by signal {signal}")]
    Killed { signal: i32 },

    #[error("stream error: {0}")]
    Stream(Arc<std::io::Error>),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("{0}")]
    Other(String),
}

impl LushError {
    pub(crate) fn launch(program: impl Into<String>, source: std::io::Error) -> Self {
        LushError::Launch {
            program: program.into(),
            source: Arc::new(source),
        }
    }

    pub(crate) fn stream(source: std::io::Error) -> Self {
        LushError::Stream(Arc::new(source))
    }

    /// True for errors that describe a caller bug rather than a failure of
    /// the managed process.
    pub fn is_misuse(&self) -> bool {
        matches!(
            self,
            LushError::AlreadyStarted
                | LushError::NotStarted
                | LushError::AlreadyExited
                | LushError::ArgvFrozen(_)
                | LushError::EmptyArgv
                | LushError::StillRunning(_)
        )
    }
}

impl From<std::io::Error> for LushError {
    fn from(e: std::io::Error) -> Self {
        LushError::Io(Arc::new(e))
    }
}

impl From<toml::de::Error> for LushError {
    fn from(e: toml::de::Error) -> Self {
        LushError::Config(e.to_string())
    }
}

pub type LushResult<T> = Result<T, LushError>;
