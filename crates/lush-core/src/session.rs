//! Command registry and environment for one control context.
//!
//! Tracks the commands of a session by id, hands out fresh ids, and keeps a
//! private environment that is copied into each command when it is created.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info};

use crate::command::{CmdId, Command};
use crate::config::SessionConfig;
use crate::error::{LushError, LushResult};

/// Registry of commands plus the environment handed to new ones.
pub struct Session {
    commands: RwLock<HashMap<CmdId, Command>>,
    last_id: AtomicU64,
    environ: RwLock<HashMap<String, String>>,
    config: SessionConfig,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

impl Session {
    /// Create a session. With `inherit_env`, the environment starts as a copy
    /// of this process's environment.
    pub fn new(config: SessionConfig) -> Self {
        let environ = if config.inherit_env {
            std::env::vars_os()
                .map(|(k, v)| {
                    (
                        k.to_string_lossy().into_owned(),
                        v.to_string_lossy().into_owned(),
                    )
                })
                .collect()
        } else {
            HashMap::new()
        };
        Self {
            commands: RwLock::new(HashMap::new()),
            last_id: AtomicU64::new(0),
            environ: RwLock::new(environ),
            config,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn commands(&self) -> RwLockReadGuard<'_, HashMap<CmdId, Command>> {
        self.commands.read().unwrap_or_else(|e| e.into_inner())
    }

    fn commands_mut(&self) -> RwLockWriteGuard<'_, HashMap<CmdId, Command>> {
        self.commands.write().unwrap_or_else(|e| e.into_inner())
    }

    fn env(&self) -> RwLockReadGuard<'_, HashMap<String, String>> {
        self.environ.read().unwrap_or_else(|e| e.into_inner())
    }

    fn env_mut(&self) -> RwLockWriteGuard<'_, HashMap<String, String>> {
        self.environ.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Create and register a command. It gets a snapshot of the current
    /// session environment; later changes do not affect it.
    pub fn new_command<I, S>(&self, name: &str, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let id = CmdId(self.last_id.fetch_add(1, Ordering::Relaxed) + 1);
        let argv: Vec<String> = std::iter::once(name.to_string())
            .chain(args.into_iter().map(Into::into))
            .collect();
        let env: Vec<(String, String)> = self
            .env()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let cmd = Command::new(id, argv, env, &self.config);
        self.commands_mut().insert(id, cmd.clone());
        debug!(cmd_id = %id, name, "command created");
        cmd
    }

    pub fn get_command(&self, id: CmdId) -> Option<Command> {
        self.commands().get(&id).cloned()
    }

    /// Ids of all registered commands, in no particular order.
    pub fn command_ids(&self) -> Vec<CmdId> {
        self.commands().keys().copied().collect()
    }

    /// Unregister a finished (or never started) command.
    pub fn release_command(&self, id: CmdId) -> LushResult<()> {
        let mut commands = self.commands_mut();
        let cmd = commands.get(&id).ok_or(LushError::CommandNotFound(id))?;
        cmd.release()?;
        commands.remove(&id);
        info!(cmd_id = %id, "command released");
        Ok(())
    }

    /// Change the working directory of this whole process. Affects commands
    /// started afterwards, never running ones.
    pub fn chdir(&self, dir: impl AsRef<Path>) -> LushResult<()> {
        let dir = dir.as_ref();
        std::env::set_current_dir(dir)?;
        info!(dir = %dir.display(), "working directory changed");
        Ok(())
    }

    /// Set a variable for commands created from now on. Does not touch the
    /// environment of this process.
    pub fn setenv(&self, key: impl Into<String>, value: impl Into<String>) {
        self.env_mut().insert(key.into(), value.into());
    }

    pub fn unsetenv(&self, key: &str) {
        self.env_mut().remove(key);
    }

    pub fn getenv(&self, key: &str) -> Option<String> {
        self.env().get(key).cloned()
    }

    /// Copy of the session environment.
    pub fn environ(&self) -> HashMap<String, String> {
        self.env().clone()
    }
}
