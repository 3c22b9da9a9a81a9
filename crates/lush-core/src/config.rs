//! Session configuration: TOML file with defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::LushResult;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub session: SessionSection,
}

/// `[session]` section of the config TOML.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionSection {
    /// Scrollback capacity of every output stream, in bytes.
    #[serde(default = "default_scrollback_size")]
    pub scrollback_size: usize,
    /// Seed the session environment from this process's environment.
    #[serde(default = "default_true")]
    pub inherit_env: bool,
    /// Read size used when pumping process output into streams.
    #[serde(default = "default_read_chunk_size")]
    pub read_chunk_size: usize,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            scrollback_size: default_scrollback_size(),
            inherit_env: true,
            read_chunk_size: default_read_chunk_size(),
        }
    }
}

fn default_scrollback_size() -> usize {
    1000
}
fn default_read_chunk_size() -> usize {
    32 * 1024
}
fn default_true() -> bool {
    true
}

/// Resolved session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub scrollback_size: usize,
    pub inherit_env: bool,
    pub read_chunk_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionSection::default().into()
    }
}

impl From<SessionSection> for SessionConfig {
    fn from(s: SessionSection) -> Self {
        Self {
            scrollback_size: s.scrollback_size,
            inherit_env: s.inherit_env,
            read_chunk_size: s.read_chunk_size,
        }
    }
}

impl SessionConfig {
    /// Load config from a TOML file (missing file ⇒ defaults), then apply
    /// overrides.
    pub fn load(config_path: Option<&Path>, scrollback_size: Option<usize>) -> LushResult<Self> {
        let file = match config_path.map(expand_tilde) {
            Some(path) if path.exists() => {
                info!(path = %path.display(), "loading config file");
                let content = std::fs::read_to_string(&path)?;
                toml::from_str::<ConfigFile>(&content)?
            }
            Some(path) => {
                info!(path = %path.display(), "config file not found, using defaults");
                ConfigFile::default()
            }
            None => ConfigFile::default(),
        };

        let mut config = SessionConfig::from(file.session);
        if let Some(size) = scrollback_size {
            config.scrollback_size = size;
        }
        Ok(config)
    }

    pub fn from_toml(content: &str) -> LushResult<Self> {
        Ok(toml::from_str::<ConfigFile>(content)?.session.into())
    }
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_section_missing() {
        let cfg = SessionConfig::from_toml("").unwrap();
        assert_eq!(cfg.scrollback_size, 1000);
        assert!(cfg.inherit_env);
        assert_eq!(cfg.read_chunk_size, 32 * 1024);
    }

    #[test]
    fn partial_section() {
        let cfg = SessionConfig::from_toml("[session]\nscrollback_size = 4096\n").unwrap();
        assert_eq!(cfg.scrollback_size, 4096);
        assert!(cfg.inherit_env);
    }

    #[test]
    fn bad_toml_is_config_error() {
        let err = SessionConfig::from_toml("[session\n").unwrap_err();
        assert!(matches!(err, crate::error::LushError::Config(_)));
    }

    #[test]
    fn load_file_and_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lush.toml");
        std::fs::write(&path, "[session]\nscrollback_size = 10\ninherit_env = false\n").unwrap();

        let cfg = SessionConfig::load(Some(&path), None).unwrap();
        assert_eq!(cfg.scrollback_size, 10);
        assert!(!cfg.inherit_env);

        let cfg = SessionConfig::load(Some(&path), Some(77)).unwrap();
        assert_eq!(cfg.scrollback_size, 77);
    }

    #[test]
    fn missing_file_uses_defaults() {
        let cfg = SessionConfig::load(Some(Path::new("/nonexistent/lush.toml")), None).unwrap();
        assert_eq!(cfg.scrollback_size, 1000);
    }

    #[test]
    fn tilde_expansion() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde(Path::new("~/x.toml")), home.join("x.toml"));
        }
        assert_eq!(expand_tilde(Path::new("/etc/x")), PathBuf::from("/etc/x"));
    }
}
