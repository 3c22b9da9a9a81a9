//! Serializable command summaries for clients.

use serde::Serialize;

use crate::command::CmdId;
use crate::status::StatusCode;

#[derive(Debug, Clone, Serialize)]
pub struct StatusInfo {
    pub code: StatusCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
}

/// Everything a client needs to render a command, including its recent
/// output.
#[derive(Debug, Clone, Serialize)]
pub struct CommandMetadata {
    pub id: CmdId,
    pub name: String,
    pub cmd: String,
    pub args: Vec<String>,
    /// Live working directory, or `<reason>` if it cannot be determined.
    pub cwd: String,
    pub start_wd: String,
    pub status: StatusInfo,
    /// Command whose stdin this command's stdout feeds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout_to: Option<CmdId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr_to: Option<CmdId>,
    pub stdout_scrollback: usize,
    pub stderr_scrollback: usize,
    pub user_data: serde_json::Value,
    /// Scrollback contents, lossily decoded.
    pub stdout: String,
    pub stderr: String,
}
