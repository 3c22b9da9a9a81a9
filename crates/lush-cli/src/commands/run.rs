//! `lush run a '|' b '|' c`: run a pipeline of commands.
//!
//! Our stdin feeds the first stage, each stage's stdout feeds the next
//! stage's stdin, and the last stage writes to the terminal. Every stage's
//! stderr goes straight to our stderr.

use anyhow::{Context, Result};
use lush_core::{Command, Session, SessionConfig, WriterSink};
use tracing::{debug, warn};

use super::{exit_code, feed_stdin, split_stages};

/// Run the pipeline and return the exit code of its last stage.
pub async fn run(config: SessionConfig, argv: &[String], metadata: bool) -> Result<i32> {
    let stages = split_stages(argv)?;
    let session = Session::new(config);

    let cmds: Vec<Command> = stages
        .iter()
        .map(|stage| session.new_command(&stage[0], stage[1..].iter().cloned()))
        .collect();

    for pair in cmds.windows(2) {
        pair[0].stdout().set_listener(pair[1].stdin());
    }
    if let Some(last) = cmds.last() {
        last.stdout().set_listener(WriterSink::new(std::io::stdout()));
    }
    for cmd in &cmds {
        cmd.stderr().set_listener(WriterSink::new(std::io::stderr()));
        let id = cmd.id();
        cmd.status().notify_change(move |snapshot| {
            debug!(cmd_id = %id, code = ?snapshot.code(), "status changed");
            Ok(())
        });
    }

    for cmd in &cmds {
        if let Err(e) = cmd.start() {
            eprintln!("lush: {}: {e}", cmd.name());
        }
    }
    if let Some(first) = cmds.first() {
        feed_stdin(first);
    }
    for cmd in &cmds {
        if let Err(e) = cmd.wait_async().await {
            debug!(cmd_id = %cmd.id(), error = %e, "stage finished with error");
        }
    }

    if metadata {
        for cmd in &cmds {
            let json = serde_json::to_string_pretty(&cmd.metadata())
                .context("failed to encode command metadata")?;
            eprintln!("{json}");
        }
    }

    let code = cmds.last().map(exit_code).unwrap_or(0);
    for cmd in &cmds {
        if let Err(e) = session.release_command(cmd.id()) {
            warn!(cmd_id = %cmd.id(), error = %e, "failed to release command");
        }
    }
    Ok(code)
}
