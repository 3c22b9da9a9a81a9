//! `lush tail -c N cmd ...`: run a command with nobody listening and print
//! the last N bytes it wrote, straight from the scrollback.

use std::io::Write;

use anyhow::{Context, Result};
use lush_core::{Session, SessionConfig};

use super::{exit_code, feed_stdin, split_stages};

pub async fn run(config: SessionConfig, argv: &[String], bytes: usize) -> Result<i32> {
    let mut stages = split_stages(argv)?;
    if stages.len() != 1 {
        anyhow::bail!("tail takes a single command, not a pipeline");
    }
    let stage = stages.remove(0);
    let session = Session::new(config);
    let cmd = session.new_command(&stage[0], stage[1..].iter().cloned());

    let scrollback = cmd.stdout().scrollback();
    if scrollback.size() < bytes {
        scrollback.resize(bytes);
    }

    if let Err(e) = cmd.start() {
        eprintln!("lush: {}: {e}", cmd.name());
        return Ok(exit_code(&cmd));
    }
    feed_stdin(&cmd);
    let _ = cmd.wait_async().await;

    let mut tail = vec![0u8; bytes];
    let n = scrollback.last(&mut tail);
    let mut stdout = std::io::stdout().lock();
    stdout
        .write_all(&tail[..n])
        .and_then(|()| stdout.flush())
        .context("failed to write output")?;

    Ok(exit_code(&cmd))
}
