pub mod run;
pub mod tail;

use std::io::Read;
use std::sync::Arc;
use std::thread;

use lush_core::sink::write_all;
use lush_core::{Command, InputHandle, LushError};
use tracing::debug;

/// Split `a b '|' c d` into pipeline stages.
pub fn split_stages(argv: &[String]) -> anyhow::Result<Vec<Vec<String>>> {
    let stages: Vec<Vec<String>> = argv
        .split(|arg| arg == "|")
        .map(|stage| stage.to_vec())
        .collect();
    if stages.iter().any(|stage| stage.is_empty()) {
        anyhow::bail!("empty pipeline stage");
    }
    Ok(stages)
}

/// Copy our stdin into `cmd`'s stdin on a background thread, closing it at
/// end of input so the command sees EOF.
///
/// The thread is detached: if the command never reads its input, the copy
/// stops at the first failed write and the process exit takes it down.
pub fn feed_stdin(cmd: &Command) {
    let input = cmd.stdin();
    let id = cmd.id();
    let spawned = thread::Builder::new()
        .name("lush-stdin".into())
        .spawn(move || {
            if let Err(e) = copy_into(std::io::stdin().lock(), &input) {
                debug!(cmd_id = %id, error = %e, "stopped forwarding stdin");
            }
        });
    if let Err(e) = spawned {
        debug!(cmd_id = %id, error = %e, "cannot forward stdin, closing it");
        let _ = cmd.stdin().close();
    }
}

fn copy_into(mut reader: impl Read, input: &Arc<InputHandle>) -> std::io::Result<()> {
    let mut buf = [0u8; 8192];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => return input.close(),
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                let _ = input.close();
                return Err(e);
            }
        };
        write_all(input.as_ref(), &buf[..n])?;
    }
}

/// Exit code to report for a finished command, shell style.
pub fn exit_code(cmd: &Command) -> i32 {
    match cmd.status().err() {
        None => 0,
        Some(LushError::Exit { code }) => code,
        Some(LushError::Killed { signal }) => 128 + signal,
        Some(LushError::Launch { .. }) => 127,
        Some(_) => 1,
    }
}
