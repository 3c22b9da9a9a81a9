//! One managed OS process with its streams and status.
//!
//! A command goes through three phases: preparation (argv and start
//! directory still mutable), running (process launched, a supervisor thread
//! pumps its output and waits for it) and done (exited, output streams
//! closed, status frozen). Between a reaped process and done, the command is
//! draining: it can no longer be signalled but cannot be released either.
//!
//! ```text
//!   stdin handle ──▶ [process] ──stdout pipe──▶ pump ──▶ StreamPipe (stdout)
//!                              └─stderr pipe──▶ pump ──▶ StreamPipe (stderr)
//! ```
//!
//! A stream's listener can be another command's stdin handle; each pump then
//! blocks on the downstream process, so backpressure travels up a pipeline
//! the same way it does through kernel pipes.

mod platform;

pub use platform::{Signal, CWD_SUPPORTED};

use std::fmt;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::{Child, ExitStatus, Stdio};
use std::str::FromStr;
use std::sync::{mpsc, Arc, Condvar, Mutex, MutexGuard, OnceLock};
use std::thread;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::{LushError, LushResult};
use crate::input::InputHandle;
use crate::metadata::{CommandMetadata, StatusInfo};
use crate::sink::{write_all, Discard};
use crate::status::CommandStatus;
use crate::stream::{StreamPipe, StreamRef};

/// Identifier of a command, unique among the commands of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CmdId(pub u64);

impl fmt::Display for CmdId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for CmdId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(CmdId)
    }
}

#[derive(Debug, Clone, Copy)]
enum Lifecycle {
    Preparation,
    Running { pid: u32 },
    /// Reaped or failed to launch; output and status not settled yet.
    Draining,
    Done,
    Released,
}

/// What gets launched; frozen once the command starts.
#[derive(Debug, Clone)]
struct LaunchSpec {
    argv: Vec<String>,
    name: Option<String>,
    start_dir: Option<PathBuf>,
    env: Vec<(String, String)>,
}

/// One-shot latch released when the command is finished.
#[derive(Default)]
struct Completion {
    done: Mutex<bool>,
    cond: Condvar,
}

impl Completion {
    fn release(&self) {
        *self.done.lock().unwrap_or_else(|e| e.into_inner()) = true;
        self.cond.notify_all();
    }

    fn wait(&self) {
        let mut done = self.done.lock().unwrap_or_else(|e| e.into_inner());
        while !*done {
            done = self.cond.wait(done).unwrap_or_else(|e| e.into_inner());
        }
    }
}

struct Inner {
    id: CmdId,
    spec: Mutex<LaunchSpec>,
    lifecycle: Mutex<Lifecycle>,
    status: CommandStatus,
    stdin: Mutex<Option<Arc<InputHandle>>>,
    stdout: StreamRef,
    stderr: StreamRef,
    start_wd: OnceLock<String>,
    user_data: Mutex<serde_json::Value>,
    done: Completion,
    read_chunk_size: usize,
}

/// Handle to a managed command. Cloning yields another handle to the same
/// command.
#[derive(Clone)]
pub struct Command {
    inner: Arc<Inner>,
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("id", &self.inner.id)
            .field("argv", &self.argv())
            .field("status", &self.inner.status)
            .finish()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl Command {
    /// Create a command in the preparation phase. Both output streams start
    /// with a discarding listener.
    pub fn new(
        id: CmdId,
        argv: Vec<String>,
        env: Vec<(String, String)>,
        config: &SessionConfig,
    ) -> Self {
        let discard = || -> StreamRef {
            Arc::new(StreamPipe::new(Some(Arc::new(Discard)), config.scrollback_size))
        };
        Self {
            inner: Arc::new(Inner {
                id,
                spec: Mutex::new(LaunchSpec {
                    argv,
                    name: None,
                    start_dir: None,
                    env,
                }),
                lifecycle: Mutex::new(Lifecycle::Preparation),
                status: CommandStatus::new(),
                stdin: Mutex::new(None),
                stdout: discard(),
                stderr: discard(),
                start_wd: OnceLock::new(),
                user_data: Mutex::new(serde_json::Value::Null),
                done: Completion::default(),
                read_chunk_size: config.read_chunk_size.max(1),
            }),
        }
    }

    pub fn id(&self) -> CmdId {
        self.inner.id
    }

    /// The explicit name if one was set, otherwise argv[0].
    pub fn name(&self) -> String {
        let spec = lock(&self.inner.spec);
        spec.name
            .clone()
            .or_else(|| spec.argv.first().cloned())
            .unwrap_or_default()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        lock(&self.inner.spec).name = Some(name.into());
    }

    pub fn argv(&self) -> Vec<String> {
        lock(&self.inner.spec).argv.clone()
    }

    /// Replace argv. Fails once the command has started.
    pub fn set_argv(&self, argv: Vec<String>) -> LushResult<()> {
        let lifecycle = lock(&self.inner.lifecycle);
        if !matches!(*lifecycle, Lifecycle::Preparation) {
            return Err(LushError::ArgvFrozen("argv"));
        }
        if argv.is_empty() {
            return Err(LushError::EmptyArgv);
        }
        lock(&self.inner.spec).argv = argv;
        Ok(())
    }

    /// Launch in `dir` instead of the current directory of this process.
    /// Fails once the command has started.
    pub fn set_start_dir(&self, dir: impl Into<PathBuf>) -> LushResult<()> {
        let lifecycle = lock(&self.inner.lifecycle);
        if !matches!(*lifecycle, Lifecycle::Preparation) {
            return Err(LushError::ArgvFrozen("start directory"));
        }
        lock(&self.inner.spec).start_dir = Some(dir.into());
        Ok(())
    }

    /// Environment the process will be launched with.
    pub fn env(&self) -> Vec<(String, String)> {
        lock(&self.inner.spec).env.clone()
    }

    pub fn status(&self) -> &CommandStatus {
        &self.inner.status
    }

    pub fn stdout(&self) -> StreamRef {
        self.inner.stdout.clone()
    }

    pub fn stderr(&self) -> StreamRef {
        self.inner.stderr.clone()
    }

    /// Standard input handle, created on first use.
    ///
    /// Writes block until the command has started and fail after it exited.
    pub fn stdin(&self) -> Arc<InputHandle> {
        self.inner.stdin_handle()
    }

    pub fn user_data(&self) -> serde_json::Value {
        lock(&self.inner.user_data).clone()
    }

    /// Attach opaque data. The core never looks at it.
    pub fn set_user_data(&self, data: serde_json::Value) {
        *lock(&self.inner.user_data) = data;
    }

    /// Directory the command was started in; empty if it was not started or
    /// the directory could not be determined.
    pub fn start_wd(&self) -> String {
        self.inner.start_wd.get().cloned().unwrap_or_default()
    }

    /// Current working directory of the running process.
    pub fn cwd(&self) -> LushResult<String> {
        match *lock(&self.inner.lifecycle) {
            Lifecycle::Running { pid } => {
                platform::process_cwd(pid).map(|p| p.display().to_string())
            }
            Lifecycle::Preparation => Err(LushError::NotStarted),
            Lifecycle::Draining | Lifecycle::Done | Lifecycle::Released => {
                Err(LushError::AlreadyExited)
            }
        }
    }

    /// Deliver `sig` to the running process.
    pub fn signal(&self, sig: Signal) -> LushResult<()> {
        match *lock(&self.inner.lifecycle) {
            Lifecycle::Running { pid } => {
                debug!(cmd_id = %self.inner.id, pid, signal = %sig, "signalling command");
                platform::send_signal(pid, sig)
            }
            Lifecycle::Preparation => Err(LushError::NotStarted),
            Lifecycle::Draining | Lifecycle::Done | Lifecycle::Released => {
                Err(LushError::AlreadyExited)
            }
        }
    }

    /// Launch the process in the background.
    ///
    /// Returns once the process is running. If the executable cannot be
    /// launched, the error is also recorded on the status and the start time
    /// stays unset.
    pub fn start(&self) -> LushResult<()> {
        let inner = &self.inner;
        let mut lifecycle = lock(&inner.lifecycle);
        match *lifecycle {
            Lifecycle::Preparation => {}
            Lifecycle::Released => return Err(LushError::CommandNotFound(inner.id)),
            _ => return Err(LushError::AlreadyStarted),
        }
        let spec = lock(&inner.spec).clone();
        let (program, args) = spec.argv.split_first().ok_or(LushError::EmptyArgv)?;

        let mut cmd = std::process::Command::new(program);
        cmd.args(args)
            .env_clear()
            .envs(spec.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let start_wd = match &spec.start_dir {
            Some(dir) => {
                cmd.current_dir(dir);
                dir.display().to_string()
            }
            None => std::env::current_dir()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
        };
        let _ = inner.start_wd.set(start_wd);

        let (tx, rx) = mpsc::channel::<Child>();
        let launched = cmd.spawn().and_then(|child| {
            let supervisor = inner.clone();
            let spawned = thread::Builder::new()
                .name(format!("lush-cmd-{}", inner.id))
                .spawn(move || {
                    if let Ok(child) = rx.recv() {
                        supervisor.supervise(child);
                    }
                });
            match spawned {
                Ok(_) => Ok(child),
                Err(e) => {
                    let mut child = child;
                    let _ = child.kill();
                    let _ = child.wait();
                    Err(e)
                }
            }
        });

        let mut child = match launched {
            Ok(child) => child,
            Err(e) => {
                let err = LushError::launch(program.as_str(), e);
                warn!(cmd_id = %inner.id, error = %err, "command failed to launch");
                *lifecycle = Lifecycle::Draining;
                drop(lifecycle);
                inner.status.set_error(Some(err.clone()));
                inner.abandon("command failed to launch");
                *lock(&inner.lifecycle) = Lifecycle::Done;
                inner.done.release();
                return Err(err);
            }
        };

        let pid = child.id();
        if let Some(stdin) = child.stdin.take() {
            inner.stdin_handle().bind(stdin);
        }
        *lifecycle = Lifecycle::Running { pid };
        drop(lifecycle);

        inner.status.mark_started();
        info!(cmd_id = %inner.id, pid, argv = ?spec.argv, "command started");
        // The supervisor only exits the status after this point.
        let _ = tx.send(child);
        Ok(())
    }

    /// Block until the command has finished.
    ///
    /// Returns the command's recorded error, if any. Fails if the command was
    /// never started.
    pub fn wait(&self) -> LushResult<()> {
        match *lock(&self.inner.lifecycle) {
            Lifecycle::Preparation => return Err(LushError::NotStarted),
            Lifecycle::Released => return Err(LushError::CommandNotFound(self.inner.id)),
            Lifecycle::Running { .. } | Lifecycle::Draining | Lifecycle::Done => {}
        }
        self.inner.done.wait();
        match self.inner.status.err() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// [`Command::wait`] for async callers; blocks a worker thread, not the
    /// runtime.
    pub async fn wait_async(&self) -> LushResult<()> {
        let cmd = self.clone();
        tokio::task::spawn_blocking(move || cmd.wait())
            .await
            .map_err(|e| LushError::Other(format!("join error: {e}")))?
    }

    /// Start the command and wait for it to finish.
    pub fn run(&self) -> LushResult<()> {
        self.start()?;
        self.wait()
    }

    /// Detach from its session. Unstarted commands are torn down so anything
    /// waiting on them gets unblocked; running commands are refused.
    pub(crate) fn release(&self) -> LushResult<()> {
        let mut lifecycle = lock(&self.inner.lifecycle);
        match *lifecycle {
            Lifecycle::Running { .. } | Lifecycle::Draining => {
                Err(LushError::StillRunning(self.inner.id))
            }
            Lifecycle::Preparation => {
                *lifecycle = Lifecycle::Released;
                drop(lifecycle);
                self.inner.abandon("command released");
                Ok(())
            }
            Lifecycle::Done | Lifecycle::Released => Ok(()),
        }
    }

    /// Serializable summary for clients.
    pub fn metadata(&self) -> CommandMetadata {
        let argv = self.argv();
        let cwd = self.cwd().unwrap_or_else(|e| format!("<{e}>"));
        let stdout = self.stdout();
        let stderr = self.stderr();
        let snapshot = self.inner.status.snapshot();
        CommandMetadata {
            id: self.inner.id,
            name: self.name(),
            cmd: argv.first().cloned().unwrap_or_default(),
            args: argv.iter().skip(1).cloned().collect(),
            cwd,
            start_wd: self.start_wd(),
            status: StatusInfo {
                code: snapshot.code(),
                err: snapshot.err().map(|e| e.to_string()),
            },
            stdout_to: stdout.listener().and_then(|l| l.input_of()),
            stderr_to: stderr.listener().and_then(|l| l.input_of()),
            stdout_scrollback: stdout.scrollback().size(),
            stderr_scrollback: stderr.scrollback().size(),
            user_data: self.user_data(),
            stdout: String::from_utf8_lossy(&stdout.scrollback().contents()).into_owned(),
            stderr: String::from_utf8_lossy(&stderr.scrollback().contents()).into_owned(),
        }
    }
}

impl Inner {
    fn stdin_handle(&self) -> Arc<InputHandle> {
        lock(&self.stdin)
            .get_or_insert_with(|| Arc::new(InputHandle::new(self.id)))
            .clone()
    }

    /// Tear down the streams of a command that will never run.
    fn abandon(&self, reason: &'static str) {
        if let Some(stdin) = lock(&self.stdin).as_ref() {
            stdin.retire(reason);
        }
        self.close_outputs();
    }

    fn close_outputs(&self) {
        for (name, stream) in [("stdout", &self.stdout), ("stderr", &self.stderr)] {
            if let Err(e) = stream.close() {
                debug!(cmd_id = %self.id, stream = name, error = %e, "closing output stream failed");
            }
        }
    }

    /// Runs on the command's own thread: pump output, reap, record the exit.
    fn supervise(&self, mut child: Child) {
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let chunk = self.read_chunk_size;

        let (exit, stream_err) = thread::scope(|s| {
            let pumps = [
                stdout.map(|r| s.spawn(move || pump(r, &self.stdout, chunk))),
                stderr.map(|r| s.spawn(move || pump(r, &self.stderr, chunk))),
            ];
            let exit = child.wait();
            *lock(&self.lifecycle) = Lifecycle::Draining;

            let mut stream_err = None;
            for handle in pumps.into_iter().flatten() {
                let result = handle
                    .join()
                    .unwrap_or_else(|_| Err(io::Error::other("output pump panicked")));
                if let Err(e) = result {
                    stream_err.get_or_insert(e);
                }
            }
            (exit, stream_err)
        });

        self.close_outputs();
        if let Some(stdin) = lock(&self.stdin).as_ref() {
            stdin.retire("command exited");
        }

        let err = match exit {
            Ok(status) => exit_error(status).or_else(|| stream_err.map(LushError::stream)),
            Err(e) => Some(LushError::from(e)),
        };
        match &err {
            Some(e) => info!(cmd_id = %self.id, error = %e, "command exited with error"),
            None => info!(cmd_id = %self.id, "command exited"),
        }
        self.status.mark_exited(err);
        *lock(&self.lifecycle) = Lifecycle::Done;
        self.done.release();
    }
}

/// Copy process output into its stream until end of file or a write error.
/// Returning drops the read end, so a process whose output is refused gets
/// a broken pipe instead of blocking forever.
fn pump(mut reader: impl Read, stream: &StreamPipe, chunk: usize) -> io::Result<()> {
    let mut buf = vec![0u8; chunk];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        write_all(stream, &buf[..n])?;
    }
}

fn exit_error(status: ExitStatus) -> Option<LushError> {
    if status.success() {
        return None;
    }
    if let Some(code) = status.code() {
        return Some(LushError::Exit { code });
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return Some(LushError::Killed { signal });
        }
    }
    Some(LushError::Other(format!("abnormal exit: {status}")))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::sink::{BufferSink, Sink};
    use crate::status::StatusCode;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn cmd(id: u64, argv: &[&str]) -> Command {
        Command::new(
            CmdId(id),
            argv.iter().map(|s| s.to_string()).collect(),
            std::env::vars().collect(),
            &SessionConfig::default(),
        )
    }

    #[test]
    fn captures_output() {
        let c = cmd(0, &["echo", "look,", "unicode   smiley:", "😬"]);
        let out = BufferSink::new();
        c.stdout().set_listener(out.clone());
        c.run().unwrap();
        assert!(c.status().success());
        assert_eq!(c.status().code(), StatusCode::ExitedSuccess);
        assert_eq!(out.text(), "look, unicode   smiley: 😬\n");
    }

    #[test]
    fn hello_world() {
        let c = cmd(0, &["echo", "hello, world"]);
        let out = BufferSink::new();
        c.stdout().set_listener(out.clone());
        c.run().unwrap();
        assert_eq!(out.contents(), b"hello, world\n");
    }

    #[test]
    fn scrollback_kept_without_listener() {
        let c = cmd(0, &["echo", "nobody listens"]);
        c.run().unwrap();
        assert_eq!(c.stdout().scrollback().contents(), b"nobody listens\n");
    }

    #[test]
    fn stderr_is_separate() {
        let c = cmd(0, &["sh", "-c", "echo out; echo err >&2"]);
        let out = BufferSink::new();
        let err = BufferSink::new();
        c.stdout().set_listener(out.clone());
        c.stderr().set_listener(err.clone());
        c.run().unwrap();
        assert_eq!(out.text(), "out\n");
        assert_eq!(err.text(), "err\n");
    }

    /// Blocks every write until `open` is set.
    struct Gate {
        open: AtomicBool,
        got_write: AtomicBool,
        buf: BufferSink,
    }

    impl Sink for Gate {
        fn write(&self, data: &[u8]) -> io::Result<usize> {
            self.got_write.store(true, Ordering::SeqCst);
            while !self.open.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(5));
            }
            self.buf.write(data)
        }
    }

    #[test]
    fn blocked_listener_holds_back_completion() {
        let c = cmd(0, &["echo", "bla", "bla", "bla"]);
        let gate = Arc::new(Gate {
            open: AtomicBool::new(false),
            got_write: AtomicBool::new(false),
            buf: BufferSink::default(),
        });
        c.stdout().set_listener(gate.clone());
        c.start().unwrap();

        while !gate.got_write.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(5));
        }
        let waiter = {
            let c = c.clone();
            thread::spawn(move || c.wait())
        };
        thread::sleep(Duration::from_millis(100));
        assert!(!waiter.is_finished(), "wait returned while output was blocked");
        gate.open.store(true, Ordering::SeqCst);
        waiter.join().unwrap().unwrap();
        assert_eq!(gate.buf.text(), "bla bla bla\n");
    }

    #[test]
    fn reaped_command_is_not_released_while_output_drains() {
        let c = cmd(0, &["echo", "hi"]);
        let gate = Arc::new(Gate {
            open: AtomicBool::new(false),
            got_write: AtomicBool::new(false),
            buf: BufferSink::default(),
        });
        c.stdout().set_listener(gate.clone());
        c.start().unwrap();

        // echo exits right away; its output is still stuck in the listener.
        let mut waited = Duration::ZERO;
        while !matches!(c.cwd(), Err(LushError::AlreadyExited)) {
            assert!(waited < Duration::from_secs(10), "process was never reaped");
            thread::sleep(Duration::from_millis(5));
            waited += Duration::from_millis(5);
        }
        assert!(matches!(c.release(), Err(LushError::StillRunning(_))));
        assert!(matches!(c.signal(Signal::Terminate), Err(LushError::AlreadyExited)));
        assert!(c.status().exited().is_none());
        assert_eq!(c.status().code(), StatusCode::Running);

        gate.open.store(true, Ordering::SeqCst);
        c.wait().unwrap();
        assert!(c.status().exited().is_some());
        assert_eq!(gate.buf.text(), "hi\n");
        c.release().unwrap();
    }

    #[test]
    fn pipeline_reproduces_output() {
        const LEN: usize = 10;
        // `>` must reach echo verbatim: no shell in between.
        let mut cmds = vec![cmd(0, &["echo", "batman", ">", "superman"])];
        for i in 1..LEN {
            let next = cmd(i as u64, &["cat"]);
            cmds[i - 1].stdout().set_listener(next.stdin());
            cmds.push(next);
        }
        let out = BufferSink::new();
        cmds[LEN - 1].stdout().set_listener(out.clone());
        for c in &cmds {
            c.start().unwrap();
        }
        for c in &cmds {
            c.wait().unwrap();
        }
        assert_eq!(out.text(), "batman > superman\n");
    }

    #[test]
    fn pipeline_started_downstream_first() {
        let producer = cmd(0, &["echo", "reversed"]);
        let consumer = cmd(1, &["cat"]);
        producer.stdout().set_listener(consumer.stdin());
        let out = BufferSink::new();
        consumer.stdout().set_listener(out.clone());
        consumer.start().unwrap();
        producer.start().unwrap();
        producer.wait().unwrap();
        consumer.wait().unwrap();
        assert_eq!(out.text(), "reversed\n");
    }

    #[test]
    fn large_output_through_pipeline_with_backpressure() {
        let producer = cmd(0, &["sh", "-c", "i=0; while [ $i -lt 2000 ]; do echo line $i; i=$((i+1)); done"]);
        let middle = cmd(1, &["cat"]);
        producer.stdout().set_listener(middle.stdin());
        let out = BufferSink::new();
        middle.stdout().set_listener(out.clone());
        producer.start().unwrap();
        middle.start().unwrap();
        producer.wait().unwrap();
        middle.wait().unwrap();
        let text = out.text();
        assert_eq!(text.lines().count(), 2000);
        assert!(text.ends_with("line 1999\n"));
    }

    #[test]
    fn nonexistent_executable() {
        let c = cmd(0, &["cecinestpasuncommand"]);
        assert!(matches!(c.start(), Err(LushError::Launch { .. })));
        assert!(c.status().started().is_none());
        assert!(c.status().err().is_some());
        assert!(c.wait().is_err());

        let c = cmd(0, &["cecinestpasuncommand"]);
        assert!(c.run().is_err());
        assert!(c.wait().is_err());
    }

    #[test]
    fn dead_downstream_does_not_hang_producer() {
        let producer = cmd(0, &["echo", "hello"]);
        let consumer = cmd(1, &["nonexistingcmd"]);
        producer.stdout().set_listener(consumer.stdin());
        producer.start().unwrap();
        assert!(consumer.start().is_err());
        // The write fails, but the producer must still finish.
        let _ = producer.wait();
        assert!(producer.status().exited().is_some());
    }

    #[test]
    fn illegal_api_use() {
        let c = cmd(0, &["echo"]);
        assert!(matches!(c.wait(), Err(LushError::NotStarted)));
        assert!(matches!(c.signal(Signal::Interrupt), Err(LushError::NotStarted)));
        c.start().unwrap();
        assert!(matches!(
            c.set_argv(vec!["echo".into(), "mosterd".into()]),
            Err(LushError::ArgvFrozen(_))
        ));
        assert!(matches!(c.start(), Err(LushError::AlreadyStarted)));
        c.wait().unwrap();
        assert!(matches!(c.signal(Signal::Kill), Err(LushError::AlreadyExited)));
    }

    #[test]
    fn nonzero_exit_is_runtime_error() {
        let c = cmd(0, &["sh", "-c", "exit 3"]);
        assert!(matches!(c.run(), Err(LushError::Exit { code: 3 })));
        assert!(c.status().started().is_some());
        assert!(c.status().exited().is_some());
        assert_eq!(c.status().code(), StatusCode::ExitedFailure);
    }

    #[test]
    fn signal_terminates_running_command() {
        let c = cmd(0, &["sleep", "10"]);
        c.start().unwrap();
        c.signal(Signal::Kill).unwrap();
        match c.wait() {
            Err(LushError::Killed { signal }) => assert_eq!(signal, libc::SIGKILL),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn stdin_written_before_start() {
        let c = cmd(0, &["cat"]);
        let out = BufferSink::new();
        c.stdout().set_listener(out.clone());
        let stdin = c.stdin();
        let writer = thread::spawn(move || {
            crate::sink::write_all(stdin.as_ref(), b"early bird")?;
            stdin.close()
        });
        thread::sleep(Duration::from_millis(50));
        c.start().unwrap();
        writer.join().unwrap().unwrap();
        c.wait().unwrap();
        assert_eq!(out.text(), "early bird");
        assert!(c.stdin().write(b"too late").is_err());
    }

    #[test]
    fn start_dir_is_used_and_reported() {
        let dir = tempfile::tempdir().unwrap();
        let c = cmd(0, &["pwd"]);
        c.set_start_dir(dir.path()).unwrap();
        let out = BufferSink::new();
        c.stdout().set_listener(out.clone());
        c.run().unwrap();
        let expected = dir.path().canonicalize().unwrap();
        let got = PathBuf::from(out.text().trim_end()).canonicalize().unwrap();
        assert_eq!(got, expected);
        assert_eq!(c.start_wd(), dir.path().display().to_string());
    }

    #[test]
    fn start_wd_defaults_to_current_dir() {
        let c = cmd(0, &["true"]);
        assert_eq!(c.start_wd(), "");
        c.run().unwrap();
        let here = std::env::current_dir().unwrap();
        assert_eq!(c.start_wd(), here.display().to_string());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn cwd_of_running_command() {
        let dir = tempfile::tempdir().unwrap();
        let c = cmd(0, &["sleep", "1"]);
        c.set_start_dir(dir.path()).unwrap();
        assert!(c.cwd().is_err());
        c.start().unwrap();
        let live = PathBuf::from(c.cwd().unwrap());
        c.wait().unwrap();
        assert_eq!(live, dir.path().canonicalize().unwrap());
        assert!(c.cwd().is_err());
    }

    #[test]
    fn name_defaults_to_argv0() {
        let c = cmd(0, &["echo", "x"]);
        assert_eq!(c.name(), "echo");
        c.set_name("greeter");
        assert_eq!(c.name(), "greeter");
    }

    #[test]
    fn metadata_reports_pipe_target_and_output() {
        let producer = cmd(4, &["echo", "meta"]);
        let consumer = cmd(5, &["cat"]);
        producer.stdout().set_listener(consumer.stdin());
        producer.set_user_data(serde_json::json!({"tab": 2}));
        consumer.start().unwrap();
        producer.run().unwrap();
        consumer.wait().unwrap();

        let meta = producer.metadata();
        assert_eq!(meta.stdout_to, Some(CmdId(5)));
        assert_eq!(meta.stderr_to, None);
        assert_eq!(meta.stdout, "meta\n");
        assert_eq!(meta.status.code, StatusCode::ExitedSuccess);
        assert_eq!(meta.user_data["tab"], 2);
        assert!(meta.cwd.starts_with('<'));

        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["id"], 4);
        assert_eq!(json["status"]["code"], 2);
    }

    #[tokio::test]
    async fn wait_async_resolves_after_exit() {
        let c = cmd(0, &["echo", "async"]);
        let out = BufferSink::new();
        c.stdout().set_listener(out.clone());
        c.start().unwrap();
        c.wait_async().await.unwrap();
        assert_eq!(out.text(), "async\n");
    }

    #[test]
    fn cmd_id_parses() {
        assert_eq!(" 42 ".parse::<CmdId>().unwrap(), CmdId(42));
        assert!("x".parse::<CmdId>().is_err());
        assert_eq!(CmdId(9).to_string(), "9");
    }
}
