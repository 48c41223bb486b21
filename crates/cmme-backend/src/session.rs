//! One long-lived child process speaking the line protocol.
//!
//! The child prints `ready` once, then answers every instructions path
//! written to its stdin with `ok <results path>` or `err <message>`.

use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use cmme_store::RUNTIME_ROOT_ENV;

use crate::error::{BackendError, Result};

pub const READY: &str = "ready";
pub const OK_PREFIX: &str = "ok ";
pub const ERR_PREFIX: &str = "err ";

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

pub struct Session {
    child: Arc<Mutex<Child>>,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    pid: u32,
}

impl Session {
    /// Launch `command` and block until it announces readiness.
    pub fn spawn(command: &[String], runtime_root: Option<&Path>) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| BackendError::NotReady("empty command".into()))?;
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        if let Some(root) = runtime_root {
            cmd.env(RUNTIME_ROOT_ENV, root);
        }
        let mut child = cmd
            .spawn()
            .map_err(|e| BackendError::NotReady(format!("{program}: {e}")))?;
        let pid = child.id();

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            kill_and_reap(&mut child);
            return Err(BackendError::NotReady("child pipes unavailable".into()));
        };
        let mut stdout = BufReader::new(stdout);
        let mut line = String::new();
        match stdout.read_line(&mut line) {
            Ok(n) if n > 0 && line.trim() == READY => {}
            Ok(0) => {
                kill_and_reap(&mut child);
                return Err(BackendError::NotReady(format!(
                    "{program} exited before it was ready"
                )));
            }
            Ok(_) => {
                kill_and_reap(&mut child);
                return Err(BackendError::NotReady(format!(
                    "unexpected greeting {:?}",
                    line.trim()
                )));
            }
            Err(e) => {
                kill_and_reap(&mut child);
                return Err(BackendError::NotReady(format!("reading greeting: {e}")));
            }
        }
        tracing::info!(pid, program = %program, "session started");
        Ok(Self {
            child: Arc::new(Mutex::new(child)),
            stdin,
            stdout,
            pid,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Shared handle so another thread can kill a child blocked in `submit`.
    pub fn child_handle(&self) -> Arc<Mutex<Child>> {
        Arc::clone(&self.child)
    }

    /// Send one instructions path and wait for the reply.
    pub fn submit(&mut self, instructions: &Path) -> Result<PathBuf> {
        writeln!(self.stdin, "{}", instructions.display())
            .and_then(|_| self.stdin.flush())
            .map_err(|e| BackendError::Failed(format!("writing to session: {e}")))?;

        let mut line = String::new();
        let n = self
            .stdout
            .read_line(&mut line)
            .map_err(|e| BackendError::Failed(format!("reading from session: {e}")))?;
        if n == 0 {
            return Err(BackendError::Failed("session exited mid-job".into()));
        }
        let line = line.trim_end();
        if let Some(path) = line.strip_prefix(OK_PREFIX) {
            Ok(PathBuf::from(path.trim()))
        } else if let Some(msg) = line.strip_prefix(ERR_PREFIX) {
            Err(BackendError::Failed(msg.trim().to_string()))
        } else {
            Err(BackendError::Failed(format!("unexpected reply {line:?}")))
        }
    }

    /// Close stdin and wait briefly for a clean exit, then kill.
    pub fn shutdown(self) {
        let Session {
            child, stdin, pid, ..
        } = self;
        drop(stdin);
        let mut child = child.lock().unwrap_or_else(PoisonError::into_inner);
        let deadline = Instant::now() + SHUTDOWN_GRACE;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    tracing::info!(pid, %status, "session stopped");
                    return;
                }
                Ok(None) if Instant::now() < deadline => thread::sleep(Duration::from_millis(20)),
                _ => break,
            }
        }
        kill_and_reap(&mut child);
        tracing::info!(pid, "session killed after grace period");
    }
}

pub(crate) fn kill_and_reap(child: &mut Child) {
    if let Err(e) = child.kill() {
        tracing::debug!(error = %e, "kill failed; child already gone");
    }
    let _ = child.wait();
}
