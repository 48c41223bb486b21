//! Session-managed backend worker.
//!
//! ```text
//! DOWN --start--> UP --submit--> BUSY --done--> UP --idle>=T--> DOWN
//!                  ^                                             |
//!                  |__________________restart____________________|
//! ```
//!
//! Submissions are served strictly in arrival order. A supervisor thread
//! shuts an idle session down once nothing has been submitted for the
//! auto-stop period.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Child;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{BackendError, Result};
use crate::session::{Session, kill_and_reap};

/// Floor for the supervisor's polling interval.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Ppm,
    Drex,
    Idyom,
}

impl BackendKind {
    pub const ALL: [BackendKind; 3] = [BackendKind::Ppm, BackendKind::Drex, BackendKind::Idyom];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Ppm => "ppm",
            BackendKind::Drex => "drex",
            BackendKind::Idyom => "idyom",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "ppm" => Some(BackendKind::Ppm),
            "drex" => Some(BackendKind::Drex),
            "idyom" => Some(BackendKind::Idyom),
            _ => None,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    Down,
    Up,
    Busy,
}

#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub command: Vec<String>,
    pub runtime_root: Option<PathBuf>,
    pub auto_stop: Duration,
    pub min_poll: Duration,
}

impl WorkerConfig {
    pub fn new(command: Vec<String>, auto_stop: Duration) -> Self {
        Self {
            command,
            runtime_root: None,
            auto_stop,
            min_poll: MIN_POLL_INTERVAL,
        }
    }

    /// `max(auto_stop / 5, min_poll)`
    pub fn poll_interval(&self) -> Duration {
        (self.auto_stop / 5).max(self.min_poll)
    }
}

struct Inner {
    state: WorkerState,
    /// Held here while UP; taken by the submitting thread while BUSY.
    session: Option<Session>,
    /// Kill handle of the live child, present in both UP and BUSY.
    child: Option<Arc<Mutex<Child>>>,
    last_activity: Instant,
    /// Bumped whenever the session is torn down, so in-flight callers can
    /// tell their session was replaced.
    generation: u64,
    supervised: bool,
}

pub struct Worker {
    name: String,
    config: WorkerConfig,
    inner: Mutex<Inner>,
    work: AtomicUsize,
    next_ticket: AtomicU64,
    serving: Mutex<u64>,
    turn: Condvar,
    this: Weak<Worker>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Guards
// ---------------------------------------------------------------------------

/// Decrements the work counter on every exit path.
struct WorkGuard<'a>(&'a AtomicUsize);

impl Drop for WorkGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Hands the turn to the next ticket when dropped.
struct TurnGuard<'a> {
    serving: &'a Mutex<u64>,
    turn: &'a Condvar,
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        *lock(self.serving) += 1;
        self.turn.notify_all();
    }
}

impl Worker {
    pub fn new(name: impl Into<String>, config: WorkerConfig) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: WorkerState::Down,
                session: None,
                child: None,
                last_activity: Instant::now(),
                generation: 0,
                supervised: false,
            }),
            work: AtomicUsize::new(0),
            next_ticket: AtomicU64::new(0),
            serving: Mutex::new(0),
            turn: Condvar::new(),
            this: this.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn state(&self) -> WorkerState {
        lock(&self.inner).state
    }

    /// Submissions currently queued or running.
    pub fn work_count(&self) -> usize {
        self.work.load(Ordering::SeqCst)
    }

    pub fn generation(&self) -> u64 {
        lock(&self.inner).generation
    }

    /// Bring the session UP if it is DOWN.
    pub fn start(&self) -> Result<()> {
        let mut inner = lock(&self.inner);
        self.start_locked(&mut inner)
    }

    fn start_locked(&self, inner: &mut Inner) -> Result<()> {
        if inner.state != WorkerState::Down {
            return Ok(());
        }
        let session = Session::spawn(&self.config.command, self.config.runtime_root.as_deref())?;
        inner.child = Some(session.child_handle());
        inner.session = Some(session);
        inner.state = WorkerState::Up;
        inner.last_activity = Instant::now();
        tracing::info!(backend = %self.name, "backend up");
        if !inner.supervised {
            inner.supervised = self.spawn_supervisor();
        }
        Ok(())
    }

    /// Tear the session down. An in-flight submission fails with `Restarted`.
    pub fn stop(&self) {
        let mut inner = lock(&self.inner);
        self.stop_locked(&mut inner, "stop requested");
    }

    fn stop_locked(&self, inner: &mut Inner, reason: &str) {
        if inner.state == WorkerState::Down {
            return;
        }
        inner.generation += 1;
        match inner.session.take() {
            Some(session) => session.shutdown(),
            None => {
                // BUSY: the submitting thread owns the pipes; killing the
                // child unblocks it
                if let Some(child) = &inner.child {
                    kill_and_reap(&mut lock(child));
                }
            }
        }
        inner.child = None;
        inner.state = WorkerState::Down;
        tracing::info!(backend = %self.name, reason, "backend down");
    }

    /// Replace the session with a fresh one.
    pub fn restart(&self) -> Result<()> {
        let mut inner = lock(&self.inner);
        self.stop_locked(&mut inner, "restart");
        self.start_locked(&mut inner)
    }

    /// Submit one instructions file and block until its results path is known.
    ///
    /// Callers queue in arrival order. The work counter covers the whole
    /// call, including time spent queued.
    pub fn run(&self, instructions: &Path) -> Result<PathBuf> {
        self.work.fetch_add(1, Ordering::SeqCst);
        let _work = WorkGuard(&self.work);

        let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst);
        let mut serving = lock(&self.serving);
        while *serving != ticket {
            serving = self
                .turn
                .wait(serving)
                .unwrap_or_else(PoisonError::into_inner);
        }
        drop(serving);
        let _turn = TurnGuard {
            serving: &self.serving,
            turn: &self.turn,
        };

        let (mut session, generation) = {
            let mut inner = lock(&self.inner);
            self.start_locked(&mut inner)?;
            let Some(session) = inner.session.take() else {
                return Err(BackendError::NotReady("session unavailable".into()));
            };
            inner.state = WorkerState::Busy;
            (session, inner.generation)
        };
        tracing::debug!(backend = %self.name, path = %instructions.display(), "submitting");

        let outcome = session.submit(instructions);

        let mut inner = lock(&self.inner);
        if inner.generation != generation {
            // replaced while we were blocked; our child is already dead
            session.shutdown();
            return Err(BackendError::Restarted);
        }
        inner.last_activity = Instant::now();
        match outcome {
            Ok(path) => {
                inner.session = Some(session);
                inner.state = WorkerState::Up;
                Ok(path)
            }
            Err(e) => {
                // drop the session so the next call starts a fresh one
                inner.generation += 1;
                inner.child = None;
                inner.state = WorkerState::Down;
                drop(inner);
                session.shutdown();
                tracing::warn!(backend = %self.name, error = %e, "submission failed; session dropped");
                Err(e)
            }
        }
    }

    /// Returns whether a supervisor is now running.
    fn spawn_supervisor(&self) -> bool {
        let weak = self.this.clone();
        let poll = self.config.poll_interval();
        match thread::Builder::new()
            .name(format!("{}-supervisor", self.name))
            .spawn(move || supervise(weak, poll))
        {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(backend = %self.name, error = %e, "could not start idle supervisor");
                false
            }
        }
    }

    /// One supervisor tick. Returns `false` once the supervisor should exit.
    fn check_idle(&self) -> bool {
        let mut inner = lock(&self.inner);
        match inner.state {
            WorkerState::Down => {
                inner.supervised = false;
                false
            }
            WorkerState::Busy => true,
            WorkerState::Up => {
                if self.work.load(Ordering::SeqCst) == 0
                    && inner.last_activity.elapsed() >= self.config.auto_stop
                {
                    self.stop_locked(&mut inner, "idle");
                    inner.supervised = false;
                    return false;
                }
                true
            }
        }
    }
}

fn supervise(worker: Weak<Worker>, poll: Duration) {
    loop {
        thread::sleep(poll);
        let Some(worker) = worker.upgrade() else {
            return;
        };
        if !worker.check_idle() {
            return;
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(session) = inner.session.take() {
            session.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".into(), "-c".into(), script.into()]
    }

    fn echo_worker(delay: &str, auto_stop: Duration) -> Arc<Worker> {
        let script = format!(r#"echo ready; while read p; do sleep {delay}; echo "ok $p.out"; done"#);
        let mut config = WorkerConfig::new(sh(&script), auto_stop);
        config.min_poll = Duration::from_millis(50);
        Worker::new("test", config)
    }

    fn wait_for(worker: &Worker, state: WorkerState, within: Duration) -> bool {
        let deadline = Instant::now() + within;
        while Instant::now() < deadline {
            if worker.state() == state {
                return true;
            }
            thread::sleep(Duration::from_millis(20));
        }
        false
    }

    #[test]
    fn test_poll_interval() {
        let c = WorkerConfig::new(vec![], Duration::from_secs(60));
        assert_eq!(c.poll_interval(), Duration::from_secs(12));
        let c = WorkerConfig::new(vec![], Duration::from_secs(2));
        assert_eq!(c.poll_interval(), MIN_POLL_INTERVAL);
    }

    #[test]
    fn test_lazy_start_and_run() {
        let w = echo_worker("0", Duration::from_secs(60));
        assert_eq!(w.state(), WorkerState::Down);
        let out = w.run(Path::new("/tmp/job")).unwrap();
        assert_eq!(out, PathBuf::from("/tmp/job.out"));
        assert_eq!(w.state(), WorkerState::Up);
        assert_eq!(w.work_count(), 0);
        w.stop();
        assert_eq!(w.state(), WorkerState::Down);
    }

    #[test]
    fn test_idle_auto_stop() {
        let w = echo_worker("0", Duration::from_millis(200));
        w.run(Path::new("a")).unwrap();
        assert!(wait_for(&w, WorkerState::Down, Duration::from_secs(3)));
        // comes back on demand
        w.run(Path::new("b")).unwrap();
        assert_eq!(w.state(), WorkerState::Up);
    }

    #[test]
    fn test_busy_session_is_not_stopped() {
        let w = echo_worker("0.6", Duration::from_millis(100));
        w.run(Path::new("a")).unwrap();
        let w2 = Arc::clone(&w);
        let h = thread::spawn(move || w2.run(Path::new("long")));
        thread::sleep(Duration::from_millis(300));
        assert_eq!(w.state(), WorkerState::Busy);
        assert!(h.join().unwrap().is_ok());
    }

    #[test]
    fn test_fifo_order() {
        let w = echo_worker("0.05", Duration::from_secs(60));
        w.start().unwrap();
        let (tx, rx) = mpsc::channel();
        let mut handles = Vec::new();
        for i in 0..5 {
            let w = Arc::clone(&w);
            let tx = tx.clone();
            handles.push(thread::spawn(move || {
                let out = w.run(Path::new(&format!("job{i}"))).unwrap();
                tx.send(out).unwrap();
            }));
            thread::sleep(Duration::from_millis(15));
        }
        drop(tx);
        for h in handles {
            h.join().unwrap();
        }
        let order: Vec<PathBuf> = rx.iter().collect();
        let expected: Vec<PathBuf> = (0..5).map(|i| PathBuf::from(format!("job{i}.out"))).collect();
        assert_eq!(order, expected);
        assert_eq!(w.work_count(), 0);
    }

    #[test]
    fn test_failure_releases_work_and_drops_session() {
        let mut config = WorkerConfig::new(sh("echo ready; read p; echo \"err boom\""), Duration::from_secs(60));
        config.min_poll = Duration::from_millis(50);
        let w = Worker::new("failing", config);
        match w.run(Path::new("x")) {
            Err(BackendError::Failed(msg)) => assert_eq!(msg, "boom"),
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(w.work_count(), 0);
        assert_eq!(w.state(), WorkerState::Down);
        // a fresh session is started for the next call
        assert!(matches!(w.run(Path::new("y")), Err(BackendError::Failed(_))));
    }

    #[test]
    fn test_not_ready_leaves_worker_down() {
        let w = Worker::new("broken", WorkerConfig::new(sh("exit 2"), Duration::from_secs(1)));
        assert!(matches!(
            w.run(Path::new("x")),
            Err(BackendError::NotReady(_))
        ));
        assert_eq!(w.state(), WorkerState::Down);
        assert_eq!(w.work_count(), 0);
    }

    #[test]
    fn test_restart_fails_in_flight_submission() {
        let w = echo_worker("1.5", Duration::from_secs(60));
        w.start().unwrap();
        let before = w.generation();
        let w2 = Arc::clone(&w);
        let h = thread::spawn(move || w2.run(Path::new("slow")));
        assert!(wait_for(&w, WorkerState::Busy, Duration::from_secs(2)));
        w.restart().unwrap();
        assert!(matches!(h.join().unwrap(), Err(BackendError::Restarted)));
        assert!(w.generation() > before);
        assert_eq!(w.state(), WorkerState::Up);
        assert_eq!(w.work_count(), 0);
    }
}
