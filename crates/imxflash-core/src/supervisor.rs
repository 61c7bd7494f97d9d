//! Flashing script supervision
//!
//! A [`Supervisor`] runs at most one flashing script at a time. Each job
//! gets a worker thread that spawns the script, relays its stdout line by
//! line to an [`OutputSink`], waits for it to exit and decides the
//! [`RunOutcome`]. The caller's thread only ever claims the supervisor,
//! reads state and sends signals, so it never blocks on the script.
//!
//! ```text
//!          start()                 exit 0
//!   Idle ──────────► Running ──────────────► Completed
//!    ▲                  │  │      exit != 0
//!    │                  │  └────────────────► Failed
//!    │                  │ cancel()
//!    │                  └───────────────────► Cancelled
//!    └──────── any terminal state accepts a new start() ───────┘
//! ```
//!
//! # Cancellation
//!
//! [`Supervisor::cancel`] sends SIGTERM to the script's process group and
//! returns immediately. The script may take as long as it likes to exit;
//! once a cancel has been signalled the job ends as
//! [`RunOutcome::Cancelled`] whatever its exit code.
//!
//! The worker detaches the child from the cancel path before reaping it,
//! under the same lock `cancel()` takes, so a signal is never sent to a
//! process id that has already been recycled.
//!
//! # Output
//!
//! Stdout and stderr are read on their own threads while the worker waits
//! for the script. The outcome is fixed when the script exits, even if a
//! background process it left behind still holds the pipes; such late
//! output is only waited for during [`OUTPUT_GRACE`]. A sink that panics
//! stops receiving lines but the script keeps being supervised.

use crate::command::FlashCommand;
use crate::error::{FlashError, Result};
use crate::job::FlashJob;
use crate::sink::OutputSink;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::fmt;
use std::io::{self, BufRead, BufReader, Read};
use std::os::unix::process::ExitStatusExt;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::process::{Child, ExitStatus};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// How long output may keep arriving after the script has exited
pub const OUTPUT_GRACE: Duration = Duration::from_millis(500);

// =============================================================================
// States and outcomes
// =============================================================================

/// Lifecycle state of a supervisor or of a single job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum JobState {
    /// Nothing has run yet
    Idle = 0,
    /// A script is running
    Running = 1,
    /// The last script exited with code 0
    Completed = 2,
    /// The last script exited with a non-zero code
    Failed = 3,
    /// The last script was cancelled
    Cancelled = 4,
}

impl JobState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Running,
            2 => Self::Completed,
            3 => Self::Failed,
            4 => Self::Cancelled,
            _ => Self::Idle,
        }
    }

    /// Whether this is one of the end states of a job
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// How a flash job ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The script exited with code 0
    Success,
    /// The script exited with a non-zero code
    Failure {
        /// Exit code (`128 + signal` if the script was killed by a signal)
        code: i32,
        /// Everything the script wrote to stderr, trailing whitespace removed
        stderr: String,
    },
    /// The job was cancelled by the operator
    Cancelled,
}

impl RunOutcome {
    /// Terminal state matching this outcome
    pub fn state(&self) -> JobState {
        match self {
            Self::Success => JobState::Completed,
            Self::Failure { .. } => JobState::Failed,
            Self::Cancelled => JobState::Cancelled,
        }
    }

    /// Whether the board was flashed
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Turn a failed run into [`FlashError::ProcessExit`]
    pub fn into_result(self) -> Result<Self> {
        match self {
            Self::Failure { code, stderr } => Err(FlashError::ProcessExit { code, stderr }),
            other => Ok(other),
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "Board flashed successfully"),
            Self::Failure { code, .. } => {
                write!(f, "Failed to flash the board (exit code {})", code)
            }
            Self::Cancelled => write!(f, "Flashing process cancelled"),
        }
    }
}

/// Result of a cancel request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelStatus {
    /// The script was sent a termination signal
    Signalled,
    /// No script was running
    NothingToCancel,
}

impl fmt::Display for CancelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Signalled => write!(f, "Cancelling flashing process"),
            Self::NothingToCancel => write!(f, "No flashing process to cancel"),
        }
    }
}

// =============================================================================
// Shared state
// =============================================================================

#[derive(Debug)]
struct StateCell(AtomicU8);

impl StateCell {
    fn new(state: JobState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    fn load(&self) -> JobState {
        JobState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn store(&self, state: JobState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Move from any non-running state to `Running`
    fn try_claim(&self) -> bool {
        let running = JobState::Running as u8;
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            if current == running {
                return false;
            }
            match self
                .0
                .compare_exchange_weak(current, running, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }
}

/// The live child as seen by `cancel()`
#[derive(Debug)]
struct ActiveChild {
    job_id: u64,
    pgid: Pid,
    cancel_requested: bool,
}

#[derive(Debug)]
struct Shared {
    state: StateCell,
    active: Mutex<Option<ActiveChild>>,
    next_job: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn active(&self) -> MutexGuard<'_, Option<ActiveChild>> {
        lock(&self.active)
    }

    /// Signal the running child, or only the given job's child
    fn cancel(&self, job_id: Option<u64>) -> CancelStatus {
        let mut active = self.active();
        let child = match active.as_mut() {
            Some(child) if job_id.map_or(true, |id| id == child.job_id) => child,
            _ => return CancelStatus::NothingToCancel,
        };

        child.cancel_requested = true;
        match killpg(child.pgid, Signal::SIGTERM) {
            Ok(()) => log::info!(
                "Sent SIGTERM to flashing job {} (process group {})",
                child.job_id,
                child.pgid
            ),
            Err(e) => log::warn!("Failed to signal flashing job {}: {}", child.job_id, e),
        }
        CancelStatus::Signalled
    }
}

// =============================================================================
// Supervisor
// =============================================================================

/// Runs the flashing script, one job at a time
///
/// Clones share the same state, so a clone can be handed to a signal
/// handler or another thread to cancel the running job.
#[derive(Debug, Clone)]
pub struct Supervisor {
    script: PathBuf,
    shared: Arc<Shared>,
}

impl Supervisor {
    /// Create an idle supervisor for the given script
    pub fn new(script: impl Into<PathBuf>) -> Self {
        Self {
            script: script.into(),
            shared: Arc::new(Shared {
                state: StateCell::new(JobState::Idle),
                active: Mutex::new(None),
                next_job: AtomicU64::new(1),
            }),
        }
    }

    /// Script this supervisor runs
    pub fn script(&self) -> &Path {
        &self.script
    }

    /// Current state; terminal states describe the most recent job
    pub fn state(&self) -> JobState {
        self.shared.state.load()
    }

    /// Whether a job is in flight
    pub fn is_running(&self) -> bool {
        self.state() == JobState::Running
    }

    /// Start flashing `job`, delivering output to `sink`
    ///
    /// Returns once the script has been spawned. Fails with
    /// [`FlashError::AlreadyRunning`] if a job is in flight (that job is
    /// left alone) and with [`FlashError::Spawn`] if the script could not
    /// be started, in which case the supervisor is idle again.
    pub fn start<S>(&self, job: FlashJob, sink: S) -> Result<JobHandle>
    where
        S: OutputSink + 'static,
    {
        if !self.shared.state.try_claim() {
            return Err(FlashError::AlreadyRunning);
        }

        let job_id = self.shared.next_job.fetch_add(1, Ordering::Relaxed);
        let command = FlashCommand::build(&job, &self.script);
        log::info!("Starting flash job {}: {}", job_id, command);

        let job_state = Arc::new(StateCell::new(JobState::Running));
        let (spawned_tx, spawned_rx) = mpsc::sync_channel::<Result<()>>(1);

        let shared = Arc::clone(&self.shared);
        let worker_state = Arc::clone(&job_state);
        let worker = thread::Builder::new()
            .name(format!("flash-job-{}", job_id))
            .spawn(move || {
                let child = match spawn_child(&shared, job_id, &command) {
                    Ok(child) => {
                        let _ = spawned_tx.send(Ok(()));
                        child
                    }
                    Err(e) => {
                        worker_state.store(JobState::Idle);
                        shared.state.store(JobState::Idle);
                        let _ = spawned_tx.send(Err(e));
                        return None;
                    }
                };

                Some(supervise(&shared, job_id, child, sink, &worker_state))
            });

        let worker = match worker {
            Ok(worker) => worker,
            Err(e) => {
                self.shared.state.store(JobState::Idle);
                return Err(FlashError::Io(e));
            }
        };

        match spawned_rx.recv() {
            Ok(Ok(())) => Ok(JobHandle {
                id: job_id,
                worker,
                state: job_state,
                shared: Arc::clone(&self.shared),
            }),
            Ok(Err(e)) => {
                let _ = worker.join();
                log::warn!("Flash job {} did not start: {}", job_id, e);
                Err(e)
            }
            Err(_) => {
                // The worker died before reporting a spawn result
                let _ = worker.join();
                self.shared.active().take();
                self.shared.state.store(JobState::Idle);
                Err(FlashError::WorkerLost)
            }
        }
    }

    /// Ask the running script to terminate
    ///
    /// Sends SIGTERM and returns without waiting for the script to exit.
    /// Returns [`CancelStatus::NothingToCancel`] when no script is running.
    pub fn cancel(&self) -> CancelStatus {
        self.shared.cancel(None)
    }
}

/// Handle to one started job
#[derive(Debug)]
pub struct JobHandle {
    id: u64,
    worker: JoinHandle<Option<RunOutcome>>,
    state: Arc<StateCell>,
    shared: Arc<Shared>,
}

impl JobHandle {
    /// Identifier of the job, unique per supervisor
    pub fn id(&self) -> u64 {
        self.id
    }

    /// State of this job
    pub fn state(&self) -> JobState {
        self.state.load()
    }

    /// Whether the outcome has been delivered
    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Cancel this job if it is still running
    pub fn cancel(&self) -> CancelStatus {
        self.shared.cancel(Some(self.id))
    }

    /// Block until the script has exited and the outcome was delivered
    pub fn wait(self) -> Result<RunOutcome> {
        match self.worker.join() {
            Ok(Some(outcome)) => Ok(outcome),
            _ => Err(FlashError::WorkerLost),
        }
    }
}

// =============================================================================
// Worker
// =============================================================================

fn spawn_child(shared: &Shared, job_id: u64, command: &FlashCommand) -> Result<Child> {
    // Held across spawn so cancel() never sees a running state without a child
    let mut active = shared.active();

    let child = command
        .to_command()
        .spawn()
        .map_err(|source| FlashError::Spawn {
            script: command.program().to_path_buf(),
            source,
        })?;

    log::debug!("Flash job {} running as pid {}", job_id, child.id());
    *active = Some(ActiveChild {
        job_id,
        pgid: Pid::from_raw(child.id() as i32),
        cancel_requested: false,
    });
    Ok(child)
}

type SinkSlot<S> = Arc<Mutex<Option<S>>>;

fn supervise<S: OutputSink + 'static>(
    shared: &Shared,
    job_id: u64,
    mut child: Child,
    sink: S,
    job_state: &StateCell,
) -> RunOutcome {
    let sink: SinkSlot<S> = Arc::new(Mutex::new(Some(sink)));

    // Disconnects once the relay has seen end of file (or never started)
    let (relay_tx, relay_done) = mpsc::channel::<()>();
    match child.stdout.take() {
        Some(stdout) => {
            let relay_sink = Arc::clone(&sink);
            spawn_reader(format!("flash-job-{}-stdout", job_id), move || {
                let _done = relay_tx;
                relay_lines(stdout, &relay_sink, job_id);
            });
        }
        None => drop(relay_tx),
    }

    let (stderr_tx, stderr_lines) = mpsc::channel::<String>();
    if let Some(stderr) = child.stderr.take() {
        spawn_reader(format!("flash-job-{}-stderr", job_id), move || {
            drain_stderr(stderr, stderr_tx);
        });
    }

    let (status, cancelled) = reap(shared, job_id, &mut child);

    let deadline = Instant::now() + OUTPUT_GRACE;
    if let Err(RecvTimeoutError::Timeout) = relay_done.recv_timeout(OUTPUT_GRACE) {
        log::warn!(
            "Flash job {} exited but its output is still open, dropping further lines",
            job_id
        );
    }
    let stderr = collect_stderr(&stderr_lines, deadline);

    let outcome = decide_outcome(cancelled, status, stderr);
    match &outcome {
        RunOutcome::Success => log::info!("Flash job {} completed", job_id),
        RunOutcome::Failure { code, .. } => {
            log::warn!("Flash job {} failed with exit code {}", job_id, code)
        }
        RunOutcome::Cancelled => log::info!("Flash job {} cancelled", job_id),
    }

    job_state.store(outcome.state());
    shared.state.store(outcome.state());

    // Taking the sink stops the relay, so the outcome is always last
    let sink = lock(&sink).take();
    if let Some(mut sink) = sink {
        let delivered = panic::catch_unwind(AssertUnwindSafe(|| sink.on_outcome(&outcome)));
        if delivered.is_err() {
            log::error!("Output sink of flash job {} panicked on the outcome", job_id);
        }
    }
    outcome
}

fn spawn_reader<F>(name: String, read: F)
where
    F: FnOnce() + Send + 'static,
{
    if let Err(e) = thread::Builder::new().name(name.clone()).spawn(read) {
        log::warn!("Cannot start {}: {}", name, e);
    }
}

/// Forward each stdout line to the sink until end of file
///
/// Lines keep being read (and dropped) after the sink panicked or was taken,
/// so the script never blocks on a full pipe.
fn relay_lines<R: Read, S: OutputSink>(stream: R, sink: &Mutex<Option<S>>, job_id: u64) {
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    let mut broken = false;
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) if broken => {}
            Ok(_) => {
                let line = decode_line(&buf);
                let mut slot = lock(sink);
                let Some(sink) = slot.as_mut() else {
                    continue;
                };
                if panic::catch_unwind(AssertUnwindSafe(|| sink.on_line(&line))).is_err() {
                    log::error!(
                        "Output sink of flash job {} panicked, dropping further lines",
                        job_id
                    );
                    broken = true;
                }
            }
            Err(e) => {
                log::warn!("Failed to read script output: {}", e);
                break;
            }
        }
    }
}

fn drain_stderr<R: Read>(stream: R, lines: Sender<String>) {
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                let line = decode_line(&buf);
                log::debug!(target: "imxflash::script", "stderr: {}", line);
                // Keep draining once nobody collects any more
                let _ = lines.send(line);
            }
            Err(e) => {
                log::warn!("Failed to read script diagnostics: {}", e);
                break;
            }
        }
    }
}

/// Stderr lines received before end of file or `deadline`, whichever is first
fn collect_stderr(lines: &Receiver<String>, deadline: Instant) -> String {
    let mut collected = Vec::new();
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match lines.recv_timeout(remaining) {
            Ok(line) => collected.push(line),
            Err(_) => break,
        }
    }
    collected.join("\n").trim_end().to_string()
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

/// Wait for exit, detach the child from `cancel()`, then reap it
fn reap(shared: &Shared, job_id: u64, child: &mut Child) -> (io::Result<ExitStatus>, bool) {
    let pid = Pid::from_raw(child.id() as i32);
    if let Err(e) = wait_exited(pid) {
        log::debug!("Waiting on job {} without reaping failed: {}", job_id, e);
    }

    let cancelled = {
        let mut active = shared.active();
        match active.take() {
            Some(entry) if entry.job_id == job_id => entry.cancel_requested,
            other => {
                *active = other;
                false
            }
        }
    };

    (child.wait(), cancelled)
}

/// Block until the child has exited, leaving it unreaped
#[cfg(any(target_os = "linux", target_os = "android"))]
fn wait_exited(pid: Pid) -> nix::Result<()> {
    use nix::errno::Errno;
    use nix::sys::wait::{waitid, Id, WaitPidFlag};

    loop {
        match waitid(Id::Pid(pid), WaitPidFlag::WEXITED | WaitPidFlag::WNOWAIT) {
            Err(Errno::EINTR) => continue,
            result => return result.map(drop),
        }
    }
}

// Without waitid the child is detached before it exits; cancel() then
// reports nothing to cancel for the last moments of the run.
#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn wait_exited(_pid: Pid) -> nix::Result<()> {
    Ok(())
}

fn decide_outcome(cancelled: bool, status: io::Result<ExitStatus>, stderr: String) -> RunOutcome {
    if cancelled {
        return RunOutcome::Cancelled;
    }

    match status {
        Ok(status) if status.success() => RunOutcome::Success,
        Ok(status) => RunOutcome::Failure {
            code: exit_code(status),
            stderr,
        },
        Err(e) => RunOutcome::Failure {
            code: -1,
            stderr: format!("failed to wait for the flashing script: {}", e),
        },
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(-1)
}
