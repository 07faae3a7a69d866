//! Plan scheduling: admit, gate, and monitor test processes.
//!
//! The agent owns the plan's runtime state. Entries run strictly in plan
//! order, one at a time: `start_sequence` admits only the first `Pending`
//! entry and refuses while anything is `Running`. Each admitted entry runs in
//! its own child process whose stdout/stderr are forwarded line by line; a
//! background waiter maps the exit status onto the entry and drains the
//! forwarders. Terminal states never transition, and a failed entry is never
//! retried by the agent itself.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::env::{EnvError, EnvManager};
use crate::plan::Plan;

/// Module the spawned interpreter executes with `-m`.
pub const DEFAULT_RUNNER_MODULE: &str = "benderr_cli.main";

/// How long a terminated child gets before it is killed outright.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

const SETTLE_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("all plan entries have completed")]
    AllCompleted,
    #[error("cannot start entry {requested}; next allowed is {allowed}")]
    OutOfOrder { requested: usize, allowed: usize },
    #[error("a sequence is already running")]
    Busy,
    #[error("no plan entry at index {0}")]
    BadIndex(usize),
    #[error(transparent)]
    Env(#[from] EnvError),
    #[error("failed to spawn test process: {0}")]
    Spawn(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AgentError>;

/// Runtime state of one plan entry; `status_table` hands out value copies.
#[derive(Debug, Clone)]
pub struct PlanEntry {
    pub sequence_name: String,
    pub config_path: PathBuf,
    pub status: EntryStatus,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl PlanEntry {
    fn new(sequence_name: String, config_path: PathBuf) -> Self {
        Self {
            sequence_name,
            config_path,
            status: EntryStatus::Pending,
            pid: None,
            started_at: None,
            ended_at: None,
        }
    }
}

/// Seam between the scheduler and the process it launches, so tests can
/// substitute a stub child.
pub trait SequenceLauncher: Send + Sync {
    fn launch<'a>(
        &'a self,
        sequence: &'a str,
        config_path: &'a Path,
    ) -> BoxFuture<'a, Result<Child>>;
}

/// Production launcher: provision the environment, then run the interpreter
/// with the runner module.
#[derive(Debug)]
pub struct EnvLauncher {
    env: EnvManager,
    requirements: Vec<String>,
    runner_module: String,
}

impl EnvLauncher {
    pub fn new(env: EnvManager, requirements: Vec<String>) -> Self {
        Self {
            env,
            requirements,
            runner_module: DEFAULT_RUNNER_MODULE.to_string(),
        }
    }
}

impl SequenceLauncher for EnvLauncher {
    fn launch<'a>(
        &'a self,
        sequence: &'a str,
        config_path: &'a Path,
    ) -> BoxFuture<'a, Result<Child>> {
        Box::pin(async move {
            let interpreter = self.env.ensure_env(sequence, &self.requirements).await?;
            let child = Command::new(interpreter)
                .arg("-m")
                .arg(&self.runner_module)
                .arg("--sequence")
                .arg(sequence)
                .arg("--config")
                .arg(config_path)
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .spawn()?;
            Ok(child)
        })
    }
}

/// Supervisor for one plan.
pub struct Agent {
    entries: Arc<Mutex<Vec<PlanEntry>>>,
    launcher: Box<dyn SequenceLauncher>,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("entries", &self.entries.lock().len())
            .finish_non_exhaustive()
    }
}

impl Agent {
    /// Agent with the production environment-provisioning launcher.
    pub fn new(plan: Plan) -> Self {
        let requirements = plan.packages.requirements.clone();
        let launcher = EnvLauncher::new(EnvManager::new(plan.packages.clone()), requirements);
        Self::with_launcher(plan, Box::new(launcher))
    }

    pub fn with_launcher(plan: Plan, launcher: Box<dyn SequenceLauncher>) -> Self {
        let entries = plan
            .tests
            .into_iter()
            .map(|t| PlanEntry::new(t.name, t.config))
            .collect();
        Self {
            entries: Arc::new(Mutex::new(entries)),
            launcher,
        }
    }

    /// Index of the first `Pending` entry, if any.
    pub fn next_allowed(&self) -> Option<usize> {
        self.entries
            .lock()
            .iter()
            .position(|e| e.status == EntryStatus::Pending)
    }

    pub fn is_busy(&self) -> bool {
        self.entries
            .lock()
            .iter()
            .any(|e| e.status == EntryStatus::Running)
    }

    pub fn entry_status(&self, index: usize) -> Option<EntryStatus> {
        self.entries.lock().get(index).map(|e| e.status)
    }

    /// Snapshot of all entries, safe to render.
    pub fn status_table(&self) -> Vec<PlanEntry> {
        self.entries.lock().clone()
    }

    /// Start the plan entry at `index`.
    ///
    /// Admission: the index must name the first `Pending` entry and nothing
    /// may currently be `Running`. Returns once the child is spawned, not
    /// when it exits.
    pub async fn start_sequence(&self, index: usize) -> Result<Option<u32>> {
        let (sequence_name, config_path) = {
            let mut entries = self.entries.lock();
            let Some(allowed) = entries
                .iter()
                .position(|e| e.status == EntryStatus::Pending)
            else {
                return Err(AgentError::AllCompleted);
            };
            let entry = entries.get(index).ok_or(AgentError::BadIndex(index))?;
            if index != allowed {
                return Err(AgentError::OutOfOrder {
                    requested: index,
                    allowed,
                });
            }
            if entries.iter().any(|e| e.status == EntryStatus::Running) {
                return Err(AgentError::Busy);
            }
            let name = entry.sequence_name.clone();
            let config = entry.config_path.clone();
            // Reserve the slot before the spawn await so a concurrent call
            // sees Busy rather than double-spawning.
            entries[index].status = EntryStatus::Running;
            entries[index].started_at = Some(Utc::now());
            (name, config)
        };

        let mut child = match self.launcher.launch(&sequence_name, &config_path).await {
            Ok(child) => child,
            Err(e) => {
                let mut entries = self.entries.lock();
                entries[index].status = EntryStatus::Failed;
                entries[index].ended_at = Some(Utc::now());
                return Err(e);
            }
        };

        let pid = child.id();
        {
            let mut entries = self.entries.lock();
            entries[index].pid = pid;
        }
        info!(
            sequence = %sequence_name,
            index,
            pid = pid.unwrap_or_default(),
            "sequence started"
        );

        let out_task = child
            .stdout
            .take()
            .map(|stream| tokio::spawn(forward_stream(stream, false)));
        let err_task = child
            .stderr
            .take()
            .map(|stream| tokio::spawn(forward_stream(stream, true)));

        let entries = Arc::clone(&self.entries);
        tokio::spawn(wait_and_finalize(
            child, index, entries, out_task, err_task,
        ));
        Ok(pid)
    }

    /// Wait until the entry at `index` leaves `Running`.
    pub async fn wait_until_settled(&self, index: usize) -> Option<EntryStatus> {
        loop {
            match self.entry_status(index) {
                Some(EntryStatus::Running) => tokio::time::sleep(SETTLE_POLL).await,
                other => return other,
            }
        }
    }

    /// Terminate any running entry: polite signal first, kill after the
    /// grace period. The waiter marks the entry `Failed` when the child goes
    /// down.
    pub async fn shutdown(&self, grace: Duration) {
        let running = self.running_pids();
        if running.is_empty() {
            return;
        }
        for &(index, pid) in &running {
            info!(index, pid, "terminating running sequence");
            terminate(pid);
        }
        if self.await_no_running(grace).await {
            return;
        }
        for (index, pid) in self.running_pids() {
            warn!(index, pid, "grace period elapsed, killing");
            kill_hard(pid);
        }
        if !self.await_no_running(Duration::from_secs(1)).await {
            // The child is unkillable (or we cannot signal on this platform);
            // record the failure so the plan state stays truthful.
            let mut entries = self.entries.lock();
            for entry in entries.iter_mut() {
                if entry.status == EntryStatus::Running {
                    entry.status = EntryStatus::Failed;
                    entry.ended_at = Some(Utc::now());
                }
            }
        }
    }

    fn running_pids(&self) -> Vec<(usize, u32)> {
        self.entries
            .lock()
            .iter()
            .enumerate()
            .filter(|(_, e)| e.status == EntryStatus::Running)
            .filter_map(|(i, e)| e.pid.map(|pid| (i, pid)))
            .collect()
    }

    async fn await_no_running(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if !self.is_busy() {
                return true;
            }
            tokio::time::sleep(SETTLE_POLL).await;
        }
        !self.is_busy()
    }
}

async fn wait_and_finalize(
    mut child: Child,
    index: usize,
    entries: Arc<Mutex<Vec<PlanEntry>>>,
    out_task: Option<JoinHandle<()>>,
    err_task: Option<JoinHandle<()>>,
) {
    let status = child.wait().await;
    let completed = matches!(&status, Ok(s) if s.success());
    {
        let mut entries = entries.lock();
        let entry = &mut entries[index];
        entry.ended_at = Some(Utc::now());
        entry.status = if completed {
            EntryStatus::Completed
        } else {
            EntryStatus::Failed
        };
        info!(
            sequence = %entry.sequence_name,
            index,
            status = entry.status.as_str(),
            "sequence finalized"
        );
    }
    // Let the readers drain their buffers before the entry is considered done.
    if let Some(task) = out_task {
        let _ = task.await;
    }
    if let Some(task) = err_task {
        let _ = task.await;
    }
}

async fn forward_stream<R: AsyncRead + Unpin>(stream: R, is_err: bool) {
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if is_err {
            eprintln!("{line}");
        } else {
            println!("{line}");
        }
    }
}

#[cfg(unix)]
fn terminate(pid: u32) {
    let _ = nix::sys::signal::kill(
        nix::unistd::Pid::from_raw(pid as i32),
        nix::sys::signal::Signal::SIGTERM,
    );
}

#[cfg(unix)]
fn kill_hard(pid: u32) {
    let _ = nix::sys::signal::kill(
        nix::unistd::Pid::from_raw(pid as i32),
        nix::sys::signal::Signal::SIGKILL,
    );
}

#[cfg(not(unix))]
fn terminate(pid: u32) {
    warn!(pid, "graceful termination is not supported on this platform");
}

#[cfg(not(unix))]
fn kill_hard(pid: u32) {
    warn!(pid, "kill is not supported on this platform");
}
