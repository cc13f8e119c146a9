//! # Per-runner runtime state.
//!
//! [`RunnerState`] is logically owned by one [`JobRunner`](crate::JobRunner)
//! and protected by that runner's mutex. Control-plane writers only touch the
//! request flags (`paused`, `stopping`); everything else is written by the
//! loop itself. Snapshots are taken under the same mutex so readers always
//! see a consistent pairing of status and pid.

/// The four observable states of a job runner.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobStatus {
    Sleeping,
    Running,
    Paused,
    Terminated,
}

impl JobStatus {
    /// Operator-facing name, as rendered in the status table.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Sleeping => "SLEEPING",
            JobStatus::Running => "RUNNING",
            JobStatus::Paused => "PAUSED",
            JobStatus::Terminated => "TERMINATED",
        }
    }
}

/// Mutable runtime state of one runner.
///
/// Invariants, maintained by the owning loop:
/// - `child_pid != 0` exactly while `status == Running`;
/// - `Terminated` is terminal, nothing is written after it is set;
/// - `current_sleep` stays within `[sleep_time, max_sleep]` at loop
///   boundaries.
#[derive(Debug)]
pub struct RunnerState {
    pub status: JobStatus,
    /// Pause requested; takes effect at the next loop boundary.
    pub paused: bool,
    /// Termination requested; observed at the loop top and inside sleeps.
    pub stopping: bool,
    /// Seconds the next sleep step will wait.
    pub current_sleep: u64,
    /// Pid of the live child, 0 when none.
    pub child_pid: u32,
    /// Epoch seconds of the last child launch, 0 if never.
    pub last_started_at: i64,
}

impl RunnerState {
    pub fn new(initial_sleep: u64) -> Self {
        Self {
            status: JobStatus::Sleeping,
            paused: false,
            stopping: false,
            current_sleep: initial_sleep,
            child_pid: 0,
            last_started_at: 0,
        }
    }
}

/// Consistent, read-only view of a runner, rendered by the status table.
#[derive(Clone, Debug)]
pub struct JobSnapshot {
    pub name: String,
    pub groups: Vec<String>,
    pub status: JobStatus,
    pub pid: u32,
    pub user: String,
    pub current_sleep: u64,
    pub max_sleep: u64,
    pub last_started_at: i64,
}
