//! # Runtime events emitted by the supervisor and job runners.
//!
//! The [`EventKind`] enum classifies events across three categories:
//! - **Supervisor events**: shutdown flow and jobs dropped at startup.
//! - **Runner lifecycle**: a job loop starting or reaching its terminal state.
//! - **Child and probe events**: spawn, exit, spawn failure, deadline expiry,
//!   and queue probe failures.
//!
//! The [`Event`] struct carries optional metadata (job name, child pid, error
//! text) alongside a wall-clock timestamp and a globally unique sequence
//! number, so events can be ordered even when delivered out of order through
//! async channels.
//!
//! ## Event flow examples
//!
//! ### One work cycle
//! ```text
//! ChildSpawned → [child runs] → ChildExited
//!                             → DeadlineExceeded → ChildExited
//! ```
//!
//! ### Shutdown
//! ```text
//! ShutdownRequested → JobTerminated (per runner) → AllStopped
//! ```

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::SystemTime;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Supervisor events ===
    /// Shutdown requested (OS signal or programmatic stop).
    ShutdownRequested,
    /// Every runner has completed after a shutdown request.
    AllStopped,
    /// A configured job was dropped at startup (unresolved connection).
    JobSkipped,

    // === Runner lifecycle ===
    /// A job loop has started on its background task.
    JobStarting,
    /// A job loop has finished; the runner's status is now terminal.
    JobTerminated,

    // === Child and probe events ===
    /// A child process was spawned for a job.
    ChildSpawned,
    /// The current child process exited and was reaped.
    ChildExited,
    /// The configured command could not be started.
    SpawnFailed,
    /// The queue-depth probe failed; the runner backs off and retries.
    ProbeFailed,
    /// A child exceeded its wall-clock limit and was killed.
    DeadlineExceeded,
}

/// Runtime event with optional metadata.
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp (may go backwards, use for logging only).
    pub at: SystemTime,
    /// The kind of event.
    pub kind: EventKind,
    /// Name of the job, if applicable.
    pub job: Option<String>,
    /// Error message, if the event represents a failure.
    pub error: Option<String>,
    /// Child pid, for child lifecycle events.
    pub pid: Option<u32>,
}

impl Event {
    /// Creates a new event of the given kind with the current timestamp and
    /// the next sequence number.
    pub fn now(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            job: None,
            error: None,
            pid: None,
        }
    }

    /// Attaches a job name.
    pub fn with_job(mut self, name: impl Into<String>) -> Self {
        self.job = Some(name.into());
        self
    }

    /// Attaches an error message.
    pub fn with_error(mut self, msg: impl Into<String>) -> Self {
        self.error = Some(msg.into());
        self
    }

    /// Attaches a child pid.
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }
}
