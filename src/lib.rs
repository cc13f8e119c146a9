//! # quevisor
//!
//! **Quevisor** is a queue-aware process supervisor: it launches long-lived
//! worker commands whose cadence is driven by the depth of remote message
//! queues.
//!
//! For each configured job, a runner polls an HTTP queue-metadata endpoint
//! and, when the observed backlog meets the job's threshold, spawns the
//! configured command (optionally as another OS user), captures its output
//! to a rotated per-job log, enforces a wall-clock limit, and sleeps with
//! adaptive backoff before polling again. Operators interact with a running
//! supervisor over a plaintext TCP control socket.
//!
//! | Area            | Description                                               | Key types                               |
//! |-----------------|-----------------------------------------------------------|-----------------------------------------|
//! | **Runners**     | Per-job poll/gate/spawn/log/sleep state machines.         | [`JobRunner`], [`JobSpec`], [`Tunables`]|
//! | **Coordination**| Registry and control operations over live runners.        | [`Coordinator`], [`Supervisor`]         |
//! | **Control**     | TCP command surface (status, pause, kill, update).        | [`ControlServer`]                       |
//! | **Probes**      | Queue-depth readings over HTTP, plus a test-mode probe.   | [`QueueProbe`], [`QueueClient`]         |
//! | **Policies**    | Adaptive sleep growth while queues stay quiet.            | [`BackoffPolicy`]                       |
//! | **Events**      | Lifecycle events fanned out to subscribers.               | [`Event`], [`Bus`], [`Subscribe`]       |
//! | **Logging**     | Rotated per-job output logs.                              | [`JobLogWriter`]                        |
//!
//! The control socket is unauthenticated by design; run it on loopback or
//! behind a network restriction.

pub mod config;
pub mod control;
pub mod core;
pub mod error;
pub mod events;
pub mod jobs;
pub mod policies;
pub mod probe;
pub mod subscribers;

// ---- Public re-exports ----

pub use crate::config::{ConfigFile, ConnectionConfig, JobConfig};
pub use crate::control::{forward, ControlServer};
pub use crate::core::{Coordinator, Supervisor};
pub use crate::error::{ConfigError, ControlError, ProbeError, UpdateError};
pub use crate::events::{Bus, Event, EventKind};
pub use crate::jobs::{JobLogWriter, JobRunner, JobSnapshot, JobSpec, JobStatus, Tunables};
pub use crate::policies::BackoffPolicy;
pub use crate::probe::{QueueClient, QueueProbe, StaticProbe};
pub use crate::subscribers::{LogWriter, Subscribe};

/// Version string reported by the control plane's `version` verb.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
