//! # Logging subscriber.
//!
//! [`LogWriter`] renders runtime events as `tracing` records, which the
//! binary routes to the supervisor log file. Probe failures and deadline
//! kills land at `warn`, spawn failures at `error`, the rest at `info`.

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Subscriber that forwards events to the `tracing` pipeline.
pub struct LogWriter;

#[async_trait]
impl Subscribe for LogWriter {
    async fn handle(&self, event: &Event) {
        let job = event.job.as_deref().unwrap_or("-");
        match event.kind {
            EventKind::ShutdownRequested => info!("Terminating..."),
            EventKind::AllStopped => info!("All jobs have stopped"),
            EventKind::JobSkipped => {
                warn!(
                    job,
                    error = event.error.as_deref().unwrap_or(""),
                    "Skipping job"
                );
            }
            EventKind::JobStarting => info!(job, "Starting Job"),
            EventKind::JobTerminated => info!(job, "Ending Job"),
            EventKind::ChildSpawned => {
                info!(job, pid = event.pid.unwrap_or(0), "child process started");
            }
            EventKind::ChildExited => info!(job, "child process exited"),
            EventKind::SpawnFailed => {
                error!(
                    job,
                    error = event.error.as_deref().unwrap_or(""),
                    "command cannot be executed"
                );
            }
            EventKind::ProbeFailed => {
                warn!(
                    job,
                    error = event.error.as_deref().unwrap_or(""),
                    "queue probe failed"
                );
            }
            EventKind::DeadlineExceeded => {
                warn!(job, "max execution time exceeded, child killed");
            }
        }
    }
}
