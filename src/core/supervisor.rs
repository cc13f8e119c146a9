//! # Supervisor: wires the pieces together and drives the lifecycle.
//!
//! The [`Supervisor`] is an explicit value constructed in `main`. It owns the
//! event bus, the subscriber set, the [`Coordinator`], and the root
//! cancellation token every runner token derives from, so one broadcast stops
//! the world.
//!
//! ## Architecture
//! ```text
//! ConfigFile ──► Supervisor::run()
//!                     │
//!                     ├──► build_runners(): one JobRunner per job,
//!                     │         probe + log writer wired, registered
//!                     │         with the Coordinator, spawned on a JoinSet
//!                     │
//!                     ├──► Bus::spawn_fanout(): events → subscribers
//!                     │
//!                     ├──► ControlServer on the configured port
//!                     │
//!                     └──► wait for SIGINT/SIGTERM (or programmatic stop)
//!                               ├──► kill_all() + cancel root token
//!                               └──► await every runner, then return
//! ```
//!
//! Jobs whose connection reference does not resolve are skipped with a log
//! line; a port that cannot be bound costs the control plane but not the
//! runners. Only configuration loading is fatal to the process.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::ConfigFile;
use crate::control::ControlServer;
use crate::core::Coordinator;
use crate::events::{Bus, Event, EventKind};
use crate::jobs::{JobLogWriter, JobRunner, JobSpec, Tunables};
use crate::probe::{QueueClient, QueueProbe, StaticProbe};
use crate::subscribers::Subscribe;

/// Capacity of the event bus channel.
const BUS_CAPACITY: usize = 1024;

/// Owns the runtime components and orchestrates startup and shutdown.
pub struct Supervisor {
    coordinator: Arc<Coordinator>,
    bus: Bus,
    subscribers: Vec<Arc<dyn Subscribe>>,
    root: CancellationToken,
}

impl Supervisor {
    /// Creates a supervisor with the given subscribers (maybe empty).
    pub fn new(subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        Self {
            coordinator: Coordinator::new(),
            bus: Bus::new(BUS_CAPACITY),
            subscribers,
            root: CancellationToken::new(),
        }
    }

    pub fn coordinator(&self) -> Arc<Coordinator> {
        Arc::clone(&self.coordinator)
    }

    pub fn bus(&self) -> Bus {
        self.bus.clone()
    }

    /// Requests global termination: every runner stops and the control
    /// server's accept loop winds down. `run` returns once the runners have
    /// finished.
    pub fn shutdown(&self) {
        self.coordinator.kill_all();
        self.root.cancel();
    }

    /// Runs the supervisor until a termination signal (or [`Self::shutdown`]).
    pub async fn run(&self, config: &ConfigFile, port: u16, test_mode: bool) {
        self.bus.spawn_fanout(self.subscribers.clone());

        let runners = self.build_runners(config, test_mode);
        let mut set = JoinSet::new();
        for runner in runners {
            set.spawn(runner.run());
        }

        match TcpListener::bind(("0.0.0.0", port)).await {
            Ok(listener) => {
                tracing::info!(port, "Server listening");
                let server =
                    ControlServer::new(Arc::clone(&self.coordinator), self.root.child_token());
                tokio::spawn(server.serve(listener));
            }
            Err(err) => {
                tracing::error!(port, error = %err, "Error listening on control port");
            }
        }

        self.drive_shutdown(&mut set).await;
    }

    /// Builds one runner per configured job and registers it.
    ///
    /// Jobs referencing an unknown connection are skipped. In test mode every
    /// probe reports a backlog of one, so every gate opens on every poll.
    pub fn build_runners(&self, config: &ConfigFile, test_mode: bool) -> Vec<Arc<JobRunner>> {
        let mut runners = Vec::new();
        for job in &config.jobs {
            let Some(connection) = config.connection_by_name(&job.connection) else {
                self.bus.publish(
                    Event::now(EventKind::JobSkipped)
                        .with_job(&job.name)
                        .with_error(format!("connection {:?} not found in config", job.connection)),
                );
                tracing::warn!(
                    job = %job.name,
                    connection = %job.connection,
                    "Skipping job: connection not found in config"
                );
                continue;
            };

            let probe: Arc<dyn QueueProbe> = if test_mode {
                Arc::new(StaticProbe::new(1))
            } else {
                match QueueClient::new(connection) {
                    Ok(client) => Arc::new(client),
                    Err(err) => {
                        tracing::warn!(
                            job = %job.name,
                            error = %err,
                            "Skipping job: queue client cannot be built"
                        );
                        continue;
                    }
                }
            };

            let log = JobLogWriter::new(
                &job.error_log_path,
                &job.name,
                job.error_log_max_kb_size,
                job.error_log_max_files,
            );
            let runner = JobRunner::new(
                JobSpec::from_config(job, &connection.vhost),
                Tunables::from_config(job),
                probe,
                log,
                self.bus.clone(),
                self.root.child_token(),
            );
            self.coordinator.register(Arc::clone(&runner));
            runners.push(runner);
        }
        runners
    }

    /// Blocks until a stop request arrives, then stops every runner and
    /// waits for all of them.
    async fn drive_shutdown(&self, set: &mut JoinSet<()>) {
        self.wait_for_stop_request().await;

        self.bus.publish(Event::now(EventKind::ShutdownRequested));
        self.coordinator.kill_all();
        self.root.cancel();
        while set.join_next().await.is_some() {}
        self.bus.publish(Event::now(EventKind::AllStopped));
    }

    /// Completes on SIGINT or SIGTERM (the signals init systems send) or on
    /// a programmatic [`Self::shutdown`] firing the root token.
    #[cfg(unix)]
    async fn wait_for_stop_request(&self) {
        use tokio::signal::unix::{signal, SignalKind};

        match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
            (Ok(mut sigint), Ok(mut sigterm)) => {
                tokio::select! {
                    _ = sigint.recv() => {}
                    _ = sigterm.recv() => {}
                    _ = self.root.cancelled() => {}
                }
            }
            _ => {
                tracing::warn!("could not install signal handlers, stopping on request only");
                self.root.cancelled().await;
            }
        }
    }

    /// Completes on Ctrl-C or on a programmatic [`Self::shutdown`].
    #[cfg(not(unix))]
    async fn wait_for_stop_request(&self) {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = self.root.cancelled() => {}
        }
    }
}
