//! # JobRunner: the per-job execution state machine.
//!
//! One runner owns one job. Its loop drives the poll, gate, spawn, log, and
//! sleep cycle until a stop request arrives:
//!
//! ```text
//! loop {
//!   ├─► stopping?      → break (status becomes TERMINATED)
//!   ├─► paused?        → PAUSED, reset sleep to base, tick 1s, re-check
//!   ├─► probe depth    → failure: log to job log, fall through to sleep
//!   │                  → depth >= min_messages:
//!   │                        RUNNING, spawn child (user creds, workdir),
//!   │                        drain output, enforce deadline,
//!   │                        reset sleep to base
//!   └─► sleep step     → cancellable sleep of current interval;
//!                        on natural wake grow by the backoff policy
//! }
//! ```
//!
//! ## Rules
//! - At most one child process exists per runner; `child_pid != 0` exactly
//!   while the status is `Running`.
//! - Control-plane requests are eventual: pause applies at the next loop
//!   boundary and never interrupts a running child; stop cancels the sleep
//!   immediately and SIGKILLs a live child.
//! - Tunables are read once per iteration, so mutations apply from the next
//!   cycle onward.
//! - The runner's mutexes are never held across an await point.

use std::ops::ControlFlow;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::select;
use tokio::task::JoinHandle;
use tokio::time::{self, timeout};
use tokio_util::sync::CancellationToken;

use crate::events::{Bus, Event, EventKind};
use crate::jobs::logwriter::JobLogWriter;
use crate::jobs::spec::{JobSpec, Tunables};
use crate::jobs::state::{JobSnapshot, JobStatus, RunnerState};
use crate::probe::QueueProbe;

#[cfg(unix)]
use crate::error::UserLookupError;

/// Poll cadence while a runner sits in `Paused`.
const PAUSE_TICK: Duration = Duration::from_secs(1);

/// Credentials attached to the child when a job runs as another user.
struct ChildCredentials {
    uid: u32,
    gid: u32,
    groups: Vec<u32>,
}

/// The per-job state machine and its background task.
pub struct JobRunner {
    spec: JobSpec,
    tunables: Mutex<Tunables>,
    state: Mutex<RunnerState>,
    cancel: CancellationToken,
    probe: Arc<dyn QueueProbe>,
    log: JobLogWriter,
    bus: Bus,
    started: AtomicBool,
}

impl JobRunner {
    pub fn new(
        spec: JobSpec,
        tunables: Tunables,
        probe: Arc<dyn QueueProbe>,
        log: JobLogWriter,
        bus: Bus,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let initial_sleep = tunables.sleep_time;
        Arc::new(Self {
            spec,
            tunables: Mutex::new(tunables),
            state: Mutex::new(RunnerState::new(initial_sleep)),
            cancel,
            probe,
            log,
            bus,
            started: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn groups(&self) -> &[String] {
        &self.spec.groups
    }

    /// Launches the loop on a background task. Idempotent: later calls (and
    /// a call racing `run`) find the started flag set and do nothing.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Requests a pause. Takes effect at the next loop boundary; a running
    /// child is never interrupted by this.
    pub fn request_pause(&self) {
        self.state.lock().unwrap().paused = true;
    }

    /// Clears a pause request. The loop resumes within one pause tick.
    pub fn request_unpause(&self) {
        self.state.lock().unwrap().paused = false;
    }

    /// True when a pause has been requested (it may not have applied yet).
    pub fn pause_requested(&self) -> bool {
        self.state.lock().unwrap().paused
    }

    /// Requests termination: wakes an in-flight sleep and SIGKILLs a live
    /// child. The loop observes the flag and finishes on its own.
    pub fn request_stop(&self) {
        let pid = {
            let mut state = self.state.lock().unwrap();
            state.stopping = true;
            state.child_pid
        };
        self.cancel.cancel();
        if pid != 0 {
            kill_child(pid);
        }
    }

    /// Applies one control-plane mutation to the tunables.
    pub fn update_property(&self, key: &str, value: &str) -> Result<(), crate::error::UpdateError> {
        self.tunables.lock().unwrap().update(key, value)
    }

    /// Copy of the current tunables.
    pub fn tunables(&self) -> Tunables {
        *self.tunables.lock().unwrap()
    }

    /// Consistent view of the runner for the status table.
    pub fn snapshot(&self) -> JobSnapshot {
        let state = self.state.lock().unwrap();
        let max_sleep = self.tunables.lock().unwrap().max_sleep;
        JobSnapshot {
            name: self.spec.name.clone(),
            groups: self.spec.groups.clone(),
            status: state.status,
            pid: state.child_pid,
            user: self.spec.user.clone().unwrap_or_default(),
            current_sleep: state.current_sleep,
            max_sleep,
            last_started_at: state.last_started_at,
        }
    }

    /// The job loop. Runs until a stop request, a spawn failure, or an
    /// unresolvable working directory ends it.
    pub async fn run(self: Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        self.bus
            .publish(Event::now(EventKind::JobStarting).with_job(&self.spec.name));

        let credentials = self.resolve_credentials();

        loop {
            if self.state.lock().unwrap().stopping {
                break;
            }
            if self.state.lock().unwrap().paused {
                self.enter_pause();
                select! {
                    _ = time::sleep(PAUSE_TICK) => {}
                    _ = self.cancel.cancelled() => {}
                }
                continue;
            }
            self.state.lock().unwrap().status = JobStatus::Sleeping;

            let tunables = self.tunables();
            if let Some(depth) = self.probe_depth().await {
                if depth >= tunables.min_messages {
                    if self.execute_child(&tunables, credentials.as_ref()).await.is_break() {
                        break;
                    }
                    self.state.lock().unwrap().current_sleep = tunables.backoff().reset();
                }
            }

            self.sleep_step(&tunables).await;
        }

        self.finish();
    }

    /// Marks the runner paused. The sleep interval drops back to the base so
    /// an unpause resumes with a prompt poll.
    fn enter_pause(&self) {
        let mut state = self.state.lock().unwrap();
        if state.status != JobStatus::Paused {
            state.status = JobStatus::Paused;
            state.current_sleep = self.tunables.lock().unwrap().sleep_time;
        }
    }

    /// Polls the queue. A failure is recorded in the job's own log and
    /// reported on the bus, then treated as a closed gate.
    async fn probe_depth(&self) -> Option<u64> {
        match self.probe.depth(&self.spec.vhost, &self.spec.queue).await {
            Ok(messages) => Some(messages),
            Err(err) => {
                self.log.append(&[format!(
                    "Can't connect to queue: {} on vhost: {} - Error: {}",
                    self.spec.queue, self.spec.vhost, err
                )]);
                self.bus.publish(
                    Event::now(EventKind::ProbeFailed)
                        .with_job(&self.spec.name)
                        .with_error(err.to_string()),
                );
                None
            }
        }
    }

    /// Sleeps the current interval, growing it on a natural wake. A cancelled
    /// sleep returns to the loop top where stop or pause is observed.
    async fn sleep_step(&self, tunables: &Tunables) {
        let current = self.state.lock().unwrap().current_sleep;
        let sleep = time::sleep(Duration::from_secs(current));
        tokio::pin!(sleep);
        select! {
            _ = &mut sleep => {
                self.state.lock().unwrap().current_sleep = tunables.backoff().next(current);
            }
            _ = self.cancel.cancelled() => {}
        }
    }

    /// Spawns the configured command and supervises it to completion.
    ///
    /// `Break` terminates the runner: empty command, unresolvable working
    /// directory, or spawn failure. Everything after a successful spawn,
    /// including a deadline kill, continues the loop.
    async fn execute_child(
        &self,
        tunables: &Tunables,
        credentials: Option<&ChildCredentials>,
    ) -> ControlFlow<()> {
        let mut fields = self.spec.command.split_whitespace();
        let Some(program) = fields.next() else {
            tracing::error!(
                job = %self.spec.name,
                "job has an empty command and cannot be executed"
            );
            return ControlFlow::Break(());
        };

        let mut command = std::process::Command::new(program);
        command.args(fields);

        if let Some(dir) = &self.spec.working_dir {
            match Path::new(dir).canonicalize() {
                Ok(absolute) => {
                    command.current_dir(absolute);
                }
                Err(err) => {
                    tracing::error!(
                        job = %self.spec.name,
                        dir = %dir,
                        error = %err,
                        "the working directory does not exist, job cannot be executed"
                    );
                    return ControlFlow::Break(());
                }
            }
        }

        apply_credentials(&mut command, credentials);

        let mut command = tokio::process::Command::from(command);
        command.stdin(Stdio::null());
        if self.log.enabled() {
            command.stdout(Stdio::piped()).stderr(Stdio::piped());
        } else {
            command.stdout(Stdio::null()).stderr(Stdio::null());
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                self.bus.publish(
                    Event::now(EventKind::SpawnFailed)
                        .with_job(&self.spec.name)
                        .with_error(err.to_string()),
                );
                return ControlFlow::Break(());
            }
        };

        let pid = child.id().unwrap_or(0);
        {
            let mut state = self.state.lock().unwrap();
            state.status = JobStatus::Running;
            state.child_pid = pid;
            state.last_started_at = chrono::Local::now().timestamp();
        }
        self.bus.publish(
            Event::now(EventKind::ChildSpawned)
                .with_job(&self.spec.name)
                .with_pid(pid),
        );

        // Output drains on its own task so a full pipe can never wedge the
        // child while the deadline clock runs against wait() alone.
        let output = drain_output(child.stdout.take(), child.stderr.take());

        let deadline_hit = match tunables.max_execution {
            0 => {
                let _ = child.wait().await;
                false
            }
            seconds => match timeout(Duration::from_secs(seconds), child.wait()).await {
                Ok(_) => false,
                Err(_) => {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    true
                }
            },
        };

        let captured = output.await.unwrap_or_default();
        let tokens: Vec<String> = String::from_utf8_lossy(&captured)
            .split_whitespace()
            .map(str::to_string)
            .collect();
        self.log.append(&tokens);

        if deadline_hit {
            self.log.append(&[format!(
                "Job \"{}\" exceeded max execution time of {} seconds. Process Killed.",
                self.spec.name, tunables.max_execution
            )]);
            self.bus
                .publish(Event::now(EventKind::DeadlineExceeded).with_job(&self.spec.name));
        }

        {
            let mut state = self.state.lock().unwrap();
            state.child_pid = 0;
            state.status = JobStatus::Sleeping;
        }
        self.bus
            .publish(Event::now(EventKind::ChildExited).with_job(&self.spec.name));

        ControlFlow::Continue(())
    }

    /// Resolves the configured user once, before the loop starts. Lookup
    /// failure is logged and the job runs without a privilege drop, matching
    /// the error policy for user resolution.
    fn resolve_credentials(&self) -> Option<ChildCredentials> {
        let name = self.spec.user.as_deref()?;
        if name.is_empty() {
            return None;
        }
        match lookup_user(name) {
            Ok(credentials) => Some(credentials),
            Err(err) => {
                tracing::warn!(
                    job = %self.spec.name,
                    user = name,
                    error = %err,
                    "could not resolve user, running without privilege drop"
                );
                None
            }
        }
    }

    /// Terminal step: the status set here is never changed again.
    fn finish(&self) {
        {
            let mut state = self.state.lock().unwrap();
            state.status = JobStatus::Terminated;
            state.child_pid = 0;
        }
        self.bus
            .publish(Event::now(EventKind::JobTerminated).with_job(&self.spec.name));
    }
}

/// Reads both pipes to EOF concurrently and returns the merged bytes,
/// stdout first. The task finishes once the child closes its ends, which a
/// kill forces promptly.
fn drain_output(
    stdout: Option<tokio::process::ChildStdout>,
    stderr: Option<tokio::process::ChildStderr>,
) -> JoinHandle<Vec<u8>> {
    tokio::spawn(async move {
        let read_out = async {
            let mut buf = Vec::new();
            if let Some(mut pipe) = stdout {
                let _ = pipe.read_to_end(&mut buf).await;
            }
            buf
        };
        let read_err = async {
            let mut buf = Vec::new();
            if let Some(mut pipe) = stderr {
                let _ = pipe.read_to_end(&mut buf).await;
            }
            buf
        };
        let (mut merged, mut trailing) = tokio::join!(read_out, read_err);
        merged.append(&mut trailing);
        merged
    })
}

/// Attaches uid/gid/supplementary groups to the command.
///
/// A resolved uid or primary gid of 0 leaves the command untouched, so a job
/// whose user resolves to root runs with the supervisor's own identity.
#[cfg(unix)]
fn apply_credentials(command: &mut std::process::Command, credentials: Option<&ChildCredentials>) {
    use std::os::unix::process::CommandExt;

    if let Some(creds) = credentials {
        if creds.uid != 0 && creds.gid != 0 {
            command.uid(creds.uid);
            command.gid(creds.gid);
            let groups = creds.groups.clone();
            unsafe {
                command.pre_exec(move || {
                    let gids: Vec<nix::unistd::Gid> =
                        groups.iter().map(|g| nix::unistd::Gid::from_raw(*g)).collect();
                    nix::unistd::setgroups(&gids)
                        .map_err(|e| std::io::Error::from_raw_os_error(e as i32))
                });
            }
        }
    }
}

#[cfg(not(unix))]
fn apply_credentials(_command: &mut std::process::Command, _credentials: Option<&ChildCredentials>) {}

/// Resolves a user name to uid, primary gid, and the full group list via the
/// system user database.
#[cfg(unix)]
fn lookup_user(name: &str) -> Result<ChildCredentials, UserLookupError> {
    use std::ffi::CString;

    use nix::unistd::{getgrouplist, User};

    let user = User::from_name(name)?.ok_or_else(|| UserLookupError::NotFound {
        name: name.to_string(),
    })?;
    let c_name = CString::new(name).map_err(|_| UserLookupError::BadName)?;
    let groups = getgrouplist(&c_name, user.gid)?;

    Ok(ChildCredentials {
        uid: user.uid.as_raw(),
        gid: user.gid.as_raw(),
        groups: groups.iter().map(|gid| gid.as_raw()).collect(),
    })
}

#[cfg(not(unix))]
fn lookup_user(_name: &str) -> Result<ChildCredentials, std::convert::Infallible> {
    unreachable!("credentials are only resolved on unix")
}

#[cfg(unix)]
fn kill_child(pid: u32) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let _ = kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
}

#[cfg(not(unix))]
fn kill_child(_pid: u32) {}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::probe::StaticProbe;

    fn spec(name: &str, command: &str) -> JobSpec {
        JobSpec {
            name: name.to_string(),
            groups: vec!["workers".to_string()],
            command: command.to_string(),
            working_dir: None,
            user: None,
            queue: "work".to_string(),
            vhost: "/".to_string(),
        }
    }

    fn tunables() -> Tunables {
        Tunables {
            min_messages: 1,
            sleep_time: 1,
            sleep_increment: 2,
            max_sleep: 5,
            max_execution: 0,
            spawn: 1,
        }
    }

    fn runner_with(
        spec: JobSpec,
        tunables: Tunables,
        probe: Arc<dyn QueueProbe>,
        log: JobLogWriter,
    ) -> Arc<JobRunner> {
        JobRunner::new(
            spec,
            tunables,
            probe,
            log,
            Bus::new(64),
            CancellationToken::new(),
        )
    }

    async fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if check() {
                return true;
            }
            time::sleep(Duration::from_millis(25)).await;
        }
        false
    }

    #[tokio::test]
    async fn runs_the_child_and_captures_output() {
        let tmp = tempfile::tempdir().unwrap();
        let log = JobLogWriter::new(&format!("{}/", tmp.path().display()), "echoer", 0.0, 0);
        let runner = runner_with(
            spec("echoer", "/bin/echo hello runner"),
            tunables(),
            Arc::new(StaticProbe::new(5)),
            log,
        );

        let handle = Arc::clone(&runner).start();
        let saw_run = wait_until(Duration::from_secs(5), || {
            runner.snapshot().last_started_at != 0
        })
        .await;
        assert!(saw_run, "child never started");

        runner.request_stop();
        handle.await.unwrap();

        let snapshot = runner.snapshot();
        assert_eq!(snapshot.status, JobStatus::Terminated);
        assert_eq!(snapshot.pid, 0);

        let dir = tmp.path().join("echoer");
        let entry = std::fs::read_dir(&dir).unwrap().next().unwrap().unwrap();
        let content = std::fs::read_to_string(entry.path()).unwrap();
        assert!(content.contains("hello runner"));
    }

    #[tokio::test]
    async fn failing_probe_never_spawns() {
        struct FailProbe;
        #[async_trait::async_trait]
        impl QueueProbe for FailProbe {
            async fn depth(&self, vhost: &str, queue: &str) -> Result<u64, crate::error::ProbeError> {
                Err(crate::error::ProbeError::QueueInfo {
                    queue: queue.to_string(),
                    vhost: vhost.to_string(),
                })
            }
        }

        let runner = runner_with(
            spec("idler", "/bin/echo never"),
            tunables(),
            Arc::new(FailProbe),
            JobLogWriter::new("", "idler", 0.0, 0),
        );

        let handle = Arc::clone(&runner).start();
        time::sleep(Duration::from_millis(300)).await;

        let snapshot = runner.snapshot();
        assert_eq!(snapshot.status, JobStatus::Sleeping);
        assert_eq!(snapshot.pid, 0);
        assert_eq!(snapshot.last_started_at, 0);

        runner.request_stop();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn stop_interrupts_a_long_sleep() {
        let mut t = tunables();
        t.sleep_time = 60;
        t.max_sleep = 60;
        let runner = runner_with(
            spec("sleeper", "/bin/echo unused"),
            t,
            Arc::new(StaticProbe::new(0)),
            JobLogWriter::new("", "sleeper", 0.0, 0),
        );

        let handle = Arc::clone(&runner).start();
        time::sleep(Duration::from_millis(300)).await;

        let asked = Instant::now();
        runner.request_stop();
        timeout(Duration::from_secs(2), handle)
            .await
            .expect("runner did not stop in time")
            .unwrap();
        assert!(asked.elapsed() < Duration::from_secs(1));
        assert_eq!(runner.snapshot().status, JobStatus::Terminated);
    }

    #[tokio::test]
    async fn pause_applies_at_the_loop_boundary() {
        let mut t = tunables();
        t.min_messages = 10; // gate never opens
        let runner = runner_with(
            spec("pausable", "/bin/echo unused"),
            t,
            Arc::new(StaticProbe::new(0)),
            JobLogWriter::new("", "pausable", 0.0, 0),
        );
        runner.request_pause();

        let handle = Arc::clone(&runner).start();
        let paused = wait_until(Duration::from_secs(3), || {
            runner.snapshot().status == JobStatus::Paused
        })
        .await;
        assert!(paused, "runner never entered PAUSED");
        assert_eq!(runner.snapshot().current_sleep, 1);

        runner.request_stop();
        timeout(Duration::from_secs(2), handle)
            .await
            .expect("runner did not stop in time")
            .unwrap();
    }

    #[tokio::test]
    async fn empty_command_terminates_the_runner() {
        let mut t = tunables();
        t.min_messages = 0;
        let runner = runner_with(
            spec("empty", ""),
            t,
            Arc::new(StaticProbe::new(1)),
            JobLogWriter::new("", "empty", 0.0, 0),
        );

        let handle = Arc::clone(&runner).start();
        timeout(Duration::from_secs(2), handle)
            .await
            .expect("runner did not terminate on its own")
            .unwrap();
        assert_eq!(runner.snapshot().status, JobStatus::Terminated);
    }

    #[tokio::test]
    async fn deadline_kills_the_child_and_logs_it() {
        let tmp = tempfile::tempdir().unwrap();
        let log = JobLogWriter::new(&format!("{}/", tmp.path().display()), "slow", 0.0, 0);
        let mut t = tunables();
        t.max_execution = 1;
        let runner = runner_with(
            spec("slow", "/bin/sleep 30"),
            t,
            Arc::new(StaticProbe::new(5)),
            log,
        );

        let handle = Arc::clone(&runner).start();
        let dir = tmp.path().join("slow");
        let logged = wait_until(Duration::from_secs(5), || {
            std::fs::read_dir(&dir)
                .ok()
                .into_iter()
                .flatten()
                .flatten()
                .any(|entry| {
                    std::fs::read_to_string(entry.path())
                        .map(|content| content.contains("exceeded max execution time of 1 seconds"))
                        .unwrap_or(false)
                })
        })
        .await;
        assert!(logged, "deadline notice never reached the job log");

        runner.request_stop();
        timeout(Duration::from_secs(2), handle)
            .await
            .expect("runner did not stop in time")
            .unwrap();
    }

    #[tokio::test]
    async fn property_updates_are_visible_in_snapshots() {
        let runner = runner_with(
            spec("tuned", "/bin/echo unused"),
            tunables(),
            Arc::new(StaticProbe::new(0)),
            JobLogWriter::new("", "tuned", 0.0, 0),
        );

        runner.update_property("max_sleep", "42").unwrap();
        assert_eq!(runner.snapshot().max_sleep, 42);
        assert_eq!(runner.tunables().max_sleep, 42);
    }
}
