//! # Coordinator: the process-wide registry of job runners.
//!
//! Holds every runner in registration order and applies control operations
//! against them. The registry is append-only: registration completes before
//! the control server starts, so runtime readers only ever race each other.
//! Per-runner safety comes from the runners' own mutexes; the coordinator
//! adds nothing but the list.
//!
//! ## Rules
//! - Name-targeted operations act on the **first** runner with that name.
//!   Duplicate names silently target the first registration.
//! - Group operations act on every runner whose group list contains the
//!   group.
//! - `kill_all` only *requests* termination; runners reach `TERMINATED` on
//!   their own loops moments later.

use std::sync::{Arc, RwLock};

use chrono::{Local, TimeZone};

use crate::error::ControlError;
use crate::jobs::{JobRunner, JobSnapshot};

/// Column set of the status table.
const HEADER: [&str; 7] = ["Job", "Groups", "Status", "PID", "User", "Sleep", "Last Exec"];
/// Columns never render narrower than this, tabwriter style.
const MIN_COLUMN_WIDTH: usize = 10;
/// Padding added after the widest cell of a column.
const COLUMN_PADDING: usize = 2;

/// Registry of live job runners plus the control operations over them.
pub struct Coordinator {
    runners: RwLock<Vec<Arc<JobRunner>>>,
}

impl Coordinator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            runners: RwLock::new(Vec::new()),
        })
    }

    /// Appends a runner. Call before the control server starts.
    pub fn register(&self, runner: Arc<JobRunner>) {
        self.runners.write().unwrap().push(runner);
    }

    /// First runner with the given name.
    pub fn find_by_name(&self, name: &str) -> Option<Arc<JobRunner>> {
        self.runners
            .read()
            .unwrap()
            .iter()
            .find(|runner| runner.name() == name)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.runners.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.runners.read().unwrap().is_empty()
    }

    /// Status table covering every runner.
    pub fn status(&self) -> String {
        let snapshots: Vec<JobSnapshot> = self
            .runners
            .read()
            .unwrap()
            .iter()
            .map(|runner| runner.snapshot())
            .collect();
        render_table(&snapshots)
    }

    /// Status table with a single row, or a not-found message.
    pub fn status_of(&self, name: &str) -> String {
        match self.find_by_name(name) {
            Some(runner) => render_table(&[runner.snapshot()]),
            None => format!("Can't find job called {name}\n"),
        }
    }

    pub fn pause(&self, name: &str) {
        if let Some(runner) = self.find_by_name(name) {
            runner.request_pause();
        }
    }

    pub fn unpause(&self, name: &str) {
        if let Some(runner) = self.find_by_name(name) {
            runner.request_unpause();
        }
    }

    pub fn pause_group(&self, group: &str) {
        for runner in self.runners.read().unwrap().iter() {
            if runner.groups().iter().any(|g| g == group) {
                runner.request_pause();
            }
        }
    }

    pub fn unpause_group(&self, group: &str) {
        for runner in self.runners.read().unwrap().iter() {
            if runner.groups().iter().any(|g| g == group) {
                runner.request_unpause();
            }
        }
    }

    pub fn pause_all(&self) {
        for runner in self.runners.read().unwrap().iter() {
            runner.request_pause();
        }
    }

    pub fn unpause_all(&self) {
        for runner in self.runners.read().unwrap().iter() {
            runner.request_unpause();
        }
    }

    /// Requests termination of every runner.
    pub fn kill_all(&self) {
        for runner in self.runners.read().unwrap().iter() {
            runner.request_stop();
        }
    }

    /// Forwards a property mutation to the named runner.
    pub fn update_property(&self, name: &str, key: &str, value: &str) -> Result<(), ControlError> {
        let runner = self.find_by_name(name).ok_or_else(|| ControlError::UnknownJob {
            name: name.to_string(),
        })?;
        runner.update_property(key, value)?;
        Ok(())
    }
}

/// Renders snapshots as a padded table with `|` column separators.
fn render_table(rows: &[JobSnapshot]) -> String {
    let header: Vec<String> = HEADER.iter().map(|h| h.to_string()).collect();
    let body: Vec<Vec<String>> = rows.iter().map(row_cells).collect();

    let mut widths: Vec<usize> = header.iter().map(String::len).collect();
    for row in &body {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }
    for width in &mut widths {
        *width = (*width + COLUMN_PADDING).max(MIN_COLUMN_WIDTH);
    }

    let mut out = String::new();
    write_row(&mut out, &header, &widths);
    for row in &body {
        write_row(&mut out, row, &widths);
    }
    out
}

fn row_cells(snapshot: &JobSnapshot) -> Vec<String> {
    vec![
        snapshot.name.clone(),
        format!("[{}]", snapshot.groups.join(" ")),
        snapshot.status.as_str().to_string(),
        snapshot.pid.to_string(),
        snapshot.user.clone(),
        snapshot.current_sleep.to_string(),
        format_last_exec(snapshot.last_started_at),
    ]
}

fn write_row(out: &mut String, cells: &[String], widths: &[usize]) {
    for (index, (cell, width)) in cells.iter().zip(widths).enumerate() {
        if index > 0 {
            out.push('|');
        }
        out.push_str(cell);
        for _ in cell.len()..*width {
            out.push(' ');
        }
    }
    out.push('\n');
}

/// Local-time rendering of the last launch. Zero renders as the epoch, the
/// same way a never-started job reads in the original tooling.
fn format_last_exec(epoch_seconds: i64) -> String {
    match Local.timestamp_opt(epoch_seconds, 0).single() {
        Some(stamp) => stamp.format("%Y-%m-%d %H:%M:%S %z").to_string(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::events::Bus;
    use crate::jobs::{JobLogWriter, JobSpec, JobStatus, Tunables};
    use crate::probe::StaticProbe;

    fn runner(name: &str, groups: &[&str]) -> Arc<JobRunner> {
        JobRunner::new(
            JobSpec {
                name: name.to_string(),
                groups: groups.iter().map(|g| g.to_string()).collect(),
                command: "/bin/true".to_string(),
                working_dir: None,
                user: Some("worker".to_string()),
                queue: "work".to_string(),
                vhost: "/".to_string(),
            },
            Tunables {
                min_messages: 1,
                sleep_time: 3,
                sleep_increment: 1,
                max_sleep: 30,
                max_execution: 0,
                spawn: 1,
            },
            Arc::new(StaticProbe::new(0)),
            JobLogWriter::new("", name, 0.0, 0),
            Bus::new(16),
            CancellationToken::new(),
        )
    }

    #[test]
    fn status_renders_every_runner() {
        let coordinator = Coordinator::new();
        coordinator.register(runner("alpha", &["imports"]));
        coordinator.register(runner("beta", &[]));

        let table = coordinator.status();
        let lines: Vec<&str> = table.lines().collect();

        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("Job"));
        assert!(lines[0].contains("Last Exec"));
        assert!(lines[1].starts_with("alpha"));
        assert!(lines[1].contains('|'));
        assert!(lines[1].contains("[imports]"));
        assert!(lines[1].contains("SLEEPING"));
        assert!(lines[1].contains("worker"));
        assert!(lines[2].starts_with("beta"));
    }

    #[test]
    fn status_of_unknown_job() {
        let coordinator = Coordinator::new();
        assert_eq!(
            coordinator.status_of("ghost"),
            "Can't find job called ghost\n"
        );
    }

    #[test]
    fn status_of_renders_one_row() {
        let coordinator = Coordinator::new();
        coordinator.register(runner("alpha", &[]));
        coordinator.register(runner("beta", &[]));

        let table = coordinator.status_of("beta");
        assert_eq!(table.lines().count(), 2);
        assert!(table.contains("beta"));
        assert!(!table.contains("alpha"));
    }

    #[test]
    fn pause_targets_the_first_name_match() {
        let coordinator = Coordinator::new();
        let first = runner("dup", &[]);
        let second = runner("dup", &[]);
        coordinator.register(Arc::clone(&first));
        coordinator.register(Arc::clone(&second));

        coordinator.pause("dup");

        assert!(first.pause_requested());
        assert!(!second.pause_requested());
    }

    #[test]
    fn group_operations_touch_members_only() {
        let coordinator = Coordinator::new();
        let in_group = runner("a", &["night", "batch"]);
        let outside = runner("b", &["day"]);
        coordinator.register(Arc::clone(&in_group));
        coordinator.register(Arc::clone(&outside));

        coordinator.pause_group("batch");
        assert!(in_group.pause_requested());
        assert!(!outside.pause_requested());

        coordinator.unpause_group("batch");
        assert!(!in_group.pause_requested());
    }

    #[test]
    fn pause_all_and_unpause_all() {
        let coordinator = Coordinator::new();
        let a = runner("a", &[]);
        let b = runner("b", &[]);
        coordinator.register(Arc::clone(&a));
        coordinator.register(Arc::clone(&b));

        coordinator.pause_all();
        assert!(a.pause_requested() && b.pause_requested());

        coordinator.unpause_all();
        assert!(!a.pause_requested() && !b.pause_requested());
    }

    #[tokio::test]
    async fn kill_all_terminates_started_runners() {
        let coordinator = Coordinator::new();
        let a = runner("a", &[]);
        let b = runner("b", &[]);
        coordinator.register(Arc::clone(&a));
        coordinator.register(Arc::clone(&b));
        let handles = vec![Arc::clone(&a).start(), Arc::clone(&b).start()];

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        coordinator.kill_all();
        for handle in handles {
            tokio::time::timeout(std::time::Duration::from_secs(2), handle)
                .await
                .expect("runner did not stop")
                .unwrap();
        }

        assert_eq!(a.snapshot().status, JobStatus::Terminated);
        assert_eq!(b.snapshot().status, JobStatus::Terminated);
    }

    #[test]
    fn update_property_forwards_and_validates() {
        let coordinator = Coordinator::new();
        coordinator.register(runner("tuned", &[]));

        coordinator.update_property("tuned", "min_messages", "9").unwrap();
        assert_eq!(
            coordinator.find_by_name("tuned").unwrap().tunables().min_messages,
            9
        );

        let missing = coordinator.update_property("ghost", "min_messages", "9");
        assert_eq!(
            missing.unwrap_err().to_string(),
            "Can't find job called ghost"
        );

        let negative = coordinator.update_property("tuned", "min_messages", "-1");
        assert_eq!(
            negative.unwrap_err().to_string(),
            "You cannot set a negative value"
        );
    }
}
