//! # Job specification: identity and tunables.
//!
//! A job splits into two halves with different mutability:
//! - [`JobSpec`] is the immutable identity (name, command, queue, user). It is
//!   fixed at load time.
//! - [`Tunables`] are the numeric knobs the control plane may change at
//!   runtime. The owning runner reads them once per loop iteration, so a
//!   mutation never affects an in-flight child.

use crate::config::JobConfig;
use crate::error::UpdateError;
use crate::policies::BackoffPolicy;

/// Immutable job identity.
#[derive(Clone, Debug)]
pub struct JobSpec {
    pub name: String,
    pub groups: Vec<String>,
    /// Whitespace-split command line; the first field is the executable.
    /// There is no quoting: arguments containing spaces cannot be expressed.
    pub command: String,
    pub working_dir: Option<String>,
    /// OS user the child runs as. `None` keeps the supervisor's identity.
    pub user: Option<String>,
    pub queue: String,
    pub vhost: String,
}

impl JobSpec {
    /// Builds the identity from a job definition and its resolved
    /// connection's vhost. Empty strings for the optional fields count as
    /// unset, the way operators write them in existing configs.
    pub fn from_config(job: &JobConfig, vhost: &str) -> Self {
        Self {
            name: job.name.clone(),
            groups: job.groups.clone(),
            command: job.command.clone(),
            working_dir: job.working_dir.clone().filter(|dir| !dir.is_empty()),
            user: job.user.clone().filter(|user| !user.is_empty()),
            queue: job.queue.clone(),
            vhost: vhost.to_string(),
        }
    }
}

/// Runtime-mutable job parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tunables {
    /// Minimum backlog before the command runs.
    pub min_messages: u64,
    /// Base sleep between polls, seconds.
    pub sleep_time: u64,
    /// Linear growth per idle poll, seconds.
    pub sleep_increment: u64,
    /// Sleep ceiling, seconds.
    pub max_sleep: u64,
    /// Wall-clock limit per run, seconds. 0 disables the deadline.
    pub max_execution: u64,
    /// Replication factor. Only consulted at load time; kept mutable so the
    /// control plane can stage a value for the next restart.
    pub spawn: u32,
}

impl Tunables {
    pub fn from_config(job: &JobConfig) -> Self {
        Self {
            min_messages: job.min_messages,
            sleep_time: job.sleep_time,
            sleep_increment: job.sleep_increment,
            max_sleep: job.max_sleep,
            max_execution: job.max_execution,
            spawn: job.spawn,
        }
    }

    /// The backoff policy induced by the current values.
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            base: self.sleep_time,
            increment: self.sleep_increment,
            max: self.max_sleep,
        }
    }

    /// Applies one control-plane mutation.
    ///
    /// All keys take integers. Sleep and gate values must be >= 0, `spawn`
    /// must be >= 1. Rejected values leave the tunables untouched.
    pub fn update(&mut self, key: &str, value: &str) -> Result<(), UpdateError> {
        let parsed: i64 = value.parse().map_err(|_| UpdateError::NotAnInteger {
            value: value.to_string(),
        })?;

        match key {
            "min_messages" | "sleep_time" | "sleep_increment" | "max_sleep" | "max_execution" => {
                if parsed < 0 {
                    return Err(UpdateError::Negative);
                }
                let value = parsed as u64;
                match key {
                    "min_messages" => self.min_messages = value,
                    "sleep_time" => self.sleep_time = value,
                    "sleep_increment" => self.sleep_increment = value,
                    "max_sleep" => self.max_sleep = value,
                    _ => self.max_execution = value,
                }
                Ok(())
            }
            "spawn" => {
                if parsed <= 0 {
                    return Err(UpdateError::NotPositive);
                }
                self.spawn = parsed as u32;
                Ok(())
            }
            _ => Err(UpdateError::UnknownProperty),
        }
    }
}
