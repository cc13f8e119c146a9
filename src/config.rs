//! # Configuration file model.
//!
//! The supervisor is configured by a single JSON document with two arrays:
//! named queue connections and job definitions. Loading performs three
//! expansions before anything else sees the configuration:
//!
//! - `${VAR}` placeholders in connection credentials are substituted from the
//!   environment (unset variables become the empty string),
//! - jobs with `spawn = N > 1` are replicated into `N` independent jobs named
//!   `<name>_0 .. <name>_(N-1)`, each with `spawn = 1`,
//! - nothing else: connection references are resolved later, per job, so one
//!   bad reference skips one job instead of failing the load.

use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;

/// A named queue-metadata endpoint with credentials.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    pub name: String,
    pub endpoint: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub vhost: String,
}

impl ConnectionConfig {
    fn expand_env(&mut self) {
        self.username = expand_env_var(&self.username);
        self.password = expand_env_var(&self.password);
    }
}

/// Substitutes `${VAR}` with the environment variable `VAR`.
///
/// The marker characters are trimmed as character classes, not as fixed
/// strings: `${${FOO}}` reduces to the name `FOO`. Values without both the
/// `${` prefix and the `}` suffix pass through unchanged.
fn expand_env_var(value: &str) -> String {
    if value.starts_with("${") && value.ends_with('}') {
        let name = value.trim_end_matches('}').trim_start_matches(['$', '{']);
        std::env::var(name).unwrap_or_default()
    } else {
        value.to_string()
    }
}

/// One job definition as written by the operator.
#[derive(Debug, Clone, Deserialize)]
pub struct JobConfig {
    pub name: String,
    #[serde(default)]
    pub groups: Vec<String>,
    /// Base sleep between polls, in seconds.
    #[serde(default)]
    pub sleep_time: u64,
    /// Linear growth applied after every idle poll, in seconds.
    #[serde(default)]
    pub sleep_increment: u64,
    /// Ceiling for the adaptive sleep, in seconds.
    #[serde(default)]
    pub max_sleep: u64,
    /// Minimum queue backlog before the command runs.
    #[serde(default)]
    pub min_messages: u64,
    #[serde(default)]
    pub working_dir: Option<String>,
    /// OS user the command runs as. `None` keeps the supervisor's identity.
    #[serde(default)]
    pub user: Option<String>,
    /// Whitespace-split command line. The first field is the executable.
    #[serde(default)]
    pub command: String,
    /// Replication factor applied at load time.
    #[serde(default)]
    pub spawn: u32,
    /// Name of the [`ConnectionConfig`] this job polls through.
    #[serde(default)]
    pub connection: String,
    #[serde(default)]
    pub queue: String,
    /// Base directory for the job's output log. Empty disables logging.
    #[serde(default)]
    pub error_log_path: String,
    #[serde(default)]
    pub error_log_max_kb_size: f64,
    #[serde(default)]
    pub error_log_max_files: u32,
    /// Wall-clock limit for one command run, in seconds. 0 is unbounded.
    #[serde(default)]
    pub max_execution: u64,
}

impl JobConfig {
    /// Clone of this job for spawn expansion. Runtime state is always fresh,
    /// so only the name and the replication factor differ.
    fn replica(&self, index: u32) -> JobConfig {
        let mut clone = self.clone();
        clone.name = format!("{}_{index}", self.name);
        clone.spawn = 1;
        clone
    }
}

/// The whole configuration document.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub connections: Vec<ConnectionConfig>,
    #[serde(default)]
    pub jobs: Vec<JobConfig>,
}

impl ConfigFile {
    /// Reads, parses, and expands the configuration at `path`.
    pub fn load(path: &Path) -> Result<ConfigFile, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let mut config: ConfigFile =
            serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;

        for connection in &mut config.connections {
            connection.expand_env();
        }
        config.jobs = expand_spawned(config.jobs);

        Ok(config)
    }

    /// First connection with the given name, if any.
    pub fn connection_by_name(&self, name: &str) -> Option<&ConnectionConfig> {
        self.connections.iter().find(|c| c.name == name)
    }
}

/// Applies spawn expansion in place.
///
/// Replicas are appended to the end of the list; the original keeps its slot
/// and is renamed `<name>_0`. Appended replicas carry `spawn = 1` and are
/// therefore skipped when the scan reaches them.
fn expand_spawned(mut jobs: Vec<JobConfig>) -> Vec<JobConfig> {
    let mut index = 0;
    while index < jobs.len() {
        if jobs[index].spawn > 1 {
            for n in 1..jobs[index].spawn {
                let replica = jobs[index].replica(n);
                jobs.push(replica);
            }
            jobs[index].name = format!("{}_0", jobs[index].name);
            jobs[index].spawn = 1;
        }
        index += 1;
    }
    jobs
}
