//! # Error types used by the supervisor runtime.
//!
//! - [`ConfigError`] failures while loading the configuration file. These are
//!   the only errors that are fatal to the whole process (exit code 1).
//! - [`ProbeError`] failures of a queue-depth probe. The owning job loop
//!   records them in the job's log and retries with backoff.
//! - [`UpdateError`] rejected control-plane property mutations.
//! - [`ControlError`] errors surfaced to a control-plane client as text.
//! - [`UserLookupError`] failures resolving a job's `user` against the system
//!   user database. The job then runs without a privilege drop.

use thiserror::Error;

/// Errors raised while loading and expanding the configuration file.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be opened or read.
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// Path passed on the command line.
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// The configuration file is not valid JSON for the expected schema.
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        /// Path passed on the command line.
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ConfigError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            ConfigError::Read { .. } => "config_read",
            ConfigError::Parse { .. } => "config_parse",
        }
    }
}

/// Errors raised by a queue-depth probe.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ProbeError {
    /// The connection endpoint is not a usable base URL.
    #[error("queue endpoint {endpoint:?} is not a valid base url")]
    Endpoint { endpoint: String },
    /// The queue-metadata endpoint answered with a non-success status.
    #[error("can't recover information for queue {queue} on virtual host {vhost}")]
    QueueInfo { queue: String, vhost: String },
    /// Transport-level failure (connect, timeout, body decode).
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl ProbeError {
    /// Returns a short stable label.
    pub fn as_label(&self) -> &'static str {
        match self {
            ProbeError::Endpoint { .. } => "probe_endpoint",
            ProbeError::QueueInfo { .. } => "probe_queue_info",
            ProbeError::Http(_) => "probe_http",
        }
    }
}

/// Rejected `update-job` property mutations.
///
/// The `Display` text of these variants is written verbatim to the control
/// socket, so the wording is part of the operator-facing interface.
#[non_exhaustive]
#[derive(Error, Debug, PartialEq, Eq)]
pub enum UpdateError {
    #[error("You cannot set a negative value")]
    Negative,
    #[error("You cannot set a negative value or 0")]
    NotPositive,
    #[error("Invalid value {value:?}: expected an integer")]
    NotAnInteger { value: String },
    #[error("Property not supported. The supported properties are: min_messages | sleep_time | sleep_increment | max_sleep | max_execution | spawn")]
    UnknownProperty,
}

/// Errors surfaced to a control-plane client.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("Can't find job called {name}")]
    UnknownJob { name: String },
    #[error(transparent)]
    Update(#[from] UpdateError),
}

/// Failures resolving a configured `user` to uid/gid/groups.
#[cfg(unix)]
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum UserLookupError {
    #[error("user {name:?} not found in the system user database")]
    NotFound { name: String },
    #[error("user name contains an interior NUL byte")]
    BadName,
    #[error("user database lookup failed: {0}")]
    Lookup(#[from] nix::Error),
}
