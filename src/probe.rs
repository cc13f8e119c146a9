//! # Queue-depth probes.
//!
//! A [`QueueProbe`] answers one question: how many messages are ready on a
//! queue right now. The production implementation, [`QueueClient`], performs
//! an authenticated HTTP GET against a RabbitMQ-style management endpoint
//! (`/api/queues/<vhost>/<queue>`) with a finite timeout. [`StaticProbe`]
//! serves test mode and unit tests with a fixed answer.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::ConnectionConfig;
use crate::error::ProbeError;

/// Per-request timeout for queue-metadata calls.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Source of queue-depth readings.
#[async_trait]
pub trait QueueProbe: Send + Sync {
    /// Returns the number of ready messages on `queue` within `vhost`.
    async fn depth(&self, vhost: &str, queue: &str) -> Result<u64, ProbeError>;
}

/// Subset of the queue-info document the supervisor cares about.
#[derive(Debug, Deserialize)]
struct QueueInfo {
    #[serde(default)]
    messages: u64,
}

/// HTTP client for a queue-metadata endpoint.
pub struct QueueClient {
    endpoint: String,
    username: String,
    password: String,
    http: reqwest::Client,
}

impl QueueClient {
    /// Builds a client for one connection. The underlying HTTP client is
    /// reused across polls.
    pub fn new(connection: &ConnectionConfig) -> Result<Self, ProbeError> {
        let http = reqwest::Client::builder().timeout(PROBE_TIMEOUT).build()?;
        Ok(Self {
            endpoint: connection.endpoint.clone(),
            username: connection.username.clone(),
            password: connection.password.clone(),
            http,
        })
    }

    /// Queue-info URL with vhost and queue as percent-encoded path segments.
    /// A vhost of `/` encodes to `%2F`, as the management API expects.
    fn queue_url(&self, vhost: &str, queue: &str) -> Result<reqwest::Url, ProbeError> {
        let mut url = reqwest::Url::parse(&self.endpoint).map_err(|_| ProbeError::Endpoint {
            endpoint: self.endpoint.clone(),
        })?;
        url.path_segments_mut()
            .map_err(|_| ProbeError::Endpoint {
                endpoint: self.endpoint.clone(),
            })?
            .pop_if_empty()
            .extend(["api", "queues", vhost, queue]);
        Ok(url)
    }
}

#[async_trait]
impl QueueProbe for QueueClient {
    async fn depth(&self, vhost: &str, queue: &str) -> Result<u64, ProbeError> {
        let url = self.queue_url(vhost, queue)?;
        let response = self
            .http
            .get(url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ProbeError::QueueInfo {
                queue: queue.to_string(),
                vhost: vhost.to_string(),
            });
        }

        let info: QueueInfo = response.json().await?;
        Ok(info.messages)
    }
}

/// Probe with a fixed answer. Test mode runs every job with a backlog of one.
pub struct StaticProbe {
    messages: u64,
}

impl StaticProbe {
    pub fn new(messages: u64) -> Self {
        Self { messages }
    }
}

#[async_trait]
impl QueueProbe for StaticProbe {
    async fn depth(&self, _vhost: &str, _queue: &str) -> Result<u64, ProbeError> {
        Ok(self.messages)
    }
}
