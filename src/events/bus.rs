//! # Event bus: delivery of job lifecycle events to subscribers.
//!
//! Runners and the supervisor publish [`Event`]s describing the job
//! lifecycle (children spawned and reaped, probes failing, deadline kills,
//! the shutdown flow). The [`Bus`] broadcasts each one and owns the delivery
//! loop that feeds the subscriber set.
//!
//! Delivery is best-effort by design: the supervisor operates the same with
//! nobody listening, subscribers only add visibility. A publishing runner is
//! never blocked; when subscribers fall behind the bounded channel, the
//! skipped events are reported to the supervisor log instead of being
//! redelivered.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::subscribers::Subscribe;

use super::event::Event;

/// Broadcast channel for job lifecycle events, plus the fan-out loop that
/// drains it.
#[derive(Clone)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates a bus buffering at most `capacity` undelivered events.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publishes one event without blocking the caller. With no active
    /// fan-out the event is dropped; a full channel evicts the oldest
    /// undelivered events first.
    pub fn publish(&self, event: Event) {
        let _ = self.tx.send(event);
    }

    /// Spawns the background task that hands every event to each subscriber
    /// in turn.
    ///
    /// Call once at supervisor startup, before the runners spawn, so early
    /// lifecycle events are not lost. The task ends when the last publishing
    /// handle is dropped. Events a slow subscriber missed are counted and
    /// surfaced in the supervisor log, never redelivered.
    pub fn spawn_fanout(&self, subscribers: Vec<Arc<dyn Subscribe>>) {
        let mut rx = self.tx.subscribe();

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        for subscriber in &subscribers {
                            subscriber.handle(&event).await;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "subscribers fell behind, events dropped");
                    }
                }
            }
        });
    }
}
