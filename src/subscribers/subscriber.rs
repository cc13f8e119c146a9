//! The [`Subscribe`] trait implemented by event consumers.

use async_trait::async_trait;

use crate::events::Event;

/// Consumer of runtime [`Event`]s.
///
/// Implementations are driven by the supervisor's fan-out task and must not
/// block for long: every subscriber shares one delivery loop.
#[async_trait]
pub trait Subscribe: Send + Sync {
    /// Handles one event.
    async fn handle(&self, event: &Event);
}
