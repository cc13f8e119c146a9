//! Runtime event types and the broadcast bus that carries them.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
