//! `credmart-events` — event abstractions for the marketplace.
//!
//! Domain crates describe what happened with typed events; this crate owns
//! the shared `Event` contract, the stream envelope, and the pub/sub bus the
//! engine uses to hand committed events (and outbound notifications) to
//! external collaborators.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
