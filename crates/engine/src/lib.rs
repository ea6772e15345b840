//! `credmart-engine` — orchestration over the domain crates.
//!
//! The engine owns everything the pure domain crates must not: the event
//! store, the command dispatch pipeline, the marketplace facade that
//! coordinates registry, bid book, wallets and settlement, and the
//! notification fan-out. Domain crates decide; this crate loads, persists,
//! publishes and retries.

pub mod allocator;
pub mod config;
pub mod dispatcher;
pub mod marketplace;
pub mod notify;
pub mod store;
pub mod telemetry;


pub use allocator::SettlementOutcome;
pub use config::{DutchClosePolicy, MarketplaceConfig};
pub use dispatcher::CommandDispatcher;
pub use marketplace::{Marketplace, TitleMetadata, TokenReference, TokenReferenceProvider};
pub use notify::MarketNotification;
pub use store::{EventStore, InMemoryEventStore, StoredEvent, UncommittedEvent};
