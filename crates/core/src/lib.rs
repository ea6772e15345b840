//! `credmart-core` — domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! the marketplace error model, strongly typed identifiers, money values and
//! the aggregate abstractions shared by every domain crate.

pub mod aggregate;
pub mod error;
pub mod id;
pub mod money;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use error::{MarketError, MarketResult};
pub use id::{AggregateId, UserId};
pub use money::{Amount, FeeRate};
