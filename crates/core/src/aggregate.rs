//! Aggregate root traits for the event-sourced marketplace domain.

use crate::error::{MarketError, MarketResult};

/// Aggregate root marker + minimal interface.
///
/// Intentionally small so each domain crate decides how it models state
/// transitions without bringing in any infrastructure concerns.
pub trait AggregateRoot {
    /// Strongly-typed aggregate identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the aggregate identifier.
    fn id(&self) -> &Self::Id;

    /// Monotonically increasing version of the aggregate's state.
    ///
    /// Corresponds to the number of events applied (the stream revision),
    /// which is what the optimistic-concurrency check compares against.
    fn version(&self) -> u64;
}

/// Optimistic concurrency expectation for an aggregate stream.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Skip version checking (idempotent maintenance commands, backfills).
    Any,
    /// Require the stream to be at an exact version.
    Exact(u64),
}

impl ExpectedVersion {
    pub fn matches(self, actual: u64) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::Exact(v) => v == actual,
        }
    }

    pub fn check(self, actual: u64) -> MarketResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(MarketError::stale_version(format!(
                "expected {self:?}, actual {actual}"
            )))
        }
    }
}

/// Aggregate execution semantics (pure, deterministic).
///
/// - **Decision logic**: `handle(&self, cmd)` returns events.
/// - **State mutation**: `apply(&mut self, event)` evolves state.
///
/// Aggregates must not perform IO or side effects. They only return events
/// describing what happened; the engine layer persists and publishes them.
pub trait Aggregate: AggregateRoot {
    type Command: Clone + core::fmt::Debug;
    type Event: Clone + core::fmt::Debug;

    /// Evolve in-memory state from a single event.
    ///
    /// Must be deterministic and advance `version()` by one per applied event.
    fn apply(&mut self, event: &Self::Event);

    /// Decide which events to emit given the current state and a command.
    ///
    /// Must not mutate state. Returning an empty vector means the command was
    /// a recognized replay (idempotent no-op), not a failure.
    fn handle(&self, command: &Self::Command) -> MarketResult<Vec<Self::Event>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_version_exact_rejects_mismatch() {
        let err = ExpectedVersion::Exact(3).check(5).unwrap_err();
        assert!(matches!(err, MarketError::StaleVersion(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn expected_version_any_matches_everything() {
        assert!(ExpectedVersion::Any.matches(0));
        assert!(ExpectedVersion::Any.matches(42));
        ExpectedVersion::Any.check(42).unwrap();
    }
}
