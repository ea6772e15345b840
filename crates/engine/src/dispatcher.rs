//! Command execution pipeline.
//!
//! One consistent path for every command: load the stream, rehydrate the
//! aggregate, let it decide, append with the loaded version as the expected
//! version, then publish the committed events. A concurrent writer on the
//! same stream makes the append fail with `StaleVersion`; the caller reloads
//! and retries.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use credmart_core::{Aggregate, AggregateId, ExpectedVersion, MarketError, MarketResult};
use credmart_events::{EventBus, EventEnvelope};

use crate::store::{EventStore, StoredEvent, UncommittedEvent};

/// Reusable command execution engine for event-sourced aggregates.
///
/// Composes an `EventStore` and an `EventBus`; contains no IO of its own.
/// Events are persisted before publication, so a publish failure leaves the
/// system consistent and the publication can be retried (at-least-once).
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_parts(self) -> (S, B) {
        (self.store, self.bus)
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Rehydrate an aggregate from its stream without dispatching anything.
    pub fn load<A>(
        &self,
        aggregate_id: AggregateId,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> MarketResult<A>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        let history = self.store.load_stream(aggregate_id)?;
        validate_loaded_stream(aggregate_id, &history)?;
        let mut aggregate = make_aggregate(aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;
        Ok(aggregate)
    }

    /// Dispatch a command through the full pipeline.
    ///
    /// Load, rehydrate, decide, append (optimistic), publish. Returns the
    /// committed events; an empty vector means the aggregate recognized the
    /// command as a replay and emitted nothing.
    pub fn dispatch<A>(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        command: A::Command,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> MarketResult<Vec<StoredEvent>>
    where
        A: Aggregate,
        A::Event: credmart_events::Event + Serialize + DeserializeOwned,
    {
        let history = self.store.load_stream(aggregate_id)?;
        validate_loaded_stream(aggregate_id, &history)?;
        let expected = ExpectedVersion::Exact(stream_version(&history));

        let mut aggregate = make_aggregate(aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;

        let decided = aggregate.handle(&command)?;
        if decided.is_empty() {
            return Ok(vec![]);
        }

        let aggregate_type = aggregate_type.into();
        let uncommitted = decided
            .iter()
            .map(|ev| {
                UncommittedEvent::from_typed(
                    aggregate_id,
                    aggregate_type.clone(),
                    Uuid::now_v7(),
                    ev,
                )
            })
            .collect::<MarketResult<Vec<_>>>()?;

        let committed = self.store.append(uncommitted, expected)?;

        for stored in &committed {
            self.bus
                .publish(stored.to_envelope())
                .map_err(|e| MarketError::storage(format!("event publication failed: {e:?}")))?;
        }

        Ok(committed)
    }

    /// Dispatch, retrying on optimistic-concurrency losses.
    ///
    /// Each attempt reloads the stream, so the aggregate re-decides against
    /// fresh state. Deterministic domain failures surface immediately; only
    /// `StaleVersion` is retried, up to `max_retries` extra attempts.
    pub fn dispatch_with_retry<A>(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: A::Command,
        make_aggregate: impl Fn(AggregateId) -> A,
        max_retries: u32,
    ) -> MarketResult<Vec<StoredEvent>>
    where
        A: Aggregate,
        A::Event: credmart_events::Event + Serialize + DeserializeOwned,
    {
        let mut attempt = 0;
        loop {
            match self.dispatch::<A>(aggregate_id, aggregate_type, command.clone(), &make_aggregate)
            {
                Err(err) if err.is_retryable() && attempt < max_retries => {
                    attempt += 1;
                    tracing::debug!(
                        aggregate_type,
                        %aggregate_id,
                        attempt,
                        "retrying after concurrency conflict"
                    );
                }
                other => return other,
            }
        }
    }
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

fn validate_loaded_stream(
    aggregate_id: AggregateId,
    stream: &[StoredEvent],
) -> MarketResult<()> {
    // Sequence numbers must be strictly increasing even if the backend is
    // buggy; rehydrating out of order silently corrupts state.
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.aggregate_id != aggregate_id {
            return Err(MarketError::storage(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            )));
        }
        if e.sequence_number <= last {
            return Err(MarketError::storage(format!(
                "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                e.sequence_number
            )));
        }
        last = e.sequence_number;
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> MarketResult<()>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    for stored in history {
        let ev: A::Event = serde_json::from_value(stored.payload.clone())
            .map_err(|e| MarketError::storage(format!("event deserialization failed: {e}")))?;
        aggregate.apply(&ev);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use credmart_core::AggregateRoot;
    use credmart_events::InMemoryEventBus;
    use serde::Deserialize;
    use std::sync::Arc;

    use crate::store::InMemoryEventStore;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Counter {
        id: AggregateId,
        count: u64,
        version: u64,
    }

    impl Counter {
        fn empty(id: AggregateId) -> Self {
            Self {
                id,
                count: 0,
                version: 0,
            }
        }
    }

    #[derive(Debug, Clone)]
    enum CounterCommand {
        Tick { at: DateTime<Utc> },
        Saturate { at: DateTime<Utc> },
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    struct Ticked {
        at: DateTime<Utc>,
    }

    impl credmart_events::Event for Ticked {
        fn event_type(&self) -> &'static str {
            "test.counter.ticked"
        }
        fn version(&self) -> u32 {
            1
        }
        fn occurred_at(&self) -> DateTime<Utc> {
            self.at
        }
    }

    impl AggregateRoot for Counter {
        type Id = AggregateId;
        fn id(&self) -> &Self::Id {
            &self.id
        }
        fn version(&self) -> u64 {
            self.version
        }
    }

    impl Aggregate for Counter {
        type Command = CounterCommand;
        type Event = Ticked;

        fn apply(&mut self, _event: &Self::Event) {
            self.count += 1;
            self.version += 1;
        }

        fn handle(&self, command: &Self::Command) -> MarketResult<Vec<Self::Event>> {
            match command {
                CounterCommand::Tick { at } => Ok(vec![Ticked { at: *at }]),
                // Replay-style no-op once the counter has ever ticked.
                CounterCommand::Saturate { at } => {
                    if self.count > 0 {
                        Ok(vec![])
                    } else {
                        Ok(vec![Ticked { at: *at }])
                    }
                }
            }
        }
    }

    fn dispatcher() -> CommandDispatcher<Arc<InMemoryEventStore>, Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>>
    {
        CommandDispatcher::new(
            Arc::new(InMemoryEventStore::new()),
            Arc::new(InMemoryEventBus::new()),
        )
    }

    #[test]
    fn dispatch_persists_and_publishes() {
        let bus = Arc::new(InMemoryEventBus::new());
        let sub = bus.subscribe();
        let d = CommandDispatcher::new(Arc::new(InMemoryEventStore::new()), bus);
        let id = AggregateId::new();

        let committed = d
            .dispatch::<Counter>(id, "test.counter", CounterCommand::Tick { at: Utc::now() }, Counter::empty)
            .unwrap();
        assert_eq!(committed.len(), 1);
        assert_eq!(committed[0].sequence_number, 1);
        assert_eq!(committed[0].event_type, "test.counter.ticked");

        let envelope = sub.try_recv().unwrap();
        assert_eq!(envelope.aggregate_id(), id);
        assert_eq!(envelope.sequence_number(), 1);
    }

    #[test]
    fn empty_decision_appends_nothing() {
        let d = dispatcher();
        let id = AggregateId::new();

        d.dispatch::<Counter>(id, "test.counter", CounterCommand::Tick { at: Utc::now() }, Counter::empty)
            .unwrap();
        let committed = d
            .dispatch::<Counter>(
                id,
                "test.counter",
                CounterCommand::Saturate { at: Utc::now() },
                Counter::empty,
            )
            .unwrap();
        assert!(committed.is_empty());

        let loaded: Counter = d.load(id, Counter::empty).unwrap();
        assert_eq!(loaded.count, 1);
        assert_eq!(loaded.version(), 1);
    }

    #[test]
    fn rehydration_replays_in_order() {
        let d = dispatcher();
        let id = AggregateId::new();
        for _ in 0..3 {
            d.dispatch::<Counter>(id, "test.counter", CounterCommand::Tick { at: Utc::now() }, Counter::empty)
                .unwrap();
        }

        let loaded: Counter = d.load(id, Counter::empty).unwrap();
        assert_eq!(loaded.count, 3);
        assert_eq!(loaded.version(), 3);
    }
}
