//! In-memory event bus for tests/dev.

use std::collections::BTreeMap;
use std::sync::{mpsc, Mutex};

use crate::bus::{EventBus, Subscription};

#[derive(Debug)]
pub enum InMemoryBusError {
    /// Publish failed due to internal lock poisoning.
    Poisoned,
}

/// Slotted subscriber table. Each subscription owns a slot id; slots whose
/// receiver has hung up are dropped during fan-out.
#[derive(Debug)]
struct SlotTable<M> {
    slots: BTreeMap<u64, mpsc::Sender<M>>,
    next_slot: u64,
}

impl<M> SlotTable<M> {
    fn insert(&mut self, tx: mpsc::Sender<M>) {
        self.slots.insert(self.next_slot, tx);
        self.next_slot += 1;
    }
}

/// In-memory pub/sub bus.
///
/// - No IO / no async
/// - Best-effort fan-out
/// - At-least-once acceptable (subscribers must be idempotent)
#[derive(Debug)]
pub struct InMemoryEventBus<M> {
    table: Mutex<SlotTable<M>>,
}

impl<M> InMemoryEventBus<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscriber slots. Dead slots linger until the next
    /// publish sweeps them.
    pub fn subscriber_count(&self) -> usize {
        self.table.lock().map(|t| t.slots.len()).unwrap_or(0)
    }
}

impl<M> Default for InMemoryEventBus<M> {
    fn default() -> Self {
        Self {
            table: Mutex::new(SlotTable {
                slots: BTreeMap::new(),
                next_slot: 0,
            }),
        }
    }
}

impl<M> EventBus<M> for InMemoryEventBus<M>
where
    M: Clone + Send + 'static,
{
    type Error = InMemoryBusError;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        let mut table = self.table.lock().map_err(|_| InMemoryBusError::Poisoned)?;

        // Fan out in slot order; a slot whose receiver hung up is dropped.
        table.slots.retain(|_, tx| tx.send(message.clone()).is_ok());

        Ok(())
    }

    fn subscribe(&self) -> Subscription<M> {
        let (tx, rx) = mpsc::channel();

        // If the lock is poisoned, we still return a subscription;
        // it just won't receive messages until the process restarts.
        if let Ok(mut table) = self.table.lock() {
            table.insert(tx);
        }

        Subscription::new(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_subscriber_receives_published_messages() {
        let bus: InMemoryEventBus<u32> = InMemoryEventBus::new();
        let a = bus.subscribe();
        let b = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(7).unwrap();

        assert_eq!(a.try_recv().unwrap(), 7);
        assert_eq!(b.try_recv().unwrap(), 7);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let bus: InMemoryEventBus<u32> = InMemoryEventBus::new();
        drop(bus.subscribe());
        bus.publish(1).unwrap();
        assert_eq!(bus.subscriber_count(), 0);

        let live = bus.subscribe();
        bus.publish(2).unwrap();
        assert_eq!(live.try_recv().unwrap(), 2);
        assert_eq!(bus.subscriber_count(), 1);
    }
}
