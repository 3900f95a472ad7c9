// Dotrel
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Transaction lifecycle event bus.
//!
//! Decouples lock-release and transaction-end signalling from the manager
//! internals. Publication is synchronous on the publisher's thread; handlers
//! must be short and non-blocking (their job is to wake condition variables).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use super::lib::{TransactionId, TransactionOutcome};

/// Identifier of a registered handler, used to unsubscribe.
pub type HandlerId = u64;

/// Events emitted by the transaction engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionEvent {
    /// A transaction released its locks.
    LockReleased,
    /// A transaction reached a terminal state.
    TransactionFinished(TransactionId, TransactionOutcome),
    /// The active transaction count dropped to zero.
    AllTransactionsFinished,
}

impl TransactionEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            TransactionEvent::LockReleased => EventKind::LockReleased,
            TransactionEvent::TransactionFinished(_, _) => EventKind::TransactionFinished,
            TransactionEvent::AllTransactionsFinished => EventKind::AllTransactionsFinished,
        }
    }
}

/// Discriminant of `TransactionEvent`, the subscription key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    LockReleased,
    TransactionFinished,
    AllTransactionsFinished,
}

type Handler = Arc<dyn Fn(&TransactionEvent) + Send + Sync>;

/// The EventBus handles registration of event handlers and dispatches
/// published events to the handlers registered for their kind.
pub struct EventBus {
    handlers: RwLock<HashMap<EventKind, HashMap<HandlerId, Handler>>>,
    next_handler_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        EventBus {
            handlers: RwLock::new(HashMap::new()),
            next_handler_id: AtomicU64::new(1),
        }
    }

    /// Register a handler for one event kind.
    pub fn subscribe(&self, kind: EventKind, handler: Handler) -> HandlerId {
        let handler_id = self.next_handler_id.fetch_add(1, Ordering::Relaxed);

        // Acquire write lock, recover from poison if needed
        let mut handlers_map = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        handlers_map.entry(kind).or_default().insert(handler_id, handler);

        handler_id
    }

    /// Unregister a handler by its ID and event kind.
    pub fn unsubscribe(&self, kind: EventKind, handler_id: HandlerId) -> bool {
        let mut handlers_map = self.handlers.write().unwrap_or_else(|e| e.into_inner());

        if let Some(kind_handlers) = handlers_map.get_mut(&kind) {
            let removed = kind_handlers.remove(&handler_id).is_some();
            if kind_handlers.is_empty() {
                handlers_map.remove(&kind);
            }
            removed
        } else {
            false
        }
    }

    /// Dispatch an event to every handler registered for its kind, on the
    /// calling thread, under the read lock.
    pub fn publish(&self, event: &TransactionEvent) {
        let handlers_map = self.handlers.read().unwrap_or_else(|e| e.into_inner());
        if let Some(kind_handlers) = handlers_map.get(&event.kind()) {
            for handler in kind_handlers.values() {
                handler(event);
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_subscribe_and_publish() {
        let bus = EventBus::new();

        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();

        let handler_id = bus.subscribe(
            EventKind::LockReleased,
            Arc::new(move |_event| {
                counter_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        bus.publish(&TransactionEvent::LockReleased);
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        // Test unsubscribe
        assert!(bus.unsubscribe(EventKind::LockReleased, handler_id));

        bus.publish(&TransactionEvent::LockReleased);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_multiple_handlers() {
        let bus = EventBus::new();

        let counter1 = Arc::new(AtomicUsize::new(0));
        let counter1_clone = counter1.clone();

        let counter2 = Arc::new(AtomicUsize::new(0));
        let counter2_clone = counter2.clone();

        bus.subscribe(
            EventKind::TransactionFinished,
            Arc::new(move |_event| {
                counter1_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );
        bus.subscribe(
            EventKind::TransactionFinished,
            Arc::new(move |_event| {
                counter2_clone.fetch_add(2, Ordering::SeqCst);
            }),
        );

        bus.publish(&TransactionEvent::TransactionFinished(
            TransactionId(7),
            TransactionOutcome::Committed,
        ));

        assert_eq!(counter1.load(Ordering::SeqCst), 1);
        assert_eq!(counter2.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_kinds_are_independent() {
        let bus = EventBus::new();

        let finished = Arc::new(AtomicUsize::new(0));
        let finished_clone = finished.clone();

        bus.subscribe(
            EventKind::AllTransactionsFinished,
            Arc::new(move |_event| {
                finished_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        bus.publish(&TransactionEvent::LockReleased);
        assert_eq!(finished.load(Ordering::SeqCst), 0);

        bus.publish(&TransactionEvent::AllTransactionsFinished);
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handler_receives_payload() {
        let bus = EventBus::new();

        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();

        bus.subscribe(
            EventKind::TransactionFinished,
            Arc::new(move |event| {
                if let TransactionEvent::TransactionFinished(txn, outcome) = event
                    && outcome.is_committed()
                {
                    seen_clone.store(txn.0 as usize, Ordering::SeqCst);
                }
            }),
        );

        bus.publish(&TransactionEvent::TransactionFinished(
            TransactionId(42),
            TransactionOutcome::Committed,
        ));
        assert_eq!(seen.load(Ordering::SeqCst), 42);
    }
}
