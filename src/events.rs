// Copyright (c) 2024 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! The pool's event taxonomy, as a typed sum type rather than stringly-typed
//! event names.

use std::sync::Arc;

use tokio::sync::broadcast;

/// A single emitted event. Events never carry `this`/pool references
/// implicitly; callers that need to correlate events with a pool should key
/// their subscription by the `pool_id` passed to [`EventBus::new`].
#[derive(Debug, Clone)]
pub enum PoolEvent {
    Create,
    ListenConnecting { attempt: u32 },
    ListenSuccess,
    ListenError { message: Arc<str> },
    Release,
    GracefulShutdown { message: Option<Arc<str>> },
    GracefulShutdownWorkerError { worker_id: Arc<str>, message: Arc<str> },
    GracefulShutdownComplete,
    GracefulShutdownError { message: Arc<str> },
    ForcefulShutdown { message: Arc<str> },
    ForcefulShutdownComplete,
    ForcefulShutdownError { message: Arc<str> },
    ResetLockedStarted,
    ResetLockedSuccess { next_delay_ms: Option<u64> },
    ResetLockedFailure { message: Arc<str>, next_delay_ms: Option<u64> },
}

/// A `pool_id`-tagged event, as delivered to subscribers.
#[derive(Debug, Clone)]
pub struct PoolEventEnvelope {
    pub pool_id: u64,
    pub event: PoolEvent,
}

/// A broadcast-backed event bus. Lagging subscribers silently miss old
/// events rather than blocking the pool — an observer pattern over a bounded
/// buffer, not a durable log.
#[derive(Debug, Clone)]
pub struct EventBus {
    pool_id: u64,
    sender: broadcast::Sender<PoolEventEnvelope>,
}

impl EventBus {
    pub fn new(pool_id: u64) -> Self {
        let (sender, _) = broadcast::channel(256);
        Self { pool_id, sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PoolEventEnvelope> {
        self.sender.subscribe()
    }

    /// Emits an event. Returns the number of active subscribers that
    /// received it; emitting with zero subscribers is not an error.
    pub fn emit(&self, event: PoolEvent) {
        let _ = self.sender.send(PoolEventEnvelope {
            pool_id: self.pool_id,
            event,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_tagged_events() {
        let bus = EventBus::new(42);
        let mut rx = bus.subscribe();
        bus.emit(PoolEvent::Create);
        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.pool_id, 42);
        assert!(matches!(envelope.event, PoolEvent::Create));
    }

    #[tokio::test]
    async fn emit_without_subscribers_does_not_panic() {
        let bus = EventBus::new(1);
        bus.emit(PoolEvent::Release);
    }
}
