//! Event system for todo synchronization.
//!
//! This module defines the status event published on every record transition, the handler trait
//! for in-process consumers and the `EventHub` that fans events out. Per-todo subscribers receive
//! events over unbounded channels; registered handlers are called synchronously, in registration
//! order.
//!
//! The hub lives next to the tracker behind the engine mutex and is fed while that mutex is held,
//! so every subscriber observes a todo's transitions in the order they happened.

use crate::network::Network;
use crate::sync::reconciliation::{DriftReport, SyncStats};
use crate::sync::record::{RecordId, SyncFailure, TransactionRecord, TxState};
use crate::todo::TodoId;

use futures::channel::mpsc::{UnboundedReceiver, UnboundedSender, unbounded};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, error, info, warn};

/// Status update for one record.
///
/// `stats` is set when the transition changed the aggregate stats. `drift` is set on advisory
/// drift events, which repeat the record's (unchanged) state. Terminal events may be delivered
/// more than once.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatusEvent {
    pub todo_id: TodoId,
    pub record_id: RecordId,
    pub state: TxState,
    pub network: Network,
    pub attempt_count: u32,
    pub explorer_url: Option<String>,
    pub last_error: Option<SyncFailure>,
    pub stats: Option<SyncStats>,
    pub drift: Option<DriftReport>,
}

impl SyncStatusEvent {
    pub fn from_record(record: &TransactionRecord) -> Self {
        Self {
            todo_id: record.todo_id.clone(),
            record_id: record.record_id.clone(),
            state: record.state,
            network: record.network,
            attempt_count: record.attempt_count,
            explorer_url: record.explorer_url(),
            last_error: record.last_error.clone(),
            stats: None,
            drift: None,
        }
    }

    pub fn with_stats(mut self, stats: Option<SyncStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn with_drift(mut self, drift: DriftReport) -> Self {
        self.drift = Some(drift);
        self
    }

    /// Drift events do not report a transition.
    pub fn is_advisory(&self) -> bool {
        self.drift.is_some()
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

/// Trait for handling sync status events.
///
/// Implementors receive every event published by the engine. Handlers run while the engine
/// state is locked and must not block.
pub trait SyncEventHandler: Send + Sync {
    /// Handle a status event.
    fn handle(&mut self, event: &SyncStatusEvent) -> Result<(), HandlerError>;

    /// Get the name of this handler for logging and diagnostics.
    fn name(&self) -> &'static str;
}

/// Fan-out of status events to per-todo subscribers and registered handlers.
#[derive(Default)]
pub struct EventHub {
    subscribers: HashMap<TodoId, Vec<UnboundedSender<SyncStatusEvent>>>,
    handlers: Vec<Box<dyn SyncEventHandler>>,
}

impl EventHub {
    /// Create a new, empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to the events of one todo.
    pub fn subscribe(&mut self, todo_id: &str) -> UnboundedReceiver<SyncStatusEvent> {
        let (sender, receiver) = unbounded();
        self.subscribers
            .entry(todo_id.to_string())
            .or_default()
            .push(sender);
        receiver
    }

    /// Register a new event handler.
    ///
    /// Handlers are called in the order they are registered.
    pub fn register_handler(&mut self, handler: Box<dyn SyncEventHandler>) {
        debug!("Registered event handler {}", handler.name());
        self.handlers.push(handler);
    }

    pub fn subscriber_count(&self, todo_id: &str) -> usize {
        self.subscribers.get(todo_id).map_or(0, Vec::len)
    }

    /// Publish an event.
    ///
    /// Closed subscriptions are dropped. Errors from handlers are logged, but do not stop other
    /// handlers from running.
    pub fn publish(&mut self, event: SyncStatusEvent) {
        if let Some(senders) = self.subscribers.get_mut(&event.todo_id) {
            senders.retain(|sender| sender.unbounded_send(event.clone()).is_ok());
            if senders.is_empty() {
                self.subscribers.remove(&event.todo_id);
            }
        }

        for handler in &mut self.handlers {
            if let Err(e) = handler.handle(&event) {
                error!("Handler {} failed to process event: {}", handler.name(), e);
            }
        }
    }
}

/// Handler that logs status events.
pub struct TracingEventHandler;

impl SyncEventHandler for TracingEventHandler {
    fn handle(&mut self, event: &SyncStatusEvent) -> Result<(), HandlerError> {
        if let Some(drift) = &event.drift {
            warn!(
                "Drift detected for todo {} on {}: {:?}",
                event.todo_id, drift.network, drift.kind
            );
            return Ok(());
        }

        match &event.last_error {
            Some(failure) if event.state == TxState::Failed => info!(
                "Todo {} [{}] on {}: Failed after {} attempt(s) ({})",
                event.todo_id, event.record_id, event.network, event.attempt_count, failure
            ),
            _ => info!(
                "Todo {} [{}] on {}: {}",
                event.todo_id, event.record_id, event.network, event.state
            ),
        }
        if let Some(stats) = &event.stats {
            info!("Sync stats: {}", stats.summary());
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "tracing"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{OperationKind, TodoOperation};
    use crate::todo::store::sample_todo;
    use futures::StreamExt;
    use std::sync::{Arc, Mutex};

    struct Collect(Arc<Mutex<Vec<TxState>>>);

    impl SyncEventHandler for Collect {
        fn handle(&mut self, event: &SyncStatusEvent) -> Result<(), HandlerError> {
            self.0.lock().unwrap().push(event.state);
            Ok(())
        }

        fn name(&self) -> &'static str {
            "collect"
        }
    }

    struct Failing;

    impl SyncEventHandler for Failing {
        fn handle(&mut self, _event: &SyncStatusEvent) -> Result<(), HandlerError> {
            Err(HandlerError("boom".into()))
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    fn event(todo_id: &str) -> SyncStatusEvent {
        let todo = sample_todo(todo_id, "Renew passport");
        let record = TransactionRecord::new(
            todo.id.clone(),
            Network::Moonbeam,
            TodoOperation::from_todo(OperationKind::Create, &todo),
            1,
        );
        SyncStatusEvent::from_record(&record)
    }

    #[tokio::test]
    async fn subscribers_only_see_their_todo() {
        let mut hub = EventHub::new();
        let mut t1 = hub.subscribe("t1");
        let t2 = hub.subscribe("t2");

        hub.publish(event("t1"));
        drop(t2);
        hub.publish(event("t2"));
        drop(hub);

        let received: Vec<_> = t1.by_ref().collect().await;
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].todo_id, "t1");
        assert_eq!(received[0].state, TxState::Created);
    }

    #[test]
    fn closed_subscriptions_are_dropped() {
        let mut hub = EventHub::new();
        let rx = hub.subscribe("t1");
        assert_eq!(hub.subscriber_count("t1"), 1);
        drop(rx);
        hub.publish(event("t1"));
        assert_eq!(hub.subscriber_count("t1"), 0);
    }

    #[test]
    fn failing_handlers_do_not_stop_others() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut hub = EventHub::new();
        hub.register_handler(Box::new(Failing));
        hub.register_handler(Box::new(Collect(seen.clone())));
        hub.register_handler(Box::new(TracingEventHandler));

        hub.publish(event("t1"));
        assert_eq!(*seen.lock().unwrap(), vec![TxState::Created]);
    }
}
