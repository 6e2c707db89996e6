//! Todo sync orchestrator and integration point for all sync services.
//!
//! This module defines the `SyncOrchestrator`, which coordinates all components involved in
//! mirroring todos onto blockchain networks. It validates sync requests, owns the shared engine
//! state and starts a pipeline for every record it accepts.
//!
//! The orchestrator is responsible for:
//! - Holding the per-todo lock: one unresolved record per todo at any time
//! - Refusing to re-target a todo that is on-chain on another network
//! - Publishing a status event for every record transition, in order, with the stats it changed
//! - Persisting records and resuming unresolved ones after a restart
//!
//! Tracker, reconciliation engine and event hub live behind a single mutex, so a transition, the
//! stats recomputed from it and the event announcing it are observed together.

use crate::adapter::{AdapterRegistry, OperationKind, RegisteredNetwork, TodoOperation};
use crate::config::SchedulerConfig;
use crate::network::Network;
use crate::sync::events::{EventHub, SyncEventHandler, SyncStatusEvent, TracingEventHandler};
use crate::sync::pipeline::Pipeline;
use crate::sync::reconciliation::{DriftReport, ReconciliationEngine, SyncStats, UnifiedTodoView};
use crate::sync::record::{RecordId, RecordUpdate, TransactionRecord};
use crate::sync::scheduler::{PollScheduler, SchedulerError};
use crate::sync::state_persistence::{PersistenceError, StatePersistenceService};
use crate::sync::tracker::{TrackerError, TransactionTracker};
use crate::todo::{StoreError, TodoFilter, TodoId, TodoStore};

use futures::channel::mpsc::UnboundedReceiver;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Network {0} is not configured")]
    UnsupportedNetwork(Network),

    #[error("Todo not found: {0}")]
    TodoNotFound(TodoId),

    #[error("Todo {todo_id} already has an unresolved sync ({record_id})")]
    AlreadySyncing { todo_id: TodoId, record_id: RecordId },

    #[error("Todo {todo_id} is on-chain on {current}; it cannot be synced to {requested}")]
    TargetConflict {
        todo_id: TodoId,
        current: Network,
        requested: Network,
    },

    #[error("Sync queue is full ({capacity} records in flight)")]
    QueueFull { capacity: usize },

    #[error("Sync engine is shutting down")]
    ShuttingDown,

    #[error("Record not found: {0}")]
    RecordNotFound(RecordId),

    #[error("Todo store error: {0}")]
    Store(#[from] StoreError),

    #[error("Tracker error: {0}")]
    Tracker(#[from] TrackerError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

impl From<SchedulerError> for OrchestratorError {
    fn from(error: SchedulerError) -> Self {
        match error {
            SchedulerError::QueueFull { capacity } => OrchestratorError::QueueFull { capacity },
            SchedulerError::ShuttingDown => OrchestratorError::ShuttingDown,
        }
    }
}

/// State guarded by the engine mutex.
pub(crate) struct EngineState {
    tracker: TransactionTracker,
    reconciler: ReconciliationEngine,
    events: EventHub,
}

impl EngineState {
    /// Apply an update and publish the transition with the stats it changed.
    fn apply(
        &mut self,
        record_id: &RecordId,
        expected_version: u64,
        update: RecordUpdate,
    ) -> Result<TransactionRecord, TrackerError> {
        let record = self.tracker.apply(record_id, expected_version, update)?;
        self.publish(&record);
        Ok(record)
    }

    fn publish(&mut self, record: &TransactionRecord) {
        let stats = self.reconciler.refresh_stats(&self.tracker);
        self.events
            .publish(SyncStatusEvent::from_record(record).with_stats(stats));
    }
}

/// Services shared by the orchestrator and its pipelines.
pub(crate) struct SyncContext {
    pub(crate) registry: AdapterRegistry,
    pub(crate) store: Arc<dyn TodoStore>,
    pub(crate) scheduler: PollScheduler,
    state: Mutex<EngineState>,
    persistence: Option<StatePersistenceService>,
    // Serializes snapshot writes.
    persist_lock: tokio::sync::Mutex<()>,
}

impl SyncContext {
    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn record(&self, record_id: &RecordId) -> Option<TransactionRecord> {
        self.lock().tracker.get(record_id).cloned()
    }

    pub(crate) fn commit(
        &self,
        record_id: &RecordId,
        expected_version: u64,
        update: RecordUpdate,
    ) -> Result<TransactionRecord, TrackerError> {
        self.lock().apply(record_id, expected_version, update)
    }

    /// Remember the drift check outcome and announce detected drift.
    pub(crate) fn publish_drift(&self, record: &TransactionRecord, drift: Option<DriftReport>) {
        let mut state = self.lock();
        state.reconciler.record_drift(&record.todo_id, drift.clone());
        if let Some(drift) = drift {
            warn!(
                "Todo {} drifted from its copy on {}: {:?}",
                drift.todo_id, drift.network, drift.kind
            );
            let current = state
                .tracker
                .get(&record.record_id)
                .cloned()
                .unwrap_or_else(|| record.clone());
            state
                .events
                .publish(SyncStatusEvent::from_record(&current).with_drift(drift));
        }
    }

    /// Save a snapshot of every record, when persistence is enabled.
    pub(crate) async fn persist(&self) -> Result<(), PersistenceError> {
        let Some(persistence) = &self.persistence else {
            return Ok(());
        };
        let _guard = self.persist_lock.lock().await;
        let snapshot = self.lock().tracker.snapshot();
        persistence.save_records(&snapshot).await
    }
}

/// Main sync orchestrator.
///
/// Cheap to clone; clones share the same engine.
#[derive(Clone)]
pub struct SyncOrchestrator {
    ctx: Arc<SyncContext>,
}

impl SyncOrchestrator {
    /// Create an orchestrator, persisting records under `settings.state_dir` when set.
    pub fn new(
        registry: AdapterRegistry,
        store: Arc<dyn TodoStore>,
        settings: &SchedulerConfig,
    ) -> Self {
        let persistence = settings.state_dir.clone().map(StatePersistenceService::new);
        Self::with_persistence(registry, store, settings, persistence)
    }

    pub fn with_persistence(
        registry: AdapterRegistry,
        store: Arc<dyn TodoStore>,
        settings: &SchedulerConfig,
        persistence: Option<StatePersistenceService>,
    ) -> Self {
        let mut events = EventHub::new();
        events.register_handler(Box::new(TracingEventHandler));

        let ctx = SyncContext {
            registry,
            store,
            scheduler: PollScheduler::new(settings.pollers, settings.queue_capacity),
            state: Mutex::new(EngineState {
                tracker: TransactionTracker::new(),
                reconciler: ReconciliationEngine::new(),
                events,
            }),
            persistence,
            persist_lock: tokio::sync::Mutex::new(()),
        };
        Self { ctx: Arc::new(ctx) }
    }

    /// Request a sync of `operation` for the todo onto `network`.
    ///
    /// Returns the new record in `Created`. Progress is reported through status events.
    pub async fn request_sync(
        &self,
        todo_id: &str,
        operation: OperationKind,
        network: Network,
    ) -> Result<TransactionRecord, OrchestratorError> {
        let entry = self
            .ctx
            .registry
            .get(network)
            .cloned()
            .ok_or(OrchestratorError::UnsupportedNetwork(network))?;
        if !self.ctx.scheduler.is_accepting() {
            return Err(OrchestratorError::ShuttingDown);
        }

        let todo_operation = match self.ctx.store.get_todo(todo_id).await {
            Ok(todo) => TodoOperation::from_todo(operation, &todo),
            // The on-chain copy of a todo deleted off-chain can still be removed.
            Err(StoreError::NotFound(_))
                if operation == OperationKind::Delete && self.is_on_chain(todo_id, network) =>
            {
                TodoOperation::Delete {
                    todo_id: todo_id.to_string(),
                }
            }
            Err(StoreError::NotFound(_)) => {
                return Err(OrchestratorError::TodoNotFound(todo_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let (record, signal) = {
            let mut guard = self.ctx.lock();
            let state = &mut *guard;

            if let Some(active) = state.tracker.active_record(todo_id) {
                return Err(OrchestratorError::AlreadySyncing {
                    todo_id: todo_id.to_string(),
                    record_id: active.record_id.clone(),
                });
            }
            let elsewhere = state
                .reconciler
                .on_chain_networks(&state.tracker, todo_id)
                .into_iter()
                .find(|current| *current != network);
            if let Some(current) = elsewhere {
                return Err(OrchestratorError::TargetConflict {
                    todo_id: todo_id.to_string(),
                    current,
                    requested: network,
                });
            }
            self.ctx.scheduler.ensure_capacity()?;

            let record = state.tracker.create(todo_id, network, todo_operation)?;
            let signal = match self.ctx.scheduler.register(&record.record_id) {
                Ok(signal) => signal,
                Err(e) => {
                    // Lost a race with shutdown; release the todo again.
                    state
                        .tracker
                        .apply(&record.record_id, record.version, RecordUpdate::Cancelled)?;
                    return Err(e.into());
                }
            };
            state.reconciler.add_todo(todo_id);
            state.publish(&record);
            (record, signal)
        };

        info!(
            "Accepted {} of todo {} on {} as {}",
            operation, todo_id, network, record.record_id
        );
        self.ctx.scheduler.spawn(
            Pipeline::new(self.ctx.clone(), record.record_id.clone(), entry, signal).run(),
        );
        Ok(record)
    }

    /// Cancel an unresolved record. Cancelling a resolved record returns it unchanged.
    pub fn cancel_sync(&self, record_id: &RecordId) -> Result<TransactionRecord, OrchestratorError> {
        let record = {
            let mut state = self.ctx.lock();
            let current = state
                .tracker
                .get(record_id)
                .cloned()
                .ok_or_else(|| OrchestratorError::RecordNotFound(record_id.clone()))?;
            if current.is_terminal() {
                debug!("Record {} already resolved as {}", record_id, current.state);
                return Ok(current);
            }
            state.apply(record_id, current.version, RecordUpdate::Cancelled)?
        };

        self.ctx.scheduler.cancel(record_id);
        info!("Cancelled sync {} of todo {}", record_id, record.todo_id);
        Ok(record)
    }

    /// Subscribe to the status events of one todo.
    pub fn subscribe(&self, todo_id: &str) -> UnboundedReceiver<SyncStatusEvent> {
        self.ctx.lock().events.subscribe(todo_id)
    }

    pub fn register_handler(&self, handler: Box<dyn SyncEventHandler>) {
        self.ctx.lock().events.register_handler(handler);
    }

    pub fn get_stats(&self) -> SyncStats {
        let state = self.ctx.lock();
        state.reconciler.stats(&state.tracker)
    }

    pub fn record(&self, record_id: &RecordId) -> Option<TransactionRecord> {
        self.ctx.record(record_id)
    }

    /// All records of a todo, oldest first.
    pub fn records_for(&self, todo_id: &str) -> Vec<TransactionRecord> {
        self.ctx
            .lock()
            .tracker
            .records_for(todo_id)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn view(&self, todo_id: &str) -> UnifiedTodoView {
        let state = self.ctx.lock();
        state.reconciler.view(&state.tracker, todo_id)
    }

    pub fn networks(&self) -> Vec<Network> {
        self.ctx.registry.networks()
    }

    fn is_on_chain(&self, todo_id: &str, network: Network) -> bool {
        let state = self.ctx.lock();
        state
            .reconciler
            .on_chain_networks(&state.tracker, todo_id)
            .contains(&network)
    }

    /// Reload the todo listing stats are computed over. Returns the number of todos.
    pub async fn refresh_todos(&self) -> Result<usize, OrchestratorError> {
        let todos = self.ctx.store.list_todos(&TodoFilter::default()).await?;
        let count = todos.len();
        let mut guard = self.ctx.lock();
        let state = &mut *guard;
        state
            .reconciler
            .set_known_todos(todos.into_iter().map(|todo| todo.id));
        state.reconciler.refresh_stats(&state.tracker);
        debug!("Tracking stats over {} todo(s)", count);
        Ok(count)
    }

    /// Load persisted records and resume the unresolved ones. Returns the number resumed.
    pub async fn restore(&self) -> Result<usize, OrchestratorError> {
        let Some(persistence) = &self.ctx.persistence else {
            return Ok(0);
        };
        let records = persistence.restore_records().await?;

        let mut resume: Vec<(RecordId, RegisteredNetwork, _)> = Vec::new();
        {
            let mut guard = self.ctx.lock();
            let state = &mut *guard;
            state.tracker.load(records);

            for record in state.tracker.non_terminal() {
                let registered = self
                    .ctx
                    .registry
                    .get(record.network)
                    .cloned()
                    .ok_or(OrchestratorError::UnsupportedNetwork(record.network));
                let signal = registered.and_then(|entry| {
                    let signal = self.ctx.scheduler.register(&record.record_id)?;
                    Ok((entry, signal))
                });
                match signal {
                    Ok((entry, signal)) => resume.push((record.record_id.clone(), entry, signal)),
                    Err(e) => {
                        warn!("Cannot resume record {}: {}", record.record_id, e);
                        state.apply(&record.record_id, record.version, RecordUpdate::Cancelled)?;
                    }
                }
            }
            state.reconciler.refresh_stats(&state.tracker);
        }

        info!("Resuming {} unresolved sync(s)", resume.len());
        let resumed = resume.len();
        for (record_id, entry, signal) in resume {
            self.ctx
                .scheduler
                .spawn(Pipeline::new(self.ctx.clone(), record_id, entry, signal).run());
        }
        Ok(resumed)
    }

    /// Save a snapshot of all records.
    pub async fn persist(&self) -> Result<(), OrchestratorError> {
        Ok(self.ctx.persist().await?)
    }

    /// Stop accepting requests, wait for every pipeline to stop and persist the records.
    ///
    /// Unresolved records stay unresolved and are resumed by [`SyncOrchestrator::restore`].
    pub async fn shutdown(&self) -> Result<(), OrchestratorError> {
        info!("Shutting down sync engine");
        self.ctx.scheduler.shutdown().await;
        self.persist().await
    }
}
