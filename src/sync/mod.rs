//! Todo Synchronization Module
//!
//! This module holds the engine that mirrors todo operations onto blockchain networks and keeps
//! the off-chain and on-chain views consistent. It is composed of several submodules:
//!
//! - `orchestrator`: The entry point. It validates sync requests, owns the shared engine state and
//!   starts one pipeline per record.
//! - `pipeline`: Drives a single record from submission to a terminal state.
//! - `tracker`: The authoritative store of transaction records and their lifecycle.
//! - `retry`: Backoff and give-up decisions for failed adapter calls.
//! - `reconciliation`: Aggregate stats, drift detection and the unified per-todo view.
//! - `events`: Status events, subscriptions and handlers.
//! - `scheduler`: Bounded pool of pollers with cancellation.
//!
//! Records are persisted through `state_persistence` so unresolved syncs survive a restart.

/// Status events and their fan-out
pub mod events;
/// Entry point coordinating sync requests
pub mod orchestrator;
/// Per-record submit and poll loop
mod pipeline;
/// Stats, drift detection and unified views
pub mod reconciliation;
/// Transaction record and lifecycle types
pub mod record;
/// Storage backends for record snapshots
pub mod repositories;
/// Retry policy and backoff scheduling
pub mod retry;
/// Bounded poller pool and cancellation signals
pub mod scheduler;
/// Saving and restoring record snapshots
pub mod state_persistence;
/// Authoritative record store
pub mod tracker;

pub use events::{EventHub, HandlerError, SyncEventHandler, SyncStatusEvent, TracingEventHandler};
pub use orchestrator::*;
pub use reconciliation::{DriftKind, DriftReport, ReconciliationEngine, SyncStats, UnifiedTodoView};
pub use record::{FailureReason, RecordId, RecordUpdate, SyncFailure, TransactionRecord, TxState};
pub use retry::{RetryDecision, RetryPolicy, RetryScheduler};
pub use scheduler::{PollScheduler, SchedulerError};
pub use state_persistence::{PersistenceError, StatePersistenceService};
pub use tracker::{TrackerError, TransactionTracker};
