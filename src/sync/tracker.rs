//! Transaction lifecycle tracking.
//!
//! This module provides the `TransactionTracker`, the store of all transaction records together
//! with the per-todo lock table. It is the only place records are created or changed: creation
//! takes the todo's lock atomically, and every later update is checked against the record's
//! version and the lifecycle before it is applied.
//!
//! The tracker itself is synchronous. The orchestrator keeps it behind a mutex and never holds
//! that mutex across network I/O.

use crate::adapter::TodoOperation;
use crate::network::Network;
use crate::sync::record::{RecordId, RecordUpdate, TransactionRecord, TxState};
use crate::todo::TodoId;

use std::collections::{BTreeSet, HashMap};
use tracing::{debug, error, warn};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrackerError {
    #[error("Record {0} not found")]
    NotFound(RecordId),

    #[error("Version conflict on {record_id}: expected {expected}, found {actual}")]
    VersionConflict {
        record_id: RecordId,
        expected: u64,
        actual: u64,
    },

    #[error("Record {record_id} is terminal ({state}); mutation rejected")]
    TerminalRecord { record_id: RecordId, state: TxState },

    #[error("Invalid transition {from} -> {to} for record {record_id}")]
    InvalidTransition {
        record_id: RecordId,
        from: TxState,
        to: TxState,
    },

    #[error("Todo {todo_id} is already syncing (record {record_id})")]
    AlreadySyncing { todo_id: TodoId, record_id: RecordId },
}

/// Record store, per-todo lock table and secondary indexes.
#[derive(Debug, Default)]
pub struct TransactionTracker {
    records: HashMap<RecordId, TransactionRecord>,
    /// Records per todo in creation order
    by_todo: HashMap<TodoId, Vec<RecordId>>,
    by_network: HashMap<Network, BTreeSet<RecordId>>,
    /// The lock table: the single non-terminal record of each todo
    active: HashMap<TodoId, RecordId>,
    next_sequence: u64,
}

impl TransactionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a record in `Created`, taking the todo's lock.
    ///
    /// Fails with `AlreadySyncing` when the todo already has a non-terminal record.
    pub fn create(
        &mut self,
        todo_id: &str,
        network: Network,
        operation: TodoOperation,
    ) -> Result<TransactionRecord, TrackerError> {
        if let Some(record_id) = self.active.get(todo_id) {
            return Err(TrackerError::AlreadySyncing {
                todo_id: todo_id.to_string(),
                record_id: record_id.clone(),
            });
        }

        self.next_sequence += 1;
        let record = TransactionRecord::new(todo_id.to_string(), network, operation, self.next_sequence);
        debug!(
            "Created record {} ({} on {}) for todo {}",
            record.record_id,
            record.operation_kind(),
            network,
            todo_id
        );
        self.insert(record.clone());
        Ok(record)
    }

    /// Apply `update` to a record that is still at `expected_version`.
    ///
    /// Stale updates are rejected with `VersionConflict`. Updates to terminal records and
    /// transitions outside the lifecycle are programming errors: they are rejected and logged.
    pub fn apply(
        &mut self,
        record_id: &RecordId,
        expected_version: u64,
        update: RecordUpdate,
    ) -> Result<TransactionRecord, TrackerError> {
        let record = self
            .records
            .get_mut(record_id)
            .ok_or_else(|| TrackerError::NotFound(record_id.clone()))?;

        if record.version != expected_version {
            debug!(
                "Discarding stale update for {} (read v{}, now v{})",
                record_id, expected_version, record.version
            );
            return Err(TrackerError::VersionConflict {
                record_id: record_id.clone(),
                expected: expected_version,
                actual: record.version,
            });
        }

        if record.is_terminal() {
            error!(
                "Rejected mutation of terminal record {} ({}): {:?}",
                record_id, record.state, update
            );
            return Err(TrackerError::TerminalRecord {
                record_id: record_id.clone(),
                state: record.state,
            });
        }

        let next = update.target_state(record.state);
        let allowed =
            matches!(update, RecordUpdate::AttemptFailed(_)) || record.state.can_transition_to(next);
        if !allowed {
            error!(
                "Rejected transition {} -> {} for record {}",
                record.state, next, record_id
            );
            return Err(TrackerError::InvalidTransition {
                record_id: record_id.clone(),
                from: record.state,
                to: next,
            });
        }

        record.apply(update);
        let record = record.clone();
        if record.is_terminal() {
            self.active.remove(&record.todo_id);
        }
        Ok(record)
    }

    pub fn get(&self, record_id: &RecordId) -> Option<&TransactionRecord> {
        self.records.get(record_id)
    }

    /// The todo's non-terminal record, if any.
    pub fn active_record(&self, todo_id: &str) -> Option<&TransactionRecord> {
        self.active.get(todo_id).and_then(|id| self.records.get(id))
    }

    /// All records of a todo, oldest first.
    pub fn records_for(&self, todo_id: &str) -> Vec<&TransactionRecord> {
        self.by_todo
            .get(todo_id)
            .map(|ids| ids.iter().filter_map(|id| self.records.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn records_on(&self, network: Network) -> Vec<&TransactionRecord> {
        let mut records: Vec<_> = self
            .by_network
            .get(&network)
            .map(|ids| ids.iter().filter_map(|id| self.records.get(id)).collect())
            .unwrap_or_default();
        records.sort_by_key(|r| r.sequence);
        records
    }

    pub fn records(&self) -> impl Iterator<Item = &TransactionRecord> {
        self.records.values()
    }

    pub fn non_terminal(&self) -> Vec<TransactionRecord> {
        let mut records: Vec<_> = self
            .active
            .values()
            .filter_map(|id| self.records.get(id))
            .cloned()
            .collect();
        records.sort_by_key(|r| r.sequence);
        records
    }

    /// All records ordered by creation, for persistence.
    pub fn snapshot(&self) -> Vec<TransactionRecord> {
        let mut records: Vec<_> = self.records.values().cloned().collect();
        records.sort_by_key(|r| r.sequence);
        records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Load persisted records, rebuilding the indexes and the lock table.
    ///
    /// If a snapshot holds more than one non-terminal record for a todo, only the newest keeps
    /// the lock; the older ones are cancelled. Returns the number of records loaded.
    pub fn load(&mut self, mut records: Vec<TransactionRecord>) -> usize {
        records.sort_by_key(|r| r.sequence);
        let count = records.len();

        for record in records {
            self.next_sequence = self.next_sequence.max(record.sequence);
            if self.records.contains_key(&record.record_id) {
                warn!("Skipping duplicate persisted record {}", record.record_id);
                continue;
            }
            if !record.is_terminal() {
                if let Some(older) = self.active.get(&record.todo_id).cloned() {
                    warn!(
                        "Todo {} has several unresolved records; cancelling {}",
                        record.todo_id, older
                    );
                    if let Some(older) = self.records.get_mut(&older) {
                        older.apply(RecordUpdate::Cancelled);
                    }
                    self.active.remove(&record.todo_id);
                }
            }
            self.insert(record);
        }

        count
    }

    fn insert(&mut self, record: TransactionRecord) {
        let id = record.record_id.clone();
        self.by_todo
            .entry(record.todo_id.clone())
            .or_default()
            .push(id.clone());
        self.by_network
            .entry(record.network)
            .or_default()
            .insert(id.clone());
        if !record.is_terminal() {
            self.active.insert(record.todo_id.clone(), id.clone());
        }
        self.records.insert(id, record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{AdapterErrorKind, OperationKind};
    use crate::sync::record::{FailureReason, SyncFailure};
    use crate::todo::store::sample_todo;

    fn op(id: &str) -> TodoOperation {
        TodoOperation::from_todo(OperationKind::Create, &sample_todo(id, "Water plants"))
    }

    #[test]
    fn one_active_record_per_todo() {
        let mut tracker = TransactionTracker::new();
        let first = tracker.create("t1", Network::Base, op("t1")).unwrap();

        let err = tracker.create("t1", Network::Polygon, op("t1")).unwrap_err();
        assert_eq!(
            err,
            TrackerError::AlreadySyncing {
                todo_id: "t1".into(),
                record_id: first.record_id.clone(),
            }
        );

        // Other todos are unaffected.
        tracker.create("t2", Network::Base, op("t2")).unwrap();

        tracker
            .apply(&first.record_id, 0, RecordUpdate::Cancelled)
            .unwrap();
        assert!(tracker.active_record("t1").is_none());

        let retry = tracker.create("t1", Network::Base, op("t1")).unwrap();
        assert_eq!(retry.attempt_count, 0);
        assert_ne!(retry.record_id, first.record_id);
        assert_eq!(tracker.records_for("t1").len(), 2);
    }

    #[test]
    fn stale_versions_are_rejected() {
        let mut tracker = TransactionTracker::new();
        let record = tracker.create("t1", Network::Solana, op("t1")).unwrap();

        let updated = tracker
            .apply(
                &record.record_id,
                0,
                RecordUpdate::Submitted {
                    tx_ref: "sig1".into(),
                },
            )
            .unwrap();
        assert_eq!(updated.version, 1);

        let err = tracker
            .apply(&record.record_id, 0, RecordUpdate::Pending { confirmations: 1 })
            .unwrap_err();
        assert!(matches!(
            err,
            TrackerError::VersionConflict {
                expected: 0,
                actual: 1,
                ..
            }
        ));
        assert_eq!(tracker.get(&record.record_id).unwrap().state, TxState::Submitted);
    }

    #[test]
    fn terminal_records_reject_every_update() {
        let mut tracker = TransactionTracker::new();
        let record = tracker.create("t1", Network::Polkadot, op("t1")).unwrap();
        let failed = tracker
            .apply(
                &record.record_id,
                0,
                RecordUpdate::Failed {
                    failure: SyncFailure::new(
                        FailureReason::Adapter(AdapterErrorKind::InsufficientFunds),
                        "balance too low",
                    ),
                    attempted: true,
                },
            )
            .unwrap();

        let updates = [
            RecordUpdate::Submitted {
                tx_ref: "0x1".into(),
            },
            RecordUpdate::Pending { confirmations: 0 },
            RecordUpdate::Confirmed { confirmations: 1 },
            RecordUpdate::Cancelled,
            RecordUpdate::AttemptFailed(SyncFailure::new(FailureReason::RetriesExhausted, "x")),
        ];
        for update in updates {
            let err = tracker
                .apply(&record.record_id, failed.version, update)
                .unwrap_err();
            assert!(matches!(
                err,
                TrackerError::TerminalRecord {
                    state: TxState::Failed,
                    ..
                }
            ));
        }
        assert_eq!(tracker.get(&record.record_id).unwrap(), &failed);
    }

    #[test]
    fn lifecycle_is_enforced() {
        let mut tracker = TransactionTracker::new();
        let record = tracker.create("t1", Network::Base, op("t1")).unwrap();
        let err = tracker
            .apply(&record.record_id, 0, RecordUpdate::Confirmed { confirmations: 3 })
            .unwrap_err();
        assert!(matches!(
            err,
            TrackerError::InvalidTransition {
                from: TxState::Created,
                to: TxState::Confirmed,
                ..
            }
        ));

        let submitted = tracker
            .apply(
                &record.record_id,
                0,
                RecordUpdate::Submitted {
                    tx_ref: "0xa".into(),
                },
            )
            .unwrap();
        let pending = tracker
            .apply(
                &record.record_id,
                submitted.version,
                RecordUpdate::Pending { confirmations: 1 },
            )
            .unwrap();
        let err = tracker
            .apply(
                &record.record_id,
                pending.version,
                RecordUpdate::Submitted {
                    tx_ref: "0xb".into(),
                },
            )
            .unwrap_err();
        assert!(matches!(err, TrackerError::InvalidTransition { .. }));
    }

    #[test]
    fn load_rebuilds_lock_table() {
        let mut source = TransactionTracker::new();
        let a = source.create("t1", Network::Base, op("t1")).unwrap();
        source.apply(&a.record_id, 0, RecordUpdate::Cancelled).unwrap();
        let b = source.create("t1", Network::Base, op("t1")).unwrap();
        let c = source.create("t2", Network::Solana, op("t2")).unwrap();

        let mut restored = TransactionTracker::new();
        assert_eq!(restored.load(source.snapshot()), 3);
        assert_eq!(restored.active_record("t1").unwrap().record_id, b.record_id);
        assert_eq!(restored.active_record("t2").unwrap().record_id, c.record_id);
        assert_eq!(restored.records_on(Network::Base).len(), 2);

        // New records continue the sequence.
        let d = restored.create("t3", Network::Base, op("t3")).unwrap();
        assert!(d.sequence > c.sequence);
    }
}
