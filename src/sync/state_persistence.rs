//! State persistence service for todo synchronization.
//!
//! This module provides the `StatePersistenceService`, which saves and restores the transaction
//! records of the engine. It uses the repository trait to abstract the storage details, so the
//! orchestrator can resume unresolved records after a restart.
//!
//! The orchestrator persists a snapshot when it shuts down and restores it on startup.

use crate::sync::record::TransactionRecord;
use crate::sync::repositories::{FileRecordRepository, RecordRepository};

use std::path::PathBuf;
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Record serialization error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Service for managing record persistence.
pub struct StatePersistenceService {
    record_repo: Box<dyn RecordRepository + Send + Sync>,
}

impl StatePersistenceService {
    /// Create a new state persistence service for the given data directory.
    pub fn new(data_dir: PathBuf) -> Self {
        Self::with_repository(Box::new(FileRecordRepository::new(data_dir)))
    }

    pub fn with_repository(record_repo: Box<dyn RecordRepository + Send + Sync>) -> Self {
        Self { record_repo }
    }

    /// Save a snapshot of all records.
    pub async fn save_records(&self, records: &[TransactionRecord]) -> Result<(), PersistenceError> {
        self.record_repo.save(records).await
    }

    /// Restore the last snapshot. An absent snapshot restores nothing.
    pub async fn restore_records(&self) -> Result<Vec<TransactionRecord>, PersistenceError> {
        match self.record_repo.load().await? {
            Some(records) => {
                let unresolved = records.iter().filter(|r| !r.is_terminal()).count();
                info!(
                    "Restored {} record(s), {} unresolved",
                    records.len(),
                    unresolved
                );
                Ok(records)
            }
            None => {
                info!("No persisted records found");
                Ok(Vec::new())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{OperationKind, TodoOperation};
    use crate::network::Network;
    use crate::sync::record::{RecordUpdate, TxState};
    use crate::todo::store::sample_todo;

    fn records() -> Vec<TransactionRecord> {
        let todo = sample_todo("t1", "Renew lease");
        let mut done = TransactionRecord::new(
            "t1".into(),
            Network::Base,
            TodoOperation::from_todo(OperationKind::Create, &todo),
            1,
        );
        done.apply(RecordUpdate::Submitted {
            tx_ref: "0xabc".into(),
        });
        done.apply(RecordUpdate::Confirmed { confirmations: 3 });
        let open = TransactionRecord::new(
            "t1".into(),
            Network::Base,
            TodoOperation::from_todo(OperationKind::Toggle, &todo),
            2,
        );
        vec![done, open]
    }

    #[tokio::test]
    async fn file_snapshot_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let service = StatePersistenceService::new(dir.path().join("state"));

        assert!(service.restore_records().await.unwrap().is_empty());

        let records = records();
        service.save_records(&records).await.unwrap();
        assert!(dir.path().join("state/transaction_records.meta.json").exists());
        assert!(!dir.path().join("state/transaction_records.json.tmp").exists());

        let restored = service.restore_records().await.unwrap();
        assert_eq!(restored, records);
        assert_eq!(restored[0].state, TxState::Confirmed);
        assert_eq!(restored[1].state, TxState::Created);
    }

    #[tokio::test]
    async fn corrupt_snapshot_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("transaction_records.json"), "not json").unwrap();
        let service = StatePersistenceService::new(dir.path().to_path_buf());
        assert!(matches!(
            service.restore_records().await,
            Err(PersistenceError::JsonError(_))
        ));
    }
}
