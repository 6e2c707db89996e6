use crate::sync::record::TransactionRecord;
use crate::sync::state_persistence::PersistenceError;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

const RECORDS_FILE: &str = "transaction_records.json";
const RECORDS_META_FILE: &str = "transaction_records.meta.json";

/// Repository for transaction record persistence
#[async_trait::async_trait]
pub trait RecordRepository {
	async fn save(&self, records: &[TransactionRecord]) -> Result<(), PersistenceError>;
	async fn load(&self) -> Result<Option<Vec<TransactionRecord>>, PersistenceError>;
}

/// File-based implementation of RecordRepository
///
/// Records are written as one JSON array, next to a metadata file with the record count and the
/// time of the snapshot.
pub struct FileRecordRepository {
	data_dir: PathBuf,
}

impl FileRecordRepository {
	pub fn new(data_dir: PathBuf) -> Self {
		Self { data_dir }
	}

	fn records_filename(&self) -> PathBuf {
		self.data_dir.join(RECORDS_FILE)
	}

	fn metadata_filename(&self) -> PathBuf {
		self.data_dir.join(RECORDS_META_FILE)
	}
}

#[async_trait::async_trait]
impl RecordRepository for FileRecordRepository {
	async fn save(&self, records: &[TransactionRecord]) -> Result<(), PersistenceError> {
		tokio::fs::create_dir_all(&self.data_dir).await?;

		// Create metadata
		let metadata = serde_json::json!({
			"record_count": records.len(),
			"unresolved": records.iter().filter(|r| !r.is_terminal()).count(),
			"timestamp": chrono::Utc::now().to_rfc3339(),
		});
		tokio::fs::write(
			self.metadata_filename(),
			serde_json::to_string_pretty(&metadata)?,
		)
		.await?;

		// Write to a temporary file first so a crash never leaves a truncated snapshot.
		let filename = self.records_filename();
		let tmp = filename.with_extension("json.tmp");
		tokio::fs::write(&tmp, serde_json::to_vec_pretty(records)?).await?;
		tokio::fs::rename(&tmp, &filename).await?;

		debug!("Saved {} transaction record(s) to {:?}", records.len(), filename);
		Ok(())
	}

	async fn load(&self) -> Result<Option<Vec<TransactionRecord>>, PersistenceError> {
		let filename = self.records_filename();

		// Check if files exist
		if !tokio::fs::try_exists(&filename).await? {
			return Ok(None);
		}

		if let Ok(meta_content) = tokio::fs::read_to_string(self.metadata_filename()).await {
			match serde_json::from_str::<serde_json::Value>(&meta_content) {
				Ok(metadata) => info!(
					"Loading record snapshot taken at {}",
					metadata
						.get("timestamp")
						.and_then(|t| t.as_str())
						.unwrap_or("unknown time")
				),
				Err(e) => warn!("Ignoring unreadable record metadata: {}", e),
			}
		}

		let content = tokio::fs::read(&filename).await?;
		let records: Vec<TransactionRecord> = serde_json::from_slice(&content)?;

		info!(
			"Loaded {} transaction record(s) from {:?}",
			records.len(),
			filename
		);
		Ok(Some(records))
	}
}

/// In-memory implementation of RecordRepository
///
/// Clones share the same storage, so a caller can keep a handle to what the engine saved.
#[derive(Clone, Default)]
pub struct InMemoryRecordRepository {
	records: Arc<Mutex<Option<Vec<TransactionRecord>>>>,
}

impl InMemoryRecordRepository {
	pub fn new() -> Self {
		Self::default()
	}

	/// The last saved snapshot.
	pub fn snapshot(&self) -> Option<Vec<TransactionRecord>> {
		self.records
			.lock()
			.unwrap_or_else(std::sync::PoisonError::into_inner)
			.clone()
	}
}

#[async_trait::async_trait]
impl RecordRepository for InMemoryRecordRepository {
	async fn save(&self, records: &[TransactionRecord]) -> Result<(), PersistenceError> {
		*self
			.records
			.lock()
			.unwrap_or_else(std::sync::PoisonError::into_inner) = Some(records.to_vec());
		Ok(())
	}

	async fn load(&self) -> Result<Option<Vec<TransactionRecord>>, PersistenceError> {
		Ok(self.snapshot())
	}
}
