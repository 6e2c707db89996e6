//!
//! Transaction records and their lifecycle states.
//!
//! A [`TransactionRecord`] follows one todo operation on one network from acceptance to a
//! terminal outcome. Records are only changed through [`RecordUpdate`]s applied by the tracker,
//! and every applied update bumps the record's version.

use crate::adapter::{AdapterError, AdapterErrorKind, OperationKind, SubmissionHandle, TodoOperation};
use crate::network::Network;
use crate::todo::TodoId;
use crate::utils::random_id;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
	pub fn generate() -> Self {
		Self(random_id("rec"))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for RecordId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for RecordId {
	fn from(s: &str) -> Self {
		Self(s.to_string())
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxState {
	Created,
	Submitted,
	Pending,
	Confirmed,
	Failed,
	Cancelled,
}

impl TxState {
	pub fn is_terminal(&self) -> bool {
		matches!(self, TxState::Confirmed | TxState::Failed | TxState::Cancelled)
	}

	/// Whether the lifecycle allows moving from `self` to `next`.
	///
	/// `Submitted -> Submitted` is a resubmission with a fresh handle.
	pub fn can_transition_to(&self, next: TxState) -> bool {
		use TxState::*;
		match (self, next) {
			(Created, Submitted | Failed | Cancelled) => true,
			(Submitted, Submitted | Pending | Confirmed | Failed | Cancelled) => true,
			(Pending, Confirmed | Failed | Cancelled) => true,
			_ => false,
		}
	}
}

impl fmt::Display for TxState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Debug::fmt(self, f)
	}
}

/// Why a record failed or an attempt did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
	/// Classified adapter error.
	Adapter(AdapterErrorKind),
	/// Retryable failures reached the network's attempt limit.
	RetriesExhausted,
	/// The submission never reached finality within the poll budget.
	ConfirmationTimeout,
	/// A status fetch reported that the network rejected or reverted the transaction.
	RejectedByNetwork,
}

impl fmt::Display for FailureReason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			FailureReason::Adapter(kind) => write!(f, "{}", kind),
			FailureReason::RetriesExhausted => f.write_str("retries exhausted"),
			FailureReason::ConfirmationTimeout => f.write_str("confirmation timeout"),
			FailureReason::RejectedByNetwork => f.write_str("rejected by network"),
		}
	}
}

/// The last classified error of a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFailure {
	pub reason: FailureReason,
	pub message: String,
}

impl SyncFailure {
	pub fn new(reason: FailureReason, message: impl Into<String>) -> Self {
		Self {
			reason,
			message: message.into(),
		}
	}
}

impl From<&AdapterError> for SyncFailure {
	fn from(error: &AdapterError) -> Self {
		Self::new(FailureReason::Adapter(error.kind), error.message.clone())
	}
}

impl fmt::Display for SyncFailure {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}: {}", self.reason, self.message)
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
	pub record_id: RecordId,
	pub todo_id: TodoId,
	pub network: Network,
	pub operation: TodoOperation,
	/// Hash, signature or extrinsic hash of the current submission.
	pub tx_ref: Option<String>,
	pub state: TxState,
	pub attempt_count: u32,
	pub last_error: Option<SyncFailure>,
	pub confirmations: u64,
	pub created_at: DateTime<Utc>,
	pub submitted_at: Option<DateTime<Utc>>,
	pub resolved_at: Option<DateTime<Utc>>,
	pub version: u64,
	/// Creation order across all records.
	pub sequence: u64,
}

impl TransactionRecord {
	pub fn new(todo_id: TodoId, network: Network, operation: TodoOperation, sequence: u64) -> Self {
		Self {
			record_id: RecordId::generate(),
			todo_id,
			network,
			operation,
			tx_ref: None,
			state: TxState::Created,
			attempt_count: 0,
			last_error: None,
			confirmations: 0,
			created_at: Utc::now(),
			submitted_at: None,
			resolved_at: None,
			version: 0,
			sequence,
		}
	}

	pub fn operation_kind(&self) -> OperationKind {
		self.operation.kind()
	}

	pub fn is_terminal(&self) -> bool {
		self.state.is_terminal()
	}

	/// Explorer page of the current submission, once there is one.
	pub fn explorer_url(&self) -> Option<String> {
		self.tx_ref
			.as_deref()
			.map(|tx_ref| self.network.tx_explorer_url(tx_ref))
	}

	pub fn handle(&self) -> Option<SubmissionHandle> {
		self.tx_ref.as_ref().map(|tx_ref| SubmissionHandle {
			network: self.network,
			tx_ref: tx_ref.clone(),
		})
	}

	/// Apply `update` after it has been validated against the lifecycle.
	pub(crate) fn apply(&mut self, update: RecordUpdate) {
		let now = Utc::now();
		match update {
			RecordUpdate::Submitted { tx_ref } => {
				self.state = TxState::Submitted;
				self.tx_ref = Some(tx_ref);
				self.attempt_count += 1;
				self.submitted_at = Some(now);
			}
			RecordUpdate::Adopted { tx_ref } => {
				self.state = TxState::Submitted;
				self.tx_ref = Some(tx_ref);
				self.submitted_at = Some(now);
			}
			RecordUpdate::Pending { confirmations } => {
				self.state = TxState::Pending;
				self.confirmations = confirmations;
			}
			RecordUpdate::Confirmed { confirmations } => {
				self.state = TxState::Confirmed;
				self.confirmations = confirmations;
			}
			RecordUpdate::Failed { failure, attempted } => {
				self.state = TxState::Failed;
				if attempted {
					self.attempt_count += 1;
				}
				self.last_error = Some(failure);
			}
			RecordUpdate::AttemptFailed(failure) => {
				self.attempt_count += 1;
				self.last_error = Some(failure);
			}
			RecordUpdate::Cancelled => {
				self.state = TxState::Cancelled;
			}
		}
		if self.state.is_terminal() {
			self.resolved_at = Some(now);
		}
		self.version += 1;
	}
}

/// A change to a record, presented to the tracker with the version it was computed against.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordUpdate {
	/// A submit call succeeded. Counts as an attempt.
	Submitted { tx_ref: String },
	/// The network already knew the submission; poll its existing handle.
	Adopted { tx_ref: String },
	Pending { confirmations: u64 },
	Confirmed { confirmations: u64 },
	/// `attempted` is set when the failure came out of a submit or status call.
	Failed { failure: SyncFailure, attempted: bool },
	/// A retryable failure; the state is unchanged.
	AttemptFailed(SyncFailure),
	Cancelled,
}

impl RecordUpdate {
	/// State the record is in after the update, given its current state.
	pub fn target_state(&self, current: TxState) -> TxState {
		match self {
			RecordUpdate::Submitted { .. } | RecordUpdate::Adopted { .. } => TxState::Submitted,
			RecordUpdate::Pending { .. } => TxState::Pending,
			RecordUpdate::Confirmed { .. } => TxState::Confirmed,
			RecordUpdate::Failed { .. } => TxState::Failed,
			RecordUpdate::AttemptFailed(_) => current,
			RecordUpdate::Cancelled => TxState::Cancelled,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::todo::store::sample_todo;

	fn record() -> TransactionRecord {
		let todo = sample_todo("t1", "Plan sprint");
		TransactionRecord::new(
			todo.id.clone(),
			Network::Polygon,
			TodoOperation::from_todo(OperationKind::Create, &todo),
			1,
		)
	}

	#[test]
	fn lifecycle_transitions() {
		use TxState::*;
		assert!(Created.can_transition_to(Submitted));
		assert!(Created.can_transition_to(Failed));
		assert!(!Created.can_transition_to(Pending));
		assert!(!Created.can_transition_to(Confirmed));
		assert!(Submitted.can_transition_to(Submitted));
		assert!(Submitted.can_transition_to(Confirmed));
		assert!(Pending.can_transition_to(Confirmed));
		assert!(!Pending.can_transition_to(Submitted));
		assert!(!Pending.can_transition_to(Pending));
		for terminal in [Confirmed, Failed, Cancelled] {
			for next in [Created, Submitted, Pending, Confirmed, Failed, Cancelled] {
				assert!(!terminal.can_transition_to(next));
			}
		}
	}

	#[test]
	fn apply_tracks_attempts_and_resolution() {
		let mut record = record();
		assert!(record.record_id.as_str().starts_with("rec_"));

		record.apply(RecordUpdate::AttemptFailed(SyncFailure::new(
			FailureReason::Adapter(AdapterErrorKind::Timeout),
			"slow node",
		)));
		assert_eq!(record.state, TxState::Created);
		assert_eq!(record.attempt_count, 1);

		record.apply(RecordUpdate::Submitted {
			tx_ref: "0x01".into(),
		});
		assert_eq!(record.attempt_count, 2);
		assert!(record.submitted_at.is_some());
		assert_eq!(record.handle().unwrap().tx_ref, "0x01");

		record.apply(RecordUpdate::Confirmed { confirmations: 12 });
		assert!(record.is_terminal());
		assert!(record.resolved_at.is_some());
		assert_eq!(record.version, 3);
	}

	#[test]
	fn records_serialize_with_camel_case_keys() {
		let record = record();
		let value = serde_json::to_value(&record).unwrap();
		assert_eq!(value["todoId"], "t1");
		assert_eq!(value["state"], "Created");
		assert_eq!(value["operation"]["op"], "create");
		let back: TransactionRecord = serde_json::from_value(value).unwrap();
		assert_eq!(back, record);
	}
}
