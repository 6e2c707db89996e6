//! Types shared by all network adapters: the uniform todo operation, submission handles, status
//! reports and the classified adapter error.

use crate::network::Network;
use crate::todo::{Priority, Todo, TodoId};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The fixed set of todo mutations that can be mirrored on-chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
	Create,
	Update,
	Toggle,
	Delete,
}

impl fmt::Display for OperationKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			OperationKind::Create => "create",
			OperationKind::Update => "update",
			OperationKind::Toggle => "toggle",
			OperationKind::Delete => "delete",
		};
		f.write_str(name)
	}
}

impl std::str::FromStr for OperationKind {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"create" => Ok(OperationKind::Create),
			"update" => Ok(OperationKind::Update),
			"toggle" => Ok(OperationKind::Toggle),
			"delete" => Ok(OperationKind::Delete),
			other => Err(format!("unknown operation: {}", other)),
		}
	}
}

/// Todo fields carried on-chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TodoPayload {
	pub todo_id: TodoId,
	pub title: String,
	pub description: Option<String>,
	pub priority: Priority,
	pub completed: bool,
	pub tags: Vec<String>,
	pub due_date: Option<DateTime<Utc>>,
}

impl From<&Todo> for TodoPayload {
	fn from(todo: &Todo) -> Self {
		Self {
			todo_id: todo.id.clone(),
			title: todo.title.clone(),
			description: todo.description.clone(),
			priority: todo.priority,
			completed: todo.completed,
			tags: todo.tags.clone(),
			due_date: todo.due_date,
		}
	}
}

/// A todo mutation in the network-independent form every adapter accepts.
///
/// Serialized as the call document sent to the on-chain todo program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TodoOperation {
	Create(TodoPayload),
	Update(TodoPayload),
	Toggle { todo_id: TodoId, completed: bool },
	Delete { todo_id: TodoId },
}

impl TodoOperation {
	pub fn from_todo(kind: OperationKind, todo: &Todo) -> Self {
		match kind {
			OperationKind::Create => TodoOperation::Create(todo.into()),
			OperationKind::Update => TodoOperation::Update(todo.into()),
			OperationKind::Toggle => TodoOperation::Toggle {
				todo_id: todo.id.clone(),
				completed: todo.completed,
			},
			OperationKind::Delete => TodoOperation::Delete {
				todo_id: todo.id.clone(),
			},
		}
	}

	pub fn kind(&self) -> OperationKind {
		match self {
			TodoOperation::Create(_) => OperationKind::Create,
			TodoOperation::Update(_) => OperationKind::Update,
			TodoOperation::Toggle { .. } => OperationKind::Toggle,
			TodoOperation::Delete { .. } => OperationKind::Delete,
		}
	}

	pub fn todo_id(&self) -> &str {
		match self {
			TodoOperation::Create(payload) | TodoOperation::Update(payload) => &payload.todo_id,
			TodoOperation::Toggle { todo_id, .. } | TodoOperation::Delete { todo_id } => todo_id,
		}
	}

	/// Call data for the todo program: the JSON document of the operation.
	pub fn encode(&self) -> Vec<u8> {
		// Serializing plain data structs into a Vec cannot fail.
		serde_json::to_vec(self).unwrap_or_default()
	}
}

/// Network-specific reference needed to poll a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionHandle {
	pub network: Network,
	/// Transaction hash, signature or extrinsic hash.
	pub tx_ref: String,
}

/// Result of a single status fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusReport {
	/// The network does not know the submission (yet).
	NotFound,
	/// Included or queued but below the finality criterion.
	Pending { confirmations: u64 },
	/// Final according to the network's finality criterion.
	Confirmed { confirmations: u64 },
	/// The network rejected or reverted the transaction.
	Failed { detail: String },
}

/// A todo as stored by the on-chain program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnChainTodoView {
	pub todo_id: TodoId,
	pub title: String,
	#[serde(default)]
	pub description: Option<String>,
	#[serde(default)]
	pub completed: bool,
	#[serde(default)]
	pub owner: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordLookup {
	Found(OnChainTodoView),
	NotFound,
}

/// Error classification shared by all adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterErrorKind {
	NetworkUnavailable,
	Timeout,
	InsufficientFunds,
	RejectedByNetwork,
	DuplicateSubmission,
	Unknown,
}

impl AdapterErrorKind {
	/// Only transient transport failures are worth another attempt.
	pub fn is_retryable(&self) -> bool {
		matches!(
			self,
			AdapterErrorKind::NetworkUnavailable | AdapterErrorKind::Timeout
		)
	}
}

impl fmt::Display for AdapterErrorKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			AdapterErrorKind::NetworkUnavailable => "network unavailable",
			AdapterErrorKind::Timeout => "timeout",
			AdapterErrorKind::InsufficientFunds => "insufficient funds",
			AdapterErrorKind::RejectedByNetwork => "rejected by network",
			AdapterErrorKind::DuplicateSubmission => "duplicate submission",
			AdapterErrorKind::Unknown => "unknown adapter error",
		};
		f.write_str(name)
	}
}

/// A classified adapter failure.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{network}: {kind}: {message}")]
pub struct AdapterError {
	pub kind: AdapterErrorKind,
	pub network: Network,
	pub message: String,
	/// For `DuplicateSubmission`, the handle of the submission already known to the network.
	pub existing: Option<SubmissionHandle>,
}

impl AdapterError {
	pub fn new(kind: AdapterErrorKind, network: Network, message: impl Into<String>) -> Self {
		Self {
			kind,
			network,
			message: message.into(),
			existing: None,
		}
	}

	pub fn duplicate(network: Network, message: impl Into<String>, existing: Option<String>) -> Self {
		Self {
			kind: AdapterErrorKind::DuplicateSubmission,
			network,
			message: message.into(),
			existing: existing.map(|tx_ref| SubmissionHandle { network, tx_ref }),
		}
	}

	pub fn timeout(network: Network, message: impl Into<String>) -> Self {
		Self::new(AdapterErrorKind::Timeout, network, message)
	}

	pub fn is_retryable(&self) -> bool {
		self.kind.is_retryable()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::todo::store::sample_todo;

	#[test]
	fn operation_encodes_as_tagged_json() {
		let todo = sample_todo("t1", "Ship release");
		let op = TodoOperation::from_todo(OperationKind::Toggle, &todo);
		let value: serde_json::Value = serde_json::from_slice(&op.encode()).unwrap();
		assert_eq!(value["op"], "toggle");
		assert_eq!(value["todo_id"], "t1");
		assert_eq!(op.kind(), OperationKind::Toggle);

		let create = TodoOperation::from_todo(OperationKind::Create, &todo);
		let value: serde_json::Value = serde_json::from_slice(&create.encode()).unwrap();
		assert_eq!(value["op"], "create");
		assert_eq!(value["title"], "Ship release");
		assert_eq!(create.todo_id(), "t1");
	}

	#[test]
	fn only_transport_errors_are_retryable() {
		assert!(AdapterErrorKind::NetworkUnavailable.is_retryable());
		assert!(AdapterErrorKind::Timeout.is_retryable());
		assert!(!AdapterErrorKind::InsufficientFunds.is_retryable());
		assert!(!AdapterErrorKind::RejectedByNetwork.is_retryable());
		assert!(!AdapterErrorKind::DuplicateSubmission.is_retryable());
		assert!(!AdapterErrorKind::Unknown.is_retryable());
	}

	#[test]
	fn duplicate_carries_existing_handle() {
		let err = AdapterError::duplicate(Network::Base, "already known", Some("0xdead".into()));
		assert_eq!(
			err.existing,
			Some(SubmissionHandle {
				network: Network::Base,
				tx_ref: "0xdead".into()
			})
		);
		assert!(err.to_string().contains("duplicate submission"));
	}
}
