use crate::network::Network;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a todo in the off-chain store.
pub type TodoId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
	Low,
	#[default]
	Medium,
	High,
}

/// A todo as owned by the off-chain store.
///
/// The engine never edits user fields; it only reads them and writes back the sync metadata
/// (`blockchain_network`, `transaction_hash`, `blockchain_address`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Todo {
	#[serde(alias = "_id")]
	pub id: TodoId,
	pub title: String,
	#[serde(default)]
	pub description: Option<String>,
	#[serde(default)]
	pub priority: Priority,
	#[serde(default)]
	pub completed: bool,
	#[serde(default)]
	pub tags: Vec<String>,
	#[serde(default)]
	pub due_date: Option<DateTime<Utc>>,
	#[serde(alias = "userId")]
	pub owner_id: String,
	#[serde(default)]
	pub created_at: Option<DateTime<Utc>>,
	#[serde(default)]
	pub updated_at: Option<DateTime<Utc>>,
	#[serde(default)]
	pub blockchain_network: Option<Network>,
	#[serde(default)]
	pub transaction_hash: Option<String>,
	#[serde(default)]
	pub blockchain_address: Option<String>,
}

/// The network, on-chain reference and wallet a todo is associated with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncTarget {
	pub network: Network,
	pub contract_ref: String,
	pub wallet_address: String,
}

/// Filter for listing todos.
#[derive(Debug, Clone, Default)]
pub struct TodoFilter {
	pub owner_id: Option<String>,
	pub completed: Option<bool>,
	pub network: Option<Network>,
}

impl TodoFilter {
	pub fn matches(&self, todo: &Todo) -> bool {
		self.owner_id.as_ref().is_none_or(|owner| &todo.owner_id == owner)
			&& self.completed.is_none_or(|completed| todo.completed == completed)
			&& self
				.network
				.is_none_or(|network| todo.blockchain_network == Some(network))
	}
}

/// Sync metadata written back to the off-chain store.
#[derive(Debug, Clone, PartialEq)]
pub enum TodoPatch {
	/// The todo is now mirrored on `target`, confirmed by `transaction_ref`.
	AttachTarget {
		target: SyncTarget,
		transaction_ref: String,
	},
	/// The on-chain copy was deleted.
	DetachTarget,
}

impl TodoPatch {
	/// JSON body understood by the todo REST API.
	pub fn to_json(&self) -> serde_json::Value {
		match self {
			TodoPatch::AttachTarget {
				target,
				transaction_ref,
			} => serde_json::json!({
				"blockchainNetwork": target.network,
				"transactionHash": transaction_ref,
				"blockchainAddress": format!("{}:{}", target.contract_ref, target.wallet_address),
			}),
			TodoPatch::DetachTarget => serde_json::json!({
				"blockchainNetwork": null,
				"transactionHash": null,
				"blockchainAddress": null,
			}),
		}
	}

	pub fn apply(&self, todo: &mut Todo) {
		match self {
			TodoPatch::AttachTarget {
				target,
				transaction_ref,
			} => {
				todo.blockchain_network = Some(target.network);
				todo.transaction_hash = Some(transaction_ref.clone());
				todo.blockchain_address =
					Some(format!("{}:{}", target.contract_ref, target.wallet_address));
			}
			TodoPatch::DetachTarget => {
				todo.blockchain_network = None;
				todo.transaction_hash = None;
				todo.blockchain_address = None;
			}
		}
		todo.updated_at = Some(Utc::now());
	}
}
