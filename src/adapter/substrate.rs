//!
//! Substrate adapter (Polkadot, Westend).
//!
//! Signed extrinsics are submitted with `author_submitExtrinsic` over the node's WebSocket RPC.
//! Inclusion, finality and pallet storage are read from the network's GraphQL indexer.

use crate::adapter::rpc::{RpcError, ws_call};
use crate::adapter::signer::{TransactionSigner, UnsignedCall};
use crate::adapter::types::*;
use crate::adapter::NetworkAdapter;
use crate::indexer::{ApplyStage, IndexedTransaction, IndexerClient};
use crate::network::Network;

use serde_json::{Value, json};
use std::sync::Arc;
use tracing::info;

pub struct SubstrateAdapter {
	network: Network,
	ws_url: String,
	indexer: IndexerClient,
	/// Pallet or contract holding the todo records.
	program: String,
	signer: Arc<dyn TransactionSigner>,
}

impl SubstrateAdapter {
	pub fn new(
		network: Network,
		ws_url: String,
		indexer: IndexerClient,
		program: String,
		signer: Arc<dyn TransactionSigner>,
	) -> Self {
		Self {
			network,
			ws_url,
			indexer,
			program,
			signer,
		}
	}

	fn map_rpc_error(&self, error: RpcError, known_hash: Option<&str>) -> AdapterError {
		let network = self.network;
		error.into_adapter_error(network, |code, message, data| {
			classify_substrate_error(network, code, message, data, known_hash)
		})
	}
}

/// Map an `author_*` RPC error onto the adapter taxonomy.
///
/// The pool error code is in `code`; the validity reason is in `data`.
pub fn classify_substrate_error(
	network: Network,
	code: i64,
	message: &str,
	data: Option<&Value>,
	known_hash: Option<&str>,
) -> AdapterError {
	let detail = match data {
		Some(Value::String(s)) => s.clone(),
		Some(other) => other.to_string(),
		None => String::new(),
	};
	let full = if detail.is_empty() {
		message.to_string()
	} else {
		format!("{}: {}", message, detail)
	};

	match code {
		1010 if detail.contains("Inability to pay") || detail.contains("balance too low") => {
			AdapterError::new(AdapterErrorKind::InsufficientFunds, network, full)
		}
		// Outdated: the nonce was already used by this extrinsic.
		1010 if detail.contains("outdated") || detail.contains("Stale") => {
			AdapterError::duplicate(network, full, known_hash.map(str::to_string))
		}
		1013 | 1014 => AdapterError::duplicate(network, full, known_hash.map(str::to_string)),
		1010 | 1011 | 1002 => AdapterError::new(AdapterErrorKind::RejectedByNetwork, network, full),
		// Temporarily banned.
		1012 => AdapterError::new(AdapterErrorKind::NetworkUnavailable, network, full),
		_ if message.contains("AlreadyImported") || message.contains("Priority is too low") => {
			AdapterError::duplicate(network, full, known_hash.map(str::to_string))
		}
		_ => AdapterError::new(
			AdapterErrorKind::Unknown,
			network,
			format!("code {}: {}", code, full),
		),
	}
}

/// Derive a status report from the indexer's view of an extrinsic.
pub fn status_from_indexed(tx: Option<&IndexedTransaction>) -> StatusReport {
	let Some(tx) = tx else {
		return StatusReport::NotFound;
	};

	match tx.apply_stage {
		ApplyStage::Pending => StatusReport::Pending { confirmations: 0 },
		ApplyStage::Failed => StatusReport::Failed {
			detail: tx
				.error
				.clone()
				.unwrap_or_else(|| "extrinsic failed".to_string()),
		},
		ApplyStage::Succeeded if tx.finalized => StatusReport::Confirmed {
			confirmations: tx.confirmations,
		},
		ApplyStage::Succeeded => StatusReport::Pending {
			confirmations: tx.confirmations,
		},
	}
}

#[async_trait::async_trait]
impl NetworkAdapter for SubstrateAdapter {
	fn network(&self) -> Network {
		self.network
	}

	async fn submit(
		&self,
		operation: &TodoOperation,
		wallet: &str,
	) -> Result<SubmissionHandle, AdapterError> {
		let call = UnsignedCall {
			network: self.network,
			target: self.program.clone(),
			wallet: wallet.to_string(),
			data: format!("0x{}", hex::encode(operation.encode())),
		};
		let signed = self.signer.sign(&call).await?;

		let result = ws_call(&self.ws_url, "author_submitExtrinsic", json!([signed.encoded]))
			.await
			.map_err(|e| self.map_rpc_error(e, signed.tx_ref.as_deref()))?;

		let hash = result.as_str().map(str::to_string).ok_or_else(|| {
			AdapterError::new(
				AdapterErrorKind::Unknown,
				self.network,
				format!("unexpected author_submitExtrinsic result: {}", result),
			)
		})?;

		info!(
			"Submitted {} for todo {} on {}: {}",
			operation.kind(),
			operation.todo_id(),
			self.network,
			hash
		);
		Ok(SubmissionHandle {
			network: self.network,
			tx_ref: hash,
		})
	}

	async fn fetch_status(&self, handle: &SubmissionHandle) -> Result<StatusReport, AdapterError> {
		let tx = self
			.indexer
			.transaction(&handle.tx_ref)
			.await
			.map_err(|e| e.into_adapter_error(self.network))?;
		Ok(status_from_indexed(tx.as_ref()))
	}

	async fn fetch_record(&self, todo_id: &str) -> Result<RecordLookup, AdapterError> {
		let record = self
			.indexer
			.todo_record(&self.program, todo_id)
			.await
			.map_err(|e| e.into_adapter_error(self.network))?;

		Ok(match record {
			Some(record) => RecordLookup::Found(record.into()),
			None => RecordLookup::NotFound,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn classifies_pool_errors() {
		let n = Network::Polkadot;
		let err = classify_substrate_error(
			n,
			1010,
			"Invalid Transaction",
			Some(&json!("Inability to pay some fees (e.g. account balance too low)")),
			None,
		);
		assert_eq!(err.kind, AdapterErrorKind::InsufficientFunds);

		let err = classify_substrate_error(
			n,
			1013,
			"Transaction Already Imported",
			None,
			Some("0xfeed"),
		);
		assert_eq!(err.kind, AdapterErrorKind::DuplicateSubmission);
		assert_eq!(err.existing.unwrap().tx_ref, "0xfeed");

		let err = classify_substrate_error(
			n,
			1010,
			"Invalid Transaction",
			Some(&json!("Transaction has a bad signature")),
			None,
		);
		assert_eq!(err.kind, AdapterErrorKind::RejectedByNetwork);

		let err = classify_substrate_error(n, 1012, "Transaction is temporarily banned", None, None);
		assert!(err.is_retryable());

		let err = classify_substrate_error(n, -32601, "Method not found", None, None);
		assert_eq!(err.kind, AdapterErrorKind::Unknown);
	}

	#[test]
	fn indexed_status_requires_finality() {
		assert_eq!(status_from_indexed(None), StatusReport::NotFound);

		let mut tx = IndexedTransaction {
			hash: "0x01".into(),
			apply_stage: ApplyStage::Succeeded,
			block_height: Some(100),
			finalized: false,
			confirmations: 2,
			error: None,
		};
		assert_eq!(
			status_from_indexed(Some(&tx)),
			StatusReport::Pending { confirmations: 2 }
		);

		tx.finalized = true;
		assert_eq!(
			status_from_indexed(Some(&tx)),
			StatusReport::Confirmed { confirmations: 2 }
		);

		tx.apply_stage = ApplyStage::Failed;
		tx.error = Some("Module(TodoPallet::NotOwner)".into());
		assert_eq!(
			status_from_indexed(Some(&tx)),
			StatusReport::Failed {
				detail: "Module(TodoPallet::NotOwner)".into()
			}
		);
	}
}
