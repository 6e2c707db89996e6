//!
//! Solana adapter.
//!
//! Transactions are signed by the wallet signer and sent base64-encoded through
//! `sendTransaction`. Status comes from `getSignatureStatuses`, compared against the configured
//! commitment level. The todo program's accounts are read through the network indexer.

use crate::adapter::rpc::{JsonRpcClient, RpcError};
use crate::adapter::signer::{TransactionSigner, UnsignedCall};
use crate::adapter::types::*;
use crate::adapter::NetworkAdapter;
use crate::indexer::IndexerClient;
use crate::network::Network;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::info;

/// Finality level a signature must reach to count as confirmed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Commitment {
	Processed,
	#[default]
	Confirmed,
	Finalized,
}

impl Commitment {
	pub fn as_str(&self) -> &'static str {
		match self {
			Commitment::Processed => "processed",
			Commitment::Confirmed => "confirmed",
			Commitment::Finalized => "finalized",
		}
	}

	fn parse(s: &str) -> Option<Self> {
		match s {
			"processed" => Some(Commitment::Processed),
			"confirmed" => Some(Commitment::Confirmed),
			"finalized" => Some(Commitment::Finalized),
			_ => None,
		}
	}
}

pub struct SolanaAdapter {
	network: Network,
	rpc: JsonRpcClient,
	indexer: IndexerClient,
	program_id: String,
	commitment: Commitment,
	signer: Arc<dyn TransactionSigner>,
}

impl SolanaAdapter {
	pub fn new(
		network: Network,
		rpc: JsonRpcClient,
		indexer: IndexerClient,
		program_id: String,
		commitment: Commitment,
		signer: Arc<dyn TransactionSigner>,
	) -> Self {
		Self {
			network,
			rpc,
			indexer,
			program_id,
			commitment,
			signer,
		}
	}

	fn map_rpc_error(&self, error: RpcError, known_signature: Option<&str>) -> AdapterError {
		let network = self.network;
		error.into_adapter_error(network, |code, message, data| {
			classify_solana_error(network, code, message, data, known_signature)
		})
	}
}

/// Map a Solana RPC error onto the adapter taxonomy.
///
/// Preflight failures (-32002) carry the transaction error in `data.err`.
pub fn classify_solana_error(
	network: Network,
	code: i64,
	message: &str,
	data: Option<&Value>,
	known_signature: Option<&str>,
) -> AdapterError {
	let detail = data
		.and_then(|d| d.get("err"))
		.map(Value::to_string)
		.unwrap_or_default();
	let haystack = format!("{} {}", message, detail);
	let lower = haystack.to_ascii_lowercase();

	if lower.contains("insufficient funds")
		|| lower.contains("insufficientfundsforfee")
		|| lower.contains("insufficient lamports")
	{
		return AdapterError::new(AdapterErrorKind::InsufficientFunds, network, message);
	}
	if lower.contains("alreadyprocessed") || lower.contains("already been processed") {
		return AdapterError::duplicate(network, message, known_signature.map(str::to_string));
	}
	// Expired blockhash: a freshly signed transaction may succeed.
	if lower.contains("blockhashnotfound") || lower.contains("blockhash not found") {
		return AdapterError::new(AdapterErrorKind::NetworkUnavailable, network, message);
	}
	if lower.contains("instructionerror")
		|| lower.contains("custom program error")
		|| lower.contains("signature verification failed")
		|| code == -32003
	{
		return AdapterError::new(AdapterErrorKind::RejectedByNetwork, network, message);
	}
	// -32005: node is behind, -32004: block not available.
	if code == -32005 || code == -32004 {
		return AdapterError::new(AdapterErrorKind::NetworkUnavailable, network, message);
	}

	AdapterError::new(
		AdapterErrorKind::Unknown,
		network,
		format!("code {}: {}", code, haystack.trim()),
	)
}

/// Interpret one entry of a `getSignatureStatuses` result.
pub fn status_from_signature(entry: &Value, commitment: Commitment) -> StatusReport {
	if entry.is_null() {
		return StatusReport::NotFound;
	}
	if let Some(err) = entry.get("err").filter(|e| !e.is_null()) {
		return StatusReport::Failed {
			detail: err.to_string(),
		};
	}

	let reached = entry
		.get("confirmationStatus")
		.and_then(Value::as_str)
		.and_then(Commitment::parse)
		.unwrap_or(Commitment::Processed);
	// `confirmations` is null once the slot is rooted.
	let confirmations = entry
		.get("confirmations")
		.and_then(Value::as_u64)
		.unwrap_or(if reached == Commitment::Finalized { 32 } else { 0 });

	if reached >= commitment {
		StatusReport::Confirmed { confirmations }
	} else {
		StatusReport::Pending { confirmations }
	}
}

#[async_trait::async_trait]
impl NetworkAdapter for SolanaAdapter {
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
			target: self.program_id.clone(),
			wallet: wallet.to_string(),
			data: hex::encode(operation.encode()),
		};
		let signed = self.signer.sign(&call).await?;

		let result = self
			.rpc
			.call(
				"sendTransaction",
				json!([
					signed.encoded,
					{ "encoding": "base64", "preflightCommitment": self.commitment.as_str() }
				]),
			)
			.await
			.map_err(|e| self.map_rpc_error(e, signed.tx_ref.as_deref()))?;

		let signature = result.as_str().map(str::to_string).ok_or_else(|| {
			AdapterError::new(
				AdapterErrorKind::Unknown,
				self.network,
				format!("unexpected sendTransaction result: {}", result),
			)
		})?;

		info!(
			"Submitted {} for todo {} on {}: {}",
			operation.kind(),
			operation.todo_id(),
			self.network,
			signature
		);
		Ok(SubmissionHandle {
			network: self.network,
			tx_ref: signature,
		})
	}

	async fn fetch_status(&self, handle: &SubmissionHandle) -> Result<StatusReport, AdapterError> {
		let result = self
			.rpc
			.call(
				"getSignatureStatuses",
				json!([[handle.tx_ref], { "searchTransactionHistory": true }]),
			)
			.await
			.map_err(|e| self.map_rpc_error(e, None))?;

		let entry = result
			.get("value")
			.and_then(|v| v.get(0))
			.cloned()
			.unwrap_or(Value::Null);
		Ok(status_from_signature(&entry, self.commitment))
	}

	async fn fetch_record(&self, todo_id: &str) -> Result<RecordLookup, AdapterError> {
		let record = self
			.indexer
			.todo_record(&self.program_id, todo_id)
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
	fn classifies_preflight_failures() {
		let n = Network::Solana;
		let err = classify_solana_error(
			n,
			-32002,
			"Transaction simulation failed: Attempt to debit an account but found no record of a prior credit.",
			Some(&json!({ "err": "InsufficientFundsForFee" })),
			None,
		);
		assert_eq!(err.kind, AdapterErrorKind::InsufficientFunds);

		let err = classify_solana_error(
			n,
			-32002,
			"Transaction simulation failed",
			Some(&json!({ "err": "AlreadyProcessed" })),
			Some("5sig"),
		);
		assert_eq!(err.kind, AdapterErrorKind::DuplicateSubmission);
		assert_eq!(err.existing.unwrap().tx_ref, "5sig");

		let err = classify_solana_error(
			n,
			-32002,
			"Transaction simulation failed",
			Some(&json!({ "err": { "InstructionError": [0, { "Custom": 6001 }] } })),
			None,
		);
		assert_eq!(err.kind, AdapterErrorKind::RejectedByNetwork);

		let err = classify_solana_error(
			n,
			-32002,
			"Transaction simulation failed: Blockhash not found",
			None,
			None,
		);
		assert!(err.is_retryable());
	}

	#[test]
	fn signature_status_honours_commitment() {
		assert_eq!(
			status_from_signature(&Value::Null, Commitment::Confirmed),
			StatusReport::NotFound
		);

		let processed = json!({ "slot": 10, "confirmations": 1, "err": null, "confirmationStatus": "processed" });
		assert_eq!(
			status_from_signature(&processed, Commitment::Confirmed),
			StatusReport::Pending { confirmations: 1 }
		);

		let confirmed = json!({ "slot": 10, "confirmations": 5, "err": null, "confirmationStatus": "confirmed" });
		assert_eq!(
			status_from_signature(&confirmed, Commitment::Confirmed),
			StatusReport::Confirmed { confirmations: 5 }
		);
		assert_eq!(
			status_from_signature(&confirmed, Commitment::Finalized),
			StatusReport::Pending { confirmations: 5 }
		);

		let finalized = json!({ "slot": 10, "confirmations": null, "err": null, "confirmationStatus": "finalized" });
		assert!(matches!(
			status_from_signature(&finalized, Commitment::Finalized),
			StatusReport::Confirmed { .. }
		));

		let failed = json!({ "slot": 10, "err": { "InstructionError": [0, "InvalidAccountData"] } });
		assert!(matches!(
			status_from_signature(&failed, Commitment::Confirmed),
			StatusReport::Failed { .. }
		));
	}
}
