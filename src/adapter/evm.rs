//!
//! EVM adapter for Polygon, Moonbeam and Base.
//!
//! Submissions go through `eth_sendRawTransaction` with a transaction produced by the wallet
//! signer. Status is derived from the receipt and the current block height against the
//! network's confirmation threshold. Record lookups use `eth_call` on the todo contract, which
//! returns the JSON document of the stored todo.

use crate::adapter::rpc::{JsonRpcClient, RpcError};
use crate::adapter::signer::{TransactionSigner, UnsignedCall};
use crate::adapter::types::*;
use crate::adapter::NetworkAdapter;
use crate::network::Network;

use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, info};

pub struct EvmAdapter {
	network: Network,
	rpc: JsonRpcClient,
	contract: String,
	required_confirmations: u64,
	signer: Arc<dyn TransactionSigner>,
}

impl EvmAdapter {
	pub fn new(
		network: Network,
		rpc: JsonRpcClient,
		contract: String,
		required_confirmations: u64,
		signer: Arc<dyn TransactionSigner>,
	) -> Self {
		Self {
			network,
			rpc,
			contract,
			required_confirmations: required_confirmations.max(1),
			signer,
		}
	}

	fn map_rpc_error(&self, error: RpcError, known_tx_ref: Option<&str>) -> AdapterError {
		let network = self.network;
		error.into_adapter_error(network, |code, message, _| {
			classify_evm_error(network, code, message, known_tx_ref)
		})
	}

	async fn block_number(&self) -> Result<u64, AdapterError> {
		let value = self
			.rpc
			.call("eth_blockNumber", json!([]))
			.await
			.map_err(|e| self.map_rpc_error(e, None))?;
		parse_quantity(&value).ok_or_else(|| {
			AdapterError::new(
				AdapterErrorKind::Unknown,
				self.network,
				format!("invalid block number: {}", value),
			)
		})
	}
}

/// Map an EVM node error onto the adapter taxonomy.
///
/// Geth, Bor and Frontier based nodes share most of their error strings.
pub fn classify_evm_error(
	network: Network,
	code: i64,
	message: &str,
	known_tx_ref: Option<&str>,
) -> AdapterError {
	let lower = message.to_ascii_lowercase();

	if lower.contains("insufficient funds") || lower.contains("insufficient balance") {
		return AdapterError::new(AdapterErrorKind::InsufficientFunds, network, message);
	}
	if lower.contains("already known")
		|| lower.contains("known transaction")
		|| lower.contains("nonce too low")
		|| lower.contains("already imported")
	{
		return AdapterError::duplicate(network, message, known_tx_ref.map(str::to_string));
	}
	if lower.contains("execution reverted")
		|| lower.contains("invalid sender")
		|| lower.contains("intrinsic gas too low")
		|| lower.contains("exceeds block gas limit")
		|| code == 3
	{
		return AdapterError::new(AdapterErrorKind::RejectedByNetwork, network, message);
	}
	if lower.contains("timeout") || lower.contains("timed out") {
		return AdapterError::timeout(network, message);
	}
	// -32005: rate limited, -32603: internal node error.
	if code == -32005 || code == -32603 || lower.contains("header not found") {
		return AdapterError::new(AdapterErrorKind::NetworkUnavailable, network, message);
	}

	AdapterError::new(
		AdapterErrorKind::Unknown,
		network,
		format!("code {}: {}", code, message),
	)
}

/// Parse a hex quantity such as `"0x1b4"`.
pub fn parse_quantity(value: &Value) -> Option<u64> {
	let s = value.as_str()?;
	u64::from_str_radix(s.trim_start_matches("0x"), 16).ok()
}

/// Derive a status report from a receipt and the current head.
pub fn status_from_receipt(receipt: &Value, head: u64, required_confirmations: u64) -> StatusReport {
	let status = receipt.get("status").and_then(parse_quantity);
	if status == Some(0) {
		return StatusReport::Failed {
			detail: "transaction reverted".to_string(),
		};
	}

	match receipt.get("blockNumber").and_then(parse_quantity) {
		Some(block) => {
			let confirmations = head.saturating_sub(block) + 1;
			if confirmations >= required_confirmations {
				StatusReport::Confirmed { confirmations }
			} else {
				StatusReport::Pending { confirmations }
			}
		}
		None => StatusReport::Pending { confirmations: 0 },
	}
}

/// Decode the `eth_call` return data of the todo contract.
pub fn decode_record(network: Network, value: &Value) -> Result<RecordLookup, AdapterError> {
	let data = value.as_str().unwrap_or_default().trim_start_matches("0x");
	if data.is_empty() {
		return Ok(RecordLookup::NotFound);
	}

	let bytes = hex::decode(data).map_err(|e| {
		AdapterError::new(
			AdapterErrorKind::Unknown,
			network,
			format!("invalid call result encoding: {}", e),
		)
	})?;
	let view: OnChainTodoView = serde_json::from_slice(&bytes).map_err(|e| {
		AdapterError::new(
			AdapterErrorKind::Unknown,
			network,
			format!("invalid todo record: {}", e),
		)
	})?;
	Ok(RecordLookup::Found(view))
}

#[async_trait::async_trait]
impl NetworkAdapter for EvmAdapter {
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
			target: self.contract.clone(),
			wallet: wallet.to_string(),
			data: format!("0x{}", hex::encode(operation.encode())),
		};
		let signed = self.signer.sign(&call).await?;

		let result = self
			.rpc
			.call("eth_sendRawTransaction", json!([signed.encoded]))
			.await
			.map_err(|e| self.map_rpc_error(e, signed.tx_ref.as_deref()))?;

		let tx_ref = result
			.as_str()
			.map(str::to_string)
			.ok_or_else(|| {
				AdapterError::new(
					AdapterErrorKind::Unknown,
					self.network,
					format!("unexpected eth_sendRawTransaction result: {}", result),
				)
			})?;

		info!(
			"Submitted {} for todo {} on {}: {}",
			operation.kind(),
			operation.todo_id(),
			self.network,
			tx_ref
		);
		Ok(SubmissionHandle {
			network: self.network,
			tx_ref,
		})
	}

	async fn fetch_status(&self, handle: &SubmissionHandle) -> Result<StatusReport, AdapterError> {
		let receipt = self
			.rpc
			.call("eth_getTransactionReceipt", json!([handle.tx_ref]))
			.await
			.map_err(|e| self.map_rpc_error(e, None))?;

		if receipt.is_null() {
			let tx = self
				.rpc
				.call("eth_getTransactionByHash", json!([handle.tx_ref]))
				.await
				.map_err(|e| self.map_rpc_error(e, None))?;
			debug!(
				"No receipt yet for {} (known to node: {})",
				handle.tx_ref,
				!tx.is_null()
			);
			return Ok(if tx.is_null() {
				StatusReport::NotFound
			} else {
				StatusReport::Pending { confirmations: 0 }
			});
		}

		let head = self.block_number().await?;
		Ok(status_from_receipt(
			&receipt,
			head,
			self.required_confirmations,
		))
	}

	async fn fetch_record(&self, todo_id: &str) -> Result<RecordLookup, AdapterError> {
		let query = json!({ "op": "get", "todo_id": todo_id });
		let data = format!("0x{}", hex::encode(query.to_string()));
		let result = self
			.rpc
			.call(
				"eth_call",
				json!([{ "to": self.contract, "data": data }, "latest"]),
			)
			.await
			.map_err(|e| self.map_rpc_error(e, None))?;

		decode_record(self.network, &result)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn classifies_node_errors() {
		let n = Network::Polygon;
		assert_eq!(
			classify_evm_error(n, -32000, "insufficient funds for gas * price + value", None).kind,
			AdapterErrorKind::InsufficientFunds
		);
		let dup = classify_evm_error(n, -32000, "already known", Some("0xabc"));
		assert_eq!(dup.kind, AdapterErrorKind::DuplicateSubmission);
		assert_eq!(dup.existing.unwrap().tx_ref, "0xabc");
		assert_eq!(
			classify_evm_error(n, 3, "execution reverted: not owner", None).kind,
			AdapterErrorKind::RejectedByNetwork
		);
		assert_eq!(
			classify_evm_error(n, -32005, "rate limit exceeded", None).kind,
			AdapterErrorKind::NetworkUnavailable
		);
		assert_eq!(
			classify_evm_error(n, -1, "something odd", None).kind,
			AdapterErrorKind::Unknown
		);
	}

	#[test]
	fn receipt_status_respects_confirmation_threshold() {
		let receipt = json!({ "status": "0x1", "blockNumber": "0x64" });
		assert_eq!(
			status_from_receipt(&receipt, 0x64 + 2, 12),
			StatusReport::Pending { confirmations: 3 }
		);
		assert_eq!(
			status_from_receipt(&receipt, 0x64 + 11, 12),
			StatusReport::Confirmed { confirmations: 12 }
		);

		let reverted = json!({ "status": "0x0", "blockNumber": "0x64" });
		assert!(matches!(
			status_from_receipt(&reverted, 0x70, 1),
			StatusReport::Failed { .. }
		));
	}

	#[test]
	fn decodes_contract_records() {
		let view = json!({ "todoId": "t1", "title": "Write docs", "completed": true });
		let encoded = json!(format!("0x{}", hex::encode(view.to_string())));
		match decode_record(Network::Base, &encoded).unwrap() {
			RecordLookup::Found(view) => {
				assert_eq!(view.todo_id, "t1");
				assert!(view.completed);
			}
			other => panic!("expected record, got {:?}", other),
		}

		assert_eq!(
			decode_record(Network::Base, &json!("0x")).unwrap(),
			RecordLookup::NotFound
		);
		assert!(decode_record(Network::Base, &json!("0xzz")).is_err());
	}
}
