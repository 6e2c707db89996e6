//!
//! Wallet signing collaborator.
//!
//! Key custody lives outside the engine. Adapters hand an unsigned call to a
//! [`TransactionSigner`] and receive the network's wire encoding back, ready to submit.

use crate::adapter::types::{AdapterError, AdapterErrorKind};
use crate::network::Network;

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// A call to the todo program that still needs the wallet's signature.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsignedCall {
	pub network: Network,
	/// Contract address, program id or pallet reference.
	pub target: String,
	pub wallet: String,
	/// Hex-encoded call data.
	pub data: String,
}

/// Signed transaction in the network's wire encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedPayload {
	/// Hex (EVM, Substrate) or base64 (Solana) encoded transaction.
	pub encoded: String,
	/// Transaction hash or signature, when the signer can compute it up front.
	#[serde(default)]
	pub tx_ref: Option<String>,
}

#[async_trait::async_trait]
pub trait TransactionSigner: Send + Sync {
	async fn sign(&self, call: &UnsignedCall) -> Result<SignedPayload, AdapterError>;
}

/// Client for an HTTP signing service (`POST {url}/sign`).
pub struct RemoteSigner {
	url: reqwest::Url,
	http_client: reqwest::Client,
}

impl RemoteSigner {
	pub fn new(url: &str, timeout: Duration) -> Result<Self, SignerSetupError> {
		let url = reqwest::Url::parse(url)
			.and_then(|base| base.join("sign"))
			.map_err(|e| SignerSetupError::InvalidUrl(format!("{}: {}", url, e)))?;
		let http_client = reqwest::ClientBuilder::new().timeout(timeout).build()?;
		Ok(Self { url, http_client })
	}
}

#[derive(Debug, thiserror::Error)]
pub enum SignerSetupError {
	#[error("Invalid signer URL: {0}")]
	InvalidUrl(String),

	#[error("HTTP client error: {0}")]
	HttpError(#[from] reqwest::Error),
}

#[async_trait::async_trait]
impl TransactionSigner for RemoteSigner {
	async fn sign(&self, call: &UnsignedCall) -> Result<SignedPayload, AdapterError> {
		debug!(
			"Requesting signature for {} call from wallet {}",
			call.network, call.wallet
		);

		let response = self
			.http_client
			.post(self.url.clone())
			.json(call)
			.send()
			.await
			.map_err(|e| {
				let kind = if e.is_timeout() {
					AdapterErrorKind::Timeout
				} else {
					AdapterErrorKind::NetworkUnavailable
				};
				AdapterError::new(kind, call.network, format!("signer unreachable: {}", e))
			})?;

		let status = response.status();
		if status.is_server_error() {
			return Err(AdapterError::new(
				AdapterErrorKind::NetworkUnavailable,
				call.network,
				format!("signer answered HTTP {}", status),
			));
		}
		if !status.is_success() {
			let body = response.text().await.unwrap_or_default();
			return Err(AdapterError::new(
				AdapterErrorKind::RejectedByNetwork,
				call.network,
				format!("signer refused call (HTTP {}): {}", status, body),
			));
		}

		response.json::<SignedPayload>().await.map_err(|e| {
			AdapterError::new(
				AdapterErrorKind::Unknown,
				call.network,
				format!("invalid signer response: {}", e),
			)
		})
	}
}
