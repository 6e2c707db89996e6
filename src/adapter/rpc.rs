//!
//! JSON-RPC transport used by the node-facing adapters.
//!
//! Provides an HTTP client for request/response JSON-RPC and a one-shot WebSocket call for nodes
//! that only expose RPC over WebSocket. Transport failures are mapped onto the adapter error
//! taxonomy here; node-level errors are returned as [`RpcError::Rpc`] so each adapter can classify
//! them with its own vocabulary.

use crate::adapter::types::{AdapterError, AdapterErrorKind};
use crate::network::Network;

use futures_util::{SinkExt, StreamExt};
use reqwest::Client;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
	#[error("HTTP error: {0}")]
	HttpError(#[from] reqwest::Error),

	#[error("HTTP status {0}")]
	HttpStatus(reqwest::StatusCode),

	#[error("WebSocket error: {0}")]
	WebSocketError(#[from] tokio_tungstenite::tungstenite::Error),

	#[error("JSON parse error: {0}")]
	JsonError(#[from] serde_json::Error),

	#[error("RPC error {code}: {message}")]
	Rpc {
		code: i64,
		message: String,
		data: Option<Value>,
	},

	#[error("No result in RPC response")]
	NoResult,
}

impl RpcError {
	/// Classify transport-level failures. Node errors fall through to `classify_node_error`.
	pub fn into_adapter_error(
		self,
		network: Network,
		classify_node_error: impl FnOnce(i64, &str, Option<&Value>) -> AdapterError,
	) -> AdapterError {
		match self {
			RpcError::Rpc {
				code,
				message,
				data,
			} => classify_node_error(code, &message, data.as_ref()),
			RpcError::HttpError(e) if e.is_timeout() => {
				AdapterError::timeout(network, e.to_string())
			}
			RpcError::HttpError(e) if e.is_connect() || e.is_request() => AdapterError::new(
				AdapterErrorKind::NetworkUnavailable,
				network,
				e.to_string(),
			),
			RpcError::HttpStatus(status)
				if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS =>
			{
				AdapterError::new(
					AdapterErrorKind::NetworkUnavailable,
					network,
					format!("node answered HTTP {}", status),
				)
			}
			RpcError::WebSocketError(e) => AdapterError::new(
				AdapterErrorKind::NetworkUnavailable,
				network,
				e.to_string(),
			),
			other => AdapterError::new(AdapterErrorKind::Unknown, network, other.to_string()),
		}
	}
}

/// Build the request envelope for a JSON-RPC 2.0 call.
fn request_body(id: u64, method: &str, params: Value) -> Value {
	json!({
		"jsonrpc": "2.0",
		"id": id,
		"method": method,
		"params": params,
	})
}

/// Extract `result` or the node error from a JSON-RPC 2.0 response.
pub fn parse_response(response: Value) -> Result<Value, RpcError> {
	if let Some(error) = response.get("error") {
		return Err(RpcError::Rpc {
			code: error.get("code").and_then(Value::as_i64).unwrap_or_default(),
			message: error
				.get("message")
				.and_then(Value::as_str)
				.unwrap_or("unknown RPC error")
				.to_string(),
			data: error.get("data").cloned(),
		});
	}

	response.get("result").cloned().ok_or(RpcError::NoResult)
}

/// HTTP JSON-RPC client.
pub struct JsonRpcClient {
	http_client: Client,
	url: String,
	next_id: AtomicU64,
}

impl JsonRpcClient {
	pub fn new(url: String, timeout: Duration) -> Result<Self, RpcError> {
		let http_client = Client::builder().timeout(timeout).build()?;
		Ok(Self {
			http_client,
			url,
			next_id: AtomicU64::new(1),
		})
	}

	pub fn url(&self) -> &str {
		&self.url
	}

	/// Execute a single JSON-RPC call and return its `result`.
	pub async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
		let id = self.next_id.fetch_add(1, Ordering::Relaxed);
		debug!("RPC {} -> {} (id {})", method, self.url, id);

		let response = self
			.http_client
			.post(&self.url)
			.header("Content-Type", "application/json")
			.json(&request_body(id, method, params))
			.send()
			.await?;

		if !response.status().is_success() {
			return Err(RpcError::HttpStatus(response.status()));
		}

		let body: Value = response.json().await?;
		parse_response(body)
	}
}

/// Open a WebSocket connection, perform one JSON-RPC call and close it.
///
/// Notifications arriving before the response (subscriptions from other clients sharing the
/// endpoint) are skipped.
pub async fn ws_call(url: &str, method: &str, params: Value) -> Result<Value, RpcError> {
	debug!("Attempting WebSocket RPC {} to: {}", method, url);

	let (ws_stream, response) = connect_async(url).await?;
	debug!(
		"WebSocket connection established, response status: {}",
		response.status()
	);
	let (mut ws_sender, mut ws_receiver) = ws_stream.split();

	let id = 1u64;
	ws_sender
		.send(Message::Text(request_body(id, method, params).to_string()))
		.await?;

	while let Some(msg) = ws_receiver.next().await {
		match msg? {
			Message::Text(text) => {
				let parsed: Value = serde_json::from_str(&text)?;
				if parsed.get("id").and_then(Value::as_u64) != Some(id) {
					debug!("Ignoring WebSocket message without matching id");
					continue;
				}
				let _ = ws_sender.send(Message::Close(None)).await;
				return parse_response(parsed);
			}
			Message::Close(_) => break,
			_ => continue,
		}
	}

	Err(RpcError::NoResult)
}
