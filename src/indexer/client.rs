//!
//! GraphQL client for network indexers.
//!
//! Networks whose nodes do not expose program storage in a convenient form (Solana, Substrate)
//! are queried through an indexer instead. The client runs plain GraphQL queries over HTTP and
//! decodes the two lookups the engine needs: the status of a submitted transaction and the
//! stored todo record.

use super::types::*;
use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

/// GraphQL indexer client
#[derive(Clone)]
pub struct IndexerClient {
	/// The underlying HTTP client for GraphQL queries.
	http_client: Client,
	/// The indexer GraphQL HTTP endpoint.
	indexer_url: String,
}

const TRANSACTION_QUERY: &str = r#"
    query Transaction($hash: String!) {
        transaction(hash: $hash) {
            hash
            applyStage
            blockHeight
            finalized
            confirmations
            error
        }
    }
"#;

const TODO_RECORD_QUERY: &str = r#"
    query TodoRecord($program: String!, $todoId: String!) {
        todoRecord(program: $program, todoId: $todoId) {
            todoId
            title
            description
            completed
            owner
            deleted
        }
    }
"#;

impl IndexerClient {
	/// Create a new indexer client.
	pub fn new(indexer_url: String, timeout: Duration) -> Result<Self, IndexerError> {
		let http_client = Client::builder().timeout(timeout).build()?;

		Ok(Self {
			http_client,
			indexer_url,
		})
	}

	pub fn url(&self) -> &str {
		&self.indexer_url
	}

	/// Look up a transaction by hash or signature. `None` when the indexer has not seen it.
	pub async fn transaction(&self, hash: &str) -> Result<Option<IndexedTransaction>, IndexerError> {
		let response = self
			.execute_query(TRANSACTION_QUERY, Some(json!({ "hash": hash })))
			.await?;
		parse_field(&response, "transaction")
	}

	/// Look up the todo stored by `program`. Deleted records are reported as absent.
	pub async fn todo_record(
		&self,
		program: &str,
		todo_id: &str,
	) -> Result<Option<IndexedTodoRecord>, IndexerError> {
		let response = self
			.execute_query(
				TODO_RECORD_QUERY,
				Some(json!({ "program": program, "todoId": todo_id })),
			)
			.await?;
		let record: Option<IndexedTodoRecord> = parse_field(&response, "todoRecord")?;
		Ok(record.filter(|r| !r.deleted))
	}

	/// Execute a GraphQL query.
	///
	/// # Arguments
	/// * `query` - The GraphQL query string.
	/// * `variables` - Optional variables for the query.
	///
	/// # Returns
	/// The JSON response from the indexer, or an `IndexerError` if the request fails.
	pub async fn execute_query(
		&self,
		query: &str,
		variables: Option<Value>,
	) -> Result<Value, IndexerError> {
		let request_body = json!({
			"query": query,
			"variables": variables
		});
		debug!("GraphQL query -> {}", self.indexer_url);

		let response = self
			.http_client
			.post(&self.indexer_url)
			.header("Content-Type", "application/json")
			.json(&request_body)
			.send()
			.await?;

		if !response.status().is_success() {
			return Err(IndexerError::HttpStatus(response.status()));
		}

		let response_json: Value = response.json().await?;

		if let Some(errors) = response_json.get("errors") {
			return Err(IndexerError::GraphQLError(format!(
				"GraphQL errors: {}",
				errors
			)));
		}

		Ok(response_json)
	}
}

/// Decode `data.<field>` from a GraphQL response; a `null` field decodes to `None`.
pub fn parse_field<T: serde::de::DeserializeOwned>(
	response: &Value,
	field: &str,
) -> Result<Option<T>, IndexerError> {
	let data = response.get("data").ok_or(IndexerError::NoData)?;
	match data.get(field) {
		None | Some(Value::Null) => Ok(None),
		Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::adapter::AdapterErrorKind;
	use crate::network::Network;

	#[test]
	fn parses_transaction_lookup() {
		let response = json!({
			"data": {
				"transaction": {
					"hash": "0xabc",
					"applyStage": "Succeeded",
					"blockHeight": 42,
					"finalized": true,
					"confirmations": 3
				}
			}
		});
		let tx: IndexedTransaction = parse_field(&response, "transaction").unwrap().unwrap();
		assert_eq!(tx.apply_stage, ApplyStage::Succeeded);
		assert_eq!(tx.block_height, Some(42));
		assert!(tx.finalized);
		assert_eq!(tx.error, None);

		let missing = json!({ "data": { "transaction": null } });
		assert!(
			parse_field::<IndexedTransaction>(&missing, "transaction")
				.unwrap()
				.is_none()
		);

		assert!(matches!(
			parse_field::<IndexedTransaction>(&json!({}), "transaction"),
			Err(IndexerError::NoData)
		));
	}

	#[test]
	fn parses_todo_record() {
		let response = json!({
			"data": {
				"todoRecord": {
					"todoId": "t1",
					"title": "Book flights",
					"completed": false,
					"deleted": false
				}
			}
		});
		let record: IndexedTodoRecord = parse_field(&response, "todoRecord").unwrap().unwrap();
		assert_eq!(record.todo_id, "t1");
		assert_eq!(record.description, None);
	}

	#[test]
	fn classifies_indexer_failures() {
		let err = IndexerError::HttpStatus(reqwest::StatusCode::SERVICE_UNAVAILABLE)
			.into_adapter_error(Network::PolkadotTestnet);
		assert_eq!(err.kind, AdapterErrorKind::NetworkUnavailable);

		let err = IndexerError::GraphQLError("bad field".into()).into_adapter_error(Network::PolkadotTestnet);
		assert_eq!(err.kind, AdapterErrorKind::Unknown);
	}
}
