//! Types for GraphQL indexer queries

use crate::adapter::{AdapterError, AdapterErrorKind, OnChainTodoView};
use crate::network::Network;

use serde::{Deserialize, Serialize};

/// Transaction application stage reported by the indexer
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum ApplyStage {
    /// Seen but not yet in a block
    Pending,
    /// Included and applied
    Succeeded,
    /// Included but the call failed
    Failed,
}

/// A transaction as indexed for a network.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexedTransaction {
    /// Extrinsic hash or transaction signature.
    pub hash: String,
    #[serde(rename = "applyStage")]
    pub apply_stage: ApplyStage,
    /// Block the transaction was included in, when known.
    #[serde(rename = "blockHeight", default)]
    pub block_height: Option<u64>,
    /// Whether the including block is finalized.
    #[serde(default)]
    pub finalized: bool,
    /// Number of blocks built on top of the including block.
    #[serde(default)]
    pub confirmations: u64,
    /// Dispatch error for failed transactions.
    #[serde(default)]
    pub error: Option<String>,
}

/// Todo record as indexed from program/pallet storage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IndexedTodoRecord {
    pub todo_id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub owner: Option<String>,
    /// Set when the record was removed by a delete call.
    #[serde(default)]
    pub deleted: bool,
}

impl From<IndexedTodoRecord> for OnChainTodoView {
    fn from(record: IndexedTodoRecord) -> Self {
        Self {
            todo_id: record.todo_id,
            title: record.title,
            description: record.description,
            completed: record.completed,
            owner: record.owner,
        }
    }
}

/// Error types for indexer operations
#[derive(Debug, thiserror::Error)]
pub enum IndexerError {
    #[error("GraphQL error: {0}")]
    GraphQLError(String),

    #[error("No data returned")]
    NoData,

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("HTTP status {0}")]
    HttpStatus(reqwest::StatusCode),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl IndexerError {
    /// Classify an indexer failure for the adapter that issued the query.
    pub fn into_adapter_error(self, network: Network) -> AdapterError {
        match self {
            IndexerError::HttpError(e) if e.is_timeout() => {
                AdapterError::timeout(network, format!("indexer: {}", e))
            }
            IndexerError::HttpError(e) => AdapterError::new(
                AdapterErrorKind::NetworkUnavailable,
                network,
                format!("indexer: {}", e),
            ),
            IndexerError::HttpStatus(status) if status.is_server_error() => AdapterError::new(
                AdapterErrorKind::NetworkUnavailable,
                network,
                format!("indexer answered HTTP {}", status),
            ),
            other => AdapterError::new(
                AdapterErrorKind::Unknown,
                network,
                format!("indexer: {}", other),
            ),
        }
    }
}
