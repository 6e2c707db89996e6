//! Indexer integration module
//!
//! This module provides the client and types for querying network indexers over GraphQL.
//! Solana and Substrate adapters use it to read transaction status and on-chain todo records.

/// GraphQL client for network indexers
mod client;
/// Type definitions for indexer data structures
mod types;

pub use client::{IndexerClient, parse_field};
pub use types::*;
