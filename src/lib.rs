//! Mirrors todo operations onto blockchain networks.
//!
//! A todo lives in an off-chain store. When a create, update, toggle or delete has to be
//! reflected on-chain, the [`SyncOrchestrator`] turns it into a transaction record, submits it
//! through the network's adapter and follows it until the network confirms or rejects it. Status
//! events report every transition together with the aggregate sync stats.

/// Network adapters and the adapter registry
pub mod adapter;
/// File and environment configuration
pub mod config;
/// GraphQL indexer client used by the Solana and Substrate adapters
pub mod indexer;
/// Supported networks
pub mod network;
/// The sync engine
pub mod sync;
/// Off-chain todo model and store
pub mod todo;
/// Shared helpers
pub mod utils;

pub use adapter::{AdapterRegistry, NetworkAdapter, OperationKind};
pub use config::EngineConfig;
pub use network::Network;
pub use sync::{OrchestratorError, SyncOrchestrator, SyncStats, SyncStatusEvent, TxState};
