//! Network adapters.
//!
//! A [`NetworkAdapter`] is the only code that understands one network's native behaviour: how a
//! todo operation is submitted, how a submission's status is read and how the on-chain todo is
//! looked up. Adapters perform network I/O only, never retry internally and classify every
//! failure into [`AdapterErrorKind`] so the engine can decide what to do next.

/// EVM JSON-RPC adapter (Polygon, Moonbeam, Base)
mod evm;
/// Scripted adapter for tests
#[cfg(test)]
pub(crate) mod mock;
/// Static network → adapter registry built at startup
mod registry;
/// JSON-RPC transport shared by the adapters
pub mod rpc;
/// Wallet signing collaborator
pub mod signer;
/// Solana JSON-RPC adapter
mod solana;
/// Substrate RPC + indexer adapter (Polkadot)
mod substrate;
/// Operation, handle, status and error types
mod types;

pub use evm::EvmAdapter;
pub use registry::{AdapterRegistry, RegisteredNetwork, RegistryError};
pub use signer::{RemoteSigner, SignedPayload, TransactionSigner, UnsignedCall};
pub use solana::{Commitment, SolanaAdapter};
pub use substrate::SubstrateAdapter;
pub use types::*;

use crate::network::Network;

/// Per-network submission, status and record lookup.
#[async_trait::async_trait]
pub trait NetworkAdapter: Send + Sync {
	/// The network this adapter talks to.
	fn network(&self) -> Network;

	/// Submit a todo operation signed by `wallet`.
	///
	/// A submission the network already knows surfaces as
	/// [`AdapterErrorKind::DuplicateSubmission`], carrying the existing handle when available.
	async fn submit(
		&self,
		operation: &TodoOperation,
		wallet: &str,
	) -> Result<SubmissionHandle, AdapterError>;

	/// Read the current status of a submission. Must return promptly.
	async fn fetch_status(&self, handle: &SubmissionHandle) -> Result<StatusReport, AdapterError>;

	/// Look up the todo as stored on-chain.
	async fn fetch_record(&self, todo_id: &str) -> Result<RecordLookup, AdapterError>;
}
