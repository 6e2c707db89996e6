//! Static network → adapter registry.
//!
//! Built once at startup from the configuration; the engine only ever looks networks up by key.

use crate::adapter::rpc::{JsonRpcClient, RpcError};
use crate::adapter::{EvmAdapter, NetworkAdapter, SolanaAdapter, SubstrateAdapter, TransactionSigner};
use crate::config::{EngineConfig, NetworkConfig};
use crate::indexer::{IndexerClient, IndexerError};
use crate::network::{Network, NetworkFamily};
use crate::sync::RetryPolicy;
use crate::todo::SyncTarget;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
	#[error("RPC client error: {0}")]
	Rpc(#[from] RpcError),

	#[error("Indexer client error: {0}")]
	Indexer(#[from] IndexerError),

	#[error("Network {network} is missing {field}")]
	MissingConfig { network: Network, field: &'static str },
}

/// Everything the engine needs to sync onto one network.
#[derive(Clone)]
pub struct RegisteredNetwork {
	pub adapter: Arc<dyn NetworkAdapter>,
	pub target: SyncTarget,
	pub policy: RetryPolicy,
}

#[derive(Clone, Default)]
pub struct AdapterRegistry {
	entries: HashMap<Network, RegisteredNetwork>,
}

impl AdapterRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Build adapters for every enabled network.
	pub fn from_config(
		config: &EngineConfig,
		signer: Arc<dyn TransactionSigner>,
	) -> Result<Self, RegistryError> {
		let mut registry = Self::new();
		for (network, network_config) in config.enabled_networks() {
			let (adapter, target) = build_adapter(network, network_config, signer.clone())?;
			info!(
				"Registered {} ({}) at {}",
				network.display_name(),
				target.contract_ref,
				network_config.rpc_url
			);
			registry.insert(adapter, target, network_config.retry.to_policy());
		}
		Ok(registry)
	}

	/// Builder form of [`AdapterRegistry::insert`].
	pub fn with_adapter(
		mut self,
		adapter: Arc<dyn NetworkAdapter>,
		target: SyncTarget,
		policy: RetryPolicy,
	) -> Self {
		self.insert(adapter, target, policy);
		self
	}

	/// Register `adapter` under the network it reports. Replaces any previous entry.
	pub fn insert(&mut self, adapter: Arc<dyn NetworkAdapter>, target: SyncTarget, policy: RetryPolicy) {
		let network = adapter.network();
		self.entries.insert(
			network,
			RegisteredNetwork {
				adapter,
				target,
				policy,
			},
		);
	}

	pub fn get(&self, network: Network) -> Option<&RegisteredNetwork> {
		self.entries.get(&network)
	}

	/// Registered networks in declaration order.
	pub fn networks(&self) -> Vec<Network> {
		let mut networks: Vec<_> = self.entries.keys().copied().collect();
		networks.sort();
		networks
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}
}

fn build_adapter(
	network: Network,
	config: &NetworkConfig,
	signer: Arc<dyn TransactionSigner>,
) -> Result<(Arc<dyn NetworkAdapter>, SyncTarget), RegistryError> {
	let missing = |field| RegistryError::MissingConfig { network, field };
	let contract = config.contract.clone().ok_or_else(|| missing("contract"))?;
	let wallet = config
		.wallet_address
		.clone()
		.ok_or_else(|| missing("wallet_address"))?;
	let timeout = Duration::from_secs(config.request_timeout_secs.max(1));

	let indexer = || -> Result<IndexerClient, RegistryError> {
		let url = config.indexer_url.clone().ok_or_else(|| missing("indexer_url"))?;
		Ok(IndexerClient::new(url, timeout)?)
	};

	let adapter: Arc<dyn NetworkAdapter> = match network.family() {
		NetworkFamily::Evm => Arc::new(EvmAdapter::new(
			network,
			JsonRpcClient::new(config.rpc_url.clone(), timeout)?,
			contract.clone(),
			config.required_confirmations,
			signer,
		)),
		NetworkFamily::Solana => Arc::new(SolanaAdapter::new(
			network,
			JsonRpcClient::new(config.rpc_url.clone(), timeout)?,
			indexer()?,
			contract.clone(),
			config.commitment,
			signer,
		)),
		NetworkFamily::Substrate => Arc::new(SubstrateAdapter::new(
			network,
			config.rpc_url.clone(),
			indexer()?,
			contract.clone(),
			signer,
		)),
	};

	let target = SyncTarget {
		network,
		contract_ref: contract,
		wallet_address: wallet,
	};
	Ok((adapter, target))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::adapter::mock::MockAdapter;
	use crate::adapter::{AdapterError, SignedPayload, UnsignedCall};

	struct NoSigner;

	#[async_trait::async_trait]
	impl TransactionSigner for NoSigner {
		async fn sign(&self, call: &UnsignedCall) -> Result<SignedPayload, AdapterError> {
			Err(AdapterError::timeout(call.network, "not in tests"))
		}
	}

	fn enable(config: &mut EngineConfig, network: Network, indexer: Option<&str>) {
		let entry = config.networks.get_mut(&network).unwrap();
		entry.enabled = true;
		entry.contract = Some("todo-program".into());
		entry.wallet_address = Some("wallet-1".into());
		entry.indexer_url = indexer.map(str::to_string);
	}

	#[test]
	fn builds_adapters_for_enabled_networks_only() {
		let mut config = EngineConfig::default();
		enable(&mut config, Network::BaseTestnet, None);
		enable(&mut config, Network::SolanaDevnet, Some("http://localhost:8088/graphql"));
		enable(&mut config, Network::PolkadotTestnet, Some("http://localhost:8089/graphql"));

		let registry = AdapterRegistry::from_config(&config, Arc::new(NoSigner)).unwrap();
		assert_eq!(
			registry.networks(),
			vec![Network::SolanaDevnet, Network::PolkadotTestnet, Network::BaseTestnet]
		);
		let entry = registry.get(Network::SolanaDevnet).unwrap();
		assert_eq!(entry.adapter.network(), Network::SolanaDevnet);
		assert_eq!(entry.target.wallet_address, "wallet-1");
		assert_eq!(entry.policy.poll_interval, Duration::from_secs(1));
		assert!(registry.get(Network::Polygon).is_none());
	}

	#[test]
	fn solana_without_indexer_is_rejected() {
		let mut config = EngineConfig::default();
		enable(&mut config, Network::Solana, None);
		assert!(matches!(
			AdapterRegistry::from_config(&config, Arc::new(NoSigner)),
			Err(RegistryError::MissingConfig {
				network: Network::Solana,
				field: "indexer_url"
			})
		));
	}

	#[test]
	fn with_adapter_keys_by_reported_network() {
		let adapter = Arc::new(MockAdapter::new(Network::Moonbeam));
		let registry = AdapterRegistry::new().with_adapter(
			adapter,
			MockAdapter::target(Network::Moonbeam),
			RetryPolicy::default(),
		);
		assert_eq!(registry.networks(), vec![Network::Moonbeam]);
	}
}
