//!
//! Engine configuration.
//!
//! Configuration is read from an optional TOML file on top of built-in defaults, then
//! environment overrides are applied per network (`POLYGON_RPC_URL`,
//! `POLYGON_TODO_FACTORY_ADDRESS`, `SOLANA_PROGRAM_ID`, ...). A network is enabled by default
//! once it has a contract or program reference.

use crate::adapter::Commitment;
use crate::network::{Network, NetworkFamily};
use crate::sync::RetryPolicy;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	#[error("IO error reading {path}: {source}")]
	IoError {
		path: PathBuf,
		source: std::io::Error,
	},

	#[error("Invalid config file: {0}")]
	ParseError(#[from] toml::de::Error),

	#[error("Invalid value for {key}: {message}")]
	InvalidValue { key: String, message: String },

	#[error("Network {network} is enabled but has no {field}")]
	MissingField { network: Network, field: &'static str },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
	pub store: StoreConfig,
	pub signer: SignerConfig,
	pub engine: SchedulerConfig,
	pub networks: BTreeMap<Network, NetworkConfig>,
}

/// Off-chain todo API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
	pub base_url: String,
	pub api_token: Option<String>,
	pub timeout_secs: u64,
}

/// Remote wallet signer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignerConfig {
	pub url: String,
	pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
	/// Adapter calls allowed in flight at once.
	pub pollers: usize,
	/// Unresolved records tracked at once.
	pub queue_capacity: usize,
	/// Where record snapshots are kept; persistence is off when unset.
	pub state_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
	pub enabled: bool,
	pub rpc_url: String,
	/// GraphQL indexer, required for Solana and Substrate networks.
	pub indexer_url: Option<String>,
	/// Todo factory contract, program id or pallet.
	pub contract: Option<String>,
	/// Wallet the signer signs for on this network.
	pub wallet_address: Option<String>,
	/// EVM confirmation threshold.
	pub required_confirmations: u64,
	/// Solana commitment level.
	pub commitment: Commitment,
	pub request_timeout_secs: u64,
	pub retry: RetryProfile,
}

/// Serialized form of a [`RetryPolicy`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryProfile {
	pub base_delay_ms: u64,
	pub max_delay_ms: u64,
	pub jitter: f64,
	pub max_attempts: u32,
	pub poll_interval_ms: u64,
	pub attempt_timeout_ms: u64,
	pub max_polls: u32,
	pub submission_timeout_ms: u64,
}

impl Default for StoreConfig {
	fn default() -> Self {
		Self {
			base_url: "http://localhost:3001/api/v1".to_string(),
			api_token: None,
			timeout_secs: 10,
		}
	}
}

impl Default for SignerConfig {
	fn default() -> Self {
		Self {
			url: "http://localhost:6300".to_string(),
			timeout_secs: 30,
		}
	}
}

impl Default for SchedulerConfig {
	fn default() -> Self {
		Self {
			pollers: 8,
			queue_capacity: 256,
			state_dir: None,
		}
	}
}

impl Default for RetryProfile {
	fn default() -> Self {
		Self::from(&RetryPolicy::default())
	}
}

impl From<&RetryPolicy> for RetryProfile {
	fn from(policy: &RetryPolicy) -> Self {
		Self {
			base_delay_ms: policy.base_delay.as_millis() as u64,
			max_delay_ms: policy.max_delay.as_millis() as u64,
			jitter: policy.jitter,
			max_attempts: policy.max_attempts,
			poll_interval_ms: policy.poll_interval.as_millis() as u64,
			attempt_timeout_ms: policy.attempt_timeout.as_millis() as u64,
			max_polls: policy.max_polls,
			submission_timeout_ms: policy.submission_timeout.as_millis() as u64,
		}
	}
}

impl RetryProfile {
	pub fn to_policy(&self) -> RetryPolicy {
		RetryPolicy {
			base_delay: Duration::from_millis(self.base_delay_ms),
			max_delay: Duration::from_millis(self.max_delay_ms),
			jitter: self.jitter,
			max_attempts: self.max_attempts,
			poll_interval: Duration::from_millis(self.poll_interval_ms),
			attempt_timeout: Duration::from_millis(self.attempt_timeout_ms),
			max_polls: self.max_polls,
			submission_timeout: Duration::from_millis(self.submission_timeout_ms),
		}
	}

	/// Latency profile of a network family.
	pub fn for_family(family: NetworkFamily) -> Self {
		let base = RetryPolicy::default();
		let policy = match family {
			NetworkFamily::Evm => base,
			// Blockhashes expire after ~60-90 s.
			NetworkFamily::Solana => RetryPolicy {
				base_delay: Duration::from_millis(500),
				max_delay: Duration::from_secs(10),
				poll_interval: Duration::from_secs(1),
				max_polls: 120,
				submission_timeout: Duration::from_secs(60),
				..base
			},
			// 6 s blocks, finality a few blocks behind.
			NetworkFamily::Substrate => RetryPolicy {
				base_delay: Duration::from_secs(2),
				max_delay: Duration::from_secs(60),
				poll_interval: Duration::from_secs(6),
				attempt_timeout: Duration::from_secs(30),
				max_polls: 100,
				submission_timeout: Duration::from_secs(180),
				..base
			},
		};
		Self::from(&policy)
	}
}

/// Public endpoint of each network.
fn default_rpc_url(network: Network) -> &'static str {
	match network {
		Network::Polygon => "https://polygon-rpc.com",
		Network::PolygonMumbai => "https://rpc-mumbai.maticvigil.com",
		Network::Solana => "https://api.mainnet-beta.solana.com",
		Network::SolanaDevnet => "https://api.devnet.solana.com",
		Network::Polkadot => "wss://rpc.polkadot.io",
		Network::PolkadotTestnet => "wss://westend-rpc.polkadot.io",
		Network::Moonbeam => "https://rpc.api.moonbeam.network",
		Network::MoonbeamTestnet => "https://rpc.api.moonbase.moonbeam.network",
		Network::Base => "https://mainnet.base.org",
		Network::BaseTestnet => "https://sepolia.base.org",
	}
}

fn default_confirmations(network: Network) -> u64 {
	match network {
		Network::Polygon => 64,
		Network::Base | Network::Moonbeam => 12,
		n if n.is_testnet() => 3,
		_ => 1,
	}
}

impl NetworkConfig {
	pub fn defaults_for(network: Network) -> Self {
		let family = network.family();
		Self {
			enabled: false,
			rpc_url: default_rpc_url(network).to_string(),
			indexer_url: None,
			// Substrate networks use the todo pallet rather than a deployed contract.
			contract: (family == NetworkFamily::Substrate).then(|| "todo".to_string()),
			wallet_address: None,
			required_confirmations: default_confirmations(network),
			commitment: Commitment::default(),
			request_timeout_secs: 15,
			retry: RetryProfile::for_family(family),
		}
	}
}

impl Default for NetworkConfig {
	fn default() -> Self {
		Self::defaults_for(Network::Polygon)
	}
}

impl Default for EngineConfig {
	fn default() -> Self {
		Self {
			store: StoreConfig::default(),
			signer: SignerConfig::default(),
			engine: SchedulerConfig::default(),
			networks: Network::ALL
				.into_iter()
				.map(|network| (network, NetworkConfig::defaults_for(network)))
				.collect(),
		}
	}
}

impl EngineConfig {
	/// Load `path` (if given) over the defaults, apply the process environment and validate.
	pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
		let mut config = match path {
			Some(path) => Self::from_file(path)?,
			None => Self::default(),
		};
		config.apply_env_overrides(|key| std::env::var(key).ok());
		config.validate()?;
		Ok(config)
	}

	pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
		let content = std::fs::read_to_string(path).map_err(|source| ConfigError::IoError {
			path: path.to_path_buf(),
			source,
		})?;
		Self::from_toml(&content)
	}

	/// Parse a TOML document. Networks left out of the file keep their defaults, and fields
	/// left out of a network section take that network's defaults.
	pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
		#[derive(Deserialize)]
		#[serde(default)]
		struct Raw {
			store: StoreConfig,
			signer: SignerConfig,
			engine: SchedulerConfig,
			networks: BTreeMap<Network, toml::Value>,
		}

		impl Default for Raw {
			fn default() -> Self {
				let defaults = EngineConfig::default();
				Self {
					store: defaults.store,
					signer: defaults.signer,
					engine: defaults.engine,
					networks: BTreeMap::new(),
				}
			}
		}

		let raw: Raw = toml::from_str(content)?;
		let mut config = Self {
			store: raw.store,
			signer: raw.signer,
			engine: raw.engine,
			..Self::default()
		};

		for (network, value) in raw.networks {
			let mut merged = toml::Value::try_from(NetworkConfig::defaults_for(network)).map_err(|e| {
				ConfigError::InvalidValue {
					key: format!("networks.{}", network),
					message: e.to_string(),
				}
			})?;
			merge_tables(&mut merged, value);
			let network_config: NetworkConfig = merged.try_into()?;
			config.networks.insert(network, network_config);
		}

		Ok(config)
	}

	/// Apply environment overrides through `lookup`.
	///
	/// Per network, with `P` the upper-case network id: `P_RPC_URL`, `P_INDEXER_URL`,
	/// `P_WALLET_ADDRESS`, and `P_TODO_FACTORY_ADDRESS` (EVM) or `P_PROGRAM_ID` (Solana). Setting
	/// a contract or program reference enables the network. Globally: `TODO_API_URL`,
	/// `TODO_API_TOKEN`, `SIGNER_URL` and `SYNC_STATE_DIR`.
	pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
		let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

		if let Some(url) = lookup("TODO_API_URL") {
			self.store.base_url = url;
		}
		if let Some(token) = lookup("TODO_API_TOKEN") {
			self.store.api_token = Some(token);
		}
		if let Some(url) = lookup("SIGNER_URL") {
			self.signer.url = url;
		}
		if let Some(dir) = lookup("SYNC_STATE_DIR") {
			self.engine.state_dir = Some(PathBuf::from(dir));
		}

		for (network, config) in self.networks.iter_mut() {
			let prefix = network.env_prefix();
			if let Some(url) = lookup(&format!("{}_RPC_URL", prefix)) {
				config.rpc_url = url;
			}
			if let Some(url) = lookup(&format!("{}_INDEXER_URL", prefix)) {
				config.indexer_url = Some(url);
			}
			if let Some(wallet) = lookup(&format!("{}_WALLET_ADDRESS", prefix)) {
				config.wallet_address = Some(wallet);
			}
			let contract_key = match network.family() {
				NetworkFamily::Evm => Some(format!("{}_TODO_FACTORY_ADDRESS", prefix)),
				NetworkFamily::Solana => Some(format!("{}_PROGRAM_ID", prefix)),
				NetworkFamily::Substrate => None,
			};
			if let Some(contract) = contract_key.and_then(|key| lookup(&key)) {
				config.contract = Some(contract);
				config.enabled = true;
			}
		}
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.engine.pollers == 0 {
			return Err(invalid("engine.pollers", "must be at least 1"));
		}
		if self.engine.queue_capacity == 0 {
			return Err(invalid("engine.queue_capacity", "must be at least 1"));
		}

		for (network, config) in self.enabled_networks() {
			let missing = |field| ConfigError::MissingField { network, field };
			if config.rpc_url.trim().is_empty() {
				return Err(missing("rpc_url"));
			}
			if config.contract.as_deref().is_none_or(|c| c.trim().is_empty()) {
				return Err(missing("contract"));
			}
			if config.wallet_address.is_none() {
				return Err(missing("wallet_address"));
			}
			if network.family() != NetworkFamily::Evm && config.indexer_url.is_none() {
				return Err(missing("indexer_url"));
			}

			let retry = &config.retry;
			let key = |field: &str| format!("networks.{}.retry.{}", network, field);
			if retry.max_attempts == 0 {
				return Err(invalid(&key("max_attempts"), "must be at least 1"));
			}
			if !(0.0..=1.0).contains(&retry.jitter) {
				return Err(invalid(&key("jitter"), "must be between 0 and 1"));
			}
			if retry.base_delay_ms > retry.max_delay_ms {
				return Err(invalid(&key("base_delay_ms"), "exceeds max_delay_ms"));
			}
			if retry.attempt_timeout_ms == 0 || retry.poll_interval_ms == 0 {
				return Err(invalid(&key("poll_interval_ms"), "intervals must be positive"));
			}
		}
		Ok(())
	}

	pub fn enabled_networks(&self) -> impl Iterator<Item = (Network, &NetworkConfig)> {
		self.networks
			.iter()
			.filter(|(_, config)| config.enabled)
			.map(|(network, config)| (*network, config))
	}
}

fn invalid(key: &str, message: &str) -> ConfigError {
	ConfigError::InvalidValue {
		key: key.to_string(),
		message: message.to_string(),
	}
}

/// Recursively overlay `overlay` onto `base`.
fn merge_tables(base: &mut toml::Value, overlay: toml::Value) {
	match (base, overlay) {
		(toml::Value::Table(base), toml::Value::Table(overlay)) => {
			for (key, value) in overlay {
				match base.get_mut(&key) {
					Some(existing) => merge_tables(existing, value),
					None => {
						base.insert(key, value);
					}
				}
			}
		}
		(base, overlay) => *base = overlay,
	}
}
