//! Supported blockchain networks.
//!
//! Networks form a closed set. Each one belongs to a [`NetworkFamily`], which decides the adapter
//! implementation used to reach it. Resolution happens once when the adapter registry is built;
//! nothing is looked up by name while a sync is running.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A blockchain network a todo can be mirrored onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Network {
	Polygon,
	PolygonMumbai,
	Solana,
	SolanaDevnet,
	Polkadot,
	PolkadotTestnet,
	Moonbeam,
	MoonbeamTestnet,
	Base,
	BaseTestnet,
}

/// Adapter family shared by networks with the same node interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkFamily {
	/// Ethereum JSON-RPC (Polygon, Moonbeam, Base).
	Evm,
	/// Solana JSON-RPC.
	Solana,
	/// Substrate RPC plus indexer (Polkadot relay and parachains).
	Substrate,
}

impl Network {
	pub const ALL: [Network; 10] = [
		Network::Polygon,
		Network::PolygonMumbai,
		Network::Solana,
		Network::SolanaDevnet,
		Network::Polkadot,
		Network::PolkadotTestnet,
		Network::Moonbeam,
		Network::MoonbeamTestnet,
		Network::Base,
		Network::BaseTestnet,
	];

	pub fn family(&self) -> NetworkFamily {
		match self {
			Network::Polygon
			| Network::PolygonMumbai
			| Network::Moonbeam
			| Network::MoonbeamTestnet
			| Network::Base
			| Network::BaseTestnet => NetworkFamily::Evm,
			Network::Solana | Network::SolanaDevnet => NetworkFamily::Solana,
			Network::Polkadot | Network::PolkadotTestnet => NetworkFamily::Substrate,
		}
	}

	/// Stable identifier, also used in config files and on the off-chain record.
	pub fn as_str(&self) -> &'static str {
		match self {
			Network::Polygon => "polygon",
			Network::PolygonMumbai => "polygon_mumbai",
			Network::Solana => "solana",
			Network::SolanaDevnet => "solana_devnet",
			Network::Polkadot => "polkadot",
			Network::PolkadotTestnet => "polkadot_testnet",
			Network::Moonbeam => "moonbeam",
			Network::MoonbeamTestnet => "moonbeam_testnet",
			Network::Base => "base",
			Network::BaseTestnet => "base_testnet",
		}
	}

	pub fn display_name(&self) -> &'static str {
		match self {
			Network::Polygon => "Polygon",
			Network::PolygonMumbai => "Polygon Mumbai",
			Network::Solana => "Solana",
			Network::SolanaDevnet => "Solana Devnet",
			Network::Polkadot => "Polkadot",
			Network::PolkadotTestnet => "Westend",
			Network::Moonbeam => "Moonbeam",
			Network::MoonbeamTestnet => "Moonbase Alpha",
			Network::Base => "Base",
			Network::BaseTestnet => "Base Sepolia",
		}
	}

	/// EVM chain id, or the cluster id for Solana. Substrate chains have none.
	pub fn chain_id(&self) -> u64 {
		match self {
			Network::Polygon => 137,
			Network::PolygonMumbai => 80001,
			Network::Solana => 101,
			Network::SolanaDevnet => 103,
			Network::Polkadot | Network::PolkadotTestnet => 0,
			Network::Moonbeam => 1284,
			Network::MoonbeamTestnet => 1287,
			Network::Base => 8453,
			Network::BaseTestnet => 84532,
		}
	}

	pub fn is_testnet(&self) -> bool {
		matches!(
			self,
			Network::PolygonMumbai
				| Network::SolanaDevnet
				| Network::PolkadotTestnet
				| Network::MoonbeamTestnet
				| Network::BaseTestnet
		)
	}

	/// Prefix for environment variable overrides, e.g. `POLYGON_MUMBAI`.
	pub fn env_prefix(&self) -> String {
		self.as_str().to_ascii_uppercase()
	}

	/// Block explorer site. Solana devnet selects its cluster through the query string.
	pub fn explorer_url(&self) -> &'static str {
		match self {
			Network::Polygon => "https://polygonscan.com",
			Network::PolygonMumbai => "https://mumbai.polygonscan.com",
			Network::Solana => "https://explorer.solana.com",
			Network::SolanaDevnet => "https://explorer.solana.com?cluster=devnet",
			Network::Polkadot => "https://polkadot.subscan.io",
			Network::PolkadotTestnet => "https://westend.subscan.io",
			Network::Moonbeam => "https://moonscan.io",
			Network::MoonbeamTestnet => "https://moonbase.moonscan.io",
			Network::Base => "https://basescan.org",
			Network::BaseTestnet => "https://sepolia.basescan.org",
		}
	}

	/// Explorer page of a transaction (an extrinsic on Substrate chains).
	pub fn tx_explorer_url(&self, tx_ref: &str) -> String {
		match self.family() {
			NetworkFamily::Substrate => self.explorer_page("extrinsic", tx_ref),
			NetworkFamily::Evm | NetworkFamily::Solana => self.explorer_page("tx", tx_ref),
		}
	}

	/// Explorer page of a wallet or contract address.
	pub fn address_explorer_url(&self, address: &str) -> String {
		match self.family() {
			NetworkFamily::Substrate => self.explorer_page("account", address),
			NetworkFamily::Evm | NetworkFamily::Solana => self.explorer_page("address", address),
		}
	}

	fn explorer_page(&self, section: &str, id: &str) -> String {
		let (site, query) = match self.explorer_url().split_once('?') {
			Some((site, query)) => (site, Some(query)),
			None => (self.explorer_url(), None),
		};
		match query {
			Some(query) => format!("{}/{}/{}?{}", site, section, id, query),
			None => format!("{}/{}/{}", site, section, id),
		}
	}
}

impl fmt::Display for Network {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, thiserror::Error)]
#[error("unknown network: {0}")]
pub struct UnknownNetwork(pub String);

impl FromStr for Network {
	type Err = UnknownNetwork;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
		Network::ALL
			.into_iter()
			.find(|network| network.as_str() == normalized)
			.ok_or_else(|| UnknownNetwork(s.to_string()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_identifiers_and_aliases() {
		assert_eq!("polygon".parse::<Network>().unwrap(), Network::Polygon);
		assert_eq!("Base-Testnet".parse::<Network>().unwrap(), Network::BaseTestnet);
		assert!("ethereum".parse::<Network>().is_err());
	}

	#[test]
	fn families_cover_every_network() {
		let evm = Network::ALL
			.iter()
			.filter(|n| n.family() == NetworkFamily::Evm)
			.count();
		assert_eq!(evm, 6);
		assert_eq!(Network::Polkadot.family(), NetworkFamily::Substrate);
		assert_eq!(Network::SolanaDevnet.family(), NetworkFamily::Solana);
	}

	#[test]
	fn serde_uses_snake_case() {
		let json = serde_json::to_string(&Network::MoonbeamTestnet).unwrap();
		assert_eq!(json, "\"moonbeam_testnet\"");
		assert_eq!(Network::PolygonMumbai.env_prefix(), "POLYGON_MUMBAI");
	}

	#[test]
	fn explorer_links_follow_each_family() {
		let hash = "0x1234567890123456789012345678901234567890123456789012345678901234";
		assert_eq!(
			Network::Moonbeam.tx_explorer_url(hash),
			format!("https://moonscan.io/tx/{}", hash)
		);
		assert_eq!(
			Network::Base.address_explorer_url("0xabc"),
			"https://basescan.org/address/0xabc"
		);
		assert_eq!(
			Network::Polkadot.tx_explorer_url("0xfeed"),
			"https://polkadot.subscan.io/extrinsic/0xfeed"
		);
		assert_eq!(
			Network::PolkadotTestnet.address_explorer_url("5Grw"),
			"https://westend.subscan.io/account/5Grw"
		);
		assert_eq!(
			Network::SolanaDevnet.tx_explorer_url("5sig"),
			"https://explorer.solana.com/tx/5sig?cluster=devnet"
		);
	}
}
