//! Operational configuration and runtime secret handling.
//!
//! Every option here is read once at startup; nothing in the two control
//! loops reaches back into `config` at runtime. Route/wallet/asset shapes are
//! the same types the planner, oracle and signer already operate on, so a
//! deserialized [`Settings`] can be handed straight to them.

pub mod secret;

use std::collections::HashMap;

use ethers::types::{Address, U256};
use poller_types::{
	asset::AssetConfig,
	invoice::ChainId,
	route::RouteRebalancingConfig,
	wallet::WalletConfig,
};
use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
	#[error(transparent)]
	Load(#[from] config::ConfigError),
	#[error("malformed configuration: {0}")]
	Malformed(#[from] serde_json::Error),
	#[error("chain {0} is listed in supportedSettlementDomains but has no chains[] entry")]
	MissingChainConfig(ChainId),
	#[error("route preference references bridge {0:?} with no matching bridgeAdapters[] entry")]
	MissingBridgeAdapterConfig(poller_types::bridge::BridgeTag),
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeploymentAddresses {
	pub everclear: Address,
	pub permit2: Address,
	pub multicall3: Address,
}

/// Which client implementation a chain is wired to. Distinct from any asset's
/// own address encoding: a chain is wholly EVM or wholly SVM, never mixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VmKind {
	Evm,
	Svm,
}

impl Default for VmKind {
	fn default() -> Self {
		VmKind::Evm
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainConfig {
	/// Ordered fallback RPC URLs, tried in order on failure.
	pub providers: Vec<String>,
	#[serde(default)]
	pub vm: VmKind,
	pub assets: Vec<AssetConfig>,
	pub gas_threshold: Option<U256>,
	pub bandwidth_threshold: Option<U256>,
	pub energy_threshold: Option<U256>,
	pub deployments: DeploymentAddresses,
	pub safe_tx_service: Option<String>,
	/// Balance-read address for a chain with no configured signer (typically
	/// an `Svm` chain, in its native base58 encoding; `wallet[chainId]` still
	/// governs the signed path for `Evm` chains).
	pub read_address: Option<String>,
	/// Minimum confirmations `submit_and_monitor` waits for on this chain.
	#[serde(default = "default_min_confirmations")]
	pub min_confirmations: u64,
	/// Seconds; how long `submit_and_monitor` waits before giving up.
	#[serde(default = "default_confirmation_timeout_secs")]
	pub confirmation_timeout_secs: u64,
}

fn default_min_confirmations() -> u64 {
	1
}

fn default_confirmation_timeout_secs() -> u64 {
	45
}

/// Construction parameters for one configured bridge adapter instance.
/// Distinct from the loops' own tunables above: these are wiring-time values
/// (addresses, RPC endpoints, fee constants) needed once at startup to build
/// the adapter, not settings either loop re-reads per tick. CEX credentials
/// are deliberately absent here; they come from the environment, see
/// [`crate::secret`].
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BridgeAdapterConfig {
	OptimisticRollupNative {
		l1_chain: ChainId,
		l2_chain: ChainId,
		l1_portal: Address,
		l2_bridge: Address,
		challenge_window_secs: u64,
	},
	ZkRollupNative {
		l1_chain: ChainId,
		l2_chain: ChainId,
		l1_bridge: Address,
		l2_bridge: Address,
		base_deposit_cost: U256,
		refund_buffer_bps: u32,
		sender_key: ethers::types::H256,
		rollup_rpc: String,
	},
	LiquidityPool {
		quote_api: String,
		pools: HashMap<ChainId, Address>,
	},
	CentralizedExchange {
		api_base: String,
		asset_list_url: String,
		asset_cache_ttl_secs: u64,
	},
	LiquidStakingComposite {
		l1_chain: ChainId,
		l2_chain: ChainId,
		weth: Address,
		staking_pool: Address,
		liquid_staked_token: Address,
		l2_bridge: Address,
	},
}

impl BridgeAdapterConfig {
	pub fn tag(&self) -> poller_types::bridge::BridgeTag {
		use poller_types::bridge::BridgeTag;
		match self {
			BridgeAdapterConfig::OptimisticRollupNative { .. } => BridgeTag::OptimisticRollupNative,
			BridgeAdapterConfig::ZkRollupNative { .. } => BridgeTag::ZkRollupNative,
			BridgeAdapterConfig::LiquidityPool { .. } => BridgeTag::LiquidityPool,
			BridgeAdapterConfig::CentralizedExchange { .. } => BridgeTag::CentralizedExchange,
			BridgeAdapterConfig::LiquidStakingComposite { .. } => BridgeTag::LiquidStakingComposite,
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
	/// Seconds; an invoice younger than this is rejected as `InvalidAge`.
	pub invoice_age: u64,
	/// Chains considered as purchase origins; also bounds the planner's top-N.
	pub supported_settlement_domains: Vec<ChainId>,
	pub supported_assets: Vec<String>,
	pub chains: HashMap<ChainId, ChainConfig>,
	pub routes: Vec<RouteRebalancingConfig>,
	pub wallet: HashMap<ChainId, WalletConfig>,
	pub force_oldest_invoice: bool,
	/// One entry per bridge kind actually reachable from `routes`. Order is
	/// irrelevant; `kind` within each entry is what the wiring layer matches on.
	#[serde(default)]
	pub bridge_adapters: Vec<BridgeAdapterConfig>,
	/// Base URL of the external invoice feed (§4.7 step 2).
	pub invoice_feed_url: String,
	/// Base URL of the hub's economy/intent-status endpoints (§4.7 step 3).
	pub hub_url: String,
	/// How many confirmed Postgres connections the state store keeps open.
	#[serde(default = "default_db_max_connections")]
	pub database_max_connections: u32,
}

fn default_db_max_connections() -> u32 {
	10
}

impl Settings {
	/// Loads `config/default.{toml,yaml,json}` (whichever the `config` crate
	/// finds) then layers environment overrides prefixed `POLLER_`, with `__`
	/// as the nesting separator (`POLLER_INVOICE_AGE`, `POLLER_CHAINS__1__GAS_THRESHOLD`).
	pub fn load(config_dir: &str) -> Result<Self, SettingsError> {
		let raw = config::Config::builder()
			.add_source(config::File::with_name(&format!("{config_dir}/default")))
			.add_source(config::Environment::with_prefix("POLLER").separator("__"))
			.build()?;
		// Round-trip through `serde_json::Value` rather than deserializing
		// straight out of `config`'s own `Deserializer`: chain/wallet maps are
		// keyed by numeric chain id, and `serde_json`'s map-key coercion
		// handles that where a generic `config::Value` walk does not.
		let as_json: serde_json::Value = raw.try_deserialize()?;
		let settings: Settings = serde_json::from_value(as_json)?;
		settings.validate()?;
		Ok(settings)
	}

	fn validate(&self) -> Result<(), SettingsError> {
		for &chain in &self.supported_settlement_domains {
			if !self.chains.contains_key(&chain) {
				return Err(SettingsError::MissingChainConfig(chain));
			}
		}
		let configured: std::collections::HashSet<_> = self.bridge_adapters.iter().map(BridgeAdapterConfig::tag).collect();
		for route in &self.routes {
			for &tag in route.preferences.iter().chain(route.swap_preferences.iter()) {
				if !configured.contains(&tag) {
					return Err(SettingsError::MissingBridgeAdapterConfig(tag));
				}
			}
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn sample_settings() -> Settings {
		let raw = config::Config::builder()
			.add_source(config::File::from_str(
				r#"{
					"invoiceAge": 60,
					"supportedSettlementDomains": [1],
					"supportedAssets": ["USDC"],
					"chains": {
						"1": {
							"providers": ["https://rpc.example/1"],
							"assets": [],
							"deployments": {
								"everclear": "0x0000000000000000000000000000000000000001",
								"permit2": "0x0000000000000000000000000000000000000002",
								"multicall3": "0x0000000000000000000000000000000000000003"
							}
						}
					},
					"routes": [],
					"wallet": {},
					"forceOldestInvoice": false,
					"invoiceFeedUrl": "https://feed.example/",
					"hubUrl": "https://hub.example/"
				}"#,
				config::FileFormat::Json,
			))
			.build()
			.unwrap();
		let as_json: serde_json::Value = raw.try_deserialize().unwrap();
		serde_json::from_value(as_json).unwrap()
	}

	#[test]
	fn deserializes_minimal_config() {
		let settings = sample_settings();
		assert_eq!(settings.invoice_age, 60);
		assert_eq!(settings.supported_settlement_domains, vec![1]);
		assert!(settings.chains.contains_key(&1));
	}

	#[test]
	fn validate_rejects_settlement_domain_without_chain_config() {
		let mut settings = sample_settings();
		settings.supported_settlement_domains.push(999);
		let err = settings.validate().unwrap_err();
		assert!(matches!(err, SettingsError::MissingChainConfig(999)));
	}

	#[test]
	fn validate_rejects_route_preference_missing_bridge_adapter_config() {
		use poller_types::{bridge::BridgeTag, route::{RebalanceRoute, RouteRebalancingConfig}};

		let mut settings = sample_settings();
		settings.routes.push(RouteRebalancingConfig {
			route: RebalanceRoute { origin: 1, destination: 1, asset: Address::zero(), destination_asset: None },
			preferences: vec![BridgeTag::LiquidityPool],
			slippages_dbps: vec![50],
			swap_preferences: vec![],
			maximum: U256::zero(),
			reserve: U256::zero(),
		});
		let err = settings.validate().unwrap_err();
		assert!(matches!(err, SettingsError::MissingBridgeAdapterConfig(BridgeTag::LiquidityPool)));
	}

	#[test]
	fn deserializes_bridge_adapter_configs_by_kind_tag() {
		let raw = config::Config::builder()
			.add_source(config::File::from_str(
				r#"{
					"invoiceAge": 60,
					"supportedSettlementDomains": [1],
					"supportedAssets": ["USDC"],
					"chains": {
						"1": {
							"providers": ["https://rpc.example/1"],
							"assets": [],
							"deployments": {
								"everclear": "0x0000000000000000000000000000000000000001",
								"permit2": "0x0000000000000000000000000000000000000002",
								"multicall3": "0x0000000000000000000000000000000000000003"
							}
						}
					},
					"routes": [],
					"wallet": {},
					"forceOldestInvoice": false,
					"invoiceFeedUrl": "https://feed.example/",
					"hubUrl": "https://hub.example/",
					"bridgeAdapters": [
						{
							"kind": "liquidity_pool",
							"quoteApi": "https://quotes.example/",
							"pools": {"1": "0x0000000000000000000000000000000000000004"}
						}
					]
				}"#,
				config::FileFormat::Json,
			))
			.build()
			.unwrap();
		let as_json: serde_json::Value = raw.try_deserialize().unwrap();
		let settings: Settings = serde_json::from_value(as_json).unwrap();
		assert_eq!(settings.bridge_adapters.len(), 1);
		assert_eq!(settings.bridge_adapters[0].tag(), poller_types::bridge::BridgeTag::LiquidityPool);
	}
}
