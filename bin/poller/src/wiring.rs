//! Startup wiring: turns [`Settings`] plus environment secrets into the live
//! collaborators the two loops drive. Nothing here runs more than once.

use std::{collections::HashMap, sync::Arc, time::Duration};

use ethers::{
	providers::{Http, Provider},
	signers::LocalWallet,
	types::Address,
};
use poller_bridges::{
	adapters::{
		cex::{AssetMappingCache, CentralizedExchangeAdapter},
		liquid_staking::LiquidStakingCompositeAdapter,
		liquidity_pool::LiquidityPoolAdapter,
		optimistic_rollup::OptimisticRollupAdapter,
		zk_rollup::ZkRollupAdapter,
	},
	BridgeAdapter, BridgeRegistry, ChainClientMap,
};
use poller_chain_client::{
	evm::EvmChainClient, provider::FallbackProvider, retry::RetryPolicy, svm::SvmChainClient, ChainAddress,
	ChainClient,
};
use poller_config::{secret, BridgeAdapterConfig, Settings, VmKind};
use poller_feed::{hub::HubClient, HttpInvoiceFeed, InvoiceFeed};
use poller_metrics::Metrics;
use poller_oracle::{BalanceOracle, ReadAddress};
use poller_signer::{eoa::EoaSigner, proposer::SafeProposerSigner, Signer};
use poller_store::StateStore;
use poller_types::invoice::ChainId;

/// Everything the two loops need, built once at startup and shared behind
/// `Arc` for the lifetime of the process.
pub struct App {
	pub settings: Settings,
	pub store: StateStore,
	pub metrics: Metrics,
	pub oracle: BalanceOracle,
	pub bridges: BridgeRegistry,
	pub clients: ChainClientMap,
	pub signers: HashMap<ChainId, Arc<dyn Signer>>,
	pub feed: Box<dyn InvoiceFeed>,
	pub hub: HubClient,
}

pub async fn build(config_dir: &str) -> anyhow::Result<App> {
	let settings = Settings::load(config_dir)?;

	let database_url = std::env::var("DATABASE_URL").map_err(|_| anyhow::anyhow!("DATABASE_URL is not set"))?;
	let store = StateStore::connect(&database_url, settings.database_max_connections).await?;
	store.run_migrations().await?;

	let metrics = Metrics::new()?;

	let clients = build_chain_clients(&settings)?;
	let (signers, eoa_addresses) = build_signers(&settings)?;
	let read_addresses = build_read_addresses(&settings, &eoa_addresses)?;

	let hub_contracts: HashMap<ChainId, Address> =
		settings.chains.iter().map(|(&chain, cfg)| (chain, cfg.deployments.everclear)).collect();
	let assets = settings.chains.values().flat_map(|cfg| cfg.assets.clone()).collect();
	let oracle = BalanceOracle::new(clients.clone(), assets, read_addresses, hub_contracts);

	let bridges = build_bridge_registry(&settings, &clients)?;

	let http = reqwest::Client::new();
	let feed: Box<dyn InvoiceFeed> =
		Box::new(HttpInvoiceFeed::new(url::Url::parse(&settings.invoice_feed_url)?, http.clone()));
	let hub = HubClient::new(url::Url::parse(&settings.hub_url)?, http);

	Ok(App { settings, store, metrics, oracle, bridges, clients, signers, feed, hub })
}

fn build_chain_clients(settings: &Settings) -> anyhow::Result<ChainClientMap> {
	let mut clients: ChainClientMap = HashMap::new();
	for (&chain_id, chain_cfg) in &settings.chains {
		let urls = chain_cfg.providers.iter().map(|u| url::Url::parse(u)).collect::<Result<Vec<_>, _>>()?;
		let client: Arc<dyn ChainClient> = match chain_cfg.vm {
			VmKind::Evm => {
				let provider = FallbackProvider::new(&urls, RetryPolicy::default());
				Arc::new(EvmChainClient::new(
					chain_id,
					provider,
					chain_cfg.min_confirmations,
					Duration::from_secs(chain_cfg.confirmation_timeout_secs),
				))
			},
			VmKind::Svm => Arc::new(SvmChainClient::new(chain_id, urls)),
		};
		clients.insert(chain_id, client);
	}
	Ok(clients)
}

/// Builds one [`Signer`] per `Evm` chain with a configured wallet, alongside
/// the derived address of each `Eoa` signer (captured here, before the
/// `Arc<dyn Signer>` erasure, since [`ReadAddress`] construction needs it too).
fn build_signers(settings: &Settings) -> anyhow::Result<(HashMap<ChainId, Arc<dyn Signer>>, HashMap<ChainId, Address>)> {
	let mut signers: HashMap<ChainId, Arc<dyn Signer>> = HashMap::new();
	let mut eoa_addresses: HashMap<ChainId, Address> = HashMap::new();

	for (&chain_id, chain_cfg) in &settings.chains {
		if chain_cfg.vm != VmKind::Evm {
			continue;
		}
		let Some(wallet_cfg) = settings.wallet.get(&chain_id) else {
			tracing::warn!(chain = chain_id, "no wallet configured for chain, it will be read-only");
			continue;
		};
		let signer: Arc<dyn Signer> = match wallet_cfg {
			poller_types::wallet::WalletConfig::Eoa => {
				let key_bytes = secret::resolve_signer_key(chain_id)?;
				let wallet: LocalWallet = hex::encode(&key_bytes).parse()?;
				let rpc_url = chain_cfg
					.providers
					.first()
					.ok_or_else(|| anyhow::anyhow!("chain {chain_id} has no configured RPC providers"))?;
				let provider = Arc::new(Provider::<Http>::try_from(rpc_url.as_str())?);
				let eoa = EoaSigner::new(wallet, chain_id, provider);
				eoa_addresses.insert(chain_id, eoa.address());
				Arc::new(eoa)
			},
			poller_types::wallet::WalletConfig::Zodiac { safe_address, module_address, role_key } => {
				let service_url = chain_cfg
					.safe_tx_service
					.as_deref()
					.ok_or_else(|| anyhow::anyhow!("chain {chain_id} is Zodiac-wired but has no safeTxService configured"))?;
				Arc::new(SafeProposerSigner::new(
					url::Url::parse(service_url)?,
					*safe_address,
					*module_address,
					role_key.clone(),
				))
			},
		};
		signers.insert(chain_id, signer);
	}
	Ok((signers, eoa_addresses))
}

fn build_read_addresses(
	settings: &Settings,
	eoa_addresses: &HashMap<ChainId, Address>,
) -> anyhow::Result<HashMap<ChainId, ReadAddress>> {
	let mut read_addresses = HashMap::new();
	for (&chain_id, chain_cfg) in &settings.chains {
		let address = match chain_cfg.vm {
			VmKind::Svm => match &chain_cfg.read_address {
				Some(addr) => ChainAddress::Base58(addr.clone()),
				None => {
					tracing::warn!(chain = chain_id, "svm chain has no readAddress configured, skipping balance reads");
					continue;
				},
			},
			VmKind::Evm => match settings.wallet.get(&chain_id) {
				Some(poller_types::wallet::WalletConfig::Zodiac { safe_address, .. }) => ChainAddress::Hex(*safe_address),
				Some(poller_types::wallet::WalletConfig::Eoa) => match eoa_addresses.get(&chain_id) {
					Some(&address) => ChainAddress::Hex(address),
					None => continue,
				},
				None => continue,
			},
		};
		read_addresses.insert(chain_id, ReadAddress(address));
	}
	Ok(read_addresses)
}

fn build_bridge_registry(settings: &Settings, clients: &ChainClientMap) -> anyhow::Result<BridgeRegistry> {
	let mut registry = BridgeRegistry::new();
	for adapter_cfg in &settings.bridge_adapters {
		let adapter: Arc<dyn BridgeAdapter> = match adapter_cfg {
			BridgeAdapterConfig::OptimisticRollupNative { l1_chain, l2_chain, l1_portal, l2_bridge, challenge_window_secs } => {
				Arc::new(OptimisticRollupAdapter::new(
					*l1_chain,
					*l2_chain,
					*l1_portal,
					*l2_bridge,
					Duration::from_secs(*challenge_window_secs),
					clients.clone(),
				))
			},
			BridgeAdapterConfig::ZkRollupNative {
				l1_chain,
				l2_chain,
				l1_bridge,
				l2_bridge,
				base_deposit_cost,
				refund_buffer_bps,
				sender_key,
				rollup_rpc,
			} => Arc::new(ZkRollupAdapter::new(
				*l1_chain,
				*l2_chain,
				*l1_bridge,
				*l2_bridge,
				*base_deposit_cost,
				*refund_buffer_bps,
				*sender_key,
				url::Url::parse(rollup_rpc)?,
				clients.clone(),
			)),
			BridgeAdapterConfig::LiquidityPool { quote_api, pools } => {
				Arc::new(LiquidityPoolAdapter::new(url::Url::parse(quote_api)?, pools.clone(), clients.clone()))
			},
			BridgeAdapterConfig::CentralizedExchange { api_base, asset_list_url, asset_cache_ttl_secs } => {
				let api_key = secret::resolve_string("POLLER_CEX_API_KEY")?;
				let api_secret = secret::resolve_string("POLLER_CEX_API_SECRET")?;
				let asset_cache =
					AssetMappingCache::new(url::Url::parse(asset_list_url)?, Duration::from_secs(*asset_cache_ttl_secs));
				Arc::new(CentralizedExchangeAdapter::new(
					url::Url::parse(api_base)?,
					api_key,
					api_secret,
					asset_cache,
					clients.clone(),
				))
			},
			BridgeAdapterConfig::LiquidStakingComposite {
				l1_chain,
				l2_chain,
				weth,
				staking_pool,
				liquid_staked_token,
				l2_bridge,
			} => Arc::new(LiquidStakingCompositeAdapter::new(
				*l1_chain,
				*l2_chain,
				*weth,
				*staking_pool,
				*liquid_staked_token,
				*l2_bridge,
				clients.clone(),
			)),
		};
		registry.register(adapter);
	}
	Ok(registry)
}
