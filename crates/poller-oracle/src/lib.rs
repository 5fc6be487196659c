//! Balance Oracle (§4.4). Produces three maps on every tick: per-ticker
//! per-chain balances (normalized to 18 decimals), per-chain gas balances (in
//! the chain's native units), and per-ticker per-chain hub-custodied amounts.
//!
//! Every fetch is fan-out with per-entry failure ⇒ zero: one chain's RPC
//! being down degrades that one cell of the map, never the whole tick.

use std::{collections::HashMap, sync::Arc};

use ethers::types::{Address, U256};
use futures::future::join_all;
use poller_chain_client::{ChainAddress, ChainClient};
use poller_types::{
	asset::AssetConfig,
	decimals::convert_to_18,
	invoice::{ChainId, TickerHash},
};

/// Where the oracle reads a chain's balance from. Set once at startup per the
/// `wallet[chainId]` config: a Zodiac-wired chain substitutes the Safe's own
/// address for the raw EOA the rest of the system signs with.
#[derive(Debug, Clone)]
pub struct ReadAddress(pub ChainAddress);

#[derive(Debug, Clone, Default)]
pub struct BalanceSnapshot {
	pub balances: HashMap<TickerHash, HashMap<ChainId, U256>>,
	pub gas_balances: HashMap<ChainId, U256>,
	pub custodied: HashMap<TickerHash, HashMap<ChainId, U256>>,
}

impl BalanceSnapshot {
	pub fn balance_of(&self, ticker: TickerHash, chain: ChainId) -> U256 {
		self.balances.get(&ticker).and_then(|m| m.get(&chain)).copied().unwrap_or_default()
	}

	pub fn custodied_of(&self, ticker: TickerHash, chain: ChainId) -> U256 {
		self.custodied.get(&ticker).and_then(|m| m.get(&chain)).copied().unwrap_or_default()
	}
}

pub struct BalanceOracle {
	clients: HashMap<ChainId, Arc<dyn ChainClient>>,
	assets: Vec<AssetConfig>,
	read_addresses: HashMap<ChainId, ReadAddress>,
	/// Hub contract address per chain, used for the `custodiedAssets(assetHash)` view.
	hub_contracts: HashMap<ChainId, Address>,
}

impl BalanceOracle {
	pub fn new(
		clients: HashMap<ChainId, Arc<dyn ChainClient>>,
		assets: Vec<AssetConfig>,
		read_addresses: HashMap<ChainId, ReadAddress>,
		hub_contracts: HashMap<ChainId, Address>,
	) -> Self {
		Self { clients, assets, read_addresses, hub_contracts }
	}

	/// The address this oracle reads `chain`'s balances from, if configured.
	/// Exposed so the purchase/rebalance loops can reuse it as the sender and
	/// recipient of their own on-chain transactions, rather than each loop
	/// re-deriving "our own address" a second way.
	pub fn read_address(&self, chain: ChainId) -> Option<&ChainAddress> {
		self.read_addresses.get(&chain).map(|ReadAddress(addr)| addr)
	}

	pub async fn tick(&self) -> BalanceSnapshot {
		let (balances, custodied) = futures::join!(self.fetch_balances(), self.fetch_custodied());
		let gas_balances = self.fetch_gas_balances().await;
		BalanceSnapshot { balances, gas_balances, custodied }
	}

	async fn fetch_balances(&self) -> HashMap<TickerHash, HashMap<ChainId, U256>> {
		let fetches = self.assets.iter().map(|asset| async move {
			let value = self.fetch_one_balance(asset).await.unwrap_or_else(|err| {
				tracing::warn!(
					chain = asset.chain,
					symbol = %asset.symbol,
					"balance fetch failed, recording zero: {err}"
				);
				U256::zero()
			});
			(asset.ticker_hash, asset.chain, value)
		});

		let mut out: HashMap<TickerHash, HashMap<ChainId, U256>> = HashMap::new();
		for (ticker, chain, value) in join_all(fetches).await {
			out.entry(ticker).or_default().insert(chain, value);
		}
		out
	}

	async fn fetch_one_balance(&self, asset: &AssetConfig) -> Result<U256, poller_chain_client::ClientError> {
		let client = self.client_for(asset.chain)?;
		let ReadAddress(owner) = self
			.read_addresses
			.get(&asset.chain)
			.ok_or(poller_chain_client::ClientError::Rpc(format!("no configured read address for chain {}", asset.chain)))?;

		let native = if asset.is_native {
			client.get_native_balance(owner).await?
		} else {
			let asset_address = match &asset.address {
				poller_types::asset::AssetAddress::Hex(a) => ChainAddress::Hex(*a),
				poller_types::asset::AssetAddress::Base58(s) => ChainAddress::Base58(s.clone()),
			};
			client.get_token_balance(&asset_address, owner).await?
		};

		Ok(convert_to_18(native, asset.decimals))
	}

	async fn fetch_gas_balances(&self) -> HashMap<ChainId, U256> {
		let fetches = self.read_addresses.keys().map(|&chain| async move {
			let value = self.fetch_one_gas_balance(chain).await.unwrap_or_else(|err| {
				tracing::warn!(chain, "gas balance fetch failed, recording zero: {err}");
				U256::zero()
			});
			(chain, value)
		});
		join_all(fetches).await.into_iter().collect()
	}

	async fn fetch_one_gas_balance(&self, chain: ChainId) -> Result<U256, poller_chain_client::ClientError> {
		let client = self.client_for(chain)?;
		let ReadAddress(owner) = self
			.read_addresses
			.get(&chain)
			.ok_or(poller_chain_client::ClientError::Rpc(format!("no configured read address for chain {chain}")))?;
		client.get_native_balance(owner).await
	}

	async fn fetch_custodied(&self) -> HashMap<TickerHash, HashMap<ChainId, U256>> {
		let fetches = self.assets.iter().filter(|a| self.hub_contracts.contains_key(&a.chain)).map(|asset| async move {
			let value = self.fetch_one_custodied(asset).await.unwrap_or_else(|err| {
				tracing::warn!(
					chain = asset.chain,
					symbol = %asset.symbol,
					"custodied fetch failed, recording zero: {err}"
				);
				U256::zero()
			});
			(asset.ticker_hash, asset.chain, value)
		});

		let mut out: HashMap<TickerHash, HashMap<ChainId, U256>> = HashMap::new();
		for (ticker, chain, value) in join_all(fetches).await {
			out.entry(ticker).or_default().insert(chain, value);
		}
		out
	}

	async fn fetch_one_custodied(&self, asset: &AssetConfig) -> Result<U256, poller_chain_client::ClientError> {
		let client = self.client_for(asset.chain)?;
		let hub = self
			.hub_contracts
			.get(&asset.chain)
			.copied()
			.ok_or(poller_chain_client::ClientError::Rpc(format!("no hub contract configured for chain {}", asset.chain)))?;

		let selector = ethers::utils::keccak256("custodiedAssets(bytes32)".as_bytes());
		let mut data = selector[..4].to_vec();
		data.extend(asset.ticker_hash);
		let out = client.call_view(&ChainAddress::Hex(hub), ethers::types::Bytes::from(data)).await?;
		let raw = U256::from_big_endian(&out);
		Ok(convert_to_18(raw, asset.decimals))
	}

	fn client_for(&self, chain: ChainId) -> Result<&Arc<dyn ChainClient>, poller_chain_client::ClientError> {
		self.clients.get(&chain).ok_or(poller_chain_client::ClientError::Rpc(format!("no chain client configured for chain {chain}")))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn balance_of_defaults_to_zero_for_unseen_pair() {
		let snapshot = BalanceSnapshot::default();
		assert_eq!(snapshot.balance_of([0u8; 32], 1), U256::zero());
	}
}
