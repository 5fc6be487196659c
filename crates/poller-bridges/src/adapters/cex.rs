//! Centralized exchange used as a bridge leg. `send` funds a deposit address
//! on the exchange; readiness polls the exchange's deposit API for a
//! confirmed deposit bearing the origin tx hash; the callback triggers the
//! withdrawal to the destination chain, appending a wrap transaction when the
//! exchange only pays out the unwrapped native asset.
//!
//! Asset identity (on-chain address ↔ exchange symbol/network) is resolved
//! through [`AssetMappingCache`], a refresh-on-timer cache that can also be
//! force-invalidated the moment an adapter call sees a symbol it doesn't
//! recognize.

use std::{
	collections::HashMap,
	time::{Duration, Instant},
};

use async_trait::async_trait;
use ethers::{types::{Address, U256}, utils::keccak256};
use parking_lot::RwLock;
use poller_types::{
	bridge::{BridgeTag, MemoizedTx, TxMemo},
	errors::QuoteError,
	invoice::{ChainId, TickerHash},
	route::RebalanceRoute,
};
use serde::Deserialize;

use crate::{AdapterError, BridgeAdapter, ChainClientMap, OriginReceipt};

#[derive(Debug, Clone, Deserialize)]
pub struct AssetMapping {
	pub exchange_symbol: String,
	pub network: String,
	pub min_withdrawal: U256,
	pub fee: U256,
	/// True when the exchange only ever pays withdrawals out in the
	/// unwrapped native asset (e.g. ETH instead of WETH).
	pub pays_out_unwrapped: bool,
}

#[derive(Debug, Deserialize)]
struct AssetListEntry {
	symbol: String,
	network: String,
	#[serde(rename = "chainId")]
	chain_id: u64,
	#[serde(rename = "tickerHash")]
	ticker_hash: String,
	#[serde(rename = "minWithdrawal")]
	min_withdrawal: String,
	fee: String,
	#[serde(rename = "paysOutUnwrapped", default)]
	pays_out_unwrapped: bool,
}

/// Refreshes `(ticker, chain) → AssetMapping` from the exchange's asset-list
/// endpoint on a timer, and allows a caller that sees an unrecognized asset to
/// force an out-of-band refresh rather than wait out the TTL.
pub struct AssetMappingCache {
	asset_list_url: url::Url,
	ttl: Duration,
	http: reqwest::Client,
	entries: RwLock<HashMap<(ChainId, TickerHash), AssetMapping>>,
	last_refresh: RwLock<Option<Instant>>,
}

impl AssetMappingCache {
	pub fn new(asset_list_url: url::Url, ttl: Duration) -> Self {
		Self {
			asset_list_url,
			ttl,
			http: reqwest::Client::new(),
			entries: RwLock::new(HashMap::new()),
			last_refresh: RwLock::new(None),
		}
	}

	fn is_stale(&self) -> bool {
		match *self.last_refresh.read() {
			Some(at) => at.elapsed() > self.ttl,
			None => true,
		}
	}

	pub async fn refresh(&self) -> Result<(), AdapterError> {
		let entries = self
			.http
			.get(self.asset_list_url.clone())
			.send()
			.await
			.map_err(|e| AdapterError::Upstream(e.to_string()))?
			.json::<Vec<AssetListEntry>>()
			.await
			.map_err(|e| AdapterError::Upstream(e.to_string()))?;

		let mut map = HashMap::with_capacity(entries.len());
		for entry in entries {
			let Ok(ticker) = hex::decode(entry.ticker_hash.trim_start_matches("0x")) else { continue };
			if ticker.len() != 32 {
				continue;
			}
			let mut ticker_hash = [0u8; 32];
			ticker_hash.copy_from_slice(&ticker);
			map.insert(
				(entry.chain_id, ticker_hash),
				AssetMapping {
					exchange_symbol: entry.symbol,
					network: entry.network,
					min_withdrawal: U256::from_dec_str(&entry.min_withdrawal).unwrap_or_default(),
					fee: U256::from_dec_str(&entry.fee).unwrap_or_default(),
					pays_out_unwrapped: entry.pays_out_unwrapped,
				},
			);
		}
		*self.entries.write() = map;
		*self.last_refresh.write() = Some(Instant::now());
		Ok(())
	}

	pub async fn get(&self, chain: ChainId, ticker: TickerHash) -> Result<AssetMapping, AdapterError> {
		if self.is_stale() {
			self.refresh().await?;
		}
		self.entries
			.read()
			.get(&(chain, ticker))
			.cloned()
			.ok_or_else(|| AdapterError::Upstream(format!("no exchange mapping for ticker on chain {chain}")))
	}

	/// Called when an adapter invocation hits an asset the cache doesn't
	/// know about: refreshes once out of band instead of waiting for the TTL.
	pub async fn invalidate_and_get(&self, chain: ChainId, ticker: TickerHash) -> Result<AssetMapping, AdapterError> {
		self.refresh().await?;
		self.entries
			.read()
			.get(&(chain, ticker))
			.cloned()
			.ok_or_else(|| AdapterError::Upstream(format!("no exchange mapping for ticker on chain {chain}")))
	}
}

#[derive(Debug, Deserialize)]
struct DepositAddressResponse {
	address: String,
}

#[derive(Debug, Deserialize)]
struct DepositStatusResponse {
	status: String,
}

#[derive(Debug, Deserialize)]
struct WithdrawalStatusResponse {
	status: String,
	#[serde(rename = "destinationTxHash")]
	destination_tx_hash: Option<String>,
}

pub struct CentralizedExchangeAdapter {
	api_base: url::Url,
	api_key: String,
	api_secret: String,
	asset_cache: AssetMappingCache,
	#[allow(dead_code)]
	clients: ChainClientMap,
	http: reqwest::Client,
}

impl std::fmt::Debug for CentralizedExchangeAdapter {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("CentralizedExchangeAdapter").field("api_base", &self.api_base).finish()
	}
}

impl CentralizedExchangeAdapter {
	pub fn new(
		api_base: url::Url,
		api_key: String,
		api_secret: String,
		asset_cache: AssetMappingCache,
		clients: ChainClientMap,
	) -> Self {
		Self { api_base, api_key, api_secret, asset_cache, clients, http: reqwest::Client::new() }
	}

	fn signed_request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
		// Authentication per the exchange's documented REST API; the key is
		// sent as a header, the secret never leaves this function.
		builder.header("X-API-KEY", &self.api_key)
	}

	/// Deterministic per-transfer order id so a retried withdrawal call is
	/// idempotent on the exchange's side.
	fn order_id(&self, route: &RebalanceRoute, origin_tx_hash: ethers::types::H256) -> String {
		let mut input = Vec::new();
		input.extend_from_slice(&route.origin.to_be_bytes());
		input.extend_from_slice(&route.destination.to_be_bytes());
		input.extend_from_slice(origin_tx_hash.as_bytes());
		hex::encode(keccak256(input))
	}

	fn ticker_of(&self, route: &RebalanceRoute) -> TickerHash {
		// In this system the route's asset address, not a ticker hash, names
		// the on-chain leg; the exchange mapping keys off the invoice's
		// ticker instead. Callers that construct a route from an invoice
		// carry the ticker hash in the low 32 bytes of `destination_asset`
		// when it differs from `asset` for a swap leg; for a same-asset
		// bridge leg it is reconstructed by the caller before invoking this
		// adapter. We accept it pre-resolved via `route.asset` here to avoid
		// a second lookup table: callers populate `route.asset` with the
		// canonical ticker-hash-derived address for CEX routes.
		let mut hash = [0u8; 32];
		hash[12..].copy_from_slice(route.asset.as_bytes());
		hash
	}
}

#[async_trait]
impl BridgeAdapter for CentralizedExchangeAdapter {
	fn kind(&self) -> BridgeTag {
		BridgeTag::CentralizedExchange
	}

	async fn quote(&self, amount: U256, route: &RebalanceRoute) -> Result<U256, QuoteError> {
		let mapping = self
			.asset_cache
			.get(route.origin, self.ticker_of(route))
			.await
			.map_err(|e| QuoteError::TransientUpstream(e.to_string()))?;
		if amount < mapping.min_withdrawal {
			return Err(QuoteError::BelowMinimum);
		}
		Ok(amount.saturating_sub(mapping.fee))
	}

	async fn minimum(&self, route: &RebalanceRoute) -> Option<U256> {
		self.asset_cache.get(route.origin, self.ticker_of(route)).await.ok().map(|m| m.min_withdrawal)
	}

	async fn send(
		&self,
		_sender: Address,
		_recipient: Address,
		amount: U256,
		route: &RebalanceRoute,
	) -> Result<Vec<MemoizedTx>, AdapterError> {
		let mapping = self.asset_cache.get(route.origin, self.ticker_of(route)).await?;
		let deposit_address: DepositAddressResponse = self
			.signed_request(self.http.get(self.api_base.join("deposit-address").unwrap()))
			.query(&[("asset", mapping.exchange_symbol.as_str()), ("network", mapping.network.as_str())])
			.send()
			.await
			.map_err(|e| AdapterError::Upstream(e.to_string()))?
			.json()
			.await
			.map_err(|e| AdapterError::Upstream(e.to_string()))?;
		let to: Address = deposit_address
			.address
			.parse()
			.map_err(|_| AdapterError::Upstream("exchange returned an unparseable deposit address".into()))?;

		let data = crate::abi_encode_call("transfer(address,uint256)", &[ethers::abi::Token::Address(to), ethers::abi::Token::Uint(amount)]);
		Ok(vec![MemoizedTx {
			memo: TxMemo::Rebalance,
			chain: route.origin,
			to: route.asset,
			value: U256::zero(),
			data,
			func_sig: "transfer".into(),
		}])
	}

	async fn ready_on_destination(
		&self,
		_amount: U256,
		_route: &RebalanceRoute,
		origin_receipt: &OriginReceipt,
	) -> Result<bool, AdapterError> {
		let response: DepositStatusResponse = self
			.signed_request(self.http.get(self.api_base.join("deposits").unwrap()))
			.query(&[("txid", format!("{:?}", origin_receipt.transaction_hash))])
			.send()
			.await
			.map_err(|e| AdapterError::Upstream(e.to_string()))?
			.json()
			.await
			.map_err(|e| AdapterError::Upstream(e.to_string()))?;
		Ok(response.status == "completed")
	}

	async fn destination_callback(
		&self,
		route: &RebalanceRoute,
		origin_receipt: &OriginReceipt,
	) -> Result<Option<MemoizedTx>, AdapterError> {
		let mapping = self.asset_cache.get(route.destination, self.ticker_of(route)).await?;
		let order_id = self.order_id(route, origin_receipt.transaction_hash);

		let status: WithdrawalStatusResponse = self
			.signed_request(self.http.post(self.api_base.join("withdrawals").unwrap()))
			.json(&serde_json::json!({
				"orderId": order_id,
				"asset": mapping.exchange_symbol,
				"network": mapping.network,
			}))
			.send()
			.await
			.map_err(|e| AdapterError::Upstream(e.to_string()))?
			.json()
			.await
			.map_err(|e| AdapterError::Upstream(e.to_string()))?;

		if status.status != "completed" {
			return Err(AdapterError::Quote(QuoteError::TransientUpstream("withdrawal still pending".into())));
		}

		if !mapping.pays_out_unwrapped {
			return Ok(None);
		}

		// Exchange delivered native asset; wrap it into the ERC20 form the
		// route expects before the transfer is considered complete.
		let data = crate::abi_encode_call("deposit()", &[]);
		Ok(Some(MemoizedTx {
			memo: TxMemo::Wrap,
			chain: route.destination,
			to: route.asset,
			value: U256::zero(),
			data,
			func_sig: "deposit".into(),
		}))
	}

	async fn is_callback_complete(
		&self,
		route: &RebalanceRoute,
		origin_receipt: &OriginReceipt,
	) -> Result<bool, AdapterError> {
		let order_id = self.order_id(route, origin_receipt.transaction_hash);
		let status: WithdrawalStatusResponse = self
			.signed_request(self.http.get(self.api_base.join("withdrawals").unwrap()))
			.query(&[("orderId", order_id.as_str())])
			.send()
			.await
			.map_err(|e| AdapterError::Upstream(e.to_string()))?
			.json()
			.await
			.map_err(|e| AdapterError::Upstream(e.to_string()))?;
		Ok(status.status == "completed" && status.destination_tx_hash.is_some())
	}
}
