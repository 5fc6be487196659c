//! Liquidity-pool bridge with a fill event on the destination: a relayer
//! fronts the funds on the destination chain as soon as it sees the origin
//! deposit, then reclaims them from the pool. Readiness is detecting that
//! fill event; there is no finalization callback.

use async_trait::async_trait;
use ethers::types::{Address, U256};
use poller_types::{
	bridge::{BridgeTag, MemoizedTx, TxMemo},
	errors::QuoteError,
	route::RebalanceRoute,
};
use serde::Deserialize;

use crate::{client_for, AdapterError, BridgeAdapter, ChainClientMap, OriginReceipt};

/// Per-adapter headroom baked into every quote acceptance check (§4.3).
const HEADROOM_DBPS: u32 = 10;

#[derive(Debug, Deserialize)]
struct QuoteResponse {
	#[serde(rename = "receivedAmount")]
	received_amount: String,
	#[serde(rename = "minDeposit")]
	min_deposit: Option<String>,
}

pub struct LiquidityPoolAdapter {
	quote_api: url::Url,
	pools: std::collections::HashMap<u64, Address>,
	clients: ChainClientMap,
	http: reqwest::Client,
}

impl LiquidityPoolAdapter {
	pub fn new(quote_api: url::Url, pools: std::collections::HashMap<u64, Address>, clients: ChainClientMap) -> Self {
		Self { quote_api, pools, clients, http: reqwest::Client::new() }
	}

	async fn fetch_quote(&self, amount: U256, route: &RebalanceRoute) -> Result<QuoteResponse, AdapterError> {
		let url = self.quote_api.clone();
		let response = self
			.http
			.get(url)
			.query(&[
				("originChainId", route.origin.to_string()),
				("destinationChainId", route.destination.to_string()),
				("inputToken", format!("{:?}", route.asset)),
				("amount", amount.to_string()),
			])
			.send()
			.await
			.map_err(|e| AdapterError::Upstream(e.to_string()))?
			.json::<QuoteResponse>()
			.await
			.map_err(|e| AdapterError::Upstream(e.to_string()))?;
		Ok(response)
	}

	fn pool_for(&self, chain: u64) -> Result<Address, AdapterError> {
		self.pools.get(&chain).copied().ok_or(AdapterError::Upstream(format!("no pool contract configured for chain {chain}")))
	}
}

#[async_trait]
impl BridgeAdapter for LiquidityPoolAdapter {
	fn kind(&self) -> BridgeTag {
		BridgeTag::LiquidityPool
	}

	async fn quote(&self, amount: U256, route: &RebalanceRoute) -> Result<U256, QuoteError> {
		let response = self
			.fetch_quote(amount, route)
			.await
			.map_err(|e| QuoteError::TransientUpstream(e.to_string()))?;
		let received = U256::from_dec_str(&response.received_amount)
			.map_err(|_| QuoteError::TransientUpstream("malformed quote amount".into()))?;
		if let Some(min) = response.min_deposit {
			let min = U256::from_dec_str(&min).unwrap_or_default();
			if amount < min {
				return Err(QuoteError::BelowMinimum);
			}
		}
		Ok(received)
	}

	async fn minimum(&self, route: &RebalanceRoute) -> Option<U256> {
		let response = self.fetch_quote(U256::zero(), route).await.ok()?;
		response.min_deposit.and_then(|m| U256::from_dec_str(&m).ok())
	}

	async fn send(
		&self,
		_sender: Address,
		recipient: Address,
		amount: U256,
		route: &RebalanceRoute,
	) -> Result<Vec<MemoizedTx>, AdapterError> {
		let pool = self.pool_for(route.origin)?;
		let data = crate::abi_encode_call(
			"deposit(address,address,uint256,uint256,address)",
			&[
				ethers::abi::Token::Address(route.asset),
				ethers::abi::Token::Address(recipient),
				ethers::abi::Token::Uint(amount),
				ethers::abi::Token::Uint(route.destination.into()),
				ethers::abi::Token::Address(recipient),
			],
		);
		Ok(vec![MemoizedTx {
			memo: TxMemo::Rebalance,
			chain: route.origin,
			to: pool,
			value: U256::zero(),
			data,
			func_sig: "deposit".into(),
		}])
	}

	async fn ready_on_destination(
		&self,
		_amount: U256,
		route: &RebalanceRoute,
		origin_receipt: &OriginReceipt,
	) -> Result<bool, AdapterError> {
		let pool = self.pool_for(route.destination)?;
		let client = client_for(&self.clients, route.destination)?;
		let data = crate::abi_encode_call(
			"filled(bytes32)",
			&[ethers::abi::Token::FixedBytes(origin_receipt.transaction_hash.as_bytes().to_vec())],
		);
		let out = client.call_view(&poller_chain_client::ChainAddress::Hex(pool), data).await?;
		Ok(out.last().copied().unwrap_or(0) != 0)
	}

	async fn destination_callback(
		&self,
		_route: &RebalanceRoute,
		_origin_receipt: &OriginReceipt,
	) -> Result<Option<MemoizedTx>, AdapterError> {
		Ok(None)
	}

	async fn is_callback_complete(
		&self,
		route: &RebalanceRoute,
		origin_receipt: &OriginReceipt,
	) -> Result<bool, AdapterError> {
		self.ready_on_destination(U256::zero(), route, origin_receipt).await
	}

	fn headroom_dbps(&self) -> u32 {
		HEADROOM_DBPS
	}
}
