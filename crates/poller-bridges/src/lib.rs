//! Bridge adapter framework (§4.3): one uniform contract behind which a dozen
//! heterogeneous bridge/exchange protocols hide. No adapter method is
//! optional — an adapter with no finalization step simply returns `None` from
//! [`BridgeAdapter::destination_callback`] rather than the contract growing a
//! capability-probe.

pub mod adapters;

use std::collections::HashMap;

use async_trait::async_trait;
use poller_chain_client::ChainClient;
use poller_types::{
	bridge::{BridgeTag, MemoizedTx},
	errors::{BridgeCancelled, QuoteError},
	invoice::ChainId,
	route::RebalanceRoute,
};
use serde::{Deserialize, Serialize};

/// Everything the next step in an adapter's lifecycle needs to know about the
/// origin-side transaction. Persisted verbatim in a [`RebalanceOperation`]
/// leg's metadata column so a restart can rebuild it without replaying state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OriginReceipt {
	pub transaction_hash: ethers::types::H256,
	pub block_number: u64,
	/// Adapter-private bookkeeping: a prove timestamp for an optimistic
	/// rollup, a priority-queue id for a ZK rollup, a deposit order id for a
	/// CEX flow. Opaque to everything except the adapter that wrote it.
	pub metadata: serde_json::Value,
}

impl OriginReceipt {
	pub fn metadata_field(&self, key: &str) -> Option<&serde_json::Value> {
		self.metadata.get(key)
	}
}

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
	#[error(transparent)]
	Quote(#[from] QuoteError),
	#[error(transparent)]
	Cancelled(#[from] BridgeCancelled),
	#[error("chain client error: {0}")]
	Client(#[from] poller_chain_client::ClientError),
	#[error("upstream error: {0}")]
	Upstream(String),
}

/// Uniform contract every concrete bridge/exchange adapter implements (§4.3).
/// Adapters are shared, long-lived objects constructed once per configured
/// bridge kind and must be safe under concurrent calls.
#[async_trait]
pub trait BridgeAdapter: Send + Sync {
	fn kind(&self) -> BridgeTag;

	/// Amount the destination receives, in the destination asset's native
	/// decimals, after fees and slippage. Must be deterministic for a given
	/// `(amount, route, external state)` snapshot.
	async fn quote(&self, amount: ethers::types::U256, route: &RebalanceRoute) -> Result<ethers::types::U256, QuoteError>;

	/// Hard floor below which the adapter refuses to move funds at all.
	/// `None` means the adapter has no intrinsic minimum.
	async fn minimum(&self, route: &RebalanceRoute) -> Option<ethers::types::U256>;

	/// Builds the ordered transaction chain to move `amount` from `sender` to
	/// `recipient` along `route`. The final entry is always tagged `Rebalance`.
	async fn send(
		&self,
		sender: ethers::types::Address,
		recipient: ethers::types::Address,
		amount: ethers::types::U256,
		route: &RebalanceRoute,
	) -> Result<Vec<MemoizedTx>, AdapterError>;

	async fn ready_on_destination(
		&self,
		amount: ethers::types::U256,
		route: &RebalanceRoute,
		origin_receipt: &OriginReceipt,
	) -> Result<bool, AdapterError>;

	/// The exact finalize/claim/wrap transaction that completes the transfer,
	/// or `None` if the adapter needs no finalization step for this route.
	async fn destination_callback(
		&self,
		route: &RebalanceRoute,
		origin_receipt: &OriginReceipt,
	) -> Result<Option<MemoizedTx>, AdapterError>;

	/// Used for recovery after a restart: true once the callback transaction
	/// has already landed, so the rebalance loop does not resubmit it.
	async fn is_callback_complete(
		&self,
		route: &RebalanceRoute,
		origin_receipt: &OriginReceipt,
	) -> Result<bool, AdapterError>;

	/// Extra slippage headroom this adapter's quote already bakes in, in dbp.
	/// The planner subtracts this from the configured max before checking a
	/// quote against the budget. Zero for adapters whose quote is exact.
	fn headroom_dbps(&self) -> u32 {
		0
	}
}

/// Looks up the right chain client for an adapter call by chain id. Adapters
/// hold one of these rather than a single client because a bridge leg
/// frequently needs to read both the origin and destination chain.
pub type ChainClientMap = HashMap<ChainId, std::sync::Arc<dyn ChainClient>>;

/// ABI-encodes a call the way `ethers::contract::abigen!`-generated bindings
/// would, without pulling in a generated contract for every adapter's one or
/// two view/write calls.
pub(crate) fn abi_encode_call(signature: &str, tokens: &[ethers::abi::Token]) -> ethers::types::Bytes {
	let hash = ethers::utils::keccak256(signature.as_bytes());
	let mut data = hash[..4].to_vec();
	data.extend(ethers::abi::encode(tokens));
	ethers::types::Bytes::from(data)
}

pub(crate) fn client_for(
	clients: &ChainClientMap,
	chain: ChainId,
) -> Result<std::sync::Arc<dyn ChainClient>, AdapterError> {
	clients
		.get(&chain)
		.cloned()
		.ok_or_else(|| AdapterError::Upstream(format!("no chain client configured for chain {chain}")))
}

/// Registry resolving a configured [`BridgeTag`] to its shared adapter
/// instance. Built once at startup from operational config; the planner and
/// rebalance loop both dispatch through it rather than holding adapters
/// directly.
#[derive(Clone, Default)]
pub struct BridgeRegistry {
	adapters: HashMap<BridgeTag, std::sync::Arc<dyn BridgeAdapter>>,
}

impl BridgeRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register(&mut self, adapter: std::sync::Arc<dyn BridgeAdapter>) {
		self.adapters.insert(adapter.kind(), adapter);
	}

	pub fn get(&self, tag: BridgeTag) -> Option<std::sync::Arc<dyn BridgeAdapter>> {
		self.adapters.get(&tag).cloned()
	}
}
