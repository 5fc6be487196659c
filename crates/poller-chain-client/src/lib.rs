//! Per-chain read/write capability set.
//!
//! `submit_and_monitor` is the only operation that may block for long periods;
//! everything else is a bounded read. Concrete clients are constructed lazily
//! from a fallback-ordered provider list (see [`provider::FallbackProvider`]):
//! a failed provider disqualifies only the in-flight request, never the chain.

pub mod evm;
pub mod provider;
pub mod retry;
pub mod svm;

use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256, U256};
use poller_types::SubmitError;
use serde::{Deserialize, Serialize};

/// An address in whatever native encoding the chain uses. [`ChainClient`]
/// implementations accept and return this rather than a chain-specific type so
/// that the oracle and planner can stay chain-agnostic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChainAddress {
	Hex(Address),
	Base58(String),
}

impl std::fmt::Display for ChainAddress {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			ChainAddress::Hex(a) => write!(f, "{a:?}"),
			ChainAddress::Base58(s) => write!(f, "{s}"),
		}
	}
}

/// A transaction to submit, already ABI-encoded by the caller (typically a
/// bridge adapter). `value` is in the chain's native units.
#[derive(Debug, Clone)]
pub struct UnsignedTx {
	pub to: ChainAddress,
	pub value: U256,
	pub data: Bytes,
	pub func_sig: String,
}

/// Confirmation receipt for a submitted transaction. Fields outside this common
/// shape (e.g. a ZK-rollup's `l1BatchNumber`) are reached through
/// [`ChainClient::raw_receipt`], which only bridge adapters that declare a need
/// for it should call; the rest of the core never interprets those fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
	pub transaction_hash: H256,
	pub block_number: u64,
	pub status: bool,
	pub confirmations: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
	#[error(transparent)]
	Submit(#[from] SubmitError),
	#[error("rpc error: {0}")]
	Rpc(String),
	#[error("no healthy provider left in the fallback list")]
	ProvidersExhausted,
}

/// Per-chain capability set. One instance is cached per chain and shared across
/// concurrent callers; instances must be safe under concurrent use.
#[async_trait]
pub trait ChainClient: Send + Sync {
	fn chain_id(&self) -> u64;

	async fn get_native_balance(&self, address: &ChainAddress) -> Result<U256, ClientError>;

	async fn get_token_balance(
		&self,
		asset: &ChainAddress,
		address: &ChainAddress,
	) -> Result<U256, ClientError>;

	async fn get_allowance(
		&self,
		asset: &ChainAddress,
		owner: &ChainAddress,
		spender: &ChainAddress,
	) -> Result<U256, ClientError>;

	/// Blocks until at least `confirmations` confirmations are observed or the
	/// configured timeout elapses (default 45s, per the operational config).
	async fn submit_and_monitor(&self, tx: UnsignedTx) -> Result<Receipt, ClientError>;

	async fn get_transaction_receipt(&self, hash: H256) -> Result<Option<Receipt>, ClientError>;

	async fn call_view(&self, target: &ChainAddress, encoded_input: Bytes) -> Result<Bytes, ClientError>;

	/// Escape hatch for chain-specific receipt fields a common [`Receipt`]
	/// cannot express. Only adapters that declare they need it should call this;
	/// the core otherwise never interprets the returned JSON.
	async fn raw_receipt(&self, hash: H256) -> Result<Option<serde_json::Value>, ClientError>;
}
