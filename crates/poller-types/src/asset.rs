use ethers::types::Address;
use serde::{Deserialize, Serialize};

use crate::invoice::{ChainId, TickerHash};

/// On-chain identity of a `(ticker, chain)` pair. A chain using a non-hex address
/// format (e.g. base58) still normalizes into this `address` field via the
/// chain client's own encoding; only the oracle's address *lookup* path differs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetConfig {
	pub ticker_hash: TickerHash,
	pub chain: ChainId,
	pub address: AssetAddress,
	pub symbol: String,
	pub decimals: u8,
	pub is_native: bool,
	/// Alarm floor: balances at or below this are flagged, independent of any
	/// rebalancing route.
	pub balance_threshold: ethers::types::U256,
}

/// Address encodings vary by chain family; the oracle and chain client agree on
/// which variant applies to a given `chain`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssetAddress {
	Hex(Address),
	Base58(String),
}

impl AssetAddress {
	pub fn as_hex(&self) -> Option<Address> {
		match self {
			AssetAddress::Hex(a) => Some(*a),
			AssetAddress::Base58(_) => None,
		}
	}
}
