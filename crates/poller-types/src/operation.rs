use std::collections::HashMap;

use ethers::types::U256;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
	bridge::BridgeTag,
	invoice::{ChainId, TickerHash},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
	Pending,
	AwaitingCallback,
	Completed,
	Expired,
	Cancelled,
}

impl OperationStatus {
	pub const ALL: [OperationStatus; 5] = [
		OperationStatus::Pending,
		OperationStatus::AwaitingCallback,
		OperationStatus::Completed,
		OperationStatus::Expired,
		OperationStatus::Cancelled,
	];

	pub fn is_terminal(self) -> bool {
		matches!(self, OperationStatus::Completed | OperationStatus::Expired | OperationStatus::Cancelled)
	}

	pub fn as_str(self) -> &'static str {
		match self {
			OperationStatus::Pending => "pending",
			OperationStatus::AwaitingCallback => "awaiting_callback",
			OperationStatus::Completed => "completed",
			OperationStatus::Expired => "expired",
			OperationStatus::Cancelled => "cancelled",
		}
	}
}

impl std::str::FromStr for OperationStatus {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::ALL
			.into_iter()
			.find(|status| status.as_str() == s)
			.ok_or_else(|| format!("unknown operation status: {s}"))
	}
}

/// Record of one leg's on-chain footprint: the hash (or multisig proposal id,
/// carried as a hex-encoded pseudo-hash) and whatever receipt/metadata the
/// adapter needed to resolve readiness or build a callback.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LegRecord {
	pub hash: String,
	pub receipt: Option<serde_json::Value>,
	pub metadata: serde_json::Value,
}

/// A single bridge/exchange transfer, possibly made of several memoized
/// transactions, tracked from origin submission through to completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalanceOperation {
	pub id: Uuid,
	pub earmark_id: Option<Uuid>,
	pub origin_chain: ChainId,
	pub destination_chain: ChainId,
	pub ticker_hash: TickerHash,
	pub amount: U256,
	pub slippage_dbps: u32,
	pub bridge: BridgeTag,
	/// Keyed by chain id; an operation may touch the origin chain (send legs) and
	/// the destination chain (callback legs).
	pub tx_hashes: HashMap<ChainId, LegRecord>,
	pub status: OperationStatus,
	/// Set when the parent earmark is removed while the operation is still
	/// in-flight. The funds are still tracked, but released back to the free pool
	/// once the transfer lands.
	pub is_orphaned: bool,
	pub created_at: chrono::DateTime<chrono::Utc>,
	pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl RebalanceOperation {
	pub fn origin_leg(&self) -> Option<&LegRecord> {
		self.tx_hashes.get(&self.origin_chain)
	}

	pub fn destination_leg(&self) -> Option<&LegRecord> {
		self.tx_hashes.get(&self.destination_chain)
	}
}

/// Output of the route planner for one leg of an invoice's fulfillment plan.
/// `amount` is in the origin asset's native decimals; `expected_output_amount`
/// is always expressed in the canonical 18-decimal representation and is
/// always strictly positive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedRebalanceOperation {
	pub origin_chain: ChainId,
	pub destination_chain: ChainId,
	pub ticker_hash: TickerHash,
	pub asset: ethers::types::Address,
	pub destination_asset: Option<ethers::types::Address>,
	pub amount: U256,
	pub expected_output_amount: U256,
	pub slippage_dbps: u32,
	pub bridge: BridgeTag,
	pub swap_bridge: Option<BridgeTag>,
}
