use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};

pub type ChainId = u64;
pub type TickerHash = [u8; 32];

/// An outstanding cross-chain invoice, as read from the external feed.
///
/// Read-only from the core's perspective: nothing here mutates an `Invoice`,
/// the core only decides whether and how to purchase it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
	pub id: String,
	pub ticker_hash: TickerHash,
	pub owner: Address,
	pub origin_chain: ChainId,
	pub allowed_destination_chains: Vec<ChainId>,
	/// 18-decimal canonical amount.
	pub amount_18: U256,
	pub discount_bps: u32,
	pub queued_at: chrono::DateTime<chrono::Utc>,
	pub hub_status: HubStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HubStatus {
	Queued,
	Dispatched,
	Settled,
	DispatchedUnsupported,
}

impl HubStatus {
	/// `true` once a purchase intent referencing this status can safely be evicted
	/// from the in-flight cache.
	pub fn is_terminal(self) -> bool {
		matches!(self, HubStatus::Settled | HubStatus::DispatchedUnsupported)
	}
}

impl Invoice {
	pub fn age(&self, now: chrono::DateTime<chrono::Utc>) -> chrono::Duration {
		now - self.queued_at
	}
}
