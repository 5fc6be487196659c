use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::{bridge::BridgeTag, invoice::ChainId};

/// A single configured corridor between two chains for one asset, optionally
/// swapping into a different destination asset along the way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebalanceRoute {
	pub origin: ChainId,
	pub destination: ChainId,
	pub asset: Address,
	pub destination_asset: Option<Address>,
}

impl RebalanceRoute {
	/// A direct bridge route carries the same asset at both ends.
	pub fn is_direct(&self) -> bool {
		self.origin != self.destination &&
			self.destination_asset.map(|a| a == self.asset).unwrap_or(true)
	}

	pub fn is_same_chain_swap(&self) -> bool {
		self.origin == self.destination &&
			self.destination_asset.map(|a| a != self.asset).unwrap_or(false)
	}

	pub fn is_swap_and_bridge(&self) -> bool {
		self.origin != self.destination &&
			self.destination_asset.map(|a| a != self.asset).unwrap_or(false)
	}
}

/// Declarative top-up / swap configuration for one [`RebalanceRoute`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRebalancingConfig {
	pub route: RebalanceRoute,
	/// Ordered bridge preferences, tried in order until one quotes successfully.
	pub preferences: Vec<BridgeTag>,
	/// Maximum slippage budget, in dbp, indexed the same as `preferences`.
	pub slippages_dbps: Vec<u32>,
	/// Ordered swap preferences for swap+bridge / same-chain-swap routes.
	pub swap_preferences: Vec<BridgeTag>,
	/// High-water mark: above this, the rebalance loop tops the route up.
	pub maximum: U256,
	/// Floor left behind on the origin chain after a top-up.
	pub reserve: U256,
}

impl RouteRebalancingConfig {
	pub fn slippage_budget_for(&self, preference_index: usize) -> Option<u32> {
		self.slippages_dbps.get(preference_index).copied()
	}
}
