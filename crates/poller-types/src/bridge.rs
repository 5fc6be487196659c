use ethers::types::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};

use crate::invoice::ChainId;

/// Constant identity tag for a bridge adapter. Kept as a tagged variant rather
/// than a trait-object-returned string so the planner, store and audit log can
/// all match on it exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeTag {
	/// Optimistic-rollup native bridge (auto-relayed deposits, prove+finalize withdrawals).
	OptimisticRollupNative,
	/// ZK-rollup native bridge (priority-queue deposits, Merkle-proof withdrawals).
	ZkRollupNative,
	/// Liquidity-pool bridge with a fill event on the destination.
	LiquidityPool,
	/// Centralized exchange used as a bridge leg.
	CentralizedExchange,
	/// Liquid-staking + native-bridge composite (e.g. unwrap, stake, deposit to L2).
	LiquidStakingComposite,
}

impl BridgeTag {
	pub fn as_str(&self) -> &'static str {
		match self {
			BridgeTag::OptimisticRollupNative => "optimistic_rollup_native",
			BridgeTag::ZkRollupNative => "zk_rollup_native",
			BridgeTag::LiquidityPool => "liquidity_pool",
			BridgeTag::CentralizedExchange => "centralized_exchange",
			BridgeTag::LiquidStakingComposite => "liquid_staking_composite",
		}
	}
}

impl std::str::FromStr for BridgeTag {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"optimistic_rollup_native" => Ok(BridgeTag::OptimisticRollupNative),
			"zk_rollup_native" => Ok(BridgeTag::ZkRollupNative),
			"liquidity_pool" => Ok(BridgeTag::LiquidityPool),
			"centralized_exchange" => Ok(BridgeTag::CentralizedExchange),
			"liquid_staking_composite" => Ok(BridgeTag::LiquidStakingComposite),
			other => Err(format!("unknown bridge tag: {other}")),
		}
	}
}

/// Classifies what a [`MemoizedTx`] accomplishes, used for metric/audit
/// classification by downstream submission code. Authoritative: submission
/// logic must not infer purpose from `to`/`data`, only from `memo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxMemo {
	Approval,
	Unwrap,
	Wrap,
	Stake,
	Rebalance,
	Callback,
}

/// One transaction in the ordered chain returned by [`BridgeAdapter::send`]. The
/// list is an immutable value: submission must preserve order, and the final
/// entry in a `send()` result is always tagged [`TxMemo::Rebalance`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoizedTx {
	pub memo: TxMemo,
	pub chain: ChainId,
	pub to: Address,
	pub value: U256,
	pub data: Bytes,
	pub func_sig: String,
}
