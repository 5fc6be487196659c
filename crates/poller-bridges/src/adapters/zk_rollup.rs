//! ZK-rollup native bridge. Deposits (L1→L2) go through a priority queue: the
//! caller pays a quoted base L2 execution cost up front and the bridge
//! contract refunds the unused buffer to the recipient once the L2 side
//! executes. Withdrawals (L2→L1) need a Merkle proof of the L2→L1 message,
//! fetched from the rollup's own RPC, before `finalizeWithdrawal` will accept it.

use async_trait::async_trait;
use ethers::types::{Address, H256, U256};
use poller_types::{
	bridge::{BridgeTag, MemoizedTx, TxMemo},
	errors::QuoteError,
	route::RebalanceRoute,
};
use serde::Deserialize;
use serde_json::json;

use crate::{AdapterError, BridgeAdapter, ChainClientMap, OriginReceipt};

#[derive(Debug, Deserialize)]
struct L2ToL1Proof {
	proof: Vec<H256>,
	id: u64,
}

pub struct ZkRollupAdapter {
	l1_chain: u64,
	l2_chain: u64,
	l1_bridge: Address,
	l2_bridge: Address,
	base_deposit_cost: U256,
	refund_buffer_bps: u32,
	/// Topic identifying which L2→L1 log entries belong to this bridge's
	/// withdrawal messages, used to pick the right log out of a receipt that
	/// may contain several.
	sender_key: H256,
	rollup_rpc: url::Url,
	http: reqwest::Client,
	#[allow(dead_code)]
	clients: ChainClientMap,
}

impl ZkRollupAdapter {
	pub fn new(
		l1_chain: u64,
		l2_chain: u64,
		l1_bridge: Address,
		l2_bridge: Address,
		base_deposit_cost: U256,
		refund_buffer_bps: u32,
		sender_key: H256,
		rollup_rpc: url::Url,
		clients: ChainClientMap,
	) -> Self {
		Self {
			l1_chain,
			l2_chain,
			l1_bridge,
			l2_bridge,
			base_deposit_cost,
			refund_buffer_bps,
			sender_key,
			rollup_rpc,
			http: reqwest::Client::new(),
			clients,
		}
	}

	fn is_deposit(&self, route: &RebalanceRoute) -> bool {
		route.origin == self.l1_chain && route.destination == self.l2_chain
	}

	fn is_withdrawal(&self, route: &RebalanceRoute) -> bool {
		route.origin == self.l2_chain && route.destination == self.l1_chain
	}

	fn buffered_deposit_value(&self) -> U256 {
		self.base_deposit_cost + self.base_deposit_cost * self.refund_buffer_bps / 100_000u64
	}

	async fn fetch_proof(&self, tx_hash: H256, log_index: u64) -> Result<L2ToL1Proof, AdapterError> {
		let body = json!({
			"jsonrpc": "2.0",
			"id": 1,
			"method": "zks_getL2ToL1LogProof",
			"params": [tx_hash, log_index],
		});
		let response = self
			.http
			.post(self.rollup_rpc.clone())
			.json(&body)
			.send()
			.await
			.map_err(|e| AdapterError::Upstream(e.to_string()))?
			.json::<serde_json::Value>()
			.await
			.map_err(|e| AdapterError::Upstream(e.to_string()))?;
		serde_json::from_value(response["result"].clone())
			.map_err(|e| AdapterError::Upstream(format!("malformed proof response: {e}")))
	}
}

#[async_trait]
impl BridgeAdapter for ZkRollupAdapter {
	fn kind(&self) -> BridgeTag {
		BridgeTag::ZkRollupNative
	}

	async fn quote(&self, amount: U256, route: &RebalanceRoute) -> Result<U256, QuoteError> {
		if !self.is_deposit(route) && !self.is_withdrawal(route) {
			return Err(QuoteError::Unsupported);
		}
		Ok(amount)
	}

	async fn minimum(&self, _route: &RebalanceRoute) -> Option<U256> {
		None
	}

	async fn send(
		&self,
		_sender: Address,
		recipient: Address,
		amount: U256,
		route: &RebalanceRoute,
	) -> Result<Vec<MemoizedTx>, AdapterError> {
		if self.is_deposit(route) {
			let data = crate::abi_encode_call(
				"requestL2Transaction(address,uint256,bytes,uint256,uint256,bytes[],address)",
				&[
					ethers::abi::Token::Address(recipient),
					ethers::abi::Token::Uint(amount),
					ethers::abi::Token::Bytes(vec![]),
					ethers::abi::Token::Uint(2_000_000u64.into()),
					ethers::abi::Token::Uint(800u64.into()),
					ethers::abi::Token::Array(vec![]),
					ethers::abi::Token::Address(recipient),
				],
			);
			return Ok(vec![MemoizedTx {
				memo: TxMemo::Rebalance,
				chain: self.l1_chain,
				to: self.l1_bridge,
				value: self.buffered_deposit_value(),
				data,
				func_sig: "requestL2Transaction".into(),
			}]);
		}
		if self.is_withdrawal(route) {
			let data = crate::abi_encode_call(
				"withdraw(address,address,uint256)",
				&[
					ethers::abi::Token::Address(route.asset),
					ethers::abi::Token::Address(recipient),
					ethers::abi::Token::Uint(amount),
				],
			);
			return Ok(vec![MemoizedTx {
				memo: TxMemo::Rebalance,
				chain: self.l2_chain,
				to: self.l2_bridge,
				value: U256::zero(),
				data,
				func_sig: "withdraw".into(),
			}]);
		}
		Err(AdapterError::Quote(QuoteError::Unsupported))
	}

	async fn ready_on_destination(
		&self,
		_amount: U256,
		route: &RebalanceRoute,
		origin_receipt: &OriginReceipt,
	) -> Result<bool, AdapterError> {
		if self.is_deposit(route) {
			return Ok(true);
		}
		if self.is_withdrawal(route) {
			let log_index =
				origin_receipt.metadata_field("l2ToL1LogIndex").and_then(|v| v.as_u64()).unwrap_or(0);
			return Ok(self.fetch_proof(origin_receipt.transaction_hash, log_index).await.is_ok());
		}
		Ok(false)
	}

	async fn destination_callback(
		&self,
		route: &RebalanceRoute,
		origin_receipt: &OriginReceipt,
	) -> Result<Option<MemoizedTx>, AdapterError> {
		if !self.is_withdrawal(route) {
			return Ok(None);
		}
		let log_index =
			origin_receipt.metadata_field("l2ToL1LogIndex").and_then(|v| v.as_u64()).unwrap_or(0);
		let proof = self.fetch_proof(origin_receipt.transaction_hash, log_index).await?;
		let data = crate::abi_encode_call(
			"finalizeWithdrawal(uint256,uint256,uint16,bytes,bytes32[])",
			&[
				ethers::abi::Token::Uint(U256::from(origin_receipt.block_number)),
				ethers::abi::Token::Uint(U256::from(proof.id)),
				ethers::abi::Token::Uint(log_index.into()),
				ethers::abi::Token::Bytes(self.sender_key.as_bytes().to_vec()),
				ethers::abi::Token::Array(
					proof.proof.iter().map(|h| ethers::abi::Token::FixedBytes(h.as_bytes().to_vec())).collect(),
				),
			],
		);
		Ok(Some(MemoizedTx {
			memo: TxMemo::Callback,
			chain: self.l1_chain,
			to: self.l1_bridge,
			value: U256::zero(),
			data,
			func_sig: "finalizeWithdrawal".into(),
		}))
	}

	async fn is_callback_complete(
		&self,
		route: &RebalanceRoute,
		origin_receipt: &OriginReceipt,
	) -> Result<bool, AdapterError> {
		if self.is_deposit(route) {
			return Ok(true);
		}
		Ok(origin_receipt.metadata_field("finalized").and_then(|v| v.as_bool()).unwrap_or(false))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn buffered_deposit_value_adds_refund_headroom() {
		let adapter = ZkRollupAdapter::new(
			1,
			324,
			Address::zero(),
			Address::zero(),
			U256::from(1_000_000u64),
			1_000,
			H256::zero(),
			url::Url::parse("http://localhost:3050").unwrap(),
			ChainClientMap::new(),
		);
		assert_eq!(adapter.buffered_deposit_value(), U256::from(1_010_000u64));
	}
}
