//! Liquid-staking + native-bridge composite (e.g. ETH → mETH → L2). `send`
//! unwraps WETH to ETH, stakes it for the liquid-staked receipt token, and
//! deposits that token through the destination's native bridge. Only the
//! deposit direction is modeled: nothing in this system unwinds a liquid
//! stake to bridge back to L1.

use async_trait::async_trait;
use ethers::types::{Address, U256};
use poller_types::{
	bridge::{BridgeTag, MemoizedTx, TxMemo},
	errors::QuoteError,
	route::RebalanceRoute,
};

use crate::{client_for, AdapterError, BridgeAdapter, ChainClientMap, OriginReceipt};

pub struct LiquidStakingCompositeAdapter {
	l1_chain: u64,
	l2_chain: u64,
	weth: Address,
	staking_pool: Address,
	liquid_staked_token: Address,
	l2_bridge: Address,
	clients: ChainClientMap,
}

impl LiquidStakingCompositeAdapter {
	pub fn new(
		l1_chain: u64,
		l2_chain: u64,
		weth: Address,
		staking_pool: Address,
		liquid_staked_token: Address,
		l2_bridge: Address,
		clients: ChainClientMap,
	) -> Self {
		Self { l1_chain, l2_chain, weth, staking_pool, liquid_staked_token, l2_bridge, clients }
	}

	async fn exchange_rate(&self) -> Result<U256, AdapterError> {
		let client = client_for(&self.clients, self.l1_chain)?;
		let data = crate::abi_encode_call("exchangeRate()", &[]);
		let out = client.call_view(&poller_chain_client::ChainAddress::Hex(self.staking_pool), data).await?;
		Ok(U256::from_big_endian(&out))
	}
}

#[async_trait]
impl BridgeAdapter for LiquidStakingCompositeAdapter {
	fn kind(&self) -> BridgeTag {
		BridgeTag::LiquidStakingComposite
	}

	async fn quote(&self, amount: U256, route: &RebalanceRoute) -> Result<U256, QuoteError> {
		if route.origin != self.l1_chain || route.destination != self.l2_chain {
			return Err(QuoteError::Unsupported);
		}
		let rate = self.exchange_rate().await.map_err(|e| QuoteError::TransientUpstream(e.to_string()))?;
		if rate.is_zero() {
			return Err(QuoteError::TransientUpstream("staking pool returned a zero exchange rate".into()));
		}
		// rate is staked-token-per-ETH scaled by 1e18.
		Ok(amount * rate / U256::from(10u64).pow(18.into()))
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
		if route.origin != self.l1_chain || route.destination != self.l2_chain {
			return Err(AdapterError::Quote(QuoteError::Unsupported));
		}

		let staked_amount = self.quote(amount, route).await?;

		let unwrap = MemoizedTx {
			memo: TxMemo::Unwrap,
			chain: self.l1_chain,
			to: self.weth,
			value: U256::zero(),
			data: crate::abi_encode_call("withdraw(uint256)", &[ethers::abi::Token::Uint(amount)]),
			func_sig: "withdraw".into(),
		};

		let stake = MemoizedTx {
			memo: TxMemo::Stake,
			chain: self.l1_chain,
			to: self.staking_pool,
			value: amount,
			data: crate::abi_encode_call("deposit()", &[]),
			func_sig: "deposit".into(),
		};

		let allowance = client_for(&self.clients, self.l1_chain)?
			.get_allowance(
				&poller_chain_client::ChainAddress::Hex(self.liquid_staked_token),
				&poller_chain_client::ChainAddress::Hex(recipient),
				&poller_chain_client::ChainAddress::Hex(self.l2_bridge),
			)
			.await?;

		let mut steps = vec![unwrap, stake];
		if allowance < staked_amount {
			steps.push(MemoizedTx {
				memo: TxMemo::Approval,
				chain: self.l1_chain,
				to: self.liquid_staked_token,
				value: U256::zero(),
				data: crate::abi_encode_call(
					"approve(address,uint256)",
					&[ethers::abi::Token::Address(self.l2_bridge), ethers::abi::Token::Uint(U256::MAX)],
				),
				func_sig: "approve".into(),
			});
		}

		steps.push(MemoizedTx {
			memo: TxMemo::Rebalance,
			chain: self.l1_chain,
			to: self.l2_bridge,
			value: U256::zero(),
			data: crate::abi_encode_call(
				"depositERC20To(address,address,address,uint256,uint32,bytes)",
				&[
					ethers::abi::Token::Address(self.liquid_staked_token),
					ethers::abi::Token::Address(self.liquid_staked_token),
					ethers::abi::Token::Address(recipient),
					ethers::abi::Token::Uint(staked_amount),
					ethers::abi::Token::Uint(200_000.into()),
					ethers::abi::Token::Bytes(vec![]),
				],
			),
			func_sig: "depositERC20To".into(),
		});

		Ok(steps)
	}

	async fn ready_on_destination(
		&self,
		_amount: U256,
		_route: &RebalanceRoute,
		_origin_receipt: &OriginReceipt,
	) -> Result<bool, AdapterError> {
		// Auto-relayed bridge leg, same as the plain optimistic-rollup deposit path.
		Ok(true)
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
		_route: &RebalanceRoute,
		_origin_receipt: &OriginReceipt,
	) -> Result<bool, AdapterError> {
		Ok(true)
	}
}
