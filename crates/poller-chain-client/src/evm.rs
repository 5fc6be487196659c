//! EVM chain client: Ethereum L1 and every rollup/L2 in this system speaks the
//! same JSON-RPC dialect, so one implementation covers all of them; only the
//! configured provider list and chain id differ per instance.

use async_trait::async_trait;
use ethers::{
	abi::{self, Token},
	providers::Middleware,
	types::{Address, Bytes, TransactionReceipt, TransactionRequest, H256, U256},
	utils::keccak256,
};

use crate::{ChainAddress, ChainClient, ClientError, Receipt, UnsignedTx};

fn selector(signature: &str) -> [u8; 4] {
	let hash = keccak256(signature.as_bytes());
	[hash[0], hash[1], hash[2], hash[3]]
}

fn encode_call(signature: &str, tokens: &[Token]) -> Bytes {
	let mut data = selector(signature).to_vec();
	data.extend(abi::encode(tokens));
	Bytes::from(data)
}

fn as_address(addr: &ChainAddress) -> Result<Address, ClientError> {
	match addr {
		ChainAddress::Hex(a) => Ok(*a),
		ChainAddress::Base58(s) => Err(ClientError::Rpc(format!("not an EVM address: {s}"))),
	}
}

pub struct EvmChainClient {
	chain_id: u64,
	provider: crate::provider::FallbackProvider,
	min_confirmations: u64,
	confirmation_timeout: std::time::Duration,
}

impl EvmChainClient {
	pub fn new(
		chain_id: u64,
		provider: crate::provider::FallbackProvider,
		min_confirmations: u64,
		confirmation_timeout: std::time::Duration,
	) -> Self {
		Self { chain_id, provider, min_confirmations, confirmation_timeout }
	}
}

#[async_trait]
impl ChainClient for EvmChainClient {
	fn chain_id(&self) -> u64 {
		self.chain_id
	}

	async fn get_native_balance(&self, address: &ChainAddress) -> Result<U256, ClientError> {
		let address = as_address(address)?;
		self.provider
			.with_fallback(|provider| async move {
				provider.get_balance(address, None).await.map_err(|e| ClientError::Rpc(e.to_string()))
			})
			.await
	}

	async fn get_token_balance(
		&self,
		asset: &ChainAddress,
		address: &ChainAddress,
	) -> Result<U256, ClientError> {
		let asset = as_address(asset)?;
		let owner = as_address(address)?;
		let data = encode_call("balanceOf(address)", &[Token::Address(owner)]);
		let out = self.call_view(&ChainAddress::Hex(asset), data).await?;
		Ok(U256::from_big_endian(&out))
	}

	async fn get_allowance(
		&self,
		asset: &ChainAddress,
		owner: &ChainAddress,
		spender: &ChainAddress,
	) -> Result<U256, ClientError> {
		let asset = as_address(asset)?;
		let owner = as_address(owner)?;
		let spender = as_address(spender)?;
		let data = encode_call("allowance(address,address)", &[Token::Address(owner), Token::Address(spender)]);
		let out = self.call_view(&ChainAddress::Hex(asset), data).await?;
		Ok(U256::from_big_endian(&out))
	}

	async fn submit_and_monitor(&self, tx: UnsignedTx) -> Result<Receipt, ClientError> {
		let to = as_address(&tx.to)?;
		let request = TransactionRequest::new().to(to).value(tx.value).data(tx.data.clone());
		let min_confirmations = self.min_confirmations;
		let timeout = self.confirmation_timeout;
		self.provider
			.with_fallback(|provider| {
				let request = request.clone();
				async move {
					let pending = provider
						.send_transaction(request, None)
						.await
						.map_err(|e| map_submit_error(&e.to_string()))?;
					let receipt = tokio::time::timeout(
						timeout,
						pending.confirmations(min_confirmations as usize),
					)
					.await
					.map_err(|_| ClientError::Submit(poller_types::SubmitError::Timeout))?
					.map_err(|e| ClientError::Rpc(e.to_string()))?
					.ok_or_else(|| ClientError::Submit(poller_types::SubmitError::Timeout))?;
					Ok(to_receipt(receipt, min_confirmations))
				}
			})
			.await
	}

	async fn get_transaction_receipt(&self, hash: H256) -> Result<Option<Receipt>, ClientError> {
		self.provider
			.with_fallback(|provider| async move {
				provider
					.get_transaction_receipt(hash)
					.await
					.map(|maybe| maybe.map(|r| to_receipt(r, 1)))
					.map_err(|e| ClientError::Rpc(e.to_string()))
			})
			.await
	}

	async fn call_view(&self, target: &ChainAddress, encoded_input: Bytes) -> Result<Bytes, ClientError> {
		let target = as_address(target)?;
		let request = TransactionRequest::new().to(target).data(encoded_input.clone());
		self.provider
			.with_fallback(|provider| {
				let request = request.clone();
				async move {
					provider
						.call(&request.into(), None)
						.await
						.map_err(|e| ClientError::Rpc(e.to_string()))
				}
			})
			.await
	}

	async fn raw_receipt(&self, hash: H256) -> Result<Option<serde_json::Value>, ClientError> {
		self.provider
			.with_fallback(|provider| async move {
				provider
					.get_transaction_receipt(hash)
					.await
					.map(|maybe| maybe.and_then(|r| serde_json::to_value(r).ok()))
					.map_err(|e| ClientError::Rpc(e.to_string()))
			})
			.await
	}
}

fn map_submit_error(message: &str) -> ClientError {
	let lower = message.to_ascii_lowercase();
	if lower.contains("nonce") {
		ClientError::Submit(poller_types::SubmitError::NonceConflict)
	} else if lower.contains("revert") {
		ClientError::Submit(poller_types::SubmitError::Revert { reason: message.to_string() })
	} else {
		ClientError::Submit(poller_types::SubmitError::ProviderDown(message.to_string()))
	}
}

fn to_receipt(receipt: TransactionReceipt, confirmations: u64) -> Receipt {
	Receipt {
		transaction_hash: receipt.transaction_hash,
		block_number: receipt.block_number.map(|b| b.as_u64()).unwrap_or_default(),
		status: receipt.status.map(|s| s == 1.into()).unwrap_or(false),
		confirmations,
	}
}
