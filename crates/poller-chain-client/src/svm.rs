//! Getter path for chains whose native address format is base58 rather than
//! hex (§4.4). These chains only ever appear as oracle balance sources in this
//! system — no bridge adapter submits transactions through this client — so it
//! implements the read half of [`ChainClient`] against a bare JSON-RPC
//! endpoint and leaves the write half as an explicit unsupported error rather
//! than a half-finished signer/transaction-encoding path nothing calls.

use async_trait::async_trait;
use ethers::types::{Bytes, H256, U256};
use serde_json::json;

use crate::{ChainAddress, ChainClient, ClientError, Receipt, UnsignedTx};

pub struct SvmChainClient {
	chain_id: u64,
	rpc_urls: Vec<url::Url>,
	http: reqwest::Client,
}

impl SvmChainClient {
	pub fn new(chain_id: u64, rpc_urls: Vec<url::Url>) -> Self {
		Self { chain_id, rpc_urls, http: reqwest::Client::new() }
	}

	fn as_base58<'a>(&self, address: &'a ChainAddress) -> Result<&'a str, ClientError> {
		match address {
			ChainAddress::Base58(s) => Ok(s.as_str()),
			ChainAddress::Hex(_) => Err(ClientError::Rpc("expected a base58 address".into())),
		}
	}

	async fn rpc_call(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value, ClientError> {
		let mut last_err = None;
		for url in &self.rpc_urls {
			let body = json!({ "jsonrpc": "2.0", "id": 1, "method": method, "params": params });
			match self.http.post(url.clone()).json(&body).send().await {
				Ok(resp) => match resp.json::<serde_json::Value>().await {
					Ok(value) => {
						if let Some(error) = value.get("error") {
							last_err = Some(ClientError::Rpc(error.to_string()));
							continue;
						}
						return Ok(value);
					},
					Err(e) => last_err = Some(ClientError::Rpc(e.to_string())),
				},
				Err(e) => last_err = Some(ClientError::Rpc(e.to_string())),
			}
		}
		Err(last_err.unwrap_or(ClientError::ProvidersExhausted))
	}
}

#[async_trait]
impl ChainClient for SvmChainClient {
	fn chain_id(&self) -> u64 {
		self.chain_id
	}

	async fn get_native_balance(&self, address: &ChainAddress) -> Result<U256, ClientError> {
		let address = self.as_base58(address)?;
		let response = self.rpc_call("getBalance", json!([address])).await?;
		let lamports = response.pointer("/result/value").and_then(|v| v.as_u64()).unwrap_or(0);
		Ok(U256::from(lamports))
	}

	async fn get_token_balance(
		&self,
		asset: &ChainAddress,
		address: &ChainAddress,
	) -> Result<U256, ClientError> {
		let mint = self.as_base58(asset)?;
		let owner = self.as_base58(address)?;
		let response = self
			.rpc_call(
				"getTokenAccountsByOwner",
				json!([owner, { "mint": mint }, { "encoding": "jsonParsed" }]),
			)
			.await?;
		let amount = response
			.pointer("/result/value/0/account/data/parsed/info/tokenAmount/amount")
			.and_then(|v| v.as_str())
			.and_then(|s| s.parse::<u128>().ok())
			.unwrap_or(0);
		Ok(U256::from(amount))
	}

	async fn get_allowance(
		&self,
		_asset: &ChainAddress,
		_owner: &ChainAddress,
		_spender: &ChainAddress,
	) -> Result<U256, ClientError> {
		Err(ClientError::Rpc("this chain family has no ERC20-style allowance model".into()))
	}

	async fn submit_and_monitor(&self, _tx: UnsignedTx) -> Result<Receipt, ClientError> {
		Err(ClientError::Rpc("submission is not supported for this chain family".into()))
	}

	async fn get_transaction_receipt(&self, _hash: H256) -> Result<Option<Receipt>, ClientError> {
		Err(ClientError::Rpc("receipt lookup is not supported for this chain family".into()))
	}

	async fn call_view(&self, _target: &ChainAddress, _encoded_input: Bytes) -> Result<Bytes, ClientError> {
		Err(ClientError::Rpc("contract calls are not supported for this chain family".into()))
	}

	async fn raw_receipt(&self, _hash: H256) -> Result<Option<serde_json::Value>, ClientError> {
		Err(ClientError::Rpc("receipt lookup is not supported for this chain family".into()))
	}
}
