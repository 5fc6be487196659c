//! Safe-proposer signing. Instead of broadcasting directly, posts a proposal
//! to an off-chain co-signing service (a Gnosis Safe transaction service, or
//! a Zodiac role-module equivalent) and returns the service's proposal id.
//! [`Signer::resolve_hash`] then polls that service until enough owners have
//! co-signed and it has actually executed on-chain.

use async_trait::async_trait;
use ethers::types::{Address, H256};
use poller_chain_client::{ChainAddress, ClientError, UnsignedTx};
use serde::Deserialize;

use crate::{SignerError, SubmissionHandle};

#[derive(Debug, Deserialize)]
struct ProposalResponse {
	#[serde(rename = "proposalId")]
	proposal_id: u64,
}

#[derive(Debug, Deserialize)]
struct ProposalStatus {
	#[serde(rename = "transactionHash")]
	transaction_hash: Option<H256>,
}

/// One instance is configured per chain whose `wallet[chainId]` entry is
/// `Zodiac`. `safe_address` is the multisig account the module acts for;
/// `role_key` selects which role the module signs with when more than one is
/// configured on the same Safe.
pub struct SafeProposerSigner {
	service_base_url: url::Url,
	safe_address: Address,
	module_address: Address,
	role_key: Option<String>,
	http: reqwest::Client,
}

impl SafeProposerSigner {
	pub fn new(
		service_base_url: url::Url,
		safe_address: Address,
		module_address: Address,
		role_key: Option<String>,
	) -> Self {
		Self { service_base_url, safe_address, module_address, role_key, http: reqwest::Client::new() }
	}
}

#[async_trait]
impl crate::Signer for SafeProposerSigner {
	async fn submit(&self, tx: UnsignedTx) -> Result<SubmissionHandle, SignerError> {
		let to = match tx.to {
			ChainAddress::Hex(addr) => addr,
			ChainAddress::Base58(_) => {
				return Err(SignerError::Client(ClientError::Rpc(
					"safe-proposer signer only supports hex-addressed chains".into(),
				)))
			},
		};

		let url = self.service_base_url.join("proposals").map_err(|e| SignerError::Proposer(e.to_string()))?;
		let response = self
			.http
			.post(url)
			.json(&serde_json::json!({
				"safeAddress": format!("{:?}", self.safe_address),
				"moduleAddress": format!("{:?}", self.module_address),
				"roleKey": self.role_key,
				"to": format!("{to:?}"),
				"value": tx.value,
				"data": tx.data,
			}))
			.send()
			.await
			.map_err(|e| SignerError::Proposer(e.to_string()))?
			.json::<ProposalResponse>()
			.await
			.map_err(|e| SignerError::Proposer(e.to_string()))?;

		Ok(SubmissionHandle::ProposalId(response.proposal_id))
	}

	async fn resolve_hash(&self, handle: &SubmissionHandle) -> Result<Option<H256>, SignerError> {
		let proposal_id = match handle {
			SubmissionHandle::ProposalId(id) => *id,
			SubmissionHandle::TransactionHash(hash) => return Ok(Some(*hash)),
		};

		let url = self
			.service_base_url
			.join(&format!("proposals/{proposal_id}"))
			.map_err(|e| SignerError::Proposer(e.to_string()))?;
		let status = self
			.http
			.get(url)
			.send()
			.await
			.map_err(|e| SignerError::Proposer(e.to_string()))?
			.json::<ProposalStatus>()
			.await
			.map_err(|e| SignerError::Proposer(e.to_string()))?;

		Ok(status.transaction_hash)
	}
}
