//! Direct EOA signing. Caches the next nonce in-process and resets it if it
//! goes stale, the same guard the witnessing RPC clients use against getting
//! stuck on a bad nonce after a gap in activity.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use ethers::{
	providers::Middleware,
	signers::{LocalWallet, Signer as EthersSigner},
	types::{TransactionRequest, H256, U256},
};
use poller_chain_client::{ChainAddress, ClientError, UnsignedTx};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::{SignerError, SubmissionHandle};

const NONCE_LIFETIME: Duration = Duration::from_secs(120);

struct NonceInfo {
	next_nonce: U256,
	requested_at: Instant,
}

pub struct EoaSigner {
	wallet: LocalWallet,
	provider: Arc<ethers::providers::Provider<ethers::providers::Http>>,
	nonce: Mutex<Option<NonceInfo>>,
}

impl EoaSigner {
	pub fn new(wallet: LocalWallet, chain_id: u64, provider: Arc<ethers::providers::Provider<ethers::providers::Http>>) -> Self {
		Self { wallet: wallet.with_chain_id(chain_id), provider, nonce: Mutex::new(None) }
	}

	pub fn address(&self) -> ethers::types::Address {
		self.wallet.address()
	}

	async fn next_nonce(&self) -> Result<U256, SignerError> {
		let mut guard = self.nonce.lock().await;

		if guard.as_ref().is_some_and(|n| n.requested_at.elapsed() > NONCE_LIFETIME) {
			*guard = None;
		}

		let info = match guard.as_mut() {
			Some(info) => info,
			None => {
				let tx_count = self
					.provider
					.get_transaction_count(self.wallet.address(), None)
					.await
					.map_err(|e| SignerError::Client(ClientError::Rpc(e.to_string())))?;
				guard.insert(NonceInfo { next_nonce: tx_count, requested_at: Instant::now() })
			},
		};

		let nonce = info.next_nonce;
		info.next_nonce += U256::from(1);
		Ok(nonce)
	}
}

#[async_trait]
impl crate::Signer for EoaSigner {
	async fn submit(&self, tx: UnsignedTx) -> Result<SubmissionHandle, SignerError> {
		let to = match tx.to {
			ChainAddress::Hex(addr) => addr,
			ChainAddress::Base58(_) => {
				return Err(SignerError::Client(ClientError::Rpc(
					"EOA signer only supports hex-addressed chains".into(),
				)))
			},
		};
		let nonce = self.next_nonce().await?;
		let request = TransactionRequest::new().to(to).value(tx.value).data(tx.data).nonce(nonce);
		let pending = self
			.provider
			.send_transaction(request, None)
			.await
			.map_err(|e| SignerError::Client(ClientError::Rpc(e.to_string())))?;
		Ok(SubmissionHandle::TransactionHash(*pending))
	}

	async fn resolve_hash(&self, handle: &SubmissionHandle) -> Result<Option<H256>, SignerError> {
		match handle {
			SubmissionHandle::TransactionHash(hash) => Ok(Some(*hash)),
			SubmissionHandle::ProposalId(_) => Err(SignerError::Proposer(
				"an EOA signer never produces proposal ids".into(),
			)),
		}
	}
}
