//! Signer abstraction (§4.2): two variants behind one interface. An
//! [`EoaSigner`] signs and submits directly; a [`SafeProposerSigner`] hands
//! the transaction to an off-chain co-signing service and returns a proposal
//! id in its place. The core treats both return values as a "hash" worth
//! recording — it is [`Signer::resolve_hash`] that later tells the rebalance
//! loop whether a proposal id has turned into a real on-chain hash yet.

pub mod eoa;
pub mod proposer;

use async_trait::async_trait;
use ethers::types::H256;
use poller_chain_client::UnsignedTx;

#[derive(Debug, thiserror::Error)]
pub enum SignerError {
	#[error("underlying chain client error: {0}")]
	Client(#[from] poller_chain_client::ClientError),
	#[error("proposer service error: {0}")]
	Proposer(String),
	#[error("nonce source exhausted its retry budget")]
	NonceUnavailable,
}

/// What [`Signer::submit`] hands back immediately. An EOA signer always
/// returns [`SubmissionHandle::TransactionHash`]; a safe-proposer returns
/// [`SubmissionHandle::ProposalId`] until the proposal resolves on-chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionHandle {
	TransactionHash(H256),
	ProposalId(u64),
}

impl SubmissionHandle {
	pub fn as_tx_reference(&self) -> poller_types::TxReference {
		match self {
			SubmissionHandle::TransactionHash(hash) => poller_types::TxReference::Hash(*hash),
			SubmissionHandle::ProposalId(id) => poller_types::TxReference::ProposalId(*id),
		}
	}
}

/// One instance is configured per chain, matching `wallet[chainId]` (§6).
/// Per-chain submission ordering is this trait's responsibility when the
/// underlying nonce source is a single EOA; a proposer's sequencing instead
/// comes from the proposal service itself.
#[async_trait]
pub trait Signer: Send + Sync {
	async fn submit(&self, tx: UnsignedTx) -> Result<SubmissionHandle, SignerError>;

	/// For a proposal id, polls the co-signing service until the underlying
	/// on-chain transaction hash is known. For a transaction hash, returns it
	/// unchanged. Returns `Ok(None)` while a proposal is still pending
	/// co-signatures — callers treat that as "not ready yet", not an error.
	async fn resolve_hash(&self, handle: &SubmissionHandle) -> Result<Option<H256>, SignerError>;
}
