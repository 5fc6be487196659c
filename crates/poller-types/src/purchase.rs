use ethers::types::U256;
use serde::{Deserialize, Serialize};

use crate::invoice::ChainId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionKind {
	OnChain,
	MultisigProposal,
}

/// Cached record of an intent we've already submitted against an invoice, used
/// to prevent a second tick from purchasing the same invoice twice. Evicted
/// once the hub reports a terminal status for the intent, or the invoice drops
/// out of the feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseRecord {
	pub intent_id: String,
	pub invoice_id: String,
	pub purchase_chain: ChainId,
	pub amount: U256,
	pub submission_tx_hash: String,
	pub submission_kind: SubmissionKind,
	pub recorded_at: chrono::DateTime<chrono::Utc>,
}
