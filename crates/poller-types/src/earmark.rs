use ethers::types::U256;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::invoice::{ChainId, TickerHash};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EarmarkStatus {
	Initiating,
	Pending,
	Ready,
	Completed,
	Cancelled,
	Failed,
	Expired,
}

impl EarmarkStatus {
	pub const ALL: [EarmarkStatus; 7] = [
		EarmarkStatus::Initiating,
		EarmarkStatus::Pending,
		EarmarkStatus::Ready,
		EarmarkStatus::Completed,
		EarmarkStatus::Cancelled,
		EarmarkStatus::Failed,
		EarmarkStatus::Expired,
	];

	/// States that hold the unique-active-earmark-per-invoice claim.
	pub const NON_TERMINAL: [EarmarkStatus; 3] =
		[EarmarkStatus::Initiating, EarmarkStatus::Pending, EarmarkStatus::Ready];

	pub fn is_terminal(self) -> bool {
		!Self::NON_TERMINAL.contains(&self)
	}

	pub fn as_str(self) -> &'static str {
		match self {
			EarmarkStatus::Initiating => "initiating",
			EarmarkStatus::Pending => "pending",
			EarmarkStatus::Ready => "ready",
			EarmarkStatus::Completed => "completed",
			EarmarkStatus::Cancelled => "cancelled",
			EarmarkStatus::Failed => "failed",
			EarmarkStatus::Expired => "expired",
		}
	}
}

impl std::str::FromStr for EarmarkStatus {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::ALL
			.into_iter()
			.find(|status| status.as_str() == s)
			.ok_or_else(|| format!("unknown earmark status: {s}"))
	}
}

/// A claim on the pool of in-flight rebalances that satisfies a specific invoice.
///
/// Invariant (enforced by the store): at most one earmark per `invoice_id` may be
/// in a [`EarmarkStatus::NON_TERMINAL`] state at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Earmark {
	pub id: Uuid,
	pub invoice_id: String,
	pub designated_purchase_chain: ChainId,
	pub ticker_hash: TickerHash,
	/// 18-decimal minimum amount this earmark must produce to become ready.
	pub min_amount: U256,
	pub status: EarmarkStatus,
	pub created_at: chrono::DateTime<chrono::Utc>,
	pub updated_at: chrono::DateTime<chrono::Utc>,
}
