//! Error kinds surfaced across the core.
//!
//! The core never catches and discards an error: each one is either handled
//! locally (skip this preference, skip this invoice) or recorded as a
//! transition to a terminal earmark/operation state. Every error carries a
//! [`ErrorContext`] so logs can be correlated with a request, route, bridge
//! and invoice without leaking secret values.

use ethers::types::H256;
use serde::Serialize;

/// Structured context attached to every error that crosses a component boundary.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ErrorContext {
	pub request_id: Option<String>,
	pub origin_chain: Option<u64>,
	pub destination_chain: Option<u64>,
	pub bridge: Option<String>,
	pub invoice_id: Option<String>,
}

impl ErrorContext {
	pub fn new(request_id: impl Into<String>) -> Self {
		Self { request_id: Some(request_id.into()), ..Default::default() }
	}

	pub fn with_route(mut self, origin: u64, destination: u64) -> Self {
		self.origin_chain = Some(origin);
		self.destination_chain = Some(destination);
		self
	}

	pub fn with_bridge(mut self, bridge: impl Into<String>) -> Self {
		self.bridge = Some(bridge.into());
		self
	}

	pub fn with_invoice(mut self, invoice_id: impl Into<String>) -> Self {
		self.invoice_id = Some(invoice_id.into());
		self
	}
}

/// Fatal on startup; never recovered from within a running loop.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	#[error("missing asset mapping for ticker {ticker} on chain {chain}")]
	MissingAssetMapping { ticker: String, chain: u64 },
	#[error("invalid address in configuration: {0}")]
	InvalidAddress(String),
	#[error("malformed configuration: {0}")]
	Malformed(String),
}

/// Local to a single bridge preference attempt: the planner skips the preference and
/// tries the next one in the list.
#[derive(Debug, thiserror::Error)]
pub enum QuoteError {
	#[error("quoted amount is below the adapter's intrinsic minimum")]
	BelowMinimum,
	#[error("route is not supported by this adapter")]
	Unsupported,
	#[error("upstream quote source is temporarily unavailable: {0}")]
	TransientUpstream(String),
}

/// Raised by the planner when a quote's implied slippage exceeds the configured budget.
/// Local: the planner moves on to the next preference.
#[derive(Debug, thiserror::Error)]
#[error("slippage {actual_dbps} dbp exceeds budget {max_dbps} dbp")]
pub struct SlippageExceeded {
	pub actual_dbps: u32,
	pub max_dbps: u32,
}

/// Errors from submitting a transaction through a [`ChainClient`](poller-chain-client).
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
	/// Fatal for the operation: cancel and audit.
	#[error("nonce conflict submitting transaction")]
	NonceConflict,
	/// Fatal for the operation: cancel and audit.
	#[error("transaction reverted on execution: {reason}")]
	Revert { reason: String },
	/// Transient: retry with backoff, then surface and leave the operation in place.
	#[error("submission timed out waiting for confirmations")]
	Timeout,
	/// Transient: retry with backoff, then surface and leave the operation in place.
	#[error("rpc provider unavailable: {0}")]
	ProviderDown(String),
}

impl SubmitError {
	/// Fatal submission errors cancel the operation outright; transient ones are retried.
	pub fn is_fatal(&self) -> bool {
		matches!(self, SubmitError::NonceConflict | SubmitError::Revert { .. })
	}
}

/// Bridge adapter reported that finality cannot be reached; the operation is
/// cancelled rather than retried.
#[derive(Debug, thiserror::Error)]
#[error("bridge cancelled the transfer: {reason}")]
pub struct BridgeCancelled {
	pub reason: String,
}

/// Benign: the callback is not yet submittable this tick (e.g. challenge window
/// has not elapsed). No state transition, no audit entry, just try again next tick.
#[derive(Debug, thiserror::Error)]
#[error("callback not ready yet")]
pub struct CallbackNotReady;

/// Errors surfaced by the state store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
	/// Benign: another writer already holds the active earmark for this invoice.
	#[error("invoice {invoice_id} already has an active earmark")]
	UniqueViolation { invoice_id: String },
	#[error("row not found")]
	NotFound,
	#[error("database error: {0}")]
	Database(String),
}

/// Reasons an invoice is skipped before planning, recorded as a metric and not retried
/// within the same tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InvoiceRejectReason {
	InvalidFormat,
	InvalidOwner,
	InvalidAge,
	DestinationXerc20,
	TransactionFailed,
}

/// Classifies whether a failure is worth retrying at the RPC/HTTP layer.
/// `NOT_FOUND` and `PERMISSION_DENIED`-shaped failures are excluded from retry
/// because retrying cannot change their outcome.
pub fn is_retryable(status_like: Option<u16>, message: &str) -> bool {
	if let Some(status) = status_like {
		if status == 404 || status == 403 || status == 401 {
			return false;
		}
	}
	let lower = message.to_ascii_lowercase();
	!(lower.contains("not found") || lower.contains("permission denied") || lower.contains("unauthorized"))
}

/// A transaction hash or, for multisig-proposer flows, a proposal identifier that has
/// not yet resolved to an on-chain hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TxReference {
	Hash(H256),
	ProposalId(u64),
}
