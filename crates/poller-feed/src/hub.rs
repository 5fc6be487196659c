//! HTTP client for the hub's indexer endpoints: pending cross-chain incoming
//! intents (the "economy" query) and per-intent settlement status used to
//! evict stale [`PurchaseRecord`](poller_types::purchase::PurchaseRecord)s.

use std::collections::HashMap;

use ethers::types::U256;
use futures::future::join_all;
use poller_types::invoice::{ChainId, HubStatus, TickerHash};
use serde::Deserialize;

use crate::FeedError;

#[derive(Debug, Deserialize)]
struct PendingIncomingResponse {
	amount_18: String,
}

#[derive(Debug, Deserialize)]
struct IntentStatusResponse {
	status: String,
}

pub struct HubClient {
	base_url: url::Url,
	http: reqwest::Client,
}

impl HubClient {
	pub fn new(base_url: url::Url, http: reqwest::Client) -> Self {
		Self { base_url, http }
	}

	/// Pending cross-chain incoming intents for one `(ticker, domain)` pair,
	/// in 18-decimal units. The caller treats a failure as a zero adjustment.
	pub async fn pending_incoming(&self, domain: ChainId, ticker: TickerHash) -> Result<U256, FeedError> {
		let mut url = self.base_url.join("economy/pending-incoming").map_err(|e| FeedError::Malformed(e.to_string()))?;
		url.query_pairs_mut().append_pair("chain", &domain.to_string()).append_pair("ticker", &hex::encode(ticker));

		let body = self.http.get(url).send().await?.error_for_status()?.json::<PendingIncomingResponse>().await?;
		U256::from_dec_str(&body.amount_18).map_err(|e| FeedError::Malformed(e.to_string()))
	}

	/// Fans out `pending_incoming` across every candidate domain; a failing
	/// domain contributes zero rather than failing the whole tick.
	pub async fn pending_incoming_for_domains(
		&self,
		domains: &[ChainId],
		ticker: TickerHash,
	) -> HashMap<ChainId, U256> {
		let fetches = domains.iter().map(|&domain| async move {
			let amount = self.pending_incoming(domain, ticker).await.unwrap_or_else(|err| {
				tracing::warn!(chain = domain, error = %err, "pending incoming intents query failed, treating as zero");
				U256::zero()
			});
			(domain, amount)
		});
		join_all(fetches).await.into_iter().collect()
	}

	pub async fn intent_status(&self, intent_id: &str) -> Result<HubStatus, FeedError> {
		let url = self.base_url.join(&format!("intents/{intent_id}/status")).map_err(|e| FeedError::Malformed(e.to_string()))?;
		let body = self.http.get(url).send().await?.error_for_status()?.json::<IntentStatusResponse>().await?;
		match body.status.as_str() {
			"queued" => Ok(HubStatus::Queued),
			"dispatched" => Ok(HubStatus::Dispatched),
			"settled" => Ok(HubStatus::Settled),
			"dispatched_unsupported" => Ok(HubStatus::DispatchedUnsupported),
			other => Err(FeedError::Malformed(format!("unknown hub intent status: {other}"))),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn pending_incoming_for_domains_zeroes_out_unreachable_base_url() {
		let client = HubClient::new(url::Url::parse("http://127.0.0.1:1/").unwrap(), reqwest::Client::new());
		let result = client.pending_incoming_for_domains(&[1, 2], [0u8; 32]).await;
		assert_eq!(result.get(&1).copied(), Some(U256::zero()));
		assert_eq!(result.get(&2).copied(), Some(U256::zero()));
	}
}
