//! Constructs a transport from an ordered list of fallback RPC URLs, trying
//! each in turn. A failed provider disqualifies only the request that hit it;
//! the next request against the same client starts again from the front of
//! the list, since an upstream that was down a moment ago may have recovered.

use std::sync::Arc;

use ethers::providers::{Http, Provider};
use url::Url;

use crate::{
	retry::{retry, RetryPolicy},
	ClientError,
};

#[derive(Clone)]
pub struct FallbackProvider {
	providers: Vec<Arc<Provider<Http>>>,
	retry_policy: RetryPolicy,
}

impl FallbackProvider {
	pub fn new(urls: &[Url], retry_policy: RetryPolicy) -> Self {
		let providers = urls
			.iter()
			.map(|url| Arc::new(Provider::new(Http::new(url.clone()))))
			.collect();
		Self { providers, retry_policy }
	}

	/// Runs `op` against each provider in order, retrying each one according to
	/// `retry_policy` before moving to the next. Only returns
	/// [`ClientError::ProvidersExhausted`] once every provider in the list has
	/// failed every attempt.
	pub async fn with_fallback<T, F, Fut>(&self, mut op: F) -> Result<T, ClientError>
	where
		F: FnMut(Arc<Provider<Http>>) -> Fut,
		Fut: std::future::Future<Output = Result<T, ClientError>>,
	{
		let mut last_err = None;
		for provider in &self.providers {
			let provider = provider.clone();
			let result = retry(
				self.retry_policy,
				|| op(provider.clone()),
				|err| !matches!(err, ClientError::Submit(e) if e.is_fatal()),
			)
			.await;
			match result {
				Ok(value) => return Ok(value),
				Err(err) => {
					tracing::warn!("provider failed, trying next in fallback list: {err}");
					last_err = Some(err);
				},
			}
		}
		Err(last_err.unwrap_or(ClientError::ProvidersExhausted))
	}
}
