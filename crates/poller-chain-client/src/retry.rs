//! Bounded request retrier.
//!
//! Unlike a retry-forever actor, every call made through [`retry`] gives up
//! after a fixed number of attempts: the caller decides what "gave up" means
//! (surface the error, leave an operation where it is for the next tick).
//! Applies exponential backoff with jitter between attempts, and consults a
//! classifier so that errors that can never be fixed by retrying (NOT_FOUND,
//! PERMISSION_DENIED) fail fast instead of burning the attempt budget.

use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
	pub base: Duration,
	pub cap: Duration,
	pub factor: u32,
	pub jitter: f64,
	pub max_attempts: u32,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			base: Duration::from_millis(100),
			cap: Duration::from_secs(5),
			factor: 2,
			jitter: 0.10,
			max_attempts: 3,
		}
	}
}

impl RetryPolicy {
	fn delay_for(&self, attempt: u32) -> Duration {
		let scaled = self.base.saturating_mul(self.factor.saturating_pow(attempt));
		let capped = std::cmp::min(self.cap, scaled);
		let jitter_span = capped.mul_f64(self.jitter);
		let offset = rand::thread_rng().gen_range(0..=jitter_span.as_millis().max(1) as u64);
		capped.saturating_sub(jitter_span / 2).saturating_add(Duration::from_millis(offset))
	}
}

/// Retries `op` up to `policy.max_attempts` times. `classify` decides, given the
/// error from an attempt, whether it is worth retrying at all; an error
/// classified as non-retryable is returned immediately on the first attempt.
pub async fn retry<T, E, F, Fut, C>(policy: RetryPolicy, mut op: F, classify: C) -> Result<T, E>
where
	F: FnMut() -> Fut,
	Fut: std::future::Future<Output = Result<T, E>>,
	C: Fn(&E) -> bool,
{
	let mut attempt = 0;
	loop {
		match op().await {
			Ok(value) => return Ok(value),
			Err(err) if attempt + 1 >= policy.max_attempts || !classify(&err) => return Err(err),
			Err(err) => {
				tracing::warn!(attempt, "retrying after transient error: {err}", err = DisplayErr(&err));
				tokio::time::sleep(policy.delay_for(attempt)).await;
				attempt += 1;
			},
		}
	}
}

// Small shim so we can log `E: std::fmt::Display` without requiring every caller's
// error type to also implement `std::error::Error`.
struct DisplayErr<'a, E>(&'a E);
impl<E: std::fmt::Display> std::fmt::Display for DisplayErr<'_, E> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		self.0.fmt(f)
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicU32, Ordering};

	use super::*;

	#[tokio::test]
	async fn retries_up_to_max_attempts_then_fails() {
		let calls = AtomicU32::new(0);
		let policy = RetryPolicy { base: Duration::from_millis(1), cap: Duration::from_millis(5), ..Default::default() };
		let result: Result<(), &str> = retry(
			policy,
			|| {
				calls.fetch_add(1, Ordering::SeqCst);
				async { Err("boom") }
			},
			|_| true,
		)
		.await;
		assert!(result.is_err());
		assert_eq!(calls.load(Ordering::SeqCst), 3);
	}

	#[tokio::test]
	async fn succeeds_without_exhausting_attempts() {
		let calls = AtomicU32::new(0);
		let policy = RetryPolicy { base: Duration::from_millis(1), cap: Duration::from_millis(5), ..Default::default() };
		let result = retry(
			policy,
			|| {
				let n = calls.fetch_add(1, Ordering::SeqCst);
				async move { if n < 1 { Err("boom") } else { Ok(42) } }
			},
			|_| true,
		)
		.await;
		assert_eq!(result, Ok(42));
	}

	#[tokio::test]
	async fn non_retryable_errors_fail_immediately() {
		let calls = AtomicU32::new(0);
		let policy = RetryPolicy::default();
		let result: Result<(), &str> = retry(
			policy,
			|| {
				calls.fetch_add(1, Ordering::SeqCst);
				async { Err("not found") }
			},
			|e| !e.contains("not found"),
		)
		.await;
		assert!(result.is_err());
		assert_eq!(calls.load(Ordering::SeqCst), 1);
	}
}
