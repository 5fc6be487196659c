//! Prometheus instrumentation for the two control loops.
//!
//! Formatting and serving the `/metrics` text exposition is an external
//! concern (owned by whatever process embeds this crate); this crate only
//! owns metric definitions, a [`Registry`] to gather them from, and update
//! methods named after the operations that move them.

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
	#[error("failed to register metric: {0}")]
	Register(#[from] prometheus::Error),
	#[error("failed to encode metrics: {0}")]
	Encode(String),
}

/// Owns every counter/gauge/histogram the poller exposes, and the registry
/// that gathers them. One instance is constructed at startup and shared
/// (behind an `Arc`) by both loops and the oracle.
pub struct Metrics {
	registry: Registry,

	possible_invoices_seen: IntCounterVec,
	invoices_rejected: IntCounterVec,
	successful_purchases: IntCounterVec,
	purchase_duration: Histogram,
	rewards_accrued: IntGaugeVec,

	rebalance_operations_started: IntCounterVec,
	rebalance_operations_completed: IntCounterVec,
	rebalance_operations_cancelled: IntCounterVec,
	rebalance_operation_duration: Histogram,

	chain_balance: IntGaugeVec,
	chain_gas_balance: IntGaugeVec,

	rpc_calls: IntCounterVec,
	rpc_failures: IntCounterVec,

	active_earmarks: IntGauge,
}

impl Metrics {
	pub fn new() -> Result<Self, MetricsError> {
		let registry = Registry::new();

		let possible_invoices_seen = IntCounterVec::new(
			Opts::new("possible_invoices_seen_total", "Invoices observed from the feed before validation"),
			&["ticker"],
		)?;
		let invoices_rejected = IntCounterVec::new(
			Opts::new("invoices_rejected_total", "Invoices skipped before planning, by reason"),
			&["reason"],
		)?;
		let successful_purchases = IntCounterVec::new(
			Opts::new("invoice_purchases_total", "Invoices successfully purchased"),
			&["chain"],
		)?;
		let purchase_duration = Histogram::with_opts(HistogramOpts::new(
			"invoice_purchase_duration_seconds",
			"Wall-clock time from invoice selection to purchase submission",
		))?;
		let rewards_accrued =
			IntGaugeVec::new(Opts::new("rewards_accrued_dbps_units", "Reward accrual per discount tier"), &["chain"])?;

		let rebalance_operations_started = IntCounterVec::new(
			Opts::new("rebalance_operations_started_total", "Rebalance operations created"),
			&["bridge"],
		)?;
		let rebalance_operations_completed = IntCounterVec::new(
			Opts::new("rebalance_operations_completed_total", "Rebalance operations that reached Completed"),
			&["bridge"],
		)?;
		let rebalance_operations_cancelled = IntCounterVec::new(
			Opts::new("rebalance_operations_cancelled_total", "Rebalance operations that reached Cancelled"),
			&["bridge"],
		)?;
		let rebalance_operation_duration = Histogram::with_opts(HistogramOpts::new(
			"rebalance_operation_duration_seconds",
			"Wall-clock time from operation creation to completion",
		))?;

		let chain_balance =
			IntGaugeVec::new(Opts::new("chain_balance_18dp", "Free custodied balance, 18-decimal units"), &["chain", "ticker"])?;
		let chain_gas_balance =
			IntGaugeVec::new(Opts::new("chain_gas_balance_wei", "Native gas token balance of the hot wallet"), &["chain"])?;

		let rpc_calls = IntCounterVec::new(Opts::new("rpc_calls_total", "RPC calls made by a chain client"), &["chain", "method"])?;
		let rpc_failures =
			IntCounterVec::new(Opts::new("rpc_failures_total", "RPC calls that returned an error"), &["chain", "method"])?;

		let active_earmarks = IntGauge::new("active_earmarks", "Earmarks currently in a non-terminal state")?;

		for collector in [
			Box::new(possible_invoices_seen.clone()) as Box<dyn prometheus::core::Collector>,
			Box::new(invoices_rejected.clone()),
			Box::new(successful_purchases.clone()),
			Box::new(purchase_duration.clone()),
			Box::new(rewards_accrued.clone()),
			Box::new(rebalance_operations_started.clone()),
			Box::new(rebalance_operations_completed.clone()),
			Box::new(rebalance_operations_cancelled.clone()),
			Box::new(rebalance_operation_duration.clone()),
			Box::new(chain_balance.clone()),
			Box::new(chain_gas_balance.clone()),
			Box::new(rpc_calls.clone()),
			Box::new(rpc_failures.clone()),
			Box::new(active_earmarks.clone()),
		] {
			registry.register(collector)?;
		}

		Ok(Self {
			registry,
			possible_invoices_seen,
			invoices_rejected,
			successful_purchases,
			purchase_duration,
			rewards_accrued,
			rebalance_operations_started,
			rebalance_operations_completed,
			rebalance_operations_cancelled,
			rebalance_operation_duration,
			chain_balance,
			chain_gas_balance,
			rpc_calls,
			rpc_failures,
			active_earmarks,
		})
	}

	pub fn record_possible_invoice_seen(&self, ticker: &str) {
		self.possible_invoices_seen.with_label_values(&[ticker]).inc();
	}

	pub fn record_invoice_rejected(&self, reason: &str) {
		self.invoices_rejected.with_label_values(&[reason]).inc();
	}

	pub fn record_successful_purchase(&self, chain: &str) {
		self.successful_purchases.with_label_values(&[chain]).inc();
	}

	pub fn record_invoice_purchase_duration(&self, seconds: f64) {
		self.purchase_duration.observe(seconds);
	}

	pub fn update_rewards(&self, chain: &str, accrued: i64) {
		self.rewards_accrued.with_label_values(&[chain]).set(accrued);
	}

	pub fn record_rebalance_operation_started(&self, bridge: &str) {
		self.rebalance_operations_started.with_label_values(&[bridge]).inc();
	}

	pub fn record_rebalance_operation_completed(&self, bridge: &str, duration_seconds: f64) {
		self.rebalance_operations_completed.with_label_values(&[bridge]).inc();
		self.rebalance_operation_duration.observe(duration_seconds);
	}

	pub fn record_rebalance_operation_cancelled(&self, bridge: &str) {
		self.rebalance_operations_cancelled.with_label_values(&[bridge]).inc();
	}

	pub fn set_chain_balance(&self, chain: &str, ticker: &str, balance_18dp: i64) {
		self.chain_balance.with_label_values(&[chain, ticker]).set(balance_18dp);
	}

	pub fn set_chain_gas_balance(&self, chain: &str, wei: i64) {
		self.chain_gas_balance.with_label_values(&[chain]).set(wei);
	}

	pub fn record_rpc_call(&self, chain: &str, method: &str) {
		self.rpc_calls.with_label_values(&[chain, method]).inc();
	}

	pub fn record_rpc_failure(&self, chain: &str, method: &str) {
		self.rpc_failures.with_label_values(&[chain, method]).inc();
	}

	pub fn set_active_earmarks(&self, count: i64) {
		self.active_earmarks.set(count);
	}

	/// Renders the current state of every registered metric in the
	/// Prometheus text exposition format.
	pub fn gather_text(&self) -> Result<String, MetricsError> {
		let encoder = TextEncoder::new();
		let mut buffer = Vec::new();
		encoder.encode(&self.registry.gather(), &mut buffer).map_err(MetricsError::Register)?;
		String::from_utf8(buffer).map_err(|e| MetricsError::Encode(e.to_string()))
	}

	pub fn registry(&self) -> &Registry {
		&self.registry
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn gather_text_includes_recorded_samples() {
		let metrics = Metrics::new().unwrap();
		metrics.record_successful_purchase("ethereum");
		metrics.set_active_earmarks(3);

		let text = metrics.gather_text().unwrap();
		assert!(text.contains("invoice_purchases_total"));
		assert!(text.contains("active_earmarks 3"));
	}
}
