//! Rebalancing loop (§4.8): advances in-flight bridge legs toward completion
//! (Phase A), tops up any route that has drifted above its configured
//! maximum (Phase B), and publishes the balance/gas gauges every tick
//! regardless of what else happened.
//!
//! Phase A and Phase B submissions share the same origin-leg submission path
//! as the purchase loop ([`submit_and_confirm`] in [`crate::purchase_loop`]);
//! this module only adds what is specific to a standalone rebalance: no
//! earmark backs these operations, and a cancelled bridge here fails the
//! operation outright rather than the invoice purchase it might be serving.

use std::time::Instant;

use ethers::types::U256;
use poller_bridges::{AdapterError, OriginReceipt};
use poller_types::{
	earmark::EarmarkStatus,
	invoice::{ChainId, TickerHash},
	operation::{LegRecord, OperationStatus, RebalanceOperation},
	route::{RebalanceRoute, RouteRebalancingConfig},
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{purchase_loop::submit_and_confirm, wiring::App};

pub async fn run_once(app: &App, request_id: &str) -> anyhow::Result<()> {
	let tick_started = Instant::now();

	let snapshot = app.oracle.tick().await;
	publish_balance_metrics(app, &snapshot);
	monitor_thresholds(app, &snapshot);

	advance_in_flight_operations(app, request_id).await?;
	top_up_drifted_routes(app, request_id, &snapshot).await?;

	let active = app
		.store
		.get_rebalance_operations(&[OperationStatus::Pending, OperationStatus::AwaitingCallback])
		.await?
		.len();
	app.metrics.set_active_earmarks(active as i64);

	info!(request_id, elapsed_ms = tick_started.elapsed().as_millis(), "rebalance loop tick complete");
	Ok(())
}

fn publish_balance_metrics(app: &App, snapshot: &poller_oracle::BalanceSnapshot) {
	for (ticker, per_chain) in &snapshot.balances {
		let ticker_label = hex::encode(ticker);
		for (&chain, &balance) in per_chain {
			app.metrics.set_chain_balance(&chain.to_string(), &ticker_label, balance.low_u64() as i64);
		}
	}
	for (&chain, &balance) in &snapshot.gas_balances {
		app.metrics.set_chain_gas_balance(&chain.to_string(), balance.low_u64() as i64);
	}
}

/// Gas/bandwidth/energy floors are an operator alarm, never a reason to stop
/// either loop: a chain running low on its native gas token still needs its
/// balance topped up precisely because it is running low.
fn monitor_thresholds(app: &App, snapshot: &poller_oracle::BalanceSnapshot) {
	for (&chain, chain_cfg) in &app.settings.chains {
		let balance = snapshot.gas_balances.get(&chain).copied().unwrap_or_default();
		for (label, threshold) in [
			("gas", chain_cfg.gas_threshold),
			("bandwidth", chain_cfg.bandwidth_threshold),
			("energy", chain_cfg.energy_threshold),
		] {
			if let Some(threshold) = threshold {
				if balance < threshold {
					warn!(chain, %label, %balance, %threshold, "chain balance below configured floor");
				}
			}
		}
	}
}

fn ticker_for_asset(app: &App, chain: ChainId, asset: ethers::types::Address) -> Option<TickerHash> {
	app.settings.chains.get(&chain)?.assets.iter().find(|a| a.address.as_hex() == Some(asset)).map(|a| a.ticker_hash)
}

fn route_of(op: &RebalanceOperation, asset: ethers::types::Address, destination_asset: Option<ethers::types::Address>) -> RebalanceRoute {
	RebalanceRoute { origin: op.origin_chain, destination: op.destination_chain, asset, destination_asset }
}

/// Reconstructs the [`OriginReceipt`] persisted on an operation's origin leg.
/// Absent only for an operation that somehow reached Phase A before its
/// origin transaction was recorded, which the caller treats as not-yet-ready.
fn origin_receipt_of(op: &RebalanceOperation) -> Option<OriginReceipt> {
	let leg = op.origin_leg()?;
	let hash: ethers::types::H256 = leg.hash.parse().ok()?;
	let block_number = leg.receipt.as_ref().and_then(|r| r.get("block_number")).and_then(|v| v.as_u64()).unwrap_or_default();
	Some(OriginReceipt { transaction_hash: hash, block_number, metadata: leg.metadata.clone() })
}

async fn advance_in_flight_operations(app: &App, request_id: &str) -> anyhow::Result<()> {
	let operations = app.store.get_rebalance_operations(&[OperationStatus::Pending, OperationStatus::AwaitingCallback]).await?;

	for op in operations {
		if let Err(err) = advance_one_operation(app, request_id, &op).await {
			warn!(request_id, operation_id = %op.id, error = %err, "failed to advance rebalance operation this tick");
		}
	}
	Ok(())
}

async fn advance_one_operation(app: &App, request_id: &str, op: &RebalanceOperation) -> anyhow::Result<()> {
	let Some(adapter) = app.bridges.get(op.bridge) else {
		anyhow::bail!("no adapter registered for bridge {:?}", op.bridge);
	};
	let Some(origin_receipt) = origin_receipt_of(op) else {
		return Ok(());
	};
	// Asset identity does not survive onto `RebalanceOperation` (only `ticker_hash`
	// does); adapters that need it read it back out of the origin receipt's own
	// metadata, so a zero placeholder here is sufficient for route identity checks.
	let route = route_of(op, ethers::types::Address::zero(), None);

	let result = match op.status {
		OperationStatus::Pending => advance_pending(app, request_id, op, adapter.as_ref(), &route, &origin_receipt).await,
		OperationStatus::AwaitingCallback => {
			advance_awaiting_callback(app, request_id, op, adapter.as_ref(), &route, &origin_receipt).await
		},
		OperationStatus::Completed | OperationStatus::Expired | OperationStatus::Cancelled => Ok(()),
	};

	if let Err(AdapterError::Cancelled(reason)) = &result {
		cancel_operation(app, op, &reason.reason).await?;
		return Ok(());
	}
	result.map_err(anyhow::Error::from)
}

async fn advance_pending(
	app: &App,
	request_id: &str,
	op: &RebalanceOperation,
	adapter: &dyn poller_bridges::BridgeAdapter,
	route: &RebalanceRoute,
	origin_receipt: &OriginReceipt,
) -> Result<(), AdapterError> {
	if !adapter.ready_on_destination(op.amount, route, origin_receipt).await? {
		return Ok(());
	}

	match adapter.destination_callback(route, origin_receipt).await? {
		None => complete_operation(app, op).await.map_err(|e| AdapterError::Upstream(e.to_string())),
		Some(tx) => {
			let tx_hashes = submit_callback(app, op, &tx).await?;
			app.store
				.update_rebalance_operation(op.id, OperationStatus::AwaitingCallback, Some(tx_hashes), None)
				.await
				.map_err(|e| AdapterError::Upstream(e.to_string()))?;
			info!(request_id, operation_id = %op.id, func_sig = %tx.func_sig, "submitted destination callback, awaiting completion");
			Ok(())
		},
	}
}

/// A route whose callback is split across more than one on-chain step (e.g.
/// the OP-stack prove→finalize withdrawal) never reaches [`advance_pending`]
/// twice: the first callback moves the operation straight to
/// `AwaitingCallback`, so this is where the remaining step(s) get driven.
/// Each tick either completes the operation, submits the next step once the
/// adapter reports readiness for it, or does nothing while waiting.
async fn advance_awaiting_callback(
	app: &App,
	request_id: &str,
	op: &RebalanceOperation,
	adapter: &dyn poller_bridges::BridgeAdapter,
	route: &RebalanceRoute,
	origin_receipt: &OriginReceipt,
) -> Result<(), AdapterError> {
	if adapter.is_callback_complete(route, origin_receipt).await? {
		return complete_operation(app, op).await.map_err(|e| AdapterError::Upstream(e.to_string()));
	}
	if !adapter.ready_on_destination(op.amount, route, origin_receipt).await? {
		return Ok(());
	}
	let Some(tx) = adapter.destination_callback(route, origin_receipt).await? else {
		return Ok(());
	};

	let tx_hashes = submit_callback(app, op, &tx).await?;
	app.store
		.update_rebalance_operation(op.id, OperationStatus::AwaitingCallback, Some(tx_hashes), None)
		.await
		.map_err(|e| AdapterError::Upstream(e.to_string()))?;
	info!(request_id, operation_id = %op.id, func_sig = %tx.func_sig, "submitted next callback step, awaiting completion");
	Ok(())
}

/// Submits one callback transaction and records it under its own chain, then
/// folds any step metadata (§4.8 Phase A: a prove timestamp, a finalized flag)
/// into the *origin* leg, since [`origin_receipt_of`] always rebuilds the
/// [`OriginReceipt`] from `tx_hashes[op.origin_chain]` regardless of which
/// chain the callback itself lands on.
async fn submit_callback(
	app: &App,
	op: &RebalanceOperation,
	tx: &poller_types::bridge::MemoizedTx,
) -> Result<std::collections::HashMap<ChainId, LegRecord>, AdapterError> {
	let (_, leg) = submit_and_confirm(app, tx.chain, tx.to, tx.value, tx.data.clone(), &tx.func_sig)
		.await
		.map_err(|e| AdapterError::Upstream(e.to_string()))?;

	let mut tx_hashes = op.tx_hashes.clone();
	tx_hashes.insert(tx.chain, leg);

	if let Some((key, value)) = callback_metadata_patch(tx) {
		let origin_leg = tx_hashes
			.entry(op.origin_chain)
			.or_insert_with(|| LegRecord { hash: String::new(), receipt: None, metadata: serde_json::json!({}) });
		match origin_leg.metadata.as_object_mut() {
			Some(obj) => {
				obj.insert(key.to_string(), value);
			},
			None => origin_leg.metadata = serde_json::json!({ key: value }),
		}
	}
	Ok(tx_hashes)
}

/// Maps a callback's function signature to the origin-leg metadata field the
/// next step (or a readiness/completion check) needs to read back, for the
/// bridges whose callback is more than a single terminal step.
fn callback_metadata_patch(tx: &poller_types::bridge::MemoizedTx) -> Option<(&'static str, serde_json::Value)> {
	match tx.func_sig.as_str() {
		"proveWithdrawalTransaction" => Some(("provenAt", serde_json::json!(chrono::Utc::now().timestamp()))),
		"finalizeWithdrawalTransaction" | "finalizeWithdrawal" => Some(("finalized", serde_json::json!(true))),
		_ => None,
	}
}

async fn complete_operation(app: &App, op: &RebalanceOperation) -> anyhow::Result<()> {
	app.store.update_rebalance_operation(op.id, OperationStatus::Completed, None, None).await?;
	app.metrics.record_rebalance_operation_completed(op.bridge.as_str(), (chrono::Utc::now() - op.created_at).num_seconds() as f64);
	if let Some(earmark_id) = op.earmark_id {
		let remaining = app.store.get_rebalance_operations_by_earmark(earmark_id).await?;
		if remaining.iter().all(|o| o.status == OperationStatus::Completed) {
			app.store.update_earmark_status(earmark_id, EarmarkStatus::Ready, serde_json::json!({})).await?;
		}
	}
	Ok(())
}

async fn cancel_operation(app: &App, op: &RebalanceOperation, reason: &str) -> anyhow::Result<()> {
	app.store.update_rebalance_operation(op.id, OperationStatus::Cancelled, None, Some(true)).await?;
	app.metrics.record_rebalance_operation_cancelled(op.bridge.as_str());
	warn!(operation_id = %op.id, reason, "bridge cancelled the transfer, operation marked cancelled");

	if let Some(earmark_id) = op.earmark_id {
		// Best-effort: a `NotFound` here just means the earmark was already
		// removed or reached a terminal state through some other path.
		if let Err(err) =
			app.store.update_earmark_status(earmark_id, EarmarkStatus::Failed, serde_json::json!({ "reason": reason })).await
		{
			warn!(earmark_id = %earmark_id, error = %err, "could not fail the parent earmark after a bridge cancellation");
		}
	}
	Ok(())
}

/// Phase B: routes whose free origin balance has drifted above its configured
/// maximum get a top-up operation with no backing earmark.
async fn top_up_drifted_routes(app: &App, request_id: &str, snapshot: &poller_oracle::BalanceSnapshot) -> anyhow::Result<()> {
	for route_cfg in &app.settings.routes {
		if let Err(err) = top_up_one_route(app, request_id, snapshot, route_cfg).await {
			warn!(request_id, origin = route_cfg.route.origin, destination = route_cfg.route.destination, error = %err, "route top-up failed this tick");
		}
	}
	Ok(())
}

async fn top_up_one_route(
	app: &App,
	request_id: &str,
	snapshot: &poller_oracle::BalanceSnapshot,
	route_cfg: &RouteRebalancingConfig,
) -> anyhow::Result<()> {
	let Some(ticker) = ticker_for_asset(app, route_cfg.route.origin, route_cfg.route.asset) else {
		return Ok(());
	};
	let balance = snapshot.balance_of(ticker, route_cfg.route.origin);
	if balance <= route_cfg.maximum {
		return Ok(());
	}
	let excess = (balance - route_cfg.maximum).saturating_sub(route_cfg.reserve);
	if excess.is_zero() {
		return Ok(());
	}

	let Some(sender) = app.oracle.read_address(route_cfg.route.origin) else { return Ok(()) };
	let Some(recipient) = app.oracle.read_address(route_cfg.route.destination) else { return Ok(()) };
	let (poller_chain_client::ChainAddress::Hex(sender), poller_chain_client::ChainAddress::Hex(recipient)) = (sender, recipient) else {
		return Ok(());
	};

	for (idx, &bridge_tag) in route_cfg.preferences.iter().enumerate() {
		let Some(adapter) = app.bridges.get(bridge_tag) else { continue };
		let Some(max_slippage) = route_cfg.slippage_budget_for(idx) else { continue };
		let quote = match adapter.quote(excess, &route_cfg.route).await {
			Ok(q) => q,
			Err(_) => continue,
		};
		let actual_dbps = poller_types::decimals::slippage_dbps(excess, quote);
		if actual_dbps.saturating_sub(adapter.headroom_dbps()) > max_slippage {
			continue;
		}

		let txs = match adapter.send(*sender, *recipient, excess, &route_cfg.route).await {
			Ok(txs) => txs,
			Err(err) => {
				warn!(request_id, bridge = ?bridge_tag, error = %err, "top-up send build failed, trying next preference");
				continue;
			},
		};

		let mut tx_hashes = std::collections::HashMap::new();
		let mut submitted_any = false;
		for tx in &txs {
			match submit_and_confirm(app, tx.chain, tx.to, tx.value, tx.data.clone(), &tx.func_sig).await {
				Ok((_, leg)) => {
					tx_hashes.insert(tx.chain, leg);
					submitted_any = true;
				},
				Err(err) => {
					warn!(request_id, bridge = ?bridge_tag, error = %err, "top-up leg submission stopped partway");
					break;
				},
			}
		}
		if !submitted_any {
			continue;
		}

		let now = chrono::Utc::now();
		let operation = RebalanceOperation {
			id: Uuid::new_v4(),
			earmark_id: None,
			origin_chain: route_cfg.route.origin,
			destination_chain: route_cfg.route.destination,
			ticker_hash: ticker,
			amount: excess,
			slippage_dbps: actual_dbps,
			bridge: bridge_tag,
			tx_hashes,
			status: OperationStatus::Pending,
			is_orphaned: false,
			created_at: now,
			updated_at: now,
		};
		app.store.create_rebalance_operation(&operation).await?;
		app.metrics.record_rebalance_operation_started(bridge_tag.as_str());
		info!(request_id, origin = route_cfg.route.origin, destination = route_cfg.route.destination, amount = %excess, "submitted route top-up");
		return Ok(());
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn route_of_carries_origin_and_destination_from_the_operation() {
		let now = chrono::Utc::now();
		let op = RebalanceOperation {
			id: Uuid::new_v4(),
			earmark_id: None,
			origin_chain: 1,
			destination_chain: 10,
			ticker_hash: [0u8; 32],
			amount: U256::from(1u64),
			slippage_dbps: 0,
			bridge: poller_types::bridge::BridgeTag::LiquidityPool,
			tx_hashes: Default::default(),
			status: OperationStatus::Pending,
			is_orphaned: false,
			created_at: now,
			updated_at: now,
		};
		let route = route_of(&op, ethers::types::Address::zero(), None);
		assert_eq!(route.origin, 1);
		assert_eq!(route.destination, 10);
	}

	#[test]
	fn callback_metadata_patch_recognizes_the_op_stack_and_zk_rollup_finalize_steps() {
		let prove = poller_types::bridge::MemoizedTx {
			memo: poller_types::bridge::TxMemo::Callback,
			chain: 1,
			to: ethers::types::Address::zero(),
			value: U256::zero(),
			data: Default::default(),
			func_sig: "proveWithdrawalTransaction".into(),
		};
		let (key, _) = callback_metadata_patch(&prove).expect("prove step should be recognized");
		assert_eq!(key, "provenAt");

		for func_sig in ["finalizeWithdrawalTransaction", "finalizeWithdrawal"] {
			let finalize = poller_types::bridge::MemoizedTx { func_sig: func_sig.into(), ..prove.clone() };
			let (key, value) = callback_metadata_patch(&finalize).expect("finalize step should be recognized");
			assert_eq!(key, "finalized");
			assert_eq!(value, serde_json::json!(true));
		}

		let unrelated = poller_types::bridge::MemoizedTx { func_sig: "deposit".into(), ..prove };
		assert!(callback_metadata_patch(&unrelated).is_none());
	}

	#[test]
	fn origin_receipt_of_is_none_without_an_origin_leg() {
		let now = chrono::Utc::now();
		let op = RebalanceOperation {
			id: Uuid::new_v4(),
			earmark_id: None,
			origin_chain: 1,
			destination_chain: 10,
			ticker_hash: [0u8; 32],
			amount: U256::from(1u64),
			slippage_dbps: 0,
			bridge: poller_types::bridge::BridgeTag::LiquidityPool,
			tx_hashes: Default::default(),
			status: OperationStatus::Pending,
			is_orphaned: false,
			created_at: now,
			updated_at: now,
		};
		assert!(origin_receipt_of(&op).is_none());
	}
}
