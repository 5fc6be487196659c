//! Invoice-purchasing loop (§4.7): observes the invoice feed, validates and
//! plans against the live balance snapshot, and submits on-chain purchases
//! plus whatever replenishment legs the planner attached to them.
//!
//! The [`PurchaseRecord`] cache that de-dupes purchases within a tick window
//! is deliberately in-process, not store-backed: it exists only to stop a
//! second tick from re-submitting an intent before the hub's own status
//! catches up, not to survive a restart (see [`PurchaseRecord`]'s own doc).

use std::{
	collections::{HashMap, HashSet},
	sync::OnceLock,
	time::{Duration, Instant},
};

use ethers::types::{Address, Bytes, H256, U256};
use poller_chain_client::{ChainAddress, UnsignedTx};
use poller_planner::{self as planner, PlannerContext, PlannerOutput};
use poller_types::{
	earmark::EarmarkStatus,
	errors::InvoiceRejectReason,
	invoice::{ChainId, Invoice, TickerHash},
	operation::{LegRecord, OperationStatus, RebalanceOperation},
	purchase::{PurchaseRecord, SubmissionKind},
	route::RebalanceRoute,
};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::wiring::App;

const RESOLVE_HASH_ATTEMPTS: u32 = 5;
const RESOLVE_HASH_INTERVAL: Duration = Duration::from_secs(2);
const RECEIPT_POLL_ATTEMPTS: u32 = 10;
const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(3);

fn purchase_cache() -> &'static AsyncMutex<HashMap<String, PurchaseRecord>> {
	static CACHE: OnceLock<AsyncMutex<HashMap<String, PurchaseRecord>>> = OnceLock::new();
	CACHE.get_or_init(|| AsyncMutex::new(HashMap::new()))
}

pub async fn run_once(app: &App, request_id: &str) -> anyhow::Result<()> {
	let tick_started = Instant::now();
	let now = chrono::Utc::now();

	let snapshot = app.oracle.tick().await;

	reconcile_purchase_cache(app).await;

	let invoices = match app.feed.list_invoices().await {
		Ok(invoices) => invoices,
		Err(err) => {
			warn!(request_id, error = %err, "invoice feed unavailable this tick, skipping");
			return Ok(());
		},
	};

	let mut custodied = snapshot.custodied.clone();
	for &ticker in &custodied.keys().copied().collect::<Vec<_>>() {
		let pending = app.hub.pending_incoming_for_domains(&app.settings.supported_settlement_domains, ticker).await;
		let entry = custodied.entry(ticker).or_default();
		for (domain, amount) in pending {
			*entry.entry(domain).or_default() += amount;
		}
	}

	let mut groups: HashMap<TickerHash, Vec<&Invoice>> = HashMap::new();
	for invoice in &invoices {
		app.metrics.record_possible_invoice_seen(&hex::encode(invoice.ticker_hash));
		groups.entry(invoice.ticker_hash).or_default().push(invoice);
	}
	for group in groups.values_mut() {
		group.sort_by_key(|inv| inv.queued_at);
	}

	let pending_origins = pending_origin_set(app).await?;

	for (ticker, group) in groups {
		process_group(app, request_id, now, &snapshot.balances, &custodied, ticker, &group, &pending_origins).await?;
	}

	info!(request_id, elapsed_ms = tick_started.elapsed().as_millis(), "purchase loop tick complete");
	Ok(())
}

/// Evicts cached [`PurchaseRecord`]s whose intent has reached a terminal hub
/// status. A reconciliation failure for one record is logged and leaves it
/// cached for the next tick to retry, per §4.7 step 2.
async fn reconcile_purchase_cache(app: &App) {
	let mut cache = purchase_cache().lock().await;
	let mut terminal = Vec::new();
	for intent_id in cache.keys() {
		match app.hub.intent_status(intent_id).await {
			Ok(status) if status.is_terminal() => terminal.push(intent_id.clone()),
			Ok(_) => {},
			Err(err) => warn!(intent_id, error = %err, "failed to reconcile cached purchase, leaving it in place"),
		}
	}
	for id in terminal {
		cache.remove(&id);
	}
}

/// Chains already committed as a purchase origin by a still-active earmark.
/// Approximated across every ticker rather than per-ticker: a chain tied up
/// fronting one invoice's purchase has that much less free balance available
/// for any other invoice regardless of ticker.
async fn pending_origin_set(app: &App) -> anyhow::Result<HashSet<ChainId>> {
	let mut set = HashSet::new();
	for &chain in &app.settings.supported_settlement_domains {
		if !app.store.get_active_earmarks_for_chain(chain).await?.is_empty() {
			set.insert(chain);
		}
	}
	Ok(set)
}

fn min_amounts_for_ticker(app: &App, ticker: TickerHash) -> HashMap<ChainId, U256> {
	app.settings
		.chains
		.values()
		.flat_map(|chain_cfg| chain_cfg.assets.iter())
		.filter(|asset| asset.ticker_hash == ticker)
		.map(|asset| (asset.chain, asset.balance_threshold))
		.collect()
}

fn reject_reason_label(reason: InvoiceRejectReason) -> &'static str {
	match reason {
		InvoiceRejectReason::InvalidFormat => "invalid_format",
		InvoiceRejectReason::InvalidOwner => "invalid_owner",
		InvoiceRejectReason::InvalidAge => "invalid_age",
		InvoiceRejectReason::DestinationXerc20 => "destination_xerc20",
		InvoiceRejectReason::TransactionFailed => "transaction_failed",
	}
}

/// §4.7 step 5: an invoice naming Mark's own service address as owner is
/// self-dealing, not a genuine third-party invoice to purchase.
fn is_mark_owned(owner: Address, mark_address: Option<&ChainAddress>) -> bool {
	matches!(mark_address, Some(ChainAddress::Hex(addr)) if owner == *addr)
}

/// §4.7 step 5. An invoice whose ticker has no [`AssetConfig`](poller_types::asset::AssetConfig)
/// on any allowed destination cannot be fulfilled through a route this system
/// understands, which is what `DestinationXerc20` models here.
fn validate_invoice(invoice: &Invoice, app: &App, now: chrono::DateTime<chrono::Utc>) -> Result<(), InvoiceRejectReason> {
	if invoice.id.is_empty() || invoice.amount_18.is_zero() || invoice.allowed_destination_chains.is_empty() {
		return Err(InvoiceRejectReason::InvalidFormat);
	}
	if is_mark_owned(invoice.owner, app.oracle.read_address(invoice.origin_chain)) {
		return Err(InvoiceRejectReason::InvalidOwner);
	}
	if invoice.age(now) < chrono::Duration::seconds(app.settings.invoice_age as i64) {
		return Err(InvoiceRejectReason::InvalidAge);
	}
	let reachable = invoice.allowed_destination_chains.iter().any(|chain| {
		app.settings
			.chains
			.get(chain)
			.is_some_and(|cfg| cfg.assets.iter().any(|a| a.ticker_hash == invoice.ticker_hash))
	});
	if !reachable {
		return Err(InvoiceRejectReason::DestinationXerc20);
	}
	Ok(())
}

async fn process_group(
	app: &App,
	request_id: &str,
	now: chrono::DateTime<chrono::Utc>,
	balances: &HashMap<TickerHash, HashMap<ChainId, U256>>,
	custodied: &HashMap<TickerHash, HashMap<ChainId, U256>>,
	ticker: TickerHash,
	group: &[&Invoice],
	pending_origins: &HashSet<ChainId>,
) -> anyhow::Result<()> {
	let min_amounts = min_amounts_for_ticker(app, ticker);
	let ctx = PlannerContext {
		balances,
		custodied,
		min_amounts: &min_amounts,
		domain_order: &app.settings.supported_settlement_domains,
		top_n: app.settings.supported_settlement_domains.len(),
		routes: &app.settings.routes,
		bridges: &app.bridges,
	};

	let already_purchased: HashSet<String> =
		purchase_cache().lock().await.values().map(|r| r.invoice_id.clone()).collect();

	let mut chosen_origin: Option<ChainId> = None;

	for (idx, invoice) in group.iter().enumerate() {
		let invoice_started = Instant::now();

		if already_purchased.contains(&invoice.id) {
			continue;
		}
		if app.store.get_earmark_for_invoice(&invoice.id).await?.is_some() {
			continue;
		}

		if let Err(reason) = validate_invoice(invoice, app, now) {
			app.metrics.record_invoice_rejected(reject_reason_label(reason));
			if app.settings.force_oldest_invoice && idx == 0 {
				return Ok(());
			}
			continue;
		}

		let mut candidates = planner::candidate_origins(invoice, &ctx, pending_origins);
		if let Some(origin) = chosen_origin {
			candidates.retain(|&c| c == origin);
		}
		if candidates.is_empty() {
			if app.settings.force_oldest_invoice && idx == 0 {
				return Ok(());
			}
			continue;
		}

		let mut planned = None;
		for &origin in &candidates {
			match planner::plan(invoice, origin, &ctx).await {
				Ok(output) => {
					planned = Some((origin, output));
					break;
				},
				Err(err) => {
					warn!(request_id, invoice_id = %invoice.id, origin, error = %err, "planner rejected candidate origin");
				},
			}
		}

		let Some((origin, output)) = planned else {
			if app.settings.force_oldest_invoice && idx == 0 {
				return Ok(());
			}
			continue;
		};

		match submit_purchase(app, request_id, invoice, origin, &output, invoice_started).await {
			Ok(()) => chosen_origin = Some(origin),
			Err(PurchaseError::Rejected) => app.metrics.record_invoice_rejected(reject_reason_label(InvoiceRejectReason::TransactionFailed)),
			Err(PurchaseError::Fatal(err)) => return Err(err),
		}
	}

	Ok(())
}

enum PurchaseError {
	/// Non-fatal: this invoice's purchase attempt failed, try the next invoice.
	Rejected,
	/// §7: `StoreError` other than `UniqueViolation` is fatal for the tick.
	Fatal(anyhow::Error),
}

/// Submits the on-chain purchase transaction, then the replenishment legs the
/// planner attached to it, then records the earmark, audit trail and metrics
/// (§4.7 steps 7-9).
async fn submit_purchase(
	app: &App,
	request_id: &str,
	invoice: &Invoice,
	origin: ChainId,
	output: &PlannerOutput,
	invoice_started: Instant,
) -> Result<(), PurchaseError> {
	let chain_cfg = app
		.settings
		.chains
		.get(&origin)
		.ok_or_else(|| PurchaseError::Fatal(anyhow::anyhow!("chain {origin} has no configuration")))?;
	let hub_contract = chain_cfg.deployments.everclear;

	let selector = ethers::utils::keccak256("fulfillIntent(string,address,uint256)".as_bytes());
	let mut data = selector[..4].to_vec();
	data.extend(ethers::abi::encode(&[
		ethers::abi::Token::String(invoice.id.clone()),
		ethers::abi::Token::Address(invoice.owner),
		ethers::abi::Token::Uint(invoice.amount_18),
	]));

	let submission = submit_and_confirm(app, origin, hub_contract, U256::zero(), Bytes::from(data), "fulfillIntent(string,address,uint256)").await;
	let (purchase_hash, _leg) = match submission {
		Ok(result) => result,
		Err(err) => {
			warn!(request_id, invoice_id = %invoice.id, error = %err, "purchase transaction failed");
			return Err(PurchaseError::Rejected);
		},
	};

	let mut initial_operations = Vec::with_capacity(output.operations.len());
	for op in &output.operations {
		let Some(adapter) = app.bridges.get(op.bridge) else {
			warn!(request_id, invoice_id = %invoice.id, bridge = ?op.bridge, "no adapter registered for planned leg, skipping replenishment");
			continue;
		};
		let Some(ChainAddress::Hex(sender)) = app.oracle.read_address(op.origin_chain) else {
			warn!(request_id, chain = op.origin_chain, "no hex read address for replenishment origin, skipping leg");
			continue;
		};
		let Some(ChainAddress::Hex(recipient)) = app.oracle.read_address(op.destination_chain) else {
			warn!(request_id, chain = op.destination_chain, "no hex read address for replenishment destination, skipping leg");
			continue;
		};
		let route = RebalanceRoute { origin: op.origin_chain, destination: op.destination_chain, asset: op.asset, destination_asset: op.destination_asset };

		let txs = match adapter.send(*sender, *recipient, op.amount, &route).await {
			Ok(txs) => txs,
			Err(err) => {
				warn!(request_id, invoice_id = %invoice.id, bridge = ?op.bridge, error = %err, "replenishment leg build failed, skipping");
				continue;
			},
		};

		let mut tx_hashes: HashMap<ChainId, LegRecord> = HashMap::new();
		for tx in &txs {
			match submit_and_confirm(app, tx.chain, tx.to, tx.value, tx.data.clone(), &tx.func_sig).await {
				Ok((_, leg)) => {
					tx_hashes.insert(tx.chain, leg);
				},
				Err(err) => {
					warn!(request_id, invoice_id = %invoice.id, chain = tx.chain, error = %err, "replenishment leg submission stopped partway");
					break;
				},
			}
		}

		let now = chrono::Utc::now();
		initial_operations.push(RebalanceOperation {
			id: Uuid::new_v4(),
			earmark_id: None,
			origin_chain: op.origin_chain,
			destination_chain: op.destination_chain,
			ticker_hash: op.ticker_hash,
			amount: op.amount,
			slippage_dbps: op.slippage_dbps,
			bridge: op.bridge,
			tx_hashes,
			status: OperationStatus::Pending,
			is_orphaned: false,
			created_at: now,
			updated_at: now,
		});
	}

	let earmark = app
		.store
		.create_earmark(&invoice.id, origin, invoice.ticker_hash, invoice.amount_18, initial_operations.clone())
		.await
		.map_err(|err| match err {
			poller_types::errors::StoreError::UniqueViolation { .. } => PurchaseError::Rejected,
			other => PurchaseError::Fatal(other.into()),
		})?;

	if !initial_operations.is_empty() {
		app.store
			.update_earmark_status(earmark.id, EarmarkStatus::Pending, serde_json::json!({ "operations": initial_operations.len() }))
			.await
			.map_err(|err| PurchaseError::Fatal(err.into()))?;
	}

	purchase_cache().lock().await.insert(
		invoice.id.clone(),
		PurchaseRecord {
			intent_id: invoice.id.clone(),
			invoice_id: invoice.id.clone(),
			purchase_chain: origin,
			amount: invoice.amount_18,
			submission_tx_hash: purchase_hash,
			submission_kind: SubmissionKind::OnChain,
			recorded_at: chrono::Utc::now(),
		},
	);

	app.metrics.record_successful_purchase(&origin.to_string());
	app.metrics.record_invoice_purchase_duration(invoice_started.elapsed().as_secs_f64());
	let reward_units = invoice.amount_18.saturating_mul(U256::from(invoice.discount_bps)) / U256::from(100_000u64);
	app.metrics.update_rewards(&origin.to_string(), reward_units.low_u64() as i64);

	Ok(())
}

/// Submits one transaction through `chain`'s configured [`Signer`](poller_signer::Signer),
/// resolves it to a real hash (polling a multisig-proposer handle until it
/// executes), then waits for the configured [`ChainClient`](poller_chain_client::ChainClient)
/// to observe a landed receipt.
pub(crate) async fn submit_and_confirm(
	app: &App,
	chain: ChainId,
	to: Address,
	value: U256,
	data: Bytes,
	func_sig: &str,
) -> anyhow::Result<(String, LegRecord)> {
	let signer = app.signers.get(&chain).ok_or_else(|| anyhow::anyhow!("no signer configured for chain {chain}"))?;
	let client = app.clients.get(&chain).ok_or_else(|| anyhow::anyhow!("no chain client configured for chain {chain}"))?;

	let handle = signer.submit(UnsignedTx { to: ChainAddress::Hex(to), value, data, func_sig: func_sig.to_string() }).await?;

	let mut hash: Option<H256> = None;
	for _ in 0..RESOLVE_HASH_ATTEMPTS {
		if let Some(h) = signer.resolve_hash(&handle).await? {
			hash = Some(h);
			break;
		}
		tokio::time::sleep(RESOLVE_HASH_INTERVAL).await;
	}
	let hash = hash.ok_or_else(|| anyhow::anyhow!("submission on chain {chain} did not resolve to a hash in time"))?;

	let mut receipt = None;
	for _ in 0..RECEIPT_POLL_ATTEMPTS {
		if let Some(r) = client.get_transaction_receipt(hash).await? {
			receipt = Some(r);
			break;
		}
		tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
	}
	let receipt = receipt.ok_or_else(|| anyhow::anyhow!("transaction {hash:?} on chain {chain} did not confirm in time"))?;
	if !receipt.status {
		anyhow::bail!("transaction {hash:?} on chain {chain} reverted");
	}

	let hash_hex = format!("{hash:?}");
	let leg = LegRecord { hash: hash_hex.clone(), receipt: serde_json::to_value(&receipt).ok(), metadata: serde_json::Value::Null };
	Ok((hash_hex, leg))
}

#[cfg(test)]
mod tests {
	use super::*;

	fn sample_invoice() -> Invoice {
		Invoice {
			id: "invoice-1".into(),
			ticker_hash: [1u8; 32],
			owner: Address::repeat_byte(7),
			origin_chain: 1,
			allowed_destination_chains: vec![1, 10],
			amount_18: U256::from(1_000u64),
			discount_bps: 50,
			queued_at: chrono::Utc::now() - chrono::Duration::seconds(120),
			hub_status: poller_types::invoice::HubStatus::Queued,
		}
	}

	#[test]
	fn reject_reason_label_covers_every_variant() {
		for reason in [
			InvoiceRejectReason::InvalidFormat,
			InvoiceRejectReason::InvalidOwner,
			InvoiceRejectReason::InvalidAge,
			InvoiceRejectReason::DestinationXerc20,
			InvoiceRejectReason::TransactionFailed,
		] {
			assert!(!reject_reason_label(reason).is_empty());
		}
	}

	#[test]
	fn is_mark_owned_flags_invoices_naming_marks_own_address() {
		let mark = Address::repeat_byte(7);
		assert!(is_mark_owned(mark, Some(&ChainAddress::Hex(mark))));
		assert!(!is_mark_owned(Address::repeat_byte(3), Some(&ChainAddress::Hex(mark))));
		assert!(!is_mark_owned(Address::zero(), Some(&ChainAddress::Hex(mark))));
		assert!(!is_mark_owned(mark, None));
	}
}
