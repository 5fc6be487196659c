//! Route Planner (§4.5). Given an invoice and the live balance/custodied
//! snapshot, decides which chain fronts the purchase and which rebalance
//! legs replenish it, then classifies and sizes each leg against its
//! configured bridge preferences under a slippage budget.

use std::collections::{HashMap, HashSet};

use ethers::types::{Address, U256};
use poller_bridges::BridgeRegistry;
use poller_types::{
	bridge::BridgeTag,
	decimals::{slippage_adjusted_send_amount, slippage_dbps, DBPS_DENOMINATOR},
	errors::{QuoteError, SlippageExceeded},
	invoice::{ChainId, Invoice, TickerHash},
	operation::PlannedRebalanceOperation,
	route::{RebalanceRoute, RouteRebalancingConfig},
};

#[derive(Debug, thiserror::Error)]
pub enum PlannerError {
	#[error("no candidate origin had sufficient balance for this invoice")]
	NoCandidateOrigin,
	#[error(transparent)]
	Quote(#[from] QuoteError),
	#[error(transparent)]
	Slippage(#[from] SlippageExceeded),
}

#[derive(Debug, Clone, Default)]
pub struct PlannerOutput {
	pub operations: Vec<PlannedRebalanceOperation>,
	/// Amount backing the purchase: equal to the invoice amount once a valid
	/// candidate origin is found, since candidate-origin selection already
	/// requires that chain's own balance to cover it in full.
	pub produced_amount: U256,
	/// Portion of the replenishment need the allocation pass could not source
	/// from any configured domain within the cap and its one retry. Never
	/// blocks the purchase; logged so operators can see the gap.
	pub remainder: U256,
	pub chosen_origin: ChainId,
}

/// Everything the planner needs that isn't per-invoice: the live snapshot and
/// static routing configuration.
pub struct PlannerContext<'a> {
	pub balances: &'a HashMap<TickerHash, HashMap<ChainId, U256>>,
	pub custodied: &'a HashMap<TickerHash, HashMap<ChainId, U256>>,
	pub min_amounts: &'a HashMap<ChainId, U256>,
	pub domain_order: &'a [ChainId],
	pub top_n: usize,
	pub routes: &'a [RouteRebalancingConfig],
	pub bridges: &'a BridgeRegistry,
}

/// Step 1: invoice destinations where our balance already covers the full
/// invoice amount, pruned of origins tied up by a currently-pending purchase.
pub fn candidate_origins(
	invoice: &Invoice,
	ctx: &PlannerContext<'_>,
	pending_origins: &HashSet<ChainId>,
) -> Vec<ChainId> {
	let balances_for_ticker = ctx.balances.get(&invoice.ticker_hash);
	invoice
		.allowed_destination_chains
		.iter()
		.copied()
		.filter(|chain| !pending_origins.contains(chain))
		.filter(|chain| {
			let balance = balances_for_ticker.and_then(|m| m.get(chain)).copied().unwrap_or_default();
			let min_amount = ctx.min_amounts.get(chain).copied().unwrap_or_default();
			balance >= min_amount && balance >= invoice.amount_18
		})
		.collect()
}

struct Allocation {
	domain: ChainId,
	amount: U256,
}

/// Step 2+3: walk `domain_order`, consuming custodied balances on domains
/// other than `origin` up to `invoice.amount_18`, capped at `top_n` domains;
/// if the cap left a shortfall, retry once unconstrained by the cap over the
/// remaining domains. Among origin candidates the caller tries in
/// `domain-list order` (tie-break), the first exhausted here is reused.
fn allocate(origin: ChainId, needed: U256, ctx: &PlannerContext<'_>, ticker: TickerHash) -> (Vec<Allocation>, U256) {
	let custodied = ctx.custodied.get(&ticker);
	let mut remaining = needed;
	let mut allocations = Vec::new();
	let mut used: HashSet<ChainId> = HashSet::new();

	for &domain in ctx.domain_order.iter().filter(|&&d| d != origin) {
		if remaining.is_zero() || allocations.len() >= ctx.top_n {
			break;
		}
		let available = custodied.and_then(|m| m.get(&domain)).copied().unwrap_or_default();
		if available.is_zero() {
			continue;
		}
		let take = std::cmp::min(available, remaining);
		remaining -= take;
		allocations.push(Allocation { domain, amount: take });
		used.insert(domain);
	}

	if !remaining.is_zero() {
		// Retry once, unconstrained by the top-N cap, over domains not yet used.
		for &domain in ctx.domain_order.iter().filter(|&&d| d != origin && !used.contains(&d)) {
			if remaining.is_zero() {
				break;
			}
			let available = custodied.and_then(|m| m.get(&domain)).copied().unwrap_or_default();
			if available.is_zero() {
				continue;
			}
			let take = std::cmp::min(available, remaining);
			remaining -= take;
			allocations.push(Allocation { domain, amount: take });
			used.insert(domain);
		}
	}

	(allocations, remaining)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum RoutePriority {
	SameChainSwap = 0,
	Direct = 1,
	SwapAndBridge = 2,
	Unknown = 3,
}

fn classify(route: &RebalanceRoute) -> RoutePriority {
	if route.is_same_chain_swap() {
		RoutePriority::SameChainSwap
	} else if route.is_direct() {
		RoutePriority::Direct
	} else if route.is_swap_and_bridge() {
		RoutePriority::SwapAndBridge
	} else {
		RoutePriority::Unknown
	}
}

/// Picks the configured corridor between two chains, breaking ties between
/// multiple declared route kinds (e.g. a direct entry and a swap+bridge entry
/// for the same chain pair) by the priority order §4.5 step 4 specifies:
/// same-chain-swap < direct < swap+bridge < unknown.
fn select_route_config<'a>(
	routes: &'a [RouteRebalancingConfig],
	origin: ChainId,
	destination: ChainId,
) -> Option<&'a RouteRebalancingConfig> {
	routes.iter().filter(|r| r.route.origin == origin && r.route.destination == destination).min_by_key(|r| classify(&r.route))
}

/// Walks a route config's bridge preferences for one allocated leg, returning
/// the first preference whose quote clears the slippage budget (minus the
/// adapter's own headroom).
async fn plan_direct_leg(
	origin: ChainId,
	destination: ChainId,
	ticker: TickerHash,
	asset: Address,
	amount_available: U256,
	needed: U256,
	config: &RouteRebalancingConfig,
	ctx: &PlannerContext<'_>,
) -> Option<PlannedRebalanceOperation> {
	for (idx, &bridge_tag) in config.preferences.iter().enumerate() {
		let Some(adapter) = ctx.bridges.get(bridge_tag) else { continue };
		let Some(max_slippage) = config.slippage_budget_for(idx) else { continue };
		let budget = max_slippage.saturating_sub(adapter.headroom_dbps());

		let estimated = std::cmp::min(slippage_adjusted_send_amount(needed, budget), amount_available);
		let route = RebalanceRoute { origin, destination, asset, destination_asset: None };

		let Ok(quote) = adapter.quote(estimated, &route).await else { continue };
		let actual_dbps = slippage_dbps(estimated, quote);
		if actual_dbps > budget {
			continue;
		}

		let (final_amount, final_output) = if quote > needed {
			// Over-produced: re-quote a scaled-down amount buffered by the
			// adapter's headroom, then keep the smaller of the two valid quotes.
			let scaled = needed.saturating_mul((DBPS_DENOMINATOR + adapter.headroom_dbps() as u64).into())
				/ DBPS_DENOMINATOR;
			let scaled = std::cmp::min(scaled, amount_available);
			match adapter.quote(scaled, &route).await {
				Ok(rescaled_quote) if rescaled_quote <= quote => (scaled, rescaled_quote),
				_ => (estimated, quote),
			}
		} else {
			(estimated, quote)
		};

		return Some(PlannedRebalanceOperation {
			origin_chain: origin,
			destination_chain: destination,
			ticker_hash: ticker,
			asset,
			destination_asset: None,
			amount: final_amount,
			expected_output_amount: final_output,
			slippage_dbps: actual_dbps,
			bridge: bridge_tag,
			swap_bridge: None,
		});
	}
	None
}

/// Proportionally rescales a swap leg and its downstream bridge leg so the
/// final 18-dp output lands exactly on `target_needed`, given the amounts the
/// unscaled plan projected for each.
pub fn adjust_swap_bridge_amounts(
	projected_swap_output: U256,
	projected_bridge_output: U256,
	target_needed: U256,
) -> (U256, U256) {
	if projected_bridge_output.is_zero() {
		return (U256::zero(), U256::zero());
	}
	let scale_numerator = target_needed;
	let scale_denominator = projected_bridge_output;
	let swap_scaled = projected_swap_output.saturating_mul(scale_numerator) / scale_denominator;
	let bridge_scaled = projected_bridge_output.saturating_mul(scale_numerator) / scale_denominator;
	(swap_scaled, bridge_scaled)
}

/// Walks a route config's swap preferences (the same-chain leg of a
/// same-chain-swap or swap+bridge route), sized with the slippage budget at
/// the same index as `preferences` since there is no independent budget list
/// for swap preferences. Unlike [`plan_direct_leg`]'s over-produce
/// correction, a single scaling retry here only fires when the first quote
/// falls *short* of `needed`, per §4.5 step 4's same-chain-swap sizing.
///
/// Returns `(amount_in, amount_out, slippage_dbps, bridge_tag)`.
async fn plan_swap_leg(
	chain: ChainId,
	asset: Address,
	destination_asset: Address,
	amount_available: U256,
	needed: U256,
	config: &RouteRebalancingConfig,
	ctx: &PlannerContext<'_>,
) -> Option<(U256, U256, u32, BridgeTag)> {
	let route = RebalanceRoute { origin: chain, destination: chain, asset, destination_asset: Some(destination_asset) };

	for (idx, &swap_tag) in config.swap_preferences.iter().enumerate() {
		let Some(adapter) = ctx.bridges.get(swap_tag) else { continue };
		let Some(max_slippage) = config.slippage_budget_for(idx) else { continue };
		let budget = max_slippage.saturating_sub(adapter.headroom_dbps());

		let estimated = std::cmp::min(slippage_adjusted_send_amount(needed, budget), amount_available);
		let Ok(quote) = adapter.quote(estimated, &route).await else { continue };
		let actual_dbps = slippage_dbps(estimated, quote);
		if actual_dbps > budget {
			continue;
		}

		if quote >= needed {
			return Some((estimated, quote, actual_dbps, swap_tag));
		}

		// Quote fell short of what's needed: a single retry scaled up by the
		// shortfall ratio, capped at what's actually available.
		let scaled = std::cmp::min(estimated.saturating_mul(needed) / quote.max(U256::one()), amount_available);
		match adapter.quote(scaled, &route).await {
			Ok(rescaled_quote) => {
				let rescaled_dbps = slippage_dbps(scaled, rescaled_quote);
				if rescaled_dbps <= budget {
					return Some((scaled, rescaled_quote, rescaled_dbps, swap_tag));
				}
			},
			Err(_) => continue,
		}
	}
	None
}

/// **Same-chain swap** (§4.5 step 4): converts an asset already held on
/// `chain` into the ticker's settlement asset, with no bridging leg.
async fn plan_same_chain_swap_leg(
	chain: ChainId,
	ticker: TickerHash,
	asset: Address,
	destination_asset: Address,
	amount_available: U256,
	needed: U256,
	config: &RouteRebalancingConfig,
	ctx: &PlannerContext<'_>,
) -> Option<PlannedRebalanceOperation> {
	let (amount_in, amount_out, slippage_dbps, swap_tag) =
		plan_swap_leg(chain, asset, destination_asset, amount_available, needed, config, ctx).await?;

	Some(PlannedRebalanceOperation {
		origin_chain: chain,
		destination_chain: chain,
		ticker_hash: ticker,
		asset,
		destination_asset: Some(destination_asset),
		amount: amount_in,
		expected_output_amount: amount_out,
		slippage_dbps,
		bridge: swap_tag,
		swap_bridge: None,
	})
}

/// **Swap+bridge** (§4.5 step 4): works backwards from the destination need
/// through the bridge leg's slippage budget to size the swap leg, plans the
/// swap, then bridges the swap's output and proportionally rescales both legs
/// with [`adjust_swap_bridge_amounts`] so the final 18-dp output lands
/// exactly on `needed`.
async fn plan_swap_and_bridge_leg(
	origin: ChainId,
	destination: ChainId,
	ticker: TickerHash,
	asset: Address,
	destination_asset: Address,
	amount_available: U256,
	needed: U256,
	config: &RouteRebalancingConfig,
	ctx: &PlannerContext<'_>,
) -> Option<PlannedRebalanceOperation> {
	for (idx, &bridge_tag) in config.preferences.iter().enumerate() {
		let Some(bridge_adapter) = ctx.bridges.get(bridge_tag) else { continue };
		let Some(max_bridge_slippage) = config.slippage_budget_for(idx) else { continue };
		let bridge_budget = max_bridge_slippage.saturating_sub(bridge_adapter.headroom_dbps());

		let needed_after_swap = slippage_adjusted_send_amount(needed, bridge_budget);

		let Some((swap_amount_in, swap_amount_out, _swap_dbps, swap_tag)) =
			plan_swap_leg(origin, asset, destination_asset, amount_available, needed_after_swap, config, ctx).await
		else {
			continue;
		};

		let bridge_route = RebalanceRoute { origin, destination, asset: destination_asset, destination_asset: None };
		let Ok(bridge_quote) = bridge_adapter.quote(swap_amount_out, &bridge_route).await else { continue };
		let actual_bridge_dbps = slippage_dbps(swap_amount_out, bridge_quote);
		if actual_bridge_dbps > bridge_budget {
			continue;
		}

		// Rescale both legs so the final output lands exactly on `needed`,
		// per §4.5 step 4 and §8 invariant 3.
		let (_, bridge_final) = adjust_swap_bridge_amounts(swap_amount_out, bridge_quote, needed);
		let amount_final =
			std::cmp::min(swap_amount_in.saturating_mul(needed) / bridge_quote.max(U256::one()), amount_available);

		return Some(PlannedRebalanceOperation {
			origin_chain: origin,
			destination_chain: destination,
			ticker_hash: ticker,
			asset,
			destination_asset: Some(destination_asset),
			amount: amount_final,
			expected_output_amount: bridge_final,
			slippage_dbps: actual_bridge_dbps,
			bridge: bridge_tag,
			swap_bridge: Some(swap_tag),
		});
	}
	None
}

/// Plans the full set of replenishment operations for one invoice once a
/// candidate origin has been selected.
pub async fn plan(
	invoice: &Invoice,
	chosen_origin: ChainId,
	ctx: &PlannerContext<'_>,
) -> Result<PlannerOutput, PlannerError> {
	let (allocations, remainder) = allocate(chosen_origin, invoice.amount_18, ctx, invoice.ticker_hash);

	let mut operations = Vec::with_capacity(allocations.len());
	for allocation in &allocations {
		let available = ctx
			.custodied
			.get(&invoice.ticker_hash)
			.and_then(|m| m.get(&allocation.domain))
			.copied()
			.unwrap_or_default();

		// Resolve the configured corridor between this domain and the chosen
		// origin, tie-broken by route-kind priority (§4.5 step 4) when more
		// than one entry covers the same chain pair.
		let Some(matching_route) = select_route_config(ctx.routes, allocation.domain, chosen_origin) else {
			continue;
		};

		let planned = match classify(&matching_route.route) {
			RoutePriority::SameChainSwap => match matching_route.route.destination_asset {
				Some(destination_asset) => {
					plan_same_chain_swap_leg(
						allocation.domain,
						invoice.ticker_hash,
						matching_route.route.asset,
						destination_asset,
						available,
						allocation.amount,
						matching_route,
						ctx,
					)
					.await
				},
				None => None,
			},
			RoutePriority::Direct => {
				plan_direct_leg(
					allocation.domain,
					chosen_origin,
					invoice.ticker_hash,
					matching_route.route.asset,
					available,
					allocation.amount,
					matching_route,
					ctx,
				)
				.await
			},
			RoutePriority::SwapAndBridge => match matching_route.route.destination_asset {
				Some(destination_asset) => {
					plan_swap_and_bridge_leg(
						allocation.domain,
						chosen_origin,
						invoice.ticker_hash,
						matching_route.route.asset,
						destination_asset,
						available,
						allocation.amount,
						matching_route,
						ctx,
					)
					.await
				},
				None => None,
			},
			RoutePriority::Unknown => None,
		};

		if let Some(op) = planned {
			operations.push(op);
		}
	}

	Ok(PlannerOutput { operations, produced_amount: invoice.amount_18, remainder, chosen_origin })
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn route_priority_orders_same_chain_swap_before_direct_before_swap_and_bridge() {
		let same_chain =
			RebalanceRoute { origin: 1, destination: 1, asset: Address::zero(), destination_asset: Some(Address::repeat_byte(1)) };
		let direct = RebalanceRoute { origin: 1, destination: 10, asset: Address::zero(), destination_asset: None };
		let swap_and_bridge =
			RebalanceRoute { origin: 1, destination: 10, asset: Address::zero(), destination_asset: Some(Address::repeat_byte(1)) };

		assert!(classify(&same_chain) < classify(&direct));
		assert!(classify(&direct) < classify(&swap_and_bridge));
	}

	#[test]
	fn adjust_swap_bridge_amounts_scales_to_exact_target() {
		let (swap, bridge) = adjust_swap_bridge_amounts(U256::from(1_000u64), U256::from(900u64), U256::from(450u64));
		// bridge output should land exactly on target; swap scales by the same ratio.
		assert_eq!(bridge, U256::from(450u64));
		assert_eq!(swap, U256::from(500u64));
	}

	#[test]
	fn allocation_caps_at_top_n_then_retries_once_over_remaining_domains() {
		let mut custodied = HashMap::new();
		let ticker = [0u8; 32];
		custodied.insert(ticker, HashMap::from([(1u64, U256::from(1u64)), (10u64, U256::from(1u64)), (56u64, U256::from(5u64))]));
		let balances = HashMap::new();
		let min_amounts = HashMap::new();
		let routes = vec![];
		let registry = BridgeRegistry::new();
		let ctx = PlannerContext {
			balances: &balances,
			custodied: &custodied,
			min_amounts: &min_amounts,
			domain_order: &[1, 10, 56],
			top_n: 2,
			routes: &routes,
			bridges: &registry,
		};
		let (allocations, remainder) = allocate(8453, U256::from(5u64), &ctx, ticker);
		// top-N=2 first consumes domains 1 and 10 (1+1=2), leaving remaining=3;
		// retry picks up domain 56 (5 available) for the rest.
		assert_eq!(allocations.len(), 3);
		assert_eq!(remainder, U256::zero());
	}

	#[test]
	fn allocation_leaves_a_logged_remainder_when_domains_are_exhausted() {
		let mut custodied = HashMap::new();
		let ticker = [0u8; 32];
		custodied.insert(ticker, HashMap::from([(1u64, U256::from(2u64))]));
		let balances = HashMap::new();
		let min_amounts = HashMap::new();
		let routes = vec![];
		let registry = BridgeRegistry::new();
		let ctx = PlannerContext {
			balances: &balances,
			custodied: &custodied,
			min_amounts: &min_amounts,
			domain_order: &[1],
			top_n: 5,
			routes: &routes,
			bridges: &registry,
		};
		let (_allocations, remainder) = allocate(8453, U256::from(6u64), &ctx, ticker);
		assert_eq!(remainder, U256::from(4u64));
	}

	struct FixedQuoteAdapter {
		tag: poller_types::bridge::BridgeTag,
		output_per_unit_sent_num: u64,
		output_per_unit_sent_den: u64,
	}

	#[async_trait::async_trait]
	impl poller_bridges::BridgeAdapter for FixedQuoteAdapter {
		fn kind(&self) -> poller_types::bridge::BridgeTag {
			self.tag
		}

		async fn quote(
			&self,
			amount: U256,
			_route: &RebalanceRoute,
		) -> Result<U256, poller_types::errors::QuoteError> {
			Ok(amount.saturating_mul(U256::from(self.output_per_unit_sent_num)) / U256::from(self.output_per_unit_sent_den))
		}

		async fn minimum(&self, _route: &RebalanceRoute) -> Option<U256> {
			None
		}

		async fn send(
			&self,
			_sender: Address,
			_recipient: Address,
			_amount: U256,
			_route: &RebalanceRoute,
		) -> Result<Vec<poller_types::bridge::MemoizedTx>, poller_bridges::AdapterError> {
			unreachable!("not exercised by planning tests")
		}

		async fn ready_on_destination(
			&self,
			_amount: U256,
			_route: &RebalanceRoute,
			_origin_receipt: &poller_bridges::OriginReceipt,
		) -> Result<bool, poller_bridges::AdapterError> {
			unreachable!("not exercised by planning tests")
		}

		async fn destination_callback(
			&self,
			_route: &RebalanceRoute,
			_origin_receipt: &poller_bridges::OriginReceipt,
		) -> Result<Option<poller_types::bridge::MemoizedTx>, poller_bridges::AdapterError> {
			unreachable!("not exercised by planning tests")
		}

		async fn is_callback_complete(
			&self,
			_route: &RebalanceRoute,
			_origin_receipt: &poller_bridges::OriginReceipt,
		) -> Result<bool, poller_bridges::AdapterError> {
			unreachable!("not exercised by planning tests")
		}
	}

	fn sample_invoice(amount_18: U256, origin_chain: ChainId, allowed: Vec<ChainId>) -> poller_types::invoice::Invoice {
		poller_types::invoice::Invoice {
			id: "inv-1".into(),
			ticker_hash: [0u8; 32],
			owner: Address::repeat_byte(9),
			origin_chain,
			allowed_destination_chains: allowed,
			amount_18,
			discount_bps: 0,
			queued_at: chrono::Utc::now(),
			hub_status: poller_types::invoice::HubStatus::Queued,
		}
	}

	/// §8 invariant 2: `expectedOutputAmount` for a planned leg falls within the
	/// slippage budget's bound around the routed (sent) amount.
	#[tokio::test]
	async fn planned_operation_output_respects_slippage_bound() {
		let ticker = [0u8; 32];
		let mut custodied = HashMap::new();
		custodied.insert(ticker, HashMap::from([(10u64, U256::from(1_000_000u64))]));
		let balances = HashMap::new();
		let min_amounts = HashMap::new();

		let route = RebalanceRoute { origin: 10, destination: 1, asset: Address::repeat_byte(1), destination_asset: None };
		let routes = vec![RouteRebalancingConfig {
			route: route.clone(),
			preferences: vec![poller_types::bridge::BridgeTag::LiquidityPool],
			slippages_dbps: vec![1_000], // 1% budget
			swap_preferences: vec![],
			maximum: U256::zero(),
			reserve: U256::zero(),
		}];

		let mut registry = BridgeRegistry::new();
		// 0.5% loss: within the 1% budget.
		registry.register(std::sync::Arc::new(FixedQuoteAdapter {
			tag: poller_types::bridge::BridgeTag::LiquidityPool,
			output_per_unit_sent_num: 995,
			output_per_unit_sent_den: 1_000,
		}));

		let ctx = PlannerContext {
			balances: &balances,
			custodied: &custodied,
			min_amounts: &min_amounts,
			domain_order: &[10, 1],
			top_n: 5,
			routes: &routes,
			bridges: &registry,
		};

		let invoice = sample_invoice(U256::from(500_000u64), 1, vec![1]);
		let output = plan(&invoice, 1, &ctx).await.unwrap();
		assert_eq!(output.operations.len(), 1);
		let op = &output.operations[0];

		let sent = op.amount;
		let upper_bound = sent.saturating_mul(U256::from(100_000u64)) / U256::from(100_000u64 - op.slippage_dbps as u64);
		let lower_bound = sent.saturating_mul(U256::from(100_000u64 - op.slippage_dbps as u64)) / U256::from(100_000u64);
		assert!(op.expected_output_amount <= upper_bound);
		assert!(op.expected_output_amount >= lower_bound);
		assert!(op.slippage_dbps <= 1_000);
	}

	/// §8 invariant 3: `producedAmount == invoice.amount_18` whenever a plan is
	/// accepted, and it never exceeds what was actually needed.
	#[tokio::test]
	async fn produced_amount_equals_invoice_amount_and_never_exceeds_need() {
		let ticker = [0u8; 32];
		let mut custodied = HashMap::new();
		custodied.insert(ticker, HashMap::from([(10u64, U256::from(2_000_000u64))]));
		let balances = HashMap::new();
		let min_amounts = HashMap::new();

		let route = RebalanceRoute { origin: 10, destination: 1, asset: Address::repeat_byte(1), destination_asset: None };
		let routes = vec![RouteRebalancingConfig {
			route,
			preferences: vec![poller_types::bridge::BridgeTag::LiquidityPool],
			slippages_dbps: vec![1_000],
			swap_preferences: vec![],
			maximum: U256::zero(),
			reserve: U256::zero(),
		}];

		let mut registry = BridgeRegistry::new();
		registry.register(std::sync::Arc::new(FixedQuoteAdapter {
			tag: poller_types::bridge::BridgeTag::LiquidityPool,
			output_per_unit_sent_num: 1_000,
			output_per_unit_sent_den: 1_000,
		}));

		let ctx = PlannerContext {
			balances: &balances,
			custodied: &custodied,
			min_amounts: &min_amounts,
			domain_order: &[10, 1],
			top_n: 5,
			routes: &routes,
			bridges: &registry,
		};

		let needed = U256::from(1_000_000u64);
		let invoice = sample_invoice(needed, 1, vec![1]);
		let output = plan(&invoice, 1, &ctx).await.unwrap();

		assert_eq!(output.produced_amount, invoice.amount_18);
		let routed_total: U256 = output.operations.iter().fold(U256::zero(), |acc, op| acc + op.amount);
		assert!(routed_total <= needed);
		assert_eq!(output.remainder, U256::zero());
	}

	/// §8 invariant 3, swap+bridge case: the bridge leg's output must land
	/// exactly on the allocated amount even though the swap leg quotes at a
	/// different ratio than the bridge leg.
	#[tokio::test]
	async fn swap_and_bridge_leg_output_lands_exactly_on_needed() {
		let ticker = [0u8; 32];
		let mut custodied = HashMap::new();
		custodied.insert(ticker, HashMap::from([(10u64, U256::from(10_000_000u64))]));
		let balances = HashMap::new();
		let min_amounts = HashMap::new();

		let destination_asset = Address::repeat_byte(2);
		let route = RebalanceRoute {
			origin: 10,
			destination: 1,
			asset: Address::repeat_byte(1),
			destination_asset: Some(destination_asset),
		};
		let routes = vec![RouteRebalancingConfig {
			route,
			preferences: vec![poller_types::bridge::BridgeTag::LiquidityPool],
			slippages_dbps: vec![2_000], // 2% budget, shared by both the bridge leg and (positionally) the swap leg
			swap_preferences: vec![poller_types::bridge::BridgeTag::CentralizedExchange],
			maximum: U256::zero(),
			reserve: U256::zero(),
		}];

		let mut registry = BridgeRegistry::new();
		// Swap leg loses 0.2%, bridge leg loses 0.5% — both well inside budget,
		// and at different ratios so the rescale step is actually exercised.
		registry.register(std::sync::Arc::new(FixedQuoteAdapter {
			tag: poller_types::bridge::BridgeTag::CentralizedExchange,
			output_per_unit_sent_num: 998,
			output_per_unit_sent_den: 1_000,
		}));
		registry.register(std::sync::Arc::new(FixedQuoteAdapter {
			tag: poller_types::bridge::BridgeTag::LiquidityPool,
			output_per_unit_sent_num: 995,
			output_per_unit_sent_den: 1_000,
		}));

		let ctx = PlannerContext {
			balances: &balances,
			custodied: &custodied,
			min_amounts: &min_amounts,
			domain_order: &[10, 1],
			top_n: 5,
			routes: &routes,
			bridges: &registry,
		};

		let needed = U256::from(1_000_000u64);
		let invoice = sample_invoice(needed, 1, vec![1]);
		let output = plan(&invoice, 1, &ctx).await.unwrap();

		assert_eq!(output.operations.len(), 1);
		let op = &output.operations[0];
		assert_eq!(op.destination_asset, Some(destination_asset));
		assert_eq!(op.swap_bridge, Some(poller_types::bridge::BridgeTag::CentralizedExchange));
		assert_eq!(op.bridge, poller_types::bridge::BridgeTag::LiquidityPool);
		// The rescale in `plan_swap_and_bridge_leg` forces this to hold exactly.
		assert_eq!(op.expected_output_amount, needed);
	}
}
