//! Process entrypoint: loads configuration, wires the chain clients,
//! signers, bridge adapters and state store, then runs the purchase and
//! rebalance loops on independent periodic cadences.

mod purchase_loop;
mod rebalance_loop;
mod wiring;

use std::time::Duration;

use clap::Parser;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "poller", about = "Cross-chain inventory poller")]
struct Cli {
	/// Directory containing `default.{toml,yaml,json}`.
	#[arg(long, default_value = "config")]
	config_dir: String,

	/// Purchase loop cadence, in seconds.
	#[arg(long, default_value_t = 15)]
	purchase_interval_secs: u64,

	/// Rebalance loop cadence, in seconds.
	#[arg(long, default_value_t = 30)]
	rebalance_interval_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	tracing_subscriber::fmt()
		.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
		.json()
		.try_init()
		.map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))?;

	let cli = Cli::parse();
	info!(config_dir = %cli.config_dir, "starting poller");

	let app = wiring::build(&cli.config_dir).await?;

	let mut purchase_ticker = tokio::time::interval(Duration::from_secs(cli.purchase_interval_secs));
	let mut rebalance_ticker = tokio::time::interval(Duration::from_secs(cli.rebalance_interval_secs));

	loop {
		tokio::select! {
			_ = purchase_ticker.tick() => {
				let request_id = uuid::Uuid::new_v4().to_string();
				if let Err(err) = purchase_loop::run_once(&app, &request_id).await {
					error!(request_id, error = %err, "purchase loop tick failed");
				}
			}
			_ = rebalance_ticker.tick() => {
				let request_id = uuid::Uuid::new_v4().to_string();
				if let Err(err) = rebalance_loop::run_once(&app, &request_id).await {
					error!(request_id, error = %err, "rebalance loop tick failed");
				}
			}
		}
	}
}
