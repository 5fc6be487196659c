pub mod cex;
pub mod liquid_staking;
pub mod liquidity_pool;
pub mod optimistic_rollup;
pub mod zk_rollup;
