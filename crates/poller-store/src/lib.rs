//! State Store (§4.6). Owns the `earmarks`, `rebalance_operations` and
//! `earmark_audit_log` tables exclusively; every mutation method runs inside
//! one transaction that also appends the audit-log row describing it.
//!
//! The loops hold no authoritative state of their own — on restart they
//! reconcile purely by re-querying this store.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use poller_types::{
	earmark::{Earmark, EarmarkStatus},
	errors::StoreError,
	invoice::{ChainId, TickerHash},
	operation::{LegRecord, OperationStatus, RebalanceOperation},
};
use sqlx::{postgres::PgPoolOptions, PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

fn map_sqlx_error(err: sqlx::Error) -> StoreError {
	if let sqlx::Error::Database(ref db_err) = err {
		// Postgres error code 23505 is unique_violation.
		if db_err.code().as_deref() == Some("23505") {
			return StoreError::UniqueViolation { invoice_id: String::new() };
		}
	}
	if matches!(err, sqlx::Error::RowNotFound) {
		return StoreError::NotFound;
	}
	StoreError::Database(err.to_string())
}

pub struct StateStore {
	pool: PgPool,
}

impl StateStore {
	pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
		let pool = PgPoolOptions::new()
			.max_connections(max_connections)
			.connect(database_url)
			.await
			.map_err(map_sqlx_error)?;
		Ok(Self { pool })
	}

	pub async fn run_migrations(&self) -> Result<(), StoreError> {
		sqlx::migrate!("./migrations").run(&self.pool).await.map_err(|e| StoreError::Database(e.to_string()))
	}

	/// Atomically inserts the earmark row plus any initial operations, with one
	/// audit-log entry per row created.
	pub async fn create_earmark(
		&self,
		invoice_id: &str,
		designated_purchase_chain: ChainId,
		ticker_hash: TickerHash,
		min_amount: ethers::types::U256,
		initial_operations: Vec<RebalanceOperation>,
	) -> Result<Earmark, StoreError> {
		let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

		let id = Uuid::new_v4();
		let row = sqlx::query(
			r#"insert into earmarks (id, invoice_id, designated_purchase_chain, ticker_hash, min_amount, status)
			   values ($1, $2, $3, $4, $5, 'initiating')
			   returning created_at, updated_at"#,
		)
		.bind(id)
		.bind(invoice_id)
		.bind(designated_purchase_chain as i64)
		.bind(hex::encode(ticker_hash))
		.bind(min_amount.to_string())
		.fetch_one(&mut *tx)
		.await
		.map_err(|e| match map_sqlx_error(e) {
			StoreError::UniqueViolation { .. } => StoreError::UniqueViolation { invoice_id: invoice_id.to_string() },
			other => other,
		})?;

		self.write_audit(&mut tx, id, "createEarmark", None, "initiating", serde_json::json!({ "invoiceId": invoice_id }))
			.await?;

		for operation in &initial_operations {
			insert_operation(&mut tx, Some(id), operation).await?;
		}

		tx.commit().await.map_err(map_sqlx_error)?;

		Ok(Earmark {
			id,
			invoice_id: invoice_id.to_string(),
			designated_purchase_chain,
			ticker_hash,
			min_amount,
			status: EarmarkStatus::Initiating,
			created_at: row.get("created_at"),
			updated_at: row.get("updated_at"),
		})
	}

	pub async fn update_earmark_status(
		&self,
		id: Uuid,
		new_status: EarmarkStatus,
		details: serde_json::Value,
	) -> Result<(), StoreError> {
		let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

		let previous: Option<String> =
			sqlx::query_scalar("select status from earmarks where id = $1").bind(id).fetch_optional(&mut *tx).await.map_err(map_sqlx_error)?;
		let Some(previous) = previous else { return Err(StoreError::NotFound) };

		sqlx::query("update earmarks set status = $2 where id = $1")
			.bind(id)
			.bind(new_status.as_str())
			.execute(&mut *tx)
			.await
			.map_err(map_sqlx_error)?;

		self.write_audit(&mut tx, id, "updateEarmarkStatus", Some(&previous), new_status.as_str(), details).await?;

		tx.commit().await.map_err(map_sqlx_error)
	}

	/// Deletes the earmark row (cascading its operations' FK, but leaving
	/// in-flight operations intact as orphans per the caller's responsibility
	/// to mark them before calling this).
	pub async fn remove_earmark(&self, id: Uuid) -> Result<(), StoreError> {
		let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
		self.write_audit(&mut tx, id, "removeEarmark", None, "removed", serde_json::json!({})).await?;
		sqlx::query("delete from earmarks where id = $1").bind(id).execute(&mut *tx).await.map_err(map_sqlx_error)?;
		tx.commit().await.map_err(map_sqlx_error)
	}

	pub async fn create_rebalance_operation(&self, operation: &RebalanceOperation) -> Result<(), StoreError> {
		let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
		insert_operation(&mut tx, operation.earmark_id, operation).await?;
		if let Some(earmark_id) = operation.earmark_id {
			self.write_audit(
				&mut tx,
				earmark_id,
				"createRebalanceOperation",
				None,
				"pending",
				serde_json::json!({ "operationId": operation.id }),
			)
			.await?;
		}
		tx.commit().await.map_err(map_sqlx_error)
	}

	pub async fn update_rebalance_operation(
		&self,
		id: Uuid,
		new_status: OperationStatus,
		tx_hashes: Option<HashMap<ChainId, LegRecord>>,
		is_orphaned: Option<bool>,
	) -> Result<(), StoreError> {
		let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

		let row = sqlx::query("select earmark_id, status from rebalance_operations where id = $1")
			.bind(id)
			.fetch_optional(&mut *tx)
			.await
			.map_err(map_sqlx_error)?
			.ok_or(StoreError::NotFound)?;
		let earmark_id: Option<Uuid> = row.get("earmark_id");
		let previous_status: String = row.get("status");

		if let Some(tx_hashes) = &tx_hashes {
			let json = serde_json::to_value(tx_hashes).map_err(|e| StoreError::Database(e.to_string()))?;
			sqlx::query("update rebalance_operations set status = $2, tx_hashes = $3 where id = $1")
				.bind(id)
				.bind(new_status.as_str())
				.bind(json)
				.execute(&mut *tx)
				.await
				.map_err(map_sqlx_error)?;
		} else {
			sqlx::query("update rebalance_operations set status = $2 where id = $1")
				.bind(id)
				.bind(new_status.as_str())
				.execute(&mut *tx)
				.await
				.map_err(map_sqlx_error)?;
		}

		if let Some(is_orphaned) = is_orphaned {
			sqlx::query("update rebalance_operations set is_orphaned = $2 where id = $1")
				.bind(id)
				.bind(is_orphaned)
				.execute(&mut *tx)
				.await
				.map_err(map_sqlx_error)?;
		}

		if let Some(earmark_id) = earmark_id {
			self.write_audit(
				&mut tx,
				earmark_id,
				"updateRebalanceOperation",
				Some(&previous_status),
				new_status.as_str(),
				serde_json::json!({ "operationId": id }),
			)
			.await?;
		}

		tx.commit().await.map_err(map_sqlx_error)
	}

	pub async fn get_rebalance_operations(&self, statuses: &[OperationStatus]) -> Result<Vec<RebalanceOperation>, StoreError> {
		let status_strs: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();
		let rows = sqlx::query("select * from rebalance_operations where status = any($1)")
			.bind(&status_strs)
			.fetch_all(&self.pool)
			.await
			.map_err(map_sqlx_error)?;
		rows.into_iter().map(row_to_operation).collect()
	}

	pub async fn get_rebalance_operation_by_transaction_hash(
		&self,
		hash: &str,
		origin_chain: ChainId,
	) -> Result<Option<RebalanceOperation>, StoreError> {
		let row = sqlx::query(
			"select * from rebalance_operations where origin_chain_id = $1 and tx_hashes::text like '%' || $2 || '%'",
		)
		.bind(origin_chain as i64)
		.bind(hash)
		.fetch_optional(&self.pool)
		.await
		.map_err(map_sqlx_error)?;
		row.map(row_to_operation).transpose()
	}

	pub async fn get_active_earmarks_for_chain(&self, chain: ChainId) -> Result<Vec<Earmark>, StoreError> {
		let rows = sqlx::query(
			"select * from earmarks where designated_purchase_chain = $1 and status in ('initiating', 'pending', 'ready')",
		)
		.bind(chain as i64)
		.fetch_all(&self.pool)
		.await
		.map_err(map_sqlx_error)?;
		rows.into_iter().map(row_to_earmark).collect()
	}

	pub async fn get_earmark_for_invoice(&self, invoice_id: &str) -> Result<Option<Earmark>, StoreError> {
		let row = sqlx::query(
			"select * from earmarks where invoice_id = $1 and status in ('initiating', 'pending', 'ready') limit 1",
		)
		.bind(invoice_id)
		.fetch_optional(&self.pool)
		.await
		.map_err(map_sqlx_error)?;
		row.map(row_to_earmark).transpose()
	}

	pub async fn get_rebalance_operations_by_earmark(&self, earmark_id: Uuid) -> Result<Vec<RebalanceOperation>, StoreError> {
		let rows = sqlx::query("select * from rebalance_operations where earmark_id = $1")
			.bind(earmark_id)
			.fetch_all(&self.pool)
			.await
			.map_err(map_sqlx_error)?;
		rows.into_iter().map(row_to_operation).collect()
	}

	async fn write_audit(
		&self,
		tx: &mut Transaction<'_, Postgres>,
		earmark_id: Uuid,
		operation: &str,
		previous_status: Option<&str>,
		new_status: &str,
		details: serde_json::Value,
	) -> Result<(), StoreError> {
		sqlx::query(
			"insert into earmark_audit_log (earmark_id, operation, previous_status, new_status, details) values ($1, $2, $3, $4, $5)",
		)
		.bind(earmark_id)
		.bind(operation)
		.bind(previous_status)
		.bind(new_status)
		.bind(details)
		.execute(&mut **tx)
		.await
		.map_err(map_sqlx_error)?;
		Ok(())
	}
}

async fn insert_operation(
	tx: &mut Transaction<'_, Postgres>,
	earmark_id: Option<Uuid>,
	operation: &RebalanceOperation,
) -> Result<(), StoreError> {
	let tx_hashes_json = serde_json::to_value(&operation.tx_hashes).map_err(|e| StoreError::Database(e.to_string()))?;
	sqlx::query(
		r#"insert into rebalance_operations
		   (id, earmark_id, origin_chain_id, destination_chain_id, ticker_hash, amount, slippage, bridge, tx_hashes, status, is_orphaned)
		   values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"#,
	)
	.bind(operation.id)
	.bind(earmark_id)
	.bind(operation.origin_chain as i64)
	.bind(operation.destination_chain as i64)
	.bind(hex::encode(operation.ticker_hash))
	.bind(operation.amount.to_string())
	.bind(operation.slippage_dbps as i32)
	.bind(operation.bridge.as_str())
	.bind(tx_hashes_json)
	.bind(operation.status.as_str())
	.bind(operation.is_orphaned)
	.execute(&mut **tx)
	.await
	.map_err(map_sqlx_error)?;
	Ok(())
}

fn row_to_earmark(row: sqlx::postgres::PgRow) -> Result<Earmark, StoreError> {
	let ticker_hex: String = row.get("ticker_hash");
	let ticker_hash = decode_ticker(&ticker_hex)?;
	let status: String = row.get("status");
	let min_amount_str: String = row.get("min_amount");
	Ok(Earmark {
		id: row.get("id"),
		invoice_id: row.get("invoice_id"),
		designated_purchase_chain: row.get::<i64, _>("designated_purchase_chain") as ChainId,
		ticker_hash,
		min_amount: ethers::types::U256::from_dec_str(&min_amount_str).map_err(|e| StoreError::Database(e.to_string()))?,
		status: status.parse().map_err(StoreError::Database)?,
		created_at: row.get::<DateTime<Utc>, _>("created_at"),
		updated_at: row.get::<DateTime<Utc>, _>("updated_at"),
	})
}

fn row_to_operation(row: sqlx::postgres::PgRow) -> Result<RebalanceOperation, StoreError> {
	let ticker_hex: String = row.get("ticker_hash");
	let ticker_hash = decode_ticker(&ticker_hex)?;
	let status: String = row.get("status");
	let bridge: String = row.get("bridge");
	let amount_str: String = row.get("amount");
	let tx_hashes_json: serde_json::Value = row.get("tx_hashes");

	Ok(RebalanceOperation {
		id: row.get("id"),
		earmark_id: row.get("earmark_id"),
		origin_chain: row.get::<i64, _>("origin_chain_id") as ChainId,
		destination_chain: row.get::<i64, _>("destination_chain_id") as ChainId,
		ticker_hash,
		amount: ethers::types::U256::from_dec_str(&amount_str).map_err(|e| StoreError::Database(e.to_string()))?,
		slippage_dbps: row.get::<i32, _>("slippage") as u32,
		bridge: bridge.parse().map_err(StoreError::Database)?,
		tx_hashes: serde_json::from_value(tx_hashes_json).unwrap_or_default(),
		status: status.parse().map_err(StoreError::Database)?,
		is_orphaned: row.get("is_orphaned"),
		created_at: row.get::<DateTime<Utc>, _>("created_at"),
		updated_at: row.get::<DateTime<Utc>, _>("updated_at"),
	})
}

fn decode_ticker(hex_str: &str) -> Result<TickerHash, StoreError> {
	let bytes = hex::decode(hex_str).map_err(|e| StoreError::Database(e.to_string()))?;
	bytes.try_into().map_err(|_| StoreError::Database("ticker hash was not 32 bytes".into()))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn ticker_hash_round_trips_through_hex_encoding() {
		let ticker: TickerHash = [7u8; 32];
		let encoded = hex::encode(ticker);
		assert_eq!(decode_ticker(&encoded).unwrap(), ticker);
	}

	#[test]
	fn decode_ticker_rejects_wrong_length() {
		let err = decode_ticker("aabb").unwrap_err();
		assert!(matches!(err, StoreError::Database(_)));
	}
}
