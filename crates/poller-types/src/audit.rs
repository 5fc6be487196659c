use uuid::Uuid;

/// Append-only transition record written in the same store transaction as the
/// mutation it describes.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AuditLogEntry {
	pub earmark_id: Uuid,
	pub operation: String,
	pub previous_status: Option<String>,
	pub new_status: String,
	pub details: serde_json::Value,
	pub timestamp: chrono::DateTime<chrono::Utc>,
}
