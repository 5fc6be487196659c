//! Shared domain types for the cross-chain inventory poller: invoices, assets,
//! routes, earmarks, rebalance operations, and the canonical 18-decimal
//! arithmetic everything else is built on.

pub mod asset;
pub mod audit;
pub mod bridge;
pub mod decimals;
pub mod earmark;
pub mod errors;
pub mod invoice;
pub mod operation;
pub mod purchase;
pub mod route;
pub mod wallet;

pub use asset::{AssetAddress, AssetConfig};
pub use audit::AuditLogEntry;
pub use bridge::{BridgeTag, MemoizedTx, TxMemo};
pub use earmark::{Earmark, EarmarkStatus};
pub use errors::{
	BridgeCancelled, CallbackNotReady, ConfigError, ErrorContext, InvoiceRejectReason, QuoteError,
	SlippageExceeded, StoreError, SubmitError, TxReference,
};
pub use invoice::{ChainId, HubStatus, Invoice, TickerHash};
pub use operation::{LegRecord, OperationStatus, PlannedRebalanceOperation, RebalanceOperation};
pub use purchase::{PurchaseRecord, SubmissionKind};
pub use route::{RebalanceRoute, RouteRebalancingConfig};
pub use wallet::WalletConfig;
