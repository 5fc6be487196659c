use ethers::types::Address;
use serde::{Deserialize, Serialize};

/// Which signer flavour a chain is configured to use. See `poller-signer`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "walletType")]
pub enum WalletConfig {
	#[serde(rename = "EOA")]
	Eoa,
	Zodiac { safe_address: Address, module_address: Address, role_key: Option<String> },
}
