//! # Blockchain Configuration
//!
//! Client-side blockchain configuration: which chain deals live on, which token
//! is invested, and where the deals-manager contract is deployed.
//!
//! Configuration comes from environment variables ([`BlockchainConfig::from_env`])
//! or from the dashboard's config endpoint ([`BlockchainConfig::fetch`]).
//! Components receive it by injection; the binary may additionally register a
//! process-wide instance with [`init_config()`].
//!
//! ```rust,no_run
//! use lib_core::config::{core_config, init_config};
//!
//! fn main() -> lib_core::Result<()> {
//!     init_config()?;
//!     let config = core_config();
//!     println!("required chain: {}", config.evm_chain_id);
//!     Ok(())
//! }
//! ```

use crate::error::{AppError, Result};
use lib_utils::envs::{get_env_or, get_env_parse_or};
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;

const DEFAULT_CHAIN_ID: &str = "0x1";
const DEFAULT_EXPLORER: &str = "https://etherscan.io";
const DEFAULT_TOKEN_SYMBOL: &str = "USDC";
const DEFAULT_DECIMALS: u8 = 18;
const DEFAULT_WALLET_RPC_URL: &str = "http://127.0.0.1:8545";
const DEFAULT_RECEIPT_POLL_MS: u64 = 1000;

/// Largest decimal precision that still fits a uint256 amount.
pub const MAX_DECIMALS: u8 = 77;

/// Blockchain configuration shared by the wallet session and deal accounts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockchainConfig {
    /// Chain id every deal lives on, hex (`0x1`) or decimal.
    pub evm_chain_id: String,

    /// Block explorer base URL used for transaction links.
    pub blockchain_explorer: String,

    /// ERC-20 token deposited into deal vaults. Empty when not deployed.
    #[serde(default)]
    pub investment_token_address: String,

    #[serde(default = "default_token_symbol")]
    pub investment_token_symbol: String,

    /// Decimal precision of the investment token.
    ///
    /// Amounts are always scaled with this value; 18 is only the default for
    /// deployments that do not set it.
    #[serde(default = "default_decimals", deserialize_with = "de_decimals")]
    pub investment_token_decimals: u8,

    /// Deals-manager contract exposing `status(positionId)`. Empty when not deployed.
    #[serde(default)]
    pub deals_manager_address: String,

    /// Decimal precision of vault shares.
    #[serde(default = "default_decimals", deserialize_with = "de_decimals")]
    pub vault_share_decimals: u8,

    /// JSON-RPC endpoint for environments without a browser wallet.
    #[serde(default = "default_wallet_rpc_url")]
    pub wallet_rpc_url: String,

    /// How often to poll for a transaction receipt while waiting for it to be mined.
    #[serde(default = "default_receipt_poll_ms")]
    pub receipt_poll_interval_ms: u64,
}

impl Default for BlockchainConfig {
    fn default() -> Self {
        Self {
            evm_chain_id: DEFAULT_CHAIN_ID.to_string(),
            blockchain_explorer: DEFAULT_EXPLORER.to_string(),
            investment_token_address: String::new(),
            investment_token_symbol: default_token_symbol(),
            investment_token_decimals: DEFAULT_DECIMALS,
            deals_manager_address: String::new(),
            vault_share_decimals: DEFAULT_DECIMALS,
            wallet_rpc_url: default_wallet_rpc_url(),
            receipt_poll_interval_ms: DEFAULT_RECEIPT_POLL_MS,
        }
    }
}

impl BlockchainConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let config = Self {
            evm_chain_id: get_env_or("EVM_CHAIN_ID", DEFAULT_CHAIN_ID),
            blockchain_explorer: get_env_or("BLOCKCHAIN_EXPLORER", DEFAULT_EXPLORER),
            investment_token_address: get_env_or("INVESTMENT_TOKEN_ADDRESS", ""),
            investment_token_symbol: get_env_or("INVESTMENT_TOKEN_SYMBOL", DEFAULT_TOKEN_SYMBOL),
            investment_token_decimals: get_env_parse_or("INVESTMENT_TOKEN_DECIMALS", DEFAULT_DECIMALS)?,
            deals_manager_address: get_env_or("DEALS_MANAGER_ADDRESS", ""),
            vault_share_decimals: get_env_parse_or("VAULT_SHARE_DECIMALS", DEFAULT_DECIMALS)?,
            wallet_rpc_url: get_env_or("WALLET_RPC_URL", DEFAULT_WALLET_RPC_URL),
            receipt_poll_interval_ms: get_env_parse_or("RECEIPT_POLL_INTERVAL_MS", DEFAULT_RECEIPT_POLL_MS)?,
        };
        debug!(chain = %config.evm_chain_id, "loaded blockchain config from environment");
        Ok(config)
    }

    /// Parse the JSON document served by the dashboard's config endpoint.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| AppError::Config(format!("Invalid config document: {}", e)))
    }

    /// Fetch the config document from `url`.
    pub async fn fetch(url: &str) -> Result<Self> {
        let response = reqwest::get(url).await?.error_for_status()?;
        let body = response.text().await?;
        let config = Self::from_json(&body)?;
        debug!(%url, chain = %config.evm_chain_id, "fetched blockchain config");
        Ok(config)
    }

    /// Validate the values a wallet session cannot work without.
    ///
    /// Contract addresses may be empty; features that need them report it.
    pub fn validate(&self) -> Result<()> {
        if parse_chain_id(&self.evm_chain_id).is_none() {
            return Err(AppError::Config(format!(
                "EVM_CHAIN_ID must be a hex or decimal chain id, got {:?}",
                self.evm_chain_id
            )));
        }

        if self.blockchain_explorer.trim().is_empty() {
            return Err(AppError::Config("BLOCKCHAIN_EXPLORER must be set".to_string()));
        }

        if self.investment_token_decimals > MAX_DECIMALS || self.vault_share_decimals > MAX_DECIMALS {
            return Err(AppError::Config(format!("Decimals must be at most {}", MAX_DECIMALS)));
        }

        if self.receipt_poll_interval_ms == 0 {
            return Err(AppError::Config("RECEIPT_POLL_INTERVAL_MS must be positive".to_string()));
        }

        Ok(())
    }

    /// Explorer link for a transaction hash.
    pub fn explorer_tx_url(&self, tx_hash: &str) -> String {
        format!("{}/tx/{}", self.blockchain_explorer.trim_end_matches('/'), tx_hash)
    }

    /// Explorer link for a contract or wallet address.
    pub fn explorer_address_url(&self, address: &str) -> String {
        format!("{}/address/{}", self.blockchain_explorer.trim_end_matches('/'), address)
    }

    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_interval_ms)
    }
}

/// Parse a chain id given as `0x`-prefixed hex or as decimal.
pub fn parse_chain_id(value: &str) -> Option<u64> {
    let value = value.trim();
    if let Some(hex) = value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        if hex.is_empty() {
            return None;
        }
        u64::from_str_radix(hex, 16).ok()
    } else {
        value.parse().ok()
    }
}

/// Canonical `0x`-prefixed lowercase hex form of a chain id, as wallets report it.
pub fn format_chain_id(chain_id: u64) -> String {
    format!("0x{:x}", chain_id)
}

fn default_token_symbol() -> String {
    DEFAULT_TOKEN_SYMBOL.to_string()
}

fn default_decimals() -> u8 {
    DEFAULT_DECIMALS
}

fn default_wallet_rpc_url() -> String {
    DEFAULT_WALLET_RPC_URL.to_string()
}

fn default_receipt_poll_ms() -> u64 {
    DEFAULT_RECEIPT_POLL_MS
}

/// The config endpoint serves decimals as a string; accept numbers too.
fn de_decimals<'de, D>(deserializer: D) -> std::result::Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Decimals {
        Number(u8),
        Text(String),
    }

    match Decimals::deserialize(deserializer)? {
        Decimals::Number(n) => Ok(n),
        Decimals::Text(s) if s.trim().is_empty() => Ok(DEFAULT_DECIMALS),
        Decimals::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid decimals {:?}", s))),
    }
}

/// Global configuration instance (initialized once at startup).
static CONFIG: OnceLock<BlockchainConfig> = OnceLock::new();

/// Initialize the global configuration from the environment.
///
/// # Errors
///
/// Returns an error if:
/// - Environment variables are malformed
/// - Configuration validation fails
/// - Config has already been initialized
pub fn init_config() -> Result<()> {
    let config = BlockchainConfig::from_env()?;
    set_config(config)
}

/// Register an already-built configuration as the global instance.
pub fn set_config(config: BlockchainConfig) -> Result<()> {
    config.validate()?;

    CONFIG
        .set(config)
        .map_err(|_| AppError::Config("Config has already been initialized".to_string()))
}

/// Get a reference to the global configuration.
///
/// # Panics
///
/// Panics if [`init_config()`] or [`set_config()`] has not been called yet.
pub fn core_config() -> &'static BlockchainConfig {
    CONFIG
        .get()
        .expect("Config must be initialized with init_config() before use")
}
