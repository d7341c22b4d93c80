//! # Centralized Error Handling
//!
//! This module defines the error type [`AppError`] shared by the wallet session,
//! the per-deal ownership accounts and the dashboard front end.
//!
//! ## Error Categories
//!
//! 1. **Connection** - the wallet is missing, refused access, or is on the wrong network
//!    - [`ProviderUnavailable`](AppError::ProviderUnavailable)
//!    - [`ConnectionRejected`](AppError::ConnectionRejected)
//!    - [`ChainMismatch`](AppError::ChainMismatch) / [`ChainNotRegistered`](AppError::ChainNotRegistered)
//!    - [`WalletNotConnected`](AppError::WalletNotConnected)
//!
//! 2. **Reads** - a single balance or position field could not be fetched
//!    - [`ReadFailed`](AppError::ReadFailed) is logged and absorbed where it happens;
//!      the previous value stays in place.
//!
//! 3. **Writes** - a money-moving transaction did not complete
//!    - [`InvestmentFailed`](AppError::InvestmentFailed) / [`RedeemFailed`](AppError::RedeemFailed)
//!      are always returned to the caller, never swallowed.
//!
//! 4. **Ambient** - configuration, transport and input problems
//!    - [`Config`](AppError::Config), [`Rpc`](AppError::Rpc),
//!      [`InvalidInput`](AppError::InvalidInput), [`Decoding`](AppError::Decoding)
//!
//! ## Usage Example
//!
//! ```rust
//! use lib_core::error::{AppError, Result};
//!
//! fn require_amount(amount: f64) -> Result<f64> {
//!     if !(amount > 0.0) {
//!         return Err(AppError::InvalidInput("Amount must be positive".to_string()));
//!     }
//!     Ok(amount)
//! }
//! ```

use thiserror::Error;

/// Convenience type alias for `Result<T, AppError>`.
pub type Result<T> = std::result::Result<T, AppError>;

/// Error type covering every failure the wallet layer can report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AppError {
    /// No wallet provider is present in the execution environment.
    ///
    /// The wallet feature should be shown as disabled; connecting is not retried.
    #[error("No wallet provider available")]
    ProviderUnavailable,

    /// The user declined the account-access request (or the wallet exposed no account).
    #[error("Wallet connection rejected: {0}")]
    ConnectionRejected(String),

    /// The wallet is on a different network than the one the deal requires.
    #[error("Wallet is on chain {active:?}, required {required}")]
    ChainMismatch {
        active: Option<String>,
        required: String,
    },

    /// The wallet does not know the required chain and must be configured by the user.
    #[error("Chain {0} is not registered in the wallet")]
    ChainNotRegistered(String),

    /// A signing operation was attempted without a connected wallet.
    #[error("Wallet not connected")]
    WalletNotConnected,

    /// One balance or position field could not be read.
    #[error("Failed to read {field}: {reason}")]
    ReadFailed { field: &'static str, reason: String },

    /// The approve + deposit sequence did not complete.
    #[error("Investment failed: {0}")]
    InvestmentFailed(String),

    /// The redeem transaction did not complete.
    #[error("Redeem failed: {0}")]
    RedeemFailed(String),

    /// Configuration error during startup or environment loading.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Wallet provider / JSON-RPC error outside a money-moving operation.
    #[error("RPC error: {0}")]
    Rpc(String),

    /// Invalid user input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A provider or contract response could not be decoded.
    #[error("Decoding error: {0}")]
    Decoding(String),
}

impl AppError {
    /// Message suitable for showing to the user.
    ///
    /// Connection and chain problems become prompts the user can act on.
    /// Money-moving failures get a generic message: nothing was partially
    /// applied as a success, so retrying is safe.
    pub fn user_message(&self) -> String {
        match self {
            AppError::ProviderUnavailable => {
                "No wallet detected. Install a browser wallet to invest.".to_string()
            }
            AppError::ConnectionRejected(_) => {
                "Wallet connection was not approved. Connect your wallet to continue.".to_string()
            }
            AppError::WalletNotConnected => "Please connect your wallet.".to_string(),
            AppError::ChainMismatch { required, .. } => {
                format!("Switch your wallet to network {required} to continue.")
            }
            AppError::ChainNotRegistered(chain) => format!(
                "Network {chain} is not configured in your wallet. Add it in your wallet settings, then try again."
            ),
            AppError::InvestmentFailed(_) => {
                "The investment did not complete. Check your position before trying again.".to_string()
            }
            AppError::RedeemFailed(_) => {
                "The redemption did not complete. You can try again.".to_string()
            }
            AppError::InvalidInput(msg) => msg.clone(),
            AppError::ReadFailed { .. } | AppError::Rpc(_) | AppError::Decoding(_) => {
                "Wallet data is temporarily unavailable".to_string()
            }
            AppError::Config(_) => "The dashboard is misconfigured".to_string(),
        }
    }

    /// Whether the user can resolve this error by acting in their wallet
    /// (connecting, approving, or switching network).
    pub fn is_user_actionable(&self) -> bool {
        matches!(
            self,
            AppError::ProviderUnavailable
                | AppError::ConnectionRejected(_)
                | AppError::WalletNotConnected
                | AppError::ChainMismatch { .. }
                | AppError::ChainNotRegistered(_)
        )
    }

    /// Short variant name, used as a stable code in logs.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::ProviderUnavailable => "ProviderUnavailable",
            AppError::ConnectionRejected(_) => "ConnectionRejected",
            AppError::ChainMismatch { .. } => "ChainMismatch",
            AppError::ChainNotRegistered(_) => "ChainNotRegistered",
            AppError::WalletNotConnected => "WalletNotConnected",
            AppError::ReadFailed { .. } => "ReadFailed",
            AppError::InvestmentFailed(_) => "InvestmentFailed",
            AppError::RedeemFailed(_) => "RedeemFailed",
            AppError::Config(_) => "Config",
            AppError::Rpc(_) => "Rpc",
            AppError::InvalidInput(_) => "InvalidInput",
            AppError::Decoding(_) => "Decoding",
        }
    }
}

/// Convert `serde_json::Error` to `AppError`.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Decoding(format!("JSON error: {}", err))
    }
}

/// Environment problems are configuration problems.
impl From<lib_utils::envs::Error> for AppError {
    fn from(err: lib_utils::envs::Error) -> Self {
        AppError::Config(err.to_string())
    }
}

/// Only used while fetching configuration.
impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::Config(format!("Failed to fetch config: {}", err))
    }
}
