//! # EVM Wallet Library
//!
//! Wallet connection and deal-ownership synchronization for the investment
//! dashboard.
//!
//! ## Components
//!
//! - [`provider`]: access to an injected wallet provider ([`ChainProvider`]) and
//!   the [`Signer`] handle bound to a connected account
//! - [`contracts`]: typed bindings for the token, vault and deals-manager contracts
//! - [`token`]: [`TokenBalanceReader`], human-readable token balances
//! - [`network`]: [`NetworkGuard`], active chain vs. required chain
//! - [`session`]: [`WalletSession`], the connection lifecycle and wallet balances
//! - [`ownership`]: [`DealOwnershipAccount`], a wallet's claim on one deal vault
//!   plus the invest / redeem operations
//!
//! ## Data Flow
//!
//! A UI constructs one [`WalletSession`] and hands clones of it to whatever
//! needs the wallet. For each deal it builds a [`DealOwnershipAccount`] scoped to
//! that deal's vault. Neither the UI nor the accounts mutate [`WalletState`];
//! only the session does.

pub mod contracts;
pub mod guard;
pub mod network;
pub mod ownership;
pub mod provider;
pub mod session;
pub mod token;
pub mod units;

#[cfg(test)]
pub(crate) mod mock;

// Re-export commonly used types from root for convenience
pub use guard::TaskGuard;
pub use network::NetworkGuard;
pub use ownership::{Claim, DealOwnershipAccount, DealStatus, InvestmentTransfer, OwnershipPosition};
pub use provider::http::HttpWalletProvider;
pub use provider::{ChainProvider, RpcError, Signer, WalletEvent, WalletProvider};
pub use session::{ConnectionStatus, WalletSession, WalletState};
pub use token::TokenBalanceReader;
