//! # Network Guard
//!
//! Compares the wallet's active chain with the chain a deal requires. Chain ids
//! are compared numerically, so `0x1`, `0x01` and `1` all match.
//!
//! On mismatch, investment actions are blocked until the wallet is switched
//! (see [`WalletSession::ensure_network`](crate::WalletSession::ensure_network)).

use lib_core::config::parse_chain_id;
use lib_core::{AppError, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkGuard {
    required: String,
}

impl NetworkGuard {
    pub fn new(required: impl Into<String>) -> Self {
        Self { required: required.into() }
    }

    pub fn required(&self) -> &str {
        &self.required
    }

    /// Whether `active` is the required chain. An unknown active chain never matches.
    pub fn matches(&self, active: Option<&str>) -> bool {
        chains_match(active, &self.required)
    }

    /// `Ok` when on the required chain, [`AppError::ChainMismatch`] otherwise.
    pub fn check(&self, active: Option<&str>) -> Result<()> {
        if self.matches(active) {
            Ok(())
        } else {
            Err(AppError::ChainMismatch {
                active: active.map(str::to_string),
                required: self.required.clone(),
            })
        }
    }
}

/// Pure comparison of an active chain id against a required one.
pub fn chains_match(active: Option<&str>, required: &str) -> bool {
    match (active.and_then(parse_chain_id), parse_chain_id(required)) {
        (Some(active), Some(required)) => active == required,
        _ => false,
    }
}
