//! # Token Balance Reader
//!
//! Reads an owner's balance of the investment token in human-readable units,
//! scaled with the decimals from configuration.

use crate::contracts::Erc20Token;
use crate::provider::ChainProvider;
use crate::units::from_base_units;
use alloy_primitives::Address;
use lib_core::{AppError, Result};

#[derive(Clone, Debug)]
pub struct TokenBalanceReader {
    token: Erc20Token,
    decimals: u8,
}

impl TokenBalanceReader {
    pub fn new(provider: ChainProvider, token: Address, decimals: u8) -> Self {
        Self {
            token: Erc20Token::new(provider, token),
            decimals,
        }
    }

    pub fn token_address(&self) -> Address {
        self.token.address()
    }

    pub fn decimals(&self) -> u8 {
        self.decimals
    }

    /// Balance of `owner`, e.g. `1000.0` for 1000 USDC.
    pub async fn balance_of(&self, owner: Address) -> Result<f64> {
        let raw = self.token.balance_of(owner).await.map_err(|e| AppError::ReadFailed {
            field: "tokenBalance",
            reason: e.to_string(),
        })?;
        from_base_units(raw, self.decimals)
    }
}
