//! # Deal Ownership
//!
//! [`DealOwnershipAccount`] is a wallet's view of one deal: its claim on the
//! deal's vault plus the two money-moving operations, invest and redeem.
//!
//! ## Reads
//!
//! [`DealOwnershipAccount::refresh`] fires four independent reads (redeemable
//! shares, vault total assets, withdrawable assets, deal status). Each result is
//! committed as it arrives, and a failed read keeps that field's previous value.
//!
//! ## Writes
//!
//! `invest` approves the vault to pull the tokens and waits for the approval to
//! be mined before it submits the deposit. A failed approval means no deposit is
//! ever sent. A failed deposit leaves the approval in place. Both surface as one
//! [`AppError::InvestmentFailed`]; nothing is retried.
//!
//! Callers must not start a second `invest`/`redeem` on the same account while
//! one is outstanding (disable the control that triggered it).

use crate::contracts::{DealVault, DealsManager, Erc20Token};
use crate::provider::{RpcError, Signer};
use crate::session::WalletSession;
use crate::units::{from_base_units, parse_optional_address, to_base_units};
use alloy_primitives::{Address, TxHash, U256};
use lib_core::{AppError, BlockchainConfig, DealRecord, Result};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

/// Lifecycle status code of a deal in the deals-manager contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DealStatus(pub u64);

impl DealStatus {
    /// Terminal status: the deal is closed and investors can reclaim assets.
    pub const CLOSED: DealStatus = DealStatus(8);

    pub fn code(self) -> u64 {
        self.0
    }

    pub fn is_redeemable(self) -> bool {
        self == Self::CLOSED
    }
}

impl std::fmt::Display for DealStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_redeemable() {
            write!(f, "closed ({})", self.0)
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// The figure to show for a position, selected by deal status.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Claim {
    /// Vault shares held while the deal is running.
    Shares(f64),
    /// Token amount reclaimable once the deal is closed.
    Assets(f64),
}

/// A wallet's claim on one deal vault, as of the last refresh.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct OwnershipPosition {
    pub redeemable_shares: f64,
    pub vault_funded_amount: f64,
    pub redeemable_assets_if_closed: f64,
    pub status: DealStatus,
    /// `redeemable_shares` exactly as the vault reported it.
    pub raw_shares: U256,
}

impl OwnershipPosition {
    pub fn claim(&self) -> Claim {
        if self.status.is_redeemable() {
            Claim::Assets(self.redeemable_assets_if_closed)
        } else {
            Claim::Shares(self.redeemable_shares)
        }
    }
}

/// Parameters of one invest attempt, consumed by it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvestmentTransfer {
    /// Amount in the token's smallest unit.
    pub amount: U256,
    pub token: Address,
    pub vault: Address,
    pub owner: Address,
}

impl InvestmentTransfer {
    /// Approve, wait for the approval to be mined, then deposit.
    async fn execute(self, signer: &Signer, token: &Erc20Token, vault: &DealVault) -> std::result::Result<TxHash, String> {
        let approval = token
            .approve(signer, self.vault, self.amount)
            .await
            .map_err(|e| format!("approval failed: {}", e))?;
        info!(%approval, vault = %self.vault, "approval mined, depositing");

        vault
            .deposit(signer, self.amount, self.owner)
            .await
            .map_err(|e| format!("deposit failed after approval {}: {}", approval, e))
    }
}

#[derive(Default)]
struct PositionCache {
    /// Account the cached figures belong to.
    owner: Option<Address>,
    position: OwnershipPosition,
}

/// A connected wallet's ownership of one deal.
pub struct DealOwnershipAccount {
    session: WalletSession,
    vault: Option<DealVault>,
    manager: Option<DealsManager>,
    token: Option<Erc20Token>,
    position_id: u64,
    required_chain_id: String,
    token_decimals: u8,
    share_decimals: u8,
    cache: Mutex<PositionCache>,
}

impl std::fmt::Debug for DealOwnershipAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DealOwnershipAccount")
            .field("vault", &self.vault_address())
            .field("position_id", &self.position_id)
            .field("position", &self.position())
            .finish_non_exhaustive()
    }
}

impl DealOwnershipAccount {
    /// Account for the vault at `vault` (if deployed) and deals-manager position
    /// `position_id`.
    pub fn new(
        session: WalletSession,
        config: &BlockchainConfig,
        vault: Option<Address>,
        position_id: u64,
    ) -> Result<Self> {
        let provider = session.provider().clone();
        let manager = parse_optional_address(&config.deals_manager_address)?
            .map(|address| DealsManager::new(provider.clone(), address));
        let token = parse_optional_address(&config.investment_token_address)?
            .map(|address| Erc20Token::new(provider.clone(), address));

        Ok(Self {
            vault: vault.map(|address| DealVault::new(provider, address)),
            manager,
            token,
            position_id,
            required_chain_id: config.evm_chain_id.clone(),
            token_decimals: config.investment_token_decimals,
            share_decimals: config.vault_share_decimals,
            cache: Mutex::new(PositionCache::default()),
            session,
        })
    }

    /// Account for a deal as returned by the deal API.
    pub fn for_deal(session: WalletSession, config: &BlockchainConfig, deal: &DealRecord) -> Result<Self> {
        let vault = parse_optional_address(&deal.vault_address)?;
        Self::new(session, config, vault, deal.nft_id)
    }

    pub fn vault_address(&self) -> Option<Address> {
        self.vault.as_ref().map(DealVault::address)
    }

    pub fn position_id(&self) -> u64 {
        self.position_id
    }

    /// Snapshot of the cached position.
    pub fn position(&self) -> OwnershipPosition {
        self.cache.lock().position
    }

    /// Re-read the position for the connected account.
    ///
    /// Does nothing without a vault or without a connected wallet.
    pub async fn refresh(&self) {
        let (Some(vault), Some(signer)) = (self.vault.as_ref(), self.session.signer()) else {
            debug!(position_id = self.position_id, "no vault or wallet; skipping position refresh");
            return;
        };
        let owner = signer.address();

        let shares = async {
            let Some(raw) = self.absorb("redeemableShares", vault.max_redeem(owner).await) else {
                return;
            };
            if let Some(shares) = self.scale("redeemableShares", raw, self.share_decimals) {
                self.commit(owner, |p| {
                    p.raw_shares = raw;
                    p.redeemable_shares = shares;
                });
            }
        };

        let funded = async {
            let Some(raw) = self.absorb("vaultFundedAmount", vault.total_assets().await) else {
                return;
            };
            if let Some(funded) = self.scale("vaultFundedAmount", raw, self.token_decimals) {
                self.commit(owner, |p| p.vault_funded_amount = funded);
            }
        };

        let withdrawable = async {
            let Some(raw) = self.absorb("redeemableAssetsIfClosed", vault.max_withdraw(owner).await) else {
                return;
            };
            if let Some(assets) = self.scale("redeemableAssetsIfClosed", raw, self.token_decimals) {
                self.commit(owner, |p| p.redeemable_assets_if_closed = assets);
            }
        };

        let status = async {
            let Some(manager) = self.manager.as_ref() else {
                warn!("no deals manager configured; deal status unavailable");
                return;
            };
            if let Some(code) = self.absorb("dealLifecycleStatus", manager.status(self.position_id).await) {
                self.commit(owner, |p| p.status = DealStatus(code));
            }
        };

        tokio::join!(shares, funded, withdrawable, status);
    }

    /// Invest `amount` tokens (human units) into the deal's vault.
    ///
    /// On success the position and the wallet balances are refreshed.
    pub async fn invest(&self, amount: f64) -> Result<()> {
        let (Some(signer), Some(vault)) = (self.session.signer(), self.vault.as_ref()) else {
            return Err(AppError::WalletNotConnected);
        };
        self.session.check_network(&self.required_chain_id)?;
        let token = self
            .token
            .as_ref()
            .ok_or_else(|| AppError::Config("investment token address is not configured".to_string()))?;

        let transfer = InvestmentTransfer {
            amount: to_base_units(amount, self.token_decimals)?,
            token: token.address(),
            vault: vault.address(),
            owner: signer.address(),
        };
        info!(
            amount,
            base_units = %transfer.amount,
            vault = %transfer.vault,
            owner = %transfer.owner,
            "investing"
        );

        let deposit = transfer.execute(&signer, token, vault).await.map_err(|reason| {
            warn!(vault = %vault.address(), "investment failed: {}", reason);
            AppError::InvestmentFailed(reason)
        })?;
        info!(%deposit, vault = %vault.address(), "investment complete");

        self.refresh_after_write().await;
        Ok(())
    }

    /// Redeem the cached redeemable shares to the connected account.
    ///
    /// Shares are not re-read first; call [`refresh`](Self::refresh) beforehand
    /// if they may have changed.
    pub async fn redeem(&self) -> Result<()> {
        let Some(signer) = self.session.signer() else {
            return Err(AppError::WalletNotConnected);
        };
        let vault = self
            .vault
            .as_ref()
            .ok_or_else(|| AppError::InvalidInput("This deal has no vault yet".to_string()))?;
        self.session.check_network(&self.required_chain_id)?;

        let owner = signer.address();
        let shares = {
            let cache = self.cache.lock();
            if cache.owner == Some(owner) {
                cache.position.raw_shares
            } else {
                U256::ZERO
            }
        };
        if shares.is_zero() {
            return Err(AppError::InvalidInput("No shares to redeem".to_string()));
        }
        info!(%shares, vault = %vault.address(), %owner, "redeeming");

        let hash = vault.redeem(&signer, shares, owner, owner).await.map_err(|e| {
            warn!(vault = %vault.address(), "redeem failed: {}", e);
            AppError::RedeemFailed(e.to_string())
        })?;
        info!(%hash, vault = %vault.address(), "redeem complete");

        self.refresh_after_write().await;
        Ok(())
    }

    async fn refresh_after_write(&self) {
        tokio::join!(self.refresh(), self.session.refresh_balances());
    }

    fn absorb<T>(&self, field: &'static str, result: std::result::Result<T, RpcError>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                let err = AppError::ReadFailed {
                    field,
                    reason: e.to_string(),
                };
                warn!(position_id = self.position_id, "{}; keeping previous value", err);
                None
            }
        }
    }

    fn scale(&self, field: &'static str, raw: U256, decimals: u8) -> Option<f64> {
        match from_base_units(raw, decimals) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(field, "{}; keeping previous value", e);
                None
            }
        }
    }

    /// Apply a read for `owner`, dropping it if the wallet switched accounts since.
    fn commit(&self, owner: Address, apply: impl FnOnce(&mut OwnershipPosition)) {
        if self.session.address() != Some(owner) {
            debug!(%owner, "account changed during refresh; discarding read");
            return;
        }
        let mut cache = self.cache.lock();
        if cache.owner != Some(owner) {
            *cache = PositionCache {
                owner: Some(owner),
                position: OwnershipPosition::default(),
            };
        }
        apply(&mut cache.position);
    }
}
