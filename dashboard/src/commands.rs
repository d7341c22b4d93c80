//! Subcommand implementations.

use crate::DealArgs;
use alloy_primitives::Address;
use lib_core::{AppError, BlockchainConfig};
use lib_evm::{
    ChainProvider, Claim, DealOwnershipAccount, HttpWalletProvider, OwnershipPosition, WalletProvider,
    WalletSession, WalletState,
};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// How often the HTTP provider is polled for account and chain changes.
const WATCH_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Everything a command needs: configuration, the node provider and one session.
pub struct Context {
    pub config: &'static BlockchainConfig,
    pub node: Arc<HttpWalletProvider>,
    pub session: WalletSession,
}

impl Context {
    pub fn new(config: &'static BlockchainConfig) -> Result<Self, AppError> {
        let node = Arc::new(HttpWalletProvider::new(config.wallet_rpc_url.clone()));
        let injected: Arc<dyn WalletProvider> = node.clone();
        let provider = ChainProvider::from_injected(Some(injected))?;
        let session = WalletSession::from_config(provider, config)?;
        Ok(Self { config, node, session })
    }

    fn account(&self, deal: &DealArgs) -> Result<DealOwnershipAccount, AppError> {
        let vault = Address::from_str(deal.vault.trim())
            .map_err(|e| AppError::InvalidInput(format!("Invalid vault address {:?}: {}", deal.vault, e)))?;
        DealOwnershipAccount::new(self.session.clone(), self.config, Some(vault), deal.position_id)
    }

    /// Connect and make sure the wallet is on the configured network.
    async fn ready_to_transact(&self) -> Result<(), AppError> {
        self.session.connect().await?;
        self.session.ensure_network(&self.config.evm_chain_id).await
    }
}

pub async fn status(ctx: &Context) -> anyhow::Result<()> {
    ctx.session.refresh_balances().await;
    print_wallet(ctx, &ctx.session.state());
    println!("Status:   {:?}", ctx.session.status());
    Ok(())
}

pub async fn connect(ctx: &Context) -> anyhow::Result<()> {
    let address = ctx.session.connect().await?;
    ctx.session.refresh_balances().await;
    println!("Connected {}", address);
    print_wallet(ctx, &ctx.session.state());
    Ok(())
}

pub async fn switch_network(ctx: &Context, chain_id: Option<&str>) -> anyhow::Result<()> {
    let required = chain_id.unwrap_or(&ctx.config.evm_chain_id);
    ctx.session.ensure_network(required).await?;
    println!(
        "Wallet is on network {}",
        ctx.session.state().active_chain_id.as_deref().unwrap_or(required)
    );
    Ok(())
}

pub async fn position(ctx: &Context, deal: &DealArgs) -> anyhow::Result<()> {
    let account = ctx.account(deal)?;
    ctx.session.connect().await?;
    if let Err(e) = ctx.session.check_network(&ctx.config.evm_chain_id) {
        println!("Warning: {}", e.user_message());
    }

    account.refresh().await;
    print_position(ctx, &account.position());
    Ok(())
}

pub async fn invest(ctx: &Context, deal: &DealArgs, amount: f64) -> anyhow::Result<()> {
    let account = ctx.account(deal)?;
    ctx.ready_to_transact().await?;

    info!(amount, vault = %deal.vault, "submitting investment");
    account.invest(amount).await?;

    println!("Invested {} {}", amount, ctx.config.investment_token_symbol);
    print_position(ctx, &account.position());
    print_wallet(ctx, &ctx.session.state());
    Ok(())
}

pub async fn redeem(ctx: &Context, deal: &DealArgs) -> anyhow::Result<()> {
    let account = ctx.account(deal)?;
    ctx.ready_to_transact().await?;

    // Redeem submits the cached share amount, so read it fresh first.
    account.refresh().await;
    let before = account.position();
    account.redeem().await?;

    println!("Redeemed {} shares", before.redeemable_shares);
    print_wallet(ctx, &ctx.session.state());
    Ok(())
}

pub async fn watch(ctx: &Context, interval_secs: u64) -> anyhow::Result<()> {
    let _watcher = ctx.node.spawn_watcher(WATCH_POLL_INTERVAL);
    let _refresher = ctx
        .session
        .spawn_balance_refresher(Duration::from_secs(interval_secs.max(1)));

    let mut updates = ctx.session.subscribe();
    print_wallet(ctx, &updates.borrow_and_update());
    println!("Watching for changes, press Ctrl-C to stop");

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = updates.borrow_and_update().clone();
                print_wallet(ctx, &state);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }
    }
    Ok(())
}

fn print_wallet(ctx: &Context, state: &WalletState) {
    let Some(address) = state.address else {
        println!("Wallet:   not connected");
        return;
    };
    let network = match state.active_chain_id.as_deref() {
        Some(chain) if ctx.session.is_on_chain(&ctx.config.evm_chain_id) => chain.to_string(),
        Some(chain) => format!("{} (expected {})", chain, ctx.config.evm_chain_id),
        None => "unknown".to_string(),
    };

    println!("Wallet:   {}", address);
    println!("          {}", ctx.config.explorer_address_url(&address.to_string()));
    println!("Network:  {}", network);
    println!("Native:   {:.4}", state.native_balance);
    println!("Token:    {:.2} {}", state.token_balance, ctx.config.investment_token_symbol);
}

fn print_position(ctx: &Context, position: &OwnershipPosition) {
    println!("Deal status:   {}", position.status);
    println!("Vault funded:  {:.2} {}", position.vault_funded_amount, ctx.config.investment_token_symbol);
    match position.claim() {
        Claim::Shares(shares) => println!("Your shares:   {:.4}", shares),
        Claim::Assets(assets) => {
            println!("Reclaimable:   {:.2} {}", assets, ctx.config.investment_token_symbol)
        }
    }
}
