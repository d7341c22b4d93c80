//! # Dashboard
//!
//! Command-line front end for the deal-vault wallet layer. Talks to a JSON-RPC
//! node with unlocked accounts in place of a browser wallet.

mod commands;
mod logger;

use clap::{Args, Parser, Subcommand};
use commands::Context;
use lib_core::config::{core_config, init_config, set_config};
use lib_core::{AppError, BlockchainConfig};
use std::process::ExitCode;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(
    name = "dashboard",
    about = "Wallet session and deal-vault positions for the investment dashboard",
    version
)]
struct Cli {
    /// Fetch configuration from the dashboard's config endpoint instead of the environment.
    #[arg(long, global = true)]
    config_url: Option<String>,

    /// JSON-RPC endpoint of the wallet node; overrides WALLET_RPC_URL.
    #[arg(long, global = true)]
    rpc_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the connected account, balances and network.
    Status,
    /// Connect the wallet account.
    Connect,
    /// Switch the wallet to the configured network (or `--chain-id`).
    SwitchNetwork {
        #[arg(long)]
        chain_id: Option<String>,
    },
    /// Show the connected account's position in a deal vault.
    Position(DealArgs),
    /// Approve and deposit tokens into a deal vault.
    Invest {
        #[command(flatten)]
        deal: DealArgs,

        /// Amount in token units, e.g. `100` for 100 USDC.
        #[arg(long)]
        amount: f64,
    },
    /// Redeem all redeemable shares of a deal vault.
    Redeem(DealArgs),
    /// Follow account, network and balance changes until interrupted.
    Watch {
        /// Seconds between balance refreshes.
        #[arg(long, default_value_t = 15)]
        interval_secs: u64,
    },
}

#[derive(Args, Debug, Clone)]
pub struct DealArgs {
    /// Deal vault address.
    #[arg(long)]
    pub vault: String,

    /// Position id of the deal in the deals manager.
    #[arg(long)]
    pub position_id: u64,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    logger::init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast_ref::<AppError>() {
                Some(app) => {
                    error!(code = app.code(), "{}", app);
                    eprintln!("{}", app.user_message());
                }
                None => {
                    error!("{:#}", err);
                    eprintln!("Error: {:#}", err);
                }
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match (cli.config_url.as_deref(), cli.rpc_url) {
        (None, None) => init_config()?,
        (url, rpc_url) => {
            let mut config = match url {
                Some(url) => {
                    info!(%url, "loading configuration from endpoint");
                    BlockchainConfig::fetch(url).await?
                }
                None => BlockchainConfig::from_env()?,
            };
            if let Some(rpc_url) = rpc_url {
                config.wallet_rpc_url = rpc_url;
            }
            set_config(config)?;
        }
    }
    let config = core_config();
    info!(chain_id = %config.evm_chain_id, rpc = %config.wallet_rpc_url, "configuration loaded");

    let ctx = Context::new(config)?;
    ctx.session.start().await;

    match cli.command {
        Command::Status => commands::status(&ctx).await,
        Command::Connect => commands::connect(&ctx).await,
        Command::SwitchNetwork { chain_id } => commands::switch_network(&ctx, chain_id.as_deref()).await,
        Command::Position(deal) => commands::position(&ctx, &deal).await,
        Command::Invest { deal, amount } => commands::invest(&ctx, &deal, amount).await,
        Command::Redeem(deal) => commands::redeem(&ctx, &deal).await,
        Command::Watch { interval_secs } => commands::watch(&ctx, interval_secs).await,
    }
}
