//! # Wallet Provider Access
//!
//! [`WalletProvider`] is the contract an injected wallet fulfils: EIP-1193 style
//! `request(method, params)` plus account / chain change notifications.
//! [`ChainProvider`] is the thin factory-produced handle the rest of the crate
//! uses; it owns no state beyond the provider itself.
//!
//! ## Provider Absence
//!
//! A missing provider is a normal condition, not a crash:
//! [`ChainProvider::from_injected`] returns [`AppError::ProviderUnavailable`] and
//! the UI shows the wallet feature as disabled.
//!
//! ## Waiting for Transactions
//!
//! [`Signer::wait_for_receipt`] polls until the transaction is mined. There is no
//! timeout: a wallet that has not answered yet is indistinguishable from a user
//! who has not approved yet.

pub mod http;

use alloy_primitives::{Address, Bytes, TxHash, U256, U64};
use async_trait::async_trait;
use lib_core::AppError;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Notification emitted by the wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletEvent {
    /// The set of authorized accounts changed; empty means the wallet locked or revoked access.
    AccountsChanged(Vec<Address>),
    /// The wallet switched networks; carries the new chain id as reported (`0x`-hex).
    ChainChanged(String),
}

/// Error returned by a wallet provider request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("provider error {code}: {message}")]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcError {
    /// The user rejected the request.
    pub const USER_REJECTED: i64 = 4001;
    /// The requested chain has not been added to the wallet.
    pub const UNRECOGNIZED_CHAIN: i64 = 4902;
    /// JSON-RPC internal error, also used for transport failures.
    pub const INTERNAL: i64 = -32603;
    /// A transaction was mined but reverted.
    pub const REVERTED: i64 = -32000;

    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(Self::INTERNAL, message)
    }

    pub fn decoding(message: impl Into<String>) -> Self {
        Self::new(Self::INTERNAL, format!("malformed response: {}", message.into()))
    }

    pub fn is_user_rejection(&self) -> bool {
        self.code == Self::USER_REJECTED
    }
}

impl From<RpcError> for AppError {
    fn from(err: RpcError) -> Self {
        AppError::Rpc(err.to_string())
    }
}

/// An injected wallet provider.
///
/// Implementations must be cheap to share; the crate holds them behind `Arc`.
#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Issue a JSON-RPC style request.
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError>;

    /// Subscribe to account and chain notifications.
    ///
    /// Dropping the receiver unsubscribes.
    fn subscribe(&self) -> broadcast::Receiver<WalletEvent>;
}

/// Mined transaction receipt, reduced to what this layer inspects.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    pub transaction_hash: TxHash,
    #[serde(default)]
    pub block_number: Option<U64>,
    /// `1` for success, `0` for revert. Absent on pre-Byzantium chains.
    #[serde(default)]
    pub status: Option<U64>,
}

impl TransactionReceipt {
    pub fn succeeded(&self) -> bool {
        self.status.map_or(true, |s| s == U64::from(1))
    }
}

/// Request/response handle over an injected wallet provider.
#[derive(Clone)]
pub struct ChainProvider {
    inner: Arc<dyn WalletProvider>,
    poll_interval: Duration,
}

impl std::fmt::Debug for ChainProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainProvider")
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl ChainProvider {
    /// Wrap the provider found in the execution environment, if any.
    pub fn from_injected(injected: Option<Arc<dyn WalletProvider>>) -> Result<Self, AppError> {
        injected.map(Self::new).ok_or(AppError::ProviderUnavailable)
    }

    pub fn new(inner: Arc<dyn WalletProvider>) -> Self {
        Self {
            inner,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Set how often [`Signer::wait_for_receipt`] polls.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        debug!(method, "wallet provider request");
        self.inner.request(method, params).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WalletEvent> {
        self.inner.subscribe()
    }

    /// Ask the user to authorize account access (`eth_requestAccounts`).
    pub async fn request_accounts(&self) -> Result<Vec<Address>, RpcError> {
        let value = self.request("eth_requestAccounts", json!([])).await?;
        decode(value)
    }

    /// Accounts already authorized, without prompting (`eth_accounts`).
    pub async fn accounts(&self) -> Result<Vec<Address>, RpcError> {
        let value = self.request("eth_accounts", json!([])).await?;
        decode(value)
    }

    /// Active chain id as the wallet reports it (`0x`-hex).
    pub async fn chain_id(&self) -> Result<String, RpcError> {
        let value = self.request("eth_chainId", json!([])).await?;
        decode(value)
    }

    /// Ask the wallet to switch to `chain_id` (`wallet_switchEthereumChain`).
    pub async fn switch_chain(&self, chain_id: &str) -> Result<(), RpcError> {
        self.request("wallet_switchEthereumChain", json!([{ "chainId": chain_id }]))
            .await
            .map(|_| ())
    }

    /// Native balance of `address` in wei.
    pub async fn balance(&self, address: Address) -> Result<U256, RpcError> {
        let value = self.request("eth_getBalance", json!([address, "latest"])).await?;
        decode(value)
    }

    /// Read-only contract call (`eth_call`).
    pub async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, RpcError> {
        let value = self
            .request("eth_call", json!([{ "to": to, "data": data }, "latest"]))
            .await?;
        decode(value)
    }

    pub async fn transaction_receipt(&self, hash: TxHash) -> Result<Option<TransactionReceipt>, RpcError> {
        let value = self.request("eth_getTransactionReceipt", json!([hash])).await?;
        decode(value)
    }

    /// Signing handle for a connected account.
    pub fn signer(&self, address: Address) -> Signer {
        Signer {
            address,
            provider: self.clone(),
        }
    }
}

fn decode<T: for<'de> Deserialize<'de>>(value: Value) -> Result<T, RpcError> {
    serde_json::from_value(value).map_err(|e| RpcError::decoding(e.to_string()))
}

/// A connected account able to sign and send transactions through the wallet.
#[derive(Clone, Debug)]
pub struct Signer {
    address: Address,
    provider: ChainProvider,
}

impl Signer {
    pub fn address(&self) -> Address {
        self.address
    }

    pub fn provider(&self) -> &ChainProvider {
        &self.provider
    }

    /// Hand a transaction to the wallet for signing and submission.
    pub async fn send_transaction(&self, to: Address, data: Bytes) -> Result<TxHash, RpcError> {
        let tx = json!({ "from": self.address, "to": to, "data": data });
        let value = self.provider.request("eth_sendTransaction", json!([tx])).await?;
        decode(value)
    }

    /// Poll until the transaction is mined.
    pub async fn wait_for_receipt(&self, hash: TxHash) -> Result<TransactionReceipt, RpcError> {
        loop {
            if let Some(receipt) = self.provider.transaction_receipt(hash).await? {
                return Ok(receipt);
            }
            tokio::time::sleep(self.provider.poll_interval).await;
        }
    }

    /// Submit a transaction and wait for it to be mined. A reverted receipt is an error.
    pub async fn send_and_confirm(&self, to: Address, data: Bytes) -> Result<TxHash, RpcError> {
        let hash = self.send_transaction(to, data).await?;
        debug!(%hash, %to, "transaction submitted, waiting for receipt");

        let receipt = self.wait_for_receipt(hash).await?;
        if !receipt.succeeded() {
            return Err(RpcError::new(RpcError::REVERTED, format!("transaction {} reverted", hash)));
        }
        Ok(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockWallet;

    #[test]
    fn test_missing_provider() {
        let err = ChainProvider::from_injected(None).unwrap_err();
        assert_eq!(err, AppError::ProviderUnavailable);
    }

    #[tokio::test]
    async fn test_switch_chain_params() {
        let mock = MockWallet::new();
        mock.on("wallet_switchEthereumChain", |_| Ok(Value::Null));
        let provider = mock.chain_provider();

        provider.switch_chain("0x2105").await.unwrap();

        let calls = mock.calls_to("wallet_switchEthereumChain");
        assert_eq!(calls, vec![json!([{ "chainId": "0x2105" }])]);
    }

    #[tokio::test]
    async fn test_balance_decodes_hex_quantity() {
        let mock = MockWallet::new();
        mock.on("eth_getBalance", |_| Ok(json!("0x22b1c8c1227a0000")));

        let balance = mock.chain_provider().balance(Address::repeat_byte(1)).await.unwrap();
        assert_eq!(balance, U256::from(2_500_000_000_000_000_000u128));
    }

    #[tokio::test]
    async fn test_wait_for_receipt_polls_until_mined() {
        let mock = MockWallet::new();
        let hash = mock.next_tx_hash();
        mock.pending_receipts(hash, 2, true);

        let signer = mock.chain_provider().signer(Address::repeat_byte(2));
        let receipt = signer.wait_for_receipt(hash).await.unwrap();

        assert!(receipt.succeeded());
        assert_eq!(mock.calls_to("eth_getTransactionReceipt").len(), 3);
    }

    #[tokio::test]
    async fn test_reverted_transaction_is_error() {
        let mock = MockWallet::new();
        mock.mine_transactions_with_status(false);

        let signer = mock.chain_provider().signer(Address::repeat_byte(2));
        let err = signer
            .send_and_confirm(Address::repeat_byte(3), Bytes::from(vec![1, 2, 3]))
            .await
            .unwrap_err();

        assert_eq!(err.code, RpcError::REVERTED);
    }

    #[test]
    fn test_receipt_without_status_counts_as_success() {
        let receipt: TransactionReceipt = serde_json::from_value(json!({
            "transactionHash": format!("0x{}", "ab".repeat(32)),
            "blockNumber": "0x10"
        }))
        .unwrap();
        assert!(receipt.succeeded());
    }
}
