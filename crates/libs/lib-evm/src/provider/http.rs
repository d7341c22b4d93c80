//! # HTTP JSON-RPC Wallet Provider
//!
//! [`WalletProvider`] for environments without a browser wallet: requests are
//! forwarded as JSON-RPC 2.0 over HTTP to a node that manages the accounts
//! (a local development node or a signing proxy with unlocked accounts).
//!
//! Such a node has no permission prompt, so `eth_requestAccounts` is answered
//! from `eth_accounts`. It also pushes no notifications; call
//! [`HttpWalletProvider::spawn_watcher`] to poll for account and chain changes.

use super::{RpcError, WalletEvent, WalletProvider};
use crate::guard::TaskGuard;
use alloy_primitives::Address;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// JSON-RPC over HTTP wallet provider.
pub struct HttpWalletProvider {
    client: Client,
    url: String,
    next_id: AtomicU64,
    events: broadcast::Sender<WalletEvent>,
}

impl HttpWalletProvider {
    /// Create a provider for the JSON-RPC endpoint at `url`.
    ///
    /// Only connecting is time-limited. A request the node has accepted may take
    /// as long as it takes.
    pub fn new(url: impl Into<String>) -> Self {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        let (events, _) = broadcast::channel(64);

        Self {
            client,
            url: url.into(),
            next_id: AtomicU64::new(1),
            events,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn rpc(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| RpcError::internal(format!("request to {} failed: {}", self.url, e)))?;

        let status = response.status();
        let payload: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| RpcError::internal(format!("invalid JSON-RPC response (HTTP {}): {}", status, e)))?;

        if let Some(error) = payload.error {
            return Err(RpcError::new(error.code, error.message));
        }
        Ok(payload.result.unwrap_or(Value::Null))
    }

    /// Poll the node for account and chain changes and emit them as notifications.
    ///
    /// The first poll establishes the baseline and emits nothing. Dropping the
    /// returned guard stops the watcher.
    pub fn spawn_watcher(self: &Arc<Self>, interval: Duration) -> TaskGuard {
        let provider = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            let mut last_accounts: Option<Vec<Address>> = None;
            let mut last_chain: Option<String> = None;

            loop {
                ticker.tick().await;

                match provider.rpc("eth_accounts", json!([])).await {
                    Ok(value) => match serde_json::from_value::<Vec<Address>>(value) {
                        Ok(accounts) => {
                            if last_accounts.as_ref().is_some_and(|prev| *prev != accounts) {
                                info!(count = accounts.len(), "node accounts changed");
                                let _ = provider.events.send(WalletEvent::AccountsChanged(accounts.clone()));
                            }
                            last_accounts = Some(accounts);
                        }
                        Err(e) => warn!("watcher: malformed eth_accounts response: {}", e),
                    },
                    Err(e) => warn!("watcher: eth_accounts failed: {}", e),
                }

                match provider.rpc("eth_chainId", json!([])).await {
                    Ok(Value::String(chain_id)) => {
                        if last_chain.as_ref().is_some_and(|prev| *prev != chain_id) {
                            info!(%chain_id, "node chain changed");
                            let _ = provider.events.send(WalletEvent::ChainChanged(chain_id.clone()));
                        }
                        last_chain = Some(chain_id);
                    }
                    Ok(other) => warn!("watcher: unexpected eth_chainId response: {}", other),
                    Err(e) => warn!("watcher: eth_chainId failed: {}", e),
                }
            }
        });

        TaskGuard::new(handle)
    }
}

#[async_trait]
impl WalletProvider for HttpWalletProvider {
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let method = match method {
            "eth_requestAccounts" => "eth_accounts",
            other => other,
        };
        debug!(method, url = %self.url, "json-rpc request");
        self.rpc(method, params).await
    }

    fn subscribe(&self) -> broadcast::Receiver<WalletEvent> {
        self.events.subscribe()
    }
}
