//! # Wallet Session
//!
//! [`WalletSession`] owns the connection lifecycle of one injected wallet and the
//! single source of truth for wallet data ([`WalletState`]). It is created once,
//! cloned into every consumer, and is the only writer of that state.
//!
//! ## Lifecycle
//!
//! ```text
//! Disconnected --connect()--> Connecting --accounts granted--> Connected
//!      ^                          |                               |
//!      +------ rejected / none ---+                               |
//!      +------------- disconnect() / empty accountsChanged -------+
//! ```
//!
//! The address and the [`Signer`] are set and cleared together: a session never
//! exposes a signer without an address or the other way around.
//!
//! ## Notifications
//!
//! On the first successful connection the session starts listening for the
//! wallet's account and chain notifications and processes them in the order they
//! arrive. A wallet-side lock (empty `accountsChanged`) disconnects but keeps
//! listening, so a later unlock re-adopts the account. An explicit
//! [`WalletSession::disconnect`] stops the listener; notifications that were
//! already in flight are discarded.
//!
//! ## Balances
//!
//! Native and token balances are read concurrently. Each one is committed as soon
//! as its own read finishes; a failed read keeps the previous value.

use crate::guard::TaskGuard;
use crate::network::{chains_match, NetworkGuard};
use crate::provider::{ChainProvider, RpcError, Signer, WalletEvent};
use crate::token::TokenBalanceReader;
use crate::units::{from_base_units, parse_optional_address, NATIVE_DECIMALS};
use alloy_primitives::Address;
use lib_core::config::{format_chain_id, parse_chain_id};
use lib_core::{AppError, BlockchainConfig, Result};
use parking_lot::{Mutex, RwLock};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Wallet data shared with the UI.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WalletState {
    /// Connected account; `None` when disconnected.
    pub address: Option<Address>,
    /// Native balance in ether units.
    pub native_balance: f64,
    /// Investment token balance in token units.
    pub token_balance: f64,
    /// Chain id as the wallet reports it (`0x`-hex).
    pub active_chain_id: Option<String>,
}

impl WalletState {
    pub fn is_connected(&self) -> bool {
        self.address.is_some()
    }
}

struct SessionState {
    status: ConnectionStatus,
    signer: Option<Signer>,
    wallet: WalletState,
    /// Bumped by every explicit disconnect. Work started under an older epoch
    /// must not write.
    epoch: u64,
}

impl SessionState {
    fn clear(&mut self) {
        self.status = ConnectionStatus::Disconnected;
        self.signer = None;
        self.wallet = WalletState::default();
    }
}

struct SessionInner {
    provider: ChainProvider,
    token: Option<TokenBalanceReader>,
    state: RwLock<SessionState>,
    updates: watch::Sender<WalletState>,
    listener: Mutex<Option<TaskGuard>>,
}

/// Shared handle to the wallet session. Cloning is cheap; all clones observe and
/// drive the same session.
#[derive(Clone)]
pub struct WalletSession {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for WalletSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.read();
        f.debug_struct("WalletSession")
            .field("status", &state.status)
            .field("wallet", &state.wallet)
            .finish_non_exhaustive()
    }
}

impl WalletSession {
    /// Create a disconnected session. Without a token reader the token balance
    /// stays at zero.
    pub fn new(provider: ChainProvider, token: Option<TokenBalanceReader>) -> Self {
        let (updates, _) = watch::channel(WalletState::default());
        Self {
            inner: Arc::new(SessionInner {
                provider,
                token,
                state: RwLock::new(SessionState {
                    status: ConnectionStatus::Disconnected,
                    signer: None,
                    wallet: WalletState::default(),
                    epoch: 0,
                }),
                updates,
                listener: Mutex::new(None),
            }),
        }
    }

    /// Create a session for the investment token and receipt polling interval
    /// named in `config`.
    pub fn from_config(provider: ChainProvider, config: &BlockchainConfig) -> Result<Self> {
        let provider = provider.with_poll_interval(config.receipt_poll_interval());
        let token = parse_optional_address(&config.investment_token_address)?
            .map(|address| TokenBalanceReader::new(provider.clone(), address, config.investment_token_decimals));
        if token.is_none() {
            warn!("no investment token configured; token balance will not be read");
        }
        Ok(Self::new(provider, token))
    }

    pub fn provider(&self) -> &ChainProvider {
        &self.inner.provider
    }

    /// Snapshot of the current wallet data.
    pub fn state(&self) -> WalletState {
        self.inner.state.read().wallet.clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.state.read().status
    }

    pub fn address(&self) -> Option<Address> {
        self.inner.state.read().wallet.address
    }

    /// Signing handle for the connected account, if any.
    pub fn signer(&self) -> Option<Signer> {
        self.inner.state.read().signer.clone()
    }

    /// Receive every change to [`WalletState`].
    pub fn subscribe(&self) -> watch::Receiver<WalletState> {
        self.inner.updates.subscribe()
    }

    /// Whether wallet notifications are currently being processed.
    pub fn is_listening(&self) -> bool {
        self.inner
            .listener
            .lock()
            .as_ref()
            .is_some_and(|guard| !guard.is_finished())
    }

    pub fn is_on_chain(&self, required: &str) -> bool {
        chains_match(self.inner.state.read().wallet.active_chain_id.as_deref(), required)
    }

    /// `Ok` when the wallet is on `required`, [`AppError::ChainMismatch`] otherwise.
    pub fn check_network(&self, required: &str) -> Result<()> {
        let active = self.inner.state.read().wallet.active_chain_id.clone();
        NetworkGuard::new(required).check(active.as_deref())
    }

    /// Adopt an account the wallet has already authorized, without prompting.
    ///
    /// Used at startup so a returning user does not have to reconnect.
    pub async fn start(&self) {
        let epoch = self.inner.state.read().epoch;

        let accounts = match self.inner.provider.accounts().await {
            Ok(accounts) => accounts,
            Err(e) => {
                warn!("could not check for authorized accounts: {}", e);
                return;
            }
        };
        let Some(address) = accounts.first().copied() else {
            debug!("no previously authorized account");
            return;
        };

        let chain_id = self.read_chain_id().await;
        if self.adopt(address, chain_id, epoch) {
            info!(%address, "resumed previously authorized account");
            self.ensure_listening();
            self.spawn_refresh(false);
        }
    }

    /// Ask the wallet for account access.
    ///
    /// Returns once the account is adopted; balances load in the background.
    /// Calling this while connected returns the current address without
    /// prompting again.
    pub async fn connect(&self) -> Result<Address> {
        let epoch = {
            let mut state = self.inner.state.write();
            if let (ConnectionStatus::Connected, Some(signer)) = (state.status, state.signer.as_ref()) {
                return Ok(signer.address());
            }
            state.status = ConnectionStatus::Connecting;
            state.epoch
        };
        info!("requesting wallet account access");

        let accounts = match self.inner.provider.request_accounts().await {
            Ok(accounts) => accounts,
            Err(e) => {
                self.abandon_connect(epoch);
                return Err(if e.is_user_rejection() {
                    warn!("wallet connection rejected by user");
                    AppError::ConnectionRejected(e.message)
                } else {
                    warn!("wallet connection failed: {}", e);
                    AppError::from(e)
                });
            }
        };

        let Some(address) = accounts.first().copied() else {
            self.abandon_connect(epoch);
            warn!("wallet granted access to no accounts");
            return Err(AppError::ConnectionRejected("wallet returned no accounts".to_string()));
        };

        let chain_id = self.read_chain_id().await;
        if !self.adopt(address, chain_id, epoch) {
            return Err(AppError::ConnectionRejected(
                "session was disconnected while connecting".to_string(),
            ));
        }

        self.ensure_listening();
        self.spawn_refresh(false);
        info!(%address, "wallet connected");
        Ok(address)
    }

    /// Forget the connected account and stop processing wallet notifications.
    ///
    /// Reads and notifications still in flight are discarded when they complete.
    pub fn disconnect(&self) {
        self.update(|state| {
            state.epoch += 1;
            state.clear();
        });
        let listener = self.inner.listener.lock().take();
        drop(listener);
        info!("wallet disconnected");
    }

    /// Re-read native and token balances for the connected account.
    ///
    /// Does nothing when disconnected. Never fails: a failed read is logged and
    /// the previous value is kept.
    pub async fn refresh_balances(&self) {
        let (address, epoch) = {
            let state = self.inner.state.read();
            match state.wallet.address {
                Some(address) => (address, state.epoch),
                None => return,
            }
        };

        let native = async {
            let result = match self.inner.provider.balance(address).await {
                Ok(wei) => from_base_units(wei, NATIVE_DECIMALS),
                Err(e) => Err(AppError::ReadFailed {
                    field: "nativeBalance",
                    reason: e.to_string(),
                }),
            };
            match result {
                Ok(balance) => self.commit(address, epoch, |wallet| wallet.native_balance = balance),
                Err(e) => warn!(%address, "{}; keeping previous native balance", e),
            }
        };

        let token = async {
            let Some(reader) = self.inner.token.as_ref() else {
                return;
            };
            match reader.balance_of(address).await {
                Ok(balance) => self.commit(address, epoch, |wallet| wallet.token_balance = balance),
                Err(e) => warn!(%address, "{}; keeping previous token balance", e),
            }
        };

        tokio::join!(native, token);
    }

    /// Make sure the wallet is on `required`, asking it to switch if not.
    ///
    /// Issues no request when already there. A chain the wallet does not know
    /// yields [`AppError::ChainNotRegistered`]; a declined switch leaves the
    /// session on the wrong chain and yields [`AppError::ChainMismatch`].
    pub async fn ensure_network(&self, required: &str) -> Result<()> {
        let active = self.inner.state.read().wallet.active_chain_id.clone();
        if chains_match(active.as_deref(), required) {
            debug!(required, "already on required network");
            return Ok(());
        }

        let chain_id = parse_chain_id(required)
            .map(format_chain_id)
            .ok_or_else(|| AppError::Config(format!("invalid chain id: {}", required)))?;

        info!(active = ?active, required = %chain_id, "requesting network switch");
        match self.inner.provider.switch_chain(&chain_id).await {
            Ok(()) => {
                self.update(|state| state.wallet.active_chain_id = Some(chain_id.clone()));
                info!(chain_id = %chain_id, "network switched");
                Ok(())
            }
            Err(e) if e.code == RpcError::UNRECOGNIZED_CHAIN => {
                warn!(chain_id = %chain_id, "network is not registered in the wallet");
                Err(AppError::ChainNotRegistered(chain_id))
            }
            Err(e) if e.is_user_rejection() => {
                warn!(chain_id = %chain_id, "network switch rejected by user");
                Err(AppError::ChainMismatch {
                    active,
                    required: chain_id,
                })
            }
            Err(e) => Err(AppError::from(e)),
        }
    }

    /// Refresh balances every `interval` until the returned guard is dropped.
    ///
    /// The task holds no strong reference to the session between ticks, so
    /// dropping every session handle also ends it.
    pub fn spawn_balance_refresher(&self, interval: Duration) -> TaskGuard {
        let session = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately; connect already refreshed.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = session.upgrade() else {
                    break;
                };
                WalletSession { inner }.refresh_balances().await;
            }
        });
        TaskGuard::new(handle)
    }

    /// Apply one wallet notification received under `epoch`.
    fn handle_event(&self, event: WalletEvent, epoch: u64) {
        if self.inner.state.read().epoch != epoch {
            debug!(?event, "ignoring notification from a previous session");
            return;
        }

        match event {
            WalletEvent::AccountsChanged(accounts) => match accounts.first().copied() {
                Some(address) => {
                    let needs_chain = self.inner.state.read().wallet.active_chain_id.is_none();
                    if self.adopt(address, None, epoch) {
                        info!(%address, "wallet account changed");
                        self.spawn_refresh(needs_chain);
                    }
                }
                None => {
                    info!("wallet reported no accounts; disconnecting");
                    self.update(|state| {
                        if state.epoch == epoch {
                            state.clear();
                        }
                    });
                }
            },
            WalletEvent::ChainChanged(chain_id) => {
                info!(%chain_id, "wallet network changed");
                self.update(|state| {
                    if state.epoch == epoch {
                        state.wallet.active_chain_id = Some(chain_id);
                    }
                });
            }
        }
    }

    fn ensure_listening(&self) {
        let mut listener = self.inner.listener.lock();
        if listener.as_ref().is_some_and(|guard| !guard.is_finished()) {
            return;
        }

        let mut events = self.inner.provider.subscribe();
        let session: Weak<SessionInner> = Arc::downgrade(&self.inner);
        let epoch = self.inner.state.read().epoch;

        let handle = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        let Some(inner) = session.upgrade() else {
                            break;
                        };
                        WalletSession { inner }.handle_event(event, epoch);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "wallet notifications dropped")
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("wallet notification listener stopped");
        });

        *listener = Some(TaskGuard::new(handle));
    }

    /// Set `address` as the connected account unless the session was
    /// disconnected since `epoch`. Balances reset when the account changes.
    fn adopt(&self, address: Address, chain_id: Option<String>, epoch: u64) -> bool {
        let provider = self.inner.provider.clone();
        self.update(|state| {
            if state.epoch != epoch {
                return false;
            }
            if state.wallet.address != Some(address) {
                state.wallet.address = Some(address);
                state.wallet.native_balance = 0.0;
                state.wallet.token_balance = 0.0;
            }
            if chain_id.is_some() {
                state.wallet.active_chain_id = chain_id;
            }
            state.signer = Some(provider.signer(address));
            state.status = ConnectionStatus::Connected;
            true
        })
    }

    fn abandon_connect(&self, epoch: u64) {
        let mut state = self.inner.state.write();
        if state.epoch == epoch && state.status == ConnectionStatus::Connecting {
            state.status = ConnectionStatus::Disconnected;
        }
    }

    async fn read_chain_id(&self) -> Option<String> {
        match self.inner.provider.chain_id().await {
            Ok(chain_id) => Some(chain_id),
            Err(e) => {
                warn!("could not read active chain id: {}", e);
                None
            }
        }
    }

    fn spawn_refresh(&self, with_chain_id: bool) {
        let session = self.clone();
        tokio::spawn(async move {
            if with_chain_id {
                let epoch = session.inner.state.read().epoch;
                if let Some(chain_id) = session.read_chain_id().await {
                    session.update(|state| {
                        if state.epoch == epoch && state.wallet.active_chain_id.is_none() {
                            state.wallet.active_chain_id = Some(chain_id);
                        }
                    });
                }
            }
            session.refresh_balances().await;
        });
    }

    /// Write a balance read for `address` unless the account changed meanwhile.
    fn commit(&self, address: Address, epoch: u64, apply: impl FnOnce(&mut WalletState)) {
        self.update(|state| {
            if state.epoch == epoch && state.wallet.address == Some(address) {
                apply(&mut state.wallet);
            }
        });
    }

    /// Mutate the state and publish the result while still holding the lock, so
    /// subscribers never see updates out of order.
    fn update<R>(&self, mutate: impl FnOnce(&mut SessionState) -> R) -> R {
        let mut state = self.inner.state.write();
        let result = mutate(&mut *state);
        let wallet = state.wallet.clone();
        self.inner.updates.send_if_modified(|current| {
            if *current == wallet {
                false
            } else {
                *current = wallet;
                true
            }
        });
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::IERC20;
    use crate::mock::MockWallet;
    use alloy_primitives::U256;
    use alloy_sol_types::SolCall;
    use serde_json::json;

    const TOKEN: Address = Address::repeat_byte(0x10);

    fn account(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    fn wallet_with_account(address: Address) -> MockWallet {
        let mock = MockWallet::new();
        mock.on("eth_requestAccounts", move |_| Ok(json!([address])));
        mock.on("eth_accounts", move |_| Ok(json!([address])));
        mock.on("eth_chainId", |_| Ok(json!("0x1")));
        mock.on("eth_getBalance", |_| Ok(json!(U256::from(2_500_000_000_000_000_000u128))));
        mock.on_call_uint(IERC20::balanceOfCall::SELECTOR, U256::from(1_000_000_000u64));
        mock
    }

    fn session_for(mock: &MockWallet) -> WalletSession {
        let reader = TokenBalanceReader::new(mock.chain_provider(), TOKEN, 6);
        WalletSession::new(mock.chain_provider(), Some(reader))
    }

    async fn wait_until(session: &WalletSession, predicate: impl FnMut(&WalletState) -> bool) -> WalletState {
        let mut updates = session.subscribe();
        let state = tokio::time::timeout(Duration::from_secs(2), updates.wait_for(predicate))
            .await
            .expect("timed out waiting for wallet state")
            .expect("session dropped");
        WalletState::clone(&state)
    }

    #[tokio::test]
    async fn test_connect_loads_balances_in_background() {
        let mock = wallet_with_account(account(0xab));
        let session = session_for(&mock);

        let address = session.connect().await.unwrap();
        assert_eq!(address, account(0xab));
        assert_eq!(session.status(), ConnectionStatus::Connected);
        assert_eq!(session.signer().map(|s| s.address()), Some(address));
        // Balances have not been read yet; connect does not wait for them.
        assert_eq!(session.state().native_balance, 0.0);

        let state = wait_until(&session, |s| s.native_balance > 0.0 && s.token_balance > 0.0).await;
        assert_eq!(state.address, Some(account(0xab)));
        assert_eq!(state.native_balance, 2.5);
        assert_eq!(state.token_balance, 1000.0);
        assert_eq!(state.active_chain_id.as_deref(), Some("0x1"));
        assert!(session.is_listening());
    }

    #[tokio::test]
    async fn test_connect_rejected() {
        let mock = MockWallet::new();
        mock.on("eth_requestAccounts", |_| {
            Err(RpcError::new(RpcError::USER_REJECTED, "User rejected the request."))
        });
        let session = session_for(&mock);

        let err = session.connect().await.unwrap_err();
        assert!(matches!(err, AppError::ConnectionRejected(_)));
        assert_eq!(session.status(), ConnectionStatus::Disconnected);
        assert!(session.state().address.is_none());
        assert!(session.signer().is_none());
        assert!(!session.is_listening());
    }

    #[tokio::test]
    async fn test_connect_with_no_accounts() {
        let mock = MockWallet::new();
        mock.on("eth_requestAccounts", |_| Ok(json!([])));
        let session = session_for(&mock);

        let err = session.connect().await.unwrap_err();
        assert!(matches!(err, AppError::ConnectionRejected(_)));
        assert_eq!(session.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_twice_does_not_prompt_again() {
        let mock = wallet_with_account(account(0xab));
        let session = session_for(&mock);

        session.connect().await.unwrap();
        session.connect().await.unwrap();
        assert_eq!(mock.calls_to("eth_requestAccounts").len(), 1);
    }

    #[tokio::test]
    async fn test_account_notifications_keep_last_non_empty() {
        let sequences: Vec<(Vec<Vec<u8>>, Option<u8>)> = vec![
            (vec![vec![0xb1]], Some(0xb1)),
            (vec![vec![0xb1], vec![0xc1]], Some(0xc1)),
            (vec![vec![0xb1], vec![]], None),
            (vec![vec![0xb1], vec![], vec![0xc1]], Some(0xc1)),
            (vec![vec![], vec![]], None),
            (vec![vec![0xb1, 0xb2], vec![0xc1, 0xc2]], Some(0xc1)),
        ];

        for (sequence, expected) in sequences {
            let mock = wallet_with_account(account(0xab));
            let session = session_for(&mock);
            session.connect().await.unwrap();
            let epoch = session.inner.state.read().epoch;

            for accounts in &sequence {
                let accounts = accounts.iter().copied().map(account).collect();
                session.handle_event(WalletEvent::AccountsChanged(accounts), epoch);
            }

            let state = session.state();
            assert_eq!(state.address, expected.map(account), "sequence {:?}", sequence);
            assert_eq!(session.signer().map(|s| s.address()), state.address);
            let expected_status = if expected.is_some() {
                ConnectionStatus::Connected
            } else {
                ConnectionStatus::Disconnected
            };
            assert_eq!(session.status(), expected_status);
        }
    }

    #[tokio::test]
    async fn test_account_change_through_listener() {
        let mock = wallet_with_account(account(0xab));
        let session = session_for(&mock);
        session.connect().await.unwrap();

        mock.emit(WalletEvent::AccountsChanged(vec![account(0xcd)]));
        let state = wait_until(&session, |s| s.address == Some(account(0xcd))).await;
        assert_eq!(session.signer().map(|s| s.address()), state.address);

        mock.emit(WalletEvent::AccountsChanged(vec![]));
        wait_until(&session, |s| s.address.is_none()).await;
        assert!(session.is_listening());

        mock.emit(WalletEvent::AccountsChanged(vec![account(0xef)]));
        let state = wait_until(&session, |s| s.address == Some(account(0xef))).await;
        assert_eq!(session.status(), ConnectionStatus::Connected);
        // The chain id was cleared with the lock and is read again on unlock.
        let state = if state.active_chain_id.is_none() {
            wait_until(&session, |s| s.active_chain_id.is_some()).await
        } else {
            state
        };
        assert_eq!(state.active_chain_id.as_deref(), Some("0x1"));
    }

    #[tokio::test]
    async fn test_chain_change_updates_only_chain() {
        let mock = wallet_with_account(account(0xab));
        let session = session_for(&mock);
        session.connect().await.unwrap();
        let before = wait_until(&session, |s| s.native_balance > 0.0 && s.token_balance > 0.0).await;
        let balance_reads = mock.calls_to("eth_getBalance").len();

        mock.emit(WalletEvent::ChainChanged("0x2105".to_string()));
        let after = wait_until(&session, |s| s.active_chain_id.as_deref() == Some("0x2105")).await;

        assert_eq!(after.address, before.address);
        assert_eq!(after.native_balance, before.native_balance);
        assert_eq!(after.token_balance, before.token_balance);
        assert_eq!(mock.calls_to("eth_getBalance").len(), balance_reads);
    }

    #[tokio::test]
    async fn test_disconnect_ignores_later_notifications() {
        let mock = wallet_with_account(account(0xab));
        let session = session_for(&mock);
        session.connect().await.unwrap();
        let stale_epoch = session.inner.state.read().epoch;

        session.disconnect();
        assert_eq!(session.state(), WalletState::default());
        assert_eq!(session.status(), ConnectionStatus::Disconnected);
        assert!(!session.is_listening());

        mock.emit(WalletEvent::AccountsChanged(vec![account(0xcd)]));
        session.handle_event(WalletEvent::AccountsChanged(vec![account(0xcd)]), stale_epoch);
        session.handle_event(WalletEvent::ChainChanged("0x5".to_string()), stale_epoch);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(session.state(), WalletState::default());
        assert!(session.signer().is_none());
    }

    #[tokio::test]
    async fn test_balances_from_before_disconnect_are_discarded() {
        let mock = wallet_with_account(account(0xab));
        let session = session_for(&mock);
        session.connect().await.unwrap();

        // The spawned balance refresh has not run yet.
        session.disconnect();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(session.state(), WalletState::default());
    }

    #[tokio::test]
    async fn test_failed_read_keeps_previous_value() {
        let mock = wallet_with_account(account(0xab));
        let session = session_for(&mock);
        session.connect().await.unwrap();
        wait_until(&session, |s| s.native_balance > 0.0 && s.token_balance > 0.0).await;

        mock.on("eth_getBalance", |_| Ok(json!(U256::from(1_000_000_000_000_000_000u128))));
        mock.on_call(IERC20::balanceOfCall::SELECTOR, |_| Err(RpcError::internal("node unavailable")));
        session.refresh_balances().await;

        let state = session.state();
        assert_eq!(state.native_balance, 1.0);
        assert_eq!(state.token_balance, 1000.0);
    }

    #[tokio::test]
    async fn test_slow_token_read_does_not_hold_back_native_balance() {
        let mock = wallet_with_account(account(0xab));
        let token_read = mock.hold_call(IERC20::balanceOfCall::SELECTOR);
        let session = session_for(&mock);
        session.connect().await.unwrap();

        let state = wait_until(&session, |s| s.native_balance > 0.0).await;
        assert_eq!(state.native_balance, 2.5);
        assert_eq!(state.token_balance, 0.0);
        assert_eq!(session.state().token_balance, 0.0);

        token_read.notify_one();
        let state = wait_until(&session, |s| s.token_balance > 0.0).await;
        assert_eq!(state.token_balance, 1000.0);
        assert_eq!(state.native_balance, 2.5);
    }

    #[tokio::test]
    async fn test_refresh_while_disconnected_reads_nothing() {
        let mock = wallet_with_account(account(0xab));
        let session = session_for(&mock);

        session.refresh_balances().await;
        assert!(mock.calls_to("eth_getBalance").is_empty());
        assert!(mock.calls_to("eth_call").is_empty());
    }

    #[tokio::test]
    async fn test_ensure_network_on_required_chain_is_noop() {
        let mock = wallet_with_account(account(0xab));
        let session = session_for(&mock);
        session.connect().await.unwrap();

        session.ensure_network("0x1").await.unwrap();
        session.ensure_network("1").await.unwrap();
        assert!(mock.calls_to("wallet_switchEthereumChain").is_empty());
    }

    #[tokio::test]
    async fn test_ensure_network_switches() {
        let mock = wallet_with_account(account(0xab));
        mock.on("wallet_switchEthereumChain", |_| Ok(serde_json::Value::Null));
        let session = session_for(&mock);
        session.connect().await.unwrap();

        session.ensure_network("8453").await.unwrap();

        assert_eq!(
            mock.calls_to("wallet_switchEthereumChain"),
            vec![json!([{ "chainId": "0x2105" }])]
        );
        assert_eq!(session.state().active_chain_id.as_deref(), Some("0x2105"));
        assert!(session.check_network("0x2105").is_ok());
    }

    #[tokio::test]
    async fn test_ensure_network_unknown_chain() {
        let mock = wallet_with_account(account(0xab));
        mock.on("wallet_switchEthereumChain", |_| {
            Err(RpcError::new(RpcError::UNRECOGNIZED_CHAIN, "Unrecognized chain ID"))
        });
        let session = session_for(&mock);
        session.connect().await.unwrap();

        let err = session.ensure_network("0x2105").await.unwrap_err();
        assert_eq!(err, AppError::ChainNotRegistered("0x2105".to_string()));
        assert_eq!(session.state().active_chain_id.as_deref(), Some("0x1"));
    }

    #[tokio::test]
    async fn test_ensure_network_declined() {
        let mock = wallet_with_account(account(0xab));
        mock.on("wallet_switchEthereumChain", |_| {
            Err(RpcError::new(RpcError::USER_REJECTED, "User rejected the request."))
        });
        let session = session_for(&mock);
        session.connect().await.unwrap();

        let err = session.ensure_network("0x2105").await.unwrap_err();
        assert!(matches!(err, AppError::ChainMismatch { .. }));
        assert!(session.check_network("0x2105").is_err());
    }

    #[tokio::test]
    async fn test_start_resumes_authorized_account() {
        let mock = wallet_with_account(account(0xab));
        let session = session_for(&mock);

        session.start().await;

        assert_eq!(session.address(), Some(account(0xab)));
        assert_eq!(session.status(), ConnectionStatus::Connected);
        assert!(mock.calls_to("eth_requestAccounts").is_empty());
        wait_until(&session, |s| s.token_balance == 1000.0).await;
    }

    #[tokio::test]
    async fn test_start_without_authorized_account() {
        let mock = MockWallet::new();
        mock.on("eth_accounts", |_| Ok(json!([])));
        let session = session_for(&mock);

        session.start().await;
        assert_eq!(session.status(), ConnectionStatus::Disconnected);
        assert!(!session.is_listening());
    }

    #[tokio::test]
    async fn test_from_config_without_token() {
        let mock = MockWallet::new();
        let config = BlockchainConfig::default();
        let session = WalletSession::from_config(mock.chain_provider(), &config).unwrap();
        assert!(session.inner.token.is_none());
    }

    #[tokio::test]
    async fn test_balance_refresher_stops_with_guard() {
        let mock = wallet_with_account(account(0xab));
        let session = session_for(&mock);
        session.connect().await.unwrap();

        let guard = session.spawn_balance_refresher(Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(40)).await;
        let reads = mock.calls_to("eth_getBalance").len();
        assert!(reads >= 2);

        drop(guard);
        tokio::time::sleep(Duration::from_millis(10)).await;
        let stopped_at = mock.calls_to("eth_getBalance").len();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(mock.calls_to("eth_getBalance").len(), stopped_at);
    }
}
