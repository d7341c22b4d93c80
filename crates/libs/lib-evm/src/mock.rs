//! Scripted in-memory wallet provider for tests.

use crate::provider::{ChainProvider, RpcError, WalletEvent, WalletProvider};
use alloy_primitives::{Bytes, TxHash, B256, U256};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify};

type Handler = Box<dyn FnMut(&Value) -> Result<Value, RpcError> + Send>;

/// How a submitted transaction gets mined: after `pending` receipt polls, with `success`.
#[derive(Clone, Copy, Debug)]
struct ReceiptScript {
    pending: usize,
    success: bool,
}

#[derive(Clone)]
pub(crate) struct MockWallet {
    inner: Arc<MockInner>,
}

struct MockInner {
    handlers: Mutex<HashMap<String, Handler>>,
    call_handlers: Mutex<HashMap<[u8; 4], Handler>>,
    call_gates: Mutex<HashMap<[u8; 4], Arc<Notify>>>,
    calls: Mutex<Vec<(String, Value)>>,
    events: broadcast::Sender<WalletEvent>,
    next_hash: Mutex<u64>,
    receipts: Mutex<HashMap<TxHash, ReceiptScript>>,
    scripted_sends: Mutex<VecDeque<ReceiptScript>>,
    default_success: Mutex<bool>,
}

impl MockWallet {
    pub(crate) fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(MockInner {
                handlers: Mutex::new(HashMap::new()),
                call_handlers: Mutex::new(HashMap::new()),
                call_gates: Mutex::new(HashMap::new()),
                calls: Mutex::new(Vec::new()),
                events,
                next_hash: Mutex::new(0),
                receipts: Mutex::new(HashMap::new()),
                scripted_sends: Mutex::new(VecDeque::new()),
                default_success: Mutex::new(true),
            }),
        }
    }

    pub(crate) fn chain_provider(&self) -> ChainProvider {
        ChainProvider::new(Arc::new(self.clone())).with_poll_interval(Duration::from_millis(5))
    }

    /// Answer `method` with `handler`.
    pub(crate) fn on<F>(&self, method: &str, handler: F)
    where
        F: FnMut(&Value) -> Result<Value, RpcError> + Send + 'static,
    {
        self.inner.handlers.lock().insert(method.to_string(), Box::new(handler));
    }

    /// Answer `eth_call`s whose calldata starts with `selector`.
    pub(crate) fn on_call<F>(&self, selector: [u8; 4], handler: F)
    where
        F: FnMut(&Value) -> Result<Value, RpcError> + Send + 'static,
    {
        self.inner.call_handlers.lock().insert(selector, Box::new(handler));
    }

    /// Answer `eth_call`s with `selector` with a fixed uint256.
    pub(crate) fn on_call_uint(&self, selector: [u8; 4], value: U256) {
        self.on_call(selector, move |_| Ok(uint_response(value)));
    }

    /// Hold `eth_call`s with `selector` until the returned gate is notified.
    ///
    /// Each `notify_one` releases one held call, including a call that has
    /// not arrived yet.
    pub(crate) fn hold_call(&self, selector: [u8; 4]) -> Arc<Notify> {
        self.inner
            .call_gates
            .lock()
            .entry(selector)
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }

    /// Script the next submitted transactions, in order: `(pending polls, success)`.
    pub(crate) fn script_transactions(&self, scripts: &[(usize, bool)]) {
        let mut queue = self.inner.scripted_sends.lock();
        for &(pending, success) in scripts {
            queue.push_back(ReceiptScript { pending, success });
        }
    }

    /// Outcome for unscripted transactions.
    pub(crate) fn mine_transactions_with_status(&self, success: bool) {
        *self.inner.default_success.lock() = success;
    }

    /// Register a receipt for `hash` that appears after `pending` polls.
    pub(crate) fn pending_receipts(&self, hash: TxHash, pending: usize, success: bool) {
        self.inner.receipts.lock().insert(hash, ReceiptScript { pending, success });
    }

    pub(crate) fn next_tx_hash(&self) -> TxHash {
        let mut counter = self.inner.next_hash.lock();
        *counter += 1;
        B256::left_padding_from(&counter.to_be_bytes())
    }

    pub(crate) fn emit(&self, event: WalletEvent) {
        let _ = self.inner.events.send(event);
    }

    pub(crate) fn calls(&self) -> Vec<(String, Value)> {
        self.inner.calls.lock().clone()
    }

    pub(crate) fn calls_to(&self, method: &str) -> Vec<Value> {
        self.calls()
            .into_iter()
            .filter(|(m, _)| m == method)
            .map(|(_, params)| params)
            .collect()
    }

    /// Selectors of submitted transactions, in submission order.
    pub(crate) fn sent_selectors(&self) -> Vec<[u8; 4]> {
        self.calls_to("eth_sendTransaction")
            .iter()
            .filter_map(|params| selector(&params[0]))
            .collect()
    }

    fn handle(&self, method: &str, params: &Value) -> Result<Value, RpcError> {
        match method {
            "eth_call" => {
                if let Some(selector) = selector(&params[0]) {
                    if let Some(handler) = self.inner.call_handlers.lock().get_mut(&selector) {
                        return handler(params);
                    }
                }
                self.handle_registered(method, params)
            }
            "eth_sendTransaction" if !self.inner.handlers.lock().contains_key(method) => {
                let hash = self.next_tx_hash();
                let default_success = *self.inner.default_success.lock();
                let script = self
                    .inner
                    .scripted_sends
                    .lock()
                    .pop_front()
                    .unwrap_or(ReceiptScript { pending: 0, success: default_success });
                self.inner.receipts.lock().insert(hash, script);
                Ok(json!(hash))
            }
            "eth_getTransactionReceipt" if !self.inner.handlers.lock().contains_key(method) => {
                let hash: TxHash = serde_json::from_value(params[0].clone())
                    .map_err(|e| RpcError::internal(e.to_string()))?;
                let mut receipts = self.inner.receipts.lock();
                match receipts.get_mut(&hash) {
                    Some(script) if script.pending > 0 => {
                        script.pending -= 1;
                        Ok(Value::Null)
                    }
                    Some(script) => Ok(json!({
                        "transactionHash": hash,
                        "blockNumber": "0x1",
                        "status": if script.success { "0x1" } else { "0x0" },
                    })),
                    None => Ok(Value::Null),
                }
            }
            _ => self.handle_registered(method, params),
        }
    }

    fn handle_registered(&self, method: &str, params: &Value) -> Result<Value, RpcError> {
        match self.inner.handlers.lock().get_mut(method) {
            Some(handler) => handler(params),
            None => Err(RpcError::new(-32601, format!("method {} not mocked", method))),
        }
    }
}

#[async_trait]
impl WalletProvider for MockWallet {
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        self.inner.calls.lock().push((method.to_string(), params.clone()));
        // Yield so concurrently issued requests interleave like real I/O.
        tokio::task::yield_now().await;
        if method == "eth_call" {
            let gate = selector(&params[0]).and_then(|s| self.inner.call_gates.lock().get(&s).cloned());
            if let Some(gate) = gate {
                gate.notified().await;
            }
        }
        self.handle(method, &params)
    }

    fn subscribe(&self) -> broadcast::Receiver<WalletEvent> {
        self.inner.events.subscribe()
    }
}

fn calldata(tx: &Value) -> Option<Bytes> {
    serde_json::from_value(tx.get("data")?.clone()).ok()
}

fn selector(tx: &Value) -> Option<[u8; 4]> {
    calldata(tx).and_then(|data| data.get(..4).and_then(|s| <[u8; 4]>::try_from(s).ok()))
}

/// ABI-encoded uint256 as an `eth_call` result.
pub(crate) fn uint_response(value: U256) -> Value {
    json!(Bytes::from(value.to_be_bytes::<32>().to_vec()))
}
