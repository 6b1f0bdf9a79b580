//! In-page provider: the only surface a dApp sees.
//!
//! Every call gets a fresh id, a slot in the correlation table and a timeout.
//! Responses settle the slot they name and nothing else; ids that are unknown
//! or already settled are ignored. State here is an advisory cache driven by
//! connect/disconnect outcomes and authority events.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LockResult, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::oneshot;

use crate::core::paths::{events, methods};
use crate::error::{BrokerError, WireError};
use crate::format::{MessageInput, SignedMessage, SignedTransaction, TransactionRequest};
use crate::protocol::{ConnectResult, PageMessage, Window};

pub type ProviderResult<T> = Result<T, WireError>;

pub type Handler = Arc<dyn Fn(&Value) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderState {
    pub is_connected: bool,
    pub selected_address: Option<String>,
    pub chain_id: Option<String>,
    pub network_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub address: String,
    pub balance: String,
    pub nonce: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResult {
    pub tx_hash: String,
    pub transaction: SignedTransaction,
}

struct Listener {
    id: ListenerId,
    once: bool,
    handler: Handler,
}

type Pending = HashMap<u64, oneshot::Sender<ProviderResult<Value>>>;

struct ProviderInner {
    window: Window,
    timeout: Duration,
    next_id: AtomicU64,
    pending: Mutex<Pending>,
    state: Mutex<ProviderState>,
    listeners: Mutex<HashMap<String, Vec<Listener>>>,
    next_listener: AtomicU64,
}

fn relock<'a, T>(guard: LockResult<MutexGuard<'a, T>>) -> MutexGuard<'a, T> {
    guard.unwrap_or_else(PoisonError::into_inner)
}

fn decode<T: DeserializeOwned>(value: Value) -> ProviderResult<T> {
    serde_json::from_value(value)
        .map_err(|e| BrokerError::Protocol(format!("unexpected response: {e}")).into())
}

/// Frees a correlation slot when its call ends, including when the caller
/// drops the call before it settles.
struct SlotGuard<'a> {
    pending: &'a Mutex<Pending>,
    id: u64,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        relock(self.pending.lock()).remove(&self.id);
    }
}

#[derive(Clone)]
pub struct Provider {
    inner: Arc<ProviderInner>,
}

impl Provider {
    /// Install into `window` and start listening for responses and events.
    pub fn install(window: Window, timeout: Duration) -> Self {
        let inner = Arc::new(ProviderInner {
            window,
            timeout,
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            state: Mutex::new(ProviderState::default()),
            listeners: Mutex::new(HashMap::new()),
            next_listener: AtomicU64::new(1),
        });
        spawn_listener(&inner);
        Self { inner }
    }

    pub fn state(&self) -> ProviderState {
        relock(self.inner.state.lock()).clone()
    }

    pub fn is_connected(&self) -> bool { self.state().is_connected }

    /// Requests still waiting for a response.
    pub fn in_flight(&self) -> usize {
        relock(self.inner.pending.lock()).len()
    }

    // =========================================================================
    // Request / response
    // =========================================================================

    pub async fn request(&self, method: &str, params: Value) -> ProviderResult<Value> {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        relock(self.inner.pending.lock()).insert(id, tx);
        let _slot = SlotGuard { pending: &self.inner.pending, id };
        self.inner.window.post(PageMessage::Request { id, method: method.into(), params }.encode());

        match tokio::time::timeout(self.inner.timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(BrokerError::Internal("provider closed".into()).into()),
            Err(_) => {
                tracing::debug!(id, method, "request timed out");
                Err(BrokerError::Timeout.into())
            }
        }
    }

    pub async fn connect(&self, options: Value) -> ProviderResult<ConnectResult> {
        let connected: ConnectResult = decode(self.request(methods::CONNECT, options).await?)?;
        self.inner.apply_event(events::CONNECT, serde_json::to_value(&connected).unwrap_or(Value::Null));
        Ok(connected)
    }

    pub async fn disconnect(&self) -> ProviderResult<()> {
        self.request(methods::DISCONNECT, Value::Null).await?;
        self.inner.apply_event(events::DISCONNECT, Value::Null);
        Ok(())
    }

    pub async fn get_accounts(&self) -> ProviderResult<Vec<String>> {
        decode(self.request(methods::GET_ACCOUNTS, Value::Null).await?)
    }

    pub async fn get_public_key(&self) -> ProviderResult<String> {
        decode(self.request(methods::GET_PUBLIC_KEY, Value::Null).await?)
    }

    pub async fn get_balance(&self, address: Option<&str>) -> ProviderResult<Balance> {
        let params = address.map(|a| json!({ "address": a })).unwrap_or(Value::Null);
        decode(self.request(methods::GET_BALANCE, params).await?)
    }

    pub async fn sign_message(&self, message: MessageInput) -> ProviderResult<SignedMessage> {
        let params = serde_json::to_value(message).unwrap_or(Value::Null);
        decode(self.request(methods::SIGN_MESSAGE, params).await?)
    }

    pub async fn sign_transaction(&self, tx: &TransactionRequest) -> ProviderResult<SignedTransaction> {
        let params = serde_json::to_value(tx).unwrap_or(Value::Null);
        decode(self.request(methods::SIGN_TRANSACTION, params).await?)
    }

    pub async fn send_transaction(&self, tx: &TransactionRequest) -> ProviderResult<SendResult> {
        let params = serde_json::to_value(tx).unwrap_or(Value::Null);
        decode(self.request(methods::SEND_TRANSACTION, params).await?)
    }

    // =========================================================================
    // Events
    // =========================================================================

    pub fn on(&self, event: &str, handler: impl Fn(&Value) + Send + Sync + 'static) -> ListenerId {
        self.inner.add_listener(event, Arc::new(handler), false)
    }

    pub fn once(&self, event: &str, handler: impl Fn(&Value) + Send + Sync + 'static) -> ListenerId {
        self.inner.add_listener(event, Arc::new(handler), true)
    }

    pub fn off(&self, event: &str, id: ListenerId) -> bool {
        let mut listeners = relock(self.inner.listeners.lock());
        let Some(list) = listeners.get_mut(event) else { return false };
        let before = list.len();
        list.retain(|l| l.id != id);
        before != list.len()
    }
}

impl ProviderInner {
    fn settle(&self, id: u64, outcome: ProviderResult<Value>) {
        match relock(self.pending.lock()).remove(&id) {
            Some(tx) => {
                let _ = tx.send(outcome);
            }
            None => tracing::debug!(id, "ignoring response for unknown request"),
        }
    }

    fn add_listener(&self, event: &str, handler: Handler, once: bool) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::SeqCst));
        relock(self.listeners.lock())
            .entry(event.to_string())
            .or_default()
            .push(Listener { id, once, handler });
        id
    }

    fn emit(&self, event: &str, data: &Value) {
        let handlers: Vec<Handler> = {
            let mut listeners = relock(self.listeners.lock());
            let Some(list) = listeners.get_mut(event) else { return };
            let handlers = list.iter().map(|l| l.handler.clone()).collect();
            list.retain(|l| !l.once);
            handlers
        };
        for handler in handlers {
            handler(data);
        }
    }

    /// Update the advisory state; emit only when something actually changed.
    fn apply_event(&self, event: &str, data: Value) {
        let changed = {
            let mut state = relock(self.state.lock());
            match event {
                events::CONNECT => {
                    let address = data.get("accounts").and_then(|a| a.get(0)).and_then(Value::as_str).map(str::to_string);
                    let next = ProviderState {
                        is_connected: true,
                        selected_address: address.or_else(|| state.selected_address.clone()),
                        chain_id: data.get("chainId").and_then(Value::as_str).map(str::to_string),
                        network_id: data.get("networkId").and_then(Value::as_str).map(str::to_string),
                    };
                    let changed = *state != next;
                    *state = next;
                    changed
                }
                events::DISCONNECT => {
                    let changed = state.is_connected;
                    *state = ProviderState::default();
                    changed
                }
                events::ACCOUNTS_CHANGED => {
                    let address = data.get(0).and_then(Value::as_str).map(str::to_string);
                    let changed = state.selected_address != address;
                    state.selected_address = address;
                    changed
                }
                events::NETWORK_CHANGED => {
                    let network = data.as_str().map(str::to_string)
                        .or_else(|| data.get("networkId").and_then(Value::as_str).map(str::to_string));
                    let changed = state.network_id != network;
                    state.network_id = network;
                    changed
                }
                _ => true,
            }
        };
        if changed {
            self.emit(event, &data);
        }
    }
}

fn spawn_listener(inner: &Arc<ProviderInner>) {
    let own = inner.window.id();
    let mut rx = inner.window.listen();
    let weak: Weak<ProviderInner> = Arc::downgrade(inner);
    tokio::spawn(async move {
        loop {
            let message = match rx.recv().await {
                Ok(message) => message,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "provider lagged on window");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            let Some(inner) = weak.upgrade() else { break };
            if message.source != own {
                continue;
            }
            match PageMessage::decode(&message.data) {
                Ok(PageMessage::Response { id, result, error }) => {
                    let outcome = match error {
                        Some(error) => Err(error),
                        None => Ok(result.unwrap_or(Value::Null)),
                    };
                    inner.settle(id, outcome);
                }
                Ok(PageMessage::Event { event, data }) => inner.apply_event(&event, data),
                _ => {}
            }
        }
    });
}
