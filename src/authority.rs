//! Background authority: the privileged side of the broker.
//!
//! ```text
//! relay / approval UI
//!        │  RuntimeMessage
//!        ▼
//!   Authority::handle ──► fast paths (getAccounts, getPublicKey, getBalance, chainId, disconnect)
//!        │
//!        └──► ApprovalBroker::create ──► surface.open(id) ──► await decision
//!                                                            │
//!              RESOLVE_APPROVAL / APPROVAL_CLOSED / sweep ───┘
//! ```
//!
//! Durable state (connections, session) is read from storage on every call, so
//! an authority built with [`Authority::resume`] after a restart behaves like the
//! one it replaced. Volatile state (session key, pending approvals, account
//! cache) starts empty.

use serde::Serialize;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::approval::{ApprovalBroker, ApprovalKind, ApprovalSurface, PendingApproval, WalletSnapshot};
use crate::config::BrokerConfig;
use crate::core::paths::{events, methods};
use crate::crypto::SessionKey;
use crate::error::{BrokerError, BrokerResult, WireError};
use crate::format::osm1::{self, MessageInput};
use crate::format::{SignedTransaction, Transaction, TransactionRequest};
use crate::protocol::{ConnectResult, DappRequest, Decision, RuntimeMessage, RuntimeReply};
use crate::rpc::{broadcast, resolve_nonce, AccountCache, RpcClient};
use crate::runtime::Shutdown;
use crate::session::{Session, SessionCache, UnlockedWallet};
use crate::store::{Connection, ConnectionInfo, ConnectionStore, StorageArea};

const EVENT_CAPACITY: usize = 64;
const PORT_CAPACITY: usize = 64;

/// Unsolicited notification for pages. `origin: None` goes to every page.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthorityEvent {
    pub origin: Option<String>,
    pub event: String,
    pub data: Value,
}

impl AuthorityEvent {
    pub fn is_for(&self, origin: &str) -> bool {
        self.origin.as_deref().map_or(true, |target| target == origin)
    }
}

#[derive(Clone)]
pub struct Authority {
    inner: Arc<AuthorityInner>,
}

struct AuthorityInner {
    config: BrokerConfig,
    local: Arc<dyn StorageArea>,
    session_area: Arc<dyn StorageArea>,
    connections: ConnectionStore,
    session: Mutex<SessionCache>,
    approvals: ApprovalBroker,
    rpc: Arc<dyn RpcClient>,
    accounts: AccountCache,
    surface: Arc<dyn ApprovalSurface>,
    events: broadcast::Sender<AuthorityEvent>,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn to_json<T: Serialize>(value: &T) -> BrokerResult<Value> {
    Ok(serde_json::to_value(value)?)
}

fn success(ok: bool) -> Value {
    json!({ "success": ok })
}

/// `octra_*` aliases onto the provider method they stand for.
fn canonical_method(method: &str) -> &str {
    match method {
        methods::RPC_REQUEST_ACCOUNTS => methods::CONNECT,
        methods::RPC_ACCOUNTS => methods::GET_ACCOUNTS,
        methods::RPC_CHAIN_ID => methods::GET_CHAIN_ID,
        methods::RPC_SIGN_MESSAGE => methods::SIGN_MESSAGE,
        methods::RPC_SEND_TRANSACTION => methods::SEND_TRANSACTION,
        other => other,
    }
}

/// Positional params (`[x]`) unwrap to `x`.
fn first_param(params: &Value) -> &Value {
    match params {
        Value::Array(items) => items.first().unwrap_or(&Value::Null),
        other => other,
    }
}

fn message_input(params: &Value) -> BrokerResult<MessageInput> {
    match first_param(params) {
        Value::Null => Err(BrokerError::InvalidParams("message is required".into())),
        value => serde_json::from_value(value.clone())
            .map_err(|_| BrokerError::InvalidParams("message must be a string or an object".into())),
    }
}

fn requested_address(params: &Value) -> Option<String> {
    match first_param(params) {
        Value::String(address) => Some(address.clone()),
        Value::Object(map) => map.get("address").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

impl Authority {
    /// Build an authority over the two storage areas. Nothing volatile survives.
    pub fn resume(
        config: BrokerConfig,
        local: Arc<dyn StorageArea>,
        session_area: Arc<dyn StorageArea>,
        rpc: Arc<dyn RpcClient>,
        surface: Arc<dyn ApprovalSurface>,
    ) -> Self {
        let connections = ConnectionStore::new(local.clone());
        let session = SessionCache::new(session_area.clone());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let origins = connections.get_connected_origins().map(|o| o.len()).unwrap_or(0);
        let has_session = matches!(session.session(), Ok(Some(_)));
        tracing::info!(origins, has_session, "authority resumed");

        Self {
            inner: Arc::new(AuthorityInner {
                approvals: ApprovalBroker::new(config.approval_ttl),
                config,
                local,
                session_area,
                connections,
                session: Mutex::new(session),
                rpc,
                accounts: AccountCache::new(),
                surface,
                events,
            }),
        }
    }

    pub fn config(&self) -> &BrokerConfig { &self.inner.config }
    pub fn connections(&self) -> &ConnectionStore { &self.inner.connections }
    pub fn approvals(&self) -> &ApprovalBroker { &self.inner.approvals }

    pub fn subscribe(&self) -> broadcast::Receiver<AuthorityEvent> {
        self.inner.events.subscribe()
    }

    pub fn is_unlocked(&self) -> bool {
        self.session_cache().map(|cache| cache.is_unlocked()).unwrap_or(false)
    }

    fn session_cache(&self) -> BrokerResult<MutexGuard<'_, SessionCache>> {
        self.inner.session.lock().map_err(|_| BrokerError::Internal("session lock".into()))
    }

    fn current_session(&self) -> BrokerResult<Option<Session>> {
        self.session_cache()?.session()
    }

    fn unlocked_wallet(&self) -> BrokerResult<UnlockedWallet> {
        self.session_cache()?.get_wallet_for_signing()
    }

    fn emit(&self, origin: Option<&str>, event: &str, data: Value) {
        let event = AuthorityEvent { origin: origin.map(str::to_string), event: event.into(), data };
        // No subscribers is fine: no page is listening.
        let _ = self.inner.events.send(event);
    }

    fn require_connection(&self, origin: &str) -> BrokerResult<Connection> {
        self.inner
            .connections
            .get_connection(origin)?
            .filter(|c| c.connected)
            .ok_or(BrokerError::NotConnected)
    }

    // =========================================================================
    // Runtime channel
    // =========================================================================

    pub async fn handle(&self, message: RuntimeMessage) -> RuntimeReply {
        let kind = message.kind();
        let outcome = match message {
            RuntimeMessage::DappRequest(request) => self.dapp_request(request).await,
            RuntimeMessage::SyncSession { session, session_key } => self.sync_session(session, session_key),
            RuntimeMessage::GetPendingApprovals => self.inner.approvals.list().and_then(|list| to_json(&list)),
            RuntimeMessage::ResolveApproval { id, decision, session_key, result } => {
                self.resolve_approval(&id, decision, session_key, result).await
            }
            RuntimeMessage::ApprovalClosed { id } => self.approval_closed(&id),
            RuntimeMessage::LockWallet => self.lock_wallet(),
            RuntimeMessage::GetFeeEstimate => match self.inner.rpc.fee_estimate().await {
                Ok(schedule) => to_json(&schedule),
                Err(err) => Err(err),
            },
            RuntimeMessage::ResetEverything => self.reset_everything(),
        };
        if let Err(err) = &outcome {
            tracing::debug!(kind, code = err.code(), error = %err, "runtime message failed");
        }
        RuntimeReply::from_result(outcome)
    }

    /// Serve the runtime channel. Each message runs in its own task so a request
    /// waiting on a human never blocks the decision that unblocks it.
    pub fn spawn_port(&self) -> RuntimePort {
        let (tx, mut rx) = mpsc::channel::<(RuntimeMessage, oneshot::Sender<RuntimeReply>)>(PORT_CAPACITY);
        let authority = self.clone();
        tokio::spawn(async move {
            while let Some((message, reply)) = rx.recv().await {
                let authority = authority.clone();
                tokio::spawn(async move {
                    let _ = reply.send(authority.handle(message).await);
                });
            }
            tracing::debug!("runtime port closed");
        });
        RuntimePort { tx }
    }

    /// Periodically expire stale approvals until shutdown.
    pub fn spawn_sweeper(&self, shutdown: &Shutdown) -> JoinHandle<()> {
        let authority = self.clone();
        let mut listener = shutdown.subscribe();
        let period = self.inner.config.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => match authority.inner.approvals.sweep_expired() {
                        Ok(0) => {}
                        Ok(expired) => tracing::info!(expired, "approval sweep"),
                        Err(err) => tracing::warn!(error = %err, "approval sweep failed"),
                    },
                    _ = listener.wait() => break,
                }
            }
            tracing::debug!("approval sweeper stopped");
        })
    }

    // =========================================================================
    // dApp requests
    // =========================================================================

    async fn dapp_request(&self, request: DappRequest) -> BrokerResult<Value> {
        let method = canonical_method(&request.method).to_string();
        tracing::debug!(origin = %request.origin, method = %request.method, id = request.id, "dapp request");

        match method.as_str() {
            methods::GET_ACCOUNTS => self.accounts_for(&request.origin),
            methods::GET_PUBLIC_KEY => self.public_key_for(&request.origin),
            methods::GET_BALANCE => self.balance_for(&request).await,
            methods::GET_CHAIN_ID => Ok(json!(self.inner.config.chain_id)),
            methods::DISCONNECT => self.disconnect(&request.origin),
            other => {
                let kind = ApprovalKind::for_method(other)
                    .ok_or_else(|| BrokerError::UnsupportedMethod(request.method.clone()))?;
                let accounts_only = request.method == methods::RPC_REQUEST_ACCOUNTS;
                let result = self.request_approval(kind, request).await?;
                if accounts_only {
                    return Ok(result.get("accounts").cloned().unwrap_or(result));
                }
                Ok(result)
            }
        }
    }

    fn accounts_for(&self, origin: &str) -> BrokerResult<Value> {
        Ok(match self.require_connection(origin) {
            Ok(connection) => json!([connection.address]),
            Err(BrokerError::NotConnected) => json!([]),
            Err(err) => return Err(err),
        })
    }

    fn public_key_for(&self, origin: &str) -> BrokerResult<Value> {
        let connection = self.require_connection(origin)?;
        let session = self.current_session()?.ok_or(BrokerError::Locked)?;
        if session.address != connection.address {
            return Err(BrokerError::Locked);
        }
        Ok(json!(session.public_key))
    }

    async fn balance_for(&self, request: &DappRequest) -> BrokerResult<Value> {
        let connection = self.require_connection(&request.origin)?;
        let address = requested_address(&request.params).unwrap_or(connection.address);
        let state = self.inner.accounts.lookup(self.inner.rpc.as_ref(), &address).await?;
        Ok(json!({ "address": address, "balance": state.balance, "nonce": state.nonce }))
    }

    fn disconnect(&self, origin: &str) -> BrokerResult<Value> {
        if self.inner.connections.remove_connection(origin)? {
            self.emit(Some(origin), events::DISCONNECT, Value::Null);
        }
        Ok(success(true))
    }

    fn validate_params(&self, kind: ApprovalKind, params: &Value) -> BrokerResult<()> {
        match kind {
            ApprovalKind::Connect => Ok(()),
            ApprovalKind::SignMessage => message_input(params).map(drop),
            ApprovalKind::SignTransaction | ApprovalKind::SendTransaction => {
                TransactionRequest::from_params(first_param(params)).map(drop)
            }
        }
    }

    async fn request_approval(&self, kind: ApprovalKind, request: DappRequest) -> BrokerResult<Value> {
        let wallet = {
            let cache = self.session_cache()?;
            let session = cache.session()?;
            WalletSnapshot {
                address: session.as_ref().map(|s| s.address.clone()),
                locked: !cache.is_unlocked(),
                network: session.map(|s| s.network),
            }
        };

        // Anything that will fail regardless of the decision fails now, without UI.
        if kind != ApprovalKind::Connect {
            self.require_connection(&request.origin)?;
            if wallet.address.is_none() {
                return Err(BrokerError::Locked);
            }
            self.validate_params(kind, &request.params)?;
        }

        let (id, decision) = self.inner.approvals.create(kind, &request, wallet, now_ms())?;
        if let Err(err) = self.inner.surface.open(&id) {
            tracing::warn!(%id, error = %err, "approval surface failed to open");
            self.inner.approvals.take(&id)?;
            return Err(err);
        }

        match decision.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(wire)) => Err(wire.into_broker_error()),
            Err(_) => Err(BrokerError::Internal("approval dropped".into())),
        }
    }

    // =========================================================================
    // Decisions
    // =========================================================================

    fn accept_session_key(&self, encoded: &str) -> BrokerResult<()> {
        match SessionKey::from_base64(encoded) {
            Ok(key) => self.session_cache()?.sync_key(key),
            Err(_) => tracing::warn!("ignoring malformed session key"),
        }
        Ok(())
    }

    async fn resolve_approval(
        &self,
        id: &str,
        decision: Decision,
        session_key: Option<String>,
        result: Option<Value>,
    ) -> BrokerResult<Value> {
        if let Some(encoded) = session_key {
            self.accept_session_key(&encoded)?;
        }
        let Some(record) = self.inner.approvals.take(id)? else {
            tracing::debug!(%id, "decision for unknown or settled approval");
            return Ok(success(false));
        };
        tracing::info!(%id, kind = record.kind.as_str(), origin = %record.origin, ?decision, "approval resolved");

        let outcome = match decision {
            Decision::Rejected => Err(BrokerError::UserRejected),
            Decision::Approved => self.execute(&record, result).await,
        };
        let reply = match &outcome {
            Ok(_) => success(true),
            Err(err) => json!({ "success": false, "error": WireError::from(err) }),
        };
        record.settle(outcome);
        Ok(reply)
    }

    fn approval_closed(&self, id: &str) -> BrokerResult<Value> {
        match self.inner.approvals.take(id)? {
            Some(record) => {
                tracing::info!(%id, origin = %record.origin, "approval window closed");
                record.settle(Err(BrokerError::UserRejected));
                Ok(success(true))
            }
            None => Ok(success(false)),
        }
    }

    /// Runs against the live session, not the snapshot taken at creation.
    async fn execute(&self, record: &PendingApproval, result: Option<Value>) -> BrokerResult<Value> {
        match (record.kind, result) {
            (ApprovalKind::Connect, result) => self.complete_connect(record, result),
            (_, Some(value)) => Ok(value),
            (ApprovalKind::SignMessage, None) => self.sign_message(record),
            (ApprovalKind::SignTransaction, None) => to_json(&self.sign_transaction(record).await?),
            (ApprovalKind::SendTransaction, None) => self.send_transaction(record).await,
        }
    }

    fn complete_connect(&self, record: &PendingApproval, result: Option<Value>) -> BrokerResult<Value> {
        let session = self.current_session()?.ok_or(BrokerError::Locked)?;
        let config = &self.inner.config;
        let connection = self.inner.connections.add_connection(
            &record.origin,
            ConnectionInfo {
                title: record.title.clone(),
                favicon: record.favicon.clone(),
                address: session.address,
                network_id: config.network_id.clone(),
                chain_id: config.chain_id.clone(),
            },
        )?;
        let connected = to_json(&ConnectResult {
            accounts: vec![connection.address],
            public_key: session.public_key,
            chain_id: connection.chain_id,
            network_id: connection.network_id,
        })?;
        self.emit(Some(&record.origin), events::CONNECT, connected.clone());
        Ok(result.unwrap_or(connected))
    }

    fn sign_message(&self, record: &PendingApproval) -> BrokerResult<Value> {
        let input = message_input(&record.params)?;
        let wallet = self.unlocked_wallet()?;
        let payload = osm1::build_payload(input, &record.origin, &wallet.address, now_ms());
        let signed = osm1::sign_payload(payload, wallet.key())?;
        tracing::info!(origin = %record.origin, address = %wallet.address, "message signed");
        to_json(&signed)
    }

    async fn sign_transaction(&self, record: &PendingApproval) -> BrokerResult<SignedTransaction> {
        let request = TransactionRequest::from_params(first_param(&record.params))?;
        let wallet = self.unlocked_wallet()?;
        let nonce = resolve_nonce(self.inner.rpc.as_ref(), &wallet.address, request.nonce).await;
        let timestamp = now_ms() as f64 / 1000.0;
        let signed = Transaction::build(&wallet.address, &request, nonce, timestamp)?.sign(wallet.key())?;
        tracing::info!(origin = %record.origin, from = %wallet.address, nonce, "transaction signed");
        Ok(signed)
    }

    async fn send_transaction(&self, record: &PendingApproval) -> BrokerResult<Value> {
        let signed = self.sign_transaction(record).await?;
        let receipt = broadcast(self.inner.rpc.as_ref(), &signed).await?;
        tracing::info!(origin = %record.origin, tx_hash = %receipt.tx_hash, "transaction broadcast");
        Ok(json!({ "txHash": receipt.tx_hash, "transaction": signed }))
    }

    // =========================================================================
    // Foreground UI messages
    // =========================================================================

    fn sync_session(&self, session: Option<Session>, session_key: Option<String>) -> BrokerResult<Value> {
        if session.is_none() && session_key.is_none() {
            return Err(BrokerError::InvalidParams("session or sessionKey required".into()));
        }
        // Decode first so a bad key leaves the stored session untouched.
        let session_key = session_key.map(|encoded| SessionKey::from_base64(&encoded)).transpose()?;
        let (previous, synced) = {
            let mut cache = self.session_cache()?;
            let previous = cache.session()?;
            let synced = match session {
                Some(session) => {
                    cache.sync_session(session.clone())?;
                    Some(session)
                }
                None => None,
            };
            if let Some(key) = session_key {
                cache.sync_key(key);
            }
            (previous, synced)
        };
        if let Some(session) = synced {
            self.announce_session(previous.as_ref(), &session);
        }
        Ok(success(true))
    }

    /// Tell connected pages what a new session changed: the network, and the
    /// account for origins connected to it.
    fn announce_session(&self, previous: Option<&Session>, session: &Session) {
        let connections: Vec<Connection> = self
            .inner
            .connections
            .get_connected_origins()
            .unwrap_or_default()
            .iter()
            .filter_map(|origin| self.inner.connections.get_connection(origin).ok().flatten())
            .collect();

        if let Some(previous) = previous {
            if previous.network != session.network {
                for connection in &connections {
                    self.emit(Some(&connection.origin), events::NETWORK_CHANGED, json!({ "networkId": session.network }));
                }
            }
        }
        if previous.map(|p| p.address.as_str()) == Some(session.address.as_str()) {
            return;
        }
        for connection in connections.iter().filter(|c| c.address == session.address) {
            self.emit(Some(&connection.origin), events::ACCOUNTS_CHANGED, json!([session.address]));
        }
    }

    fn lock_wallet(&self) -> BrokerResult<Value> {
        self.session_cache()?.lock()?;
        for origin in self.inner.connections.get_connected_origins().unwrap_or_default() {
            self.emit(Some(&origin), events::ACCOUNTS_CHANGED, json!([]));
        }
        Ok(success(true))
    }

    fn reset_everything(&self) -> BrokerResult<Value> {
        let rejected = self.inner.approvals.reject_all(BrokerError::Internal("wallet reset".into()))?;
        let origins = self.inner.connections.get_connected_origins().unwrap_or_default();
        {
            let mut cache = self.session_cache()?;
            cache.lock()?;
        }
        self.inner.local.clear()?;
        self.inner.session_area.clear()?;
        self.inner.accounts.clear();
        for origin in &origins {
            self.emit(Some(origin), events::DISCONNECT, Value::Null);
        }
        tracing::warn!(rejected, origins = origins.len(), "broker state reset");
        Ok(success(true))
    }
}

/// Sending half of the runtime channel, held by relays and UI surfaces.
#[derive(Clone)]
pub struct RuntimePort {
    tx: mpsc::Sender<(RuntimeMessage, oneshot::Sender<RuntimeReply>)>,
}

impl RuntimePort {
    pub async fn send(&self, message: RuntimeMessage) -> RuntimeReply {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send((message, reply_tx)).await.is_err() {
            return RuntimeReply::err(BrokerError::Internal("authority unavailable".into()));
        }
        reply_rx
            .await
            .unwrap_or_else(|_| RuntimeReply::err(BrokerError::Internal("authority dropped request".into())))
    }
}
