//! Pending approval table.

use rand::RngCore;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::oneshot;

use super::{ApprovalKind, ApprovalSummary, WalletSnapshot};
use crate::error::{BrokerError, BrokerResult, WireError};
use crate::protocol::DappRequest;

pub type Continuation = oneshot::Sender<Result<Value, WireError>>;

pub struct PendingApproval {
    pub id: String,
    pub kind: ApprovalKind,
    pub origin: String,
    pub title: String,
    pub favicon: Option<String>,
    pub params: Value,
    pub wallet: WalletSnapshot,
    /// ms since the Unix epoch.
    pub created_at: i64,
    continuation: Continuation,
}

impl PendingApproval {
    pub fn summary(&self) -> ApprovalSummary {
        ApprovalSummary {
            id: self.id.clone(),
            kind: self.kind,
            origin: self.origin.clone(),
            title: self.title.clone(),
            favicon: self.favicon.clone(),
            params: self.params.clone(),
            timestamp: self.created_at,
            wallet: self.wallet.clone(),
        }
    }

    /// Consumes the record. Returns false if the requester already went away.
    pub fn settle(self, outcome: BrokerResult<Value>) -> bool {
        let delivered = self.continuation.send(outcome.map_err(WireError::from)).is_ok();
        if !delivered {
            tracing::debug!(id = %self.id, "approval settled after requester left");
        }
        delivered
    }
}

pub struct ApprovalBroker {
    pending: Mutex<HashMap<String, PendingApproval>>,
    ttl: Duration,
}

fn new_approval_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

impl ApprovalBroker {
    pub fn new(ttl: Duration) -> Self {
        Self { pending: Mutex::new(HashMap::new()), ttl }
    }

    fn table(&self) -> BrokerResult<std::sync::MutexGuard<'_, HashMap<String, PendingApproval>>> {
        self.pending.lock().map_err(|_| BrokerError::Internal("approval table poisoned".into()))
    }

    pub fn create(
        &self,
        kind: ApprovalKind,
        request: &DappRequest,
        wallet: WalletSnapshot,
        now_ms: i64,
    ) -> BrokerResult<(String, oneshot::Receiver<Result<Value, WireError>>)> {
        let (tx, rx) = oneshot::channel();
        let id = new_approval_id();
        let record = PendingApproval {
            id: id.clone(),
            kind,
            origin: request.origin.clone(),
            title: request.title.clone(),
            favicon: request.favicon.clone(),
            params: request.params.clone(),
            wallet,
            created_at: now_ms,
            continuation: tx,
        };
        self.table()?.insert(id.clone(), record);
        tracing::info!(%id, kind = kind.as_str(), origin = %request.origin, "approval created");
        Ok((id, rx))
    }

    pub fn list(&self) -> BrokerResult<Vec<ApprovalSummary>> {
        let mut items: Vec<ApprovalSummary> = self.table()?.values().map(PendingApproval::summary).collect();
        items.sort_by_key(|s| s.timestamp);
        Ok(items)
    }

    pub fn get(&self, id: &str) -> BrokerResult<Option<ApprovalSummary>> {
        Ok(self.table()?.get(id).map(PendingApproval::summary))
    }

    /// Remove and hand back the record. A second call for the same id yields `None`.
    pub fn take(&self, id: &str) -> BrokerResult<Option<PendingApproval>> {
        Ok(self.table()?.remove(id))
    }

    pub fn len(&self) -> usize {
        self.pending.lock().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Reject everything older than the TTL with a timeout. Returns how many expired.
    pub fn sweep_expired_at(&self, now_ms: i64) -> BrokerResult<usize> {
        let ttl_ms = self.ttl.as_millis() as i64;
        let expired: Vec<PendingApproval> = {
            let mut table = self.table()?;
            let ids: Vec<String> = table
                .values()
                .filter(|p| now_ms - p.created_at > ttl_ms)
                .map(|p| p.id.clone())
                .collect();
            ids.iter().filter_map(|id| table.remove(id)).collect()
        };
        let count = expired.len();
        for record in expired {
            tracing::info!(id = %record.id, origin = %record.origin, "approval expired");
            record.settle(Err(BrokerError::Timeout));
        }
        Ok(count)
    }

    pub fn sweep_expired(&self) -> BrokerResult<usize> {
        self.sweep_expired_at(chrono::Utc::now().timestamp_millis())
    }

    /// Settle every pending record with `err` (used on reset).
    pub fn reject_all(&self, err: BrokerError) -> BrokerResult<usize> {
        let drained: Vec<PendingApproval> = self.table()?.drain().map(|(_, p)| p).collect();
        let count = drained.len();
        for record in drained {
            record.settle(Err(err.clone()));
        }
        Ok(count)
    }
}
