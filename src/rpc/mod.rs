//! Node RPC: account lookup, broadcast, fee schedule.
//!
//! Only the calls the broker needs. Nonce auto-fill lives here too because it is
//! the one place an RPC failure is tolerated instead of propagated.

#[cfg(feature = "native")]
mod http;

#[cfg(feature = "native")]
pub use http::HttpRpcClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{BrokerError, BrokerResult};
use crate::format::otx1::{OU_LARGE, OU_SMALL};
use crate::format::SignedTransaction;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountState {
    /// Whole tokens as the node reports them.
    pub balance: String,
    pub nonce: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastReceipt {
    pub tx_hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeTier {
    pub ou: String,
    /// Whole tokens.
    pub fee: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub low: FeeTier,
    pub medium: FeeTier,
    pub high: FeeTier,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            low: FeeTier { ou: OU_SMALL.into(), fee: "0.001".into() },
            medium: FeeTier { ou: OU_SMALL.into(), fee: "0.001".into() },
            high: FeeTier { ou: OU_LARGE.into(), fee: "0.003".into() },
        }
    }
}

#[async_trait]
pub trait RpcClient: Send + Sync {
    async fn get_account(&self, address: &str) -> BrokerResult<AccountState>;
    async fn send_transaction(&self, tx: &SignedTransaction) -> BrokerResult<BroadcastReceipt>;
    async fn fee_estimate(&self) -> BrokerResult<FeeSchedule> {
        Ok(FeeSchedule::default())
    }
}

/// Last known account state per address, served when the node is unreachable.
#[derive(Debug, Default)]
pub struct AccountCache {
    entries: Mutex<HashMap<String, AccountState>>,
}

impl AccountCache {
    pub fn new() -> Self { Self::default() }

    pub async fn lookup(&self, rpc: &dyn RpcClient, address: &str) -> BrokerResult<AccountState> {
        match rpc.get_account(address).await {
            Ok(state) => {
                if let Ok(mut entries) = self.entries.lock() {
                    entries.insert(address.into(), state.clone());
                }
                Ok(state)
            }
            Err(err) => {
                tracing::warn!(address, error = %err, "account lookup failed, using cache");
                self.entries
                    .lock()
                    .ok()
                    .and_then(|entries| entries.get(address).cloned())
                    .ok_or(err)
            }
        }
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }
}

/// Nonce when the on-chain value is unavailable: current Unix seconds.
pub fn fallback_nonce() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

/// `requested`, else on-chain nonce + 1, else the timestamp fallback.
pub async fn resolve_nonce(rpc: &dyn RpcClient, address: &str, requested: Option<u64>) -> u64 {
    if let Some(nonce) = requested {
        return nonce;
    }
    match rpc.get_account(address).await {
        Ok(state) => match state.nonce.checked_add(1) {
            Some(nonce) => nonce,
            None => {
                let nonce = fallback_nonce();
                tracing::warn!(address, nonce, "node nonce at u64::MAX, using timestamp nonce");
                nonce
            }
        },
        Err(err) => {
            let nonce = fallback_nonce();
            tracing::warn!(address, error = %err, nonce, "nonce lookup failed, using timestamp nonce");
            nonce
        }
    }
}

/// Broadcast failures keep the node's message so the dApp sees it verbatim.
pub async fn broadcast(rpc: &dyn RpcClient, tx: &SignedTransaction) -> BrokerResult<BroadcastReceipt> {
    rpc.send_transaction(tx).await.map_err(|err| match err {
        BrokerError::Broadcast(_) => err,
        other => BrokerError::Broadcast(other.to_string()),
    })
}
