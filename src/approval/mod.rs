//! Human-in-the-loop approvals.
//!
//! ```text
//! created ──► awaiting_decision ──┬──► resolved_approved
//!                                 ├──► resolved_rejected
//!                                 └──► expired (sweep, TTL 5 min)
//! ```
//!
//! Terminal states remove the record; its continuation is consumed exactly once.
//! The approval surface is opened with nothing but the id.

mod broker;

pub use broker::{ApprovalBroker, PendingApproval};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::paths::methods;
use crate::error::BrokerResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ApprovalKind {
    Connect,
    SignMessage,
    SignTransaction,
    SendTransaction,
}

impl ApprovalKind {
    pub fn for_method(method: &str) -> Option<Self> {
        match method {
            methods::CONNECT => Some(Self::Connect),
            methods::SIGN_MESSAGE => Some(Self::SignMessage),
            methods::SIGN_TRANSACTION => Some(Self::SignTransaction),
            methods::SEND_TRANSACTION => Some(Self::SendTransaction),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => methods::CONNECT,
            Self::SignMessage => methods::SIGN_MESSAGE,
            Self::SignTransaction => methods::SIGN_TRANSACTION,
            Self::SendTransaction => methods::SEND_TRANSACTION,
        }
    }
}

/// Wallet state when the approval was created. Display only; execution re-reads live state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletSnapshot {
    pub address: Option<String>,
    pub locked: bool,
    pub network: Option<String>,
}

/// What the approval UI gets from `GET_PENDING_APPROVALS`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalSummary {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ApprovalKind,
    pub origin: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub favicon: Option<String>,
    pub params: Value,
    /// Creation time, ms since the Unix epoch.
    pub timestamp: i64,
    pub wallet: WalletSnapshot,
}

/// Opens a dedicated approval window for an id.
pub trait ApprovalSurface: Send + Sync {
    fn open(&self, approval_id: &str) -> BrokerResult<()>;
}

/// Address of the approval page. Carries the id and nothing else.
pub fn approval_location(approval_id: &str) -> String {
    format!("approval.html?id={approval_id}")
}

/// Surface for headless hosts: logs the location and waits for a decision over the runtime channel.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingSurface;

impl ApprovalSurface for LoggingSurface {
    fn open(&self, approval_id: &str) -> BrokerResult<()> {
        tracing::info!(location = %approval_location(approval_id), "approval pending");
        Ok(())
    }
}
