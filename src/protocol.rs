//! Wire messages, decoded into sum types at every context boundary.
//!
//! | Channel | Type | Tags |
//! |---------|------|------|
//! | page ↔ relay (window) | [`PageMessage`] | `OCTRA_REQUEST`, `OCTRA_RESPONSE`, `OCTRA_EVENT` |
//! | relay/UI → authority (runtime) | [`RuntimeMessage`] | `DAPP_REQUEST`, `SYNC_SESSION`, ... |
//! | authority → relay/UI | [`RuntimeReply`] | `{result}` or `{error:{code,message}}` |
//!
//! Unknown tags fail decoding; nothing is silently dropped at this layer.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;

use crate::error::{BrokerError, BrokerResult, WireError};
use crate::session::Session;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PageMessage {
    #[serde(rename = "OCTRA_REQUEST")]
    Request {
        id: u64,
        method: String,
        #[serde(default)]
        params: Value,
    },
    #[serde(rename = "OCTRA_RESPONSE")]
    Response {
        id: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<WireError>,
    },
    #[serde(rename = "OCTRA_EVENT")]
    Event {
        event: String,
        #[serde(default)]
        data: Value,
    },
}

impl PageMessage {
    pub fn decode(value: &Value) -> BrokerResult<Self> {
        serde_json::from_value(value.clone())
            .map_err(|e| BrokerError::Protocol(format!("page message: {e}")))
    }

    pub fn encode(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn response(id: u64, outcome: Result<Value, WireError>) -> Self {
        match outcome {
            Ok(result) => PageMessage::Response { id, result: Some(result), error: None },
            Err(error) => PageMessage::Response { id, result: None, error: Some(error) },
        }
    }
}

/// Opaque per-window identity used to reject messages from other frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowId(pub u64);

/// A `postMessage` as seen by listeners on a window: who sent it and the raw data.
#[derive(Debug, Clone)]
pub struct WindowMessage {
    pub source: WindowId,
    pub data: Value,
}

const WINDOW_CAPACITY: usize = 256;

static NEXT_WINDOW: AtomicU64 = AtomicU64::new(1);

/// A page's message space. The provider and the relay share one; other frames
/// can post into it but carry their own [`WindowId`].
#[derive(Clone)]
pub struct Window {
    id: WindowId,
    bus: broadcast::Sender<WindowMessage>,
}

impl Default for Window {
    fn default() -> Self { Self::new() }
}

impl Window {
    pub fn new() -> Self {
        let (bus, _) = broadcast::channel(WINDOW_CAPACITY);
        Self { id: WindowId(NEXT_WINDOW.fetch_add(1, Ordering::Relaxed)), bus }
    }

    pub fn id(&self) -> WindowId { self.id }

    pub fn post(&self, data: Value) {
        self.post_from(self.id, data);
    }

    /// Deliver `data` as if posted by another frame.
    pub fn post_from(&self, source: WindowId, data: Value) {
        // Nobody listening is not an error for postMessage either.
        let _ = self.bus.send(WindowMessage { source, data });
    }

    pub fn listen(&self) -> broadcast::Receiver<WindowMessage> {
        self.bus.subscribe()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DappRequest {
    pub id: u64,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    pub origin: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub favicon: Option<String>,
}

/// Result of an approved `connect`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectResult {
    pub accounts: Vec<String>,
    pub public_key: String,
    pub chain_id: String,
    pub network_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approved,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuntimeMessage {
    DappRequest(DappRequest),
    SyncSession {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session: Option<Session>,
        #[serde(default, rename = "sessionKey", skip_serializing_if = "Option::is_none")]
        session_key: Option<String>,
    },
    GetPendingApprovals,
    ResolveApproval {
        id: String,
        decision: Decision,
        #[serde(default, rename = "sessionKey", skip_serializing_if = "Option::is_none")]
        session_key: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
    },
    ApprovalClosed {
        id: String,
    },
    LockWallet,
    GetFeeEstimate,
    ResetEverything,
}

impl RuntimeMessage {
    pub fn decode(value: &Value) -> BrokerResult<Self> {
        serde_json::from_value(value.clone())
            .map_err(|e| BrokerError::Protocol(format!("runtime message: {e}")))
    }

    pub fn kind(&self) -> &'static str {
        use crate::core::paths::runtime::*;
        match self {
            RuntimeMessage::DappRequest(_) => DAPP_REQUEST,
            RuntimeMessage::SyncSession { .. } => SYNC_SESSION,
            RuntimeMessage::GetPendingApprovals => GET_PENDING_APPROVALS,
            RuntimeMessage::ResolveApproval { .. } => RESOLVE_APPROVAL,
            RuntimeMessage::ApprovalClosed { .. } => APPROVAL_CLOSED,
            RuntimeMessage::LockWallet => LOCK_WALLET,
            RuntimeMessage::GetFeeEstimate => GET_FEE_ESTIMATE,
            RuntimeMessage::ResetEverything => RESET_EVERYTHING,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeReply {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

impl RuntimeReply {
    pub fn ok(result: Value) -> Self { Self { result: Some(result), error: None } }
    pub fn err(error: impl Into<WireError>) -> Self { Self { result: None, error: Some(error.into()) } }

    pub fn from_result(outcome: BrokerResult<Value>) -> Self {
        match outcome {
            Ok(value) => Self::ok(value),
            Err(err) => Self::err(err),
        }
    }

    pub fn into_outcome(self) -> Result<Value, WireError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_page_message_tags() {
        let req = PageMessage::decode(&json!({"type": "OCTRA_REQUEST", "id": 3, "method": "connect"})).unwrap();
        assert_eq!(req, PageMessage::Request { id: 3, method: "connect".into(), params: Value::Null });

        let resp = PageMessage::response(3, Err(WireError::new(4001, "no"))).encode();
        assert_eq!(resp, json!({"type": "OCTRA_RESPONSE", "id": 3, "error": {"code": 4001, "message": "no"}}));

        assert!(PageMessage::decode(&json!({"type": "OCTRA_SPOOF", "id": 1})).is_err());
        assert!(PageMessage::decode(&json!({"id": 1})).is_err());
    }

    #[test]
    fn test_runtime_message_tags() {
        let msg = RuntimeMessage::decode(&json!({
            "type": "RESOLVE_APPROVAL", "id": "abc", "decision": "rejected"
        })).unwrap();
        assert_eq!(msg.kind(), "RESOLVE_APPROVAL");
        assert!(matches!(msg, RuntimeMessage::ResolveApproval { decision: Decision::Rejected, .. }));

        let dapp = RuntimeMessage::decode(&json!({
            "type": "DAPP_REQUEST", "id": 1, "method": "getAccounts",
            "origin": "https://d.app", "title": "D", "params": {}
        })).unwrap();
        assert_eq!(dapp.kind(), "DAPP_REQUEST");

        assert_eq!(RuntimeMessage::decode(&json!({"type": "RESET_EVERYTHING"})).unwrap(), RuntimeMessage::ResetEverything);
        assert!(RuntimeMessage::decode(&json!({"type": "FORMAT_DISK"})).is_err());
    }

    #[test]
    fn test_sync_session_key_only() {
        let msg = RuntimeMessage::decode(&json!({"type": "SYNC_SESSION", "sessionKey": "AAAA"})).unwrap();
        assert_eq!(msg, RuntimeMessage::SyncSession { session: None, session_key: Some("AAAA".into()) });
    }

    #[tokio::test]
    async fn test_window_stamps_source() {
        let window = Window::new();
        let other = Window::new();
        assert_ne!(window.id(), other.id());

        let mut rx = window.listen();
        window.post(serde_json::json!({"type": "OCTRA_EVENT", "event": "x"}));
        window.post_from(other.id(), serde_json::json!({}));
        assert_eq!(rx.recv().await.unwrap().source, window.id());
        assert_eq!(rx.recv().await.unwrap().source, other.id());
    }

    #[test]
    fn test_reply_outcome() {
        assert_eq!(RuntimeReply::ok(json!([1])).into_outcome().unwrap(), json!([1]));
        let reply: RuntimeReply = serde_json::from_value(json!({"error": {"code": 4100, "message": "wallet locked"}})).unwrap();
        assert_eq!(reply.into_outcome().unwrap_err().code, 4100);
        let empty: RuntimeReply = serde_json::from_value(json!({})).unwrap();
        assert_eq!(empty.into_outcome().unwrap(), Value::Null);
    }
}
