//! HTTP runtime channel tests
//!
//! Drives the router over a real socket with reqwest.

#![cfg(feature = "native")]

use async_trait::async_trait;
use octra_broker::protocol::DappRequest;
use octra_broker::rpc::{AccountState, BroadcastReceipt, RpcClient};
use octra_broker::store::ConnectionInfo;
use octra_broker::{
    begin_session, create_router, Authority, BrokerConfig, BrokerError, BrokerResult, ConnectionStore,
    LoggingSurface, MemoryStorage, RuntimeMessage, SignedTransaction, WalletKey,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

const ORIGIN: &str = "https://d.app";

struct StaticRpc;

#[async_trait]
impl RpcClient for StaticRpc {
    async fn get_account(&self, _address: &str) -> BrokerResult<AccountState> {
        Ok(AccountState { balance: "1".into(), nonce: 0 })
    }
    async fn send_transaction(&self, _tx: &SignedTransaction) -> BrokerResult<BroadcastReceipt> {
        Err(BrokerError::Rpc("not in tests".into()))
    }
}

async fn start() -> (Authority, String) {
    let local = Arc::new(MemoryStorage::new());
    let wallet = WalletKey::from_secret_bytes(&[5u8; 32]).unwrap();
    ConnectionStore::new(local.clone())
        .add_connection(
            ORIGIN,
            ConnectionInfo {
                title: "D App".into(),
                favicon: None,
                address: wallet.address(),
                network_id: "octra-mainnet".into(),
                chain_id: "octra".into(),
            },
        )
        .unwrap();

    let authority = Authority::resume(
        BrokerConfig::new("octra-test"),
        local,
        Arc::new(MemoryStorage::new()),
        Arc::new(StaticRpc),
        Arc::new(LoggingSurface),
    );
    let router = create_router(authority.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    (authority, format!("http://{}", addr))
}

fn sign_request() -> RuntimeMessage {
    RuntimeMessage::DappRequest(DappRequest {
        id: 1,
        method: "signMessage".into(),
        params: json!("hello"),
        origin: ORIGIN.into(),
        title: "D App".into(),
        favicon: None,
    })
}

/// Test: health reports lock state and pending count
#[tokio::test]
async fn health() {
    let (_authority, base) = start().await;
    let body: Value = reqwest::get(format!("{}/health", base)).await.unwrap().json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["unlocked"], false);
    assert_eq!(body["pending"], 0);
}

/// Test: dApp requests cannot be injected over HTTP
#[tokio::test]
async fn dapp_requests_forbidden() {
    let (authority, base) = start().await;
    let response = reqwest::Client::new()
        .post(format!("{}/runtime", base))
        .json(&sign_request())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::FORBIDDEN);
    assert!(authority.approvals().is_empty());
}

/// Test: unlock over HTTP, then approve a pending signature over HTTP
#[tokio::test]
async fn unlock_and_resolve_over_http() {
    let (authority, base) = start().await;
    let client = reqwest::Client::new();
    let wallet = WalletKey::from_secret_bytes(&[5u8; 32]).unwrap();
    let (session, key) = begin_session(&wallet, "octra-mainnet").unwrap();

    let sync = RuntimeMessage::SyncSession { session: Some(session), session_key: Some(key.to_base64()) };
    let reply: Value = client.post(format!("{}/runtime", base)).json(&sync).send().await.unwrap().json().await.unwrap();
    assert_eq!(reply["result"]["success"], true);
    assert!(authority.is_unlocked());

    let requester = authority.clone();
    let call = tokio::spawn(async move { requester.handle(sign_request()).await });

    let mut pending: Vec<Value> = Vec::new();
    for _ in 0..200 {
        let reply: Value = client.get(format!("{}/approvals", base)).send().await.unwrap().json().await.unwrap();
        pending = reply["result"].as_array().cloned().unwrap_or_default();
        if !pending.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(pending.len(), 1);
    let id = pending[0]["id"].as_str().unwrap().to_string();
    assert_eq!(pending[0]["type"], "signMessage");
    assert_eq!(pending[0]["origin"], ORIGIN);

    let one: Value = client.get(format!("{}/approvals/{}", base, id)).send().await.unwrap().json().await.unwrap();
    assert_eq!(one["id"], id.as_str());

    let decided: Value = client
        .put(format!("{}/approvals/{}", base, id))
        .json(&json!({"decision": "approved"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(decided["result"]["success"], true);

    let signed = call.await.unwrap().into_outcome().unwrap();
    assert_eq!(signed["payload"]["domain"], ORIGIN);
    assert_eq!(signed["address"], wallet.address());

    let gone = client.get(format!("{}/approvals/{}", base, id)).send().await.unwrap();
    assert_eq!(gone.status(), reqwest::StatusCode::NOT_FOUND);
}

/// Test: DELETE on an approval acts as the window closing
#[tokio::test]
async fn delete_closes_approval() {
    let (authority, base) = start().await;
    let wallet = WalletKey::from_secret_bytes(&[5u8; 32]).unwrap();
    let (session, key) = begin_session(&wallet, "octra-mainnet").unwrap();
    authority
        .handle(RuntimeMessage::SyncSession { session: Some(session), session_key: Some(key.to_base64()) })
        .await;

    let requester = authority.clone();
    let call = tokio::spawn(async move { requester.handle(sign_request()).await });
    let mut id = None;
    for _ in 0..200 {
        if let Some(first) = authority.approvals().list().unwrap().into_iter().next() {
            id = Some(first.id);
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let id = id.expect("approval opened");

    let closed: Value =
        reqwest::Client::new().delete(format!("{}/approvals/{}", base, id)).send().await.unwrap().json().await.unwrap();
    assert_eq!(closed["result"]["success"], true);
    assert_eq!(call.await.unwrap().into_outcome().unwrap_err().code, 4001);
}

/// Test: malformed runtime messages are a 400
#[tokio::test]
async fn malformed_runtime_message() {
    let (_authority, base) = start().await;
    let response = reqwest::Client::new()
        .post(format!("{}/runtime", base))
        .json(&json!({"type": "NOT_A_MESSAGE"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
}
