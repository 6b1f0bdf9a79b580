//! Node RPC over HTTP (`GET /balance/{address}`, `POST /send-tx`).

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use super::{AccountState, BroadcastReceipt, RpcClient};
use crate::error::{BrokerError, BrokerResult};
use crate::format::SignedTransaction;

const RPC_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct HttpRpcClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpRpcClient {
    pub fn new(base_url: impl Into<String>) -> BrokerResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(RPC_TIMEOUT)
            .build()
            .map_err(|e| BrokerError::Rpc(format!("client: {e}")))?;
        Ok(Self { base_url: base_url.into().trim_end_matches('/').to_string(), client })
    }

    pub fn base_url(&self) -> &str { &self.base_url }
}

fn balance_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[async_trait]
impl RpcClient for HttpRpcClient {
    async fn get_account(&self, address: &str) -> BrokerResult<AccountState> {
        let url = format!("{}/balance/{}", self.base_url, address);
        let response = self.client.get(&url).send().await
            .map_err(|e| BrokerError::Rpc(format!("balance: {e}")))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            // Never-funded accounts are unknown to the node.
            return Ok(AccountState { balance: "0".into(), nonce: 0 });
        }
        if !response.status().is_success() {
            return Err(BrokerError::Rpc(format!("balance: HTTP {}", response.status())));
        }
        let body: Value = response.json().await
            .map_err(|e| BrokerError::Rpc(format!("balance json: {e}")))?;
        Ok(AccountState {
            balance: body.get("balance").and_then(balance_string).unwrap_or_else(|| "0".into()),
            nonce: body.get("nonce").and_then(Value::as_u64).unwrap_or(0),
        })
    }

    async fn send_transaction(&self, tx: &SignedTransaction) -> BrokerResult<BroadcastReceipt> {
        let url = format!("{}/send-tx", self.base_url);
        let response = self.client.post(&url).json(tx).send().await
            .map_err(|e| BrokerError::Broadcast(e.to_string()))?;
        let status = response.status();
        let text = response.text().await.map_err(|e| BrokerError::Broadcast(e.to_string()))?;
        let body: Value = serde_json::from_str(&text).unwrap_or(Value::Null);

        if status.is_success() && body.get("status").and_then(Value::as_str) == Some("accepted") {
            let tx_hash = body.get("tx_hash").and_then(Value::as_str).unwrap_or_default().to_string();
            tracing::info!(%tx_hash, "transaction accepted");
            return Ok(BroadcastReceipt { tx_hash });
        }
        let reason = body
            .get("error")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or(text);
        Err(BrokerError::Broadcast(reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_base_url_normalized() {
        let client = HttpRpcClient::new("https://octra.network/").unwrap();
        assert_eq!(client.base_url(), "https://octra.network");
    }

    #[test]
    fn test_balance_string() {
        assert_eq!(balance_string(&json!("1.5")), Some("1.5".into()));
        assert_eq!(balance_string(&json!(2)), Some("2".into()));
        assert_eq!(balance_string(&json!(null)), None);
    }
}
