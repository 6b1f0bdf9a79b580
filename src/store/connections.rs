//! Per-origin connection records.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::StorageArea;
use crate::core::paths::storage;
use crate::error::{BrokerError, BrokerResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub origin: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub favicon: Option<String>,
    pub address: String,
    pub connected: bool,
    /// Milliseconds since the Unix epoch.
    pub connected_at: i64,
    pub network_id: String,
    pub chain_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub title: String,
    pub favicon: Option<String>,
    pub address: String,
    pub network_id: String,
    pub chain_id: String,
}

/// Origin → Connection, persisted under one key in the durable area.
///
/// Every call reads storage afresh so a resumed authority never works from a
/// stale copy. Concurrent writers race last-write-wins; each record is idempotent.
#[derive(Clone)]
pub struct ConnectionStore {
    area: Arc<dyn StorageArea>,
}

impl ConnectionStore {
    pub fn new(area: Arc<dyn StorageArea>) -> Self { Self { area } }

    fn load(&self) -> BrokerResult<BTreeMap<String, Connection>> {
        match self.area.get(storage::CONNECTIONS)? {
            None | Some(Value::Null) => Ok(BTreeMap::new()),
            Some(value) => serde_json::from_value(value)
                .map_err(|e| BrokerError::Storage(format!("connections: {e}"))),
        }
    }

    fn save(&self, map: &BTreeMap<String, Connection>) -> BrokerResult<()> {
        let value = serde_json::to_value(map).map_err(|e| BrokerError::Storage(format!("connections: {e}")))?;
        self.area.set(storage::CONNECTIONS, value)
    }

    pub fn is_connected(&self, origin: &str) -> BrokerResult<bool> {
        Ok(self.get_connection(origin)?.map(|c| c.connected && !c.address.is_empty()).unwrap_or(false))
    }

    pub fn get_connection(&self, origin: &str) -> BrokerResult<Option<Connection>> {
        Ok(self.load()?.remove(origin))
    }

    /// Upsert; stamps `connected = true` and `connectedAt = now`.
    pub fn add_connection(&self, origin: &str, info: ConnectionInfo) -> BrokerResult<Connection> {
        if info.address.is_empty() {
            return Err(BrokerError::InvalidParams("connection requires an address".into()));
        }
        let mut map = self.load()?;
        let connection = Connection {
            origin: origin.into(),
            title: info.title,
            favicon: info.favicon,
            address: info.address,
            connected: true,
            connected_at: chrono::Utc::now().timestamp_millis(),
            network_id: info.network_id,
            chain_id: info.chain_id,
        };
        map.insert(origin.into(), connection.clone());
        self.save(&map)?;
        tracing::info!(origin, address = %connection.address, "connection added");
        Ok(connection)
    }

    /// Returns whether a record was removed.
    pub fn remove_connection(&self, origin: &str) -> BrokerResult<bool> {
        let mut map = self.load()?;
        let removed = map.remove(origin).is_some();
        if removed {
            self.save(&map)?;
            tracing::info!(origin, "connection removed");
        }
        Ok(removed)
    }

    pub fn get_connected_origins(&self) -> BrokerResult<Vec<String>> {
        Ok(self.load()?.into_values().filter(|c| c.connected).map(|c| c.origin).collect())
    }

    pub fn clear(&self) -> BrokerResult<()> {
        self.area.remove(storage::CONNECTIONS)
    }
}
