//! Storage areas and the connection store.
//!
//! Two areas back the authority:
//!
//! | Area | Lifetime | Holds |
//! |------|----------|-------|
//! | local | durable (file) | connections |
//! | session | browser session (memory of the host) | session identity + sealed key |
//!
//! Every mutation is written through immediately.

mod connections;

pub use connections::{Connection, ConnectionInfo, ConnectionStore};

use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{BrokerError, BrokerResult};

pub trait StorageArea: Send + Sync {
    fn get(&self, key: &str) -> BrokerResult<Option<Value>>;
    fn set(&self, key: &str, value: Value) -> BrokerResult<()>;
    fn remove(&self, key: &str) -> BrokerResult<()>;
    fn clear(&self) -> BrokerResult<()>;
}

fn poisoned<T>(_: T) -> BrokerError {
    BrokerError::Storage("storage lock poisoned".into())
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: Mutex<Map<String, Value>>,
}

impl MemoryStorage {
    pub fn new() -> Self { Self::default() }
}

impl StorageArea for MemoryStorage {
    fn get(&self, key: &str) -> BrokerResult<Option<Value>> {
        Ok(self.items.lock().map_err(poisoned)?.get(key).cloned())
    }
    fn set(&self, key: &str, value: Value) -> BrokerResult<()> {
        self.items.lock().map_err(poisoned)?.insert(key.into(), value);
        Ok(())
    }
    fn remove(&self, key: &str) -> BrokerResult<()> {
        self.items.lock().map_err(poisoned)?.remove(key);
        Ok(())
    }
    fn clear(&self) -> BrokerResult<()> {
        self.items.lock().map_err(poisoned)?.clear();
        Ok(())
    }
}

/// JSON object on disk, rewritten in full on every mutation.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    items: Mutex<Map<String, Value>>,
}

impl FileStorage {
    pub fn open(path: impl Into<PathBuf>) -> BrokerResult<Self> {
        let path = path.into();
        let items = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| BrokerError::Storage(format!("read {}: {e}", path.display())))?;
            if raw.trim().is_empty() {
                Map::new()
            } else {
                serde_json::from_str(&raw)
                    .map_err(|e| BrokerError::Storage(format!("parse {}: {e}", path.display())))?
            }
        } else {
            Map::new()
        };
        Ok(Self { path, items: Mutex::new(items) })
    }

    pub fn path(&self) -> &Path { &self.path }

    fn persist(&self, items: &Map<String, Value>) -> BrokerResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| BrokerError::Storage(format!("mkdir: {e}")))?;
        }
        let json = serde_json::to_string_pretty(items)
            .map_err(|e| BrokerError::Storage(format!("encode: {e}")))?;
        let tmp = self.path.with_extension("json.tmp");
        write_restricted(&tmp, json.as_bytes())?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| BrokerError::Storage(format!("rename: {e}")))
    }
}

#[cfg(unix)]
fn write_restricted(path: &Path, bytes: &[u8]) -> BrokerResult<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .map_err(|e| BrokerError::Storage(format!("open: {e}")))?;
    file.write_all(bytes).map_err(|e| BrokerError::Storage(format!("write: {e}")))
}

#[cfg(not(unix))]
fn write_restricted(path: &Path, bytes: &[u8]) -> BrokerResult<()> {
    std::fs::write(path, bytes).map_err(|e| BrokerError::Storage(format!("write: {e}")))
}

impl StorageArea for FileStorage {
    fn get(&self, key: &str) -> BrokerResult<Option<Value>> {
        Ok(self.items.lock().map_err(poisoned)?.get(key).cloned())
    }
    fn set(&self, key: &str, value: Value) -> BrokerResult<()> {
        let mut items = self.items.lock().map_err(poisoned)?;
        items.insert(key.into(), value);
        self.persist(&items)
    }
    fn remove(&self, key: &str) -> BrokerResult<()> {
        let mut items = self.items.lock().map_err(poisoned)?;
        if items.remove(key).is_some() {
            self.persist(&items)?;
        }
        Ok(())
    }
    fn clear(&self) -> BrokerResult<()> {
        let mut items = self.items.lock().map_err(poisoned)?;
        items.clear();
        self.persist(&items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_file_storage_survives_reopen() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("octra").join("local.json");
        {
            let storage = FileStorage::open(&path).unwrap();
            storage.set("a", json!({"x": 1})).unwrap();
            storage.set("b", json!(2)).unwrap();
            storage.remove("b").unwrap();
        }
        let reopened = FileStorage::open(&path).unwrap();
        assert_eq!(reopened.get("a").unwrap(), Some(json!({"x": 1})));
        assert_eq!(reopened.get("b").unwrap(), None);

        reopened.clear().unwrap();
        assert_eq!(FileStorage::open(&path).unwrap().get("a").unwrap(), None);
    }

    #[test]
    fn test_memory_storage() {
        let storage = MemoryStorage::new();
        storage.set("k", json!("v")).unwrap();
        assert_eq!(storage.get("k").unwrap(), Some(json!("v")));
        storage.clear().unwrap();
        assert_eq!(storage.get("k").unwrap(), None);
    }
}
