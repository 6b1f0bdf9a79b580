//! Session cache and the zero-trust key handoff.
//!
//! ```text
//! foreground unlock ──► begin_session(key) ──► (Session, SessionKey)
//!                                                  │          │
//!                      SYNC_SESSION {session} ◄────┘          │
//!                      SYNC_SESSION {sessionKey} ◄────────────┘ (memory only)
//!
//! authority: Session ◄── session storage area
//!            SessionKey ◄── volatile field, lost on restart
//!            get_wallet_for_signing() = open(Session.encryptedPrivateKey, SessionKey)
//! ```
//!
//! The plaintext key and the key that opens it are never persisted together.
//! `get_wallet_for_signing` is the only way signing code obtains key material.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::core::paths::storage;
use crate::crypto::{SessionKey, WalletKey};
use crate::error::{BrokerError, BrokerResult};
use crate::store::StorageArea;

/// Non-secret identity of the unlocked wallet plus the sealed signing key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub address: String,
    pub public_key: String,
    pub encrypted_private_key: String,
    pub network: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

/// Foreground half of the handoff: seal `key` under a fresh session key.
pub fn begin_session(key: &WalletKey, network: &str) -> BrokerResult<(Session, SessionKey)> {
    let session_key = SessionKey::generate();
    let encrypted_private_key = session_key.seal(&key.secret_bytes()[..])?;
    let session = Session {
        address: key.address(),
        public_key: key.public_key_base64(),
        encrypted_private_key,
        network: network.into(),
        timestamp: chrono::Utc::now().timestamp_millis(),
    };
    Ok((session, session_key))
}

/// Plaintext key for the duration of one operation. Zeroized on drop.
#[derive(Debug)]
pub struct UnlockedWallet {
    pub address: String,
    pub public_key: String,
    key: WalletKey,
}

impl UnlockedWallet {
    pub fn key(&self) -> &WalletKey { &self.key }
}

pub struct SessionCache {
    area: Arc<dyn StorageArea>,
    session_key: Option<SessionKey>,
}

impl SessionCache {
    /// A cache over `area` with no session key, as after a cold start.
    pub fn new(area: Arc<dyn StorageArea>) -> Self {
        Self { area, session_key: None }
    }

    pub fn session(&self) -> BrokerResult<Option<Session>> {
        match self.area.get(storage::SESSION)? {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| BrokerError::Storage(format!("session: {e}"))),
        }
    }

    /// Persist the session. A session with a different ciphertext invalidates the held key.
    pub fn sync_session(&mut self, session: Session) -> BrokerResult<()> {
        let previous = self.session()?;
        if previous.as_ref().map(|p| &p.encrypted_private_key) != Some(&session.encrypted_private_key) {
            self.session_key = None;
        }
        let value = serde_json::to_value(&session).map_err(|e| BrokerError::Storage(format!("session: {e}")))?;
        self.area.set(storage::SESSION, value)?;
        tracing::info!(address = %session.address, network = %session.network, "session synced");
        Ok(())
    }

    pub fn sync_key(&mut self, key: SessionKey) {
        self.session_key = Some(key);
        tracing::info!("session key received");
    }

    pub fn has_key(&self) -> bool { self.session_key.is_some() }

    pub fn is_unlocked(&self) -> bool {
        self.get_wallet_for_signing().is_ok()
    }

    /// Clear both halves.
    pub fn lock(&mut self) -> BrokerResult<()> {
        self.session_key = None;
        self.area.remove(storage::SESSION)?;
        tracing::info!("session locked");
        Ok(())
    }

    /// Drop only the volatile half, as a platform suspension does.
    pub fn forget_key(&mut self) {
        self.session_key = None;
    }

    /// Every failure here reports `Locked`; the cause is never surfaced.
    pub fn get_wallet_for_signing(&self) -> BrokerResult<UnlockedWallet> {
        let session = self.session().ok().flatten().ok_or(BrokerError::Locked)?;
        let session_key = self.session_key.as_ref().ok_or(BrokerError::Locked)?;
        let secret = session_key.open(&session.encrypted_private_key).map_err(|_| {
            tracing::debug!("session blob did not open with the held key");
            BrokerError::Locked
        })?;
        let key = WalletKey::from_secret_bytes(&secret).map_err(|_| BrokerError::Locked)?;
        if key.address() != session.address {
            return Err(BrokerError::Locked);
        }
        Ok(UnlockedWallet { address: session.address, public_key: session.public_key, key })
    }
}
