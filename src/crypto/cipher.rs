//! Session key sealing (AES-256-GCM).
//!
//! Sealed blobs are `base64(nonce(12) || ciphertext+tag)`.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use zeroize::Zeroizing;

use super::codec::{decode_base64, encode_base64};
use crate::error::{BrokerError, BrokerResult};

const NONCE_LEN: usize = 12;

/// Ephemeral symmetric key able to open the session blob. Memory only.
#[derive(Clone)]
pub struct SessionKey(Zeroizing<[u8; 32]>);

impl SessionKey {
    pub fn generate() -> Self {
        let mut bytes = Zeroizing::new([0u8; 32]);
        rand::thread_rng().fill_bytes(&mut bytes[..]);
        Self(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> BrokerResult<Self> {
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| BrokerError::InvalidParams("session key must be 32 bytes".into()))?;
        Ok(Self(Zeroizing::new(key)))
    }

    pub fn from_base64(value: &str) -> BrokerResult<Self> {
        let bytes = Zeroizing::new(decode_base64(value)?);
        Self::from_bytes(&bytes)
    }

    /// Wire form for the in-memory handoff message. Never persist this.
    pub fn to_base64(&self) -> String {
        encode_base64(&self.0[..])
    }

    pub fn seal(&self, plaintext: &[u8]) -> BrokerResult<String> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0[..]));
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| BrokerError::Internal("seal failed".into()))?;
        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(encode_base64(&blob))
    }

    pub fn open(&self, sealed: &str) -> BrokerResult<Zeroizing<Vec<u8>>> {
        let blob = decode_base64(sealed)?;
        if blob.len() <= NONCE_LEN {
            return Err(BrokerError::Internal("sealed blob truncated".into()));
        }
        let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0[..]));
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map(Zeroizing::new)
            .map_err(|_| BrokerError::Internal("open failed".into()))
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open() {
        let key = SessionKey::generate();
        let sealed = key.seal(b"secret seed").unwrap();
        assert_eq!(key.open(&sealed).unwrap().as_slice(), b"secret seed");
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = SessionKey::generate().seal(b"secret seed").unwrap();
        assert!(SessionKey::generate().open(&sealed).is_err());
    }

    #[test]
    fn test_fresh_nonce_per_seal() {
        let key = SessionKey::generate();
        assert_ne!(key.seal(b"x").unwrap(), key.seal(b"x").unwrap());
    }

    #[test]
    fn test_wire_form() {
        let key = SessionKey::generate();
        let restored = SessionKey::from_base64(&key.to_base64()).unwrap();
        let sealed = key.seal(b"abc").unwrap();
        assert_eq!(restored.open(&sealed).unwrap().as_slice(), b"abc");
        assert!(SessionKey::from_bytes(&[0u8; 16]).is_err());
    }
}
