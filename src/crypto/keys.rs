//! Ed25519 wallet keys and Octra address derivation.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use super::codec::{decode_base64, encode_base58, encode_base64};
use crate::error::{BrokerError, BrokerResult};

pub const ADDRESS_PREFIX: &str = "oct";

pub fn hash(bytes: &[u8]) -> [u8; 32] {
    Sha256::digest(bytes).into()
}

/// `"oct" + base58(sha256(publicKey))`
pub fn address_from_public_key(public_key: &[u8]) -> String {
    format!("{}{}", ADDRESS_PREFIX, encode_base58(&hash(public_key)))
}

/// Check an ed25519 signature. Malformed keys or signatures verify as false.
pub fn verify(message: &[u8], signature: &[u8], public_key: &[u8]) -> bool {
    let Ok(pk_bytes) = <[u8; 32]>::try_from(public_key) else { return false };
    let Ok(verifying) = VerifyingKey::from_bytes(&pk_bytes) else { return false };
    let Ok(signature) = Signature::from_slice(signature) else { return false };
    verifying.verify(message, &signature).is_ok()
}

/// Plaintext signing key. Zeroized on drop; never serialized.
pub struct WalletKey {
    signing: SigningKey,
}

impl WalletKey {
    pub fn generate() -> Self {
        Self { signing: SigningKey::generate(&mut rand::rngs::OsRng) }
    }

    /// Accepts a 32-byte seed or a 64-byte `seed || publicKey` keypair.
    pub fn from_secret_bytes(bytes: &[u8]) -> BrokerResult<Self> {
        let signing = match bytes.len() {
            32 => {
                let mut seed = Zeroizing::new([0u8; 32]);
                seed.copy_from_slice(bytes);
                SigningKey::from_bytes(&seed)
            }
            64 => {
                let mut pair = Zeroizing::new([0u8; 64]);
                pair.copy_from_slice(bytes);
                SigningKey::from_keypair_bytes(&pair)
                    .map_err(|_| BrokerError::InvalidParams("keypair bytes inconsistent".into()))?
            }
            n => return Err(BrokerError::InvalidParams(format!("private key must be 32 or 64 bytes, got {n}"))),
        };
        Ok(Self { signing })
    }

    pub fn from_base64(value: &str) -> BrokerResult<Self> {
        let bytes = Zeroizing::new(decode_base64(value)?);
        Self::from_secret_bytes(&bytes)
    }

    pub fn secret_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.signing.to_bytes())
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.signing.verifying_key().to_bytes()
    }

    pub fn public_key_base64(&self) -> String {
        encode_base64(&self.public_key())
    }

    pub fn address(&self) -> String {
        address_from_public_key(&self.public_key())
    }

    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing.sign(message).to_bytes()
    }
}

impl std::fmt::Debug for WalletKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletKey").field("address", &self.address()).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_format() {
        let key = WalletKey::from_secret_bytes(&[7u8; 32]).unwrap();
        let address = key.address();
        assert!(address.starts_with("oct"));
        assert_eq!(address, address_from_public_key(&key.public_key()));
    }

    #[test]
    fn test_seed_and_keypair_forms_agree() {
        let key = WalletKey::from_secret_bytes(&[9u8; 32]).unwrap();
        let mut pair = [0u8; 64];
        pair[..32].copy_from_slice(&[9u8; 32]);
        pair[32..].copy_from_slice(&key.public_key());
        let from_pair = WalletKey::from_secret_bytes(&pair).unwrap();
        assert_eq!(from_pair.public_key(), key.public_key());
    }

    #[test]
    fn test_sign_verify() {
        let key = WalletKey::generate();
        let sig = key.sign(b"payload");
        assert!(verify(b"payload", &sig, &key.public_key()));
        assert!(!verify(b"payload!", &sig, &key.public_key()));
        assert!(!verify(b"payload", &sig[..10], &key.public_key()));
    }

    #[test]
    fn test_rejects_bad_length() {
        assert!(WalletKey::from_secret_bytes(&[1u8; 31]).is_err());
    }
}
