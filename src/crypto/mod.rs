//! Signing primitives: ed25519, sha256, base58/base64, session sealing.

mod cipher;
mod codec;
mod keys;

pub use cipher::SessionKey;
pub use codec::{decode_base58, decode_base64, encode_base58, encode_base64};
pub use keys::{address_from_public_key, hash, verify, WalletKey, ADDRESS_PREFIX};
