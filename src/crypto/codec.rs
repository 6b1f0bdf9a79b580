use base64::Engine;

use crate::error::{BrokerError, BrokerResult};

pub fn encode_base64(data: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(data)
}

pub fn decode_base64(value: &str) -> BrokerResult<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(value.trim())
        .map_err(|e| BrokerError::InvalidParams(format!("base64: {e}")))
}

pub fn encode_base58(data: &[u8]) -> String {
    bs58::encode(data).into_string()
}

pub fn decode_base58(value: &str) -> BrokerResult<Vec<u8>> {
    bs58::decode(value)
        .into_vec()
        .map_err(|e| BrokerError::InvalidParams(format!("base58: {e}")))
}
