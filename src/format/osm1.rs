//! OSM-1: canonical message signing.
//!
//! ```text
//! "\x19Octra Signed Message:\n" + len(canonical) + "\n" + canonical
//! ```
//!
//! `canonical` is the compact JSON of the payload with object keys sorted at
//! every depth. `len` counts UTF-16 code units, matching the browser side.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::crypto::{address_from_public_key, decode_base64, encode_base64, verify, WalletKey};
use crate::error::{BrokerError, BrokerResult};

pub const OSM1_VERSION: &str = "OSM-1";
pub const SIGNING_PREFIX: &str = "\x19Octra Signed Message:\n";

/// What a dApp hands to `signMessage`: a bare string or a payload object.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum MessageInput {
    Text(String),
    Payload(Map<String, Value>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedMessage {
    pub payload: Value,
    pub signature: String,
    pub public_key: String,
    pub address: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Osm1Verification {
    pub valid: bool,
    pub signature_valid: bool,
    pub version_valid: bool,
    pub domain_valid: bool,
    pub not_expired: bool,
    pub address_valid: bool,
}

#[derive(Debug, Clone, Default)]
pub struct VerifyOptions {
    pub expected_domain: Option<String>,
    /// Milliseconds since the Unix epoch.
    pub now_ms: i64,
}

impl VerifyOptions {
    pub fn now() -> Self {
        Self { expected_domain: None, now_ms: chrono::Utc::now().timestamp_millis() }
    }
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self { self.expected_domain = Some(domain.into()); self }
    pub fn at(mut self, now_ms: i64) -> Self { self.now_ms = now_ms; self }
}

/// Rebuild `value` with object keys in lexicographic order at every depth.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

pub fn canonical_json(payload: &Value) -> BrokerResult<String> {
    Ok(serde_json::to_string(&canonicalize(payload))?)
}

pub fn signing_message(payload: &Value) -> BrokerResult<String> {
    let canonical = canonical_json(payload)?;
    Ok(format!("{}{}\n{}", SIGNING_PREFIX, canonical.encode_utf16().count(), canonical))
}

/// Stamp version, domain, signer address and (if absent) timestamp onto the input.
///
/// `version`, `domain` and `address` always come from the broker, never the page.
pub fn build_payload(input: MessageInput, domain: &str, address: &str, now_ms: i64) -> Value {
    let mut map = match input {
        MessageInput::Text(message) => {
            let mut map = Map::new();
            map.insert("message".into(), Value::String(message));
            map
        }
        MessageInput::Payload(map) => map,
    };
    map.insert("version".into(), Value::String(OSM1_VERSION.into()));
    map.insert("domain".into(), Value::String(domain.into()));
    map.insert("address".into(), Value::String(address.into()));
    map.entry("timestamp").or_insert_with(|| Value::from(now_ms));
    Value::Object(map)
}

pub fn sign_payload(payload: Value, key: &WalletKey) -> BrokerResult<SignedMessage> {
    if !payload.is_object() {
        return Err(BrokerError::InvalidParams("payload must be an object".into()));
    }
    let message = signing_message(&payload)?;
    let signature = key.sign(message.as_bytes());
    Ok(SignedMessage {
        payload,
        signature: encode_base64(&signature),
        public_key: key.public_key_base64(),
        address: key.address(),
    })
}

pub fn verify_signed_message(envelope: &SignedMessage, options: &VerifyOptions) -> Osm1Verification {
    let public_key = decode_base64(&envelope.public_key).ok();

    let signature_valid = match (signing_message(&envelope.payload), decode_base64(&envelope.signature), &public_key) {
        (Ok(message), Ok(signature), Some(pk)) => verify(message.as_bytes(), &signature, pk),
        _ => false,
    };

    let version_valid = envelope.payload.get("version").and_then(Value::as_str) == Some(OSM1_VERSION);

    let domain_valid = match &options.expected_domain {
        Some(expected) => envelope.payload.get("domain").and_then(Value::as_str) == Some(expected.as_str()),
        None => true,
    };

    let not_expired = match envelope.payload.get("expiresAt") {
        None | Some(Value::Null) => true,
        Some(value) => value.as_f64().map(|expires| options.now_ms as f64 <= expires).unwrap_or(false),
    };

    let address_valid = public_key
        .map(|pk| address_from_public_key(&pk) == envelope.address)
        .unwrap_or(false);

    Osm1Verification {
        valid: signature_valid && version_valid && domain_valid && not_expired && address_valid,
        signature_valid,
        version_valid,
        domain_valid,
        not_expired,
        address_valid,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key() -> WalletKey {
        WalletKey::from_secret_bytes(&[3u8; 32]).unwrap()
    }

    #[test]
    fn test_canonical_ignores_insertion_order() {
        let a: Value = serde_json::from_str(r#"{"b":1,"a":{"z":true,"y":[{"d":1,"c":2}]}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"a":{"y":[{"c":2,"d":1}],"z":true},"b":1}"#).unwrap();
        assert_eq!(canonical_json(&a).unwrap(), canonical_json(&b).unwrap());
        assert_eq!(canonical_json(&a).unwrap(), r#"{"a":{"y":[{"c":2,"d":1}],"z":true},"b":1}"#);
    }

    #[test]
    fn test_signing_message_layout() {
        let msg = signing_message(&json!({"message": "hi"})).unwrap();
        assert_eq!(msg, "\x19Octra Signed Message:\n16\n{\"message\":\"hi\"}");
    }

    #[test]
    fn test_length_counts_utf16_units() {
        // "é" is 2 UTF-8 bytes but one UTF-16 unit; "😀" is 4 bytes and two units.
        let msg = signing_message(&json!({"m": "é😀"})).unwrap();
        assert!(msg.starts_with("\x19Octra Signed Message:\n11\n"));
    }

    #[test]
    fn test_deterministic_signature() {
        let payload = build_payload(MessageInput::Text("hello".into()), "https://d.app", &key().address(), 1_700_000_000_000);
        let first = sign_payload(payload.clone(), &key()).unwrap();
        let second = sign_payload(payload, &key()).unwrap();
        assert_eq!(first.signature, second.signature);
    }

    #[test]
    fn test_round_trip_all_checks() {
        let payload = build_payload(MessageInput::Text("hello".into()), "https://d.app", &key().address(), 1_700_000_000_000);
        let envelope = sign_payload(payload, &key()).unwrap();
        let result = verify_signed_message(&envelope, &VerifyOptions::now().with_domain("https://d.app"));
        assert_eq!(result, Osm1Verification {
            valid: true, signature_valid: true, version_valid: true,
            domain_valid: true, not_expired: true, address_valid: true,
        });
    }

    #[test]
    fn test_expiry() {
        let mut input = Map::new();
        input.insert("action".into(), json!("login"));
        input.insert("expiresAt".into(), json!(2_000));
        let payload = build_payload(MessageInput::Payload(input), "https://d.app", &key().address(), 1_000);
        let envelope = sign_payload(payload, &key()).unwrap();

        assert!(verify_signed_message(&envelope, &VerifyOptions::default().at(1_500)).valid);
        let late = verify_signed_message(&envelope, &VerifyOptions::default().at(2_001));
        assert!(!late.not_expired);
        assert!(!late.valid);
        assert!(late.signature_valid);
    }

    #[test]
    fn test_fractional_expiry() {
        let mut input = Map::new();
        input.insert("expiresAt".into(), json!(2_000.5));
        let payload = build_payload(MessageInput::Payload(input), "https://d.app", &key().address(), 1_000);
        let envelope = sign_payload(payload, &key()).unwrap();

        let on_time = verify_signed_message(&envelope, &VerifyOptions::default().at(2_000));
        assert!(on_time.not_expired);
        assert!(on_time.valid);
        assert!(!verify_signed_message(&envelope, &VerifyOptions::default().at(2_001)).not_expired);

        let mut input = Map::new();
        input.insert("expiresAt".into(), json!("soon"));
        let payload = build_payload(MessageInput::Payload(input), "https://d.app", &key().address(), 1_000);
        let envelope = sign_payload(payload, &key()).unwrap();
        assert!(!verify_signed_message(&envelope, &VerifyOptions::default().at(1_000)).not_expired);
    }

    #[test]
    fn test_page_cannot_claim_other_domain() {
        let mut input = Map::new();
        input.insert("domain".into(), json!("https://bank.example"));
        let payload = build_payload(MessageInput::Payload(input), "https://evil.example", "octX", 0);
        assert_eq!(payload["domain"], "https://evil.example");
    }

    #[test]
    fn test_tampered_payload_fails() {
        let payload = build_payload(MessageInput::Text("pay 1".into()), "https://d.app", &key().address(), 0);
        let mut envelope = sign_payload(payload, &key()).unwrap();
        envelope.payload["message"] = json!("pay 100");
        let result = verify_signed_message(&envelope, &VerifyOptions::default());
        assert!(!result.signature_valid);
        assert!(result.address_valid);
    }

    #[test]
    fn test_address_mismatch() {
        let payload = build_payload(MessageInput::Text("x".into()), "https://d.app", "octOther", 0);
        let mut envelope = sign_payload(payload, &key()).unwrap();
        envelope.address = "octSomeoneElse".into();
        let result = verify_signed_message(&envelope, &VerifyOptions::default());
        assert!(!result.address_valid);
        assert!(!result.valid);
    }

    #[test]
    fn test_message_input_decoding() {
        assert_eq!(serde_json::from_value::<MessageInput>(json!("hello")).unwrap(), MessageInput::Text("hello".into()));
        assert!(matches!(serde_json::from_value::<MessageInput>(json!({"a": 1})).unwrap(), MessageInput::Payload(_)));
        assert!(serde_json::from_value::<MessageInput>(json!(42)).is_err());
    }
}
