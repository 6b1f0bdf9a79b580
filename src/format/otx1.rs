//! OTX-1: transaction payload and signing bytes.
//!
//! The signed bytes are the compact JSON of `{from, to_, amount, nonce, ou, timestamp}`
//! in exactly that order. `message` travels with the transaction but is not signed.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::crypto::{decode_base58, decode_base64, encode_base64, verify, WalletKey, ADDRESS_PREFIX};
use crate::error::{BrokerError, BrokerResult};

pub const MICRO_DIGITS: usize = 6;
pub const MICRO_PER_OCT: u128 = 1_000_000;

/// Fee/priority class tags. Amounts below the threshold use the small tag.
pub const OU_SMALL: &str = "1";
pub const OU_LARGE: &str = "3";
pub const OU_THRESHOLD_OCT: u128 = 1_000;

/// Exact decimal conversion from whole tokens to micro-units.
///
/// The fractional part is padded or truncated to six digits; no rounding.
pub fn oct_to_micro(amount: &str) -> BrokerResult<String> {
    let amount = amount.trim();
    let invalid = || BrokerError::InvalidParams(format!("invalid amount: {amount:?}"));
    if amount.is_empty() {
        return Err(invalid());
    }
    let (int_part, frac_part) = match amount.split_once('.') {
        Some((i, f)) => (i, f),
        None => (amount, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(invalid());
    }
    if !int_part.chars().all(|c| c.is_ascii_digit()) || !frac_part.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    let mut frac: String = frac_part.chars().take(MICRO_DIGITS).collect();
    while frac.len() < MICRO_DIGITS {
        frac.push('0');
    }
    let joined = format!("{int_part}{frac}");
    let trimmed = joined.trim_start_matches('0');
    Ok(if trimmed.is_empty() { "0".into() } else { trimmed.into() })
}

/// Micro-units back to a decimal string (`"1500000"` → `"1.5"`).
pub fn micro_to_oct_string(micro: &str) -> BrokerResult<String> {
    let value: u128 = micro
        .trim()
        .parse()
        .map_err(|_| BrokerError::InvalidParams(format!("invalid micro amount: {micro:?}")))?;
    let whole = value / MICRO_PER_OCT;
    let frac = value % MICRO_PER_OCT;
    if frac == 0 {
        return Ok(whole.to_string());
    }
    let frac = format!("{frac:06}");
    Ok(format!("{whole}.{}", frac.trim_end_matches('0')))
}

pub fn micro_to_oct(micro: &str) -> BrokerResult<f64> {
    micro_to_oct_string(micro)?
        .parse()
        .map_err(|_| BrokerError::Internal("amount out of range".into()))
}

pub fn ou_for_amount(micro: &str) -> &'static str {
    match micro.parse::<u128>() {
        Ok(value) if value < OU_THRESHOLD_OCT * MICRO_PER_OCT => OU_SMALL,
        _ => OU_LARGE,
    }
}

/// `"oct" + base58(sha256(pk))`, so the tail must decode to 32 bytes.
pub fn is_valid_address(address: &str) -> bool {
    address
        .strip_prefix(ADDRESS_PREFIX)
        .and_then(|tail| decode_base58(tail).ok())
        .map(|bytes| bytes.len() == 32)
        .unwrap_or(false)
}

/// Transaction parameters as a dApp supplies them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionRequest {
    pub to: String,
    /// Whole tokens, as a decimal string or JSON number.
    pub amount: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl TransactionRequest {
    pub fn from_params(params: &Value) -> BrokerResult<Self> {
        let request: Self = serde_json::from_value(params.clone())
            .map_err(|e| BrokerError::InvalidParams(format!("transaction: {e}")))?;
        if !is_valid_address(&request.to) {
            return Err(BrokerError::InvalidParams(format!("invalid recipient: {}", request.to)));
        }
        let micro = request.amount_micro()?;
        if micro == "0" {
            return Err(BrokerError::InvalidParams("amount must be positive".into()));
        }
        Ok(request)
    }

    pub fn amount_micro(&self) -> BrokerResult<String> {
        match &self.amount {
            Value::String(s) => oct_to_micro(s),
            Value::Number(n) => oct_to_micro(&n.to_string()),
            other => Err(BrokerError::InvalidParams(format!("invalid amount: {other}"))),
        }
    }
}

/// Largest integer an f64 holds exactly.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Whole seconds print as `1700000000`, not `1700000000.0`, matching how a
/// JavaScript signer stringifies the same number.
fn js_number<S: serde::Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if value.is_finite() && value.fract() == 0.0 && value.abs() <= MAX_SAFE_INTEGER {
        serializer.serialize_i64(*value as i64)
    } else {
        serializer.serialize_f64(*value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub from: String,
    #[serde(rename = "to_")]
    pub to: String,
    /// Micro-units.
    pub amount: String,
    pub nonce: u64,
    pub ou: String,
    /// Unix seconds, fractional.
    #[serde(serialize_with = "js_number")]
    pub timestamp: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Serialize)]
struct SigningView<'a> {
    from: &'a str,
    to_: &'a str,
    amount: &'a str,
    nonce: u64,
    ou: &'a str,
    #[serde(serialize_with = "js_number")]
    timestamp: f64,
}

impl Transaction {
    pub fn build(from: &str, request: &TransactionRequest, nonce: u64, timestamp: f64) -> BrokerResult<Self> {
        let amount = request.amount_micro()?;
        Ok(Self {
            from: from.into(),
            to: request.to.clone(),
            ou: ou_for_amount(&amount).into(),
            amount,
            nonce,
            timestamp,
            message: request.message.clone(),
        })
    }

    pub fn signing_bytes(&self) -> BrokerResult<Vec<u8>> {
        let view = SigningView {
            from: &self.from,
            to_: &self.to,
            amount: &self.amount,
            nonce: self.nonce,
            ou: &self.ou,
            timestamp: self.timestamp,
        };
        Ok(serde_json::to_vec(&view)?)
    }

    pub fn sign(self, key: &WalletKey) -> BrokerResult<SignedTransaction> {
        if key.address() != self.from {
            return Err(BrokerError::Signing("sender does not match signing key".into()));
        }
        let signature = key.sign(&self.signing_bytes()?);
        Ok(SignedTransaction {
            transaction: self,
            signature: encode_base64(&signature),
            public_key: key.public_key_base64(),
        })
    }
}

/// Wire shape: transaction fields flattened next to `signature` and `public_key`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedTransaction {
    #[serde(flatten)]
    pub transaction: Transaction,
    pub signature: String,
    pub public_key: String,
}

impl SignedTransaction {
    pub fn verify(&self) -> bool {
        let (Ok(bytes), Ok(sig), Ok(pk)) = (
            self.transaction.signing_bytes(),
            decode_base64(&self.signature),
            decode_base64(&self.public_key),
        ) else {
            return false;
        };
        verify(&bytes, &sig, &pk)
    }
}
