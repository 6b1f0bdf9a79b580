//! Error taxonomy shared by every context.
//!
//! Inside a context errors are `BrokerError`. Anything crossing a context
//! boundary is flattened to a [`WireError`] `{code, message}`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CODE_USER_REJECTED: i64 = 4001;
pub const CODE_NOT_CONNECTED: i64 = 4100;
pub const CODE_UNSUPPORTED_METHOD: i64 = 4200;
pub const CODE_TIMEOUT: i64 = 4900;
pub const CODE_INTERNAL: i64 = 5000;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BrokerError {
    #[error("not connected")]
    NotConnected,
    #[error("wallet locked")]
    Locked,
    #[error("user rejected the request")]
    UserRejected,
    #[error("unsupported method: {0}")]
    UnsupportedMethod(String),
    #[error("request timed out")]
    Timeout,
    #[error("invalid params: {0}")]
    InvalidParams(String),
    #[error("signing failed: {0}")]
    Signing(String),
    #[error("broadcast failed: {0}")]
    Broadcast(String),
    #[error("rpc: {0}")]
    Rpc(String),
    #[error("storage: {0}")]
    Storage(String),
    #[error("protocol: {0}")]
    Protocol(String),
    #[error("{0}")]
    Internal(String),
}

pub type BrokerResult<T> = Result<T, BrokerError>;

impl BrokerError {
    pub fn code(&self) -> i64 {
        match self {
            BrokerError::NotConnected | BrokerError::Locked => CODE_NOT_CONNECTED,
            BrokerError::UserRejected => CODE_USER_REJECTED,
            BrokerError::UnsupportedMethod(_) => CODE_UNSUPPORTED_METHOD,
            BrokerError::Timeout => CODE_TIMEOUT,
            _ => CODE_INTERNAL,
        }
    }
}

/// Structured error as it travels between page, relay and authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    pub code: i64,
    pub message: String,
}

impl WireError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    /// Rebuild a typed error on the receiving side. Messages of 5000-class
    /// errors are kept verbatim so broadcast failures reach the dApp unchanged.
    pub fn into_broker_error(self) -> BrokerError {
        match self.code {
            CODE_USER_REJECTED => BrokerError::UserRejected,
            CODE_NOT_CONNECTED if self.message == BrokerError::Locked.to_string() => BrokerError::Locked,
            CODE_NOT_CONNECTED => BrokerError::NotConnected,
            CODE_UNSUPPORTED_METHOD => BrokerError::UnsupportedMethod(
                self.message.trim_start_matches("unsupported method: ").to_string(),
            ),
            CODE_TIMEOUT => BrokerError::Timeout,
            _ => BrokerError::Internal(self.message),
        }
    }
}

impl From<BrokerError> for WireError {
    fn from(err: BrokerError) -> Self {
        WireError { code: err.code(), message: err.to_string() }
    }
}

impl From<&BrokerError> for WireError {
    fn from(err: &BrokerError) -> Self {
        WireError { code: err.code(), message: err.to_string() }
    }
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl From<serde_json::Error> for BrokerError {
    fn from(err: serde_json::Error) -> Self {
        BrokerError::Protocol(format!("json: {err}"))
    }
}
