//! Names shared across contexts
//!
//! Centralized registry for storage keys, wire tags, dApp methods and events.

/// Storage area keys
pub mod storage {
    /// Durable area: origin → Connection map
    pub const CONNECTIONS: &str = "connectedSites";
    /// Session area: unlocked wallet identity + sealed key
    pub const SESSION: &str = "walletSession";
}

/// Page ↔ relay window message tags
pub mod window {
    pub const REQUEST: &str = "OCTRA_REQUEST";
    pub const RESPONSE: &str = "OCTRA_RESPONSE";
    pub const EVENT: &str = "OCTRA_EVENT";
}

/// Relay/UI ↔ authority runtime message tags
pub mod runtime {
    pub const DAPP_REQUEST: &str = "DAPP_REQUEST";
    pub const SYNC_SESSION: &str = "SYNC_SESSION";
    pub const GET_PENDING_APPROVALS: &str = "GET_PENDING_APPROVALS";
    pub const RESOLVE_APPROVAL: &str = "RESOLVE_APPROVAL";
    pub const APPROVAL_CLOSED: &str = "APPROVAL_CLOSED";
    pub const LOCK_WALLET: &str = "LOCK_WALLET";
    pub const GET_FEE_ESTIMATE: &str = "GET_FEE_ESTIMATE";
    pub const RESET_EVERYTHING: &str = "RESET_EVERYTHING";
}

/// dApp-facing method names
pub mod methods {
    pub const CONNECT: &str = "connect";
    pub const DISCONNECT: &str = "disconnect";
    pub const GET_ACCOUNTS: &str = "getAccounts";
    pub const GET_PUBLIC_KEY: &str = "getPublicKey";
    pub const GET_BALANCE: &str = "getBalance";
    pub const GET_CHAIN_ID: &str = "getChainId";
    pub const SIGN_MESSAGE: &str = "signMessage";
    pub const SIGN_TRANSACTION: &str = "signTransaction";
    pub const SEND_TRANSACTION: &str = "sendTransaction";

    pub const RPC_REQUEST_ACCOUNTS: &str = "octra_requestAccounts";
    pub const RPC_ACCOUNTS: &str = "octra_accounts";
    pub const RPC_CHAIN_ID: &str = "octra_chainId";
    pub const RPC_SIGN_MESSAGE: &str = "octra_signMessage";
    pub const RPC_SEND_TRANSACTION: &str = "octra_sendTransaction";
}

/// Provider events
pub mod events {
    pub const CONNECT: &str = "connect";
    pub const DISCONNECT: &str = "disconnect";
    pub const ACCOUNTS_CHANGED: &str = "accountsChanged";
    pub const NETWORK_CHANGED: &str = "networkChanged";
}
