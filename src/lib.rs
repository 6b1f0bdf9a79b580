//! Octra broker: dApp request broker and secure signing pipeline.
//!
//! # Architecture
//!
//! ```text
//! dApp
//!   │  Provider (correlation ids, timeouts, events)
//!   │      │ OCTRA_REQUEST / OCTRA_RESPONSE / OCTRA_EVENT   (Window)
//!   │  Relay (provenance: origin, title, favicon)
//!   │      │ DAPP_REQUEST → {result} | {error:{code,message}}   (RuntimePort)
//!   └─ Authority
//!        ├── ConnectionStore   (durable area)
//!        ├── SessionCache      (session area + in-memory SessionKey)
//!        ├── ApprovalBroker    (pending approvals, 5 min sweep)
//!        ├── format::osm1 / format::otx1
//!        └── RpcClient         (balance/nonce, broadcast)
//! ```
//!
//! Page, relay and authority are separate tasks that only exchange messages.
//!
//! # Error codes
//!
//! | Code | Meaning |
//! |------|---------|
//! | 4001 | user rejected |
//! | 4100 | not connected / locked |
//! | 4200 | unsupported method |
//! | 4900 | timeout |
//! | 5000 | internal, signing, broadcast |
//!
//! # Features
//!
//! - `native` - HTTP runtime channel, RPC over HTTP, CLI, platform data dir
//!
//! # Usage
//!
//! ```ignore
//! use octra_broker::{Authority, BrokerConfig, LoggingSurface, MemoryStorage, Provenance, Relay, Window};
//!
//! let authority = Authority::resume(config.clone(), local, session, rpc, Arc::new(LoggingSurface));
//! let port = authority.spawn_port();
//!
//! let window = Window::new();
//! let relay = Relay::attach(window, Provenance::new("https://d.app", "D", None)?, port, authority.subscribe());
//! let provider = relay.inject_provider(&config);
//! relay.spawn(&shutdown);
//!
//! let accounts = provider.connect(json!({})).await?.accounts;
//! ```

// =============================================================================
// Shared modules
// =============================================================================
pub mod approval;
pub mod authority;
pub mod config;
pub mod core;
pub mod crypto;
pub mod error;
pub mod format;
pub mod protocol;
pub mod provider;
pub mod relay;
pub mod rpc;
pub mod runtime;
pub mod session;
pub mod store;

// =============================================================================
// Native-only modules (server, CLI, logging subscriber)
// =============================================================================
#[cfg(feature = "native")]
pub mod logging;
#[cfg(feature = "native")]
pub mod server;

// =============================================================================
// Re-exports
// =============================================================================
pub use approval::{ApprovalBroker, ApprovalKind, ApprovalSummary, ApprovalSurface, LoggingSurface, PendingApproval};
pub use authority::{Authority, AuthorityEvent, RuntimePort};
pub use config::BrokerConfig;
pub use crypto::{SessionKey, WalletKey};
pub use error::{BrokerError, BrokerResult, WireError};
pub use format::{SignedMessage, SignedTransaction, Transaction, TransactionRequest};
pub use protocol::{ConnectResult, Decision, PageMessage, RuntimeMessage, RuntimeReply, Window};
pub use provider::{Provider, ProviderState};
pub use relay::{Provenance, Relay};
pub use rpc::{AccountState, RpcClient};
pub use runtime::Shutdown;
pub use session::{begin_session, Session, SessionCache};
pub use store::{Connection, ConnectionStore, FileStorage, MemoryStorage, StorageArea};

#[cfg(feature = "native")]
pub use rpc::HttpRpcClient;
#[cfg(feature = "native")]
pub use runtime::install_signal_handlers;
#[cfg(feature = "native")]
pub use server::{create_router, create_router_with_name};
