//! Broker configuration - passed from the hosting layer

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_RPC_URL: &str = "https://octra.network";
pub const DEFAULT_NETWORK_ID: &str = "octra-mainnet";
pub const DEFAULT_CHAIN_ID: &str = "octra";

/// Unresolved approvals are purged after this long.
pub const APPROVAL_TTL: Duration = Duration::from_secs(5 * 60);
/// Provider calls without a response are failed after this long.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub app: String,
    pub data_dir: Option<PathBuf>,
    pub rpc_url: String,
    pub network_id: String,
    pub chain_id: String,
    pub approval_ttl: Duration,
    pub sweep_interval: Duration,
    pub request_timeout: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            app: "octra".into(),
            data_dir: None,
            rpc_url: DEFAULT_RPC_URL.into(),
            network_id: DEFAULT_NETWORK_ID.into(),
            chain_id: DEFAULT_CHAIN_ID.into(),
            approval_ttl: APPROVAL_TTL,
            sweep_interval: SWEEP_INTERVAL,
            request_timeout: REQUEST_TIMEOUT,
        }
    }
}

impl BrokerConfig {
    pub fn new(app: impl Into<String>) -> Self {
        Self { app: app.into(), ..Default::default() }
    }

    /// `OCTRA_ROOT`, `OCTRA_RPC_URL` and `OCTRA_NETWORK` override the defaults.
    pub fn from_env(app: impl Into<String>) -> Self {
        let mut config = Self::new(app);
        if let Ok(root) = std::env::var("OCTRA_ROOT") { config.data_dir = Some(PathBuf::from(root)); }
        if let Ok(url) = std::env::var("OCTRA_RPC_URL") { config.rpc_url = url; }
        if let Ok(network) = std::env::var("OCTRA_NETWORK") { config.network_id = network; }
        config
    }

    pub fn with_data_dir(mut self, path: impl Into<PathBuf>) -> Self { self.data_dir = Some(path.into()); self }
    pub fn with_rpc_url(mut self, url: impl Into<String>) -> Self { self.rpc_url = url.into(); self }
    pub fn with_network(mut self, network_id: impl Into<String>, chain_id: impl Into<String>) -> Self {
        self.network_id = network_id.into();
        self.chain_id = chain_id.into();
        self
    }
    pub fn with_approval_ttl(mut self, ttl: Duration) -> Self { self.approval_ttl = ttl; self }
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self { self.sweep_interval = interval; self }
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self { self.request_timeout = timeout; self }

    /// Durable storage file for the connection store.
    pub fn storage_path(&self) -> PathBuf {
        self.root_dir().join(&self.app).join("data").join("local.json")
    }

    fn root_dir(&self) -> PathBuf {
        if let Some(dir) = &self.data_dir {
            return dir.clone();
        }
        #[cfg(feature = "native")]
        {
            dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."))
        }
        #[cfg(not(feature = "native"))]
        {
            PathBuf::from(".")
        }
    }
}
