//! Isolated relay between a page's window and the authority.
//!
//! The relay owns no state beyond its provenance. It forwards `OCTRA_REQUEST`
//! as `DAPP_REQUEST` with origin/title/favicon attached, posts the reply back
//! as `OCTRA_RESPONSE`, and passes authority events through as `OCTRA_EVENT`
//! without looking at them.

use regex::Regex;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

use crate::authority::{AuthorityEvent, RuntimePort};
use crate::config::BrokerConfig;
use crate::error::{BrokerError, BrokerResult};
use crate::protocol::{DappRequest, PageMessage, RuntimeMessage, Window, WindowMessage};
use crate::provider::Provider;
use crate::runtime::Shutdown;

const ORIGIN_PATTERN: &str = r"^[a-z][a-z0-9+.\-]*://[A-Za-z0-9.\-]+(:[0-9]{1,5})?$";

/// Who the page is, as the relay (not the page) reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    pub origin: String,
    pub title: String,
    pub favicon: Option<String>,
}

impl Provenance {
    pub fn new(origin: impl Into<String>, title: impl Into<String>, favicon: Option<String>) -> BrokerResult<Self> {
        let origin = origin.into();
        let pattern = Regex::new(ORIGIN_PATTERN).map_err(|e| BrokerError::Internal(e.to_string()))?;
        if !pattern.is_match(&origin) {
            return Err(BrokerError::InvalidParams(format!("invalid origin: {origin}")));
        }
        Ok(Self { origin, title: title.into(), favicon })
    }
}

pub struct Relay {
    window: Window,
    provenance: Provenance,
    port: RuntimePort,
    inbound: broadcast::Receiver<WindowMessage>,
    events: broadcast::Receiver<AuthorityEvent>,
}

impl Relay {
    /// Start listening on `window` immediately; messages posted before [`Relay::spawn`] are kept.
    pub fn attach(
        window: Window,
        provenance: Provenance,
        port: RuntimePort,
        events: broadcast::Receiver<AuthorityEvent>,
    ) -> Self {
        let inbound = window.listen();
        Self { window, provenance, port, inbound, events }
    }

    pub fn provenance(&self) -> &Provenance { &self.provenance }

    /// The page-visible provider, living in the same window as this relay.
    pub fn inject_provider(&self, config: &BrokerConfig) -> Provider {
        Provider::install(self.window.clone(), config.request_timeout)
    }

    pub fn spawn(mut self, shutdown: &Shutdown) -> JoinHandle<()> {
        let mut listener = shutdown.subscribe();
        tokio::spawn(async move {
            tracing::debug!(origin = %self.provenance.origin, "relay attached");
            loop {
                tokio::select! {
                    inbound = self.inbound.recv() => match inbound {
                        Ok(message) => self.on_window_message(message),
                        Err(RecvError::Lagged(skipped)) => tracing::warn!(skipped, "relay lagged on window"),
                        Err(RecvError::Closed) => break,
                    },
                    event = self.events.recv() => match event {
                        Ok(event) if event.is_for(&self.provenance.origin) => self.forward_event(event),
                        Ok(_) => {}
                        Err(RecvError::Lagged(skipped)) => tracing::warn!(skipped, "relay lagged on events"),
                        Err(RecvError::Closed) => break,
                    },
                    _ = listener.wait() => break,
                }
            }
            tracing::debug!(origin = %self.provenance.origin, "relay detached");
        })
    }

    fn on_window_message(&self, message: WindowMessage) {
        if message.source != self.window.id() {
            tracing::debug!(source = message.source.0, "dropping message from another frame");
            return;
        }
        // Pages post all sorts of things; only our requests matter here.
        let Ok(PageMessage::Request { id, method, params }) = PageMessage::decode(&message.data) else {
            return;
        };
        tracing::debug!(id, %method, origin = %self.provenance.origin, "forwarding request");

        let request = DappRequest {
            id,
            method,
            params,
            origin: self.provenance.origin.clone(),
            title: self.provenance.title.clone(),
            favicon: self.provenance.favicon.clone(),
        };
        let port = self.port.clone();
        let window = self.window.clone();
        tokio::spawn(async move {
            let reply = port.send(RuntimeMessage::DappRequest(request)).await;
            window.post(PageMessage::response(id, reply.into_outcome()).encode());
        });
    }

    fn forward_event(&self, event: AuthorityEvent) {
        tracing::debug!(event = %event.event, origin = %self.provenance.origin, "forwarding event");
        self.window.post(PageMessage::Event { event: event.event, data: event.data }.encode());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_validation() {
        assert!(Provenance::new("https://d.app", "D", None).is_ok());
        assert!(Provenance::new("http://localhost:3000", "Local", None).is_ok());
        assert!(Provenance::new("https://d.app/path", "D", None).is_err());
        assert!(Provenance::new("d.app", "D", None).is_err());
        assert!(Provenance::new("", "D", None).is_err());
    }
}
