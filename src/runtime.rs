//! Runtime - shutdown fan-out for the authority's background tasks

use std::sync::Arc;
use tokio::sync::watch;

/// Shutdown signal shared by the approval sweeper, the relay loops and the HTTP host.
///
/// Backed by a watch channel so a task subscribing after the trigger still
/// observes it.
#[derive(Clone)]
pub struct Shutdown {
    sender: Arc<watch::Sender<bool>>,
}

impl Default for Shutdown {
    fn default() -> Self { Self::new() }
}

impl Shutdown {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self { sender: Arc::new(sender) }
    }

    pub fn subscribe(&self) -> ShutdownListener {
        ShutdownListener { rx: self.sender.subscribe() }
    }

    /// Idempotent.
    pub fn trigger(&self) {
        self.sender.send_if_modified(|triggered| {
            if *triggered { return false; }
            *triggered = true;
            true
        });
    }

    pub fn is_triggered(&self) -> bool {
        *self.sender.borrow()
    }
}

pub struct ShutdownListener {
    rx: watch::Receiver<bool>,
}

impl ShutdownListener {
    /// Resolves once shutdown has been triggered (immediately if it already was).
    pub async fn wait(&mut self) {
        let _ = self.rx.wait_for(|triggered| *triggered).await;
    }
}

/// Install signal handlers and return shutdown handle
#[cfg(feature = "native")]
pub fn install_signal_handlers() -> Shutdown {
    let shutdown = Shutdown::new();
    let handle = shutdown.clone();

    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(mut sigterm), Ok(mut sigint)) => {
                    tokio::select! {
                        _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
                        _ = sigint.recv() => tracing::info!("Received SIGINT"),
                    }
                }
                _ => {
                    tracing::warn!("signal handlers unavailable, waiting for Ctrl+C");
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Received Ctrl+C");
        }

        handle.trigger();
    });

    shutdown
}
