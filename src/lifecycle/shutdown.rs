//! Shutdown coordination for the frontend.
//!
//! One trigger stops everything: the mux is closed, which closes every
//! sub-listener, and each protocol server is told to finish its connections.

use std::sync::Arc;

use tokio::sync::watch;

use crate::lifecycle::signals::wait_for_signal;
use crate::mux::MuxHandle;

/// Closes the mux and notifies the protocol servers. Clones share the same state.
#[derive(Debug, Clone)]
pub struct Shutdown {
    mux: MuxHandle,
    triggered: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    pub fn new(mux: MuxHandle) -> Self {
        let (triggered, _) = watch::channel(false);
        Self {
            mux,
            triggered: Arc::new(triggered),
        }
    }

    /// Receiver for one protocol server.
    pub fn subscribe(&self) -> ShutdownReceiver {
        ShutdownReceiver {
            rx: self.triggered.subscribe(),
        }
    }

    /// Close the mux and notify every subscriber. Later calls only log at debug.
    pub fn trigger(&self, reason: &str) {
        if self.triggered.send_replace(true) {
            tracing::debug!(reason, "Shutdown already in progress");
            return;
        }
        tracing::info!(reason, "Shutting down");
        self.mux.close();
    }

    pub fn is_triggered(&self) -> bool {
        *self.triggered.borrow()
    }

    /// Trigger on the first SIGINT or SIGTERM.
    pub async fn trigger_on_signal(self) {
        let signal = wait_for_signal().await;
        self.trigger(&signal.to_string());
    }
}

/// Shutdown notification held by a protocol server.
///
/// Resolves even when subscribed after the trigger.
#[derive(Debug, Clone)]
pub struct ShutdownReceiver {
    rx: watch::Receiver<bool>,
}

impl ShutdownReceiver {
    /// Wait until shutdown is triggered or the coordinator is gone.
    pub async fn recv(&mut self) {
        let _ = self.rx.wait_for(|triggered| *triggered).await;
    }

    /// Owned form of [`ShutdownReceiver::recv`], for APIs that take a shutdown future.
    pub async fn wait(mut self) {
        self.recv().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MuxConfig;
    use crate::mux::Mux;
    use std::time::Duration;
    use tokio::net::TcpListener;

    async fn mux() -> Mux<TcpListener> {
        let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
        Mux::new(tcp, &MuxConfig::default())
    }

    #[tokio::test]
    async fn trigger_closes_mux_and_wakes_servers() {
        let mut mux = mux().await;
        let sub = mux.listener("http");
        let shutdown = Shutdown::new(mux.handle());
        let mut server = shutdown.subscribe();
        let serving = tokio::spawn(mux.serve());

        shutdown.trigger("test");
        assert!(shutdown.is_triggered());
        tokio::time::timeout(Duration::from_secs(1), server.recv())
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(1), serving)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(sub.is_closed());
    }

    #[tokio::test]
    async fn late_subscriber_sees_earlier_trigger() {
        let mux = mux().await;
        let shutdown = Shutdown::new(mux.handle());
        shutdown.clone().trigger("first");
        shutdown.trigger("second");

        let mut late = shutdown.subscribe();
        tokio::time::timeout(Duration::from_millis(100), late.recv())
            .await
            .unwrap();
        assert!(mux.handle().is_closed());
    }

    #[tokio::test]
    async fn receiver_waits_until_triggered() {
        let mux = mux().await;
        let shutdown = Shutdown::new(mux.handle());
        let mut server = shutdown.subscribe();
        let pending = tokio::time::timeout(Duration::from_millis(50), server.recv()).await;
        assert!(pending.is_err());
        assert!(!mux.handle().is_closed());
    }
}
