//! Process-lifetime state: the zenoh session and the shutdown signal.

use std::sync::Arc;
use tokio::sync::watch;

use crate::error::{NodeError, Result};
use crate::transport::ZenohTransport;

const DEFAULT_ENDPOINT: &str = "tcp/127.0.0.1:7447";

/// Runtime shared by everything in the process.
///
/// Created once in `main` and closed explicitly after the node has terminated.
pub struct ProcessRuntime {
    transport: Arc<ZenohTransport>,
    shutdown_tx: watch::Sender<()>,
}

impl ProcessRuntime {
    /// Install the Ctrl+C handler and connect to the zenoh router.
    ///
    /// `ZENOH_ENDPOINT` overrides `endpoint`; without either the local router
    /// is used.
    pub async fn init(endpoint: Option<&str>) -> Result<Self> {
        let shutdown_tx = watch::Sender::new(());
        let signal_tx = shutdown_tx.clone();
        ctrlc::set_handler(move || {
            log::info!("Shutdown signal received");
            signal_tx.send_replace(());
        })
        .map_err(|e| NodeError::Io(std::io::Error::other(e)))?;

        let endpoint = Self::resolve_endpoint(std::env::var("ZENOH_ENDPOINT").ok(), endpoint);
        let session = Self::connect(&endpoint).await?;

        Ok(Self {
            transport: Arc::new(ZenohTransport::new(session)),
            shutdown_tx,
        })
    }

    fn resolve_endpoint(from_env: Option<String>, from_args: Option<&str>) -> String {
        from_env
            .or_else(|| from_args.map(str::to_string))
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string())
    }

    /// Client-mode session with scouting disabled, so only `endpoint` is used
    async fn connect(endpoint: &str) -> Result<Arc<zenoh::Session>> {
        log::info!("Connecting to Zenoh at: {}", endpoint);

        let endpoints = format!(r#"["{}"]"#, endpoint);
        let mut config = zenoh::Config::default();
        for (key, value) in [
            ("mode", r#""client""#),
            ("connect/endpoints", endpoints.as_str()),
            ("scouting/multicast/enabled", "false"),
            ("scouting/gossip/enabled", "false"),
        ] {
            config
                .insert_json5(key, value)
                .map_err(|e| NodeError::Zenoh(format!("Invalid session option '{}': {}", key, e)))?;
        }

        let session = zenoh::open(config)
            .await
            .map_err(|e| NodeError::Zenoh(format!("Failed to open Zenoh session: {}", e)))?;

        log::info!("Connected to Zenoh");
        Ok(Arc::new(session))
    }

    pub fn transport(&self) -> Arc<ZenohTransport> {
        self.transport.clone()
    }

    /// Receiver that changes once the process is asked to stop
    pub fn shutdown_receiver(&self) -> watch::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Close the zenoh session
    pub async fn close(self) -> Result<()> {
        self.transport.session().close().await?;
        log::info!("Zenoh session closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_resolution_order() {
        assert_eq!(
            ProcessRuntime::resolve_endpoint(
                Some("tcp/10.0.0.1:7447".to_string()),
                Some("tcp/10.0.0.2:7447")
            ),
            "tcp/10.0.0.1:7447"
        );
        assert_eq!(
            ProcessRuntime::resolve_endpoint(None, Some("tcp/10.0.0.2:7447")),
            "tcp/10.0.0.2:7447"
        );
        assert_eq!(ProcessRuntime::resolve_endpoint(None, None), DEFAULT_ENDPOINT);
    }
}
