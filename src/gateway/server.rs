//! Gateway listeners

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;

use crate::common::{Error, GatewayConfig, Result};
use crate::gateway::proxy::proxy_connection;
use crate::gateway::registry::NodeRegistry;
use crate::gateway::websocket::handle_websocket;

/// Front-line server: a WebSocket listener for browsers and a raw TCP
/// listener for line-protocol clients, sharing one node registry
pub struct Gateway {
    ws_listener: TcpListener,
    raw_listener: TcpListener,
    registry: Arc<NodeRegistry>,
    config: Arc<GatewayConfig>,
}

impl Gateway {
    pub async fn bind(config: GatewayConfig) -> Result<Self> {
        config.validate()?;
        let ws_listener = TcpListener::bind(config.ws_bind).await?;
        let raw_listener = TcpListener::bind(config.raw_bind).await?;
        let registry = Arc::new(NodeRegistry::new(config.backends.iter().cloned()));
        Ok(Self {
            ws_listener,
            raw_listener,
            registry,
            config: Arc::new(config),
        })
    }

    pub fn ws_addr(&self) -> Result<SocketAddr> {
        Ok(self.ws_listener.local_addr()?)
    }

    pub fn raw_addr(&self) -> Result<SocketAddr> {
        Ok(self.raw_listener.local_addr()?)
    }

    pub fn registry(&self) -> Arc<NodeRegistry> {
        Arc::clone(&self.registry)
    }

    pub async fn serve(self) -> Result<()> {
        self.serve_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "failed to install ctrl-c handler");
            }
        })
        .await
    }

    /// Accept on both listeners until `shutdown` resolves
    pub async fn serve_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Gateway {
            ws_listener,
            raw_listener,
            registry,
            config,
        } = self;
        tracing::info!(
            ws = ?ws_listener.local_addr().ok(),
            raw = ?raw_listener.local_addr().ok(),
            backends = ?config.backends,
            "gateway listening"
        );
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("gateway shutting down");
                    break;
                }
                accepted = ws_listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let registry = Arc::clone(&registry);
                        let config = Arc::clone(&config);
                        tokio::spawn(async move {
                            if let Err(e) = handle_websocket(registry, config, stream).await {
                                log_session_error(peer, "websocket", &e);
                            }
                        });
                    }
                    Err(e) => tracing::warn!(error = %e, "failed to accept websocket connection"),
                },
                accepted = raw_listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let registry = Arc::clone(&registry);
                        let connect_timeout = config.connect_timeout();
                        tokio::spawn(async move {
                            if let Err(e) = proxy_connection(registry, stream, connect_timeout).await {
                                log_session_error(peer, "raw", &e);
                            }
                        });
                    }
                    Err(e) => tracing::warn!(error = %e, "failed to accept raw connection"),
                },
            }
        }
        Ok(())
    }
}

/// A dropped client is routine; anything else points at the gateway or a backend
fn log_session_error(peer: SocketAddr, kind: &str, e: &Error) {
    if e.is_transport() {
        tracing::debug!(%peer, kind, error = %e, "client connection ended");
    } else {
        tracing::warn!(%peer, kind, error = %e, "client connection failed");
    }
}
