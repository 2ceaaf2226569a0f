//! Node TCP server

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};

use crate::common::Result;
use crate::node::dispatch::Node;
use crate::node::session::handle_connection;

pub struct NodeServer {
    listener: TcpListener,
    node: Arc<Node>,
}

impl NodeServer {
    pub async fn bind(addr: impl tokio::net::ToSocketAddrs, node: Node) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            node: Arc::new(node),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn node(&self) -> Arc<Node> {
        Arc::clone(&self.node)
    }

    /// Accept connections until ctrl-c
    pub async fn serve(self) -> Result<()> {
        self.serve_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "failed to install ctrl-c handler");
            }
        })
        .await
    }

    /// Accept connections until `shutdown` resolves. Open sessions keep running.
    pub async fn serve_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let NodeServer { listener, node } = self;
        tracing::info!(addr = ?listener.local_addr().ok(), "node listening");
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("node shutting down");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => spawn_session(&node, stream, peer),
                    Err(e) => tracing::warn!(error = %e, "failed to accept connection"),
                },
            }
        }
        Ok(())
    }
}

fn spawn_session(node: &Arc<Node>, stream: TcpStream, peer: SocketAddr) {
    let node = Arc::clone(node);
    tokio::spawn(async move {
        if let Err(e) = handle_connection(node, stream).await {
            tracing::warn!(%peer, error = %e, "session ended with error");
        }
    });
}
