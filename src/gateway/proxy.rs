//! Raw TCP path: full-duplex proxy between a client and one backend node

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{self, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::common::{Error, Result};
use crate::gateway::registry::NodeRegistry;

/// Open a connection to `addr`, bounded by `limit`
pub async fn connect_backend(addr: &str, limit: Duration) -> Result<TcpStream> {
    match timeout(limit, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(Error::ConnectionFailed(format!("{}: {}", addr, e))),
        Err(_) => Err(Error::Timeout(format!("connecting to {}", addr))),
    }
}

/// Route one raw client to the least-connected backend and copy bytes both
/// ways until the backend side closes. The backend's count is held for the
/// whole session.
pub async fn proxy_connection(
    registry: Arc<NodeRegistry>,
    client: TcpStream,
    connect_timeout: Duration,
) -> Result<()> {
    let client_id = registry.assign_client_id();
    let lease = registry.acquire_backend()?;
    tracing::info!(client_id, backend = lease.addr(), "routing raw client");

    let mut backend = connect_backend(lease.addr(), connect_timeout).await?;
    backend
        .write_all(format!("{}\n", client_id).as_bytes())
        .await?;

    let (mut client_read, mut client_write) = client.into_split();
    let (mut backend_read, mut backend_write) = backend.into_split();

    let upstream = tokio::spawn(async move {
        let copied = io::copy(&mut client_read, &mut backend_write).await;
        // client is done sending; let the node see EOF and finish up
        let _ = backend_write.shutdown().await;
        copied
    });
    let downstream = tokio::spawn(async move {
        let copied = io::copy(&mut backend_read, &mut client_write).await;
        let _ = client_write.shutdown().await;
        copied
    });

    let result = downstream.await;
    upstream.abort();

    match result {
        Ok(Ok(bytes)) => {
            tracing::info!(client_id, backend = lease.addr(), bytes, "raw client finished");
            Ok(())
        }
        Ok(Err(e)) => {
            tracing::debug!(client_id, error = %e, "raw proxy ended with I/O error");
            Err(e.into())
        }
        Err(e) => Err(Error::Other(format!("proxy task failed: {}", e))),
    }
}
