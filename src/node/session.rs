//! Per-connection session on a node
//!
//! A connection first presents its client id on a line of its own, then
//! sends commands one per line. Replies and notices from other sessions are
//! queued on the connection's outbox and written by a dedicated writer task.

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::common::{ClientId, Error, Result};
use crate::node::dispatch::{Flow, Node};
use crate::protocol::Response;

/// Serve one accepted TCP connection until it closes
pub async fn handle_connection(node: Arc<Node>, stream: TcpStream) -> Result<()> {
    let peer = stream.peer_addr().ok();
    let (reader, writer) = stream.into_split();
    tracing::debug!(?peer, "connection accepted");
    serve_connection(node, BufReader::new(reader), writer).await
}

/// Drive the id handshake and command loop over any line transport
pub async fn serve_connection<R, W>(node: Arc<Node>, mut reader: R, mut writer: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let id = match read_client_id(&mut reader).await? {
        IdLine::Valid(id) => id,
        IdLine::Invalid(line) => {
            tracing::warn!(line, "rejecting connection with invalid client id");
            let reply = Response::Error(Error::InvalidClientId(line).to_string());
            writer.write_all(format!("{}\n", reply).as_bytes()).await?;
            writer.flush().await?;
            return Ok(());
        }
        IdLine::Closed => {
            tracing::debug!("connection closed before presenting an id");
            return Ok(());
        }
    };

    let (outbox, rx) = mpsc::unbounded_channel();
    let writer_task = tokio::spawn(write_lines(rx, writer));
    let handle = node.connect(id, outbox);

    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                tracing::debug!(client_id = id, "client closed connection");
                break;
            }
            Ok(_) => {
                let command = line.trim_end_matches(['\r', '\n']);
                if node.handle_line(&handle, command) == Flow::Close {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(client_id = id, error = %e, "read failed");
                break;
            }
        }
    }

    node.disconnect(&handle);
    // the writer exits once every sender is gone, after flushing what is queued
    drop(handle);
    if let Err(e) = writer_task.await {
        tracing::warn!(client_id = id, error = %e, "writer task failed");
    }
    Ok(())
}

enum IdLine {
    Valid(ClientId),
    Invalid(String),
    Closed,
}

async fn read_client_id<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<IdLine> {
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(IdLine::Closed);
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        return Ok(match trimmed.parse::<ClientId>() {
            Ok(id) if id > 0 => IdLine::Valid(id),
            _ => IdLine::Invalid(trimmed.to_string()),
        });
    }
}

async fn write_lines<W>(mut rx: mpsc::UnboundedReceiver<String>, mut writer: W)
where
    W: AsyncWrite + Unpin,
{
    while let Some(mut line) = rx.recv().await {
        line.push('\n');
        if let Err(e) = writer.write_all(line.as_bytes()).await {
            tracing::debug!(error = %e, "write failed, dropping outbound lines");
            return;
        }
        if let Err(e) = writer.flush().await {
            tracing::debug!(error = %e, "flush failed");
            return;
        }
    }
    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Storage;
    use tokio::io::{duplex, AsyncReadExt};

    async fn run(node: Arc<Node>, input: &str) -> String {
        let (client, server) = duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server);
        let session = tokio::spawn(serve_connection(node, BufReader::new(server_read), server_write));

        let (mut client_read, mut client_write) = tokio::io::split(client);
        client_write.write_all(input.as_bytes()).await.unwrap();
        client_write.shutdown().await.unwrap();

        let mut output = String::new();
        client_read.read_to_string(&mut output).await.unwrap();
        session.await.unwrap().unwrap();
        output
    }

    #[tokio::test]
    async fn test_session_round_trip() {
        let node = Arc::new(Node::new(Storage::new_memory()));
        let output = run(
            node.clone(),
            "\n5\nLIST\nUPLOAD hello.txt aGk=\r\nDOWNLOAD hello.txt\nEXIT\nLIST\n",
        )
        .await;
        assert_eq!(
            output,
            "COORDINATOR 5\n\
             FILES No files available\n\
             OK File uploaded: hello.txt\n\
             FILE hello.txt aGk=\n\
             BYE Goodbye!\n"
        );
        assert!(node.state().client_ids().is_empty());
        assert_eq!(node.state().coordinator(), None);
    }

    #[tokio::test]
    async fn test_invalid_client_id_closes() {
        let node = Arc::new(Node::new(Storage::new_memory()));
        let output = run(node.clone(), "abc\nLIST\n").await;
        assert_eq!(output, "ERROR Invalid client id: abc\n");
        assert!(node.state().client_ids().is_empty());

        let output = run(node, "0\n").await;
        assert_eq!(output, "ERROR Invalid client id: 0\n");
    }

    #[tokio::test]
    async fn test_eof_before_id() {
        let node = Arc::new(Node::new(Storage::new_memory()));
        assert_eq!(run(node, "").await, "");
    }
}
