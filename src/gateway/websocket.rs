//! WebSocket path for browser clients
//!
//! After the upgrade handshake every text frame carries one command. Each
//! command is forwarded over its own short-lived backend connection and the
//! single response line is translated for the browser before it is framed.

use std::sync::Arc;

use bytes::{Buf, BytesMut};
use serde::Serialize;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::common::{Error, GatewayConfig, Result};
use crate::gateway::proxy::connect_backend;
use crate::gateway::registry::NodeRegistry;
use crate::protocol::{
    compute_accept_key, encode_frame, encode_text_frame, frame_text, is_reply_to, Command, Frame,
    FrameDecoder, FrameError, Opcode, ParseError, Request, Response, NO_FILES,
};

const MAX_HEADERS: usize = 100;

pub const BAD_REQUEST: &str =
    "HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";

/// The parts of an upgrade request the gateway cares about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeRequest {
    pub request_line: String,
    pub key: String,
}

/// Read request headers up to the blank line. Header names are matched
/// case-insensitively.
pub async fn read_upgrade_request<R>(reader: &mut R) -> Result<UpgradeRequest>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Err(Error::ConnectionClosed);
    }
    let request_line = line.trim_end().to_string();

    let mut upgrade = false;
    let mut key = None;
    for _ in 0..MAX_HEADERS {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Err(Error::Handshake("connection closed inside headers".into()));
        }
        let header = line.trim_end();
        if header.is_empty() {
            return match (upgrade, key) {
                (false, _) => Err(Error::Handshake("missing Upgrade: websocket header".into())),
                (true, None) => Err(Error::Handshake("missing Sec-WebSocket-Key header".into())),
                (true, Some(key)) => Ok(UpgradeRequest { request_line, key }),
            };
        }
        let Some((name, value)) = header.split_once(':') else {
            continue;
        };
        let (name, value) = (name.trim(), value.trim());
        if name.eq_ignore_ascii_case("upgrade") && value.eq_ignore_ascii_case("websocket") {
            upgrade = true;
        } else if name.eq_ignore_ascii_case("sec-websocket-key") && !value.is_empty() {
            key = Some(value.to_string());
        }
    }
    Err(Error::Handshake("too many headers".into()))
}

/// `101 Switching Protocols` answer for a client key
pub fn upgrade_response(key: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\r\n",
        compute_accept_key(key)
    )
}

/// Buffered frame reader over a byte stream
pub struct FrameReader<R> {
    inner: R,
    buf: BytesMut,
    decoder: FrameDecoder,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R, max_payload: usize) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(4096),
            decoder: FrameDecoder::new(max_payload),
        }
    }

    /// Next complete frame, or `None` on a clean EOF between frames
    pub async fn next_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            match self.decoder.decode(&self.buf) {
                Ok((frame, consumed)) => {
                    self.buf.advance(consumed);
                    return Ok(Some(frame));
                }
                Err(FrameError::Incomplete { .. }) => {}
                Err(e) => return Err(e.into()),
            }

            if self.inner.read_buf(&mut self.buf).await? == 0 {
                return if self.buf.is_empty() {
                    Ok(None)
                } else {
                    Err(Error::ConnectionClosed)
                };
            }
        }
    }
}

/// Serve one browser connection until it closes
pub async fn handle_websocket(
    registry: Arc<NodeRegistry>,
    config: Arc<GatewayConfig>,
    stream: TcpStream,
) -> Result<()> {
    let peer = stream.peer_addr().ok();
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    let request = match read_upgrade_request(&mut reader).await {
        Ok(request) => request,
        Err(Error::ConnectionClosed) => return Ok(()),
        Err(e) => {
            tracing::warn!(?peer, error = %e, "websocket handshake failed");
            writer.write_all(BAD_REQUEST.as_bytes()).await?;
            let _ = writer.shutdown().await;
            return Err(e);
        }
    };
    writer
        .write_all(upgrade_response(&request.key).as_bytes())
        .await?;

    let client_id = registry.assign_client_id();
    tracing::info!(client_id, ?peer, request = %request.request_line, "browser client connected");
    send_text(&mut writer, &Response::AssignId(client_id).to_string()).await?;

    let mut frames = FrameReader::new(reader, config.max_frame_bytes);
    let result = browser_loop(&registry, &config, &mut frames, &mut writer, client_id).await;
    tracing::info!(client_id, "browser client disconnected");
    result
}

async fn browser_loop<R, W>(
    registry: &NodeRegistry,
    config: &GatewayConfig,
    frames: &mut FrameReader<R>,
    writer: &mut W,
    client_id: u64,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = frames.next_frame().await? {
        match frame.opcode {
            Opcode::Text => {}
            Opcode::Close => {
                let _ = writer.write_all(&encode_frame(Opcode::Close, &[], None)).await;
                break;
            }
            other => {
                tracing::debug!(client_id, opcode = ?other, "ignoring frame");
                continue;
            }
        }

        let message = frame_text(frame)?;
        tracing::debug!(client_id, message, "browser command");
        let reply = match Request::parse(&message) {
            Err(ParseError::Empty) => continue,
            Err(e) => Response::Error(e.to_string()).to_string(),
            Ok(request) => match &request.command {
                Command::TestConnection => {
                    Response::Ok("Connection test successful".into()).to_string()
                }
                Command::Exit => {
                    send_text(writer, &Response::Bye.to_string()).await?;
                    let _ = writer.write_all(&encode_frame(Opcode::Close, &[], None)).await;
                    break;
                }
                _ => forward_command(registry, config, &request).await,
            },
        };
        send_text(writer, &reply).await?;
    }
    Ok(())
}

async fn send_text<W: AsyncWrite + Unpin>(writer: &mut W, message: &str) -> Result<()> {
    writer.write_all(&encode_text_frame(message)).await?;
    writer.flush().await?;
    Ok(())
}

/// Forward one command and return the browser-facing response line.
/// Backend failures become an `ERROR` line; nothing here closes the browser connection.
pub async fn forward_command(
    registry: &NodeRegistry,
    config: &GatewayConfig,
    request: &Request,
) -> String {
    match forward_exchange(registry, config, request).await {
        Ok(Some(line)) => translate_response(&request.command, &line),
        Ok(None) => Response::Error("No response from server".into()).to_string(),
        Err(e) => {
            tracing::warn!(error = %e, "backend communication failed");
            Response::Error(format!("Server communication failed: {}", e)).to_string()
        }
    }
}

async fn forward_exchange(
    registry: &NodeRegistry,
    config: &GatewayConfig,
    request: &Request,
) -> Result<Option<String>> {
    let addr = registry.select_backend()?;
    let stream = connect_backend(&addr, config.connect_timeout()).await?;
    tracing::debug!(backend = %addr, command = request.command.verb(), "forwarding command");
    match timeout(
        config.forward_timeout(),
        exchange_line(stream, config.forward_client_id, request),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(format!("waiting for {}", addr))),
    }
}

async fn exchange_line(
    stream: TcpStream,
    sentinel: u64,
    request: &Request,
) -> Result<Option<String>> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    writer.write_all(format!("{}\n", sentinel).as_bytes()).await?;
    // the node announces its coordinator as soon as we register
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Ok(None);
    }

    writer
        .write_all(format!("{}\n", request.to_line()).as_bytes())
        .await?;

    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        let response = line.trim_end_matches(['\r', '\n']);
        if is_reply_to(request, response) {
            return Ok(Some(response.to_string()));
        }
    }
}

#[derive(Serialize)]
struct FileEntry<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    content_type: &'static str,
}

#[derive(Serialize)]
struct FileList<'a> {
    files: Vec<FileEntry<'a>>,
}

fn content_type(name: &str) -> &'static str {
    let ext = name.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase());
    match ext.as_deref() {
        Some("pdf") => "application/pdf",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        _ => "text/plain",
    }
}

/// JSON document for a `FILES` payload
pub fn file_list_json(csv: &str) -> String {
    let files = if csv.trim() == NO_FILES {
        Vec::new()
    } else {
        csv.split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(|name| FileEntry {
                name,
                content_type: content_type(name),
            })
            .collect()
    };
    serde_json::to_string(&FileList { files }).unwrap_or_else(|_| r#"{"files":[]}"#.to_string())
}

/// Rewrite a node response line into the form browser clients expect
pub fn translate_response(command: &Command, line: &str) -> String {
    match command {
        Command::View { .. } => match line.strip_prefix("CONTENT ") {
            Some(content) => format!("VIEW {}", content),
            None => line.to_string(),
        },
        Command::Delete { .. } => match line.strip_prefix("OK ") {
            Some(message) => format!("DEL {}", message),
            None => line.to_string(),
        },
        Command::List => match line.strip_prefix("FILES ") {
            Some(csv) => format!("FILES {}", file_list_json(csv)),
            None => line.to_string(),
        },
        _ => line.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_read_upgrade_request() {
        let mut reader = BufReader::new(
            Builder::new()
                .read(b"GET /chat HTTP/1.1\r\nHost: localhost\r\n")
                .read(b"upgrade: WebSocket\r\nconnection: Upgrade\r\n")
                .read(b"SEC-WEBSOCKET-KEY: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n")
                .build(),
        );
        let request = read_upgrade_request(&mut reader).await.unwrap();
        assert_eq!(request.request_line, "GET /chat HTTP/1.1");
        assert_eq!(request.key, "dGhlIHNhbXBsZSBub25jZQ==");
        assert!(upgrade_response(&request.key)
            .contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
    }

    #[tokio::test]
    async fn test_upgrade_requires_headers() {
        let mut reader = BufReader::new(
            Builder::new()
                .read(b"GET / HTTP/1.1\r\nSec-WebSocket-Key: abc\r\n\r\n")
                .build(),
        );
        assert!(matches!(
            read_upgrade_request(&mut reader).await,
            Err(Error::Handshake(_))
        ));

        let mut reader = BufReader::new(
            Builder::new()
                .read(b"GET / HTTP/1.1\r\nUpgrade: websocket\r\n\r\n")
                .build(),
        );
        assert!(matches!(
            read_upgrade_request(&mut reader).await,
            Err(Error::Handshake(_))
        ));
    }

    #[tokio::test]
    async fn test_frame_reader_reassembles_split_frames() {
        let first = encode_frame(Opcode::Text, b"LIST", Some([1, 2, 3, 4]));
        let second = encode_frame(Opcode::Text, b"VIEW a.txt", Some([9, 8, 7, 6]));
        let mut wire = first.clone();
        wire.extend_from_slice(&second);

        let mock = Builder::new()
            .read(&wire[..3])
            .read(&wire[3..first.len() + 2])
            .read(&wire[first.len() + 2..])
            .build();
        let mut frames = FrameReader::new(mock, 1024);

        let frame = frames.next_frame().await.unwrap().unwrap();
        assert_eq!(frame_text(frame).unwrap(), "LIST");
        let frame = frames.next_frame().await.unwrap().unwrap();
        assert_eq!(frame_text(frame).unwrap(), "VIEW a.txt");
        assert!(frames.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_frame_reader_eof_mid_frame() {
        let wire = encode_frame(Opcode::Text, b"LIST", Some([1, 2, 3, 4]));
        let mock = Builder::new().read(&wire[..wire.len() - 1]).build();
        let mut frames = FrameReader::new(mock, 1024);
        assert!(matches!(
            frames.next_frame().await,
            Err(Error::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_frame_reader_rejects_oversized() {
        let wire = encode_frame(Opcode::Text, &[b'a'; 200], Some([1, 2, 3, 4]));
        let mock = Builder::new().read(&wire[..10]).build();
        let mut frames = FrameReader::new(mock, 100);
        assert!(matches!(
            frames.next_frame().await,
            Err(Error::Frame(FrameError::PayloadTooLarge { len: 200, .. }))
        ));
    }

    #[test]
    fn test_translate_view_and_delete() {
        let view = Command::View { name: "a".into() };
        assert_eq!(translate_response(&view, "CONTENT hi\\nthere"), "VIEW hi\\nthere");
        assert_eq!(
            translate_response(&view, "ERROR File not found: a"),
            "ERROR File not found: a"
        );

        let delete = Command::Delete { name: "a".into() };
        assert_eq!(translate_response(&delete, "OK File deleted: a"), "DEL File deleted: a");

        let download = Command::Download { name: "a".into() };
        assert_eq!(translate_response(&download, "FILE a aGk="), "FILE a aGk=");
    }

    #[test]
    fn test_file_list_json() {
        assert_eq!(file_list_json(NO_FILES), r#"{"files":[]}"#);
        assert_eq!(
            translate_response(&Command::List, "FILES doc.pdf,img.JPG,notes"),
            r#"FILES {"files":[{"name":"doc.pdf","type":"application/pdf"},{"name":"img.JPG","type":"image/jpeg"},{"name":"notes","type":"text/plain"}]}"#
        );
    }
}
