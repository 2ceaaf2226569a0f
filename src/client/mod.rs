//! Line-protocol client
//!
//! Talks to the gateway's raw listener, or to a node directly after
//! presenting an id. Used by the `filemesh` binary and the integration tests.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::time::timeout;

use crate::common::{ClientId, Error, Result};
use crate::protocol::{is_reply_to, unescape_line, Command, Request, NO_FILES};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct RawClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    timeout: Duration,
    /// Set once the node's first line (its registration answer) has been read
    registered: bool,
}

impl RawClient {
    /// Connect to a gateway raw listener. The gateway assigns the id.
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| Error::ConnectionFailed(e.to_string()))?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(reader),
            writer,
            timeout: DEFAULT_TIMEOUT,
            registered: false,
        })
    }

    /// Connect straight to a node, presenting `id` as the first line
    pub async fn connect_node(addr: impl ToSocketAddrs, id: ClientId) -> Result<Self> {
        let mut client = Self::connect(addr).await?;
        client.send_line(&id.to_string()).await?;
        Ok(client)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn send_line(&mut self, line: &str) -> Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Next line from the peer, without its terminator; `None` at EOF
    pub async fn read_line(&mut self) -> Result<Option<String>> {
        let mut line = String::new();
        let read = timeout(self.timeout, self.reader.read_line(&mut line))
            .await
            .map_err(|_| Error::Timeout("waiting for a response line".into()))??;
        if read == 0 {
            return Ok(None);
        }
        self.registered = true;
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }

    /// Wait for the node to accept our id. Its first line announces the
    /// coordinator, or rejects the id.
    async fn await_registration(&mut self) -> Result<()> {
        if self.registered {
            return Ok(());
        }
        let line = self.read_line().await?.ok_or(Error::ConnectionClosed)?;
        expect_prefix(&line, "COORDINATOR ").map(|_| ())
    }

    /// Send a request and return its answer, skipping notices and
    /// coordinator announcements in between
    pub async fn request(&mut self, request: &Request) -> Result<String> {
        self.await_registration().await?;
        self.send_line(&request.to_line()).await?;
        loop {
            let line = self.read_line().await?.ok_or(Error::ConnectionClosed)?;
            if is_reply_to(request, &line) {
                return Ok(line);
            }
            tracing::debug!(line, "skipping unsolicited line");
        }
    }

    async fn command(&mut self, command: Command) -> Result<String> {
        self.request(&Request::canonical(command)).await
    }

    pub async fn upload(&mut self, name: &str, content: &[u8]) -> Result<String> {
        let line = self
            .command(Command::Upload {
                name: name.to_string(),
                content: content.to_vec(),
            })
            .await?;
        expect_prefix(&line, "OK ").map(str::to_string)
    }

    pub async fn download(&mut self, name: &str) -> Result<Vec<u8>> {
        let line = self
            .command(Command::Download {
                name: name.to_string(),
            })
            .await?;
        let rest = expect_prefix(&line, "FILE ")?;
        let encoded = match rest.split_once(' ') {
            Some((returned, encoded)) if returned == name => encoded,
            _ => return Err(Error::UnexpectedResponse(line.clone())),
        };
        STANDARD
            .decode(encoded)
            .map_err(|e| Error::UnexpectedResponse(format!("invalid base64 content: {}", e)))
    }

    pub async fn view(&mut self, name: &str) -> Result<String> {
        let line = self
            .command(Command::View {
                name: name.to_string(),
            })
            .await?;
        expect_prefix(&line, "CONTENT ").map(unescape_line)
    }

    pub async fn delete(&mut self, name: &str) -> Result<String> {
        let line = self
            .command(Command::Delete {
                name: name.to_string(),
            })
            .await?;
        expect_prefix(&line, "OK ").map(str::to_string)
    }

    pub async fn list(&mut self) -> Result<Vec<String>> {
        let line = self.command(Command::List).await?;
        let names = expect_prefix(&line, "FILES ")?;
        if names == NO_FILES {
            return Ok(Vec::new());
        }
        Ok(names.split(',').map(str::to_string).collect())
    }

    pub async fn coordinator(&mut self) -> Result<String> {
        let line = self.command(Command::Coordinator).await?;
        expect_prefix(&line, "COORDINATOR ").map(str::to_string)
    }

    pub async fn election(&mut self) -> Result<String> {
        let line = self.command(Command::Election).await?;
        expect_prefix(&line, "COORDINATOR ").map(str::to_string)
    }

    /// Say goodbye and wait for the peer to acknowledge
    pub async fn exit(mut self) -> Result<()> {
        let line = self.command(Command::Exit).await?;
        expect_prefix(&line, "BYE").map(|_| ())
    }
}

fn expect_prefix<'a>(line: &'a str, prefix: &str) -> Result<&'a str> {
    if let Some(rest) = line.strip_prefix(prefix) {
        return Ok(rest);
    }
    match line.strip_prefix("ERROR ") {
        Some(message) => Err(Error::Remote(message.to_string())),
        None => Err(Error::UnexpectedResponse(line.to_string())),
    }
}
