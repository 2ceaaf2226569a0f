//! Command dispatch against the document store

use crate::common::{ClientId, Storage};
use crate::node::state::{ClientHandle, NodeState, Outbox};
use crate::protocol::{
    Command, Dialect, ParseError, Request, Response, LEGACY_COORDINATOR, LEGACY_NO_COORDINATOR,
};

/// What the connection does after a line was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

struct Outcome {
    reply: Option<Response>,
    notice: Option<Response>,
    flow: Flow,
}

impl Outcome {
    fn reply(response: Response) -> Self {
        Self {
            reply: Some(response),
            notice: None,
            flow: Flow::Continue,
        }
    }

    fn with_notice(mut self, notice: Response) -> Self {
        self.notice = Some(notice);
        self
    }
}

/// One backend node: coordination state plus its document store
pub struct Node {
    state: NodeState,
    storage: Storage,
}

impl Node {
    pub fn new(storage: Storage) -> Self {
        Self {
            state: NodeState::new(),
            storage,
        }
    }

    pub fn state(&self) -> &NodeState {
        &self.state
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Register a connection that presented `id` and run an election
    pub fn connect(&self, id: ClientId, outbox: Outbox) -> ClientHandle {
        let handle = self.state.register(id, outbox);
        tracing::info!(client_id = id, session = handle.session, "client connected");
        handle
    }

    /// Connection closed: drop its registry entry
    pub fn disconnect(&self, handle: &ClientHandle) {
        if self.state.unregister(handle) {
            tracing::info!(client_id = handle.id, "client cleaned up");
        } else {
            tracing::debug!(client_id = handle.id, "client entry already gone");
        }
    }

    /// Parse and execute one inbound line, replying on the caller's channel
    pub fn handle_line(&self, client: &ClientHandle, line: &str) -> Flow {
        let request = match Request::parse(line) {
            Ok(request) => request,
            Err(ParseError::Empty) => return Flow::Continue,
            Err(e) => {
                tracing::debug!(client_id = client.id, line, error = %e, "rejected command");
                return deliver(client, &Response::Error(e.to_string()), Flow::Continue);
            }
        };

        let clock = self.state.tick();
        tracing::info!(
            client_id = client.id,
            clock,
            command = request.command.verb(),
            "client command"
        );

        let outcome = self.execute(client, &request, clock);
        let flow = match &outcome.reply {
            Some(reply) => deliver(client, reply, outcome.flow),
            None => outcome.flow,
        };
        if let Some(notice) = &outcome.notice {
            self.state.broadcast_except(client, notice);
        }
        flow
    }

    fn execute(&self, client: &ClientHandle, request: &Request, clock: u64) -> Outcome {
        let legacy = request.dialect == Dialect::Legacy;
        match &request.command {
            Command::Upload { name, content } => {
                match self.storage.put(name, content.clone()) {
                    Ok(()) => {
                        tracing::info!(name, size = content.len(), "file uploaded");
                        let reply = if legacy {
                            Response::Ok(format!("Upload of '{}' replicated | clock={}", name, clock))
                        } else {
                            Response::Ok(format!("File uploaded: {}", name))
                        };
                        Outcome::reply(reply).with_notice(Response::FileAdded(name.clone()))
                    }
                    Err(e) => store_failure("upload", e),
                }
            }
            Command::List => match self.storage.list() {
                Ok(names) => Outcome::reply(Response::Files(names)),
                Err(e) => store_failure("list", e),
            },
            Command::Download { name } => match self.storage.get(name) {
                Ok(Some(content)) if legacy => Outcome::reply(Response::LegacyFile(
                    String::from_utf8_lossy(&content).into_owned(),
                )),
                Ok(Some(content)) => Outcome::reply(Response::File {
                    name: name.clone(),
                    content,
                }),
                Ok(None) if legacy => {
                    Outcome::reply(Response::LegacyFile("File not found.".to_string()))
                }
                Ok(None) => not_found(name),
                Err(e) => store_failure("download", e),
            },
            Command::View { name } => match self.storage.get(name) {
                Ok(Some(content)) => {
                    let text = String::from_utf8_lossy(&content);
                    if legacy {
                        Outcome::reply(Response::View(format!("--- {} ---\n{}", name, text)))
                    } else {
                        Outcome::reply(Response::Content(text.into_owned()))
                    }
                }
                Ok(None) if legacy => Outcome::reply(Response::View("File not found.".to_string())),
                Ok(None) => not_found(name),
                Err(e) => store_failure("view", e),
            },
            Command::Delete { name } => match self.storage.delete(name) {
                Ok(true) => {
                    tracing::info!(name, "file deleted");
                    let reply = if legacy {
                        Response::Deleted(format!("File '{}' deleted.", name))
                    } else {
                        Response::Ok(format!("File deleted: {}", name))
                    };
                    Outcome::reply(reply).with_notice(Response::FileDeleted(name.clone()))
                }
                Ok(false) if legacy => {
                    Outcome::reply(Response::Deleted(format!("File '{}' not found.", name)))
                }
                Ok(false) => not_found(name),
                Err(e) => store_failure("delete", e),
            },
            Command::Election => {
                self.state.run_election();
                // the election broadcast is the answer while we are registered
                if self.state.is_registered(client) {
                    Outcome {
                        reply: None,
                        notice: None,
                        flow: Flow::Continue,
                    }
                } else {
                    Outcome::reply(self.coordinator_reply(false))
                }
            }
            Command::Coordinator => Outcome::reply(self.coordinator_reply(legacy)),
            Command::Exit => Outcome {
                reply: Some(Response::Bye),
                notice: None,
                flow: Flow::Close,
            },
            Command::TestConnection => {
                Outcome::reply(Response::Ok("Connection test successful".to_string()))
            }
        }
    }

    fn coordinator_reply(&self, legacy: bool) -> Response {
        let message = match (self.state.coordinator(), legacy) {
            (Some(id), true) => format!("{}{}", LEGACY_COORDINATOR, id),
            (Some(id), false) => id.to_string(),
            (None, true) => LEGACY_NO_COORDINATOR.to_string(),
            (None, false) => "none".to_string(),
        };
        Response::Coordinator(message)
    }
}

fn deliver(client: &ClientHandle, response: &Response, flow: Flow) -> Flow {
    if client.send(response) {
        flow
    } else {
        Flow::Close
    }
}

fn not_found(name: &str) -> Outcome {
    Outcome::reply(Response::Error(format!("File not found: {}", name)))
}

fn store_failure(op: &str, e: crate::Error) -> Outcome {
    tracing::warn!(op, error = %e, "store operation failed");
    Outcome::reply(Response::Error(e.to_string()))
}
