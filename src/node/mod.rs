//! Backend node: document store, client registry and coordinator election
//!
//! Each node listens on its own port and serves the line protocol. Clients
//! (usually the gateway) present an id first; the highest registered id is
//! the node's coordinator.

pub mod dispatch;
pub mod server;
pub mod session;
pub mod state;

pub use dispatch::{Flow, Node};
pub use server::NodeServer;
pub use state::{ClientHandle, NodeState, Outbox};
