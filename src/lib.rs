//! # filemesh
//!
//! A small distributed file-serving cluster:
//! - a gateway accepting raw line-protocol clients and browser clients over WebSocket
//! - least-connections routing to a static set of backend nodes
//! - per-node client registry, coordinator election and logical clock
//! - a filename to content document store on every node
//!
//! ## Architecture

#![allow(clippy::result_large_err)]
//!
//! ```text
//!   browser (WebSocket)        raw client (TCP lines)
//!          │ :12345                    │ :12346
//!   ┌──────▼───────────────────────────▼──────┐
//!   │                 Gateway                 │
//!   │  node registry + client-id counter      │
//!   └──────┬──────────────┬──────────────┬────┘
//!          │              │              │
//!   ┌──────▼─────┐ ┌──────▼─────┐ ┌──────▼─────┐
//!   │ Node :2001 │ │ Node :2002 │ │ Node :2003 │
//!   │ registry   │ │ registry   │ │ registry   │
//!   │ coordinator│ │ coordinator│ │ coordinator│
//!   │ store      │ │ store      │ │ store      │
//!   └────────────┘ └────────────┘ └────────────┘
//! ```
//!
//! ## Usage
//!
//! ### Start the nodes
//! ```bash
//! filemesh-node 2001 --seed-samples
//! filemesh-node 2002
//! filemesh-node 2003 --store sled --data-dir ./node-data
//! ```
//!
//! ### Start the gateway
//! ```bash
//! filemesh-gateway --backend 127.0.0.1:2001 --backend 127.0.0.1:2002
//! ```
//!
//! ### Use the CLI
//! ```bash
//! filemesh upload ./notes.txt
//! filemesh list
//! filemesh view notes.txt
//! filemesh download notes.txt --output ./copy.txt
//! filemesh delete notes.txt
//! filemesh shell
//! ```

pub mod client;
pub mod common;
pub mod gateway;
pub mod node;
pub mod protocol;

// Re-export commonly used types
pub use client::RawClient;
pub use common::{ClientId, Config, Error, Result};
pub use gateway::Gateway;
pub use node::{Node, NodeServer};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
