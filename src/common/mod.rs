//! Common utilities and types shared across filemesh

pub mod config;
pub mod error;
pub mod storage;

pub use config::{Config, GatewayConfig, NodeConfig, StoreBackend};
pub use error::{Error, Result};
pub use storage::{DocumentStore, MemStore, Storage};

/// Identifies one logical client connection. Assigned by the gateway.
pub type ClientId = u64;
