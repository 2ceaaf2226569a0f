//! Gateway: routes raw and browser clients to backend nodes
//!
//! - [`registry`]: least-connections node registry and client-id counter
//! - [`proxy`]: raw TCP clients, proxied byte-for-byte to one node
//! - [`websocket`]: browser clients, one short-lived node connection per command

pub mod proxy;
pub mod registry;
pub mod server;
pub mod websocket;

pub use registry::{BackendLease, NodeRegistry};
pub use server::Gateway;
pub use websocket::{translate_response, FrameReader};
