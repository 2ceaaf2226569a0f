//! Configuration for filemesh components

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::common::{ClientId, Error, Result};

/// Global configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Gateway-specific config
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Node-specific config
    #[serde(default)]
    pub node: NodeConfig,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from an optional TOML file, then `FILEMESH__*`
    /// environment variables (e.g. `FILEMESH__GATEWAY__WS_BIND`).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        builder = match path {
            Some(path) => builder.add_source(config::File::from(path).required(true)),
            None => builder.add_source(config::File::with_name("filemesh").required(false)),
        };
        let config: Config = builder
            .add_source(
                config::Environment::with_prefix("FILEMESH")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("gateway.backends")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.gateway.validate()?;
        Ok(config)
    }
}

/// Gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Listener for browser (WebSocket) clients
    #[serde(default = "default_ws_bind")]
    pub ws_bind: SocketAddr,

    /// Listener for raw TCP clients
    #[serde(default = "default_raw_bind")]
    pub raw_bind: SocketAddr,

    /// Backend nodes, in registration order
    #[serde(default = "default_backends")]
    pub backends: Vec<String>,

    /// Client id presented on short-lived forwarding connections
    #[serde(default = "default_forward_client_id")]
    pub forward_client_id: ClientId,

    /// Largest WebSocket payload accepted from a browser
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,

    /// Backend connect timeout
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Bound on one forwarded command's round trip
    #[serde(default = "default_forward_timeout")]
    pub forward_timeout_ms: u64,
}

fn default_ws_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 12345))
}
fn default_raw_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 12346))
}
fn default_backends() -> Vec<String> {
    vec![
        "127.0.0.1:2001".to_string(),
        "127.0.0.1:2002".to_string(),
        "127.0.0.1:2003".to_string(),
    ]
}
fn default_forward_client_id() -> ClientId {
    999
}
fn default_max_frame_bytes() -> usize {
    1024 * 1024
}
fn default_connect_timeout() -> u64 {
    5_000
}
fn default_forward_timeout() -> u64 {
    10_000
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            ws_bind: default_ws_bind(),
            raw_bind: default_raw_bind(),
            backends: default_backends(),
            forward_client_id: default_forward_client_id(),
            max_frame_bytes: default_max_frame_bytes(),
            connect_timeout_ms: default_connect_timeout(),
            forward_timeout_ms: default_forward_timeout(),
        }
    }
}

impl GatewayConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn forward_timeout(&self) -> Duration {
        Duration::from_millis(self.forward_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.backends.is_empty() {
            return Err(Error::NoBackends);
        }
        if self.forward_client_id == 0 {
            return Err(Error::InvalidConfig(
                "forward_client_id must be positive".into(),
            ));
        }
        if self.max_frame_bytes == 0 {
            return Err(Error::InvalidConfig("max_frame_bytes must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Sled,
}

impl std::str::FromStr for StoreBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "sled" => Ok(StoreBackend::Sled),
            other => Err(Error::InvalidConfig(format!("unknown store backend: {}", other))),
        }
    }
}

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Interface the node listens on; the port comes from the command line
    #[serde(default = "default_node_host")]
    pub host: String,

    #[serde(default = "default_store")]
    pub store: StoreBackend,

    /// Root directory for the sled backend; each node uses `<data_dir>/node-<port>`
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Preload the sample documents at startup
    #[serde(default)]
    pub seed_samples: bool,
}

fn default_node_host() -> String {
    "127.0.0.1".to_string()
}
fn default_store() -> StoreBackend {
    StoreBackend::Memory
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("./node-data")
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            host: default_node_host(),
            store: default_store(),
            data_dir: default_data_dir(),
            seed_samples: false,
        }
    }
}

impl NodeConfig {
    pub fn store_path(&self, port: u16) -> PathBuf {
        self.data_dir.join(format!("node-{}", port))
    }
}
