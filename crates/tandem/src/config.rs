//! Server and client configuration.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Port used when none is given.
pub const DEFAULT_PORT: u16 = 7070;

// ---------------------------------------------------------------------------
// ServerConfig
// ---------------------------------------------------------------------------

/// Configuration for a server instance.
///
/// TCP and UDP are both bound to `bind_addr`; clients find the UDP socket
/// on the same port as the TCP listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on.
    pub bind_addr: SocketAddr,

    /// Registered participants allowed at once. Further clients are
    /// kicked with `ServerFull`.
    pub max_participants: usize,

    /// How often the accept worker checks for a pending discovery.
    pub discovery_poll_interval: Duration,

    /// How long an accepted stream may wait for its discovery datagram
    /// before it is dropped. `None` waits forever.
    pub discovery_timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            max_participants: 8,
            discovery_poll_interval: Duration::from_millis(10),
            discovery_timeout: Some(Duration::from_secs(5)),
        }
    }
}

// ---------------------------------------------------------------------------
// ClientConfig
// ---------------------------------------------------------------------------

/// Configuration for a client connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// `host:port` of the server.
    pub server_addr: String,

    /// Name to register under. Checked locally before anything is sent.
    pub display_name: String,

    /// Upper bound on the whole handshake. `None` waits as long as the
    /// server takes.
    pub handshake_timeout: Option<Duration>,
}

impl ClientConfig {
    pub fn new(server_addr: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            server_addr: server_addr.into(),
            display_name: display_name.into(),
            ..Self::default()
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: format!("127.0.0.1:{DEFAULT_PORT}"),
            display_name: String::new(),
            handshake_timeout: None,
        }
    }
}
