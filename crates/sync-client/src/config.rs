//! Session configuration.

use std::time::Duration;

/// Rendezvous server used when none is configured.
pub const DEFAULT_SERVER_URL: &str = "wss://api.prio.space";

/// Public STUN servers. No TURN relay: peers must reach each other directly.
pub const DEFAULT_ICE_SERVERS: &[&str] = &[
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
];

/// Configuration for a [`crate::SyncSession`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// WebSocket URL of the signaling server
    pub server_url: String,
    /// Give up opening the signaling channel after this long
    pub connect_timeout: Duration,
    /// Keepalive ping period while the signaling channel is open
    pub ping_interval: Duration,
    /// How long the host keeps connections up after sending
    pub share_teardown_delay: Duration,
    /// STUN server URLs handed to the peer connection
    pub ice_servers: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            connect_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(30),
            share_teardown_delay: Duration::from_millis(1500),
            ice_servers: DEFAULT_ICE_SERVERS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl SessionConfig {
    pub fn with_server_url(url: impl Into<String>) -> Self {
        Self {
            server_url: url.into(),
            ..Self::default()
        }
    }
}
