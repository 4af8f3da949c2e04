//! sync-client library: native networking, persistence, and the sync session.
//!
//! The `prio-sync` binary is a thin CLI over these modules; integration tests
//! drive them directly.

pub mod backup;
pub mod config;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod store;

// Re-export key types for convenience
pub use config::{SessionConfig, DEFAULT_ICE_SERVERS, DEFAULT_SERVER_URL};
pub use peer::{PeerEvent, PeerLink, TransportState, DATA_CHANNEL_LABEL};
pub use session::{SessionError, SyncSession};
pub use signaling::{SignalingClient, SignalingEvent, NORMAL_CLOSURE};
pub use store::JsonFileStore;
