//! Connection state machine: the single authoritative sync status.
//!
//! ```text
//!   idle ──start/join──▶ connecting ──room-created──▶ hosting ──transport up──▶ connected
//!                             │                          │                          │
//!                             └──room-joined──▶ connected│◀─────────────────────────┘
//!                                                        └──────── send ok ───▶ shared
//!   any active state ──failure──▶ error          any state ──reset──▶ idle
//! ```
//!
//! There are no automatic retries: `error` and `shared` only leave through
//! [`SessionState::reset`].

use crate::error::SyncError;
use crate::payload::SyncPayload;
use crate::protocol::PeerRef;
use serde::Serialize;
use std::fmt;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Idle,
    Hosting,
    Connecting,
    Connected,
    Shared,
    Error,
}

impl SyncStatus {
    /// Everything except `idle` and `shared`. Only active sessions can fail.
    pub fn is_active(self) -> bool {
        !matches!(self, Self::Idle | Self::Shared)
    }

    /// Whether the state machine allows moving from `self` to `to`.
    ///
    /// Transitions into `error` and `idle` are governed by
    /// [`SessionState::fail`] and [`SessionState::reset`] instead.
    pub fn can_transition(self, to: SyncStatus) -> bool {
        use SyncStatus::*;
        matches!(
            (self, to),
            (Idle, Connecting)
                | (Connecting, Hosting)
                | (Connecting, Connected)
                | (Hosting, Connected)
                | (Hosting, Shared)
                | (Connected, Shared)
        )
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Hosting => "hosting",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Shared => "shared",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Which side of the transfer this session plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Creates the room and sends its data
    Host,
    /// Joins a room and receives data
    Client,
}

/// State of the signaling channel, tracked apart from the sync status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("Illegal status transition: {from} -> {to}")]
    Illegal { from: SyncStatus, to: SyncStatus },
}

/// Everything one sync session knows: status, role, room, peers, last error,
/// and a received payload waiting to be applied.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    status: SyncStatus,
    role: Option<Role>,
    room_id: Option<String>,
    peers: Vec<PeerRef>,
    error: Option<SyncError>,
    received: Option<SyncPayload>,
    link: LinkState,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            status: SyncStatus::Idle,
            role: None,
            room_id: None,
            peers: Vec::new(),
            error: None,
            received: None,
            link: LinkState::Disconnected,
        }
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> SyncStatus {
        self.status
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    pub fn room_id(&self) -> Option<&str> {
        self.room_id.as_deref()
    }

    pub fn peers(&self) -> &[PeerRef] {
        &self.peers
    }

    pub fn error(&self) -> Option<&SyncError> {
        self.error.as_ref()
    }

    /// The message shown to the user while in `error`.
    pub fn error_message(&self) -> Option<&str> {
        self.error.as_ref().map(SyncError::message)
    }

    pub fn received(&self) -> Option<&SyncPayload> {
        self.received.as_ref()
    }

    pub fn link(&self) -> LinkState {
        self.link
    }

    fn advance(&mut self, to: SyncStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition(to) {
            warn!("Rejected status transition {} -> {}", self.status, to);
            return Err(TransitionError::Illegal {
                from: self.status,
                to,
            });
        }
        debug!("Status {} -> {}", self.status, to);
        self.status = to;
        Ok(())
    }

    /// `idle → connecting` for a new host or client session.
    pub fn begin(&mut self, role: Role, room_id: impl Into<String>) -> Result<(), TransitionError> {
        self.advance(SyncStatus::Connecting)?;
        self.role = Some(role);
        self.room_id = Some(room_id.into());
        self.error = None;
        Ok(())
    }

    /// `connecting → hosting` once the server confirms the room.
    pub fn room_created(&mut self, room_id: impl Into<String>) -> Result<(), TransitionError> {
        self.advance(SyncStatus::Hosting)?;
        self.room_id = Some(room_id.into());
        Ok(())
    }

    /// `connecting → connected` once the server confirms the join.
    pub fn room_joined(&mut self) -> Result<(), TransitionError> {
        self.advance(SyncStatus::Connected)
    }

    /// The direct transport reported connected. Moves a host from `hosting`
    /// to `connected`; a no-op when already connected.
    pub fn transport_connected(&mut self) -> Result<(), TransitionError> {
        if self.status == SyncStatus::Connected {
            return Ok(());
        }
        self.advance(SyncStatus::Connected)
    }

    /// `hosting|connected → shared` after the payload was sent.
    pub fn shared(&mut self) -> Result<(), TransitionError> {
        self.advance(SyncStatus::Shared)
    }

    /// Client side: a complete payload arrived. The session returns to `idle`
    /// with the role cleared and the payload held until taken.
    pub fn payload_received(&mut self, payload: SyncPayload) -> Result<(), TransitionError> {
        if !matches!(self.status, SyncStatus::Connecting | SyncStatus::Connected) {
            warn!("Ignoring payload received while {}", self.status);
            return Err(TransitionError::Illegal {
                from: self.status,
                to: SyncStatus::Idle,
            });
        }
        debug!("Status {} -> idle (payload received)", self.status);
        self.status = SyncStatus::Idle;
        self.role = None;
        self.received = Some(payload);
        Ok(())
    }

    /// Record a failure. Active sessions move to `error` and keep the newest
    /// message; failures while `idle` or `shared` are dropped.
    ///
    /// Returns whether the state changed.
    pub fn fail(&mut self, err: SyncError) -> bool {
        if !self.status.is_active() {
            debug!("Ignoring failure while {}: {}", self.status, err);
            return false;
        }
        warn!("Sync session failed while {}: {}", self.status, err);
        self.status = SyncStatus::Error;
        self.error = Some(err);
        true
    }

    /// Back to `idle` with room, peers, error, role, and pending payload cleared.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Take the pending payload, leaving none behind.
    pub fn take_received(&mut self) -> Option<SyncPayload> {
        self.received.take()
    }

    pub fn set_link(&mut self, link: LinkState) {
        self.link = link;
    }

    /// Replace the peer list (`peers-list`).
    pub fn set_peers(&mut self, peers: Vec<PeerRef>) {
        self.peers.clear();
        for peer in peers {
            self.peer_joined(peer);
        }
    }

    /// Add a peer (`peer-joined`). Returns false if it was already listed.
    pub fn peer_joined(&mut self, peer: PeerRef) -> bool {
        if self.peers.contains(&peer) {
            return false;
        }
        self.peers.push(peer);
        true
    }

    /// Remove a peer by id (`peer-left`). Returns false if it was not listed.
    pub fn peer_left(&mut self, peer_id: &str) -> bool {
        let before = self.peers.len();
        self.peers.retain(|p| p.id != peer_id);
        self.peers.len() != before
    }
}
