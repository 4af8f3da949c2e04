//! Error taxonomy shared by the sync subsystem.
//!
//! Network and protocol failures never terminate the process: they are folded
//! into a single observable status plus message (see [`crate::status`]).

use thiserror::Error;

/// Failures surfaced by signaling, the direct peer transport, or payload handling.
///
/// Each variant carries the human-readable message shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// Timeout, refusal, or unexpected close of the signaling channel.
    #[error("Signaling connection error: {0}")]
    SignalingConnection(String),

    /// The signaling server sent an `error` message.
    #[error("Signaling server error: {0}")]
    SignalingProtocol(String),

    /// Negotiation or direct transport failure.
    #[error("Peer connection error: {0}")]
    PeerConnection(String),

    /// Data channel could not open or send.
    #[error("Data channel error: {0}")]
    DataChannel(String),

    /// Text received from a peer or a file is not valid JSON.
    #[error("Payload parse error: {0}")]
    PayloadParse(String),

    /// JSON is well-formed but is not a usable sync payload.
    #[error("Merge input error: {0}")]
    MergeInput(String),
}

impl SyncError {
    /// The bare message, without the category prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::SignalingConnection(m)
            | Self::SignalingProtocol(m)
            | Self::PeerConnection(m)
            | Self::DataChannel(m)
            | Self::PayloadParse(m)
            | Self::MergeInput(m) => m,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
