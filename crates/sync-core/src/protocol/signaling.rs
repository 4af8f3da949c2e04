//! Signaling messages exchanged with the rendezvous server.
//!
//! Both directions are closed enums keyed by `type`, so every message kind
//! has to be handled explicitly. Server kinds this client does not know
//! decode to [`ServerMessage::Unknown`] instead of failing.

use serde::{Deserialize, Serialize};

/// Session description kind, as carried in the `type` field of an SDP blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

/// An SDP offer or answer in its browser JSON form: `{"type":"offer","sdp":"v=0..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// A network candidate discovered by one side of the negotiation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

/// Another participant in the room, as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerRef {
    pub id: String,
}

impl PeerRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// Messages this client sends to the signaling server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    CreateRoom {
        room_id: String,
    },
    JoinRoom {
        room_id: String,
    },
    Offer {
        offer: SessionDescription,
        room_id: String,
        to: String,
    },
    Answer {
        answer: SessionDescription,
        room_id: String,
        to: String,
    },
    IceCandidate {
        candidate: IceCandidate,
        room_id: String,
    },
    LeaveRoom,
    Ping,
}

impl ClientMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CreateRoom { .. } => "create-room",
            Self::JoinRoom { .. } => "join-room",
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::IceCandidate { .. } => "ice-candidate",
            Self::LeaveRoom => "leave-room",
            Self::Ping => "ping",
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("ClientMessage serialization should not fail")
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Messages the signaling server sends to this client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    Connected,
    RoomCreated {
        room_id: String,
    },
    RoomJoined {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room_id: Option<String>,
    },
    PeersList {
        #[serde(default)]
        peers: Vec<PeerRef>,
    },
    PeerJoined {
        peer: PeerRef,
    },
    PeerLeft {
        peer_id: String,
    },
    Offer {
        offer: SessionDescription,
        from: String,
    },
    Answer {
        answer: SessionDescription,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<String>,
    },
    IceCandidate {
        candidate: IceCandidate,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<String>,
    },
    Error {
        message: String,
    },
    Pong,
    /// Any kind this client does not understand.
    #[serde(other)]
    Unknown,
}

impl ServerMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::RoomCreated { .. } => "room-created",
            Self::RoomJoined { .. } => "room-joined",
            Self::PeersList { .. } => "peers-list",
            Self::PeerJoined { .. } => "peer-joined",
            Self::PeerLeft { .. } => "peer-left",
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::IceCandidate { .. } => "ice-candidate",
            Self::Error { .. } => "error",
            Self::Pong => "pong",
            Self::Unknown => "unknown",
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("ServerMessage serialization should not fail")
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
