//! Wire protocol for the signaling relay.
//!
//! Messages are JSON text frames with a `type` discriminator. The relay only
//! forwards negotiation metadata; sync payloads never pass through it.

pub mod signaling;

pub use signaling::{ClientMessage, IceCandidate, PeerRef, SdpKind, ServerMessage, SessionDescription};
