//! Direct peer transport over WebRTC.
//!
//! A [`PeerLink`] owns one `RTCPeerConnection` for one negotiation exchange.
//! The host opens a reliable, ordered data channel and sends the serialized
//! payload once it opens; the client waits for that channel and keeps only the
//! first complete message. Everything the connection reports (local
//! candidates, transport state, channel activity) is forwarded as a
//! [`PeerEvent`] so the session handles it on its own task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use sync_core::{IceCandidate, SdpKind, SessionDescription, SyncError, SyncPayload};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

/// Label of the one data channel a sync uses.
pub const DATA_CHANNEL_LABEL: &str = "todoData";

/// Transport state, reduced to what the session reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl From<RTCPeerConnectionState> for TransportState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::Connected => Self::Connected,
            RTCPeerConnectionState::Disconnected => Self::Disconnected,
            RTCPeerConnectionState::Failed => Self::Failed,
            RTCPeerConnectionState::Closed => Self::Closed,
            _ => Self::Connecting,
        }
    }
}

/// Event emitted by a peer link.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// A local candidate to relay through signaling
    LocalCandidate(IceCandidate),
    /// The transport changed state
    Transport(TransportState),
    /// Host: the payload went out in full
    PayloadSent { peer_id: String, size: usize },
    /// Host: the data channel failed to open or send
    ChannelFailed(String),
    /// Client: the first complete message on the data channel
    Received(String),
}

fn peer_error(e: impl std::fmt::Display) -> SyncError {
    SyncError::PeerConnection(e.to_string())
}

fn to_rtc_description(desc: &SessionDescription) -> Result<RTCSessionDescription, SyncError> {
    let sdp = desc.sdp.clone();
    let parsed = match desc.kind {
        SdpKind::Offer => RTCSessionDescription::offer(sdp),
        SdpKind::Answer => RTCSessionDescription::answer(sdp),
        SdpKind::Pranswer => RTCSessionDescription::pranswer(sdp),
        SdpKind::Rollback => {
            return Err(SyncError::PeerConnection(
                "Rollback descriptions are not supported".to_string(),
            ));
        }
    };
    parsed.map_err(peer_error)
}

fn to_candidate(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_m_line_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}

fn from_candidate(candidate: &IceCandidate) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: candidate.candidate.clone(),
        sdp_mid: candidate.sdp_mid.clone(),
        sdp_mline_index: candidate.sdp_m_line_index,
        username_fragment: candidate.username_fragment.clone(),
    }
}

/// One direct connection to one remote peer.
pub struct PeerLink {
    remote_id: String,
    pc: Arc<RTCPeerConnection>,
    event_tx: mpsc::UnboundedSender<PeerEvent>,
}

impl PeerLink {
    /// Build a connection to `remote_id` using the given STUN servers.
    ///
    /// Local candidates and transport state changes are forwarded on
    /// `event_tx` from here on.
    pub async fn new(
        remote_id: impl Into<String>,
        ice_servers: &[String],
        event_tx: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Self, SyncError> {
        let remote_id = remote_id.into();

        let mut media = MediaEngine::default();
        let registry = register_default_interceptors(Registry::new(), &mut media).map_err(peer_error)?;
        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: ice_servers
                .iter()
                .map(|url| RTCIceServer {
                    urls: vec![url.clone()],
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };
        let pc = Arc::new(api.new_peer_connection(config).await.map_err(peer_error)?);

        let tx = event_tx.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let tx = tx.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    debug!("ICE gathering complete");
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = tx.send(PeerEvent::LocalCandidate(to_candidate(init)));
                    }
                    Err(e) => warn!("Failed to encode local ICE candidate: {}", e),
                }
            })
        }));

        let tx = event_tx.clone();
        let peer = remote_id.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            info!("Connection state with {}: {}", peer, state);
            let _ = tx.send(PeerEvent::Transport(state.into()));
            Box::pin(async {})
        }));

        Ok(Self {
            remote_id,
            pc,
            event_tx,
        })
    }

    pub fn remote_id(&self) -> &str {
        &self.remote_id
    }

    /// Host path: open the data channel, arrange for `payload` to be sent when
    /// it opens, and return the offer to relay.
    pub async fn open_sender(&self, payload: SyncPayload) -> Result<SessionDescription, SyncError> {
        let init = RTCDataChannelInit {
            ordered: Some(true),
            ..Default::default()
        };
        let channel = self
            .pc
            .create_data_channel(DATA_CHANNEL_LABEL, Some(init))
            .await
            .map_err(|e| SyncError::DataChannel(e.to_string()))?;

        let weak: Weak<RTCDataChannel> = Arc::downgrade(&channel);
        let tx = self.event_tx.clone();
        let peer_id = self.remote_id.clone();
        channel.on_open(Box::new(move || {
            Box::pin(async move {
                let Some(channel) = weak.upgrade() else {
                    return;
                };
                info!("Data channel opened, sending data to {}", peer_id);
                let json = payload.to_json();
                let size = json.len();
                match channel.send_text(json).await {
                    Ok(_) => {
                        let _ = tx.send(PeerEvent::PayloadSent { peer_id, size });
                    }
                    Err(e) => {
                        error!("Data channel send to {} failed: {}", peer_id, e);
                        let _ = tx.send(PeerEvent::ChannelFailed(e.to_string()));
                    }
                }
            })
        }));

        let tx = self.event_tx.clone();
        channel.on_error(Box::new(move |e: webrtc::Error| {
            error!("Data channel error: {}", e);
            let _ = tx.send(PeerEvent::ChannelFailed(e.to_string()));
            Box::pin(async {})
        }));

        let offer = self.pc.create_offer(None).await.map_err(peer_error)?;
        let sdp = offer.sdp.clone();
        self.pc
            .set_local_description(offer)
            .await
            .map_err(peer_error)?;

        debug!("Created offer for {}", self.remote_id);
        Ok(SessionDescription::offer(sdp))
    }

    /// Client path: wait for the host's data channel, apply its offer, and
    /// return the answer to relay.
    pub async fn accept_offer(&self, offer: &SessionDescription) -> Result<SessionDescription, SyncError> {
        let tx = self.event_tx.clone();
        self.pc.on_data_channel(Box::new(move |channel: Arc<RTCDataChannel>| {
            debug!("Data channel '{}' announced by host", channel.label());
            let tx = tx.clone();
            let delivered = Arc::new(AtomicBool::new(false));
            channel.on_message(Box::new(move |msg: DataChannelMessage| {
                if delivered.swap(true, Ordering::SeqCst) {
                    debug!("Ignoring extra data channel message");
                } else {
                    info!("Received data from peer ({} bytes)", msg.data.len());
                    let event = match String::from_utf8(msg.data.to_vec()) {
                        Ok(text) => PeerEvent::Received(text),
                        Err(e) => {
                            error!("Received non-UTF-8 data: {}", e);
                            PeerEvent::ChannelFailed(e.to_string())
                        }
                    };
                    let _ = tx.send(event);
                }
                Box::pin(async {})
            }));
            Box::pin(async {})
        }));

        self.pc
            .set_remote_description(to_rtc_description(offer)?)
            .await
            .map_err(peer_error)?;
        let answer = self.pc.create_answer(None).await.map_err(peer_error)?;
        let sdp = answer.sdp.clone();
        self.pc
            .set_local_description(answer)
            .await
            .map_err(peer_error)?;

        debug!("Created answer for {}", self.remote_id);
        Ok(SessionDescription::answer(sdp))
    }

    /// Host path: apply the client's answer.
    pub async fn apply_answer(&self, answer: &SessionDescription) -> Result<(), SyncError> {
        self.pc
            .set_remote_description(to_rtc_description(answer)?)
            .await
            .map_err(peer_error)
    }

    /// Apply a candidate relayed from the remote side, as it arrives.
    pub async fn add_candidate(&self, candidate: &IceCandidate) -> Result<(), SyncError> {
        self.pc
            .add_ice_candidate(from_candidate(candidate))
            .await
            .map_err(peer_error)
    }

    /// Close the connection and every channel on it.
    pub async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            debug!("Error closing peer connection with {}: {}", self.remote_id, e);
        }
    }

    /// Close from a context that cannot await, such as `Drop`.
    pub fn close_detached(&self) {
        let pc = Arc::clone(&self.pc);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _ = pc.close().await;
            });
        }
    }
}
