//! A sync session: one signaling channel, at most one peer link, and the
//! state machine that says where the two of them are.
//!
//! The session is driven by its owner. Operations like [`SyncSession::start_hosting`]
//! kick things off; [`SyncSession::step`] then processes one signaling or peer
//! event at a time. Every observable change is published on the session's
//! [`EventBus`].
//!
//! Dropping the session tears down the peer connection and signaling socket.

use crate::config::SessionConfig;
use crate::peer::{PeerEvent, PeerLink, TransportState};
use crate::signaling::{SignalingClient, SignalingEvent};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use sync_core::{
    ClientMessage, EventBus, IceCandidate, LinkState, LocalState, Role, RoomId, RoomIdError,
    ServerMessage, SessionDescription, SessionEvent, SessionState, SyncError, SyncPayload,
    SyncStatus, TransitionError,
};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    RoomId(#[from] RoomIdError),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

pub type Result<T> = std::result::Result<T, SessionError>;

pub struct SyncSession {
    config: SessionConfig,
    state: SessionState,
    events: Arc<EventBus>,
    signaling: SignalingClient,
    signaling_rx: mpsc::UnboundedReceiver<SignalingEvent>,
    peer: Option<PeerLink>,
    peer_tx: mpsc::UnboundedSender<PeerEvent>,
    peer_rx: mpsc::UnboundedReceiver<PeerEvent>,
    /// When the host closes everything down after a successful send
    teardown_at: Option<Instant>,
}

impl SyncSession {
    pub fn new(config: SessionConfig) -> Self {
        let (signaling_tx, signaling_rx) = mpsc::unbounded_channel();
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        Self {
            config,
            state: SessionState::new(),
            events: Arc::new(EventBus::new()),
            signaling: SignalingClient::new(signaling_tx),
            signaling_rx,
            peer: None,
            peer_tx,
            peer_rx,
            teardown_at: None,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// The bus this session publishes on. Subscribe before starting.
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Take the payload received from a host, if any.
    pub fn take_received(&mut self) -> Option<SyncPayload> {
        self.state.take_received()
    }

    /// Host side: the payload was sent and connections are closed.
    pub fn transfer_complete(&self) -> bool {
        self.state.status() == SyncStatus::Shared && self.teardown_at.is_none()
    }

    // ==================== Operations ====================

    /// Create a room with a fresh code and wait in it for peers.
    ///
    /// Returns once `create-room` is sent; the status moves to `hosting` when
    /// the server confirms.
    pub async fn start_hosting(&mut self) -> Result<RoomId> {
        let room = RoomId::generate();
        self.state.begin(Role::Host, room.as_str())?;
        info!("Starting to host room {}", room);
        self.emit_status();

        self.open_signaling().await?;
        let sent = self.signaling.send(&ClientMessage::CreateRoom {
            room_id: room.to_string(),
        });
        if !sent {
            let err = SyncError::SignalingConnection(
                "Failed to start hosting. Please try again.".to_string(),
            );
            self.fail(err.clone());
            return Err(err.into());
        }
        Ok(room)
    }

    /// Join the room with the given code. The code is trimmed and
    /// uppercased; an invalid code leaves the session untouched.
    pub async fn join_room(&mut self, code: &str) -> Result<RoomId> {
        let room: RoomId = code.parse()?;
        self.state.begin(Role::Client, room.as_str())?;
        info!("Joining room {}", room);
        self.emit_status();

        self.open_signaling().await?;
        let sent = self.signaling.send(&ClientMessage::JoinRoom {
            room_id: room.to_string(),
        });
        if !sent {
            let err = SyncError::SignalingConnection(
                "Failed to join room. Check room ID and try again.".to_string(),
            );
            self.fail(err.clone());
            return Err(err.into());
        }
        Ok(room)
    }

    /// Host side: offer a data channel to `peer_id` and send a snapshot of
    /// `local` over it as soon as it opens.
    pub async fn send_data_to_peer(&mut self, peer_id: &str, local: &LocalState) -> Result<()> {
        let status = self.state.status();
        if self.state.role() != Some(Role::Host)
            || !matches!(status, SyncStatus::Hosting | SyncStatus::Connected)
        {
            return Err(TransitionError::Illegal {
                from: status,
                to: SyncStatus::Shared,
            }
            .into());
        }

        info!("Sending data to peer {}", peer_id);
        let payload = SyncPayload::from_state(local, Utc::now());
        if let Err(e) = self.offer_to(peer_id, payload).await {
            error!("Error sending data to {}: {}", peer_id, e);
            let err = SyncError::DataChannel("Failed to send data".to_string());
            self.fail(err.clone());
            return Err(err.into());
        }
        Ok(())
    }

    /// Tear everything down and return to `idle`, dropping any received
    /// payload that was not taken.
    pub async fn reset(&mut self) {
        info!("Resetting sync session");
        self.close_peer().await;
        if self.signaling.is_open() {
            self.signaling.send(&ClientMessage::LeaveRoom);
        }
        self.signaling.close();
        self.teardown_at = None;
        self.state.reset();

        // Anything still queued belongs to the old session
        while self.signaling_rx.try_recv().is_ok() {}
        while self.peer_rx.try_recv().is_ok() {}

        self.events.emit(SessionEvent::LinkChanged {
            link: LinkState::Disconnected,
        });
        self.emit_status();
    }

    // ==================== Event loop ====================

    /// Wait for and handle the next event.
    pub async fn step(&mut self) {
        let teardown = self.teardown_at;
        tokio::select! {
            Some(event) = self.signaling_rx.recv() => {
                self.on_signaling_event(event).await;
            }
            Some(event) = self.peer_rx.recv() => {
                self.on_peer_event(event).await;
            }
            _ = tokio::time::sleep_until(teardown.unwrap_or_else(Instant::now)), if teardown.is_some() => {
                self.finish_share().await;
            }
        }
    }

    /// Handle events until `done` holds or `limit` passes. Returns whether
    /// `done` held.
    pub async fn run_until(&mut self, limit: Duration, mut done: impl FnMut(&Self) -> bool) -> bool {
        let deadline = Instant::now() + limit;
        while !done(self) {
            if tokio::time::timeout_at(deadline, self.step()).await.is_err() {
                return done(self);
            }
        }
        true
    }

    async fn on_signaling_event(&mut self, event: SignalingEvent) {
        match event {
            SignalingEvent::Message(msg) => self.on_server_message(msg).await,
            SignalingEvent::Closed { code } => {
                let unexpected = SignalingEvent::Closed { code }.is_unexpected_close();
                info!("Signaling channel closed (code {:?})", code);
                self.signaling.shutdown();
                self.set_link(LinkState::Disconnected);
                if unexpected {
                    self.fail(SyncError::SignalingConnection(
                        "Lost connection to signaling server".to_string(),
                    ));
                }
            }
        }
    }

    async fn on_server_message(&mut self, msg: ServerMessage) {
        match msg {
            ServerMessage::Connected => debug!("Signaling server acknowledged connection"),
            ServerMessage::RoomCreated { room_id } => {
                info!("Room created: {}", room_id);
                if self.state.room_created(room_id).is_ok() {
                    self.emit_status();
                }
            }
            ServerMessage::RoomJoined { .. } => {
                info!("Joined room {}", self.state.room_id().unwrap_or_default());
                if self.state.room_joined().is_ok() {
                    self.emit_status();
                }
            }
            ServerMessage::PeersList { peers } => {
                self.state.set_peers(peers);
                self.emit_peers();
            }
            ServerMessage::PeerJoined { peer } => {
                info!("Peer joined: {}", peer.id);
                if self.state.peer_joined(peer) {
                    self.emit_peers();
                }
            }
            ServerMessage::PeerLeft { peer_id } => {
                info!("Peer left: {}", peer_id);
                if self.state.peer_left(&peer_id) {
                    self.emit_peers();
                }
            }
            ServerMessage::Offer { offer, from } => self.on_offer(offer, from).await,
            ServerMessage::Answer { answer, .. } => self.on_answer(answer).await,
            ServerMessage::IceCandidate { candidate, .. } => self.on_remote_candidate(candidate).await,
            ServerMessage::Error { message } => {
                error!("Signaling server error: {}", message);
                self.fail(SyncError::SignalingProtocol(message));
            }
            ServerMessage::Pong => debug!("Received pong"),
            ServerMessage::Unknown => {}
        }
    }

    async fn on_offer(&mut self, offer: SessionDescription, from: String) {
        info!("Handling offer from {}", from);
        if let Err(e) = self.answer_offer(&offer, &from).await {
            error!("Error handling offer from {}: {}", from, e);
            self.fail(SyncError::PeerConnection(
                "Failed to handle connection".to_string(),
            ));
        }
    }

    async fn on_answer(&mut self, answer: SessionDescription) {
        let Some(peer) = &self.peer else {
            debug!("Answer arrived with no peer connection");
            return;
        };
        match peer.apply_answer(&answer).await {
            Ok(()) => debug!("Applied answer from {}", peer.remote_id()),
            Err(e) => error!("Error handling answer: {}", e),
        }
    }

    async fn on_remote_candidate(&mut self, candidate: IceCandidate) {
        let Some(peer) = &self.peer else {
            debug!("ICE candidate arrived with no peer connection");
            return;
        };
        if let Err(e) = peer.add_candidate(&candidate).await {
            warn!("Error handling ICE candidate: {}", e);
        }
    }

    async fn on_peer_event(&mut self, event: PeerEvent) {
        match event {
            PeerEvent::LocalCandidate(candidate) => {
                let Some(room_id) = self.state.room_id() else {
                    return;
                };
                let msg = ClientMessage::IceCandidate {
                    candidate,
                    room_id: room_id.to_string(),
                };
                self.signaling.send(&msg);
            }
            PeerEvent::Transport(TransportState::Connected) => {
                if matches!(
                    self.state.status(),
                    SyncStatus::Hosting | SyncStatus::Connecting
                ) && self.state.transport_connected().is_ok()
                {
                    self.emit_status();
                }
            }
            PeerEvent::Transport(TransportState::Failed | TransportState::Disconnected) => {
                self.fail(SyncError::PeerConnection("P2P connection failed".to_string()));
            }
            PeerEvent::Transport(_) => {}
            PeerEvent::PayloadSent { peer_id, size } => {
                info!("Sent {} bytes to {}", size, peer_id);
                if self.state.shared().is_ok() {
                    self.events.emit(SessionEvent::PayloadSent { peer_id, size });
                    self.emit_status();
                    self.teardown_at = Some(Instant::now() + self.config.share_teardown_delay);
                }
            }
            PeerEvent::ChannelFailed(reason) => {
                if self.state.role() == Some(Role::Host) {
                    self.fail(SyncError::DataChannel("Failed to send data".to_string()));
                } else {
                    self.fail(SyncError::PayloadParse(reason));
                }
            }
            PeerEvent::Received(text) => self.on_received(&text),
        }
    }

    fn on_received(&mut self, text: &str) {
        let payload = match SyncPayload::from_json(text) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Error parsing received data: {}", e);
                self.fail(e);
                return;
            }
        };
        if payload.is_foreign_version() {
            warn!(
                "Received payload version {:?}, merging it anyway",
                payload.version
            );
        }

        let preview = payload.preview();
        if self.state.payload_received(payload).is_ok() {
            info!(
                "Received {} tasks, {} tags, {} habits",
                preview.tasks, preview.tags, preview.habits
            );
            self.events.emit(SessionEvent::PayloadReceived { preview });
            self.emit_status();
        }
    }

    // ==================== Helpers ====================

    async fn open_signaling(&mut self) -> std::result::Result<(), SyncError> {
        self.set_link(LinkState::Connecting);
        let connected = self
            .signaling
            .connect(
                &self.config.server_url,
                self.config.connect_timeout,
                self.config.ping_interval,
            )
            .await;
        match connected {
            Ok(()) => {
                self.set_link(LinkState::Connected);
                Ok(())
            }
            Err(e) => {
                self.set_link(LinkState::Disconnected);
                self.fail(e.clone());
                Err(e)
            }
        }
    }

    async fn offer_to(&mut self, peer_id: &str, payload: SyncPayload) -> std::result::Result<(), SyncError> {
        self.close_peer().await;
        let link = PeerLink::new(peer_id, &self.config.ice_servers, self.peer_tx.clone()).await?;
        let offer = link.open_sender(payload).await;
        self.peer = Some(link);

        let msg = ClientMessage::Offer {
            offer: offer?,
            room_id: self.state.room_id().unwrap_or_default().to_string(),
            to: peer_id.to_string(),
        };
        if !self.signaling.send(&msg) {
            return Err(SyncError::SignalingConnection(
                "Signaling channel is not open".to_string(),
            ));
        }
        Ok(())
    }

    async fn answer_offer(&mut self, offer: &SessionDescription, from: &str) -> std::result::Result<(), SyncError> {
        self.close_peer().await;
        let link = PeerLink::new(from, &self.config.ice_servers, self.peer_tx.clone()).await?;
        let answer = link.accept_offer(offer).await;
        self.peer = Some(link);

        let msg = ClientMessage::Answer {
            answer: answer?,
            room_id: self.state.room_id().unwrap_or_default().to_string(),
            to: from.to_string(),
        };
        if !self.signaling.send(&msg) {
            return Err(SyncError::SignalingConnection(
                "Signaling channel is not open".to_string(),
            ));
        }
        Ok(())
    }

    async fn close_peer(&mut self) {
        if let Some(peer) = self.peer.take() {
            debug!("Closing peer connection with {}", peer.remote_id());
            peer.close().await;
        }
    }

    async fn finish_share(&mut self) {
        info!("Data shared, closing connections");
        self.teardown_at = None;
        self.close_peer().await;
        self.signaling.close();
        self.set_link(LinkState::Disconnected);
    }

    fn fail(&mut self, err: SyncError) {
        let message = err.message().to_string();
        if self.state.fail(err) {
            self.events.emit(SessionEvent::Error { message });
            self.emit_status();
        }
    }

    fn set_link(&mut self, link: LinkState) {
        if self.state.link() != link {
            self.state.set_link(link);
            self.events.emit(SessionEvent::LinkChanged { link });
        }
    }

    fn emit_status(&self) {
        self.events.emit(SessionEvent::StatusChanged {
            status: self.state.status(),
            room_id: self.state.room_id().map(str::to_string),
        });
    }

    fn emit_peers(&self) {
        self.events.emit(SessionEvent::PeersChanged {
            peers: self.state.peers().to_vec(),
        });
    }
}

impl Drop for SyncSession {
    fn drop(&mut self) {
        if let Some(peer) = self.peer.take() {
            peer.close_detached();
        }
    }
}
