//! Signaling client: one WebSocket to the rendezvous server.
//!
//! The socket is split into a read task that forwards decoded
//! [`ServerMessage`]s to an event channel and a write task fed by an
//! outgoing queue, so [`SignalingClient::send`] never blocks. A third task
//! sends keepalive pings while the channel is open.

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use sync_core::{ClientMessage, ServerMessage, SyncError};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Close code for a normal, user-initiated closure.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Event emitted by the signaling read task.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalingEvent {
    /// A known message from the server
    Message(ServerMessage),
    /// The channel closed. `code` is `None` when no close frame arrived.
    Closed { code: Option<u16> },
}

impl SignalingEvent {
    /// Whether this is a close the user did not ask for.
    pub fn is_unexpected_close(&self) -> bool {
        matches!(self, Self::Closed { code } if *code != Some(NORMAL_CLOSURE))
    }
}

pub struct SignalingClient {
    event_tx: mpsc::UnboundedSender<SignalingEvent>,
    outgoing: Option<mpsc::UnboundedSender<Message>>,
    read_task: Option<JoinHandle<()>>,
    write_task: Option<JoinHandle<()>>,
    ping_task: Option<JoinHandle<()>>,
}

impl SignalingClient {
    pub fn new(event_tx: mpsc::UnboundedSender<SignalingEvent>) -> Self {
        Self {
            event_tx,
            outgoing: None,
            read_task: None,
            write_task: None,
            ping_task: None,
        }
    }

    /// Whether the channel is open for sending.
    pub fn is_open(&self) -> bool {
        self.outgoing.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Open the channel to `url`, or reuse it if already open.
    ///
    /// Fails after `connect_timeout` or on any transport error.
    pub async fn connect(
        &mut self,
        url: &str,
        connect_timeout: Duration,
        ping_interval: Duration,
    ) -> Result<(), SyncError> {
        if self.is_open() {
            debug!("Reusing open signaling connection");
            return Ok(());
        }
        self.shutdown();

        info!("Connecting to signaling server {}", url);
        let ws = match tokio::time::timeout(connect_timeout, connect_async(url)).await {
            Err(_) => {
                warn!("Signaling connection to {} timed out", url);
                return Err(SyncError::SignalingConnection(
                    "Connection timeout. Server might be unavailable.".to_string(),
                ));
            }
            Ok(Err(e)) => {
                warn!("Signaling connection to {} failed: {}", url, e);
                return Err(SyncError::SignalingConnection(
                    "Cannot connect to signaling server. Check server URL and try again."
                        .to_string(),
                ));
            }
            Ok(Ok((ws, _))) => ws,
        };
        info!("Connected to signaling server");

        let (write, read) = ws.split();
        let (out_tx, out_rx) = mpsc::unbounded_channel();

        self.write_task = Some(tokio::spawn(Self::write_loop(write, out_rx)));
        self.read_task = Some(tokio::spawn(Self::read_loop(read, self.event_tx.clone())));
        self.ping_task = Some(tokio::spawn(Self::ping_loop(out_tx.clone(), ping_interval)));
        self.outgoing = Some(out_tx);
        Ok(())
    }

    /// Queue a message. Returns false (and logs) if the channel is not open.
    /// Nothing is queued or retried for later.
    pub fn send(&self, msg: &ClientMessage) -> bool {
        match &self.outgoing {
            Some(tx) if !tx.is_closed() => {
                debug!("Sending signaling message: {}", msg.kind());
                tx.send(Message::Text(msg.to_json())).is_ok()
            }
            _ => {
                warn!(
                    "Attempted to send {} but signaling channel is not open",
                    msg.kind()
                );
                false
            }
        }
    }

    /// Close the channel with a normal-closure frame. Emits no `Closed` event.
    pub fn close(&mut self) {
        if let Some(tx) = self.outgoing.take() {
            let frame = CloseFrame {
                code: CloseCode::Normal,
                reason: "".into(),
            };
            let _ = tx.send(Message::Close(Some(frame)));
        }
        // Writer drains the close frame and exits on its own
        self.write_task.take();
        self.abort_readers();
    }

    /// Drop all tasks after the remote side went away.
    pub fn shutdown(&mut self) {
        self.outgoing = None;
        if let Some(task) = self.write_task.take() {
            task.abort();
        }
        self.abort_readers();
    }

    fn abort_readers(&mut self) {
        if let Some(task) = self.read_task.take() {
            task.abort();
        }
        if let Some(task) = self.ping_task.take() {
            task.abort();
        }
    }

    async fn write_loop(mut write: SplitSink<WsStream, Message>, mut rx: mpsc::UnboundedReceiver<Message>) {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if let Err(e) = write.send(msg).await {
                debug!("Signaling write failed: {}", e);
                break;
            }
            if closing {
                debug!("Sent close frame to signaling server");
                break;
            }
        }
    }

    async fn ping_loop(tx: mpsc::UnboundedSender<Message>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        // First tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            debug!("Sending keepalive ping");
            if tx.send(Message::Text(ClientMessage::Ping.to_json())).is_err() {
                break;
            }
        }
    }

    async fn read_loop(
        mut read: SplitStream<WsStream>,
        event_tx: mpsc::UnboundedSender<SignalingEvent>,
    ) {
        let code = loop {
            match read.next().await {
                Some(Ok(Message::Text(text))) => Self::dispatch(&text, &event_tx),
                Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                    Ok(text) => Self::dispatch(text, &event_tx),
                    Err(_) => warn!("Dropping non-UTF-8 signaling frame ({} bytes)", data.len()),
                },
                Some(Ok(Message::Close(frame))) => {
                    let code = frame.map(|f| u16::from(f.code));
                    info!("Disconnected from signaling server (code {:?})", code);
                    break code;
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    match e {
                        WsError::ConnectionClosed | WsError::AlreadyClosed => {
                            debug!("Signaling connection closed");
                        }
                        _ => {
                            error!("Signaling WebSocket error: {}", e);
                        }
                    }
                    break None;
                }
                None => {
                    debug!("Signaling stream ended");
                    break None;
                }
            }
        };

        let _ = event_tx.send(SignalingEvent::Closed { code });
    }

    fn dispatch(text: &str, event_tx: &mpsc::UnboundedSender<SignalingEvent>) {
        match ServerMessage::from_json(text) {
            Ok(ServerMessage::Unknown) => {
                debug!("Unknown message type, ignoring: {}", text);
            }
            Ok(msg) => {
                debug!("Received signaling message: {}", msg.kind());
                let _ = event_tx.send(SignalingEvent::Message(msg));
            }
            Err(e) => {
                warn!("Malformed signaling message ({}): {}", e, text);
            }
        }
    }
}

impl Drop for SignalingClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unexpected_close_detection() {
        assert!(!SignalingEvent::Closed { code: Some(1000) }.is_unexpected_close());
        assert!(SignalingEvent::Closed { code: Some(1006) }.is_unexpected_close());
        assert!(SignalingEvent::Closed { code: None }.is_unexpected_close());
        assert!(!SignalingEvent::Message(ServerMessage::Pong).is_unexpected_close());
    }

    #[tokio::test]
    async fn test_send_when_never_connected() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let client = SignalingClient::new(tx);
        assert!(!client.is_open());
        assert!(!client.send(&ClientMessage::Ping));
    }

    #[tokio::test]
    async fn test_close_without_connection_is_noop() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut client = SignalingClient::new(tx);
        client.close();
        assert!(!client.is_open());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Bind then drop to get a port nobody listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (tx, _rx) = mpsc::unbounded_channel();
        let mut client = SignalingClient::new(tx);
        let err = client
            .connect(
                &format!("ws://{}", addr),
                Duration::from_secs(5),
                Duration::from_secs(30),
            )
            .await
            .unwrap_err();

        assert_eq!(
            err.message(),
            "Cannot connect to signaling server. Check server URL and try again."
        );
        assert!(!client.is_open());
    }
}
