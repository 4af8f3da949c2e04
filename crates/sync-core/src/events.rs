//! Session events and the bus that delivers them.
//!
//! A sync session publishes every observable change as a [`SessionEvent`] so
//! a UI or CLI can follow the status without polling. Subscribers register a
//! callback on an `Arc<EventBus>` and stay subscribed while they hold the
//! returned [`Subscription`].

use crate::payload::PayloadPreview;
use crate::protocol::PeerRef;
use crate::status::{LinkState, SyncStatus};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    /// The sync status changed.
    StatusChanged {
        status: SyncStatus,
        #[serde(rename = "roomId")]
        room_id: Option<String>,
    },
    /// The signaling channel connected or dropped.
    LinkChanged { link: LinkState },
    /// The room's peer list changed.
    PeersChanged { peers: Vec<PeerRef> },
    /// A payload arrived and is waiting to be applied.
    PayloadReceived { preview: PayloadPreview },
    /// The payload went out over the data channel.
    PayloadSent {
        #[serde(rename = "peerId")]
        peer_id: String,
        size: usize,
    },
    /// A failure moved the session to `error`.
    Error { message: String },
}

/// Subscription handle that unsubscribes automatically when dropped.
pub struct Subscription {
    bus: Weak<EventBus>,
    id: usize,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

type Callback = Arc<dyn Fn(SessionEvent) + Send + Sync>;

/// Fan-out of session events to subscribers. Wrap in `Arc` to subscribe.
pub struct EventBus {
    callbacks: RwLock<Vec<(usize, Callback)>>,
    next_id: AtomicUsize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self {
            callbacks: RwLock::new(Vec::new()),
            next_id: AtomicUsize::new(0),
        }
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events. Returns `Subscription` that unsubscribes on drop.
    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn(SessionEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(callback)));
        Subscription {
            bus: Arc::downgrade(self),
            id,
        }
    }

    fn unsubscribe(&self, id: usize) {
        // try_write: Drop may run while emit holds the read lock during unwinding
        if let Ok(mut guard) = self.callbacks.try_write() {
            guard.retain(|(i, _)| *i != id);
        }
    }

    pub fn emit(&self, event: SessionEvent) {
        // Snapshot so callbacks can subscribe without deadlocking
        let callbacks: Vec<_> = self
            .callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in callbacks {
            callback(event.clone());
        }
    }
}
