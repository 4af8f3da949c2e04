//! sync-core: Runtime-agnostic core of Prio's peer-to-peer sync.
//!
//! This crate provides:
//! - The tracker data model and the SyncPayload snapshot format
//! - The reconciliation engine that merges a remote snapshot into local state
//! - The signaling wire protocol and room codes
//! - The connection state machine and session events
//! - Persisted store and backup abstractions
//!
//! Networking lives in `sync-client`.

pub mod backup;
pub mod error;
pub mod events;
pub mod ids;
pub mod merge;
pub mod model;
pub mod payload;
pub mod protocol;
pub mod room_id;
pub mod status;
pub mod store;

pub use backup::{backup_file_name, export_backup, import_backup};
pub use error::SyncError;
pub use events::{EventBus, SessionEvent, Subscription};
pub use ids::{IdMinter, RandomIds, SequentialIds};
pub use merge::{
    merge_incoming, merge_incoming_with, MergeOutcome, MergeResult, MergeStats, SettingKind,
    SettingsDiff,
};
pub use model::{date_key, DateKey, Habit, LocalState, Settings, Tag, Task};
pub use payload::{PayloadPreview, SyncPayload, PAYLOAD_VERSION};
pub use protocol::{ClientMessage, IceCandidate, PeerRef, SdpKind, ServerMessage, SessionDescription};
pub use room_id::{RoomId, RoomIdError};
pub use status::{LinkState, Role, SessionState, SyncStatus, TransitionError};
pub use store::{InMemoryStore, StateStore, StoreError};
