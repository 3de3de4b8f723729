//! Conversation sync core shared by the network adapters and the shells.
//!
//! This crate defines the message model, wire normalization, the ordered
//! message store and the per-conversation session lifecycle. Network access
//! goes through the [`ChatApi`] and [`RealtimeTransport`] seams.

/// Session command and snapshot channels.
pub mod channel;
/// REST and realtime route derivation.
pub mod endpoints;
/// Stable error types and HTTP classification helpers.
pub mod error;
/// Wire-to-canonical message conversion.
pub mod normalization;
/// Backoff policy for user-requested retries.
pub mod retry;
/// Conversation sessions.
pub mod session;
/// Realtime connection lifecycle.
pub mod state_machine;
/// Newest-first message log.
pub mod store;
/// Network seams and the realtime queue pair.
pub mod transport;
/// Domain types (conversations, participants, messages, directory rows).
pub mod types;
/// Tolerant parsing of wire message records.
pub mod wire;

pub use channel::{SessionChannelError, SessionChannels, SessionCommand, SnapshotStream};
pub use endpoints::{Endpoints, Platform};
pub use error::{ChatError, ErrorCategory, classify_http_status};
pub use normalization::{NormalizeContext, normalize_history, normalize_message};
pub use retry::RetryPolicy;
pub use session::{SendDisposition, SessionHandle, SessionManager, SessionOptions};
pub use state_machine::ConnectionLifecycle;
pub use store::{MessageStore, SeedOutcome};
pub use transport::{ChatApi, RealtimeConnection, RealtimePeer, RealtimeTransport, TransportFrame};
pub use types::{
    ChannelSummary, ConnectionState, ConversationKind, ConversationRef, Directory, DmGroup,
    HistoryStatus, Message, OutboundEnvelope, Participant, SessionSnapshot, UserProfile,
};
pub use wire::{WireMessage, WireParticipant};
