use thiserror::Error;
use tokio::sync::{mpsc, watch};

use crate::types::{ConversationRef, SessionSnapshot};

/// Snapshot stream type used by views.
pub type SnapshotStream = watch::Receiver<SessionSnapshot>;

/// Commands accepted by a running session task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    /// Publish already-validated text on the realtime connection.
    Send { text: String },
}

/// Errors returned by session channel operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionChannelError {
    /// The session task has exited.
    #[error("session command channel is closed")]
    CommandChannelClosed,
}

/// View side: command sender plus the latest published snapshot.
#[derive(Debug, Clone)]
pub struct SessionChannels {
    command_tx: mpsc::UnboundedSender<SessionCommand>,
    snapshot_rx: watch::Receiver<SessionSnapshot>,
}

/// Task side: command receiver plus the snapshot publisher.
#[derive(Debug)]
pub struct SessionInbox {
    pub command_rx: mpsc::UnboundedReceiver<SessionCommand>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
}

impl SessionChannels {
    /// Create both sides, starting from an empty snapshot.
    pub fn new(conversation: ConversationRef) -> (Self, SessionInbox) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::new(conversation));

        (
            Self {
                command_tx,
                snapshot_rx,
            },
            SessionInbox {
                command_rx,
                snapshot_tx,
            },
        )
    }

    pub fn send_command(&self, command: SessionCommand) -> Result<(), SessionChannelError> {
        self.command_tx
            .send(command)
            .map_err(|_| SessionChannelError::CommandChannelClosed)
    }

    /// Subscribe to snapshot changes.
    pub fn subscribe(&self) -> SnapshotStream {
        self.snapshot_rx.clone()
    }

    /// Latest snapshot.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot_rx.borrow().clone()
    }
}

impl SessionInbox {
    /// Replace the published snapshot. Succeeds even with no subscribers.
    pub fn publish(&self, snapshot: SessionSnapshot) {
        self.snapshot_tx.send_replace(snapshot);
    }

    /// Edit the published snapshot in place and notify subscribers.
    pub fn update(&self, modify: impl FnOnce(&mut SessionSnapshot)) {
        self.snapshot_tx.send_modify(modify);
    }
}
