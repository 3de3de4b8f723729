//! Seams between the session core and its network collaborators.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    error::ChatError,
    types::{ConversationRef, Participant},
    wire::WireMessage,
};

/// REST operations the session core consumes.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Whether a bearer token is available for authenticated calls.
    fn has_credentials(&self) -> bool;

    /// `GET /api/me/` resolved to a participant.
    async fn current_user(&self) -> Result<Participant, ChatError>;

    /// `GET /api/messages/{kind}/{id}/`, oldest first.
    async fn fetch_history(
        &self,
        conversation: ConversationRef,
    ) -> Result<Vec<WireMessage>, ChatError>;

    /// `POST /api/messages/{kind}/{id}/` with `{content}`.
    async fn persist_message(
        &self,
        conversation: ConversationRef,
        content: &str,
    ) -> Result<(), ChatError>;
}

/// Opens realtime connections.
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    async fn connect(&self, url: &Url) -> Result<RealtimeConnection, ChatError>;
}

/// One item on the inbound queue of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFrame {
    Text(String),
    /// The transport closed; nothing follows.
    Closed { reason: Option<String> },
}

/// Session side of a realtime connection: an outbound queue, an inbound
/// queue and a close signal. The transport owns the socket pump.
#[derive(Debug)]
pub struct RealtimeConnection {
    outbound: mpsc::UnboundedSender<String>,
    inbound: mpsc::UnboundedReceiver<TransportFrame>,
    shutdown: CancellationToken,
}

/// Transport side of a [`RealtimeConnection`].
#[derive(Debug)]
pub struct RealtimePeer {
    pub outbound_rx: mpsc::UnboundedReceiver<String>,
    pub inbound_tx: mpsc::UnboundedSender<TransportFrame>,
    pub shutdown: CancellationToken,
}

impl RealtimeConnection {
    /// Create a connected pair of queues.
    pub fn pair() -> (Self, RealtimePeer) {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        (
            Self {
                outbound,
                inbound,
                shutdown: shutdown.clone(),
            },
            RealtimePeer {
                outbound_rx,
                inbound_tx,
                shutdown,
            },
        )
    }

    /// Queue a text frame for the socket.
    pub fn publish(&self, frame: String) -> Result<(), ChatError> {
        if self.shutdown.is_cancelled() {
            return Err(ChatError::transport_closed("connection already closed"));
        }
        self.outbound
            .send(frame)
            .map_err(|_| ChatError::transport_closed("transport writer is gone"))
    }

    /// Next inbound frame; `None` once the transport dropped its sender.
    pub async fn next_frame(&mut self) -> Option<TransportFrame> {
        self.inbound.recv().await
    }

    /// Signal the transport to close the socket. Idempotent.
    pub fn close(&mut self) {
        self.shutdown.cancel();
        self.inbound.close();
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pair_moves_frames_both_ways() {
        let (mut connection, mut peer) = RealtimeConnection::pair();

        connection
            .publish("out".to_owned())
            .expect("publish should queue");
        assert_eq!(peer.outbound_rx.recv().await.as_deref(), Some("out"));

        peer.inbound_tx
            .send(TransportFrame::Text("in".to_owned()))
            .expect("inbound queue open");
        assert_eq!(
            connection.next_frame().await,
            Some(TransportFrame::Text("in".to_owned()))
        );
    }

    #[tokio::test]
    async fn close_signals_peer_and_rejects_publish() {
        let (mut connection, peer) = RealtimeConnection::pair();
        connection.close();
        connection.close();

        assert!(peer.shutdown.is_cancelled());
        assert!(peer.inbound_tx.send(TransportFrame::Text("late".into())).is_err());
        let err = connection
            .publish("x".to_owned())
            .expect_err("closed connection must refuse frames");
        assert_eq!(err.code, "transport_closed");
    }
}
