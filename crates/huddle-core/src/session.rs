//! Conversation sync sessions: one realtime connection, one history seed and
//! one message log per open conversation.

use std::sync::Arc;

use tokio::{
    sync::oneshot::{self, error::RecvError},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::{
    channel::{SessionChannels, SessionCommand, SessionInbox, SnapshotStream},
    endpoints::Endpoints,
    error::{ChatError, ErrorCategory},
    normalization::{NormalizeContext, normalize_history, normalize_message},
    state_machine::ConnectionLifecycle,
    store::{MessageStore, SeedOutcome},
    transport::{ChatApi, RealtimeConnection, RealtimeTransport, TransportFrame},
    types::{
        ConnectionState, ConversationRef, HistoryStatus, Message, OutboundEnvelope, Participant,
        SessionSnapshot,
    },
    wire::WireMessage,
};

const DEFAULT_MAX_ITEMS: usize = 1_200;

type HistoryResult = Result<Vec<WireMessage>, ChatError>;

/// Tuning for sessions opened by a [`SessionManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Message Store retention cap.
    pub max_items: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            max_items: DEFAULT_MAX_ITEMS,
        }
    }
}

/// What `send` did with the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendDisposition {
    /// Empty or whitespace-only input; nothing happened.
    Ignored,
    /// Handed to the session for publish and persistence.
    Queued,
}

/// Opens conversation sessions against one backend.
#[derive(Clone)]
pub struct SessionManager {
    api: Arc<dyn ChatApi>,
    transport: Arc<dyn RealtimeTransport>,
    endpoints: Endpoints,
    options: SessionOptions,
}

impl SessionManager {
    pub fn new(
        api: Arc<dyn ChatApi>,
        transport: Arc<dyn RealtimeTransport>,
        endpoints: Endpoints,
    ) -> Self {
        Self {
            api,
            transport,
            endpoints,
            options: SessionOptions::default(),
        }
    }

    pub fn with_options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// Open the realtime connection for `conversation` and start the history
    /// fetch alongside it.
    ///
    /// Fails only when the transport cannot be established; callers may retry
    /// by calling `open` again.
    pub async fn open(
        &self,
        conversation: ConversationRef,
        current_user: Participant,
        other_participant: Option<Participant>,
    ) -> Result<SessionHandle, ChatError> {
        let id = Uuid::new_v4();
        let target = self.endpoints.realtime(conversation);
        info!(session = %id, %conversation, url = %target, "opening conversation session");

        let stop = CancellationToken::new();
        let (history_tx, history_rx) = oneshot::channel();
        spawn_history_fetch(
            self.api.clone(),
            conversation,
            stop.child_token(),
            history_tx,
        );

        let mut lifecycle = ConnectionLifecycle::default();
        let connection = match self.transport.connect(&target).await {
            Ok(connection) => connection,
            Err(err) => {
                stop.cancel();
                lifecycle.on_closed();
                warn!(session = %id, %conversation, error = %err, "realtime connect failed");
                return Err(err);
            }
        };
        lifecycle.on_open()?;
        debug!(session = %id, %conversation, "realtime connection open");

        let (channels, inbox) = SessionChannels::new(conversation);
        let mut task = SessionTask {
            id,
            conversation,
            current_user,
            context: NormalizeContext::new(conversation, other_participant.clone()),
            other_participant,
            api: self.api.clone(),
            connection,
            inbox,
            store: MessageStore::new(self.options.max_items),
            lifecycle,
            history_rx,
            history_pending: true,
            history: HistoryStatus::Pending,
            last_error: None,
            stop: stop.clone(),
        };
        task.publish();

        Ok(SessionHandle {
            id,
            conversation,
            channels,
            api: self.api.clone(),
            stop,
            task: Some(tokio::spawn(task.run())),
        })
    }

    /// Close `previous` and open `conversation` with a fresh log.
    pub async fn switch_to(
        &self,
        mut previous: SessionHandle,
        conversation: ConversationRef,
        current_user: Participant,
        other_participant: Option<Participant>,
    ) -> Result<SessionHandle, ChatError> {
        previous.close().await;
        self.open(conversation, current_user, other_participant)
            .await
    }
}

/// View-owned handle to one running session.
///
/// Dropping the handle closes the session.
pub struct SessionHandle {
    id: Uuid,
    conversation: ConversationRef,
    channels: SessionChannels,
    api: Arc<dyn ChatApi>,
    stop: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn conversation(&self) -> ConversationRef {
        self.conversation
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.channels.snapshot()
    }

    /// Read-only log, newest first.
    pub fn messages(&self) -> Vec<Message> {
        self.channels.snapshot().messages.iter().cloned().collect()
    }

    pub fn state(&self) -> ConnectionState {
        self.channels.snapshot().state
    }

    pub fn subscribe(&self) -> SnapshotStream {
        self.channels.subscribe()
    }

    /// Publish `text` on the realtime connection and persist it in the
    /// background.
    ///
    /// The log is not touched here: the message shows up only when the
    /// realtime feed delivers it back.
    pub fn send(&self, text: &str) -> Result<SendDisposition, ChatError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(SendDisposition::Ignored);
        }
        if !self.api.has_credentials() {
            return Err(ChatError::auth_missing("send messages"));
        }

        let state = self.state();
        if state != ConnectionState::Open || self.stop.is_cancelled() {
            return Err(ChatError::invalid_state(state, "send"));
        }

        self.channels
            .send_command(SessionCommand::Send {
                text: text.to_owned(),
            })
            .map_err(|err| ChatError::transport_closed(err.to_string()))?;
        Ok(SendDisposition::Queued)
    }

    /// Close the connection and wait for the session task. Idempotent.
    pub async fn close(&mut self) {
        self.stop.cancel();
        if let Some(task) = self.task.take()
            && let Err(err) = task.await
        {
            warn!(session = %self.id, error = %err, "session task ended abnormally");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.stop.is_cancelled() || self.state() == ConnectionState::Closed
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

fn spawn_history_fetch(
    api: Arc<dyn ChatApi>,
    conversation: ConversationRef,
    stop: CancellationToken,
    reply: oneshot::Sender<HistoryResult>,
) {
    tokio::spawn(async move {
        let result = if api.has_credentials() {
            tokio::select! {
                biased;
                _ = stop.cancelled() => return,
                result = api.fetch_history(conversation) => result,
            }
        } else {
            Err(ChatError::auth_missing("load history"))
        };
        // Receiver is gone when the session already closed.
        let _ = reply.send(result);
    });
}

struct SessionTask {
    id: Uuid,
    conversation: ConversationRef,
    current_user: Participant,
    other_participant: Option<Participant>,
    context: NormalizeContext,
    api: Arc<dyn ChatApi>,
    connection: RealtimeConnection,
    inbox: SessionInbox,
    store: MessageStore,
    lifecycle: ConnectionLifecycle,
    history_rx: oneshot::Receiver<HistoryResult>,
    history_pending: bool,
    history: HistoryStatus,
    last_error: Option<ChatError>,
    stop: CancellationToken,
}

impl SessionTask {
    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                _ = self.stop.cancelled() => {
                    self.shutdown(None);
                    break;
                }
                frame = self.connection.next_frame() => match frame {
                    Some(TransportFrame::Text(raw)) => self.on_frame(&raw),
                    Some(TransportFrame::Closed { reason }) => {
                        self.shutdown(Some(reason.unwrap_or_else(|| "closed by peer".to_owned())));
                        break;
                    }
                    None => {
                        self.shutdown(Some("transport dropped".to_owned()));
                        break;
                    }
                },
                command = self.inbox.command_rx.recv() => match command {
                    Some(SessionCommand::Send { text }) => self.on_send(text),
                    None => {
                        self.shutdown(None);
                        break;
                    }
                },
                result = &mut self.history_rx, if self.history_pending => {
                    self.history_pending = false;
                    self.on_history(result);
                }
            }
        }
    }

    fn on_frame(&mut self, raw: &str) {
        let Some(wire) = WireMessage::parse_frame(raw) else {
            warn!(session = %self.id, len = raw.len(), "discarding non-JSON realtime frame");
            return;
        };

        let message = normalize_message(&wire, &self.context);
        trace!(session = %self.id, sender = %message.sender.username, "realtime message");
        self.publish_with(|store| store.prepend(message));
    }

    fn on_send(&mut self, text: String) {
        if let Err(err) = self.lifecycle.require_open("send") {
            warn!(session = %self.id, error = %err, "dropping send; connection not open");
            self.last_error = Some(err);
            self.publish();
            return;
        }

        let receiver = if self.conversation.is_dm() {
            self.other_participant.clone()
        } else {
            None
        };
        let envelope = OutboundEnvelope {
            message: text.clone(),
            sender: self.current_user.clone(),
            receiver,
        };

        let published = serde_json::to_string(&envelope)
            .map_err(|err| {
                ChatError::new(
                    ErrorCategory::Serialization,
                    "encode_failed",
                    err.to_string(),
                )
            })
            .and_then(|frame| self.connection.publish(frame));
        if let Err(err) = published {
            warn!(session = %self.id, error = %err, "failed to publish outbound message");
            self.last_error = Some(err);
            self.publish();
            return;
        }

        let api = self.api.clone();
        let conversation = self.conversation;
        let session = self.id;
        tokio::spawn(async move {
            match api.persist_message(conversation, &text).await {
                Ok(()) => debug!(%session, %conversation, "message persisted"),
                Err(err) => {
                    warn!(%session, %conversation, error = %err, "message persistence failed")
                }
            }
        });
    }

    fn on_history(&mut self, result: Result<HistoryResult, RecvError>) {
        match result {
            Ok(Ok(items)) => {
                let messages = normalize_history(&items, &self.context);
                match self.store.seed_once(messages) {
                    SeedOutcome::Seeded { count } => {
                        info!(session = %self.id, count, "history seeded");
                        self.history = HistoryStatus::Seeded { count };
                    }
                    SeedOutcome::LiveDeliveryStarted => {
                        warn!(
                            session = %self.id,
                            count = items.len(),
                            "history arrived after live delivery; dropping it"
                        );
                        self.history = HistoryStatus::Skipped { count: items.len() };
                    }
                    SeedOutcome::AlreadySeeded => {
                        debug!(session = %self.id, "history already seeded");
                    }
                }
            }
            Ok(Err(err)) => {
                warn!(session = %self.id, error = %err, "failed to fetch history");
                self.history = HistoryStatus::Failed;
                self.last_error = Some(err);
            }
            Err(_) => {
                debug!(session = %self.id, "history fetch abandoned");
                self.history = HistoryStatus::Failed;
            }
        }
        self.publish();
    }

    fn shutdown(&mut self, transport_reason: Option<String>) {
        self.connection.close();
        if !self.lifecycle.on_closed() {
            return;
        }

        match transport_reason {
            Some(reason) => {
                info!(
                    session = %self.id,
                    conversation = %self.conversation,
                    %reason,
                    "realtime connection closed"
                );
                self.last_error = Some(ChatError::transport_closed(reason));
            }
            None => {
                info!(session = %self.id, conversation = %self.conversation, "session closed");
            }
        }
        self.publish();
    }

    fn publish(&mut self) {
        self.publish_with(|_| {});
    }

    /// Apply `change` to the log and publish the result.
    ///
    /// The published log is released before `change` runs, so the store
    /// writes in place unless a view still holds an older snapshot.
    fn publish_with(&mut self, change: impl FnOnce(&mut MessageStore)) {
        let Self {
            inbox,
            store,
            lifecycle,
            history,
            last_error,
            ..
        } = self;
        inbox.update(|snapshot| {
            snapshot.messages = Arc::default();
            change(store);
            snapshot.state = lifecycle.state();
            snapshot.messages = store.shared();
            snapshot.history = *history;
            snapshot.live_deliveries = store.live_deliveries();
            snapshot.last_error = last_error.clone();
        });
    }
}
