//! Terminal-facing reducer: turns session snapshots into printable updates.

use huddle_core::{
    ConnectionState, HistoryStatus, Message, Participant, SessionSnapshot,
};
use tracing::trace;

const UNKNOWN_SENDER: &str = "unknown";

/// One rendered message row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageView {
    pub sender: String,
    pub body: String,
    pub is_own: bool,
}

/// Something the terminal should print.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewUpdate {
    Status(String),
    /// Seeded history, oldest first.
    History(Vec<MessageView>),
    Message(MessageView),
    Error(String),
}

/// Tracks what has already been printed for one session.
#[derive(Debug, Clone)]
pub struct ChatView {
    title: String,
    me: Participant,
    state: Option<ConnectionState>,
    history: HistoryStatus,
    rendered_live: u64,
    last_error: Option<String>,
}

impl ChatView {
    pub fn new(title: impl Into<String>, me: Participant) -> Self {
        Self {
            title: title.into(),
            me,
            state: None,
            history: HistoryStatus::Pending,
            rendered_live: 0,
            last_error: None,
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// Diff `snapshot` against what was printed so far.
    pub fn apply(&mut self, snapshot: &SessionSnapshot) -> Vec<ViewUpdate> {
        let mut updates = Vec::new();

        if self.state != Some(snapshot.state) {
            self.state = Some(snapshot.state);
            updates.push(ViewUpdate::Status(state_label(snapshot.state).to_owned()));
        }

        let new_live = snapshot.live_deliveries.saturating_sub(self.rendered_live);
        let new_live = usize::try_from(new_live)
            .unwrap_or(usize::MAX)
            .min(snapshot.messages.len());

        if self.history != snapshot.history {
            self.history = snapshot.history;
            match snapshot.history {
                HistoryStatus::Seeded { count } => {
                    let end = (new_live + count).min(snapshot.messages.len());
                    let rows = snapshot
                        .messages
                        .range(new_live..end)
                        .rev()
                        .map(|message| self.message_view(message))
                        .collect::<Vec<_>>();
                    updates.push(ViewUpdate::History(rows));
                }
                HistoryStatus::Skipped { count } => {
                    updates.push(ViewUpdate::Status(format!(
                        "skipped {count} history messages that arrived after live traffic"
                    )));
                }
                HistoryStatus::Failed => {
                    updates.push(ViewUpdate::Error("could not load history".to_owned()));
                }
                HistoryStatus::Pending => {}
            }
        }

        for message in snapshot.messages.range(..new_live).rev() {
            updates.push(ViewUpdate::Message(self.message_view(message)));
        }
        self.rendered_live = snapshot.live_deliveries;

        let error_text = snapshot.last_error.as_ref().map(|err| err.message.clone());
        if error_text != self.last_error {
            if let Some(text) = &error_text {
                updates.push(ViewUpdate::Error(text.clone()));
            }
            self.last_error = error_text;
        }

        trace!(title = %self.title, updates = updates.len(), "chat view applied snapshot");
        updates
    }

    fn message_view(&self, message: &Message) -> MessageView {
        let sender = if message.sender.username.is_empty() {
            UNKNOWN_SENDER.to_owned()
        } else {
            message.sender.username.clone()
        };
        MessageView {
            sender,
            body: message.text.clone(),
            is_own: message.is_from(&self.me),
        }
    }
}

fn state_label(state: ConnectionState) -> &'static str {
    match state {
        ConnectionState::Connecting => "connecting",
        ConnectionState::Open => "connected",
        ConnectionState::Closed => "disconnected",
    }
}
