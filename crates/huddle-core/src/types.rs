use std::{collections::VecDeque, fmt, str::FromStr, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::error::{ChatError, ErrorCategory};

/// Which kind of conversation a session is bound to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    /// Public channel; messages carry no receiver.
    Channel,
    /// Direct-message group.
    Dm,
}

impl ConversationKind {
    /// Path segment used by both the REST and realtime routes.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Channel => "channel",
            Self::Dm => "dm",
        }
    }
}

/// Addressable unit of chat history and realtime delivery.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ConversationRef {
    /// A channel, by backend id.
    Channel(u64),
    /// A direct-message group, by backend id.
    Dm(u64),
}

impl ConversationRef {
    pub fn kind(&self) -> ConversationKind {
        match self {
            Self::Channel(_) => ConversationKind::Channel,
            Self::Dm(_) => ConversationKind::Dm,
        }
    }

    pub fn id(&self) -> u64 {
        match self {
            Self::Channel(id) | Self::Dm(id) => *id,
        }
    }

    pub fn is_dm(&self) -> bool {
        matches!(self, Self::Dm(_))
    }

    /// `channel/<id>` or `dm/<id>`, shared by history and socket routes.
    pub fn path_segment(&self) -> String {
        format!("{}/{}", self.kind().as_str(), self.id())
    }
}

impl fmt::Display for ConversationRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind().as_str(), self.id())
    }
}

impl FromStr for ConversationRef {
    type Err = ChatError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| {
            ChatError::new(
                ErrorCategory::Config,
                "invalid_conversation_ref",
                format!("'{value}' is not a conversation reference: {reason}"),
            )
        };

        let (kind, id) = value
            .trim()
            .split_once(':')
            .ok_or_else(|| invalid("expected '<kind>:<id>'"))?;
        let id = id
            .parse::<u64>()
            .map_err(|err| invalid(&err.to_string()))?;

        match kind {
            "channel" => Ok(Self::Channel(id)),
            "dm" => Ok(Self::Dm(id)),
            _ => Err(invalid("kind must be 'channel' or 'dm'")),
        }
    }
}

/// Minimal user identity as referenced inside a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub struct Participant {
    /// Backend user id; absent when the wire only carried a username.
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub username: String,
}

impl Participant {
    pub fn new(id: u64, username: impl Into<String>) -> Self {
        Self {
            id: Some(id),
            username: username.into(),
        }
    }

    /// Participant known only by name.
    pub fn named(username: impl Into<String>) -> Self {
        Self {
            id: None,
            username: username.into(),
        }
    }

    /// Empty participant used when nothing better is known.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Identity comparison: two participants are the same user when both ids
    /// are known and equal.
    pub fn same_identity(&self, other: &Participant) -> bool {
        matches!((self.id, other.id), (Some(a), Some(b)) if a == b)
    }
}

/// Canonical message record rendered by the conversation view.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub text: String,
    pub sender: Participant,
    /// `None` only for records that never went through the normalizer.
    pub receiver: Option<Participant>,
}

impl Message {
    pub fn new(
        text: impl Into<String>,
        sender: Participant,
        receiver: Option<Participant>,
    ) -> Self {
        Self {
            text: text.into(),
            sender,
            receiver,
        }
    }

    /// Whether `user` authored this message.
    pub fn is_from(&self, user: &Participant) -> bool {
        self.sender.same_identity(user)
    }
}

/// Frame published on the realtime connection when the user sends text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutboundEnvelope {
    pub message: String,
    pub sender: Participant,
    pub receiver: Option<Participant>,
}

/// Per-handle realtime connection lifecycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport open requested but not yet confirmed.
    Connecting,
    /// Frames are flowing.
    Open,
    /// Closed explicitly or by the transport. Terminal.
    Closed,
}

/// Outcome of the one-time history fetch for a session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum HistoryStatus {
    /// Fetch still in flight.
    Pending,
    /// History seeded the log with `count` messages.
    Seeded { count: usize },
    /// History arrived after live delivery started and was dropped.
    Skipped { count: usize },
    /// Fetch failed; the log only shows live messages.
    Failed,
}

/// Immutable view of one session published after every state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub conversation: ConversationRef,
    pub state: ConnectionState,
    /// Newest first. Shared with the session; cloning a snapshot is cheap.
    pub messages: Arc<VecDeque<Message>>,
    pub history: HistoryStatus,
    /// Total messages delivered by the realtime feed so far.
    pub live_deliveries: u64,
    pub last_error: Option<ChatError>,
}

impl SessionSnapshot {
    pub fn new(conversation: ConversationRef) -> Self {
        Self {
            conversation,
            state: ConnectionState::Connecting,
            messages: Arc::default(),
            history: HistoryStatus::Pending,
            live_deliveries: 0,
            last_error: None,
        }
    }
}

/// `GET /api/me/` payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserProfile {
    pub id: u64,
    pub username: String,
    #[serde(default)]
    pub avatar: Option<String>,
}

impl UserProfile {
    pub fn participant(&self) -> Participant {
        Participant::new(self.id, self.username.clone())
    }
}

/// Channel row for navigation lists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelSummary {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub is_chain: bool,
}

impl ChannelSummary {
    pub fn conversation(&self) -> ConversationRef {
        ConversationRef::Channel(self.id)
    }

    pub fn title(&self) -> String {
        format!("#{}", self.name)
    }
}

/// Direct-message group row for navigation lists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DmGroup {
    pub id: u64,
    #[serde(default)]
    pub participants: Vec<Participant>,
}

impl DmGroup {
    pub fn conversation(&self) -> ConversationRef {
        ConversationRef::Dm(self.id)
    }

    /// First participant that is not `me`.
    pub fn other_participant(&self, me: &Participant) -> Option<Participant> {
        let my_id = me.id?;
        self.participants
            .iter()
            .find(|p| p.id != Some(my_id))
            .cloned()
    }

    /// Header text: the other user for 1:1 groups, comma-joined names otherwise.
    pub fn display_name(&self, me: &Participant) -> String {
        const FALLBACK: &str = "DM";

        let Some(my_id) = me.id else {
            return FALLBACK.to_owned();
        };
        let others = self
            .participants
            .iter()
            .filter(|p| p.id != Some(my_id))
            .map(|p| p.username.as_str())
            .collect::<Vec<_>>();

        if self.participants.len() == 2 {
            return others
                .first()
                .map(|name| (*name).to_owned())
                .unwrap_or_else(|| FALLBACK.to_owned());
        }
        if others.is_empty() {
            FALLBACK.to_owned()
        } else {
            others.join(", ")
        }
    }
}

/// Everything the home screen lists. Each list degrades to empty on failure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Directory {
    pub channels: Vec<ChannelSummary>,
    pub chain_channels: Vec<ChannelSummary>,
    pub dm_groups: Vec<DmGroup>,
    pub users: Vec<Participant>,
}

impl Directory {
    /// Case-insensitive name filter over channels and chain channels.
    pub fn search_channels(&self, query: &str) -> Vec<&ChannelSummary> {
        let needle = query.to_lowercase();
        self.channels
            .iter()
            .chain(self.chain_channels.iter())
            .filter(|channel| channel.name.to_lowercase().contains(&needle))
            .collect()
    }

    pub fn dm_group(&self, id: u64) -> Option<&DmGroup> {
        self.dm_groups.iter().find(|group| group.id == id)
    }

    pub fn channel(&self, id: u64) -> Option<&ChannelSummary> {
        self.channels
            .iter()
            .chain(self.chain_channels.iter())
            .find(|channel| channel.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(participants: Vec<Participant>) -> DmGroup {
        DmGroup {
            id: 7,
            participants,
        }
    }

    #[test]
    fn parses_and_formats_conversation_refs() {
        let channel: ConversationRef = "channel:12".parse().expect("channel ref should parse");
        let dm: ConversationRef = "dm:3".parse().expect("dm ref should parse");

        assert_eq!(channel, ConversationRef::Channel(12));
        assert_eq!(dm, ConversationRef::Dm(3));
        assert_eq!(channel.to_string(), "channel:12");
        assert_eq!(dm.path_segment(), "dm/3");
    }

    #[test]
    fn rejects_unknown_conversation_kinds() {
        let err = "room:1"
            .parse::<ConversationRef>()
            .expect_err("unknown kind must fail");
        assert_eq!(err.code, "invalid_conversation_ref");

        let err = "dm:abc"
            .parse::<ConversationRef>()
            .expect_err("non numeric id must fail");
        assert_eq!(err.code, "invalid_conversation_ref");
    }

    #[test]
    fn identity_requires_both_ids() {
        let alice = Participant::new(1, "alice");
        let alice_renamed = Participant::new(1, "alice2");
        let bare = Participant::named("alice");

        assert!(alice.same_identity(&alice_renamed));
        assert!(!alice.same_identity(&bare));
        assert!(!bare.same_identity(&bare.clone()));
    }

    #[test]
    fn resolves_other_participant_in_dm_group() {
        let me = Participant::new(1, "alice");
        let dm = group(vec![me.clone(), Participant::new(2, "bob")]);

        assert_eq!(dm.other_participant(&me), Some(Participant::new(2, "bob")));
        assert_eq!(dm.other_participant(&Participant::anonymous()), None);
    }

    #[test]
    fn names_one_to_one_and_group_dms() {
        let me = Participant::new(1, "alice");
        let pair = group(vec![me.clone(), Participant::new(2, "bob")]);
        let trio = group(vec![
            me.clone(),
            Participant::new(2, "bob"),
            Participant::new(3, "carol"),
        ]);
        let alone = group(vec![me.clone()]);

        assert_eq!(pair.display_name(&me), "bob");
        assert_eq!(trio.display_name(&me), "bob, carol");
        assert_eq!(alone.display_name(&me), "DM");
        assert_eq!(pair.display_name(&Participant::anonymous()), "DM");
    }

    #[test]
    fn searches_channels_and_chain_channels_case_insensitively() {
        let directory = Directory {
            channels: vec![ChannelSummary {
                id: 1,
                name: "General".into(),
                is_chain: false,
            }],
            chain_channels: vec![ChannelSummary {
                id: 2,
                name: "general-chain".into(),
                is_chain: true,
            }],
            ..Directory::default()
        };

        let hits = directory.search_channels("GEN");
        assert_eq!(hits.len(), 2);
        assert!(directory.search_channels("random").is_empty());
        assert_eq!(directory.channel(2).map(|c| c.title()), Some("#general-chain".to_owned()));
    }

    #[test]
    fn finds_dm_group_by_id() {
        let me = Participant::new(1, "alice");
        let directory = Directory {
            dm_groups: vec![group(vec![me.clone(), Participant::new(2, "bob")])],
            ..Directory::default()
        };

        let dm = directory.dm_group(7).expect("group 7 is listed");
        assert_eq!(dm.display_name(&me), "bob");
        assert!(directory.dm_group(8).is_none());
    }
}
