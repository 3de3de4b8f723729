use crate::{
    types::{ConversationKind, ConversationRef, Message, Participant},
    wire::{WireMessage, WireParticipant},
};

/// Session facts the normalizer needs to fill in missing receivers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizeContext {
    kind: ConversationKind,
    other_participant: Option<Participant>,
}

impl NormalizeContext {
    pub fn new(conversation: ConversationRef, other_participant: Option<Participant>) -> Self {
        Self {
            kind: conversation.kind(),
            other_participant,
        }
    }

    fn fallback_receiver(&self) -> Participant {
        match (self.kind, &self.other_participant) {
            (ConversationKind::Dm, Some(other)) => other.clone(),
            _ => Participant::anonymous(),
        }
    }
}

/// Map a raw history item or realtime frame to the canonical [`Message`].
///
/// Total: malformed input degrades to empty text and anonymous participants.
pub fn normalize_message(wire: &WireMessage, context: &NormalizeContext) -> Message {
    let sender = match &wire.sender {
        WireParticipant::Structured(participant) => participant.clone(),
        WireParticipant::Bare(username) => Participant::named(username.clone()),
        WireParticipant::Missing => Participant::anonymous(),
    };

    let receiver = match &wire.receiver {
        WireParticipant::Structured(participant) => participant.clone(),
        WireParticipant::Bare(_) | WireParticipant::Missing => context.fallback_receiver(),
    };

    Message {
        text: wire.text.clone().unwrap_or_default(),
        sender,
        receiver: Some(receiver),
    }
}

/// Normalize a history batch, keeping wire order.
pub fn normalize_history(items: &[WireMessage], context: &NormalizeContext) -> Vec<Message> {
    items
        .iter()
        .map(|item| normalize_message(item, context))
        .collect()
}
