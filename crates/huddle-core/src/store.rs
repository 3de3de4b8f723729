use std::{collections::VecDeque, sync::Arc};

use crate::types::Message;

/// Result of offering history to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedOutcome {
    /// History became the initial log.
    Seeded { count: usize },
    /// A previous seed already happened.
    AlreadySeeded,
    /// Live delivery started first; history was dropped.
    LiveDeliveryStarted,
}

/// Newest-first message log for one session.
///
/// History seeds it at most once; afterwards the realtime feed is the only
/// writer. Once a live message has been prepended, seeding is refused so
/// history can never reorder or overwrite what was already delivered.
///
/// The log sits behind an [`Arc`] so snapshots can share it. Writes go
/// through [`Arc::make_mut`] and only copy while an older snapshot is alive.
#[derive(Debug, Clone)]
pub struct MessageStore {
    items: Arc<VecDeque<Message>>,
    max_items: usize,
    seeded: bool,
    live_deliveries: u64,
}

impl MessageStore {
    /// Create a store keeping at most `max_items` (`>= 1`) newest messages.
    pub fn new(max_items: usize) -> Self {
        Self {
            items: Arc::default(),
            max_items: max_items.max(1),
            seeded: false,
            live_deliveries: 0,
        }
    }

    /// Insert a live message at index 0.
    pub fn prepend(&mut self, message: Message) {
        Arc::make_mut(&mut self.items).push_front(message);
        self.live_deliveries = self.live_deliveries.saturating_add(1);
        self.trim_to_max();
    }

    /// Seed from history in wire order (oldest first).
    pub fn seed_once(&mut self, history_oldest_first: Vec<Message>) -> SeedOutcome {
        if self.seeded {
            return SeedOutcome::AlreadySeeded;
        }
        if self.live_deliveries > 0 {
            return SeedOutcome::LiveDeliveryStarted;
        }

        self.seeded = true;
        let count = history_oldest_first.len();
        let mut items = history_oldest_first.into_iter().rev().collect::<VecDeque<_>>();
        items.truncate(self.max_items);
        self.items = Arc::new(items);
        SeedOutcome::Seeded { count }
    }

    pub fn live_deliveries(&self) -> u64 {
        self.live_deliveries
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Newest first.
    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.items.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Message> {
        self.items.get(index)
    }

    /// The log as published in snapshots, newest first.
    pub fn shared(&self) -> Arc<VecDeque<Message>> {
        Arc::clone(&self.items)
    }

    fn trim_to_max(&mut self) {
        if self.items.len() > self.max_items {
            Arc::make_mut(&mut self.items).truncate(self.max_items);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Participant;

    fn msg(text: &str) -> Message {
        Message::new(text, Participant::named("alice"), Some(Participant::anonymous()))
    }

    fn texts(store: &MessageStore) -> Vec<&str> {
        store.iter().map(|m| m.text.as_str()).collect()
    }

    #[test]
    fn seeds_history_newest_first() {
        let mut store = MessageStore::new(50);
        let outcome = store.seed_once(vec![msg("one"), msg("two"), msg("three")]);

        assert_eq!(outcome, SeedOutcome::Seeded { count: 3 });
        assert_eq!(texts(&store), vec!["three", "two", "one"]);
    }

    #[test]
    fn second_seed_is_a_no_op() {
        let mut store = MessageStore::new(50);
        store.seed_once(vec![msg("one")]);
        let outcome = store.seed_once(vec![msg("a"), msg("b")]);

        assert_eq!(outcome, SeedOutcome::AlreadySeeded);
        assert_eq!(store.len(), 1);
        assert_eq!(texts(&store), vec!["one"]);
    }

    #[test]
    fn prepend_puts_new_message_on_top_and_keeps_prior_order() {
        let mut store = MessageStore::new(50);
        store.seed_once(vec![msg("one"), msg("two")]);
        let before = store.shared();

        store.prepend(msg("three"));

        assert_eq!(store.len(), before.len() + 1);
        assert_eq!(store.get(0).map(|m| m.text.as_str()), Some("three"));
        assert!(store.iter().skip(1).eq(before.iter()));
    }

    #[test]
    fn prepend_writes_in_place_once_snapshots_are_released() {
        let mut store = MessageStore::new(50);
        store.seed_once(vec![msg("one")]);
        let published = Arc::as_ptr(&store.shared());

        store.prepend(msg("two"));
        assert_eq!(Arc::as_ptr(&store.shared()), published);

        let held = store.shared();
        store.prepend(msg("three"));
        assert_ne!(Arc::as_ptr(&store.shared()), Arc::as_ptr(&held));
        assert_eq!(held.len(), 2);
    }

    #[test]
    fn history_after_live_delivery_is_dropped() {
        let mut store = MessageStore::new(50);
        store.prepend(msg("live"));

        let outcome = store.seed_once(vec![msg("old")]);

        assert_eq!(outcome, SeedOutcome::LiveDeliveryStarted);
        assert_eq!(texts(&store), vec!["live"]);
        assert_eq!(
            store.seed_once(vec![msg("old")]),
            SeedOutcome::LiveDeliveryStarted
        );
    }

    #[test]
    fn trims_oldest_when_over_max_items() {
        let mut store = MessageStore::new(2);
        store.seed_once(vec![msg("one"), msg("two"), msg("three")]);
        assert_eq!(texts(&store), vec!["three", "two"]);

        store.prepend(msg("four"));
        assert_eq!(texts(&store), vec!["four", "three"]);
    }
}
