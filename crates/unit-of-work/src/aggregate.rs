//! Entity and aggregate traits, and the per-aggregate message queue.

use std::collections::VecDeque;
use std::fmt;
use std::hash::Hash;

use common::{Command, Event, Message};
use serde::{Serialize, de::DeserializeOwned};

/// Anything with a unique identifier.
pub trait Entity {
    /// Identifier type. Its `Display` form is the storage key.
    type Id: Clone + Eq + Hash + fmt::Display + fmt::Debug + Send + Sync + 'static;

    fn id(&self) -> &Self::Id;
}

/// A typed set of finders an aggregate's repository may serve.
///
/// Implemented by an enum per aggregate, one variant per `find` query.
pub trait Lookup: fmt::Debug + Send + Sync + 'static {
    /// Finder name, reported when a backend does not serve it.
    fn name(&self) -> &'static str;
}

/// Lookup type for aggregates that are only ever loaded by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoLookup {}

impl Lookup for NoLookup {
    fn name(&self) -> &'static str {
        match *self {}
    }
}

/// Trait for aggregate roots.
///
/// An aggregate is the consistency boundary the unit of work loads, mutates
/// and persists as a whole. While handling a message it records follow-up
/// commands and events in its [`PendingMessages`] queue; the bus pops them
/// after the handler commits.
///
/// Aggregates are stored as JSON rows, so the queue field must be marked
/// `#[serde(skip)]`.
pub trait Aggregate: Entity + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Child entity type owned by this aggregate.
    type Item: Entity;

    /// Finders the aggregate's repository can be asked for.
    type Lookup: Lookup;

    /// Returns the aggregate type name.
    ///
    /// Used as the storage table name and in error messages.
    fn aggregate_type() -> &'static str;

    /// Child entities, in the aggregate's own order.
    fn items(&self) -> &[Self::Item];

    fn messages(&self) -> &PendingMessages;

    fn messages_mut(&mut self) -> &mut PendingMessages;

    /// Queues a message for the bus to pick up after commit.
    fn add_message(&mut self, message: Message) {
        self.messages_mut().push(message);
    }

    /// Queues an event.
    fn raise<E: Event>(&mut self, event: E) {
        self.add_message(Message::event(event));
    }

    /// Queues a command.
    fn request<C: Command>(&mut self, command: C) {
        self.add_message(Message::command(command));
    }
}

/// FIFO queue of messages an aggregate raised and the bus has not yet taken.
#[derive(Debug, Default)]
pub struct PendingMessages {
    queue: VecDeque<Message>,
}

impl PendingMessages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: Message) {
        self.queue.push_back(message);
    }

    /// Removes and returns the oldest message.
    pub fn pop(&mut self) -> Option<Message> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Names of the queued messages, oldest first.
    pub fn names(&self) -> Vec<&'static str> {
        self.queue.iter().map(Message::name).collect()
    }

    /// Pops messages front-first as the iterator is advanced.
    ///
    /// Messages the iterator never reaches stay queued.
    pub fn drain(&mut self) -> impl Iterator<Item = Message> + Send + '_ {
        std::iter::from_fn(move || self.queue.pop_front())
    }

    /// Moves every message of `other` to the back of this queue.
    pub fn append(&mut self, other: &mut PendingMessages) {
        self.queue.append(&mut other.queue);
    }

    /// Moves every message of `earlier` to the front of this queue.
    pub fn prepend(&mut self, mut earlier: PendingMessages) {
        earlier.queue.append(&mut self.queue);
        self.queue = earlier.queue;
    }

    /// Drops all queued messages and returns how many there were.
    pub fn clear(&mut self) -> usize {
        let count = self.queue.len();
        self.queue.clear();
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Noted(u32);

    impl Event for Noted {
        const NAME: &'static str = "Noted";
    }

    fn noted(n: u32) -> Message {
        Message::event(Noted(n))
    }

    fn values(queue: &mut PendingMessages) -> Vec<u32> {
        queue
            .drain()
            .map(|m| m.into_inner::<Noted>().unwrap().0)
            .collect()
    }

    #[test]
    fn drain_pops_in_fifo_order() {
        let mut queue = PendingMessages::new();
        queue.push(noted(1));
        queue.push(noted(2));
        queue.push(noted(3));

        assert_eq!(values(&mut queue), vec![1, 2, 3]);
        assert!(queue.is_empty());
    }

    #[test]
    fn abandoned_drain_keeps_unread_messages() {
        let mut queue = PendingMessages::new();
        queue.push(noted(1));
        queue.push(noted(2));

        let first = queue.drain().next();
        assert!(first.is_some());
        assert_eq!(queue.len(), 1);
        assert_eq!(values(&mut queue), vec![2]);
    }

    #[test]
    fn prepend_keeps_earlier_messages_first() {
        let mut earlier = PendingMessages::new();
        earlier.push(noted(1));
        let mut queue = PendingMessages::new();
        queue.push(noted(2));

        queue.prepend(earlier);
        assert_eq!(values(&mut queue), vec![1, 2]);
    }

    #[test]
    fn clear_reports_dropped_count() {
        let mut queue = PendingMessages::new();
        queue.push(noted(1));
        queue.push(noted(2));
        assert_eq!(queue.names(), vec!["Noted", "Noted"]);
        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
    }
}
