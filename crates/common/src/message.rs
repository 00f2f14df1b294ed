//! The command/event message model.

use std::any::{Any, TypeId};
use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use uuid::Uuid;

/// Identifies one message instance in log lines and spans.
///
/// Every `Message` gets a fresh id, so two messages with equal payloads are
/// still told apart. Displays as 32 lowercase hex digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl FromStr for MessageId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// A request to change state, handled by exactly one handler.
///
/// `Output` is whatever the handler returns on success. The bus serializes it
/// into the result list returned to the caller.
pub trait Command: fmt::Debug + Send + Sync + 'static {
    /// Stable name used in logs, metrics, and as the external channel name.
    const NAME: &'static str;

    /// Value produced by the command's handler.
    type Output: Serialize + Send + 'static;
}

/// A fact that already happened, handled by zero or more handlers.
pub trait Event: fmt::Debug + Send + Sync + 'static {
    /// Stable name used in logs, metrics, and as the external channel name.
    const NAME: &'static str;
}

/// Discriminates the two message variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Command,
    Event,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Command => write!(f, "command"),
            MessageKind::Event => write!(f, "event"),
        }
    }
}

trait Payload: Any + fmt::Debug + Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;
}

impl<T: Any + fmt::Debug + Send + Sync> Payload for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}

/// A command or an event, with its concrete type erased.
///
/// A `Message` can only be built from a [`Command`] or an [`Event`], so every
/// value on the bus is exactly one of the two. Handlers get their typed
/// payload back through [`Message::downcast_ref`] or [`Message::into_inner`].
pub struct Message {
    id: MessageId,
    kind: MessageKind,
    name: &'static str,
    type_id: TypeId,
    payload: Box<dyn Payload>,
}

impl Message {
    /// Wraps a command.
    pub fn command<C: Command>(command: C) -> Self {
        Self {
            id: MessageId::generate(),
            kind: MessageKind::Command,
            name: C::NAME,
            type_id: TypeId::of::<C>(),
            payload: Box::new(command),
        }
    }

    /// Wraps an event.
    pub fn event<E: Event>(event: E) -> Self {
        Self {
            id: MessageId::generate(),
            kind: MessageKind::Event,
            name: E::NAME,
            type_id: TypeId::of::<E>(),
            payload: Box::new(event),
        }
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// The `NAME` of the wrapped command or event type.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Routing key: the `TypeId` of the wrapped payload.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn is_command(&self) -> bool {
        self.kind == MessageKind::Command
    }

    pub fn is_event(&self) -> bool {
        self.kind == MessageKind::Event
    }

    /// Returns true if the payload is a `T`.
    pub fn is<T: Any>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }

    /// Borrows the payload as a `T`, if that is what it holds.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        <dyn Payload as Payload>::as_any(&*self.payload).downcast_ref::<T>()
    }

    /// Unwraps the payload as a `T`, if that is what it holds.
    pub fn into_inner<T: Any>(self) -> Option<T> {
        if !self.is::<T>() {
            return None;
        }
        <dyn Payload as Payload>::into_any(self.payload)
            .downcast::<T>()
            .ok()
            .map(|payload| *payload)
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("payload", &self.payload)
            .finish()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.kind, self.name, self.id)
    }
}
