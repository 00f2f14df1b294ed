//! Shared types for the message bus workspace.
//!
//! Every crate above this one speaks in terms of [`Message`]: a sealed
//! union of [`Command`] and [`Event`] values that the bus can route by type
//! without knowing the concrete domain.

pub mod message;

pub use message::{Command, Event, Message, MessageId, MessageKind};
