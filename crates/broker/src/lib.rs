//! Pub/sub plumbing around the message bus.
//!
//! [`InMemoryPubSub`] is a [`PubSubClient`](message_bus::PubSubClient) backed
//! by tokio broadcast channels. [`ChannelBroker`] decodes payloads arriving on
//! subscribed channels into bus messages and feeds them to
//! [`MessageBus::handle`](message_bus::MessageBus::handle).

pub mod channel;
pub mod error;
pub mod memory;

pub use channel::{ChannelBroker, Decoder};
pub use error::{BrokerError, Result};
pub use memory::InMemoryPubSub;
