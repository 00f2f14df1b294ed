//! Pub/sub collaborator traits.
//!
//! The bus never talks to a broker's wire protocol; it consumes these traits
//! and leaves the transport to an implementation.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_core::Stream;
use serde::Serialize;
use serde_json::Value;

use crate::error::PubSubError;

/// A payload received on a subscribed channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedMessage {
    pub channel: String,
    pub payload: Value,
}

/// Stream of messages arriving on one channel. Ends when the client closes.
pub type MessageStream = Pin<Box<dyn Stream<Item = ReceivedMessage> + Send>>;

/// One subscribed channel and its message stream.
pub struct ChannelStream {
    pub channel: String,
    pub stream: MessageStream,
}

impl fmt::Debug for ChannelStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelStream")
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

/// The channels returned by [`PubSubClient::subscribe_to`].
#[derive(Debug, Default)]
pub struct Subscription {
    channels: Vec<ChannelStream>,
}

impl Subscription {
    pub fn new(channels: Vec<ChannelStream>) -> Self {
        Self { channels }
    }

    pub fn channel_names(&self) -> Vec<&str> {
        self.channels.iter().map(|c| c.channel.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn into_channels(self) -> Vec<ChannelStream> {
        self.channels
    }
}

/// Client of an external publish/subscribe transport.
#[async_trait]
pub trait PubSubClient: Send + Sync {
    /// Subscribes to every channel in `channels`, one stream per channel.
    async fn subscribe_to(&self, channels: &[&str]) -> Result<Subscription, PubSubError>;

    /// Publishes a JSON payload and waits for the transport to accept it.
    async fn publish_message(&self, channel: &str, payload: Value) -> Result<(), PubSubError>;

    /// Publishes without waiting. Failures are logged, not returned.
    fn publish_message_sync(&self, channel: &str, payload: Value);

    /// Stops delivering messages; open streams end.
    fn close(&self);

    /// Resolves once the client has been closed.
    async fn wait_closed(&self);
}

/// The broker handlers publish through.
pub trait MessageBroker: Send + Sync {
    fn client(&self) -> Arc<dyn PubSubClient>;

    /// Fire-and-forget publish of an already serialized payload.
    fn publish(&self, channel: &str, payload: Value) {
        self.client().publish_message_sync(channel, payload);
    }
}

/// Serializes `message` for publishing.
pub fn to_payload<T: Serialize>(message: &T) -> Result<Value, PubSubError> {
    Ok(serde_json::to_value(message)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Allocated {
        orderid: String,
        qty: u32,
    }

    #[test]
    fn to_payload_serializes_fields() {
        let payload = to_payload(&Allocated {
            orderid: "o1".to_string(),
            qty: 3,
        })
        .unwrap();
        assert_eq!(payload["orderid"], "o1");
        assert_eq!(payload["qty"], 3);
    }

    #[test]
    fn empty_subscription_has_no_channels() {
        let subscription = Subscription::default();
        assert!(subscription.is_empty());
        assert!(subscription.channel_names().is_empty());
    }
}
