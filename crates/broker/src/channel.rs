//! External message routing.

use std::collections::BTreeMap;
use std::sync::Arc;

use common::{Command, Event, Message};
use futures_util::StreamExt;
use message_bus::{ChannelStream, MessageBroker, MessageBus, MessageStream, PubSubClient};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::error::{BrokerError, Result};

/// Turns a payload received on a channel into a bus message.
pub type Decoder =
    Arc<dyn Fn(Value) -> std::result::Result<Message, serde_json::Error> + Send + Sync>;

/// A [`MessageBroker`] that also routes inbound channel traffic to the bus.
///
/// Each channel registered with [`on_external_msg`](Self::on_external_msg)
/// gets a decoder. [`listen`](Self::listen) subscribes to all of them and
/// spawns one task per channel that decodes each payload and hands it to
/// [`MessageBus::handle`].
#[derive(Clone)]
pub struct ChannelBroker {
    client: Arc<dyn PubSubClient>,
    routes: BTreeMap<String, Decoder>,
}

impl ChannelBroker {
    pub fn new(client: Arc<dyn PubSubClient>) -> Self {
        Self {
            client,
            routes: BTreeMap::new(),
        }
    }

    /// Routes payloads on `channel` through `decode`. Replaces any earlier
    /// decoder for the same channel.
    pub fn on_external_msg<F>(&mut self, channel: &str, decode: F) -> &mut Self
    where
        F: Fn(Value) -> std::result::Result<Message, serde_json::Error> + Send + Sync + 'static,
    {
        tracing::debug!(channel, "registered external channel");
        self.routes.insert(channel.to_string(), Arc::new(decode));
        self
    }

    /// Accepts command `C` as JSON on the channel named after it.
    pub fn on_external_command<C>(&mut self) -> &mut Self
    where
        C: Command + DeserializeOwned,
    {
        self.on_external_msg(C::NAME, |payload| {
            Ok(Message::command(serde_json::from_value::<C>(payload)?))
        })
    }

    /// Accepts event `E` as JSON on the channel named after it.
    pub fn on_external_event<E>(&mut self) -> &mut Self
    where
        E: Event + DeserializeOwned,
    {
        self.on_external_msg(E::NAME, |payload| {
            Ok(Message::event(serde_json::from_value::<E>(payload)?))
        })
    }

    /// Registered channel names, sorted.
    pub fn channels(&self) -> Vec<&str> {
        self.routes.keys().map(String::as_str).collect()
    }

    pub fn decode(&self, channel: &str, payload: Value) -> Result<Message> {
        let decoder = self
            .routes
            .get(channel)
            .ok_or_else(|| BrokerError::NoRoute(channel.to_string()))?;
        decoder(payload).map_err(|source| BrokerError::Decode {
            channel: channel.to_string(),
            source,
        })
    }

    /// Subscribes to every registered channel and starts one listener task
    /// per channel.
    ///
    /// Listeners stop when the client is closed or their handle is aborted.
    #[tracing::instrument(skip(self, bus))]
    pub async fn listen(&self, bus: Arc<MessageBus>) -> Result<Vec<JoinHandle<()>>> {
        let channels = self.channels();
        if channels.is_empty() {
            return Ok(Vec::new());
        }

        let subscription = self.client.subscribe_to(&channels).await?;
        let mut tasks = Vec::with_capacity(subscription.len());
        for ChannelStream { channel, stream } in subscription.into_channels() {
            let Some(decoder) = self.routes.get(&channel).cloned() else {
                tracing::warn!(%channel, "subscribed to a channel without a route");
                continue;
            };
            tasks.push(tokio::spawn(forward(Arc::clone(&bus), channel, decoder, stream)));
        }

        tracing::info!(listeners = tasks.len(), "started external message listeners");
        Ok(tasks)
    }
}

impl MessageBroker for ChannelBroker {
    fn client(&self) -> Arc<dyn PubSubClient> {
        Arc::clone(&self.client)
    }
}

impl std::fmt::Debug for ChannelBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelBroker")
            .field("channels", &self.channels())
            .finish_non_exhaustive()
    }
}

async fn forward(
    bus: Arc<MessageBus>,
    channel: String,
    decoder: Decoder,
    mut stream: MessageStream,
) {
    while let Some(received) = stream.next().await {
        let message = match decoder(received.payload) {
            Ok(message) => message,
            Err(source) => {
                let err = BrokerError::Decode {
                    channel: channel.clone(),
                    source,
                };
                metrics::counter!("broker_decode_failures_total").increment(1);
                tracing::warn!(error = %err, "dropping undecodable external message");
                continue;
            }
        };

        tracing::debug!(%channel, message = message.name(), "received external message");
        if let Err(e) = bus.handle(message).await {
            metrics::counter!("broker_external_failures_total").increment(1);
            tracing::error!(%channel, error = %e, "external message failed");
        }
    }
    tracing::info!(%channel, "listener stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryPubSub;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct Restock {
        sku: String,
        #[serde(alias = "quantity")]
        qty: u32,
    }

    impl Command for Restock {
        const NAME: &'static str = "restock";
        type Output = ();
    }

    #[derive(Debug, Deserialize)]
    struct Restocked {
        sku: String,
    }

    impl Event for Restocked {
        const NAME: &'static str = "restocked";
    }

    fn broker() -> ChannelBroker {
        let mut broker = ChannelBroker::new(Arc::new(InMemoryPubSub::default()));
        broker.on_external_command::<Restock>();
        broker
    }

    #[test]
    fn decodes_registered_commands() {
        let message = broker()
            .decode("restock", json!({ "sku": "LAMP", "quantity": 4 }))
            .unwrap();
        assert!(message.is_command());
        let restock = message.into_inner::<Restock>().unwrap();
        assert_eq!(restock.sku, "LAMP");
        assert_eq!(restock.qty, 4);
    }

    #[test]
    fn decodes_registered_events() {
        let mut broker = broker();
        broker.on_external_event::<Restocked>();

        let message = broker
            .decode("restocked", json!({ "sku": "LAMP" }))
            .unwrap();
        assert!(message.is_event());
        assert_eq!(message.name(), "restocked");
        assert_eq!(message.into_inner::<Restocked>().unwrap().sku, "LAMP");
        assert_eq!(broker.channels(), vec!["restock", "restocked"]);
    }

    #[test]
    fn unknown_channel_has_no_route() {
        let err = broker().decode("elsewhere", json!({})).unwrap_err();
        assert!(matches!(err, BrokerError::NoRoute(channel) if channel == "elsewhere"));
    }

    #[test]
    fn malformed_payload_is_a_decode_error() {
        let err = broker().decode("restock", json!({ "sku": 7 })).unwrap_err();
        assert!(matches!(err, BrokerError::Decode { channel, .. } if channel == "restock"));
    }

    #[test]
    fn channels_are_sorted() {
        let mut broker = broker();
        broker.on_external_msg("audit", |payload| {
            Ok(Message::command(serde_json::from_value::<Restock>(payload)?))
        });
        assert_eq!(broker.channels(), vec!["audit", "restock"]);
    }

    #[test]
    fn publish_goes_through_the_client() {
        let pubsub = InMemoryPubSub::default();
        let broker = ChannelBroker::new(Arc::new(pubsub.clone()));
        broker.publish("line_allocated", json!({ "orderid": "o1" }));
        assert_eq!(pubsub.published_on("line_allocated").len(), 1);
    }
}
