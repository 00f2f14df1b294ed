//! In-process pub/sub client.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures_util::StreamExt;
use message_bus::{
    ChannelStream, MessageStream, PubSubClient, PubSubError, ReceivedMessage, Subscription,
};
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

/// Per-channel buffer size used by [`InMemoryPubSub::default`].
pub const DEFAULT_CAPACITY: usize = 256;

#[derive(Default)]
struct State {
    channels: HashMap<String, broadcast::Sender<Value>>,
    // The last `capacity` published messages, oldest first.
    published: VecDeque<ReceivedMessage>,
}

struct Inner {
    capacity: usize,
    state: Mutex<State>,
    closed: watch::Sender<bool>,
}

/// A [`PubSubClient`] that delivers within the process.
///
/// Each channel is a tokio broadcast channel, so every subscriber sees every
/// message published after it subscribed. A subscriber that falls more than
/// `capacity` messages behind loses the oldest ones. The last `capacity`
/// published messages are also kept in a history for inspection.
///
/// Clones share the same channels.
#[derive(Clone)]
pub struct InMemoryPubSub {
    inner: Arc<Inner>,
}

impl InMemoryPubSub {
    pub fn new(capacity: usize) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                capacity: capacity.max(1),
                state: Mutex::new(State::default()),
                closed,
            }),
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.closed.borrow()
    }

    /// The most recently published messages, oldest first.
    pub fn published(&self) -> Vec<ReceivedMessage> {
        self.state().published.iter().cloned().collect()
    }

    /// Payloads published on `channel`, oldest first.
    pub fn published_on(&self, channel: &str) -> Vec<Value> {
        self.state()
            .published
            .iter()
            .filter(|m| m.channel == channel)
            .map(|m| m.payload.clone())
            .collect()
    }

    /// Number of open streams on `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.state()
            .channels
            .get(channel)
            .map_or(0, broadcast::Sender::receiver_count)
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn subscribe(&self, channels: &[&str]) -> Result<Subscription, PubSubError> {
        if self.is_closed() {
            return Err(PubSubError::Closed);
        }

        let capacity = self.inner.capacity;
        let mut state = self.state();
        let streams = channels
            .iter()
            .map(|channel| {
                let receiver = state
                    .channels
                    .entry(channel.to_string())
                    .or_insert_with(|| broadcast::channel(capacity).0)
                    .subscribe();
                ChannelStream {
                    channel: channel.to_string(),
                    stream: message_stream(channel, receiver),
                }
            })
            .collect();
        Ok(Subscription::new(streams))
    }

    /// Records and broadcasts `payload`, returning how many streams got it.
    fn deliver(&self, channel: &str, payload: Value) -> Result<usize, PubSubError> {
        if self.is_closed() {
            return Err(PubSubError::Closed);
        }

        let mut state = self.state();
        if state.published.len() == self.inner.capacity {
            state.published.pop_front();
        }
        state.published.push_back(ReceivedMessage {
            channel: channel.to_string(),
            payload: payload.clone(),
        });
        // No subscribers is not an error; the message is simply not delivered.
        let receivers = state
            .channels
            .get(channel)
            .map_or(0, |sender| sender.send(payload).unwrap_or(0));
        tracing::debug!(channel, receivers, "published message");
        Ok(receivers)
    }
}

impl Default for InMemoryPubSub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl std::fmt::Debug for InMemoryPubSub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryPubSub")
            .field("capacity", &self.inner.capacity)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

fn message_stream(channel: &str, receiver: broadcast::Receiver<Value>) -> MessageStream {
    let channel = channel.to_string();
    let stream = BroadcastStream::new(receiver).filter_map(move |item| {
        let channel = channel.clone();
        async move {
            match item {
                Ok(payload) => Some(ReceivedMessage { channel, payload }),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    tracing::warn!(%channel, skipped, "subscriber lagged, messages dropped");
                    None
                }
            }
        }
    });
    Box::pin(stream)
}

#[async_trait]
impl PubSubClient for InMemoryPubSub {
    async fn subscribe_to(&self, channels: &[&str]) -> Result<Subscription, PubSubError> {
        let subscription = self.subscribe(channels)?;
        tracing::info!(channels = ?channels, "subscribed");
        Ok(subscription)
    }

    async fn publish_message(&self, channel: &str, payload: Value) -> Result<(), PubSubError> {
        self.deliver(channel, payload).map(|_| ())
    }

    fn publish_message_sync(&self, channel: &str, payload: Value) {
        if let Err(e) = self.deliver(channel, payload) {
            tracing::warn!(channel, error = %e, "dropping message");
        }
    }

    fn close(&self) {
        if self.inner.closed.send_replace(true) {
            return;
        }
        // Dropping the senders ends every open stream.
        let channels = {
            let mut state = self.state();
            let count = state.channels.len();
            state.channels.clear();
            count
        };
        tracing::info!(channels, "pub/sub client closed");
    }

    async fn wait_closed(&self) {
        let mut closed = self.inner.closed.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = closed.wait_for(|closed| *closed).await;
    }
}
