//! Application wiring.

use std::sync::Arc;

use allocation::{ChangeBatchQuantity, InMemoryNotifications, register_handlers};
use broker::{ChannelBroker, InMemoryPubSub};
use message_bus::{MessageBus, PubSubClient};
use tokio::task::JoinHandle;
use unit_of_work::InMemoryStore;

use crate::config::Config;
use crate::error::ServiceError;

/// The allocation service with every dependency bound to its bus.
pub struct Application {
    config: Config,
    store: InMemoryStore,
    pubsub: InMemoryPubSub,
    notifications: InMemoryNotifications,
    broker: ChannelBroker,
    bus: Arc<MessageBus>,
    listeners: Vec<JoinHandle<()>>,
}

impl Application {
    /// Builds the bus and registers the allocation handlers.
    ///
    /// `ChangeBatchQuantity` is accepted from the broker on the channel of the
    /// same name once [`start`](Self::start) runs with external events allowed.
    pub fn build(config: Config) -> Result<Self, ServiceError> {
        let store = InMemoryStore::new();
        let pubsub = InMemoryPubSub::new(config.pubsub_capacity);
        let notifications = InMemoryNotifications::new();

        let mut broker = ChannelBroker::new(Arc::new(pubsub.clone()));
        broker.on_external_command::<ChangeBatchQuantity>();

        let mut bus = MessageBus::new().with_retry_policy(config.retry_policy());
        bus.bind_uow(allocation::unit_of_work_factory(Arc::new(store.clone())))
            .bind_app(config.app_context())
            .bind_pubsub(Arc::new(pubsub.clone()))
            .bind_broker(Arc::new(broker.clone()));
        register_handlers(&mut bus, Arc::new(notifications.clone()))?;

        tracing::info!(
            service = %config.service_name,
            external_channels = ?broker.channels(),
            "application built"
        );
        Ok(Self {
            config,
            store,
            pubsub,
            notifications,
            broker,
            bus: Arc::new(bus),
            listeners: Vec::new(),
        })
    }

    /// Starts the external message listeners if the configuration allows
    /// external events. Calling it again is a no-op.
    pub async fn start(&mut self) -> Result<(), ServiceError> {
        if !self.config.allow_external_event {
            tracing::info!("external events disabled, not listening");
            return Ok(());
        }
        if !self.listeners.is_empty() {
            return Ok(());
        }
        self.listeners = self.broker.listen(Arc::clone(&self.bus)).await?;
        Ok(())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    pub fn store(&self) -> &InMemoryStore {
        &self.store
    }

    pub fn pubsub(&self) -> &InMemoryPubSub {
        &self.pubsub
    }

    pub fn notifications(&self) -> &InMemoryNotifications {
        &self.notifications
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Stops the listeners and closes the pub/sub client.
    #[tracing::instrument(skip(self), fields(service = %self.config.service_name))]
    pub async fn shutdown(self) {
        for listener in &self.listeners {
            listener.abort();
        }
        for listener in self.listeners {
            if let Err(e) = listener.await
                && !e.is_cancelled()
            {
                tracing::error!(error = %e, "listener panicked");
            }
        }

        self.pubsub.close();
        self.pubsub.wait_closed().await;
        tracing::info!("application shut down");
    }
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("config", &self.config)
            .field("broker", &self.broker)
            .field("listeners", &self.listeners.len())
            .finish_non_exhaustive()
    }
}
