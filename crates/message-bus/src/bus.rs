//! The dispatch loop.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use common::{Command, Event, Message, MessageKind};
use serde_json::Value;
use unit_of_work::{UnitOfWork, UnitOfWorkFactory};

use crate::context::{AppContext, HandlerContext};
use crate::error::{ConfigurationError, Result};
use crate::handler::{CommandHandler, Dependency, EventHandler, HandlerError};
use crate::pubsub::{MessageBroker, PubSubClient};
use crate::registry::{ErasedEventHandler, HandlerRegistry, Route};
use crate::retry::RetryPolicy;

/// Collaborators the bus can inject into handlers.
#[derive(Clone, Default)]
pub struct Bindings {
    pub uow: Option<UnitOfWorkFactory>,
    pub app: Option<Arc<AppContext>>,
    pub pubsub: Option<Arc<dyn PubSubClient>>,
    pub broker: Option<Arc<dyn MessageBroker>>,
}

impl Bindings {
    /// The unit of work is always available inside `handle`, so it counts
    /// as bound.
    fn is_bound(&self, dependency: Dependency) -> bool {
        match dependency {
            Dependency::UnitOfWork => true,
            Dependency::App => self.app.is_some(),
            Dependency::PubSub => self.pubsub.is_some(),
            Dependency::Broker => self.broker.is_some(),
        }
    }
}

impl std::fmt::Debug for Bindings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bindings")
            .field("uow", &self.uow)
            .field("app", &self.app)
            .field("pubsub", &self.pubsub.is_some())
            .field("broker", &self.broker.is_some())
            .finish()
    }
}

/// Routes commands and events to their handlers.
///
/// Registration and bindings need `&mut self`; `handle` needs only `&self`,
/// so a bus shared behind an `Arc` is effectively frozen.
#[derive(Default)]
pub struct MessageBus {
    registry: HandlerRegistry,
    bindings: Bindings,
    retry: RetryPolicy,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn bindings(&self) -> &Bindings {
        &self.bindings
    }

    /// Binds the factory `handle` creates units of work from.
    pub fn bind_uow(&mut self, factory: UnitOfWorkFactory) -> &mut Self {
        self.bindings.uow = Some(factory);
        self
    }

    pub fn bind_app(&mut self, app: AppContext) -> &mut Self {
        self.bindings.app = Some(Arc::new(app));
        self
    }

    pub fn bind_pubsub(&mut self, client: Arc<dyn PubSubClient>) -> &mut Self {
        self.bindings.pubsub = Some(client);
        self
    }

    pub fn bind_broker(&mut self, broker: Arc<dyn MessageBroker>) -> &mut Self {
        self.bindings.broker = Some(broker);
        self
    }

    /// Swaps all bindings at once and returns the previous ones.
    pub fn replace_bindings(&mut self, bindings: Bindings) -> Bindings {
        std::mem::replace(&mut self.bindings, bindings)
    }

    /// Registers the single handler for command `C`.
    pub fn on_command<C, H>(
        &mut self,
        handler: H,
    ) -> std::result::Result<&mut Self, ConfigurationError>
    where
        C: Command,
        H: CommandHandler<C>,
    {
        self.registry.register_command::<C, H>(handler)?;
        Ok(self)
    }

    /// Adds a handler for event `E`.
    pub fn on_event<E, H>(&mut self, handler: H) -> &mut Self
    where
        E: Event,
        H: EventHandler<E>,
    {
        self.registry.register_event::<E, H>(handler);
        self
    }

    /// Creates a unit of work from the bound factory.
    pub fn create_uow(&self) -> std::result::Result<UnitOfWork, ConfigurationError> {
        self.bindings
            .uow
            .as_ref()
            .map(UnitOfWorkFactory::create)
            .ok_or(ConfigurationError::NoUnitOfWork)
    }

    /// Handles `message` and every message it causes, in a fresh unit of
    /// work from the bound factory.
    ///
    /// Returns the outputs of every command handled, in processing order.
    pub async fn handle(&self, message: Message) -> Result<Vec<Value>> {
        let mut uow = self.create_uow()?;
        self.handle_with(message, &mut uow).await
    }

    /// Like [`handle`](MessageBus::handle) but inside the given unit of work.
    #[tracing::instrument(
        name = "handle",
        skip(self, message, uow),
        fields(message = message.name(), message_id = %message.id())
    )]
    pub async fn handle_with(&self, message: Message, uow: &mut UnitOfWork) -> Result<Vec<Value>> {
        let started = Instant::now();
        let mut queue = VecDeque::from([message]);
        let mut results = Vec::new();

        while let Some(message) = queue.pop_front() {
            metrics::counter!("bus_messages_handled_total", "kind" => message.kind().to_string())
                .increment(1);
            match message.kind() {
                MessageKind::Event => self.handle_event(&message, uow, &mut queue).await,
                MessageKind::Command => {
                    let output = self.handle_command(message, uow, &mut queue).await?;
                    results.push(output);
                }
            }
        }

        metrics::histogram!("bus_handle_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        Ok(results)
    }

    async fn handle_command(
        &self,
        message: Message,
        uow: &mut UnitOfWork,
        queue: &mut VecDeque<Message>,
    ) -> Result<Value> {
        let name = message.name();
        let route = self
            .registry
            .command_route(message.type_id())
            .ok_or(ConfigurationError::NoCommandHandler { command: name })?;

        if let Some(dependency) = self.missing_dependency(route.dependencies) {
            return Err(ConfigurationError::MissingDependency {
                handler: route.name,
                dependency,
            }
            .into());
        }

        tracing::debug!(command = name, handler = route.name, "handling command");
        let result = {
            let mut ctx = self.context(route.name, route.dependencies, uow);
            route.handler.call(message, &mut ctx).await
        };

        match result {
            Ok(output) => {
                queue.extend(uow.collect_new_messages());
                Ok(output)
            }
            Err(e) => {
                metrics::counter!("bus_command_failures_total").increment(1);
                tracing::error!(command = name, handler = route.name, error = %e, "command failed");
                self.discard_pending(uow, route.name);
                Err(e)
            }
        }
    }

    async fn handle_event(
        &self,
        message: &Message,
        uow: &mut UnitOfWork,
        queue: &mut VecDeque<Message>,
    ) {
        let routes = self.registry.event_routes(message.type_id());
        if routes.is_empty() {
            tracing::debug!(event = message.name(), "no handlers registered for event");
        }

        for route in routes {
            if let Some(dependency) = self.missing_dependency(route.dependencies) {
                metrics::counter!("bus_event_handler_failures_total").increment(1);
                tracing::error!(
                    event = message.name(),
                    handler = route.name,
                    %dependency,
                    "skipping event handler with unbound dependency"
                );
                continue;
            }

            if let Err(e) = self.call_with_retry(route, message, uow).await {
                metrics::counter!("bus_event_handler_failures_total").increment(1);
                tracing::error!(
                    event = message.name(),
                    handler = route.name,
                    attempts = self.retry.max_attempts(),
                    error = %e,
                    "event handler failed, giving up"
                );
            }
            // A failed handler may still have committed before failing.
            queue.extend(uow.collect_new_messages());
        }
    }

    async fn call_with_retry(
        &self,
        route: &Route<dyn ErasedEventHandler>,
        message: &Message,
        uow: &mut UnitOfWork,
    ) -> std::result::Result<(), HandlerError> {
        let mut attempt = 1;
        loop {
            tracing::debug!(
                event = message.name(),
                handler = route.name,
                attempt,
                "handling event"
            );
            let result = {
                let mut ctx = self.context(route.name, route.dependencies, uow);
                route.handler.call(message, &mut ctx).await
            };

            let e = match result {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };
            self.discard_pending(uow, route.name);
            if attempt >= self.retry.max_attempts() {
                return Err(e);
            }

            let delay = self.retry.backoff(attempt);
            metrics::counter!("bus_event_handler_retries_total").increment(1);
            tracing::warn!(
                event = message.name(),
                handler = route.name,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %e,
                "event handler failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    fn missing_dependency(&self, dependencies: &[Dependency]) -> Option<Dependency> {
        dependencies
            .iter()
            .copied()
            .find(|d| !self.bindings.is_bound(*d))
    }

    fn context<'a>(
        &self,
        handler: &'static str,
        dependencies: &[Dependency],
        uow: &'a mut UnitOfWork,
    ) -> HandlerContext<'a> {
        let mut ctx = HandlerContext::new(handler);
        if dependencies.contains(&Dependency::UnitOfWork) {
            ctx = ctx.with_uow(uow);
        }
        if dependencies.contains(&Dependency::App)
            && let Some(app) = &self.bindings.app
        {
            ctx = ctx.with_app(Arc::clone(app));
        }
        if dependencies.contains(&Dependency::PubSub)
            && let Some(pubsub) = &self.bindings.pubsub
        {
            ctx = ctx.with_pubsub(Arc::clone(pubsub));
        }
        if dependencies.contains(&Dependency::Broker)
            && let Some(broker) = &self.bindings.broker
        {
            ctx = ctx.with_broker(Arc::clone(broker));
        }
        ctx
    }

    // Messages raised since the last commit describe changes that were rolled
    // back. Messages of committed transactions stay queued.
    fn discard_pending(&self, uow: &mut UnitOfWork, handler: &'static str) {
        let discarded = uow.discard_pending();
        if discarded > 0 {
            tracing::warn!(handler, discarded, "discarded messages raised by failed handler");
        }
    }
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus")
            .field("bindings", &self.bindings)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}
