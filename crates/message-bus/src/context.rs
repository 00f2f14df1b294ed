//! Per-invocation dependency container.

use std::sync::Arc;

use unit_of_work::UnitOfWork;

use crate::error::ConfigurationError;
use crate::handler::Dependency;
use crate::pubsub::{MessageBroker, PubSubClient};

/// Application-level settings handlers may depend on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppContext {
    /// Short service name, used in log fields.
    pub name: String,
    /// Human-readable service title.
    pub title: String,
    /// Whether the service consumes messages from the broker.
    pub allow_external_event: bool,
}

impl AppContext {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            title: name.clone(),
            name,
            allow_external_event: false,
        }
    }
}

/// The dependencies one handler invocation may use.
///
/// Built by the bus for each call and holding only what the handler
/// declared. Asking for anything else returns
/// [`ConfigurationError::MissingDependency`].
pub struct HandlerContext<'a> {
    handler: &'static str,
    uow: Option<&'a mut UnitOfWork>,
    app: Option<Arc<AppContext>>,
    pubsub: Option<Arc<dyn PubSubClient>>,
    broker: Option<Arc<dyn MessageBroker>>,
}

impl<'a> HandlerContext<'a> {
    pub(crate) fn new(handler: &'static str) -> Self {
        Self {
            handler,
            uow: None,
            app: None,
            pubsub: None,
            broker: None,
        }
    }

    pub(crate) fn with_uow(mut self, uow: &'a mut UnitOfWork) -> Self {
        self.uow = Some(uow);
        self
    }

    pub(crate) fn with_app(mut self, app: Arc<AppContext>) -> Self {
        self.app = Some(app);
        self
    }

    pub(crate) fn with_pubsub(mut self, pubsub: Arc<dyn PubSubClient>) -> Self {
        self.pubsub = Some(pubsub);
        self
    }

    pub(crate) fn with_broker(mut self, broker: Arc<dyn MessageBroker>) -> Self {
        self.broker = Some(broker);
        self
    }

    fn missing(&self, dependency: Dependency) -> ConfigurationError {
        ConfigurationError::MissingDependency {
            handler: self.handler,
            dependency,
        }
    }

    /// Name of the handler this context was built for.
    pub fn handler(&self) -> &'static str {
        self.handler
    }

    pub fn uow(&mut self) -> Result<&mut UnitOfWork, ConfigurationError> {
        let handler = self.handler;
        self.uow
            .as_deref_mut()
            .ok_or(ConfigurationError::MissingDependency {
                handler,
                dependency: Dependency::UnitOfWork,
            })
    }

    pub fn app(&self) -> Result<&AppContext, ConfigurationError> {
        self.app
            .as_deref()
            .ok_or_else(|| self.missing(Dependency::App))
    }

    pub fn pubsub(&self) -> Result<Arc<dyn PubSubClient>, ConfigurationError> {
        self.pubsub
            .clone()
            .ok_or_else(|| self.missing(Dependency::PubSub))
    }

    pub fn broker(&self) -> Result<Arc<dyn MessageBroker>, ConfigurationError> {
        self.broker
            .clone()
            .ok_or_else(|| self.missing(Dependency::Broker))
    }
}
