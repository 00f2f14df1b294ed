//! Handler traits and dependency declarations.

use std::fmt;

use async_trait::async_trait;
use common::{Command, Event};

use crate::context::HandlerContext;

/// Error type returned by handler bodies.
///
/// Any `std::error::Error + Send + Sync` converts into it with `?`.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// A collaborator a handler can ask the bus to provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dependency {
    /// The unit of work the current `handle` call runs in.
    UnitOfWork,
    /// Application-level settings.
    App,
    /// The raw pub/sub client.
    PubSub,
    /// The message broker.
    Broker,
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dependency::UnitOfWork => write!(f, "uow"),
            Dependency::App => write!(f, "msa"),
            Dependency::PubSub => write!(f, "pubsub"),
            Dependency::Broker => write!(f, "broker"),
        }
    }
}

/// Handles one command type.
///
/// Exactly one command handler may be registered per command type. The bus
/// reads [`dependencies`](CommandHandler::dependencies) once at registration;
/// the [`HandlerContext`] passed to `handle` exposes only those.
#[async_trait]
pub trait CommandHandler<C: Command>: Send + Sync + 'static {
    /// Name used in logs and errors.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    fn dependencies(&self) -> &'static [Dependency] {
        &[]
    }

    async fn handle(
        &self,
        command: C,
        ctx: &mut HandlerContext<'_>,
    ) -> Result<C::Output, HandlerError>;
}

/// Handles one event type. Any number may be registered per event type.
///
/// A failing event handler is retried, then logged and dropped; it never
/// stops the other handlers of the same event.
#[async_trait]
pub trait EventHandler<E: Event>: Send + Sync + 'static {
    /// Name used in logs and errors.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    fn dependencies(&self) -> &'static [Dependency] {
        &[]
    }

    async fn handle(&self, event: &E, ctx: &mut HandlerContext<'_>) -> Result<(), HandlerError>;
}
