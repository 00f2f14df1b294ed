use thiserror::Error;
use unit_of_work::UnitOfWorkError;

use crate::handler::{Dependency, HandlerError};

/// Mistakes in how the bus was set up. These surface immediately and are
/// never retried.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// `handle` was called without a bound unit of work factory.
    #[error("No unit of work is bound to the message bus")]
    NoUnitOfWork,

    /// A command arrived for which no handler is registered.
    #[error("No handler registered for command {command}")]
    NoCommandHandler { command: &'static str },

    /// A second handler was registered for the same command type.
    #[error("Handler already registered for command {command}")]
    DuplicateCommandHandler { command: &'static str },

    /// A handler declared a dependency the bus has no binding for.
    #[error("Handler {handler} requires {dependency}, which is not bound")]
    MissingDependency {
        handler: &'static str,
        dependency: Dependency,
    },
}

/// Errors returned by [`MessageBus::handle`](crate::MessageBus::handle).
#[derive(Debug, Error)]
pub enum BusError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// A command handler failed. The original error is kept as the source
    /// and can be recovered with [`BusError::handler_error`].
    #[error("Handler {handler} failed on {message}: {source}")]
    Handler {
        handler: &'static str,
        message: &'static str,
        #[source]
        source: HandlerError,
    },

    /// The routed payload was not of the type the handler was registered for.
    #[error("Message {message} does not match the type of its handler")]
    TypeMismatch { message: &'static str },

    /// A command output could not be serialized into the result list.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unit of work error: {0}")]
    UnitOfWork(#[from] UnitOfWorkError),
}

impl BusError {
    /// Returns the handler's own error if it is a `T`.
    pub fn handler_error<T: std::error::Error + 'static>(&self) -> Option<&T> {
        match self {
            BusError::Handler { source, .. } => source.downcast_ref::<T>(),
            _ => None,
        }
    }
}

/// Errors raised by a pub/sub client.
#[derive(Debug, Error)]
pub enum PubSubError {
    /// The client was closed.
    #[error("Pub/sub client is closed")]
    Closed,

    #[error("Publish to {channel} failed: {reason}")]
    Publish { channel: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;
