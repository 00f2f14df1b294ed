//! Message bus: routes commands and events to their handlers.
//!
//! A [`MessageBus`] is built explicitly, handlers are registered on it, and
//! [`MessageBus::handle`] processes one message plus every message its
//! handlers cause, in FIFO order, inside a single unit of work.

pub mod bus;
pub mod context;
pub mod error;
pub mod handler;
pub mod pubsub;
pub mod registry;
pub mod retry;

pub use bus::{Bindings, MessageBus};
pub use context::{AppContext, HandlerContext};
pub use error::{BusError, ConfigurationError, PubSubError};
pub use handler::{CommandHandler, Dependency, EventHandler, HandlerError};
pub use pubsub::{
    ChannelStream, MessageBroker, MessageStream, PubSubClient, ReceivedMessage, Subscription,
};
pub use registry::HandlerRegistry;
pub use retry::RetryPolicy;
