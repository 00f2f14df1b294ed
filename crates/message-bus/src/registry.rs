//! Type-keyed handler registry.

use std::any::TypeId;
use std::collections::HashMap;
use std::marker::PhantomData;

use async_trait::async_trait;
use common::{Command, Event, Message};
use serde_json::Value;

use crate::context::HandlerContext;
use crate::error::{BusError, ConfigurationError};
use crate::handler::{CommandHandler, Dependency, EventHandler, HandlerError};

#[async_trait]
pub(crate) trait ErasedCommandHandler: Send + Sync {
    async fn call(
        &self,
        message: Message,
        ctx: &mut HandlerContext<'_>,
    ) -> Result<Value, BusError>;
}

struct CommandAdapter<C, H> {
    handler: H,
    _command: PhantomData<fn(C)>,
}

#[async_trait]
impl<C, H> ErasedCommandHandler for CommandAdapter<C, H>
where
    C: Command,
    H: CommandHandler<C>,
{
    async fn call(
        &self,
        message: Message,
        ctx: &mut HandlerContext<'_>,
    ) -> Result<Value, BusError> {
        let command = message
            .into_inner::<C>()
            .ok_or(BusError::TypeMismatch { message: C::NAME })?;
        let output = self
            .handler
            .handle(command, ctx)
            .await
            .map_err(|source| BusError::Handler {
                handler: self.handler.name(),
                message: C::NAME,
                source,
            })?;
        Ok(serde_json::to_value(output)?)
    }
}

#[async_trait]
pub(crate) trait ErasedEventHandler: Send + Sync {
    async fn call(
        &self,
        message: &Message,
        ctx: &mut HandlerContext<'_>,
    ) -> Result<(), HandlerError>;
}

struct EventAdapter<E, H> {
    handler: H,
    _event: PhantomData<fn(&E)>,
}

#[async_trait]
impl<E, H> ErasedEventHandler for EventAdapter<E, H>
where
    E: Event,
    H: EventHandler<E>,
{
    async fn call(
        &self,
        message: &Message,
        ctx: &mut HandlerContext<'_>,
    ) -> Result<(), HandlerError> {
        let event = message
            .downcast_ref::<E>()
            .ok_or(BusError::TypeMismatch { message: E::NAME })?;
        self.handler.handle(event, ctx).await
    }
}

/// A registered handler with the dependencies it declared.
pub(crate) struct Route<H: ?Sized> {
    pub(crate) name: &'static str,
    pub(crate) dependencies: &'static [Dependency],
    pub(crate) handler: Box<H>,
}

/// Maps message types to their handlers.
///
/// Commands map to exactly one route; events map to a list of routes kept in
/// registration order.
#[derive(Default)]
pub struct HandlerRegistry {
    commands: HashMap<TypeId, Route<dyn ErasedCommandHandler>>,
    events: HashMap<TypeId, Vec<Route<dyn ErasedEventHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the handler for command `C`.
    ///
    /// Fails if `C` already has a handler.
    pub fn register_command<C, H>(&mut self, handler: H) -> Result<(), ConfigurationError>
    where
        C: Command,
        H: CommandHandler<C>,
    {
        let type_id = TypeId::of::<C>();
        if self.commands.contains_key(&type_id) {
            return Err(ConfigurationError::DuplicateCommandHandler { command: C::NAME });
        }

        let route = Route {
            name: handler.name(),
            dependencies: handler.dependencies(),
            handler: Box::new(CommandAdapter {
                handler,
                _command: PhantomData,
            }) as Box<dyn ErasedCommandHandler>,
        };
        tracing::debug!(command = C::NAME, handler = route.name, "registered command handler");
        self.commands.insert(type_id, route);
        Ok(())
    }

    /// Appends a handler for event `E`.
    pub fn register_event<E, H>(&mut self, handler: H)
    where
        E: Event,
        H: EventHandler<E>,
    {
        let route = Route {
            name: handler.name(),
            dependencies: handler.dependencies(),
            handler: Box::new(EventAdapter {
                handler,
                _event: PhantomData,
            }) as Box<dyn ErasedEventHandler>,
        };
        tracing::debug!(event = E::NAME, handler = route.name, "registered event handler");
        self.events.entry(TypeId::of::<E>()).or_default().push(route);
    }

    pub fn has_command_handler<C: Command>(&self) -> bool {
        self.commands.contains_key(&TypeId::of::<C>())
    }

    pub fn event_handler_count<E: Event>(&self) -> usize {
        self.events.get(&TypeId::of::<E>()).map_or(0, Vec::len)
    }

    /// Removes every registration.
    pub fn clear(&mut self) {
        self.commands.clear();
        self.events.clear();
    }

    pub(crate) fn command_route(
        &self,
        type_id: TypeId,
    ) -> Option<&Route<dyn ErasedCommandHandler>> {
        self.commands.get(&type_id)
    }

    pub(crate) fn event_routes(&self, type_id: TypeId) -> &[Route<dyn ErasedEventHandler>] {
        self.events.get(&type_id).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Reserve;

    impl Command for Reserve {
        const NAME: &'static str = "Reserve";
        type Output = ();
    }

    #[derive(Debug)]
    struct Reserved;

    impl Event for Reserved {
        const NAME: &'static str = "Reserved";
    }

    struct ReserveHandler;

    #[async_trait]
    impl CommandHandler<Reserve> for ReserveHandler {
        async fn handle(&self, _: Reserve, _: &mut HandlerContext<'_>) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    struct Audit;

    #[async_trait]
    impl EventHandler<Reserved> for Audit {
        fn dependencies(&self) -> &'static [Dependency] {
            &[Dependency::UnitOfWork]
        }

        async fn handle(
            &self,
            _: &Reserved,
            _: &mut HandlerContext<'_>,
        ) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    #[test]
    fn second_command_handler_is_rejected() {
        let mut registry = HandlerRegistry::new();
        registry.register_command::<Reserve, _>(ReserveHandler).unwrap();

        let err = registry
            .register_command::<Reserve, _>(ReserveHandler)
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::DuplicateCommandHandler { command: "Reserve" }
        ));
        assert!(registry.has_command_handler::<Reserve>());
    }

    #[test]
    fn event_handlers_accumulate_in_order() {
        let mut registry = HandlerRegistry::new();
        registry.register_event::<Reserved, _>(Audit);
        registry.register_event::<Reserved, _>(Audit);

        assert_eq!(registry.event_handler_count::<Reserved>(), 2);
        let routes = registry.event_routes(TypeId::of::<Reserved>());
        assert_eq!(routes[0].dependencies, &[Dependency::UnitOfWork]);
    }

    #[test]
    fn unknown_types_have_no_routes() {
        let registry = HandlerRegistry::new();
        assert!(registry.command_route(TypeId::of::<Reserve>()).is_none());
        assert!(registry.event_routes(TypeId::of::<Reserved>()).is_empty());
    }

    #[test]
    fn clear_removes_everything() {
        let mut registry = HandlerRegistry::new();
        registry.register_command::<Reserve, _>(ReserveHandler).unwrap();
        registry.register_event::<Reserved, _>(Audit);
        registry.clear();
        assert!(!registry.has_command_handler::<Reserve>());
        assert_eq!(registry.event_handler_count::<Reserved>(), 0);
    }
}
