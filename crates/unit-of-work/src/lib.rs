//! Transactional boundary for the message bus.
//!
//! A [`UnitOfWork`] opens a [`Session`], hands out one [`Repository`] per
//! configured [`Aggregate`] type, and after commit lets the bus harvest the
//! messages those aggregates raised.

pub mod aggregate;
pub mod error;
pub mod memory;
pub mod repository;
pub mod session;
pub mod uow;

pub use aggregate::{Aggregate, Entity, Lookup, NoLookup, PendingMessages};
pub use error::{RepositoryError, SessionError, UnitOfWorkError};
pub use memory::{InMemorySession, InMemoryStore};
pub use repository::{DefaultBackend, Repository, RepositoryBackend, RepositoryHandle};
pub use session::{Session, SessionFactory};
pub use uow::{Scope, UnitOfWork, UnitOfWorkFactory};
