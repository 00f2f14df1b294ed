//! The unit of work and its scope guard.

use std::any::TypeId;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use common::Message;

use crate::aggregate::{Aggregate, PendingMessages};
use crate::error::{Result, UnitOfWorkError};
use crate::repository::{
    AnyRepository, DefaultBackend, Repository, RepositoryBackend, RepositoryHandle,
};
use crate::session::{Session, SessionFactory};

type RepositoryMaker = Arc<dyn Fn() -> Box<dyn AnyRepository> + Send + Sync>;

#[derive(Clone)]
struct Registration {
    type_id: TypeId,
    aggregate_type: &'static str,
    make: RepositoryMaker,
}

/// Configuration shared by every unit of work: where sessions come from and
/// which aggregate types get a repository.
///
/// Repositories are created in registration order, which is also the order
/// their messages are harvested in.
#[derive(Clone)]
pub struct UnitOfWorkFactory {
    sessions: Arc<dyn SessionFactory>,
    registrations: Vec<Registration>,
}

impl UnitOfWorkFactory {
    pub fn new(sessions: Arc<dyn SessionFactory>) -> Self {
        Self {
            sessions,
            registrations: Vec::new(),
        }
    }

    /// Registers `A` with the default JSON repository backend.
    pub fn with_repository<A: Aggregate>(self) -> Self {
        self.with_repository_backend::<A, _>(DefaultBackend)
    }

    /// Registers `A` with a custom repository backend.
    ///
    /// Registering the same aggregate type again replaces the earlier backend.
    pub fn with_repository_backend<A, B>(mut self, backend: B) -> Self
    where
        A: Aggregate,
        B: RepositoryBackend<A> + 'static,
    {
        let backend: Arc<dyn RepositoryBackend<A>> = Arc::new(backend);
        let make: RepositoryMaker = Arc::new(move || {
            Box::new(Repository::<A>::new(Arc::clone(&backend))) as Box<dyn AnyRepository>
        });

        let registration = Registration {
            type_id: TypeId::of::<A>(),
            aggregate_type: A::aggregate_type(),
            make,
        };
        match self
            .registrations
            .iter_mut()
            .find(|r| r.type_id == registration.type_id)
        {
            Some(existing) => *existing = registration,
            None => self.registrations.push(registration),
        }
        self
    }

    /// Aggregate types with a repository, in registration order.
    pub fn aggregate_types(&self) -> Vec<&'static str> {
        self.registrations.iter().map(|r| r.aggregate_type).collect()
    }

    /// Creates a unit of work that is not yet entered.
    pub fn create(&self) -> UnitOfWork {
        UnitOfWork {
            factory: self.clone(),
            session: None,
            repositories: Vec::new(),
            committed_messages: PendingMessages::new(),
            carried: PendingMessages::new(),
            committed: false,
        }
    }
}

impl fmt::Debug for UnitOfWorkFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitOfWorkFactory")
            .field("aggregates", &self.aggregate_types())
            .finish()
    }
}

/// A transactional scope over one session and a set of repositories.
///
/// Use [`UnitOfWork::enter`] to open a session; the returned [`Scope`] rolls
/// back and closes the session when it ends unless `commit` was called.
/// After the scope ends, [`UnitOfWork::collect_new_messages`] yields the
/// messages the touched aggregates raised.
pub struct UnitOfWork {
    factory: UnitOfWorkFactory,
    session: Option<Box<dyn Session>>,
    repositories: Vec<(TypeId, Box<dyn AnyRepository>)>,
    // Raised before the last successful commit and not yet harvested.
    committed_messages: PendingMessages,
    // Raised in an earlier scope after the last commit.
    carried: PendingMessages,
    committed: bool,
}

impl UnitOfWork {
    /// Opens a session and fresh repositories for every configured aggregate.
    #[tracing::instrument(skip(self))]
    pub async fn enter(&mut self) -> Result<Scope<'_>> {
        if self.session.is_some() {
            tracing::warn!("entering a unit of work that is still open, closing previous session");
            self.finish()?;
        }

        let session = self.factory.sessions.open().await?;
        for (_, repository) in &mut self.repositories {
            for message in repository.drain_messages() {
                self.carried.push(message);
            }
        }
        self.repositories = self
            .factory
            .registrations
            .iter()
            .map(|r| (r.type_id, (r.make)()))
            .collect();
        self.session = Some(session);

        Ok(Scope {
            uow: self,
            finished: false,
        })
    }

    /// True while a session is open.
    pub fn is_entered(&self) -> bool {
        self.session.is_some()
    }

    /// True once any scope of this unit of work committed successfully.
    pub fn committed(&self) -> bool {
        self.committed
    }

    /// Returns the repository for `A`, bound to the open session.
    pub fn repository<A: Aggregate>(&mut self) -> Result<RepositoryHandle<'_, A>> {
        let session = self
            .session
            .as_deref_mut()
            .ok_or(UnitOfWorkError::NotEntered)?;
        let repository = self
            .repositories
            .iter_mut()
            .find(|(type_id, _)| *type_id == TypeId::of::<A>())
            .and_then(|(_, r)| r.as_any_mut().downcast_mut::<Repository<A>>())
            .ok_or(UnitOfWorkError::RepositoryNotFound(A::aggregate_type()))?;

        Ok(RepositoryHandle {
            repository,
            session,
        })
    }

    /// Raw access to the open session, for read models that are not
    /// aggregates.
    pub fn session(&mut self) -> Result<&mut dyn Session> {
        match self.session.as_deref_mut() {
            Some(session) => Ok(session),
            None => Err(UnitOfWorkError::NotEntered),
        }
    }

    /// Flushes every tracked aggregate and commits the session.
    ///
    /// Tracked aggregates stay tracked. Their pending messages now belong to
    /// a committed transaction and survive [`discard_pending`](Self::discard_pending).
    #[tracing::instrument(skip(self))]
    pub async fn commit(&mut self) -> Result<()> {
        let session = self
            .session
            .as_deref_mut()
            .ok_or(UnitOfWorkError::NotEntered)?;
        for (_, repository) in &mut self.repositories {
            repository.flush(session).await?;
        }
        session.commit().await?;

        self.committed_messages.append(&mut self.carried);
        for (_, repository) in &mut self.repositories {
            for message in repository.drain_messages() {
                self.committed_messages.push(message);
            }
        }
        self.committed = true;
        metrics::counter!("uow_commits_total").increment(1);
        Ok(())
    }

    /// Discards uncommitted writes. Safe on a clean or committed session.
    pub fn rollback(&mut self) -> Result<()> {
        if let Some(session) = self.session.as_deref_mut() {
            session.rollback()?;
            metrics::counter!("uow_rollbacks_total").increment(1);
        }
        Ok(())
    }

    /// Pops the messages raised by aggregates touched in this unit of work.
    ///
    /// Lazy: each call to `next` pops one message. Popped messages are gone;
    /// messages the iterator never reaches stay queued for the next call.
    pub fn collect_new_messages(&mut self) -> impl Iterator<Item = Message> + Send + '_ {
        self.committed_messages.drain().chain(self.carried.drain()).chain(
            self.repositories
                .iter_mut()
                .flat_map(|(_, repository)| repository.drain_messages()),
        )
    }

    /// Drops the messages raised since the last successful commit and returns
    /// how many were dropped. Messages of committed transactions stay queued.
    ///
    /// Used after a failed handler, whose uncommitted work was rolled back.
    pub fn discard_pending(&mut self) -> usize {
        self.carried.clear()
            + self
                .repositories
                .iter_mut()
                .map(|(_, repository)| repository.discard_pending())
                .sum::<usize>()
    }

    fn finish(&mut self) -> Result<()> {
        let Some(mut session) = self.session.take() else {
            return Ok(());
        };
        let result = session.rollback();
        session.close();
        result?;
        Ok(())
    }
}

impl fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let repositories: Vec<_> = self
            .repositories
            .iter()
            .map(|(_, r)| r.aggregate_type())
            .collect();
        f.debug_struct("UnitOfWork")
            .field("entered", &self.is_entered())
            .field("committed", &self.committed)
            .field("repositories", &repositories)
            .finish()
    }
}

/// Guard for an entered unit of work.
///
/// Dereferences to the [`UnitOfWork`]. When the guard ends, by
/// [`Scope::exit`] or by being dropped, uncommitted work is rolled back and
/// the session is closed. A committed scope rolls back nothing.
pub struct Scope<'a> {
    uow: &'a mut UnitOfWork,
    finished: bool,
}

impl Scope<'_> {
    /// Ends the scope, reporting rollback errors to the caller.
    pub fn exit(mut self) -> Result<()> {
        self.finished = true;
        self.uow.finish()
    }
}

impl Deref for Scope<'_> {
    type Target = UnitOfWork;

    fn deref(&self) -> &UnitOfWork {
        &*self.uow
    }
}

impl DerefMut for Scope<'_> {
    fn deref_mut(&mut self) -> &mut UnitOfWork {
        &mut *self.uow
    }
}

impl Drop for Scope<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(e) = self.uow.finish() {
            tracing::error!(error = %e, "rollback failed while leaving unit of work");
        }
    }
}
