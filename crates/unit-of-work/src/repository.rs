//! Repositories: identity-mapped access to one aggregate type.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use common::Message;

use crate::aggregate::{Aggregate, Entity, Lookup, PendingMessages};
use crate::error::RepositoryError;
use crate::session::Session;

/// Loads and stores one aggregate type through a [`Session`].
///
/// Every method has a default that stores the aggregate as a JSON row in the
/// table named by [`Aggregate::aggregate_type`], keyed by its id. A custom
/// backend overrides only what it needs, typically [`load_by`] to serve the
/// aggregate's [`Lookup`] finders.
///
/// [`load_by`]: RepositoryBackend::load_by
#[async_trait]
pub trait RepositoryBackend<A: Aggregate>: Send + Sync {
    async fn load(
        &self,
        session: &mut dyn Session,
        id: &A::Id,
    ) -> Result<Option<A>, RepositoryError> {
        let row = session.fetch(A::aggregate_type(), &id.to_string()).await?;
        Ok(row.map(serde_json::from_value).transpose()?)
    }

    /// Serves a typed finder. The default serves none.
    async fn load_by(
        &self,
        session: &mut dyn Session,
        lookup: &A::Lookup,
    ) -> Result<Option<A>, RepositoryError> {
        let _ = session;
        Err(RepositoryError::UnsupportedLookup {
            aggregate: A::aggregate_type(),
            lookup: lookup.name(),
        })
    }

    async fn load_all(&self, session: &mut dyn Session) -> Result<Vec<A>, RepositoryError> {
        let rows = session.fetch_all(A::aggregate_type()).await?;
        Ok(rows
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<A>, _>>()?)
    }

    async fn store(&self, session: &mut dyn Session, item: &A) -> Result<(), RepositoryError> {
        let row = serde_json::to_value(item)?;
        let key = item.id().to_string();
        session.upsert(A::aggregate_type(), &key, row).await?;
        Ok(())
    }

    async fn remove(&self, session: &mut dyn Session, id: &A::Id) -> Result<(), RepositoryError> {
        session.delete(A::aggregate_type(), &id.to_string()).await?;
        Ok(())
    }

    async fn remove_all(&self, session: &mut dyn Session) -> Result<(), RepositoryError> {
        session.delete_all(A::aggregate_type()).await?;
        Ok(())
    }
}

/// Backend that uses every default of [`RepositoryBackend`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultBackend;

#[async_trait]
impl<A: Aggregate> RepositoryBackend<A> for DefaultBackend {}

/// Tracks the aggregates one unit of work scope has touched.
///
/// Every aggregate returned by `add`, `get` or `find` is held in the `seen`
/// list exactly once per id. Asking for an id that is already seen returns
/// the tracked instance, so in-scope changes are never lost to a reload and
/// its pending messages are harvested once.
pub struct Repository<A: Aggregate> {
    backend: Arc<dyn RepositoryBackend<A>>,
    seen: Vec<A>,
    // Messages of aggregates deleted from the scope.
    detached: PendingMessages,
}

impl<A: Aggregate> Repository<A> {
    pub fn new(backend: Arc<dyn RepositoryBackend<A>>) -> Self {
        Self {
            backend,
            seen: Vec::new(),
            detached: PendingMessages::new(),
        }
    }

    fn position(&self, id: &A::Id) -> Option<usize> {
        self.seen.iter().position(|item| item.id() == id)
    }

    fn track(&mut self, item: A) -> usize {
        match self.position(item.id()) {
            Some(idx) => idx,
            None => {
                self.seen.push(item);
                self.seen.len() - 1
            }
        }
    }

    /// Starts tracking a new aggregate.
    ///
    /// Adding an id that is already seen replaces the tracked instance and
    /// keeps the messages it had queued ahead of the new ones.
    pub fn add(&mut self, mut item: A) -> &mut A {
        match self.position(item.id()) {
            Some(idx) => {
                let earlier = std::mem::take(self.seen[idx].messages_mut());
                item.messages_mut().prepend(earlier);
                self.seen[idx] = item;
                &mut self.seen[idx]
            }
            None => {
                let idx = self.track(item);
                &mut self.seen[idx]
            }
        }
    }

    /// Returns the aggregate with `id`, loading it on first access.
    pub async fn get(
        &mut self,
        session: &mut dyn Session,
        id: &A::Id,
    ) -> Result<Option<&mut A>, RepositoryError> {
        if let Some(idx) = self.position(id) {
            return Ok(Some(&mut self.seen[idx]));
        }

        match self.backend.load(session, id).await? {
            Some(item) => {
                let idx = self.track(item);
                Ok(Some(&mut self.seen[idx]))
            }
            None => Ok(None),
        }
    }

    /// Returns the aggregate matched by a typed finder.
    ///
    /// Tracked aggregates are flushed first so the finder sees in-scope
    /// changes. A match that is already seen resolves to the tracked instance.
    pub async fn find(
        &mut self,
        session: &mut dyn Session,
        lookup: &A::Lookup,
    ) -> Result<Option<&mut A>, RepositoryError> {
        self.flush(session).await?;

        match self.backend.load_by(session, lookup).await? {
            Some(item) => {
                let idx = self.track(item);
                Ok(Some(&mut self.seen[idx]))
            }
            None => Ok(None),
        }
    }

    /// Returns snapshots of every stored aggregate, including in-scope
    /// changes. The snapshots are not tracked.
    pub async fn all(&mut self, session: &mut dyn Session) -> Result<Vec<A>, RepositoryError> {
        self.flush(session).await?;
        self.backend.load_all(session).await
    }

    /// Deletes one aggregate. Its pending messages stay queued.
    pub async fn delete(
        &mut self,
        session: &mut dyn Session,
        id: &A::Id,
    ) -> Result<(), RepositoryError> {
        if let Some(idx) = self.position(id) {
            let mut item = self.seen.remove(idx);
            self.detached.append(item.messages_mut());
        }
        self.backend.remove(session, id).await
    }

    /// Deletes every aggregate of this type. Pending messages stay queued.
    pub async fn clear(&mut self, session: &mut dyn Session) -> Result<(), RepositoryError> {
        for item in &mut self.seen {
            self.detached.append(item.messages_mut());
        }
        self.seen.clear();
        self.backend.remove_all(session).await
    }

    /// Writes every tracked aggregate to the session.
    pub async fn flush(&mut self, session: &mut dyn Session) -> Result<(), RepositoryError> {
        for item in &self.seen {
            self.backend.store(session, item).await?;
        }
        Ok(())
    }

    pub fn seen(&self) -> &[A] {
        &self.seen
    }

    /// Pops pending messages: those of deleted aggregates first, then each
    /// tracked aggregate's queue in the order the aggregates were seen.
    pub fn collect_new_messages(&mut self) -> impl Iterator<Item = Message> + Send + '_ {
        self.detached.drain().chain(
            self.seen
                .iter_mut()
                .flat_map(|item| item.messages_mut().drain()),
        )
    }

    /// Drops every pending message and returns how many were dropped.
    pub fn discard_pending(&mut self) -> usize {
        self.detached.clear()
            + self
                .seen
                .iter_mut()
                .map(|item| item.messages_mut().clear())
                .sum::<usize>()
    }
}

/// Object-safe view of a `Repository<A>` so the unit of work can hold
/// repositories of different aggregate types side by side.
#[async_trait]
pub(crate) trait AnyRepository: Send + Sync {
    fn as_any_mut(&mut self) -> &mut dyn Any;

    fn aggregate_type(&self) -> &'static str;

    fn drain_messages(&mut self) -> Box<dyn Iterator<Item = Message> + Send + '_>;

    fn discard_pending(&mut self) -> usize;

    async fn flush(&mut self, session: &mut dyn Session) -> Result<(), RepositoryError>;
}

#[async_trait]
impl<A: Aggregate> AnyRepository for Repository<A> {
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn aggregate_type(&self) -> &'static str {
        A::aggregate_type()
    }

    fn drain_messages(&mut self) -> Box<dyn Iterator<Item = Message> + Send + '_> {
        Box::new(self.collect_new_messages())
    }

    fn discard_pending(&mut self) -> usize {
        Repository::discard_pending(self)
    }

    async fn flush(&mut self, session: &mut dyn Session) -> Result<(), RepositoryError> {
        Repository::flush(self, session).await
    }
}

/// A repository bound to the session of the current scope.
///
/// Obtained from [`UnitOfWork::repository`](crate::UnitOfWork::repository).
/// Each operation consumes the handle so the returned aggregate borrows the
/// unit of work directly.
pub struct RepositoryHandle<'a, A: Aggregate> {
    pub(crate) repository: &'a mut Repository<A>,
    pub(crate) session: &'a mut dyn Session,
}

impl<'a, A: Aggregate> RepositoryHandle<'a, A> {
    pub fn add(self, item: A) -> &'a mut A {
        self.repository.add(item)
    }

    pub async fn get(self, id: &A::Id) -> Result<Option<&'a mut A>, RepositoryError> {
        let Self { repository, session } = self;
        repository.get(session, id).await
    }

    pub async fn find(self, lookup: &A::Lookup) -> Result<Option<&'a mut A>, RepositoryError> {
        let Self { repository, session } = self;
        repository.find(session, lookup).await
    }

    pub async fn all(self) -> Result<Vec<A>, RepositoryError> {
        let Self { repository, session } = self;
        repository.all(session).await
    }

    pub async fn delete(self, id: &A::Id) -> Result<(), RepositoryError> {
        let Self { repository, session } = self;
        repository.delete(session, id).await
    }

    pub async fn clear(self) -> Result<(), RepositoryError> {
        let Self { repository, session } = self;
        repository.clear(session).await
    }

    /// Closes the session the repository is bound to. Idempotent.
    pub fn close(self) {
        self.session.close();
    }

    /// Number of aggregates tracked in this scope.
    pub fn seen_count(&self) -> usize {
        self.repository.seen().len()
    }
}
