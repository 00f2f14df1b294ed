//! The persistence collaborator the unit of work drives.
//!
//! A session stores aggregates as JSON rows keyed by table and id. Writes are
//! buffered until [`Session::commit`]; [`Session::rollback`] discards them.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::SessionError;

/// A transactional handle on the backing store.
///
/// `rollback` and `close` are synchronous so that a scope guard can call
/// them from `Drop`.
#[async_trait]
pub trait Session: Send + Sync {
    /// Reads one row, seeing this session's own uncommitted writes.
    async fn fetch(&mut self, table: &str, key: &str) -> Result<Option<Value>, SessionError>;

    /// Reads every row of a table in key order, seeing uncommitted writes.
    async fn fetch_all(&mut self, table: &str) -> Result<Vec<Value>, SessionError>;

    /// Inserts or replaces a row.
    async fn upsert(&mut self, table: &str, key: &str, row: Value) -> Result<(), SessionError>;

    /// Deletes a row if present.
    async fn delete(&mut self, table: &str, key: &str) -> Result<(), SessionError>;

    /// Deletes every row of a table.
    async fn delete_all(&mut self, table: &str) -> Result<(), SessionError>;

    /// Makes buffered writes durable, all or nothing.
    async fn commit(&mut self) -> Result<(), SessionError>;

    /// Discards buffered writes. A no-op when there are none.
    fn rollback(&mut self) -> Result<(), SessionError>;

    /// Releases the session. Idempotent.
    fn close(&mut self);
}

/// Opens sessions for new unit of work scopes.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self) -> Result<Box<dyn Session>, SessionError>;
}
