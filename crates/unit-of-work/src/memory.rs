use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::SessionError;
use crate::session::{Session, SessionFactory};

type Table = BTreeMap<String, Value>;

#[derive(Debug, Default)]
struct StoreState {
    tables: HashMap<String, Table>,
    commits: u64,
    fail_on_commit: bool,
}

/// In-memory row store for testing and for the sample service.
///
/// Cloning shares the underlying state. Every [`InMemorySession`] opened from
/// it buffers its own writes and applies them atomically on commit.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<StoreState>>,
}

impl InMemoryStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a session directly, without going through the factory trait.
    pub fn session(&self) -> InMemorySession {
        InMemorySession::new(self.clone())
    }

    /// Returns a committed row.
    pub async fn row(&self, table: &str, key: &str) -> Option<Value> {
        self.state
            .read()
            .await
            .tables
            .get(table)
            .and_then(|t| t.get(key))
            .cloned()
    }

    /// Returns all committed rows of a table in key order.
    pub async fn rows(&self, table: &str) -> Vec<Value> {
        self.state
            .read()
            .await
            .tables
            .get(table)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the number of successful commits.
    pub async fn commit_count(&self) -> u64 {
        self.state.read().await.commits
    }

    /// Configures every following commit to fail.
    pub async fn set_fail_on_commit(&self, fail: bool) {
        self.state.write().await.fail_on_commit = fail;
    }
}

#[async_trait]
impl SessionFactory for InMemoryStore {
    async fn open(&self) -> Result<Box<dyn Session>, SessionError> {
        Ok(Box::new(self.session()))
    }
}

#[derive(Debug, Default)]
struct PendingTable {
    cleared: bool,
    // None marks a deleted row.
    writes: BTreeMap<String, Option<Value>>,
}

/// A session over an [`InMemoryStore`].
#[derive(Debug)]
pub struct InMemorySession {
    store: InMemoryStore,
    pending: HashMap<String, PendingTable>,
    open: bool,
}

impl InMemorySession {
    fn new(store: InMemoryStore) -> Self {
        Self {
            store,
            pending: HashMap::new(),
            open: true,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Returns true if there are writes waiting for commit.
    pub fn has_pending_writes(&self) -> bool {
        self.pending
            .values()
            .any(|t| t.cleared || !t.writes.is_empty())
    }

    fn ensure_open(&self) -> Result<(), SessionError> {
        if self.open {
            Ok(())
        } else {
            Err(SessionError::Closed)
        }
    }

    fn table_mut(&mut self, table: &str) -> &mut PendingTable {
        self.pending.entry(table.to_string()).or_default()
    }
}

#[async_trait]
impl Session for InMemorySession {
    async fn fetch(&mut self, table: &str, key: &str) -> Result<Option<Value>, SessionError> {
        self.ensure_open()?;

        if let Some(pending) = self.pending.get(table) {
            if let Some(write) = pending.writes.get(key) {
                return Ok(write.clone());
            }
            if pending.cleared {
                return Ok(None);
            }
        }

        Ok(self.store.row(table, key).await)
    }

    async fn fetch_all(&mut self, table: &str) -> Result<Vec<Value>, SessionError> {
        self.ensure_open()?;

        let pending = self.pending.get(table);
        let mut rows: Table = match pending {
            Some(p) if p.cleared => Table::new(),
            _ => {
                let state = self.store.state.read().await;
                state.tables.get(table).cloned().unwrap_or_default()
            }
        };

        if let Some(pending) = pending {
            for (key, write) in &pending.writes {
                match write {
                    Some(row) => {
                        rows.insert(key.clone(), row.clone());
                    }
                    None => {
                        rows.remove(key);
                    }
                }
            }
        }

        Ok(rows.into_values().collect())
    }

    async fn upsert(&mut self, table: &str, key: &str, row: Value) -> Result<(), SessionError> {
        self.ensure_open()?;
        self.table_mut(table).writes.insert(key.to_string(), Some(row));
        Ok(())
    }

    async fn delete(&mut self, table: &str, key: &str) -> Result<(), SessionError> {
        self.ensure_open()?;
        self.table_mut(table).writes.insert(key.to_string(), None);
        Ok(())
    }

    async fn delete_all(&mut self, table: &str) -> Result<(), SessionError> {
        self.ensure_open()?;
        let pending = self.table_mut(table);
        pending.cleared = true;
        pending.writes.clear();
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), SessionError> {
        self.ensure_open()?;

        let mut state = self.store.state.write().await;
        if state.fail_on_commit {
            return Err(SessionError::CommitFailed(
                "in-memory store configured to fail".to_string(),
            ));
        }

        for (name, pending) in self.pending.drain() {
            let table = state.tables.entry(name).or_default();
            if pending.cleared {
                table.clear();
            }
            for (key, write) in pending.writes {
                match write {
                    Some(row) => {
                        table.insert(key, row);
                    }
                    None => {
                        table.remove(&key);
                    }
                }
            }
        }
        state.commits += 1;

        Ok(())
    }

    fn rollback(&mut self) -> Result<(), SessionError> {
        self.pending.clear();
        Ok(())
    }

    fn close(&mut self) {
        self.pending.clear();
        self.open = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn writes_are_invisible_until_commit() {
        let store = InMemoryStore::new();
        let mut session = store.session();

        session.upsert("t", "a", json!({"v": 1})).await.unwrap();
        assert_eq!(session.fetch("t", "a").await.unwrap(), Some(json!({"v": 1})));
        assert!(store.row("t", "a").await.is_none());

        session.commit().await.unwrap();
        assert_eq!(store.row("t", "a").await, Some(json!({"v": 1})));
        assert_eq!(store.commit_count().await, 1);
    }

    #[tokio::test]
    async fn rollback_discards_pending_writes() {
        let store = InMemoryStore::new();
        let mut session = store.session();

        session.upsert("t", "a", json!(1)).await.unwrap();
        assert!(session.has_pending_writes());
        session.rollback().unwrap();
        assert!(!session.has_pending_writes());

        session.commit().await.unwrap();
        assert!(store.rows("t").await.is_empty());
    }

    #[tokio::test]
    async fn rollback_on_clean_session_is_a_noop() {
        let store = InMemoryStore::new();
        let mut session = store.session();
        session.rollback().unwrap();
        session.rollback().unwrap();
    }

    #[tokio::test]
    async fn fetch_all_merges_committed_and_pending_rows() {
        let store = InMemoryStore::new();
        let mut setup = store.session();
        setup.upsert("t", "a", json!("a")).await.unwrap();
        setup.upsert("t", "b", json!("b")).await.unwrap();
        setup.commit().await.unwrap();

        let mut session = store.session();
        session.delete("t", "a").await.unwrap();
        session.upsert("t", "c", json!("c")).await.unwrap();
        let rows = session.fetch_all("t").await.unwrap();
        assert_eq!(rows, vec![json!("b"), json!("c")]);
    }

    #[tokio::test]
    async fn delete_all_hides_committed_rows() {
        let store = InMemoryStore::new();
        let mut setup = store.session();
        setup.upsert("t", "a", json!("a")).await.unwrap();
        setup.commit().await.unwrap();

        let mut session = store.session();
        session.delete_all("t").await.unwrap();
        assert!(session.fetch("t", "a").await.unwrap().is_none());
        session.upsert("t", "b", json!("b")).await.unwrap();
        session.commit().await.unwrap();

        assert_eq!(store.rows("t").await, vec![json!("b")]);
    }

    #[tokio::test]
    async fn failed_commit_keeps_store_untouched() {
        let store = InMemoryStore::new();
        store.set_fail_on_commit(true).await;
        let mut session = store.session();

        session.upsert("t", "a", json!(1)).await.unwrap();
        let result = session.commit().await;
        assert!(matches!(result, Err(SessionError::CommitFailed(_))));
        assert!(store.row("t", "a").await.is_none());
        assert_eq!(store.commit_count().await, 0);
    }

    #[tokio::test]
    async fn closed_session_rejects_work_but_closes_idempotently() {
        let store = InMemoryStore::new();
        let mut session = store.session();
        session.close();
        session.close();
        assert!(!session.is_open());

        let result = session.fetch("t", "a").await;
        assert!(matches!(result, Err(SessionError::Closed)));
        session.rollback().unwrap();
    }
}
