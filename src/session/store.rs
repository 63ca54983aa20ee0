//! Session Store
//!
//! In-memory mapping from session id to session record; the single source of
//! truth for which sessions exist and in what state. Admission control lives
//! on the insert path so the capacity check and the insertion happen under
//! one lock acquisition — two concurrent pairing requests can never push the
//! store over the limit between check and insert.

use super::{SessionRecord, SessionSnapshot, SessionStatus};
use crate::error::{GatewayError, Result};
use crate::transport::SessionHandle;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Per-status counts for the health endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub total: usize,
    pub pending: usize,
    pub connected: usize,
    pub error: usize,
}

pub struct SessionStore {
    inner: RwLock<HashMap<String, SessionRecord>>,
    limit: usize,
}

impl SessionStore {
    pub fn new(limit: usize) -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Admission-checked insert. Counts every tracked session, pending ones
    /// included, against the limit.
    pub async fn try_insert(&self, record: SessionRecord) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.len() >= self.limit {
            return Err(GatewayError::AdmissionRejected {
                current: inner.len(),
                limit: self.limit,
            });
        }
        inner.insert(record.session_id.clone(), record);
        Ok(())
    }

    /// Unconditional insert, used by the startup reconciliation pass where
    /// disk state predates this process.
    pub async fn insert(&self, record: SessionRecord) {
        let mut inner = self.inner.write().await;
        inner.insert(record.session_id.clone(), record);
    }

    pub async fn get(&self, session_id: &str) -> Option<SessionRecord> {
        self.inner.read().await.get(session_id).cloned()
    }

    pub async fn contains(&self, session_id: &str) -> bool {
        self.inner.read().await.contains_key(session_id)
    }

    /// Apply `f` to the record, if present. Returns whether it was.
    pub async fn update<F>(&self, session_id: &str, f: F) -> bool
    where
        F: FnOnce(&mut SessionRecord),
    {
        let mut inner = self.inner.write().await;
        match inner.get_mut(session_id) {
            Some(record) => {
                f(record);
                true
            }
            None => false,
        }
    }

    pub async fn remove(&self, session_id: &str) -> Option<SessionRecord> {
        self.inner.write().await.remove(session_id)
    }

    /// Remove everything, returning the records so live handles can be
    /// closed. Used at shutdown.
    pub async fn drain(&self) -> Vec<SessionRecord> {
        let mut inner = self.inner.write().await;
        inner.drain().map(|(_, record)| record).collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    pub async fn list(&self) -> Vec<SessionSnapshot> {
        self.inner
            .read()
            .await
            .values()
            .map(SessionRecord::snapshot)
            .collect()
    }

    /// The live handle for a session, if any.
    pub async fn handle(&self, session_id: &str) -> Option<Arc<dyn SessionHandle>> {
        self.inner
            .read()
            .await
            .get(session_id)
            .and_then(|record| record.handle.clone())
    }

    pub async fn status_counts(&self) -> StatusCounts {
        let inner = self.inner.read().await;
        let mut counts = StatusCounts {
            total: inner.len(),
            ..Default::default()
        };
        for record in inner.values() {
            match record.status {
                SessionStatus::Pending
                | SessionStatus::AwaitingCode
                | SessionStatus::AwaitingLink => counts.pending += 1,
                SessionStatus::Connected => counts.connected += 1,
                SessionStatus::Error => counts.error += 1,
                SessionStatus::Closed => {}
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> SessionRecord {
        SessionRecord::new(id.to_string(), "15550104477".to_string())
    }

    #[tokio::test]
    async fn test_admission_boundary() {
        let store = SessionStore::new(2);
        store.try_insert(record("a")).await.expect("under limit");
        store.try_insert(record("b")).await.expect("at limit - 1");

        let err = store
            .try_insert(record("c"))
            .await
            .expect_err("expected rejection");
        let GatewayError::AdmissionRejected { current, limit } = err else {
            unreachable!("expected AdmissionRejected, got {err:?}")
        };
        assert_eq!(current, 2);
        assert_eq!(limit, 2);
        assert_eq!(store.len().await, 2);

        // Freeing a slot admits again.
        store.remove("a").await;
        store.try_insert(record("c")).await.expect("slot freed");
    }

    #[tokio::test]
    async fn test_concurrent_admission_never_exceeds_limit() {
        let store = Arc::new(SessionStore::new(50));
        let mut tasks = Vec::new();
        for i in 0..100 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store.try_insert(record(&format!("s{i}"))).await.is_ok()
            }));
        }
        let mut admitted = 0;
        for task in tasks {
            if task.await.expect("join") {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 50);
        assert_eq!(store.len().await, 50);
    }

    #[tokio::test]
    async fn test_update_and_counts() {
        let store = SessionStore::new(10);
        store.try_insert(record("a")).await.expect("insert");
        store.try_insert(record("b")).await.expect("insert");

        let updated = store
            .update("a", |r| r.status = SessionStatus::Connected)
            .await;
        assert!(updated);
        assert!(!store.update("missing", |_| {}).await);

        let counts = store.status_counts().await;
        assert_eq!(counts.total, 2);
        assert_eq!(counts.connected, 1);
        assert_eq!(counts.pending, 1);
    }

    #[tokio::test]
    async fn test_drain_empties_store() {
        let store = SessionStore::new(10);
        store.try_insert(record("a")).await.expect("insert");
        store.try_insert(record("b")).await.expect("insert");
        let drained = store.drain().await;
        assert_eq!(drained.len(), 2);
        assert!(store.is_empty().await);
    }
}
