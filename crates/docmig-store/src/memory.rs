use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::RwLock;

use async_trait::async_trait;
use docmig::{matches, Filter, RawDocument};

use crate::traits::{
    DocumentStore, Revision, ScanBatch, ScanPage, StoreError, StoreResult, StoredDocument,
};

/// In-memory document store backend.
///
/// Documents live in a `BTreeMap`, giving scans a stable id order for
/// keyset pagination. Revisions come from a store-wide counter, so every
/// write — foreground or reconciliation — produces a distinct token.
/// Ideal for tests and prototyping.
///
/// # Example
///
/// ```
/// use docmig_store::{DocumentStore, MemoryStore, StoreError};
/// use serde_json::json;
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let store = MemoryStore::new();
/// let doc = serde_json::from_value(json!({"n": 1})).unwrap();
/// let rev = store.insert("d1", doc).await.unwrap();
///
/// // A stale revision token is rejected.
/// let newer = serde_json::from_value(json!({"n": 2})).unwrap();
/// store.put("d1", newer).await.unwrap();
/// let doc = serde_json::from_value(json!({"n": 3})).unwrap();
/// let err = store.put_if_revision("d1", doc, rev).await.unwrap_err();
/// assert!(matches!(err, StoreError::RevisionMismatch { .. }));
/// # });
/// ```
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    documents: BTreeMap<String, (RawDocument, Revision)>,
    next_revision: Revision,
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                documents: BTreeMap::new(),
                next_revision: 1,
            }),
        }
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.lock_read().documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock_read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn bump(&mut self) -> Revision {
        let revision = self.next_revision;
        self.next_revision += 1;
        revision
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, id: &str) -> StoreResult<Option<StoredDocument>> {
        let inner = self.lock_read();
        Ok(inner.documents.get(id).map(|(doc, revision)| StoredDocument {
            id: id.to_string(),
            doc: doc.clone(),
            revision: *revision,
        }))
    }

    async fn insert(&self, id: &str, doc: RawDocument) -> StoreResult<Revision> {
        let mut inner = self.lock_write();
        if inner.documents.contains_key(id) {
            return Err(StoreError::AlreadyExists { id: id.to_string() });
        }
        let revision = inner.bump();
        inner.documents.insert(id.to_string(), (doc, revision));
        Ok(revision)
    }

    async fn put(&self, id: &str, doc: RawDocument) -> StoreResult<Revision> {
        let mut inner = self.lock_write();
        let revision = inner.bump();
        inner.documents.insert(id.to_string(), (doc, revision));
        Ok(revision)
    }

    async fn put_if_revision(
        &self,
        id: &str,
        doc: RawDocument,
        expected: Revision,
    ) -> StoreResult<Revision> {
        let mut inner = self.lock_write();
        let found = match inner.documents.get(id) {
            Some((_, revision)) => *revision,
            None => return Err(StoreError::NotFound { id: id.to_string() }),
        };
        if found != expected {
            return Err(StoreError::RevisionMismatch {
                id: id.to_string(),
                expected,
                found,
            });
        }
        let revision = inner.bump();
        inner.documents.insert(id.to_string(), (doc, revision));
        Ok(revision)
    }

    async fn delete(&self, id: &str) -> StoreResult<bool> {
        Ok(self.lock_write().documents.remove(id).is_some())
    }

    async fn scan(&self, filter: &Filter, page: ScanPage) -> StoreResult<ScanBatch> {
        let limit = page.limit.max(1);
        let inner = self.lock_read();

        let start = match &page.after {
            Some(cursor) => Bound::Excluded(cursor.clone()),
            None => Bound::Unbounded,
        };

        let mut documents = Vec::new();
        let mut next = None;
        for (id, (doc, revision)) in inner.documents.range((start, Bound::Unbounded)) {
            if documents.len() == limit {
                // More ids remain past this page; resume after the last
                // one returned.
                next = documents.last().map(|d: &StoredDocument| d.id.clone());
                break;
            }
            if matches(filter, doc) {
                documents.push(StoredDocument {
                    id: id.clone(),
                    doc: doc.clone(),
                    revision: *revision,
                });
            }
        }
        Ok(ScanBatch { documents, next })
    }

    async fn count_matching(&self, filter: &Filter) -> StoreResult<u64> {
        let inner = self.lock_read();
        Ok(inner
            .documents
            .values()
            .filter(|(doc, _)| matches(filter, doc))
            .count() as u64)
    }
}
