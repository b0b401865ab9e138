use async_trait::async_trait;
use docmig::{Filter, RawDocument};

/// Per-document optimistic-concurrency token. Changes on every write.
pub type Revision = u64;

/// A document as read from the store, with its revision token.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    /// Store-assigned identity.
    pub id: String,
    /// The raw document body.
    pub doc: RawDocument,
    /// Revision at read time; pass to
    /// [`put_if_revision`](DocumentStore::put_if_revision) to detect
    /// intervening writes.
    pub revision: Revision,
}

/// One page request of a cursor scan.
#[derive(Debug, Clone, Default)]
pub struct ScanPage {
    /// Resume after this cursor, or start from the beginning.
    pub after: Option<String>,
    /// Maximum documents to return.
    pub limit: usize,
}

/// One page of scan results.
#[derive(Debug, Clone)]
pub struct ScanBatch {
    /// Matching documents, at most `limit`.
    pub documents: Vec<StoredDocument>,
    /// Cursor for the next page, or `None` when the scan is exhausted.
    pub next: Option<String>,
}

/// Error type for store operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The document does not exist.
    #[error("document {id} not found")]
    NotFound { id: String },

    /// Insert of an id that already exists.
    #[error("document {id} already exists")]
    AlreadyExists { id: String },

    /// A conditional write lost a race: the document's revision moved
    /// past the one the caller read. The caller re-reads and decides
    /// whether the write is still needed; nothing was written.
    #[error("revision mismatch for {id}: expected {expected}, found {found}")]
    RevisionMismatch {
        id: String,
        expected: Revision,
        found: Revision,
    },

    /// The backend cannot be reached. Transient: callers back off and
    /// retry rather than abort.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// What the migration engine consumes from a document store.
///
/// Backends wrap a real driver (or, for tests, [`MemoryStore`]). All
/// writes bump the document's [`Revision`]; `put_if_revision` is the
/// compare-and-swap the reconciliation job builds on.
///
/// [`MemoryStore`]: crate::MemoryStore
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Load a document and its revision by id.
    async fn get(&self, id: &str) -> StoreResult<Option<StoredDocument>>;

    /// Create a document. Fails with [`StoreError::AlreadyExists`] if the
    /// id is taken.
    async fn insert(&self, id: &str, doc: RawDocument) -> StoreResult<Revision>;

    /// Unconditionally write a document (the foreground save path),
    /// creating it if absent. Returns the new revision.
    async fn put(&self, id: &str, doc: RawDocument) -> StoreResult<Revision>;

    /// Write only if the document's current revision equals `expected`.
    ///
    /// Fails with [`StoreError::RevisionMismatch`] when a concurrent
    /// write landed in between, and [`StoreError::NotFound`] when the
    /// document was deleted; in both cases nothing is written.
    async fn put_if_revision(
        &self,
        id: &str,
        doc: RawDocument,
        expected: Revision,
    ) -> StoreResult<Revision>;

    /// Delete a document. Returns whether it existed.
    async fn delete(&self, id: &str) -> StoreResult<bool>;

    /// One page of documents matching `filter`, in stable id order.
    /// Never materializes the whole collection.
    async fn scan(&self, filter: &Filter, page: ScanPage) -> StoreResult<ScanBatch>;

    /// Count documents matching `filter`. Operational helper, e.g. to
    /// verify a version range is empty before retiring its query clause.
    async fn count_matching(&self, filter: &Filter) -> StoreResult<u64>;
}
