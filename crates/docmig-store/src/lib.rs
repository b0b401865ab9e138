//! # docmig-store
//!
//! The store boundary for [`docmig`](https://docs.rs/docmig): what the
//! migration engine needs from the underlying document store, and an
//! in-memory reference backend.
//!
//! The [`DocumentStore`] trait is deliberately narrow — load by id, cursor
//! scans with a filter, and a conditional write keyed on a per-document
//! revision token. The revision token is what lets the reconciliation job
//! run against live foreground traffic without ever silently overwriting a
//! concurrent save.
//!
//! ## Quick Start
//!
//! ```
//! use docmig_store::{DocumentStore, MemoryStore};
//! use serde_json::json;
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let store = MemoryStore::new();
//! let doc = serde_json::from_value(json!({"name": "a"})).unwrap();
//! let revision = store.insert("d1", doc).await.unwrap();
//!
//! let stored = store.get("d1").await.unwrap().unwrap();
//! assert_eq!(stored.revision, revision);
//! # });
//! ```

mod memory;
mod traits;

pub use memory::MemoryStore;
pub use traits::{
    DocumentStore, Revision, ScanBatch, ScanPage, StoreError, StoreResult, StoredDocument,
};
