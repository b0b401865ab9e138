//! # docmig-reconcile
//!
//! Background reconciliation for [`docmig`](https://docs.rs/docmig):
//! pages through the collection off the request path and rewrites every
//! document still below the registry's target version, so version-spanning
//! query clauses can eventually be retired.
//!
//! The job runs concurrently with live foreground traffic. Every
//! write-back is conditional on the revision token read with the document;
//! a foreground save that lands in between wins the race and the job
//! simply drops the document for this pass — it is picked up on the next
//! scan if still stale. Convergence is eventual, never blocking.
//!
//! ```
//! use std::sync::Arc;
//! use docmig::{FnStep, MigrationRegistry};
//! use docmig_reconcile::ReconcileJob;
//! use docmig_store::MemoryStore;
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let registry = Arc::new(
//!     MigrationRegistry::builder()
//!         .step(FnStep::new(1, Ok))
//!         .build()
//!         .unwrap(),
//! );
//! let store = Arc::new(MemoryStore::new());
//!
//! let job = ReconcileJob::new(store, registry);
//! let report = job.run().await;
//! assert_eq!(report.migrated, 0); // empty collection
//! # });
//! ```

mod job;

pub use job::{ReconcileConfig, ReconcileJob, ReconcileProgress, ReconcileReport};
