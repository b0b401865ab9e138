//! # docmig
//!
//! Lazy, zero-downtime schema migrations for documents in a schemaless store.
//!
//! The logical shape of stored documents evolves across application releases
//! without a blocking batch migration before deploy:
//!
//! 1. Every document carries one reserved integer field, `migrationVersion`
//!    (absent means version 0).
//! 2. On load, pending migration steps run **in memory**, upgrading the
//!    document to the shape the current release expects. Nothing is written.
//! 3. On save, the document is stamped with the registry's target version.
//! 4. A background reconciliation job (see `docmig-reconcile`) eventually
//!    rewrites every stale document, so old steps can be retired.
//!
//! ## Key Concepts
//!
//! - **Lazy migration**: steps run at read time, never eagerly on startup.
//! - **Additive steps**: a step adds or restructures fields but does not
//!   delete fields older application instances still read, so two releases
//!   can run side by side during a rolling deploy.
//! - **Stamp on write only**: reads are pure; the stored document changes
//!   only when something saves it.
//! - **Version-spanning queries**: [`VersionedQuery`] compiles a logical
//!   field predicate into an `$or` over the field's per-version physical
//!   representations, so searches work while the collection holds mixed
//!   versions.
//!
//! ## Example
//!
//! ```
//! use docmig::{FnStep, MigrationRegistry, RawDocument};
//! use serde_json::{json, Value};
//!
//! // v1 turns the scalar `telephone` into a `telephones` list.
//! let registry = MigrationRegistry::builder()
//!     .step(FnStep::new(1, |mut doc: RawDocument| {
//!         if let Some(phone) = doc.get("telephone").cloned() {
//!             doc.insert("telephones".into(), Value::Array(vec![phone]));
//!         }
//!         Ok(doc)
//!     }))
//!     .target_version(1)
//!     .build()
//!     .unwrap();
//!
//! let raw: RawDocument = serde_json::from_value(
//!     json!({"id": 1, "name": "A", "telephone": "555"}),
//! ).unwrap();
//!
//! let upgraded = registry.read_upgrade(&raw).unwrap();
//! assert_eq!(upgraded["telephones"], json!(["555"]));
//! // The original field is retained and the version is still unstamped.
//! assert_eq!(upgraded["telephone"], json!("555"));
//! assert!(!upgraded.contains_key("migrationVersion"));
//!
//! let mut saved = upgraded;
//! registry.write_stamp(&mut saved);
//! assert_eq!(saved["migrationVersion"], json!(1));
//! ```

mod document;
mod error;
mod filter;
mod hooks;
mod query;
mod registry;

pub use document::{doc_id, set_version, version_of, RawDocument, VERSION_FIELD};
pub use error::{RegistryConfigError, StepError, TransformError};
pub use filter::{matches, version_below, Filter};
pub use hooks::DocumentLifecycle;
pub use query::{QueryShimError, VersionRange, VersionedQuery};
pub use registry::{FnStep, MigrationRegistry, MigrationStep, RegistryBuilder};
