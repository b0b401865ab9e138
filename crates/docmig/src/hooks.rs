use std::sync::Arc;

use crate::document::RawDocument;
use crate::error::TransformError;
use crate::registry::MigrationRegistry;

/// The two lifecycle entry points a data-access layer wires into its
/// persistence callbacks.
///
/// How the callbacks are dispatched — ORM events, repository wrappers,
/// driver middleware — is the data-access layer's concern. The contract is
/// only: [`after_load`](Self::after_load) runs on the raw stored document
/// before it is mapped to a domain object, and
/// [`before_save`](Self::before_save) runs on the raw document immediately
/// before it is sent to the store.
#[derive(Clone)]
pub struct DocumentLifecycle {
    registry: Arc<MigrationRegistry>,
}

impl DocumentLifecycle {
    pub fn new(registry: Arc<MigrationRegistry>) -> Self {
        Self { registry }
    }

    /// The shared registry.
    pub fn registry(&self) -> &Arc<MigrationRegistry> {
        &self.registry
    }

    /// Upgrade a freshly loaded document to the latest logical shape.
    ///
    /// A failing step fails this one load; the stored document is
    /// untouched and unrelated loads are unaffected.
    pub fn after_load(&self, doc: RawDocument) -> Result<RawDocument, TransformError> {
        self.registry.read_upgrade(&doc)
    }

    /// Stamp a document about to be persisted with the target version.
    pub fn before_save(&self, mut doc: RawDocument) -> RawDocument {
        self.registry.write_stamp(&mut doc);
        doc
    }
}
