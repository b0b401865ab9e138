use std::collections::BTreeMap;
use std::ops::Bound;

use crate::document::{doc_id, set_version, version_of, RawDocument};
use crate::error::{RegistryConfigError, StepError, TransformError};

/// A single migration step that upgrades a document's shape *to* its
/// version.
///
/// Steps form an ascending chain keyed by the version they produce. A
/// transform must be **pure and deterministic**, must tolerate any input
/// whose stored version is below `version()` (it may not assume a
/// particular prior shape beyond that), and must be additive: it may add
/// or restructure fields but should not delete fields that the previous
/// application release still reads, so two releases can run side by side
/// during a rolling deploy.
pub trait MigrationStep: Send + Sync {
    /// The version this step upgrades a document to. Positive, unique
    /// within a registry.
    fn version(&self) -> u32;

    /// Transform the document. Receives the output of the previous step
    /// in the chain (or the raw document for the first pending step).
    fn apply(&self, doc: RawDocument) -> Result<RawDocument, StepError>;
}

/// A [`MigrationStep`] built from a closure.
pub struct FnStep<F> {
    version: u32,
    transform: F,
}

impl<F> FnStep<F>
where
    F: Fn(RawDocument) -> Result<RawDocument, StepError> + Send + Sync,
{
    /// Wrap a closure as the step upgrading to `version`.
    pub fn new(version: u32, transform: F) -> Self {
        Self { version, transform }
    }
}

impl<F> MigrationStep for FnStep<F>
where
    F: Fn(RawDocument) -> Result<RawDocument, StepError> + Send + Sync,
{
    fn version(&self) -> u32 {
        self.version
    }

    fn apply(&self, doc: RawDocument) -> Result<RawDocument, StepError> {
        (self.transform)(doc)
    }
}

/// An ordered, immutable set of migration steps plus the target version
/// stamped on write.
///
/// Constructed once at process start and shared by reference; it has no
/// mutable state, so concurrent readers need no synchronization. The
/// registry is stateless with respect to individual documents.
///
/// Two operations matter:
///
/// - [`read_upgrade`](Self::read_upgrade) — apply pending steps to a
///   working copy at load time, leaving `migrationVersion` untouched.
/// - [`write_stamp`](Self::write_stamp) — unconditionally stamp the
///   target version immediately before persistence.
pub struct MigrationRegistry {
    steps: BTreeMap<u32, Box<dyn MigrationStep>>,
    target_version: u32,
}

/// Builder for a [`MigrationRegistry`], used at process start.
#[derive(Default)]
pub struct RegistryBuilder {
    steps: Vec<Box<dyn MigrationStep>>,
    target_version: Option<u32>,
}

impl RegistryBuilder {
    /// Register a migration step.
    pub fn step(mut self, step: impl MigrationStep + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    /// Register an already boxed step.
    pub fn boxed_step(mut self, step: Box<dyn MigrationStep>) -> Self {
        self.steps.push(step);
        self
    }

    /// The version stamped on every write. Defaults to the highest
    /// registered step version.
    pub fn target_version(mut self, version: u32) -> Self {
        self.target_version = Some(version);
        self
    }

    /// Validate and build the registry.
    pub fn build(self) -> Result<MigrationRegistry, RegistryConfigError> {
        let mut steps = BTreeMap::new();
        for step in self.steps {
            let version = step.version();
            if version == 0 {
                return Err(RegistryConfigError::NonPositiveVersion);
            }
            if steps.insert(version, step).is_some() {
                return Err(RegistryConfigError::DuplicateVersion(version));
            }
        }

        let highest = steps.keys().next_back().copied().unwrap_or(0);
        let target_version = self.target_version.unwrap_or(highest);
        if target_version < highest {
            return Err(RegistryConfigError::TargetBelowSteps {
                target: target_version,
                highest,
            });
        }

        Ok(MigrationRegistry {
            steps,
            target_version,
        })
    }
}

impl MigrationRegistry {
    /// Start building a registry.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// The version stamped on every write.
    pub fn target_version(&self) -> u32 {
        self.target_version
    }

    /// Registered step versions, ascending.
    pub fn step_versions(&self) -> Vec<u32> {
        self.steps.keys().copied().collect()
    }

    /// Whether a document at `version` still has pending steps or an
    /// outdated stamp. This is the reconciliation selection predicate.
    pub fn is_stale(&self, version: u32) -> bool {
        version < self.target_version
    }

    /// Upgrade a loaded document to the latest logical shape, in memory.
    ///
    /// Applies exactly the steps with `version > stored version`, in
    /// ascending order, each step's output feeding the next. The result's
    /// `migrationVersion` is left exactly as loaded — stamping happens
    /// only at save time. Pure: repeated calls on the same raw document
    /// yield identical output, and the store is never touched.
    ///
    /// A document stamped *above* the target version (written by a newer
    /// release during a rolling deploy) has no pending steps and passes
    /// through unchanged.
    ///
    /// # Errors
    ///
    /// [`TransformError`] if a step fails; no partial result is returned.
    pub fn read_upgrade(&self, doc: &RawDocument) -> Result<RawDocument, TransformError> {
        let stored = version_of(doc);
        let mut current = doc.clone();
        for (&version, step) in self.steps.range((Bound::Excluded(stored), Bound::Unbounded)) {
            current = step.apply(current).map_err(|e| TransformError {
                id: doc_id(doc),
                version,
                reason: e.to_string(),
            })?;
        }
        Ok(current)
    }

    /// Stamp the document with the target version, overwriting any prior
    /// value, immediately before it is sent to the store.
    ///
    /// The caller is responsible for the document already being in the
    /// latest logical shape; no structural transform happens here.
    pub fn write_stamp(&self, doc: &mut RawDocument) {
        set_version(doc, self.target_version);
    }
}

impl std::fmt::Debug for MigrationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationRegistry")
            .field("steps", &self.step_versions())
            .field("target_version", &self.target_version)
            .finish()
    }
}
