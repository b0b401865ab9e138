/// Error returned by an individual step's transform.
pub type StepError = Box<dyn std::error::Error + Send + Sync>;

/// The registry was misconfigured. Fatal: surfaced at process start,
/// never at runtime.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryConfigError {
    /// Two steps share the same version.
    #[error("duplicate migration version {0}")]
    DuplicateVersion(u32),

    /// Step versions must be positive; version 0 is the implicit
    /// "never migrated" state.
    #[error("migration version must be positive")]
    NonPositiveVersion,

    /// The stamped target version must cover every registered step.
    #[error("target version {target} is below highest step version {highest}")]
    TargetBelowSteps { target: u32, highest: u32 },
}

/// A step's transform failed for a specific document.
///
/// The load path fails with this error rather than surfacing a partially
/// upgraded document. The stored document is unaffected: read-upgrade
/// never writes.
#[derive(Debug, thiserror::Error)]
#[error("migration step v{version} failed for document {}: {reason}", .id.as_deref().unwrap_or("<unknown>"))]
pub struct TransformError {
    /// Best-effort identity of the offending document.
    pub id: Option<String>,
    /// The step whose transform failed.
    pub version: u32,
    /// What the transform reported.
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transform_error_display() {
        let err = TransformError {
            id: Some("42".into()),
            version: 3,
            reason: "missing field".into(),
        };
        assert_eq!(
            err.to_string(),
            "migration step v3 failed for document 42: missing field"
        );

        let err = TransformError {
            id: None,
            version: 1,
            reason: "boom".into(),
        };
        assert!(err.to_string().contains("<unknown>"));
    }
}
