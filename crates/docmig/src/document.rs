use serde_json::{Map, Value};

/// The one reserved top-level field every document in the collection gains.
///
/// An integer; absence is semantically equivalent to `0`.
pub const VERSION_FIELD: &str = "migrationVersion";

/// A raw document as loaded from the store: nested maps/sequences of
/// primitives. The store and the domain mapper own its meaning; the
/// migration engine only interprets [`VERSION_FIELD`].
pub type RawDocument = Map<String, Value>;

/// The stored schema version of a document. Absent (or non-integer) is 0.
pub fn version_of(doc: &RawDocument) -> u32 {
    doc.get(VERSION_FIELD)
        .and_then(Value::as_u64)
        .map(|v| v.min(u64::from(u32::MAX)) as u32)
        .unwrap_or(0)
}

/// Overwrite the document's stored schema version.
pub fn set_version(doc: &mut RawDocument, version: u32) {
    doc.insert(VERSION_FIELD.to_string(), Value::from(version));
}

/// Best-effort identity of a document, for error reporting.
///
/// Looks at `_id`, then `id`. Scalar values are rendered as strings.
pub fn doc_id(doc: &RawDocument) -> Option<String> {
    let id = doc.get("_id").or_else(|| doc.get("id"))?;
    match id {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
