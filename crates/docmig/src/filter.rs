//! A small Mongo-style filter language over raw documents.
//!
//! Filters are plain `serde_json` values, so they can be handed to a real
//! document store's query API unchanged or evaluated in memory against a
//! [`RawDocument`] with [`matches`]. The query compatibility shim emits
//! filters in this shape, and the reconciliation job's selection predicate
//! is one.
//!
//! Supported forms: `{"field": literal}` (equality), `{"field": {"$op":
//! operand}}` with `$eq`, `$ne`, `$lt`, `$lte`, `$gt`, `$gte`, `$in`,
//! `$exists`, and the combinators `{"$and": [...]}` / `{"$or": [...]}`.
//! Field paths may be dotted (`"address.city"`).

use std::cmp::Ordering;

use serde_json::{json, Value};

use crate::document::{RawDocument, VERSION_FIELD};

/// A filter expression. See the module docs for the supported shape.
pub type Filter = Value;

/// The predicate selecting documents that still need reconciliation:
/// `migrationVersion` absent or below `target`.
pub fn version_below(target: u32) -> Filter {
    json!({
        "$or": [
            { VERSION_FIELD: { "$exists": false } },
            { VERSION_FIELD: { "$lt": target } },
        ]
    })
}

/// Evaluate a filter against a document.
///
/// Unknown operators and malformed clauses match nothing, mirroring how a
/// store-side evaluator would reject rather than over-match.
pub fn matches(filter: &Filter, doc: &RawDocument) -> bool {
    let Some(clauses) = filter.as_object() else {
        return false;
    };
    clauses.iter().all(|(key, operand)| match key.as_str() {
        "$and" => operand
            .as_array()
            .is_some_and(|subs| subs.iter().all(|f| matches(f, doc))),
        "$or" => operand
            .as_array()
            .is_some_and(|subs| subs.iter().any(|f| matches(f, doc))),
        path => field_matches(lookup(doc, path), operand),
    })
}

/// Resolve a (possibly dotted) field path against a document.
fn lookup<'a>(doc: &'a RawDocument, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = doc.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn field_matches(value: Option<&Value>, condition: &Value) -> bool {
    match condition.as_object() {
        Some(ops) if ops.keys().any(|k| k.starts_with('$')) => ops
            .iter()
            .all(|(op, operand)| operator_matches(value, op, operand)),
        // Literal (including plain objects): equality against the stored value.
        _ => value == Some(condition),
    }
}

fn operator_matches(value: Option<&Value>, op: &str, operand: &Value) -> bool {
    match op {
        "$exists" => operand.as_bool() == Some(value.is_some()),
        "$eq" => value == Some(operand),
        "$ne" => value != Some(operand),
        "$in" => operand
            .as_array()
            .is_some_and(|set| value.is_some_and(|v| set.contains(v))),
        "$lt" | "$lte" | "$gt" | "$gte" => {
            let Some(ordering) = value.and_then(|v| compare(v, operand)) else {
                return false;
            };
            match op {
                "$lt" => ordering == Ordering::Less,
                "$lte" => ordering != Ordering::Greater,
                "$gt" => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            }
        }
        _ => false,
    }
}

/// Order two values if they are comparable: numbers with numbers, strings
/// with strings. Mixed or non-scalar operands do not compare.
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}
