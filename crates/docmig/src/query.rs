//! Version-aware query compilation.
//!
//! A collection mid-migration holds documents of mixed schema versions, so
//! a logical filter ("customers with telephone number 555") has a different
//! physical shape depending on each document's `migrationVersion`. The
//! caller declares, per version range, how the predicate looks against that
//! range's representation; [`VersionedQuery::compile`] unions the ranges
//! into one filter that is correct across the whole collection.
//!
//! Once the reconciliation job has emptied a range (no document below its
//! upper bound remains), the caller drops that declaration and the compiled
//! filter shrinks. Retirement is an operator decision, never automatic.

use serde_json::json;

use crate::document::VERSION_FIELD;
use crate::filter::Filter;

/// A half-open range of schema versions, `min` inclusive to `max`
/// exclusive; `max = None` means unbounded above.
///
/// A range starting at 0 also covers documents with no `migrationVersion`
/// field at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionRange {
    min: u32,
    max: Option<u32>,
}

impl VersionRange {
    /// Versions in `min..max`.
    pub fn new(min: u32, max: u32) -> Self {
        Self {
            min,
            max: Some(max),
        }
    }

    /// Versions `min` and above.
    pub fn from(min: u32) -> Self {
        Self { min, max: None }
    }

    /// Whether `version` falls inside this range.
    pub fn contains(&self, version: u32) -> bool {
        version >= self.min && self.max.map_or(true, |max| version < max)
    }

    fn is_empty(&self) -> bool {
        self.max.is_some_and(|max| max <= self.min)
    }

    fn overlaps(&self, other: &VersionRange) -> bool {
        let below = |a: &VersionRange, b: &VersionRange| a.max.is_some_and(|max| max <= b.min);
        !(below(self, other) || below(other, self))
    }

    /// The clause matching documents whose stored version falls in this
    /// range, treating an absent `migrationVersion` as 0.
    fn version_clause(&self) -> Filter {
        let mut bounds = vec![json!({ VERSION_FIELD: { "$gte": self.min } })];
        if let Some(max) = self.max {
            bounds.push(json!({ VERSION_FIELD: { "$lt": max } }));
        }
        let present = if bounds.len() == 1 {
            bounds.pop().unwrap()
        } else {
            json!({ "$and": bounds })
        };

        if self.min == 0 {
            json!({ "$or": [ { VERSION_FIELD: { "$exists": false } }, present ] })
        } else {
            present
        }
    }
}

/// A declaration of a range's predicate was malformed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryShimError {
    /// No ranges were declared; the compiled filter would match nothing.
    #[error("a versioned query needs at least one version range")]
    NoRanges,

    /// A declared range contains no versions.
    #[error("version range {min}..{max} is empty")]
    EmptyRange { min: u32, max: u32 },

    /// Two declared ranges share versions, which would double-match.
    #[error("version ranges overlap at version {version}")]
    OverlappingRanges { version: u32 },
}

/// Builds the disjunctive, version-aware physical filter for one logical
/// predicate.
///
/// # Example
///
/// ```
/// use docmig::{VersionRange, VersionedQuery};
/// use serde_json::json;
///
/// // Up to v0 the number is a scalar `telephone`; from v1 it is an
/// // element of the `telephones` list.
/// let filter = VersionedQuery::new()
///     .range(VersionRange::new(0, 1), json!({"telephone": "555"}))
///     .range(VersionRange::from(1), json!({"telephones": {"$in": ["555"]}}))
///     .compile()
///     .unwrap();
///
/// assert!(filter.get("$or").is_some());
/// ```
#[derive(Debug, Default)]
pub struct VersionedQuery {
    ranges: Vec<(VersionRange, Filter)>,
}

impl VersionedQuery {
    /// Start an empty declaration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the physical predicate for one version range.
    pub fn range(mut self, range: VersionRange, predicate: Filter) -> Self {
        self.ranges.push((range, predicate));
        self
    }

    /// Compile the declarations into one filter: the `$or`, over every
    /// range, of `(range's predicate) AND (version falls in range)`.
    pub fn compile(self) -> Result<Filter, QueryShimError> {
        if self.ranges.is_empty() {
            return Err(QueryShimError::NoRanges);
        }
        for (range, _) in &self.ranges {
            if range.is_empty() {
                return Err(QueryShimError::EmptyRange {
                    min: range.min,
                    max: range.max.unwrap_or(range.min),
                });
            }
        }
        for (i, (a, _)) in self.ranges.iter().enumerate() {
            for (b, _) in &self.ranges[i + 1..] {
                if a.overlaps(b) {
                    return Err(QueryShimError::OverlappingRanges {
                        version: a.min.max(b.min),
                    });
                }
            }
        }

        let clauses: Vec<Filter> = self
            .ranges
            .into_iter()
            .map(|(range, predicate)| json!({ "$and": [predicate, range.version_clause()] }))
            .collect();
        Ok(json!({ "$or": clauses }))
    }
}
