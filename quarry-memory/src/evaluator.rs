//! Query expression evaluation for in-memory document filtering.
//!
//! This module provides the evaluation engine for query expressions,
//! enabling filtering and comparison operations on BSON documents.
//! Field names are dotted paths; a missing field reads as `null` for
//! equality-style operators and never satisfies a range comparison.

use bson::{Bson, Document, datetime::DateTime, oid::ObjectId};
use std::{cmp::Ordering, collections::HashMap};

use quarry_core::{
    error::{StoreError, StoreResult},
    query::{Expr, FieldOp, QueryVisitor, Sort, SortDirection},
};

/// Type-erased, comparable representation of BSON values.
///
/// Numeric types are normalized to f64 so that `1`, `1i64` and `1.0` compare equal.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    Null,
    Bool(bool),
    Number(f64),
    DateTime(DateTime),
    String(&'a str),
    ObjectId(ObjectId),
    Binary(&'a [u8]),
    Array(Vec<Comparable<'a>>),
    Map(HashMap<&'a str, Comparable<'a>>),
    /// Types with no meaningful comparison (regexes, code, min/max keys, ...).
    Opaque,
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Null | Bson::Undefined => Comparable::Null,
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::Int32(value) => Comparable::Number(*value as f64),
            Bson::Int64(value) => Comparable::Number(*value as f64),
            Bson::Double(value) => Comparable::Number(*value),
            Bson::DateTime(value) => Comparable::DateTime(*value),
            Bson::String(value) => Comparable::String(value),
            Bson::ObjectId(value) => Comparable::ObjectId(*value),
            Bson::Binary(binary) => Comparable::Binary(&binary.bytes),
            Bson::Array(arr) => Comparable::Array(
                arr
                    .iter()
                    .map(Comparable::from)
                    .collect::<Vec<_>>()
            ),
            Bson::Document(doc) => Comparable::Map(
                doc
                    .iter()
                    .map(|(k, v)| (k.as_str(), Comparable::from(v)))
                    .collect::<HashMap<_, _>>()
            ),
            _ => Comparable::Opaque,
        }
    }
}

impl<'a> PartialEq for Comparable<'a> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Number(a), Comparable::Number(b)) => a == b,
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a == b,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a == b,
            (Comparable::Binary(a), Comparable::Binary(b)) => a == b,
            (Comparable::Array(a), Comparable::Array(b)) => a == b,
            (Comparable::Map(a), Comparable::Map(b)) => a == b,
            _ => false,
        }
    }
}

impl<'a> PartialOrd for Comparable<'a> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.partial_cmp(b),
            (Comparable::String(a), Comparable::String(b)) => a.partial_cmp(b),
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a.partial_cmp(b),
            (Comparable::Binary(a), Comparable::Binary(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

impl Comparable<'_> {
    /// Position of this value's type in the MongoDB cross-type sort order.
    fn rank(&self) -> u8 {
        match self {
            Comparable::Null => 1,
            Comparable::Number(_) => 2,
            Comparable::String(_) => 3,
            Comparable::Map(_) => 4,
            Comparable::Array(_) => 5,
            Comparable::Binary(_) => 6,
            Comparable::ObjectId(_) => 7,
            Comparable::Bool(_) => 8,
            Comparable::DateTime(_) => 9,
            Comparable::Opaque => 10,
        }
    }

    /// A total order: values of different types order by type, values of the same type
    /// by value. Incomparable values of the same type are equal.
    pub(crate) fn sort_cmp(&self, other: &Self) -> Ordering {
        self.rank()
            .cmp(&other.rank())
            .then_with(|| self.partial_cmp(other).unwrap_or(Ordering::Equal))
    }
}

/// Resolves a dotted path (`a.b.0.c`) inside a document. Numeric segments index arrays.
pub(crate) fn lookup<'a>(document: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut segments = path.split('.');
    let mut current = document.get(segments.next()?)?;

    for segment in segments {
        current = match current {
            Bson::Document(inner) => inner.get(segment)?,
            Bson::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

/// Compares two optional field values for sorting. Missing values sort as `null`.
pub(crate) fn compare_values(left: Option<&Bson>, right: Option<&Bson>) -> Ordering {
    let left = left.map(Comparable::from).unwrap_or(Comparable::Null);
    let right = right.map(Comparable::from).unwrap_or(Comparable::Null);

    left.sort_cmp(&right)
}

/// Sorts documents in place by the given keys, most significant first. The sort is stable.
pub(crate) fn sort_documents(documents: &mut [Document], sort: &[Sort]) {
    if sort.is_empty() {
        return;
    }

    documents.sort_by(|a, b| {
        sort.iter()
            .map(|key| {
                let ordering = compare_values(lookup(a, &key.field), lookup(b, &key.field));
                match key.direction {
                    SortDirection::Asc => ordering,
                    SortDirection::Desc => ordering.reverse(),
                }
            })
            .find(|ordering| *ordering != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    });
}

pub(crate) struct DocumentEvaluator<'a> {
    document: &'a Document,
}

impl<'a> DocumentEvaluator<'a> {
    pub fn new(document: &'a Document) -> Self {
        Self { document }
    }

    pub fn evaluate(&mut self, expr: &Expr) -> StoreResult<bool> {
        self.visit_expr(expr)
    }

    pub fn matches(document: &Document, expr: &Expr) -> StoreResult<bool> {
        DocumentEvaluator::new(document).evaluate(expr)
    }

    pub fn filter_documents(
        documents: impl IntoIterator<Item = &'a Document>,
        expr: &Expr,
    ) -> StoreResult<Vec<Document>> {
        let mut matched = Vec::new();

        for document in documents {
            if DocumentEvaluator::new(document).evaluate(expr)? {
                matched.push(document.clone());
            }
        }

        Ok(matched)
    }

    /// Equality as MongoDB applies it: a missing field equals `null`, and an array
    /// field also matches when one of its elements is equal.
    fn equals(field_value: Option<&Bson>, value: &Bson) -> bool {
        let expected = Comparable::from(value);

        match field_value {
            None => expected == Comparable::Null,
            Some(field_value) => {
                let actual = Comparable::from(field_value);
                if actual == expected {
                    return true;
                }
                match actual {
                    Comparable::Array(items) => items.iter().any(|item| item == &expected),
                    _ => false,
                }
            }
        }
    }

    fn compare(field_value: &Bson, value: &Bson, accept: impl Fn(Ordering) -> bool) -> bool {
        let expected = Comparable::from(value);
        let actual = Comparable::from(field_value);

        if let Some(ordering) = actual.partial_cmp(&expected) {
            return accept(ordering);
        }

        match actual {
            Comparable::Array(items) => items
                .iter()
                .filter_map(|item| item.partial_cmp(&expected))
                .any(accept),
            _ => false,
        }
    }

    fn any_of(field_value: Option<&Bson>, values: &Bson) -> StoreResult<bool> {
        let Bson::Array(values) = values else {
            return Err(StoreError::InvalidFilter("$in/$nin require an array".into()));
        };

        Ok(values.iter().any(|value| Self::equals(field_value, value)))
    }
}

impl<'a> QueryVisitor for DocumentEvaluator<'a> {
    type Output = bool;
    type Error = StoreError;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        for expr in exprs {
            if !self.visit_expr(expr)? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        for expr in exprs {
            if self.visit_expr(expr)? {
                return Ok(true);
            }
        }

        Ok(false)
    }

    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        Ok(!self.visit_expr(expr)?)
    }

    fn visit_exists(&mut self, field: &str, should_exist: bool) -> Result<Self::Output, Self::Error> {
        Ok(lookup(self.document, field).is_some() == should_exist)
    }

    fn visit_field(&mut self, field: &str, op: &FieldOp, value: &Bson) -> Result<Self::Output, Self::Error> {
        let field_value = lookup(self.document, field);

        match op {
            FieldOp::Eq => Ok(Self::equals(field_value, value)),
            FieldOp::Ne => Ok(!Self::equals(field_value, value)),
            FieldOp::In => Self::any_of(field_value, value),
            FieldOp::Nin => Ok(!Self::any_of(field_value, value)?),
            FieldOp::Gt | FieldOp::Gte | FieldOp::Lt | FieldOp::Lte => {
                let Some(field_value) = field_value else {
                    return Ok(false);
                };

                Ok(Self::compare(field_value, value, |ordering| match op {
                    FieldOp::Gt => ordering == Ordering::Greater,
                    FieldOp::Gte => ordering != Ordering::Less,
                    FieldOp::Lt => ordering == Ordering::Less,
                    _ => ordering != Ordering::Greater,
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use quarry_core::query::Filter;

    fn matches(document: Document, filter: Document) -> bool {
        DocumentEvaluator::matches(&document, &Filter::parse(&filter).unwrap()).unwrap()
    }

    #[test]
    fn equality_normalizes_numbers() {
        assert!(matches(doc! { "qty": 5_i64 }, doc! { "qty": 5 }));
        assert!(matches(doc! { "qty": 5.0 }, doc! { "qty": 5 }));
        assert!(!matches(doc! { "qty": "5" }, doc! { "qty": 5 }));
    }

    #[test]
    fn missing_fields_equal_null() {
        assert!(matches(doc! { "a": 1 }, doc! { "b": null }));
        assert!(matches(doc! { "a": 1 }, doc! { "b": { "$ne": 1 } }));
        assert!(!matches(doc! { "a": 1 }, doc! { "b": { "$gt": 0 } }));
    }

    #[test]
    fn arrays_match_their_elements() {
        let document = doc! { "tags": ["red", "blank"], "dim": [14, 21] };

        assert!(matches(document.clone(), doc! { "tags": "red" }));
        assert!(matches(document.clone(), doc! { "tags": ["red", "blank"] }));
        assert!(matches(document.clone(), doc! { "dim": { "$gt": 20 } }));
        assert!(matches(document.clone(), doc! { "tags": { "$in": ["blue", "blank"] } }));
        assert!(!matches(document, doc! { "tags": { "$nin": ["red"] } }));
    }

    #[test]
    fn dotted_paths_reach_embedded_documents() {
        let document = doc! { "size": { "h": 14, "uom": "cm" }, "items": [{ "n": 1 }] };

        assert!(matches(document.clone(), doc! { "size.uom": "cm" }));
        assert!(matches(document.clone(), doc! { "size.h": { "$lt": 15 } }));
        assert!(matches(document.clone(), doc! { "items.0.n": 1 }));
        assert!(matches(document, doc! { "size.w": { "$exists": false } }));
    }

    #[test]
    fn logical_operators_compose() {
        let document = doc! { "status": "A", "qty": 30 };

        assert!(matches(document.clone(), doc! { "$or": [{ "status": "B" }, { "qty": { "$gte": 30 } }] }));
        assert!(!matches(document.clone(), doc! { "$nor": [{ "status": "A" }] }));
        assert!(matches(document, doc! { "qty": { "$not": { "$lt": 10 } } }));
    }

    #[test]
    fn range_comparisons_do_not_cross_types() {
        assert!(!matches(doc! { "v": "10" }, doc! { "v": { "$gt": 5 } }));
        assert!(matches(doc! { "v": "b" }, doc! { "v": { "$gt": "a" } }));
    }

    #[test]
    fn sorting_is_multi_key_and_orders_types() {
        let mut documents = vec![
            doc! { "_id": 1, "g": "b", "n": 1 },
            doc! { "_id": 2, "g": "a", "n": 2 },
            doc! { "_id": 3, "g": "a", "n": 3 },
            doc! { "_id": 4, "n": 0 },
        ];

        sort_documents(
            &mut documents,
            &[
                Sort { field: "g".into(), direction: SortDirection::Asc },
                Sort { field: "n".into(), direction: SortDirection::Desc },
            ],
        );

        let ids: Vec<i32> = documents.iter().map(|d| d.get_i32("_id").unwrap()).collect();
        assert_eq!(ids, vec![4, 3, 2, 1]);
    }
}
