//! In-process aggregation pipeline evaluation.
//!
//! Supports the query stages `$documents`, `$match`, `$sort`, `$skip`, `$limit` and
//! `$project`, plus every update operator as a stage of its own (`$set`, `$unset`,
//! `$inc`, `$mul`, `$min`, `$max`, `$rename`, `$push`, `$addToSet`, `$pull`, `$pop`,
//! `$currentDate`, `$setOnInsert`). Update-operator stages apply their operands
//! literally, with update semantics, so an update document decomposed into one stage
//! per operator evaluates exactly like the update itself.
//!
//! `$setOnInsert` is a no-op here; upserts rewrite it into `$set` before evaluation.

use bson::{Bson, Document, Timestamp, doc};
use chrono::Utc;
use std::cmp::Ordering;
use tracing::trace;

use quarry_core::{
    error::{StoreError, StoreResult},
    query::{FindOptions, Filter},
};

use crate::evaluator::{Comparable, DocumentEvaluator, compare_values, lookup, sort_documents};

/// The source stage that replaces the pipeline input with literal documents.
pub const DOCUMENTS_STAGE: &str = "$documents";

const UPDATE_OPERATORS: &[&str] = &[
    "$set",
    "$unset",
    "$inc",
    "$mul",
    "$min",
    "$max",
    "$rename",
    "$push",
    "$addToSet",
    "$pull",
    "$pop",
    "$currentDate",
    "$setOnInsert",
];

/// Returns true if the pipeline reads from a `$documents` stage rather than a collection.
pub fn starts_with_documents(pipeline: &[Document]) -> bool {
    pipeline
        .first()
        .is_some_and(|stage| stage.contains_key(DOCUMENTS_STAGE))
}

/// Runs `pipeline` over `input` and returns the resulting documents.
///
/// # Errors
///
/// Returns [`StoreError::InvalidPipeline`] for malformed or unknown stages and
/// [`StoreError::InvalidUpdate`] when an update operator cannot be applied to a document.
pub fn evaluate(pipeline: &[Document], input: Vec<Document>) -> StoreResult<Vec<Document>> {
    let mut documents = input;

    for (index, stage) in pipeline.iter().enumerate() {
        let (name, operand) = single_entry(stage)?;
        trace!(stage = %name, index, input = documents.len(), "evaluating stage");

        documents = match name {
            DOCUMENTS_STAGE if index == 0 => literal_documents(operand)?,
            DOCUMENTS_STAGE => {
                return Err(StoreError::InvalidPipeline("$documents must be the first stage".into()));
            }
            "$match" => {
                let expr = Filter::parse(operand_document(name, operand)?)?;
                let mut matched = Vec::with_capacity(documents.len());
                for document in documents {
                    if DocumentEvaluator::matches(&document, &expr)? {
                        matched.push(document);
                    }
                }
                matched
            }
            "$limit" => {
                let limit = non_negative(name, operand)?;
                documents.truncate(limit);
                documents
            }
            "$skip" => {
                let skip = non_negative(name, operand)?;
                documents.into_iter().skip(skip).collect()
            }
            "$sort" => {
                let sort = FindOptions {
                    sort: Some(operand_document(name, operand)?.clone()),
                    ..Default::default()
                }
                .into_query(&Document::new())
                .map_err(|err| StoreError::InvalidPipeline(err.to_string()))?
                .sort;
                sort_documents(&mut documents, &sort);
                documents
            }
            "$project" => {
                let projection = operand_document(name, operand)?;
                documents
                    .iter()
                    .map(|document| project(document, projection))
                    .collect::<StoreResult<Vec<_>>>()?
            }
            operator if UPDATE_OPERATORS.contains(&operator) => {
                let operand = operand.clone();
                documents
                    .into_iter()
                    .map(|document| apply_operator(operator, &operand, document))
                    .collect::<StoreResult<Vec<_>>>()?
            }
            unknown => {
                return Err(StoreError::InvalidPipeline(format!("unknown stage {unknown}")));
            }
        };
    }

    Ok(documents)
}

/// Applies a MongoDB projection document (`{field: 1}` or `{field: 0}`) to a document.
///
/// `_id` is kept unless the projection excludes it explicitly. Inclusions and exclusions
/// of fields other than `_id` cannot be mixed.
pub fn project(document: &Document, projection: &Document) -> StoreResult<Document> {
    let mut include_id = true;
    let mut inclusions = Vec::new();
    let mut exclusions = Vec::new();

    for (field, flag) in projection {
        let included = truthy(flag);
        if field == "_id" {
            include_id = included;
        } else if included {
            inclusions.push(field.as_str());
        } else {
            exclusions.push(field.as_str());
        }
    }

    if !inclusions.is_empty() && !exclusions.is_empty() {
        return Err(StoreError::InvalidPipeline(
            "projection cannot mix inclusion and exclusion".into(),
        ));
    }

    let inclusive = !inclusions.is_empty()
        || (exclusions.is_empty() && projection.get("_id").is_some_and(truthy));

    if !inclusive {
        let mut projected = document.clone();
        for field in exclusions {
            remove_path(&mut projected, field);
        }
        if !include_id {
            projected.remove("_id");
        }
        return Ok(projected);
    }

    let mut projected = Document::new();
    if include_id {
        if let Some(id) = document.get("_id") {
            projected.insert("_id", id.clone());
        }
    }
    for field in inclusions {
        if let Some(value) = lookup(document, field) {
            set_path(&mut projected, field, value.clone())?;
        }
    }

    Ok(projected)
}

fn apply_operator(operator: &str, operand: &Bson, mut document: Document) -> StoreResult<Document> {
    match operator {
        "$setOnInsert" => {}
        "$unset" => {
            for field in unset_fields(operand)? {
                remove_path(&mut document, &field);
            }
        }
        _ => {
            for (field, value) in operand_document(operator, operand)? {
                match operator {
                    "$set" => set_path(&mut document, field, value.clone())?,
                    "$inc" => {
                        let current = lookup(&document, field).cloned();
                        let updated = match current {
                            None => numeric(operator, field, value)?.clone(),
                            Some(current) => arithmetic(operator, field, &current, value, Arithmetic::Add)?,
                        };
                        set_path(&mut document, field, updated)?;
                    }
                    "$mul" => {
                        let zero = zero_like(numeric(operator, field, value)?);
                        let current = lookup(&document, field).cloned().unwrap_or(zero);
                        let updated = arithmetic(operator, field, &current, value, Arithmetic::Multiply)?;
                        set_path(&mut document, field, updated)?;
                    }
                    "$min" | "$max" => {
                        let wanted = if operator == "$min" { Ordering::Less } else { Ordering::Greater };
                        let replace = match lookup(&document, field) {
                            None => true,
                            Some(current) => compare_values(Some(value), Some(current)) == wanted,
                        };
                        if replace {
                            set_path(&mut document, field, value.clone())?;
                        }
                    }
                    "$rename" => {
                        let Bson::String(to) = value else {
                            return Err(StoreError::InvalidUpdate(format!(
                                "$rename target for {field} must be a string"
                            )));
                        };
                        if let Some(moved) = remove_path(&mut document, field) {
                            set_path(&mut document, to, moved)?;
                        }
                    }
                    "$push" | "$addToSet" => {
                        let mut items = array_at(&document, operator, field)?;
                        for item in each_values(value) {
                            let present = items
                                .iter()
                                .any(|existing| Comparable::from(existing) == Comparable::from(&item));
                            if operator == "$push" || !present {
                                items.push(item);
                            }
                        }
                        set_path(&mut document, field, Bson::Array(items))?;
                    }
                    "$pull" => {
                        if lookup(&document, field).is_some() {
                            let items = array_at(&document, operator, field)?;
                            let mut kept = Vec::with_capacity(items.len());
                            for item in items {
                                if !pull_matches(&item, value)? {
                                    kept.push(item);
                                }
                            }
                            set_path(&mut document, field, Bson::Array(kept))?;
                        }
                    }
                    "$pop" => {
                        if lookup(&document, field).is_some() {
                            let mut items = array_at(&document, operator, field)?;
                            if !items.is_empty() {
                                match value {
                                    Bson::Int32(-1) | Bson::Int64(-1) => {
                                        items.remove(0);
                                    }
                                    Bson::Int32(1) | Bson::Int64(1) => {
                                        items.pop();
                                    }
                                    other => {
                                        return Err(StoreError::InvalidUpdate(format!(
                                            "$pop for {field} must be 1 or -1, got {other}"
                                        )));
                                    }
                                }
                            }
                            set_path(&mut document, field, Bson::Array(items))?;
                        }
                    }
                    "$currentDate" => {
                        let now = Utc::now();
                        let stamp = match value {
                            Bson::Document(spec) if spec.get_str("$type").ok() == Some("timestamp") => {
                                Bson::Timestamp(Timestamp {
                                    time: now.timestamp() as u32,
                                    increment: 1,
                                })
                            }
                            _ => Bson::DateTime(bson::DateTime::from_chrono(now)),
                        };
                        set_path(&mut document, field, stamp)?;
                    }
                    unknown => {
                        return Err(StoreError::InvalidPipeline(format!("unknown update operator {unknown}")));
                    }
                }
            }
        }
    }

    Ok(document)
}

#[derive(Clone, Copy)]
enum Arithmetic {
    Add,
    Multiply,
}

fn arithmetic(operator: &str, field: &str, current: &Bson, operand: &Bson, op: Arithmetic) -> StoreResult<Bson> {
    let invalid = || StoreError::InvalidUpdate(format!("{operator} requires numeric values at {field}"));

    Ok(match (current, numeric(operator, field, operand)?) {
        (Bson::Int32(a), Bson::Int32(b)) => {
            let result = match op {
                Arithmetic::Add => a.checked_add(*b),
                Arithmetic::Multiply => a.checked_mul(*b),
            };
            match result {
                Some(value) => Bson::Int32(value),
                None => Bson::Int64(apply_i64(*a as i64, *b as i64, op)),
            }
        }
        (Bson::Int32(a), Bson::Int64(b)) => Bson::Int64(apply_i64(*a as i64, *b, op)),
        (Bson::Int64(a), Bson::Int32(b)) => Bson::Int64(apply_i64(*a, *b as i64, op)),
        (Bson::Int64(a), Bson::Int64(b)) => Bson::Int64(apply_i64(*a, *b, op)),
        (a, b) => {
            let (Some(a), Some(b)) = (as_f64(a), as_f64(b)) else {
                return Err(invalid());
            };
            Bson::Double(match op {
                Arithmetic::Add => a + b,
                Arithmetic::Multiply => a * b,
            })
        }
    })
}

fn apply_i64(a: i64, b: i64, op: Arithmetic) -> i64 {
    match op {
        Arithmetic::Add => a.wrapping_add(b),
        Arithmetic::Multiply => a.wrapping_mul(b),
    }
}

fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(n) => Some(*n as f64),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(n) => Some(*n),
        _ => None,
    }
}

fn numeric<'a>(operator: &str, field: &str, value: &'a Bson) -> StoreResult<&'a Bson> {
    match value {
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) => Ok(value),
        other => Err(StoreError::InvalidUpdate(format!(
            "{operator} operand for {field} must be numeric, got {other}"
        ))),
    }
}

fn zero_like(value: &Bson) -> Bson {
    match value {
        Bson::Int64(_) => Bson::Int64(0),
        Bson::Double(_) => Bson::Double(0.0),
        _ => Bson::Int32(0),
    }
}

fn array_at(document: &Document, operator: &str, field: &str) -> StoreResult<Vec<Bson>> {
    match lookup(document, field) {
        None => Ok(Vec::new()),
        Some(Bson::Array(items)) => Ok(items.clone()),
        Some(other) => Err(StoreError::InvalidUpdate(format!(
            "{operator} requires an array at {field}, found {other}"
        ))),
    }
}

/// Expands `{$each: [...]}` into its values; any other operand is a single value.
fn each_values(value: &Bson) -> Vec<Bson> {
    match value {
        Bson::Document(spec) => match spec.get("$each") {
            Some(Bson::Array(items)) => items.clone(),
            _ => vec![value.clone()],
        },
        _ => vec![value.clone()],
    }
}

fn pull_matches(item: &Bson, condition: &Bson) -> StoreResult<bool> {
    match condition {
        Bson::Document(spec) if spec.keys().next().is_some_and(|key| key.starts_with('$')) => {
            let expr = Filter::parse(&doc! { "v": condition.clone() })?;
            DocumentEvaluator::matches(&doc! { "v": item.clone() }, &expr)
        }
        Bson::Document(spec) => match item {
            Bson::Document(element) => DocumentEvaluator::matches(element, &Filter::parse(spec)?),
            _ => Ok(false),
        },
        _ => Ok(Comparable::from(item) == Comparable::from(condition)),
    }
}

fn unset_fields(operand: &Bson) -> StoreResult<Vec<String>> {
    match operand {
        Bson::String(field) => Ok(vec![field.clone()]),
        Bson::Array(fields) => fields
            .iter()
            .map(|field| match field {
                Bson::String(field) => Ok(field.clone()),
                other => Err(StoreError::InvalidPipeline(format!("$unset field names must be strings, got {other}"))),
            })
            .collect(),
        Bson::Document(fields) => Ok(fields.keys().cloned().collect()),
        other => Err(StoreError::InvalidPipeline(format!("invalid $unset operand {other}"))),
    }
}

fn literal_documents(operand: &Bson) -> StoreResult<Vec<Document>> {
    let Bson::Array(items) = operand else {
        return Err(StoreError::InvalidPipeline("$documents requires an array".into()));
    };

    items
        .iter()
        .map(|item| match item {
            Bson::Document(document) => Ok(document.clone()),
            other => Err(StoreError::InvalidPipeline(format!("$documents entries must be documents, got {other}"))),
        })
        .collect()
}

fn single_entry(stage: &Document) -> StoreResult<(&str, &Bson)> {
    let mut entries = stage.iter();

    match (entries.next(), entries.next()) {
        (Some((name, operand)), None) => Ok((name.as_str(), operand)),
        _ => Err(StoreError::InvalidPipeline(format!(
            "a stage must have exactly one field: {stage}"
        ))),
    }
}

fn operand_document<'a>(name: &str, operand: &'a Bson) -> StoreResult<&'a Document> {
    match operand {
        Bson::Document(document) => Ok(document),
        other => Err(StoreError::InvalidPipeline(format!("{name} requires a document, got {other}"))),
    }
}

fn non_negative(name: &str, operand: &Bson) -> StoreResult<usize> {
    match operand {
        Bson::Int32(n) if *n >= 0 => Ok(*n as usize),
        Bson::Int64(n) if *n >= 0 => Ok(*n as usize),
        Bson::Double(n) if *n >= 0.0 && n.fract() == 0.0 => Ok(*n as usize),
        other => Err(StoreError::InvalidPipeline(format!(
            "{name} requires a non-negative integer, got {other}"
        ))),
    }
}

fn truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(b) => *b,
        Bson::Int32(n) => *n != 0,
        Bson::Int64(n) => *n != 0,
        Bson::Double(n) => *n != 0.0,
        Bson::Null => false,
        _ => true,
    }
}

/// Sets a dotted path, creating intermediate documents as needed.
fn set_path(document: &mut Document, path: &str, value: Bson) -> StoreResult<()> {
    match path.split_once('.') {
        None => {
            document.insert(path, value);
            Ok(())
        }
        Some((head, rest)) => {
            if !document.contains_key(head) {
                document.insert(head, Document::new());
            }
            match document.get_mut(head) {
                Some(Bson::Document(inner)) => set_path(inner, rest, value),
                _ => Err(StoreError::InvalidUpdate(format!(
                    "cannot create field {rest} inside non-document {head}"
                ))),
            }
        }
    }
}

/// Removes a dotted path and returns the removed value.
fn remove_path(document: &mut Document, path: &str) -> Option<Bson> {
    match path.split_once('.') {
        None => document.remove(path),
        Some((head, rest)) => match document.get_mut(head) {
            Some(Bson::Document(inner)) => remove_path(inner, rest),
            _ => None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(pipeline: Vec<Document>, input: Vec<Document>) -> Vec<Document> {
        evaluate(&pipeline, input).unwrap()
    }

    fn apply(update: Document, document: Document) -> Document {
        let stages = update
            .into_iter()
            .map(|(op, operand)| {
                let mut stage = Document::new();
                stage.insert(op, operand);
                stage
            })
            .collect::<Vec<_>>();

        run(stages, vec![document]).remove(0)
    }

    #[test]
    fn query_stages_filter_sort_and_page() {
        let input = vec![
            doc! { "_id": 1, "qty": 5 },
            doc! { "_id": 2, "qty": 50 },
            doc! { "_id": 3, "qty": 20 },
            doc! { "_id": 4, "qty": 30 },
        ];

        let output = run(
            vec![
                doc! { "$match": { "qty": { "$gte": 10 } } },
                doc! { "$sort": { "qty": -1 } },
                doc! { "$skip": 1 },
                doc! { "$limit": 1 },
                doc! { "$project": { "_id": 1 } },
            ],
            input,
        );

        assert_eq!(output, vec![doc! { "_id": 4 }]);
    }

    #[test]
    fn documents_stage_replaces_input() {
        let output = run(
            vec![doc! { "$documents": [{ "_id": "x" }] }, doc! { "$set": { "v": 1 } }],
            vec![doc! { "_id": "ignored" }],
        );

        assert_eq!(output, vec![doc! { "_id": "x", "v": 1 }]);
        assert!(starts_with_documents(&[doc! { "$documents": [] }]));
    }

    #[test]
    fn documents_stage_must_come_first() {
        assert!(matches!(
            evaluate(&[doc! { "$match": {} }, doc! { "$documents": [] }], Vec::new()),
            Err(StoreError::InvalidPipeline(_))
        ));
    }

    #[test]
    fn set_and_unset_operate_on_paths() {
        let updated = apply(
            doc! { "$set": { "size.uom": "in", "status": "P" }, "$unset": { "qty": "" } },
            doc! { "_id": 1, "qty": 2, "size": { "h": 1, "uom": "cm" } },
        );

        assert_eq!(updated, doc! { "_id": 1, "size": { "h": 1, "uom": "in" }, "status": "P" });
    }

    #[test]
    fn arithmetic_operators_keep_integer_types() {
        let updated = apply(
            doc! { "$inc": { "a": 2, "b": 1.5, "c": 1 }, "$mul": { "d": 3, "e": 2 } },
            doc! { "_id": 1, "a": 1, "b": 1, "d": 2_i64 },
        );

        assert_eq!(
            updated,
            doc! { "_id": 1, "a": 3, "b": 2.5, "d": 6_i64, "c": 1, "e": 0 }
        );
    }

    #[test]
    fn inc_rejects_non_numeric_fields() {
        assert!(matches!(
            evaluate(&[doc! { "$inc": { "a": 1 } }], vec![doc! { "a": "x" }]),
            Err(StoreError::InvalidUpdate(_))
        ));
    }

    #[test]
    fn min_max_and_rename() {
        let updated = apply(
            doc! { "$min": { "lo": 1, "new": 7 }, "$max": { "hi": 3 }, "$rename": { "old": "renamed" } },
            doc! { "_id": 1, "lo": 5, "hi": 9, "old": true },
        );

        assert_eq!(updated, doc! { "_id": 1, "lo": 1, "hi": 9, "new": 7, "renamed": true });
    }

    #[test]
    fn array_operators() {
        let updated = apply(
            doc! {
                "$push": { "log": { "$each": ["a", "b"] } },
                "$addToSet": { "tags": "red" },
                "$pull": { "scores": { "$gte": 6 } },
                "$pop": { "queue": -1 },
            },
            doc! { "_id": 1, "tags": ["red"], "scores": [1, 6, 9, 2], "queue": [1, 2, 3] },
        );

        assert_eq!(
            updated,
            doc! {
                "_id": 1,
                "tags": ["red"],
                "scores": [1, 2],
                "queue": [2, 3],
                "log": ["a", "b"],
            }
        );
    }

    #[test]
    fn current_date_sets_a_date() {
        let updated = apply(doc! { "$currentDate": { "at": true } }, doc! { "_id": 1 });
        assert!(matches!(updated.get("at"), Some(Bson::DateTime(_))));
    }

    #[test]
    fn set_on_insert_is_a_noop_and_unknown_stages_fail() {
        assert_eq!(
            apply(doc! { "$setOnInsert": { "a": 1 } }, doc! { "_id": 1 }),
            doc! { "_id": 1 }
        );
        assert!(matches!(
            evaluate(&[doc! { "$lookup": {} }], vec![doc! { "_id": 1 }]),
            Err(StoreError::InvalidPipeline(_))
        ));
    }

    #[test]
    fn projection_rejects_mixed_modes() {
        assert_eq!(
            project(&doc! { "_id": 1, "a": 1, "b": 2 }, &doc! { "b": 0, "_id": 0 }).unwrap(),
            doc! { "a": 1 }
        );
        assert!(matches!(
            project(&doc! { "_id": 1 }, &doc! { "a": 1, "b": 0 }),
            Err(StoreError::InvalidPipeline(_))
        ));
    }
}
