//! Translation of update-operator stages into MongoDB aggregation stages.
//!
//! The write engine derives updated documents by running update operators (`$inc`,
//! `$push`, ...) as pipeline stages. MongoDB's aggregation framework does not accept
//! update operators as stages, so each one is rewritten into `$set` / `$unset` stages
//! computing the same result with aggregation expressions. `$set` operands are wrapped
//! in `$literal` so they keep update semantics. Every other stage passes through as is.

use bson::{Bson, Document, doc};

use quarry_core::error::{StoreError, StoreResult};

pub(crate) struct PipelineTranslator;

impl PipelineTranslator {
    /// Rewrites every update-operator stage of `pipeline` into aggregation stages.
    pub fn translate(pipeline: Vec<Document>) -> StoreResult<Vec<Document>> {
        let mut translated = Vec::with_capacity(pipeline.len());

        for stage in pipeline {
            let Some((name, operand)) = stage.iter().next() else {
                return Err(StoreError::InvalidPipeline("empty pipeline stage".into()));
            };

            match name.as_str() {
                "$set" => translated.push(Self::set_stage(Self::fields(name, operand)?, |_, value| {
                    Ok(doc! { "$literal": value.clone() }.into())
                })?),
                "$unset" => translated.push(Self::unset_stage(operand)?),
                "$inc" => translated.push(Self::set_stage(Self::fields(name, operand)?, |field, value| {
                    Ok(doc! { "$add": [Self::current_or(field, 0), value.clone()] }.into())
                })?),
                "$mul" => translated.push(Self::set_stage(Self::fields(name, operand)?, |field, value| {
                    Ok(doc! { "$multiply": [Self::current_or(field, 0), value.clone()] }.into())
                })?),
                "$min" | "$max" => {
                    let op = name.clone();
                    translated.push(Self::set_stage(Self::fields(name, operand)?, |field, value| {
                        let literal = doc! { "$literal": value.clone() };
                        let mut expr = Document::new();
                        expr.insert(
                            op.clone(),
                            vec![Bson::from(Self::current_or(field, literal.clone())), Bson::from(literal)],
                        );
                        Ok(expr.into())
                    })?)
                }
                "$rename" => {
                    for (from, to) in Self::fields(name, operand)? {
                        let Bson::String(to) = to else {
                            return Err(StoreError::InvalidUpdate(format!(
                                "$rename target for {from} must be a string"
                            )));
                        };
                        let mut set = Document::new();
                        set.insert(to.clone(), format!("${from}"));
                        translated.push(doc! { "$set": set });
                        translated.push(doc! { "$unset": from.clone() });
                    }
                }
                "$push" | "$addToSet" => {
                    let unique = name == "$addToSet";
                    translated.push(Self::set_stage(Self::fields(name, operand)?, |field, value| {
                        let items = Self::each_literals(value);
                        let current = Self::current_or(field, Bson::Array(Vec::new()));
                        let appended = if unique {
                            doc! {
                                "$filter": {
                                    "input": items,
                                    "cond": { "$not": [{ "$in": ["$$this", current.clone()] }] },
                                }
                            }
                            .into()
                        } else {
                            items
                        };
                        Ok(doc! { "$concatArrays": [current, appended] }.into())
                    })?)
                }
                "$pull" => translated.push(Self::set_stage(Self::fields(name, operand)?, |field, value| {
                    let filtered = doc! {
                        "$filter": {
                            "input": format!("${field}"),
                            "cond": { "$not": [Self::pull_condition(value)?] },
                        }
                    };
                    Ok(Self::when_array(field, filtered))
                })?),
                "$pop" => translated.push(Self::set_stage(Self::fields(name, operand)?, |field, value| {
                    let path = format!("${field}");
                    let size = doc! { "$size": path.clone() };
                    let kept = match value {
                        Bson::Int32(1) | Bson::Int64(1) => {
                            doc! { "$slice": [path, { "$max": [{ "$subtract": [size.clone(), 1] }, 1] }] }
                        }
                        Bson::Int32(-1) | Bson::Int64(-1) => {
                            doc! { "$slice": [path, 1, { "$max": [size.clone(), 1] }] }
                        }
                        other => {
                            return Err(StoreError::InvalidUpdate(format!(
                                "$pop for {field} must be 1 or -1, got {other}"
                            )));
                        }
                    };
                    Ok(Self::when_array(field, doc! { "$cond": [{ "$lte": [size, 1] }, [], kept] }))
                })?),
                "$currentDate" => translated.push(Self::set_stage(Self::fields(name, operand)?, |_, value| {
                    Ok(match value {
                        Bson::Document(spec) if spec.get_str("$type").ok() == Some("timestamp") => {
                            Bson::String("$$CLUSTER_TIME".into())
                        }
                        _ => Bson::String("$$NOW".into()),
                    })
                })?),
                "$setOnInsert" => {}
                _ => translated.push(stage.clone()),
            }
        }

        Ok(translated)
    }

    fn fields<'a>(name: &str, operand: &'a Bson) -> StoreResult<&'a Document> {
        match operand {
            Bson::Document(fields) => Ok(fields),
            other => Err(StoreError::InvalidUpdate(format!("{name} requires a document, got {other}"))),
        }
    }

    fn set_stage(
        fields: &Document,
        mut expression: impl FnMut(&str, &Bson) -> StoreResult<Bson>,
    ) -> StoreResult<Document> {
        let mut set = Document::new();
        for (field, value) in fields {
            set.insert(field.clone(), expression(field, value)?);
        }

        Ok(doc! { "$set": set })
    }

    fn unset_stage(operand: &Bson) -> StoreResult<Document> {
        match operand {
            Bson::Document(fields) => Ok(doc! {
                "$unset": fields.keys().cloned().map(Bson::String).collect::<Vec<_>>(),
            }),
            Bson::String(_) | Bson::Array(_) => Ok(doc! { "$unset": operand.clone() }),
            other => Err(StoreError::InvalidUpdate(format!("invalid $unset operand {other}"))),
        }
    }

    /// Evaluates `expression` when the field holds an array and leaves the field as it
    /// is otherwise.
    fn when_array(field: &str, expression: Document) -> Bson {
        let path = format!("${field}");
        doc! { "$cond": [{ "$isArray": [path.clone()] }, expression, path] }.into()
    }

    /// `{$ifNull: ["$field", default]}`
    fn current_or(field: &str, default: impl Into<Bson>) -> Bson {
        doc! { "$ifNull": [format!("${field}"), default.into()] }.into()
    }

    fn each_literals(value: &Bson) -> Bson {
        let items = match value {
            Bson::Document(spec) => match spec.get("$each") {
                Some(Bson::Array(items)) => items.clone(),
                _ => vec![value.clone()],
            },
            _ => vec![value.clone()],
        };

        Bson::Array(
            items
                .into_iter()
                .map(|item| doc! { "$literal": item }.into())
                .collect(),
        )
    }

    /// The aggregation expression deciding whether `$$this` is pulled.
    fn pull_condition(condition: &Bson) -> StoreResult<Bson> {
        let operators = match condition {
            Bson::Document(spec) if spec.keys().next().is_some_and(|key| key.starts_with('$')) => spec,
            _ => return Ok(doc! { "$eq": ["$$this", { "$literal": condition.clone() }] }.into()),
        };

        let mut clauses = Vec::with_capacity(operators.len());
        for (op, operand) in operators {
            let clause = match op.as_str() {
                "$eq" | "$ne" | "$gt" | "$gte" | "$lt" | "$lte" => {
                    let mut clause = Document::new();
                    clause.insert(op.clone(), vec![Bson::from("$$this"), Bson::from(doc! { "$literal": operand.clone() })]);
                    clause
                }
                "$in" => doc! { "$in": ["$$this", { "$literal": operand.clone() }] },
                "$nin" => doc! { "$not": [{ "$in": ["$$this", { "$literal": operand.clone() }] }] },
                other => {
                    return Err(StoreError::InvalidUpdate(format!("unsupported $pull condition {other}")));
                }
            };
            clauses.push(Bson::from(clause));
        }

        Ok(doc! { "$and": clauses }.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn translate(stage: Document) -> Vec<Document> {
        PipelineTranslator::translate(vec![stage]).unwrap()
    }

    #[test]
    fn query_stages_pass_through() {
        let pipeline = vec![doc! { "$match": { "a": 1 } }, doc! { "$limit": 1 }];
        assert_eq!(PipelineTranslator::translate(pipeline.clone()).unwrap(), pipeline);
    }

    #[test]
    fn set_operands_are_literal() {
        assert_eq!(
            translate(doc! { "$set": { "a": "$b" } }),
            vec![doc! { "$set": { "a": { "$literal": "$b" } } }]
        );
    }

    #[test]
    fn inc_adds_to_the_current_value() {
        assert_eq!(
            translate(doc! { "$inc": { "n": 2 } }),
            vec![doc! { "$set": { "n": { "$add": [{ "$ifNull": ["$n", 0] }, 2] } } }]
        );
    }

    #[test]
    fn unset_and_rename_become_unset_stages() {
        assert_eq!(translate(doc! { "$unset": { "a": "", "b": "" } }), vec![doc! { "$unset": ["a", "b"] }]);
        assert_eq!(
            translate(doc! { "$rename": { "a": "b" } }),
            vec![doc! { "$set": { "b": "$a" } }, doc! { "$unset": "a" }]
        );
    }

    #[test]
    fn set_on_insert_is_dropped() {
        assert!(translate(doc! { "$setOnInsert": { "a": 1 } }).is_empty());
    }

    #[test]
    fn pull_rejects_unsupported_conditions() {
        assert!(matches!(
            PipelineTranslator::translate(vec![doc! { "$pull": { "a": { "$regex": "x" } } }]),
            Err(StoreError::InvalidUpdate(_))
        ));
    }
}
