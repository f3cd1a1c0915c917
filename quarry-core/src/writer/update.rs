use async_trait::async_trait;
use bson::{Bson, Document, doc};
use tracing::{debug, trace};

use crate::{
    backend::StoreBackend,
    change::{ChangeDocument, OperationType},
    changeset::ChangeSet,
    document::{ID_FIELD, document_id, document_key, ensure_id, require_id},
    error::{StoreError, StoreResult},
    model::UpdateModel,
    query::{Expr, Filter, Query},
    result::BulkWriteResult,
};

use super::{WriteTarget, Writer};

const SET_ON_INSERT: &str = "$setOnInsert";

/// Decomposes an update-operator document into one pipeline stage per operator.
///
/// `{$set: {a: 1}, $inc: {n: 2}}` becomes `[{$set: {a: 1}}, {$inc: {n: 2}}]`, in
/// document order. Any operator the aggregation evaluator understands can be used.
///
/// # Errors
///
/// Returns [`StoreError::InvalidUpdate`] if the document is empty or has a key that is
/// not an operator.
pub fn update_stages(update: &Document) -> StoreResult<Vec<Document>> {
    if update.is_empty() {
        return Err(StoreError::InvalidUpdate("update document is empty".into()));
    }

    update
        .iter()
        .map(|(op, operand)| {
            if !op.starts_with('$') {
                return Err(StoreError::InvalidUpdate(format!(
                    "update keys must be operators, got {op}"
                )));
            }

            let mut stage = Document::new();
            stage.insert(op.clone(), operand.clone());
            Ok(stage)
        })
        .collect()
}

/// Applies update operators to the first matching document (`single`) or to every
/// matching document.
///
/// New document state is derived by running the operator stages over the matched
/// `_id`s through [`StoreBackend::aggregate`]. The matched documents are written back as a
/// direct change set, so every match is reported as modified even when an operator
/// leaves it unchanged.
#[derive(Debug)]
pub struct UpdateWriter<'a, B: StoreBackend> {
    target: WriteTarget<'a, B>,
    single: bool,
}

impl<'a, B: StoreBackend> UpdateWriter<'a, B> {
    pub fn new(target: WriteTarget<'a, B>, single: bool) -> Self {
        Self { target, single }
    }

    /// Builds a document from the filter's equality fields, applies the operator stages
    /// (with `$setOnInsert` treated as `$set`) and inserts the result as an `insert` event.
    async fn upsert(&self, filter: &Expr, stages: Vec<Document>) -> StoreResult<BulkWriteResult> {
        let backend = self.target.backend();
        let collection = self.target.collection();
        let namespace = self.target.namespace();

        let mut seed = filter.equality_fields();
        ensure_id(&mut seed, self.target.ids());

        let mut pipeline = vec![doc! { "$documents": [seed] }];
        pipeline.extend(stages.into_iter().map(|stage| {
            match stage.get(SET_ON_INSERT) {
                Some(operand) => doc! { "$set": operand.clone() },
                None => stage,
            }
        }));

        let document = backend
            .aggregate(pipeline, collection)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::InvalidUpdate("upsert pipeline produced no document".into()))?;
        let id = require_id(&document)?.clone();

        backend
            .write(ChangeSet::from_insert(vec![document.clone()]), collection)
            .await?;

        debug!(namespace = %namespace, id = %id, "update upserted document");

        self.target
            .publish(vec![ChangeDocument::with_full_document(
                OperationType::Insert,
                &namespace,
                &document,
            )])
            .await?;

        Ok(BulkWriteResult::upserted(id))
    }
}

#[async_trait]
impl<B: StoreBackend> Writer for UpdateWriter<'_, B> {
    type Model = UpdateModel;

    async fn execute(&self, model: UpdateModel) -> StoreResult<BulkWriteResult> {
        let backend = self.target.backend();
        let collection = self.target.collection();
        let namespace = self.target.namespace();

        let filter = Filter::parse(&model.filter)?;
        let stages = update_stages(&model.update)?;

        let mut query = Query::builder().filter(filter.clone()).build();
        if self.single {
            query.limit = Some(1);
        }

        let input = backend.query(query, collection).await?;

        if input.is_empty() {
            if model.upsert {
                return self.upsert(&filter, stages).await;
            }

            debug!(namespace = %namespace, "update matched nothing");
            return Ok(BulkWriteResult::default());
        }

        let ids = input
            .iter()
            .map(|document| require_id(document).cloned())
            .collect::<StoreResult<Vec<Bson>>>()?;

        let mut pipeline = vec![doc! { "$match": { ID_FIELD: { "$in": ids } } }];
        pipeline.extend(
            stages
                .into_iter()
                .filter(|stage| !stage.contains_key(SET_ON_INSERT)),
        );

        trace!(namespace = %namespace, pipeline = ?pipeline, "deriving updated documents");

        let output = backend.aggregate(pipeline, collection).await?;

        // Only matched documents that are still present are replaced; an update never
        // deletes.
        let mut outgoing = Vec::with_capacity(output.len());
        let mut changes = Vec::with_capacity(output.len());
        for document in &output {
            let id = require_id(document)?;
            let Some(old) = input.iter().find(|old| document_id(old) == Some(id)) else {
                return Err(StoreError::InvalidUpdate(format!(
                    "update produced a document outside the matched set: {}",
                    document_key(id)
                )));
            };
            changes.push(ChangeDocument::update(&namespace, Some(old), document));
            outgoing.push(old.clone());
        }

        if outgoing.is_empty() {
            debug!(namespace = %namespace, "matched documents vanished before update");
            return Ok(BulkWriteResult::default());
        }

        let matched_count = outgoing.len() as u64;

        backend
            .write(ChangeSet::new(output, outgoing), collection)
            .await?;

        debug!(namespace = %namespace, matched = matched_count, "updated documents");

        self.target.publish(changes).await?;

        Ok(BulkWriteResult {
            matched_count,
            modified_count: matched_count,
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_stage_per_operator_in_order() {
        let stages = update_stages(&doc! { "$set": { "a": 1 }, "$inc": { "n": 2 } }).unwrap();

        assert_eq!(stages, vec![doc! { "$set": { "a": 1 } }, doc! { "$inc": { "n": 2 } }]);
    }

    #[test]
    fn rejects_empty_and_operatorless_updates() {
        assert!(matches!(update_stages(&doc! {}), Err(StoreError::InvalidUpdate(_))));
        assert!(matches!(
            update_stages(&doc! { "a": 1 }),
            Err(StoreError::InvalidUpdate(_))
        ));
    }
}
