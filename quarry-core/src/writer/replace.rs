use async_trait::async_trait;
use tracing::debug;

use crate::{
    backend::StoreBackend,
    change::{ChangeDocument, OperationType},
    changeset::ChangeSet,
    document::{ID_FIELD, require_id, with_default_id},
    error::{StoreError, StoreResult},
    model::ReplaceOneModel,
    query::{Filter, Query},
    result::BulkWriteResult,
};

use super::{WriteTarget, Writer};

/// Replaces the first matching document, or inserts the replacement on `upsert`.
///
/// The replacement inherits the matched document's `_id` when it has none and may not
/// carry a different one. Both branches publish a single `replace` event, upserts
/// included.
#[derive(Debug)]
pub struct ReplaceWriter<'a, B: StoreBackend> {
    target: WriteTarget<'a, B>,
}

impl<'a, B: StoreBackend> ReplaceWriter<'a, B> {
    pub fn new(target: WriteTarget<'a, B>) -> Self {
        Self { target }
    }
}

#[async_trait]
impl<B: StoreBackend> Writer for ReplaceWriter<'_, B> {
    type Model = ReplaceOneModel;

    async fn execute(&self, model: ReplaceOneModel) -> StoreResult<BulkWriteResult> {
        let backend = self.target.backend();
        let collection = self.target.collection();
        let namespace = self.target.namespace();

        let filter = Filter::parse(&model.filter)?;
        let query = Query::builder()
            .filter(filter.clone())
            .limit(1)
            .build();

        let matched_count = backend.count(query.clone(), collection).await?;

        let (replacement, result) = if matched_count > 0 {
            let old = backend
                .query(query, collection)
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| StoreError::DocumentNotFound(model.filter.to_string(), namespace.to_string()))?;
            let old_id = require_id(&old)?.clone();
            let replacement = with_default_id(model.replacement, old_id.clone());

            if require_id(&replacement)? != &old_id {
                return Err(StoreError::InvalidDocument(format!(
                    "{ID_FIELD} of {old_id} is immutable, replacement has {}",
                    require_id(&replacement)?
                )));
            }

            backend
                .write(ChangeSet::from_replace(old, replacement.clone()), collection)
                .await?;

            debug!(namespace = %namespace, id = %old_id, "replaced document");

            (
                replacement,
                BulkWriteResult {
                    matched_count,
                    modified_count: 1,
                    ..Default::default()
                },
            )
        } else if model.upsert {
            let seed_id = filter
                .equality_fields()
                .get(ID_FIELD)
                .cloned()
                .unwrap_or_else(|| self.target.ids().generate());
            let replacement = with_default_id(model.replacement, seed_id);
            let id = require_id(&replacement)?.clone();

            backend
                .write(ChangeSet::from_insert(vec![replacement.clone()]), collection)
                .await?;

            debug!(namespace = %namespace, id = %id, "replace upserted document");

            (replacement, BulkWriteResult::upserted(id))
        } else {
            debug!(namespace = %namespace, "replace matched nothing");
            return Ok(BulkWriteResult::default());
        };

        self.target
            .publish(vec![ChangeDocument::with_full_document(
                OperationType::Replace,
                &namespace,
                &replacement,
            )])
            .await?;

        Ok(result)
    }
}
