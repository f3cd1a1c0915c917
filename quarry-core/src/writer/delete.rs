use async_trait::async_trait;
use tracing::debug;

use crate::{
    backend::StoreBackend,
    change::{ChangeDocument, OperationType},
    changeset::ChangeSet,
    error::StoreResult,
    model::DeleteModel,
    query::Query,
    result::BulkWriteResult,
};

use super::{WriteTarget, Writer};

/// Deletes the first matching document (`single`) or every matching document.
#[derive(Debug)]
pub struct DeleteWriter<'a, B: StoreBackend> {
    target: WriteTarget<'a, B>,
    single: bool,
}

impl<'a, B: StoreBackend> DeleteWriter<'a, B> {
    pub fn new(target: WriteTarget<'a, B>, single: bool) -> Self {
        Self { target, single }
    }
}

#[async_trait]
impl<B: StoreBackend> Writer for DeleteWriter<'_, B> {
    type Model = DeleteModel;

    async fn execute(&self, model: DeleteModel) -> StoreResult<BulkWriteResult> {
        let mut query = Query::from_filter(&model.filter)?;
        if self.single {
            query.limit = Some(1);
        }

        let matched = self
            .target
            .backend()
            .query(query, self.target.collection())
            .await?;
        let namespace = self.target.namespace();

        if matched.is_empty() {
            debug!(namespace = %namespace, "delete matched nothing");
            return Ok(BulkWriteResult::default());
        }

        let deleted_count = matched.len() as u64;
        let changes = matched
            .iter()
            .map(|document| ChangeDocument::for_key(OperationType::Delete, &namespace, document))
            .collect();

        self.target
            .backend()
            .write(ChangeSet::from_delete(matched), self.target.collection())
            .await?;

        debug!(namespace = %namespace, deleted = deleted_count, "deleted documents");

        self.target.publish(changes).await?;

        Ok(BulkWriteResult { deleted_count, ..Default::default() })
    }
}
