use async_trait::async_trait;
use tracing::debug;

use crate::{
    backend::StoreBackend,
    change::{ChangeDocument, OperationType},
    changeset::ChangeSet,
    document::require_id,
    error::StoreResult,
    model::InsertOneModel,
    result::BulkWriteResult,
};

use super::{WriteTarget, Writer};

/// Inserts a single document. The document must already carry its `_id`.
#[derive(Debug)]
pub struct InsertWriter<'a, B: StoreBackend> {
    target: WriteTarget<'a, B>,
}

impl<'a, B: StoreBackend> InsertWriter<'a, B> {
    pub fn new(target: WriteTarget<'a, B>) -> Self {
        Self { target }
    }
}

#[async_trait]
impl<B: StoreBackend> Writer for InsertWriter<'_, B> {
    type Model = InsertOneModel;

    async fn execute(&self, model: InsertOneModel) -> StoreResult<BulkWriteResult> {
        let document = model.document;
        let id = require_id(&document)?.clone();
        let namespace = self.target.namespace();

        self.target
            .backend()
            .write(ChangeSet::from_insert(vec![document.clone()]), self.target.collection())
            .await?;

        debug!(namespace = %namespace, id = %id, "inserted document");

        self.target
            .publish(vec![ChangeDocument::with_full_document(
                OperationType::Insert,
                &namespace,
                &document,
            )])
            .await?;

        Ok(BulkWriteResult::inserted(id))
    }
}
