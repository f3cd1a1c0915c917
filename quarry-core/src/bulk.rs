//! Ordered execution of mixed bulk-write batches.
//!
//! [`BulkWriter`] binds one [`Writer`] per operation kind to a single write target and
//! runs a batch of [`WriteModel`]s strictly in order, awaiting each element before
//! starting the next. Partial results are folded into one [`BulkWriteResult`].
//!
//! A failing element aborts the batch with its error. Elements that already ran stay
//! applied and their change documents stay published.

use tracing::debug;

use crate::{
    backend::StoreBackend,
    error::StoreResult,
    model::WriteModel,
    result::BulkWriteResult,
    writer::{DeleteWriter, InsertWriter, ReplaceWriter, UpdateWriter, WriteTarget, Writer},
};

#[derive(Debug)]
pub struct BulkWriter<'a, B: StoreBackend> {
    target: WriteTarget<'a, B>,
    insert_one: InsertWriter<'a, B>,
    replace_one: ReplaceWriter<'a, B>,
    update_one: UpdateWriter<'a, B>,
    update_many: UpdateWriter<'a, B>,
    delete_one: DeleteWriter<'a, B>,
    delete_many: DeleteWriter<'a, B>,
}

impl<'a, B: StoreBackend> BulkWriter<'a, B> {
    pub fn new(target: WriteTarget<'a, B>) -> Self {
        Self {
            target,
            insert_one: InsertWriter::new(target),
            replace_one: ReplaceWriter::new(target),
            update_one: UpdateWriter::new(target, true),
            update_many: UpdateWriter::new(target, false),
            delete_one: DeleteWriter::new(target, true),
            delete_many: DeleteWriter::new(target, false),
        }
    }

    /// Executes `models` in order and returns the folded result.
    ///
    /// # Errors
    ///
    /// Returns the first error raised by any element. No partial result is returned and
    /// nothing already applied is rolled back.
    pub async fn execute(&self, models: Vec<WriteModel>) -> StoreResult<BulkWriteResult> {
        let namespace = self.target.namespace();
        let mut result = BulkWriteResult::default();

        for (index, model) in models.into_iter().enumerate() {
            let kind = model.kind();
            let partial = self.dispatch(model).await?;

            debug!(namespace = %namespace, index, kind, "bulk write element applied");

            result.fold(partial);
        }

        Ok(result)
    }

    async fn dispatch(&self, model: WriteModel) -> StoreResult<BulkWriteResult> {
        match model {
            WriteModel::InsertOne(model) => self.insert_one.execute(model).await,
            WriteModel::ReplaceOne(model) => self.replace_one.execute(model).await,
            WriteModel::UpdateOne(model) => self.update_one.execute(model).await,
            WriteModel::UpdateMany(model) => self.update_many.execute(model).await,
            WriteModel::DeleteOne(model) => self.delete_one.execute(model).await,
            WriteModel::DeleteMany(model) => self.delete_many.execute(model).await,
        }
    }
}
