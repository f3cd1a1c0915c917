//! The MongoDB-compatible collection facade.
//!
//! A [`Collection`] is a named view over one collection of a backend. Every write method
//! is a thin wrapper that builds a [`WriteModel`] and runs it through the matching
//! writer (or the [`BulkWriter`] for batches), then narrows the aggregate result into
//! the MongoDB result shape of that method.
//!
//! # Example
//!
//! ```ignore
//! use bson::doc;
//! use quarry::prelude::*;
//!
//! let db = Database::new(InMemoryStoreBuilder::new().build().await?);
//! let items = db.collection("items");
//!
//! let stream = items.watch(Vec::new()).await;
//! let inserted = items.insert_one(doc! { "name": "a" }).await?;
//! let updated = items
//!     .update_many(doc! { "name": "a" }, doc! { "$set": { "qty": 1 } }, false)
//!     .await?;
//!
//! assert_eq!(updated.matched_count, 1);
//! assert!(stream.has_next().await);
//! ```

use bson::Document;
use tracing::debug;

use crate::{
    backend::StoreBackend,
    bulk::BulkWriter,
    changeset::ChangeSet,
    document::{IdGenerator, ensure_id, require_id},
    error::StoreResult,
    model::{DeleteModel, InsertOneModel, ReplaceOneModel, UpdateModel, WriteModel},
    namespace::Namespace,
    query::{FindOptions, Query},
    result::{BulkWriteResult, DeleteResult, InsertManyResult, InsertOneResult, UpdateResult},
    stream::ChangeStream,
    writer::{DeleteWriter, InsertWriter, ReplaceWriter, UpdateWriter, WriteTarget, Writer},
};

/// A collection with a reference to a storage backend.
///
/// # Type Parameters
///
/// * `'a` - Lifetime of the backend reference
/// * `B` - The storage backend type
#[derive(Debug)]
pub struct Collection<'a, B: StoreBackend> {
    name: String,
    backend: &'a B,
    ids: &'a dyn IdGenerator,
}

impl<'a, B: StoreBackend> Collection<'a, B> {
    pub(crate) fn new(name: String, backend: &'a B, ids: &'a dyn IdGenerator) -> Self {
        Self { name, backend, ids }
    }

    /// Returns the name of this collection.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the `db.coll` namespace of this collection.
    pub fn namespace(&self) -> Namespace {
        self.backend.namespace(&self.name)
    }

    fn target(&self) -> WriteTarget<'_, B> {
        WriteTarget::new(self.backend, &self.name, self.ids)
    }

    /// Inserts one document, generating its `_id` when absent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DocumentAlreadyExists`](crate::error::StoreError::DocumentAlreadyExists)
    /// if a document with the same `_id` is already stored.
    pub async fn insert_one(&self, mut document: Document) -> StoreResult<InsertOneResult> {
        let inserted_id = ensure_id(&mut document, self.ids);

        InsertWriter::new(self.target())
            .execute(InsertOneModel { document })
            .await?;

        Ok(InsertOneResult { acknowledged: true, inserted_id })
    }

    /// Inserts documents in order, generating missing `_id`s.
    ///
    /// Documents inserted before a failing one stay inserted.
    pub async fn insert_many(&self, documents: Vec<Document>) -> StoreResult<InsertManyResult> {
        let models = documents
            .into_iter()
            .map(WriteModel::insert_one)
            .collect();

        Ok(self.bulk_write(models).await?.into())
    }

    /// Deletes the first document matching `filter`.
    pub async fn delete_one(&self, filter: Document) -> StoreResult<DeleteResult> {
        Ok(DeleteWriter::new(self.target(), true)
            .execute(DeleteModel { filter })
            .await?
            .into())
    }

    /// Deletes every document matching `filter`.
    pub async fn delete_many(&self, filter: Document) -> StoreResult<DeleteResult> {
        Ok(DeleteWriter::new(self.target(), false)
            .execute(DeleteModel { filter })
            .await?
            .into())
    }

    /// Replaces the first document matching `filter`, or inserts `replacement` when
    /// nothing matches and `upsert` is set.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidDocument`](crate::error::StoreError::InvalidDocument)
    /// if `replacement` carries an `_id` different from the matched document's.
    pub async fn replace_one(
        &self,
        filter: Document,
        replacement: Document,
        upsert: bool,
    ) -> StoreResult<UpdateResult> {
        Ok(ReplaceWriter::new(self.target())
            .execute(ReplaceOneModel { filter, replacement, upsert })
            .await?
            .into())
    }

    /// Applies update operators (`$set`, `$inc`, ...) to the first matching document.
    pub async fn update_one(
        &self,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> StoreResult<UpdateResult> {
        Ok(UpdateWriter::new(self.target(), true)
            .execute(UpdateModel { filter, update, upsert })
            .await?
            .into())
    }

    /// Applies update operators to every matching document.
    pub async fn update_many(
        &self,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> StoreResult<UpdateResult> {
        Ok(UpdateWriter::new(self.target(), false)
            .execute(UpdateModel { filter, update, upsert })
            .await?
            .into())
    }

    /// Runs a mixed batch of writes in order.
    ///
    /// `insertOne` documents without an `_id` get one generated before the batch starts.
    ///
    /// # Errors
    ///
    /// Returns the first error raised by any element; earlier elements stay applied.
    pub async fn bulk_write(&self, models: Vec<WriteModel>) -> StoreResult<BulkWriteResult> {
        let models = models
            .into_iter()
            .map(|model| match model {
                WriteModel::InsertOne(InsertOneModel { mut document }) => {
                    ensure_id(&mut document, self.ids);
                    WriteModel::InsertOne(InsertOneModel { document })
                }
                other => other,
            })
            .collect();

        BulkWriter::new(self.target()).execute(models).await
    }

    /// Returns the documents matching `filter`, shaped by `options`.
    pub async fn find(&self, filter: Document, options: FindOptions) -> StoreResult<Vec<Document>> {
        self.backend
            .query(options.into_query(&filter)?, &self.name)
            .await
    }

    /// Returns the first document matching `filter`, if any.
    pub async fn find_one(&self, filter: Document) -> StoreResult<Option<Document>> {
        let mut query = Query::from_filter(&filter)?;
        query.limit = Some(1);

        Ok(self
            .backend
            .query(query, &self.name)
            .await?
            .into_iter()
            .next())
    }

    /// Counts the documents matching `filter`.
    pub async fn count_documents(&self, filter: Document) -> StoreResult<u64> {
        self.backend
            .count(Query::from_filter(&filter)?, &self.name)
            .await
    }

    /// Runs an aggregation pipeline over this collection.
    pub async fn aggregate(&self, pipeline: Vec<Document>) -> StoreResult<Vec<Document>> {
        self.backend.aggregate(pipeline, &self.name).await
    }

    /// Opens a change stream on this collection.
    ///
    /// Only namespace matching is applied; `pipeline` is kept on the stream for the
    /// caller but does not filter the changes it receives.
    pub async fn watch(&self, pipeline: Vec<Document>) -> ChangeStream {
        self.backend
            .changes()
            .subscribe(self.namespace(), pipeline)
            .await
    }

    /// Brings the collection to exactly `snapshot`.
    ///
    /// Computes the difference between the stored documents and `snapshot`, writes it
    /// and publishes one `insert`, `delete` or `replace` change per affected document.
    /// Documents present unchanged on both sides produce no change. Returns the applied
    /// change set.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidDocument`](crate::error::StoreError::InvalidDocument)
    /// if a snapshot document has no `_id`.
    pub async fn sync(&self, snapshot: Vec<Document>) -> StoreResult<ChangeSet> {
        for document in &snapshot {
            require_id(document)?;
        }

        let current = self.backend.query(Query::new(), &self.name).await?;
        let change_set = ChangeSet::from_diff(current, snapshot);
        let namespace = self.namespace();

        if change_set.is_empty() {
            debug!(namespace = %namespace, "collection already in sync");
            return Ok(change_set);
        }

        self.backend
            .write(change_set.clone(), &self.name)
            .await?;

        debug!(
            namespace = %namespace,
            incoming = change_set.incoming().len(),
            outgoing = change_set.outgoing().len(),
            "collection resynced"
        );

        self.target()
            .publish(change_set.to_changes(&namespace))
            .await?;

        Ok(change_set)
    }
}
