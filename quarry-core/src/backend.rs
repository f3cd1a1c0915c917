//! Storage backend abstraction for the write engine.
//!
//! This module defines the Store contract that concrete backends (in-memory, remote,
//! ...) implement. The write engine only ever reads a backend through [`StoreBackend::query`],
//! [`StoreBackend::count`] and [`StoreBackend::aggregate`], and only ever mutates it through
//! [`StoreBackend::write`] with a [`ChangeSet`].
//!
//! # Notifications
//!
//! `write` does not publish change documents. Writers call [`StoreBackend::notify`] after
//! a successful write, so the writer decides how each affected document is classified.
//! Each backend owns a [`ChangeBroadcaster`] that `notify` fans out through.
//!
//! # Examples
//!
//! ```ignore
//! use quarry::backend::StoreBackend;
//! use quarry::changeset::ChangeSet;
//! use bson::doc;
//!
//! let backend = InMemoryStore::new();
//! backend
//!     .write(ChangeSet::from_insert(vec![doc! { "_id": 1, "name": "Alice" }]), "users")
//!     .await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use async_trait::async_trait;
use bson::Document;
use std::fmt::Debug;

use crate::{
    change::ChangeDocument,
    changeset::ChangeSet,
    error::StoreResult,
    namespace::Namespace,
    query::Query,
    stream::ChangeBroadcaster,
};

/// Abstract interface for document storage backends.
///
/// A backend holds the canonical document sets of every collection in one database.
/// Collections are addressed by name; together with [`StoreBackend::database`] a name
/// forms a [`Namespace`].
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`. Concurrent `write` calls must be serialized by
/// the implementation itself; nothing above this trait takes a lock.
///
/// # Error Handling
///
/// Operations return [`StoreResult<T>`](crate::error::StoreResult). Errors are propagated
/// unmodified through writers and the bulk write coordinator.
#[async_trait]
pub trait StoreBackend: Send + Sync + Debug {
    /// Name of the database this backend serves.
    fn database(&self) -> &str;

    /// The broadcaster change streams on this backend subscribe to.
    fn changes(&self) -> &ChangeBroadcaster;

    /// Returns the namespace of a collection in this backend.
    fn namespace(&self, collection: &str) -> Namespace {
        Namespace::new(self.database(), collection)
    }

    /// Returns the documents matching `query`, sorted, skipped, limited and projected
    /// as the query specifies. Missing collections read as empty.
    async fn query(&self, query: Query, collection: &str) -> StoreResult<Vec<Document>>;

    /// Counts the documents matching `query`. Skip and limit are honoured when set;
    /// clear them to count every match.
    async fn count(&self, query: Query, collection: &str) -> StoreResult<u64>;

    /// Runs an aggregation pipeline over the collection.
    ///
    /// A pipeline whose first stage is `$documents` runs over the literal documents
    /// of that stage instead of the collection's contents.
    async fn aggregate(
        &self,
        pipeline: Vec<Document>,
        collection: &str,
    ) -> StoreResult<Vec<Document>>;

    /// Applies every insertion, deletion and replacement of `change_set`.
    ///
    /// Completes only once the whole set is applied. Insertions of an existing `_id`
    /// fail with [`DocumentAlreadyExists`](crate::error::StoreError::DocumentAlreadyExists);
    /// deletions and replacements of a missing `_id` fail with
    /// [`DocumentNotFound`](crate::error::StoreError::DocumentNotFound).
    async fn write(&self, change_set: ChangeSet, collection: &str) -> StoreResult<()>;

    /// Publishes a change document to every subscriber on its namespace.
    async fn notify(&self, change: ChangeDocument) -> StoreResult<()> {
        self.changes().publish(&change).await;

        Ok(())
    }

    /// Lists the names of all collections in the database.
    async fn list_collections(&self) -> StoreResult<Vec<String>>;

    /// Creates an empty collection. Creating an existing collection is a no-op.
    async fn create_collection(&self, name: &str) -> StoreResult<()>;

    /// Drops a collection and all its documents.
    async fn drop_collection(&self, name: &str) -> StoreResult<()>;

    /// Renames a collection, keeping its documents.
    async fn rename_collection(&self, from: &str, to: &str) -> StoreResult<()>;

    /// Cleanly shuts down the backend, releasing all resources.
    ///
    /// The default implementation is a no-op.
    async fn shutdown(self) -> StoreResult<()>
    where
        Self: Sized,
    {
        Ok(())
    }
}

#[async_trait]
impl<B> StoreBackend for &B
where
    B: StoreBackend,
{
    fn database(&self) -> &str {
        (*self).database()
    }

    fn changes(&self) -> &ChangeBroadcaster {
        (*self).changes()
    }

    async fn query(&self, query: Query, collection: &str) -> StoreResult<Vec<Document>> {
        (*self).query(query, collection).await
    }

    async fn count(&self, query: Query, collection: &str) -> StoreResult<u64> {
        (*self).count(query, collection).await
    }

    async fn aggregate(
        &self,
        pipeline: Vec<Document>,
        collection: &str,
    ) -> StoreResult<Vec<Document>> {
        (*self).aggregate(pipeline, collection).await
    }

    async fn write(&self, change_set: ChangeSet, collection: &str) -> StoreResult<()> {
        (*self).write(change_set, collection).await
    }

    async fn notify(&self, change: ChangeDocument) -> StoreResult<()> {
        (*self).notify(change).await
    }

    async fn list_collections(&self) -> StoreResult<Vec<String>> {
        (*self).list_collections().await
    }

    async fn create_collection(&self, name: &str) -> StoreResult<()> {
        (*self).create_collection(name).await
    }

    async fn drop_collection(&self, name: &str) -> StoreResult<()> {
        (*self).drop_collection(name).await
    }

    async fn rename_collection(&self, from: &str, to: &str) -> StoreResult<()> {
        (*self).rename_collection(from, to).await
    }
}

/// Factory trait for creating backend instances from configuration.
#[async_trait]
pub trait StoreBackendBuilder {
    type Backend: StoreBackend;

    async fn build(self) -> StoreResult<Self::Backend>;
}
