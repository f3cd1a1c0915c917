//! The database handle.
//!
//! [`Database`] owns a backend and the identity generator used for documents inserted
//! without an `_id`. It hands out [`Collection`] views and performs collection-level
//! operations, publishing the matching lifecycle events.
//!
//! # Example
//!
//! ```ignore
//! use quarry::prelude::*;
//!
//! let db = Database::with_id_generator(backend, UuidGenerator);
//! let users = db.collection("users");
//! users.insert_one(bson::doc! { "name": "Alice" }).await?;
//! db.drop_collection("users").await?;
//! ```

use tracing::debug;

use crate::{
    backend::StoreBackend,
    change::ChangeDocument,
    collection::Collection,
    document::{IdGenerator, ObjectIdGenerator},
    error::StoreResult,
};

/// A database bound to a specific backend implementation.
///
/// # Type Parameters
///
/// * `B` - The backend implementation type
#[derive(Debug)]
pub struct Database<B: StoreBackend> {
    backend: B,
    ids: Box<dyn IdGenerator>,
}

impl<B: StoreBackend> Database<B> {
    /// Creates a database that assigns `ObjectId` identities.
    pub fn new(backend: B) -> Self {
        Self::with_id_generator(backend, ObjectIdGenerator)
    }

    /// Creates a database that assigns identities from `ids`.
    pub fn with_id_generator(backend: B, ids: impl IdGenerator + 'static) -> Self {
        Self { backend, ids: Box::new(ids) }
    }

    /// Name of the underlying database.
    pub fn name(&self) -> &str {
        self.backend.database()
    }

    /// The backend this database writes through.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Gets a collection with the given name. The collection need not exist yet.
    pub fn collection<'a>(&'a self, name: &str) -> Collection<'a, B> {
        Collection::new(name.to_string(), &self.backend, self.ids.as_ref())
    }

    /// Lists all collections in the database.
    pub async fn list_collections(&self) -> StoreResult<Vec<String>> {
        self.backend.list_collections().await
    }

    /// Creates a new, empty collection. Creating an existing collection is a no-op.
    pub async fn create_collection(&self, name: &str) -> StoreResult<()> {
        self.backend
            .create_collection(name)
            .await
    }

    /// Drops a collection with all its documents.
    ///
    /// Change streams on the collection receive a `drop` event followed by `invalidate`,
    /// and are closed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::CollectionNotFound`](crate::error::StoreError::CollectionNotFound)
    /// if the collection does not exist.
    pub async fn drop_collection(&self, name: &str) -> StoreResult<()> {
        self.backend.drop_collection(name).await?;

        let namespace = self.backend.namespace(name);
        debug!(namespace = %namespace, "dropped collection");

        self.backend
            .notify(ChangeDocument::drop(&namespace))
            .await?;
        self.backend
            .notify(ChangeDocument::invalidate(&namespace))
            .await
    }

    /// Renames a collection, keeping its documents.
    ///
    /// Change streams on the old name receive a `rename` event carrying the new namespace,
    /// followed by `invalidate`, and are closed.
    pub async fn rename_collection(&self, from: &str, to: &str) -> StoreResult<()> {
        self.backend
            .rename_collection(from, to)
            .await?;

        let namespace = self.backend.namespace(from);
        let target = self.backend.namespace(to);
        debug!(namespace = %namespace, to = %target, "renamed collection");

        self.backend
            .notify(ChangeDocument::rename(&namespace, &target))
            .await?;
        self.backend
            .notify(ChangeDocument::invalidate(&namespace))
            .await
    }

    /// Shuts down the database and releases backend resources.
    ///
    /// This consumes the database and should be called when no longer needed.
    pub async fn shutdown(self) -> StoreResult<()> {
        self.backend.shutdown().await?;

        Ok(())
    }
}
