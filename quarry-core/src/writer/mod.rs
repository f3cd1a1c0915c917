//! Single-operation-kind executors.
//!
//! A writer turns one write model into a [`ChangeSet`](crate::changeset::ChangeSet),
//! applies it through [`StoreBackend::write`], publishes one change document per
//! affected document through [`StoreBackend::notify`], and returns its share of the
//! bulk write result. Writers never catch errors: a failing store call aborts the
//! writer with that error.
//!
//! | model        | writer                                   |
//! |--------------|------------------------------------------|
//! | `insertOne`  | [`InsertWriter`]                         |
//! | `replaceOne` | [`ReplaceWriter`]                        |
//! | `updateOne`  | [`UpdateWriter`] (`single = true`)       |
//! | `updateMany` | [`UpdateWriter`] (`single = false`)      |
//! | `deleteOne`  | [`DeleteWriter`] (`single = true`)       |
//! | `deleteMany` | [`DeleteWriter`] (`single = false`)      |

use async_trait::async_trait;
use std::fmt;

use crate::{
    backend::StoreBackend,
    change::ChangeDocument,
    document::IdGenerator,
    error::StoreResult,
    namespace::Namespace,
    result::BulkWriteResult,
};

mod delete;
mod insert;
mod replace;
mod update;

pub use delete::DeleteWriter;
pub use insert::InsertWriter;
pub use replace::ReplaceWriter;
pub use update::{UpdateWriter, update_stages};

/// Executes one kind of write model against a store.
#[async_trait]
pub trait Writer: Send + Sync {
    type Model: Send + 'static;

    /// Applies `model` and returns the result fields it contributes.
    async fn execute(&self, model: Self::Model) -> StoreResult<BulkWriteResult>;
}

/// What every writer writes through: a backend, one of its collections, and the
/// identity generator used when an upsert creates a document without an `_id`.
pub struct WriteTarget<'a, B: StoreBackend> {
    backend: &'a B,
    collection: &'a str,
    ids: &'a dyn IdGenerator,
}

impl<'a, B: StoreBackend> WriteTarget<'a, B> {
    pub fn new(backend: &'a B, collection: &'a str, ids: &'a dyn IdGenerator) -> Self {
        Self { backend, collection, ids }
    }

    pub fn backend(&self) -> &'a B {
        self.backend
    }

    pub fn collection(&self) -> &'a str {
        self.collection
    }

    pub fn ids(&self) -> &'a dyn IdGenerator {
        self.ids
    }

    pub fn namespace(&self) -> Namespace {
        self.backend.namespace(self.collection)
    }

    /// Notifies subscribers of each change, in order.
    pub async fn publish(&self, changes: Vec<ChangeDocument>) -> StoreResult<()> {
        for change in changes {
            self.backend.notify(change).await?;
        }

        Ok(())
    }
}

impl<B: StoreBackend> Clone for WriteTarget<'_, B> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<B: StoreBackend> Copy for WriteTarget<'_, B> {}

impl<B: StoreBackend> fmt::Debug for WriteTarget<'_, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteTarget")
            .field("backend", self.backend)
            .field("collection", &self.collection)
            .finish()
    }
}
