//! In-memory storage implementation for document stores.
//!
//! Documents are kept per collection in insertion order behind one async-aware
//! read-write lock. A change set is validated in full before any of it is applied, so
//! a failing write leaves the collection untouched.

use async_trait::async_trait;
use bson::{Bson, Document};
use mea::rwlock::RwLock;
use std::{
    collections::HashMap,
    sync::Arc,
};
use tracing::debug;

use quarry_core::{
    backend::{StoreBackend, StoreBackendBuilder},
    changeset::ChangeSet,
    document::{document_id, require_id},
    error::{StoreError, StoreResult},
    query::Query,
    stream::ChangeBroadcaster,
};

use crate::{
    evaluator::{DocumentEvaluator, sort_documents},
    pipeline,
};

type CollectionMap = HashMap<String, Vec<Document>>;

/// The database name used when none is configured.
pub const DEFAULT_DATABASE: &str = "test";

/// Thread-safe in-memory document storage backend.
///
/// This struct implements the [`StoreBackend`] trait to provide a fully functional
/// document store that operates entirely in memory using async-aware read-write locks.
///
/// # Thread Safety
///
/// `InMemoryStore` is cloneable and uses an `Arc`-wrapped internal state, allowing
/// it to be safely shared across async tasks. Multiple clones of the same instance
/// share the same underlying data and the same change-stream subscribers.
///
/// # Performance
///
/// Queries scan all documents in a collection (no indexing). For small to medium
/// datasets this is typically acceptable. For larger datasets, consider using a
/// persistent backend like MongoDB.
///
/// # Example
///
/// ```ignore
/// use quarry_memory::InMemoryStore;
/// use quarry::{backend::StoreBackend, changeset::ChangeSet, query::Query};
/// use bson::doc;
///
/// let store = InMemoryStore::new();
/// store
///     .write(ChangeSet::from_insert(vec![doc! { "_id": 1, "name": "Alice" }]), "users")
///     .await?;
///
/// let docs = store.query(Query::new(), "users").await?;
/// assert_eq!(docs.len(), 1);
/// ```
#[derive(Clone, Debug)]
pub struct InMemoryStore {
    database: String,
    /// collection name -> documents, in insertion order
    collections: Arc<RwLock<CollectionMap>>,
    changes: ChangeBroadcaster,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::with_database(DEFAULT_DATABASE)
    }
}

impl InMemoryStore {
    /// Creates a new empty in-memory store for the default database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new empty in-memory store for the named database.
    pub fn with_database(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collections: Arc::new(RwLock::new(CollectionMap::new())),
            changes: ChangeBroadcaster::new(),
        }
    }

    /// Creates a builder for constructing an `InMemoryStore` with custom options.
    ///
    /// # Example
    ///
    /// ```ignore
    /// use quarry_memory::InMemoryStore;
    ///
    /// let store = InMemoryStore::builder().database("inventory").build().await?;
    /// ```
    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder::default()
    }

    fn select(documents: &[Document], query: &Query) -> StoreResult<Vec<Document>> {
        let mut selected = match &query.filter {
            Some(filter) => DocumentEvaluator::filter_documents(documents, filter)?,
            None => documents.to_vec(),
        };

        sort_documents(&mut selected, &query.sort);

        Ok(selected
            .into_iter()
            .skip(query.offset.unwrap_or(0))
            .take(query.limit.unwrap_or(usize::MAX))
            .collect())
    }

    fn position(documents: &[Document], id: &Bson) -> Option<usize> {
        documents
            .iter()
            .position(|document| document_id(document) == Some(id))
    }

    /// Checks that every part of `change_set` can be applied to `documents`.
    fn validate(documents: &[Document], change_set: &ChangeSet, namespace: &str) -> StoreResult<()> {
        let mut inserted: Vec<&Bson> = Vec::new();

        for document in change_set.insertions() {
            let id = require_id(document)?;
            if Self::position(documents, id).is_some() || inserted.contains(&id) {
                return Err(StoreError::DocumentAlreadyExists(id.to_string(), namespace.to_string()));
            }
            inserted.push(id);
        }

        for document in change_set.deletions() {
            let id = require_id(document)?;
            if Self::position(documents, id).is_none() {
                return Err(StoreError::DocumentNotFound(id.to_string(), namespace.to_string()));
            }
        }

        for (_, new) in change_set.replacements() {
            let id = require_id(new)?;
            if Self::position(documents, id).is_none() {
                return Err(StoreError::DocumentNotFound(id.to_string(), namespace.to_string()));
            }
        }

        Ok(())
    }
}

#[async_trait]
impl StoreBackend for InMemoryStore {
    fn database(&self) -> &str {
        &self.database
    }

    fn changes(&self) -> &ChangeBroadcaster {
        &self.changes
    }

    async fn query(&self, query: Query, collection: &str) -> StoreResult<Vec<Document>> {
        let collections = self.collections.read().await;
        let Some(documents) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let selected = Self::select(documents, &query)?;

        match &query.projection {
            Some(projection) => selected
                .iter()
                .map(|document| pipeline::project(document, projection))
                .collect(),
            None => Ok(selected),
        }
    }

    async fn count(&self, query: Query, collection: &str) -> StoreResult<u64> {
        let collections = self.collections.read().await;
        let Some(documents) = collections.get(collection) else {
            return Ok(0);
        };

        let query = Query { sort: Vec::new(), projection: None, ..query };

        Ok(Self::select(documents, &query)?.len() as u64)
    }

    async fn aggregate(
        &self,
        pipeline: Vec<Document>,
        collection: &str,
    ) -> StoreResult<Vec<Document>> {
        let input = if pipeline::starts_with_documents(&pipeline) {
            Vec::new()
        } else {
            self.collections
                .read()
                .await
                .get(collection)
                .cloned()
                .unwrap_or_default()
        };

        pipeline::evaluate(&pipeline, input)
    }

    async fn write(&self, change_set: ChangeSet, collection: &str) -> StoreResult<()> {
        if change_set.is_empty() {
            return Ok(());
        }

        let namespace = self.namespace(collection).to_string();
        let mut collections = self.collections.write().await;

        Self::validate(
            collections
                .get(collection)
                .map(Vec::as_slice)
                .unwrap_or_default(),
            &change_set,
            &namespace,
        )?;

        let deleted: Vec<&Bson> = change_set
            .deletions()
            .into_iter()
            .filter_map(document_id)
            .collect();
        let documents = collections
            .entry(collection.to_string())
            .or_default();

        documents.retain(|document| {
            document_id(document).is_none_or(|id| !deleted.contains(&id))
        });

        let replacements = change_set.replacements();
        for (_, new) in &replacements {
            if let Some(position) = document_id(new).and_then(|id| Self::position(documents, id)) {
                documents[position] = (*new).clone();
            }
        }

        let insertions = change_set.insertions();
        documents.extend(insertions.iter().map(|document| (*document).clone()));

        debug!(
            namespace = %namespace,
            inserted = insertions.len(),
            deleted = deleted.len(),
            replaced = replacements.len(),
            "applied change set"
        );

        Ok(())
    }

    async fn list_collections(&self) -> StoreResult<Vec<String>> {
        let mut names = self.collections
            .read()
            .await
            .keys()
            .cloned()
            .collect::<Vec<_>>();
        names.sort();

        Ok(names)
    }

    async fn create_collection(&self, name: &str) -> StoreResult<()> {
        self.collections
            .write()
            .await
            .entry(name.to_string())
            .or_default();

        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> StoreResult<()> {
        let mut collections = self.collections.write().await;

        if collections.remove(name).is_none() {
            return Err(StoreError::CollectionNotFound(name.to_string()));
        }

        Ok(())
    }

    async fn rename_collection(&self, from: &str, to: &str) -> StoreResult<()> {
        let mut collections = self.collections.write().await;

        if collections.contains_key(to) {
            return Err(StoreError::Backend(format!(
                "target namespace {} already exists",
                self.namespace(to)
            )));
        }

        let Some(documents) = collections.remove(from) else {
            return Err(StoreError::CollectionNotFound(from.to_string()));
        };
        collections.insert(to.to_string(), documents);

        Ok(())
    }
}

/// Builder for constructing [`InMemoryStore`] instances.
///
/// # Example
///
/// ```ignore
/// use quarry_memory::InMemoryStoreBuilder;
/// use quarry::backend::StoreBackendBuilder;
///
/// let store = InMemoryStoreBuilder::new().database("inventory").build().await?;
/// ```
#[derive(Debug, Clone)]
pub struct InMemoryStoreBuilder {
    database: String,
}

impl Default for InMemoryStoreBuilder {
    fn default() -> Self {
        Self { database: DEFAULT_DATABASE.to_string() }
    }
}

impl InMemoryStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the database name reported in change-document namespaces.
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }
}

#[async_trait]
impl StoreBackendBuilder for InMemoryStoreBuilder {
    type Backend = InMemoryStore;

    /// Builds and returns a new [`InMemoryStore`] instance.
    ///
    /// This always succeeds and returns a freshly initialized store.
    async fn build(self) -> StoreResult<Self::Backend> {
        Ok(InMemoryStore::with_database(self.database))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use quarry_core::query::{Filter, SortDirection};

    async fn seeded() -> InMemoryStore {
        let store = InMemoryStore::new();
        store
            .write(
                ChangeSet::from_insert(vec![
                    doc! { "_id": 1, "status": "A", "qty": 30 },
                    doc! { "_id": 2, "status": "B", "qty": 10 },
                    doc! { "_id": 3, "status": "A", "qty": 20 },
                ]),
                "items",
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn query_filters_sorts_pages_and_projects() {
        let store = seeded().await;
        let query = Query::builder()
            .filter(Filter::eq("status", "A"))
            .sort("qty", SortDirection::Asc)
            .limit(1)
            .projection(doc! { "qty": 1 })
            .build();

        assert_eq!(store.query(query, "items").await.unwrap(), vec![doc! { "_id": 3, "qty": 20 }]);
        assert!(store.query(Query::new(), "missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn count_honours_skip_and_limit() {
        let store = seeded().await;

        assert_eq!(store.count(Query::new(), "items").await.unwrap(), 3);
        assert_eq!(
            store.count(Query::builder().offset(1).limit(1).build(), "items").await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn write_applies_every_partition_in_place() {
        let store = seeded().await;

        store
            .write(
                ChangeSet::new(
                    vec![doc! { "_id": 2, "status": "C" }, doc! { "_id": 4 }],
                    vec![doc! { "_id": 1 }, doc! { "_id": 2, "status": "B", "qty": 10 }],
                ),
                "items",
            )
            .await
            .unwrap();

        assert_eq!(
            store.query(Query::new(), "items").await.unwrap(),
            vec![
                doc! { "_id": 2, "status": "C" },
                doc! { "_id": 3, "status": "A", "qty": 20 },
                doc! { "_id": 4 },
            ]
        );
    }

    #[tokio::test]
    async fn invalid_change_sets_leave_the_store_untouched() {
        let store = seeded().await;

        let duplicate = store
            .write(ChangeSet::new(vec![doc! { "_id": 9 }, doc! { "_id": 1 }], Vec::new()), "items")
            .await;
        assert!(matches!(duplicate, Err(StoreError::DocumentAlreadyExists(..))));

        let missing = store
            .write(ChangeSet::from_delete(vec![doc! { "_id": 2 }, doc! { "_id": 7 }]), "items")
            .await;
        assert!(matches!(missing, Err(StoreError::DocumentNotFound(..))));

        let anonymous = store
            .write(ChangeSet::from_insert(vec![doc! { "name": "x" }]), "items")
            .await;
        assert!(matches!(anonymous, Err(StoreError::InvalidDocument(_))));

        assert_eq!(store.count(Query::new(), "items").await.unwrap(), 3);
        assert!(!store.list_collections().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn identity_is_compared_by_bson_equality() {
        let store = InMemoryStore::new();

        store
            .write(
                ChangeSet::from_insert(vec![doc! { "_id": 1_i32 }, doc! { "_id": 1_i64 }]),
                "items",
            )
            .await
            .unwrap();
        store
            .write(ChangeSet::from_delete(vec![doc! { "_id": 1_i64 }]), "items")
            .await
            .unwrap();

        assert_eq!(store.query(Query::new(), "items").await.unwrap(), vec![doc! { "_id": 1_i32 }]);
    }

    #[tokio::test]
    async fn failed_write_does_not_create_the_collection() {
        let store = InMemoryStore::new();

        assert!(store
            .write(ChangeSet::from_delete(vec![doc! { "_id": 1 }]), "ghost")
            .await
            .is_err());
        assert!(store.list_collections().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn aggregate_reads_the_collection_or_literal_documents() {
        let store = seeded().await;

        let totals = store
            .aggregate(vec![doc! { "$match": { "status": "A" } }, doc! { "$inc": { "qty": 1 } }], "items")
            .await
            .unwrap();
        assert_eq!(
            totals,
            vec![doc! { "_id": 1, "status": "A", "qty": 31 }, doc! { "_id": 3, "status": "A", "qty": 21 }]
        );

        let literal = store
            .aggregate(vec![doc! { "$documents": [{ "_id": "x" }] }], "items")
            .await
            .unwrap();
        assert_eq!(literal, vec![doc! { "_id": "x" }]);
    }

    #[tokio::test]
    async fn collection_lifecycle() {
        let store = InMemoryStore::builder().database("inventory").build().await.unwrap();

        store.create_collection("a").await.unwrap();
        store.create_collection("a").await.unwrap();
        store.create_collection("b").await.unwrap();
        assert_eq!(store.list_collections().await.unwrap(), vec!["a", "b"]);

        assert!(store.rename_collection("a", "b").await.is_err());
        store.rename_collection("a", "c").await.unwrap();
        assert_eq!(store.list_collections().await.unwrap(), vec!["b", "c"]);

        store.drop_collection("b").await.unwrap();
        assert!(matches!(
            store.drop_collection("b").await,
            Err(StoreError::CollectionNotFound(_))
        ));
        assert_eq!(store.namespace("c").to_string(), "inventory.c");
    }
}
