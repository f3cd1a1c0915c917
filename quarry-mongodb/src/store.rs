use async_trait::async_trait;
use bson::{Bson, Document, doc};
use futures::TryStreamExt;
use mongodb::{
    Client, Collection as MongoCollection,
    error::{Error as MongoError, ErrorKind, WriteFailure},
    options::{ClientOptions, CountOptions, FindOptions},
};
use tracing::debug;

use quarry_core::{
    backend::{StoreBackend, StoreBackendBuilder},
    changeset::ChangeSet,
    document::require_id,
    error::{StoreError, StoreResult},
    query::Query,
    stream::ChangeBroadcaster,
};

use crate::{pipeline::PipelineTranslator, query::MongoQueryTranslator};

const DUPLICATE_KEY: i32 = 11000;

/// A store backed by a MongoDB database.
///
/// Change documents are published to subscribers of this store instance only; changes
/// made by other clients of the same database are not observed.
///
/// `write` applies deletions, then replacements, then insertions, as separate
/// operations. Without a transaction a failure part-way leaves the earlier partitions
/// applied.
#[derive(Debug)]
pub struct MongoDbStore {
    client: Client,
    database: String,
    changes: ChangeBroadcaster,
}

impl MongoDbStore {
    pub fn new(client: Client, database: String) -> Self {
        Self { client, database, changes: ChangeBroadcaster::new() }
    }

    pub fn builder(dsn: &str, database: &str) -> MongoDbStoreBuilder {
        MongoDbStoreBuilder::new(dsn, database)
    }

    fn get_collection(&self, collection_name: &str) -> MongoCollection<Document> {
        self.client
            .database(&self.database)
            .collection(collection_name)
    }

    async fn collection_exists(&self, name: &str) -> StoreResult<bool> {
        Ok(self
            .list_collections()
            .await?
            .iter()
            .any(|existing| existing == name))
    }

    fn backend_error(&self, error: MongoError, collection: &str, id: Option<&Bson>) -> StoreError {
        let duplicate = match error.kind.as_ref() {
            ErrorKind::Write(WriteFailure::WriteError(write_error)) => write_error.code == DUPLICATE_KEY,
            ErrorKind::InsertMany(insert_error) => insert_error
                .write_errors
                .as_ref()
                .is_some_and(|errors| errors.iter().any(|e| e.code == DUPLICATE_KEY)),
            _ => false,
        };

        if duplicate {
            return StoreError::DocumentAlreadyExists(
                id.map(ToString::to_string).unwrap_or_default(),
                self.namespace(collection).to_string(),
            );
        }

        StoreError::Backend(error.to_string())
    }

    async fn shutdown(self) -> StoreResult<()> {
        self.client.shutdown().await;

        Ok(())
    }
}

#[async_trait]
impl StoreBackend for MongoDbStore {
    fn database(&self) -> &str {
        &self.database
    }

    fn changes(&self) -> &ChangeBroadcaster {
        &self.changes
    }

    async fn query(&self, query: Query, collection: &str) -> StoreResult<Vec<Document>> {
        let mut options = FindOptions::default();

        if let Some(limit) = query.limit {
            options.limit = Some(limit as i64);
        }
        if let Some(skip) = query.offset {
            options.skip = Some(skip as u64);
        }
        options.sort = MongoQueryTranslator::sort(&query.sort);
        options.projection = query.projection.clone();

        self.get_collection(collection)
            .find(MongoQueryTranslator::translate(query.filter.as_ref())?)
            .with_options(options)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?
            .try_collect::<Vec<Document>>()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn count(&self, query: Query, collection: &str) -> StoreResult<u64> {
        let mut options = CountOptions::default();

        if let Some(limit) = query.limit {
            options.limit = Some(limit as u64);
        }
        if let Some(skip) = query.offset {
            options.skip = Some(skip as u64);
        }

        self.get_collection(collection)
            .count_documents(MongoQueryTranslator::translate(query.filter.as_ref())?)
            .with_options(options)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn aggregate(
        &self,
        pipeline: Vec<Document>,
        collection: &str,
    ) -> StoreResult<Vec<Document>> {
        let from_documents = pipeline
            .first()
            .is_some_and(|stage| stage.contains_key("$documents"));
        let pipeline = PipelineTranslator::translate(pipeline)?;

        let cursor = if from_documents {
            self.client
                .database(&self.database)
                .aggregate(pipeline)
                .await
        } else {
            self.get_collection(collection)
                .aggregate(pipeline)
                .await
        };

        cursor
            .map_err(|e| StoreError::Backend(e.to_string()))?
            .try_collect::<Vec<Document>>()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn write(&self, change_set: ChangeSet, collection: &str) -> StoreResult<()> {
        let target = self.get_collection(collection);
        let namespace = self.namespace(collection).to_string();

        let deletions = change_set.deletions();
        if !deletions.is_empty() {
            let ids = deletions
                .iter()
                .map(|document| require_id(document).cloned())
                .collect::<StoreResult<Vec<Bson>>>()?;

            let result = target
                .delete_many(doc! { "_id": { "$in": ids.clone() } })
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;

            if result.deleted_count < ids.len() as u64 {
                return Err(StoreError::DocumentNotFound(
                    Bson::Array(ids).to_string(),
                    namespace,
                ));
            }
        }

        let replacements = change_set.replacements();
        for (_, new) in &replacements {
            let id = require_id(new)?;
            let result = target
                .replace_one(doc! { "_id": id.clone() }, (*new).clone())
                .await
                .map_err(|e| self.backend_error(e, collection, Some(id)))?;

            if result.matched_count == 0 {
                return Err(StoreError::DocumentNotFound(id.to_string(), namespace));
            }
        }

        let insertions = change_set.insertions();
        if !insertions.is_empty() {
            for document in &insertions {
                require_id(document)?;
            }

            target
                .insert_many(insertions.iter().map(|document| (*document).clone()))
                .await
                .map_err(|e| {
                    let id = insertions.first().and_then(|document| document.get("_id"));
                    self.backend_error(e, collection, id)
                })?;
        }

        debug!(
            namespace = %namespace,
            inserted = insertions.len(),
            deleted = deletions.len(),
            replaced = replacements.len(),
            "applied change set"
        );

        Ok(())
    }

    async fn list_collections(&self) -> StoreResult<Vec<String>> {
        let mut names = self.client
            .database(&self.database)
            .list_collection_names()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        names.sort();

        Ok(names)
    }

    async fn create_collection(&self, name: &str) -> StoreResult<()> {
        if self.collection_exists(name).await? {
            return Ok(());
        }

        self.client
            .database(&self.database)
            .create_collection(name)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> StoreResult<()> {
        if !self.collection_exists(name).await? {
            return Err(StoreError::CollectionNotFound(name.to_string()));
        }

        self.get_collection(name)
            .drop()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(())
    }

    async fn rename_collection(&self, from: &str, to: &str) -> StoreResult<()> {
        if !self.collection_exists(from).await? {
            return Err(StoreError::CollectionNotFound(from.to_string()));
        }

        self.client
            .database("admin")
            .run_command(doc! {
                "renameCollection": self.namespace(from).to_string(),
                "to": self.namespace(to).to_string(),
            })
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(())
    }

    async fn shutdown(self) -> StoreResult<()> {
        self.shutdown().await
    }
}

/// Builds a [`MongoDbStore`] from a connection string and a database name.
pub struct MongoDbStoreBuilder {
    dsn: String,
    database: String,
}

impl MongoDbStoreBuilder {
    pub fn new(dsn: &str, database: &str) -> Self {
        Self {
            dsn: dsn.to_string(),
            database: database.to_string(),
        }
    }
}

#[async_trait]
impl StoreBackendBuilder for MongoDbStoreBuilder {
    type Backend = MongoDbStore;

    async fn build(self) -> StoreResult<Self::Backend> {
        Ok(MongoDbStore::new(
            Client::with_options(
                ClientOptions::parse(&self.dsn)
                    .await
                    .map_err(|e| StoreError::Initialization(e.to_string()))?,
            )
            .map_err(|e| StoreError::Initialization(e.to_string()))?,
            self.database,
        ))
    }
}
