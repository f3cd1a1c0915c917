//! Main quarry crate providing a MongoDB-compatible document layer.
//!
//! This crate is the primary entry point for users of quarry. It re-exports the core
//! write engine from `quarry-core` and gives access to the storage backends.
//!
//! # Features
//!
//! - **MongoDB-shaped API** - `insertOne`, `updateMany`, `bulkWrite` and friends, taking
//!   and returning plain BSON documents
//! - **Change streams** - Subscribe to a collection and receive one change document per
//!   written document
//! - **Multiple backends** - In-memory and MongoDB storage behind one trait
//! - **Bulk writes** - Mixed batches executed in order with aggregated results
//!
//! # Quick Start
//!
//! ```ignore
//! use bson::doc;
//! use quarry::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> StoreResult<()> {
//!     let db = Database::new(InMemoryStore::builder().build().await?);
//!     let users = db.collection("users");
//!
//!     // Subscribe before writing to observe the insert
//!     let stream = users.watch(Vec::new()).await;
//!
//!     let inserted = users.insert_one(doc! { "name": "Alice" }).await?;
//!     println!("inserted {}", inserted.inserted_id);
//!
//!     let updated = users
//!         .update_many(doc! { "name": "Alice" }, doc! { "$inc": { "logins": 1 } }, false)
//!         .await?;
//!     assert_eq!(updated.matched_count, 1);
//!
//!     while let Some(change) = stream.next().await {
//!         println!("{:?} on {}", change.operation_type, change.ns);
//!     }
//!
//!     db.shutdown().await
//! }
//! ```
//!
//! # Bulk Writes
//!
//! Write models deserialize from the MongoDB `bulkWrite` shape, so batches can come
//! straight from JSON:
//!
//! ```ignore
//! use quarry::prelude::*;
//!
//! let models: Vec<WriteModel> = serde_json::from_str(r#"[
//!     { "insertOne": { "document": { "_id": 1, "status": "A" } } },
//!     { "updateOne": { "filter": { "_id": 1 }, "update": { "$set": { "status": "B" } } } },
//!     { "deleteMany": { "filter": { "status": "C" } } }
//! ]"#)?;
//!
//! let result = db.collection("orders").bulk_write(models).await?;
//! assert_eq!(result.inserted_count, 1);
//! ```
//!
//! # Backends
//!
//! - [`memory`] - Fast in-memory storage for development and testing
//! - `mongodb` - Persistent MongoDB backend (requires the `mongodb` feature)

pub mod prelude;

pub use quarry_core::{
    backend, bulk, change, changeset, collection, document, error, model, namespace, query,
    result, store, stream, writer,
};

// Re-export BSON types for convenience
pub use bson;

/// In-memory storage backend implementations.
pub mod memory {
    pub use quarry_memory::{InMemoryStore, InMemoryStoreBuilder};
}

/// MongoDB storage backend implementations.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use quarry_mongodb::{MongoDbStore, MongoDbStoreBuilder};
}
