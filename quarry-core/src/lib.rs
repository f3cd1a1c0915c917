//! An embeddable document database layer with a MongoDB-compatible write API.
//!
//! This crate is the core of the quarry project and provides:
//!
//! - **Store backend abstraction** ([`backend`]) - The contract storage backends implement
//! - **Change sets** ([`changeset`]) - The insert/delete/replace difference a write applies
//! - **Change documents and streams** ([`change`], [`stream`]) - Classified change notifications and their subscribers
//! - **Writers** ([`writer`]) - One executor per write operation kind
//! - **Bulk writes** ([`bulk`]) - Ordered execution of mixed write batches
//! - **Collections interface** ([`collection`]) - MongoDB-compatible collection facade
//! - **Database handle** ([`store`]) - Collection access and collection lifecycle
//! - **Query and filtering API** ([`query`]) - Filter parsing and typed query construction
//! - **Error handling** ([`error`]) - Error types and result types
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
//! let result = items
//!     .bulk_write(vec![
//!         WriteModel::insert_one(doc! { "_id": 1, "status": "A" }),
//!         WriteModel::update_many(doc! { "status": "A" }, doc! { "$set": { "status": "B" } }, false),
//!     ])
//!     .await?;
//!
//! assert_eq!(result.inserted_count, 1);
//! assert_eq!(result.modified_count, 1);
//! ```

#[allow(unused_extern_crates)]
extern crate self as quarry_core;

pub mod backend;
pub mod bulk;
pub mod change;
pub mod changeset;
pub mod collection;
pub mod document;
pub mod error;
pub mod model;
pub mod namespace;
pub mod query;
pub mod result;
pub mod store;
pub mod stream;
pub mod writer;
