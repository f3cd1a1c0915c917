//! In-memory document storage backend for quarry.
//!
//! This crate provides a thread-safe, in-memory implementation of the `StoreBackend` trait,
//! together with the in-process query and aggregation evaluator it runs on.
//! It uses async-aware read-write locks for concurrent access and is ideal for development,
//! testing, and embedded use.
//!
//! # Features
//!
//! - **Thread-safe access** - Concurrent reads and writes using async-aware RwLock
//! - **Atomic change sets** - A write is validated in full before any of it is applied
//! - **Query support** - Filtering on dotted paths, multi-key sorting, pagination and projection
//! - **Aggregation** - Query stages plus every update operator as a pipeline stage
//!
//! # Quick Start
//!
//! ```ignore
//! use bson::doc;
//! use quarry::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = InMemoryStore::builder().build().await?;
//!     let db = Database::new(backend);
//!     let users = db.collection("users");
//!
//!     users.insert_one(doc! { "name": "Alice" }).await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as quarry_memory;

pub mod evaluator;
pub mod pipeline;
pub mod store;

pub use store::{InMemoryStore, InMemoryStoreBuilder};
