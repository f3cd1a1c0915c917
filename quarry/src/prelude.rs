//! Convenient re-exports of commonly used types from quarry.
//!
//! ```ignore
//! use quarry::prelude::*;
//! ```

pub use quarry_core::{
    backend::{StoreBackend, StoreBackendBuilder},
    change::{ChangeDocument, OperationType, UpdateDescription},
    changeset::ChangeSet,
    collection::Collection,
    document::{IdGenerator, ObjectIdGenerator, UuidGenerator},
    error::{StoreError, StoreResult},
    model::WriteModel,
    namespace::Namespace,
    query::{Expr, Filter, FindOptions, Query, Sort, SortDirection},
    result::{BulkWriteResult, DeleteResult, InsertManyResult, InsertOneResult, UpdateResult},
    store::Database,
    stream::ChangeStream,
};
pub use quarry_memory::{InMemoryStore, InMemoryStoreBuilder};
