//! Error types and result types for document store operations.
//!
//! Every fallible operation in the write engine returns [`StoreResult<T>`].
//! Errors are never caught or retried inside this crate: a failing Store call
//! aborts the operation that issued it and bubbles up to the caller unchanged.

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Represents all possible errors that can occur when reading from or writing to a store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Serialization/deserialization error when converting between document formats (BSON, JSON).
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Error during store initialization or connection setup.
    #[error("Initialization error: {0}")]
    Initialization(String),
    /// A document with the given `_id` already exists in the namespace.
    /// The first argument is the document ID, the second is the namespace.
    #[error("Document {0} already exists in {1}")]
    DocumentAlreadyExists(String, String),
    /// A document that a write expected to find is missing from the namespace.
    /// The first argument is the document ID, the second is the namespace.
    #[error("Document not found {0} in {1}")]
    DocumentNotFound(String, String),
    /// The requested collection does not exist in the store.
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),
    /// The document has an invalid structure (for example, no `_id` where one is required).
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
    /// The filter document could not be parsed.
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),
    /// The update-operator document could not be turned into pipeline stages.
    #[error("Invalid update: {0}")]
    InvalidUpdate(String),
    /// The aggregation pipeline contains a stage the evaluator does not understand.
    #[error("Invalid pipeline: {0}")]
    InvalidPipeline(String),
    /// An error occurred in the underlying storage backend.
    #[error("Backend error: {0}")]
    Backend(String),
    /// An unknown error occurred.
    #[error("Unknown error: {0}")]
    Unknown(String),
}

/// A specialized `Result` type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

impl From<BsonError> for StoreError {
    fn from(err: BsonError) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for StoreError {
    fn from(err: SerdeJsonError) -> Self {
        StoreError::Serialization(err.to_string())
    }
}
