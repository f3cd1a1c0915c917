//! Document identity and conversion helpers.
//!
//! Documents are plain [`bson::Document`] values. Exactly one key, `_id`, is the
//! identity: it is assigned at insertion when absent and never changes afterwards.
//! This module provides the identity-generator seam ([`IdGenerator`]) and
//! conversions between typed serde values and BSON documents.

use bson::{
    Bson, Document, Uuid,
    de::deserialize_from_bson,
    oid::ObjectId,
    ser::serialize_to_bson,
};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

use crate::error::{StoreError, StoreResult};

/// The key holding a document's identity.
pub const ID_FIELD: &str = "_id";

/// Produces collision-resistant identities for documents inserted without an `_id`.
pub trait IdGenerator: Send + Sync + Debug {
    /// Returns a fresh identity value.
    fn generate(&self) -> Bson;
}

/// Generates MongoDB `ObjectId` identities. This is the default generator.
#[derive(Debug, Default, Clone, Copy)]
pub struct ObjectIdGenerator;

impl IdGenerator for ObjectIdGenerator {
    fn generate(&self) -> Bson {
        Bson::ObjectId(ObjectId::new())
    }
}

/// Generates random (v4) UUID identities stored as BSON binary subtype 4.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn generate(&self) -> Bson {
        Bson::from(Uuid::new())
    }
}

/// Returns the `_id` of a document, if it has one.
pub fn document_id(document: &Document) -> Option<&Bson> {
    document.get(ID_FIELD)
}

/// Returns the `_id` of a document or an [`StoreError::InvalidDocument`] error.
pub fn require_id(document: &Document) -> StoreResult<&Bson> {
    document_id(document)
        .ok_or_else(|| StoreError::InvalidDocument(format!("document has no {ID_FIELD}: {document}")))
}

/// Assigns a generated `_id` to the document when it has none, and returns the identity.
pub fn ensure_id(document: &mut Document, generator: &dyn IdGenerator) -> Bson {
    if let Some(id) = document_id(document) {
        return id.clone();
    }

    let id = generator.generate();
    *document = with_default_id(std::mem::take(document), id.clone());

    id
}

/// Returns `document` with `_id` set to `id` unless it already has an `_id`.
///
/// A defaulted `_id` is placed first in the document, matching how MongoDB drivers
/// lay out inserted documents.
pub fn with_default_id(document: Document, id: Bson) -> Document {
    if document.contains_key(ID_FIELD) {
        return document;
    }

    let mut with_id = Document::new();
    with_id.insert(ID_FIELD, id);
    for (key, value) in document {
        with_id.insert(key, value);
    }

    with_id
}

/// Builds a `{_id: <id>}` document key.
pub fn document_key(id: &Bson) -> Document {
    let mut key = Document::new();
    key.insert(ID_FIELD, id.clone());
    key
}

/// Serializes any serde value into a BSON document.
///
/// # Errors
///
/// Returns [`StoreError::InvalidDocument`] if the value does not serialize to a document,
/// or [`StoreError::Serialization`] if serialization fails.
pub fn to_document<T: Serialize>(value: &T) -> StoreResult<Document> {
    match serialize_to_bson(value)? {
        Bson::Document(document) => Ok(document),
        other => Err(StoreError::InvalidDocument(format!(
            "expected a document, got {:?}",
            other.element_type()
        ))),
    }
}

/// Deserializes a BSON document into any serde value.
pub fn from_document<T: for<'de> Deserialize<'de>>(document: Document) -> StoreResult<T> {
    Ok(deserialize_from_bson(Bson::Document(document))?)
}
