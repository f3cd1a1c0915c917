//! Change notifications emitted by writes.
//!
//! A [`ChangeDocument`] mirrors the shape of a MongoDB change event: a resume token,
//! the operation type, the namespace, the affected document's key, and, depending on
//! the operation, the full document and/or an update description. Serializing one with
//! serde yields the camelCase field names MongoDB clients expect.

use bson::{Bson, Document};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    document::{document_id, document_key},
    namespace::Namespace,
};

/// The kind of change a [`ChangeDocument`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Insert,
    Update,
    Replace,
    Delete,
    Invalidate,
    Drop,
    Rename,
}

/// Opaque token identifying a change event, serialized as `{_data: "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResumeToken {
    #[serde(rename = "_data")]
    data: String,
}

impl ResumeToken {
    fn generate() -> Self {
        Self { data: Uuid::new_v4().simple().to_string() }
    }

    pub fn as_str(&self) -> &str {
        &self.data
    }
}

/// Top-level field changes carried by `update` events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDescription {
    pub updated_fields: Document,
    pub removed_fields: Vec<String>,
}

impl UpdateDescription {
    /// Compares two versions of a document field by field.
    ///
    /// Fields whose value changed or that were added land in `updated_fields`;
    /// fields present only in `old` land in `removed_fields`.
    pub fn between(old: &Document, new: &Document) -> Self {
        let updated_fields = new
            .iter()
            .filter(|(key, value)| old.get(key.as_str()) != Some(*value))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect::<Document>();
        let removed_fields = old
            .keys()
            .filter(|key| !new.contains_key(key.as_str()))
            .cloned()
            .collect();

        Self { updated_fields, removed_fields }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeDocument {
    #[serde(rename = "_id")]
    pub id: ResumeToken,
    pub operation_type: OperationType,
    pub ns: Namespace,
    /// Target namespace of a `rename` event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Namespace>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_key: Option<Document>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_document: Option<Document>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_description: Option<UpdateDescription>,
    pub wall_time: DateTime<Utc>,
}

impl ChangeDocument {
    fn new(operation_type: OperationType, namespace: &Namespace) -> Self {
        Self {
            id: ResumeToken::generate(),
            operation_type,
            ns: namespace.clone(),
            to: None,
            document_key: None,
            full_document: None,
            update_description: None,
            wall_time: Utc::now(),
        }
    }

    /// A document-level event that carries the document's full state.
    pub fn with_full_document(
        operation_type: OperationType,
        namespace: &Namespace,
        document: &Document,
    ) -> Self {
        Self {
            full_document: Some(document.clone()),
            ..Self::for_key(operation_type, namespace, document)
        }
    }

    /// A document-level event that only carries the document's key.
    pub fn for_key(operation_type: OperationType, namespace: &Namespace, document: &Document) -> Self {
        Self {
            document_key: document_id(document).map(document_key),
            ..Self::new(operation_type, namespace)
        }
    }

    /// An `update` event for a document that went from `old` to `new`.
    pub fn update(namespace: &Namespace, old: Option<&Document>, new: &Document) -> Self {
        Self {
            update_description: Some(match old {
                Some(old) => UpdateDescription::between(old, new),
                None => UpdateDescription::default(),
            }),
            ..Self::with_full_document(OperationType::Update, namespace, new)
        }
    }

    /// A `drop` event for a whole collection.
    pub fn drop(namespace: &Namespace) -> Self {
        Self::new(OperationType::Drop, namespace)
    }

    /// A `rename` event for a collection moved to `to`.
    pub fn rename(namespace: &Namespace, to: &Namespace) -> Self {
        Self {
            to: Some(to.clone()),
            ..Self::new(OperationType::Rename, namespace)
        }
    }

    /// The `invalidate` event that follows a drop or rename.
    pub fn invalidate(namespace: &Namespace) -> Self {
        Self::new(OperationType::Invalidate, namespace)
    }

    /// The `_id` of the affected document, for document-level events.
    pub fn document_id(&self) -> Option<&Bson> {
        self.document_key
            .as_ref()
            .and_then(document_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn update_description_tracks_changed_and_removed_fields() {
        let description = UpdateDescription::between(
            &doc! { "_id": 1, "a": 1, "b": 2, "c": 3 },
            &doc! { "_id": 1, "a": 1, "b": 5, "d": 4 },
        );

        assert_eq!(description.updated_fields, doc! { "b": 5, "d": 4 });
        assert_eq!(description.removed_fields, vec!["c".to_string()]);
    }

    #[test]
    fn serializes_with_wire_field_names() {
        let namespace = Namespace::new("db", "items");
        let change = ChangeDocument::with_full_document(
            OperationType::Insert,
            &namespace,
            &doc! { "_id": 1, "name": "a" },
        );

        let json = serde_json::to_value(&change).unwrap();

        assert_eq!(json["operationType"], "insert");
        assert_eq!(json["ns"]["coll"], "items");
        assert_eq!(json["fullDocument"]["name"], "a");
        assert!(json["_id"]["_data"].is_string());
        assert!(json.get("updateDescription").is_none());
    }

    #[test]
    fn key_only_events_omit_the_document() {
        let change = ChangeDocument::for_key(
            OperationType::Delete,
            &Namespace::new("db", "items"),
            &doc! { "_id": "x", "v": 1 },
        );

        assert_eq!(change.document_key, Some(doc! { "_id": "x" }));
        assert_eq!(change.document_id(), Some(&Bson::String("x".into())));
        assert!(change.full_document.is_none());
    }

    #[test]
    fn resume_tokens_are_unique() {
        let namespace = Namespace::new("db", "items");
        assert_ne!(ChangeDocument::drop(&namespace).id, ChangeDocument::drop(&namespace).id);
    }
}
