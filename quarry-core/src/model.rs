//! Typed bulk-write operation models.
//!
//! [`WriteModel`] is the tagged union the bulk write coordinator dispatches on. Its serde
//! representation is the MongoDB `bulkWrite` wire shape, so a batch can be read straight
//! from JSON:
//!
//! ```ignore
//! let models: Vec<WriteModel> = serde_json::from_str(r#"[
//!     { "insertOne": { "document": { "_id": "a" } } },
//!     { "updateMany": { "filter": { "status": "A" }, "update": { "$set": { "status": "B" } } } },
//!     { "deleteOne": { "filter": { "_id": "a" } } }
//! ]"#)?;
//! ```

use bson::Document;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertOneModel {
    pub document: Document,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplaceOneModel {
    pub filter: Document,
    pub replacement: Document,
    #[serde(default)]
    pub upsert: bool,
}

/// Shared by `updateOne` and `updateMany`.
///
/// `update` maps operator names (`$set`, `$inc`, `$unset`, ...) to their operands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateModel {
    pub filter: Document,
    pub update: Document,
    #[serde(default)]
    pub upsert: bool,
}

/// Shared by `deleteOne` and `deleteMany`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteModel {
    pub filter: Document,
}

/// One element of a bulk write batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WriteModel {
    InsertOne(InsertOneModel),
    ReplaceOne(ReplaceOneModel),
    UpdateOne(UpdateModel),
    UpdateMany(UpdateModel),
    DeleteOne(DeleteModel),
    DeleteMany(DeleteModel),
}

impl WriteModel {
    pub fn insert_one(document: Document) -> Self {
        WriteModel::InsertOne(InsertOneModel { document })
    }

    pub fn replace_one(filter: Document, replacement: Document, upsert: bool) -> Self {
        WriteModel::ReplaceOne(ReplaceOneModel { filter, replacement, upsert })
    }

    pub fn update_one(filter: Document, update: Document, upsert: bool) -> Self {
        WriteModel::UpdateOne(UpdateModel { filter, update, upsert })
    }

    pub fn update_many(filter: Document, update: Document, upsert: bool) -> Self {
        WriteModel::UpdateMany(UpdateModel { filter, update, upsert })
    }

    pub fn delete_one(filter: Document) -> Self {
        WriteModel::DeleteOne(DeleteModel { filter })
    }

    pub fn delete_many(filter: Document) -> Self {
        WriteModel::DeleteMany(DeleteModel { filter })
    }

    /// The wire name of this model's kind.
    pub fn kind(&self) -> &'static str {
        match self {
            WriteModel::InsertOne(_) => "insertOne",
            WriteModel::ReplaceOne(_) => "replaceOne",
            WriteModel::UpdateOne(_) => "updateOne",
            WriteModel::UpdateMany(_) => "updateMany",
            WriteModel::DeleteOne(_) => "deleteOne",
            WriteModel::DeleteMany(_) => "deleteMany",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn reads_the_bulk_write_wire_shape() {
        let models: Vec<WriteModel> = serde_json::from_str(
            r#"[
                { "insertOne": { "document": { "_id": "a" } } },
                { "replaceOne": { "filter": { "_id": "a" }, "replacement": { "v": "b" }, "upsert": true } },
                { "updateMany": { "filter": { "status": "A" }, "update": { "$set": { "status": "B" } } } },
                { "deleteOne": { "filter": { "_id": "a" } } }
            ]"#,
        )
        .unwrap();

        assert_eq!(
            models,
            vec![
                WriteModel::insert_one(doc! { "_id": "a" }),
                WriteModel::replace_one(doc! { "_id": "a" }, doc! { "v": "b" }, true),
                WriteModel::update_many(doc! { "status": "A" }, doc! { "$set": { "status": "B" } }, false),
                WriteModel::delete_one(doc! { "_id": "a" }),
            ]
        );
    }

    #[test]
    fn kinds_use_wire_names() {
        assert_eq!(WriteModel::delete_many(doc! {}).kind(), "deleteMany");
        assert_eq!(WriteModel::update_one(doc! {}, doc! {}, false).kind(), "updateOne");
    }
}
