//! Write results in their MongoDB wire shapes.
//!
//! Writers and the bulk write coordinator work with [`BulkWriteResult`]. The collection
//! facade narrows it into the per-operation shapes ([`InsertOneResult`],
//! [`InsertManyResult`], [`DeleteResult`], [`UpdateResult`]).

use bson::Bson;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Aggregate counts and identity maps for a batch of writes.
///
/// `inserted_ids` and `upserted_ids` are keyed by the position of the contribution
/// within this aggregate (0, 1, 2, ...), not by the position of the operation in the
/// original batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkWriteResult {
    pub inserted_count: u64,
    pub matched_count: u64,
    pub modified_count: u64,
    pub deleted_count: u64,
    pub upserted_count: u64,
    pub inserted_ids: BTreeMap<usize, Bson>,
    pub upserted_ids: BTreeMap<usize, Bson>,
}

impl BulkWriteResult {
    pub fn inserted(id: Bson) -> Self {
        Self {
            inserted_count: 1,
            inserted_ids: BTreeMap::from([(0, id)]),
            ..Self::default()
        }
    }

    pub fn upserted(id: Bson) -> Self {
        Self {
            upserted_count: 1,
            upserted_ids: BTreeMap::from([(0, id)]),
            ..Self::default()
        }
    }

    /// Folds a writer's partial result into this aggregate.
    ///
    /// Counts are summed. Only the first identity of each partial identity map is kept,
    /// re-keyed by this aggregate's running count.
    pub fn fold(&mut self, partial: BulkWriteResult) {
        if let Some(id) = partial.inserted_ids.into_values().next() {
            self.inserted_ids.insert(self.inserted_count as usize, id);
        }
        if let Some(id) = partial.upserted_ids.into_values().next() {
            self.upserted_ids.insert(self.upserted_count as usize, id);
        }

        self.inserted_count += partial.inserted_count;
        self.matched_count += partial.matched_count;
        self.modified_count += partial.modified_count;
        self.deleted_count += partial.deleted_count;
        self.upserted_count += partial.upserted_count;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertOneResult {
    pub acknowledged: bool,
    pub inserted_id: Bson,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertManyResult {
    pub acknowledged: bool,
    pub inserted_count: u64,
    pub inserted_ids: BTreeMap<usize, Bson>,
}

impl From<BulkWriteResult> for InsertManyResult {
    fn from(result: BulkWriteResult) -> Self {
        Self {
            acknowledged: true,
            inserted_count: result.inserted_count,
            inserted_ids: result.inserted_ids,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResult {
    pub acknowledged: bool,
    pub deleted_count: u64,
}

impl From<BulkWriteResult> for DeleteResult {
    fn from(result: BulkWriteResult) -> Self {
        Self {
            acknowledged: true,
            deleted_count: result.deleted_count,
        }
    }
}

/// Result of `replaceOne`, `updateOne` and `updateMany`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResult {
    pub acknowledged: bool,
    pub matched_count: u64,
    pub modified_count: u64,
    pub upserted_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upserted_id: Option<Bson>,
}

impl From<BulkWriteResult> for UpdateResult {
    fn from(result: BulkWriteResult) -> Self {
        Self {
            acknowledged: true,
            matched_count: result.matched_count,
            modified_count: result.modified_count,
            upserted_count: result.upserted_count,
            upserted_id: result.upserted_ids.into_values().next(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fold_sums_counts_and_reindexes_identities() {
        let mut aggregate = BulkWriteResult::default();

        aggregate.fold(BulkWriteResult::inserted(Bson::Int32(10)));
        aggregate.fold(BulkWriteResult { deleted_count: 2, ..Default::default() });
        aggregate.fold(BulkWriteResult::upserted(Bson::String("u".into())));
        aggregate.fold(BulkWriteResult::inserted(Bson::Int32(11)));

        assert_eq!(aggregate.inserted_count, 2);
        assert_eq!(aggregate.deleted_count, 2);
        assert_eq!(aggregate.upserted_count, 1);
        assert_eq!(
            aggregate.inserted_ids,
            BTreeMap::from([(0, Bson::Int32(10)), (1, Bson::Int32(11))])
        );
        assert_eq!(aggregate.upserted_ids, BTreeMap::from([(0, Bson::String("u".into()))]));
    }

    #[test]
    fn fold_keeps_only_the_first_identity_of_a_partial() {
        let mut aggregate = BulkWriteResult::default();
        aggregate.fold(BulkWriteResult {
            inserted_count: 2,
            inserted_ids: BTreeMap::from([(0, Bson::Int32(1)), (1, Bson::Int32(2))]),
            ..Default::default()
        });

        assert_eq!(aggregate.inserted_ids, BTreeMap::from([(0, Bson::Int32(1))]));
    }

    #[test]
    fn update_result_exposes_the_upserted_identity() {
        let result = UpdateResult::from(BulkWriteResult::upserted(Bson::String("x".into())));

        assert_eq!(result.matched_count, 0);
        assert_eq!(result.upserted_count, 1);
        assert_eq!(result.upserted_id, Some(Bson::String("x".into())));

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["upsertedCount"], 1);
        assert_eq!(json["acknowledged"], true);
    }
}
