//! The net effect of one write, expressed as before/after document sets.
//!
//! A [`ChangeSet`] holds two ordered sequences: `incoming` (documents that should exist
//! after the write) and `outgoing` (documents that existed before it). The fate of a
//! document is decided only by `_id` equality across the two sides:
//!
//! - an *insertion* is an incoming document whose `_id` is absent from outgoing,
//! - a *deletion* is an outgoing document whose `_id` is absent from incoming,
//! - a *replacement* is an incoming document whose `_id` is present in outgoing.
//!
//! Writers build single-kind change sets directly ([`ChangeSet::from_insert`],
//! [`ChangeSet::from_delete`], [`ChangeSet::from_replace`]). [`ChangeSet::from_diff`]
//! compares two full snapshots and is used for resync.

use bson::{Bson, Document};

use crate::{
    change::{ChangeDocument, OperationType},
    document::document_id,
    namespace::Namespace,
};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    incoming: Vec<Document>,
    outgoing: Vec<Document>,
}

impl ChangeSet {
    /// Creates a change set from explicit after (`incoming`) and before (`outgoing`) sides.
    pub fn new(incoming: Vec<Document>, outgoing: Vec<Document>) -> Self {
        Self { incoming, outgoing }
    }

    /// Every document is inserted.
    pub fn from_insert(documents: Vec<Document>) -> Self {
        Self::new(documents, Vec::new())
    }

    /// Every document is deleted.
    pub fn from_delete(documents: Vec<Document>) -> Self {
        Self::new(Vec::new(), documents)
    }

    /// One document replaces another with the same `_id`.
    pub fn from_replace(old: Document, new: Document) -> Self {
        Self::new(vec![new], vec![old])
    }

    /// Computes the change set that turns snapshot `before` into snapshot `after`.
    ///
    /// Documents that are structurally identical on both sides (including `_id`) are
    /// dropped from both sequences, so an unchanged document produces no change.
    pub fn from_diff(before: Vec<Document>, after: Vec<Document>) -> Self {
        let unchanged: Vec<bool> = before
            .iter()
            .map(|document| after.contains(document))
            .collect();

        let outgoing = before
            .iter()
            .zip(&unchanged)
            .filter(|(_, same)| !**same)
            .map(|(document, _)| document.clone())
            .collect::<Vec<_>>();
        let incoming = after
            .into_iter()
            .filter(|document| !before.contains(document))
            .collect::<Vec<_>>();

        Self::new(incoming, outgoing)
    }

    /// Swaps the before and after sides.
    pub fn to_inverse(&self) -> Self {
        Self::new(self.outgoing.clone(), self.incoming.clone())
    }

    pub fn incoming(&self) -> &[Document] {
        &self.incoming
    }

    pub fn outgoing(&self) -> &[Document] {
        &self.outgoing
    }

    /// True when the change set would not touch the store.
    pub fn is_empty(&self) -> bool {
        self.incoming.is_empty() && self.outgoing.is_empty()
    }

    /// Incoming documents whose `_id` does not appear on the outgoing side.
    pub fn insertions(&self) -> Vec<&Document> {
        self.incoming
            .iter()
            .filter(|document| Self::find_by_id(&self.outgoing, document_id(document)).is_none())
            .collect()
    }

    /// Outgoing documents whose `_id` does not appear on the incoming side.
    pub fn deletions(&self) -> Vec<&Document> {
        self.outgoing
            .iter()
            .filter(|document| Self::find_by_id(&self.incoming, document_id(document)).is_none())
            .collect()
    }

    /// `(old, new)` pairs for incoming documents whose `_id` appears on the outgoing side.
    pub fn replacements(&self) -> Vec<(&Document, &Document)> {
        self.incoming
            .iter()
            .filter_map(|new| {
                Self::find_by_id(&self.outgoing, document_id(new)).map(|old| (old, new))
            })
            .collect()
    }

    /// Maps the change set onto change documents: insertions first, then deletions,
    /// then replacements.
    pub fn to_changes(&self, namespace: &Namespace) -> Vec<ChangeDocument> {
        let insertions = self
            .insertions()
            .into_iter()
            .map(|document| ChangeDocument::with_full_document(OperationType::Insert, namespace, document));
        let deletions = self
            .deletions()
            .into_iter()
            .map(|document| ChangeDocument::for_key(OperationType::Delete, namespace, document));
        let replacements = self
            .replacements()
            .into_iter()
            .map(|(_, new)| ChangeDocument::with_full_document(OperationType::Replace, namespace, new));

        insertions
            .chain(deletions)
            .chain(replacements)
            .collect()
    }

    fn find_by_id<'a>(documents: &'a [Document], id: Option<&Bson>) -> Option<&'a Document> {
        let id = id?;
        documents
            .iter()
            .find(|document| document_id(document) == Some(id))
    }
}
