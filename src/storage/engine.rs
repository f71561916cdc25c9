use crate::core::{
    Document, ID_FIELD, QueueField, Result, TxnId, TxnLayout, TxnState, token_txn_id,
};
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;
use std::collections::HashSet;

/// Documents of one collection, yielded one at a time.
pub type DocumentStream<'a> = BoxStream<'a, Result<Document>>;

/// Outcome of pruning the transaction log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneStats {
    /// Records looked at in the log collection
    pub examined: usize,
    /// Terminal, unreferenced records removed
    pub deleted: usize,
}

/// Storage backend trait - the document database the repair runs against.
///
/// Implementations wrap a concrete store (the in-memory dump store ships with
/// this crate). Repair stages only ever read documents, replace queue fields
/// and call the two administrative operations; nothing else is mutated.
#[async_trait]
pub trait TxnStore: Send + Sync {
    /// Names of every collection in the database
    async fn collection_names(&self) -> Result<Vec<String>>;

    /// Stream every document of a collection. A missing collection yields nothing.
    async fn scan<'a>(&'a self, collection: &'a str) -> Result<DocumentStream<'a>>;

    /// Fetch a single document by `_id`
    async fn find_by_id(&self, collection: &str, id: &Value) -> Result<Option<Document>>;

    /// Replace the queue field of one document.
    ///
    /// The write only happens while the stored queue still equals `expected`;
    /// otherwise it fails with [`crate::PurgeError::QueueChanged`].
    async fn replace_queue(
        &self,
        collection: &str,
        id: &Value,
        field: &str,
        expected: &[String],
        queue: Vec<String>,
    ) -> Result<()>;

    /// Delete applied or aborted transaction records no queue refers to.
    async fn prune_transactions(&self, layout: &TxnLayout) -> Result<PruneStats>;

    /// Reclaim storage space after deletions
    async fn compact(&self) -> Result<()>;
}

/// Adds every transaction a document's queue refers to.
pub fn collect_references(doc: &Document, field: &str, referenced: &mut HashSet<TxnId>) {
    if let QueueField::Tokens(tokens) = QueueField::read(doc, field) {
        referenced.extend(tokens.iter().filter_map(|t| token_txn_id(t)));
    }
}

/// A log record may be pruned once it is applied or aborted and no queue
/// refers to it. Records without a readable id or state are kept.
pub fn is_prunable(record: &Document, referenced: &HashSet<TxnId>) -> bool {
    let Some(id) = record.get(ID_FIELD).and_then(TxnId::from_id_value) else {
        return false;
    };
    TxnState::of_record(record).is_some_and(|s| s.is_terminal()) && !referenced.contains(&id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_only_unreferenced_terminal_records_are_prunable() {
        let mut referenced = HashSet::new();
        collect_references(
            &doc(json!({"_id": "u/0", "txn-queue": ["t1_a", "junk"]})),
            "txn-queue",
            &mut referenced,
        );
        assert_eq!(referenced.len(), 1);

        assert!(!is_prunable(&doc(json!({"_id": "t1", "s": 6})), &referenced));
        assert!(is_prunable(&doc(json!({"_id": "t2", "s": 5})), &referenced));
        assert!(!is_prunable(&doc(json!({"_id": "t3", "s": 4})), &referenced));
        assert!(!is_prunable(&doc(json!({"_id": "t4"})), &referenced));
        assert!(!is_prunable(&doc(json!({"_id": 7, "s": 6})), &referenced));
    }
}
