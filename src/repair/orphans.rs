use super::known::{KnownTxns, TokenStatus};
use super::{read_failure, write_failure};
use crate::core::{ID_FIELD, QueueField, Result, TxnLayout, display_id};
use crate::storage::TxnStore;
use futures::TryStreamExt;
use tracing::{debug, info, info_span, warn, Instrument};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeStats {
    pub collections: usize,
    pub documents_scanned: usize,
    pub documents_updated: usize,
    pub entries_removed: usize,
    /// Tokens with no readable transaction ID; always kept
    pub malformed_entries: usize,
    /// Documents whose queue field is not a list of tokens
    pub unreadable_queues: usize,
    /// Stashed documents updated, also counted in `documents_updated`
    pub stash_documents_updated: usize,
}

/// Removes queue entries that point at transactions absent from the index.
///
/// Documents are streamed one at a time and written only when their queue
/// actually changes. The first failed write stops the purge.
pub struct OrphanPurger<'a, S: TxnStore + ?Sized> {
    store: &'a S,
    layout: &'a TxnLayout,
    known: &'a KnownTxns,
}

impl<'a, S: TxnStore + ?Sized> OrphanPurger<'a, S> {
    pub fn new(store: &'a S, layout: &'a TxnLayout, known: &'a KnownTxns) -> Self {
        Self {
            store,
            layout,
            known,
        }
    }

    /// Purge every given collection in order, then the stashed documents.
    pub async fn purge(&self, collections: &[String]) -> Result<PurgeStats> {
        let mut stats = PurgeStats::default();

        for collection in collections {
            let span = info_span!("purge.collection", collection = %collection);
            self.purge_collection(collection, &mut stats)
                .instrument(span)
                .await?;
        }

        let stash = self.layout.stash_collection();
        let before = stats.documents_updated;
        self.purge_collection(&stash, &mut stats)
            .instrument(info_span!("purge.stash", collection = %stash))
            .await?;
        stats.stash_documents_updated = stats.documents_updated - before;

        Ok(stats)
    }

    pub async fn purge_collection(&self, collection: &str, stats: &mut PurgeStats) -> Result<()> {
        let field = &self.layout.queue_field;
        let mut docs = self
            .store
            .scan(collection)
            .await
            .map_err(|e| read_failure(collection, e))?;

        let mut updated = 0usize;
        while let Some(doc) = docs.try_next().await.map_err(|e| read_failure(collection, e))? {
            stats.documents_scanned += 1;

            let tokens = match QueueField::read(&doc, field) {
                QueueField::Missing => continue,
                QueueField::Tokens(tokens) if tokens.is_empty() => continue,
                QueueField::Tokens(tokens) => tokens,
                QueueField::Malformed => {
                    stats.unreadable_queues += 1;
                    warn!(
                        id = %doc.get(ID_FIELD).map(display_id).unwrap_or_default(),
                        "queue field is not a list of tokens, skipping document"
                    );
                    continue;
                }
            };
            let Some(id) = doc.get(ID_FIELD) else {
                warn!("document without _id carries a queue, skipping");
                continue;
            };

            let mut kept = Vec::with_capacity(tokens.len());
            let mut removed = 0usize;
            for token in &tokens {
                match self.known.classify(token) {
                    TokenStatus::Unknown(txn) => {
                        warn!(
                            id = %display_id(id),
                            txn = %txn,
                            "purging missing transaction reference"
                        );
                        removed += 1;
                    }
                    TokenStatus::Malformed => {
                        stats.malformed_entries += 1;
                        warn!(
                            id = %display_id(id),
                            token = %token,
                            "keeping malformed queue token"
                        );
                        kept.push(token.clone());
                    }
                    TokenStatus::Known(..) => kept.push(token.clone()),
                }
            }
            if removed == 0 {
                continue;
            }

            // An emptied queue stays as an empty list.
            self.store
                .replace_queue(collection, id, field, &tokens, kept)
                .await
                .map_err(|e| write_failure(collection, &display_id(id), e))?;
            updated += 1;
            stats.entries_removed += removed;
        }

        stats.collections += 1;
        stats.documents_updated += updated;
        if updated > 0 {
            info!(updated, "purged orphaned references");
        } else {
            debug!("no orphaned references");
        }
        Ok(())
    }
}
