use super::known::{KnownTxns, TokenStatus};
use super::{read_failure, write_failure};
use crate::core::{ID_FIELD, QueueField, Result, TxnLayout, display_id};
use crate::storage::TxnStore;
use futures::TryStreamExt;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MachineFixStats {
    pub documents_scanned: usize,
    pub documents_updated: usize,
    pub entries_removed: usize,
}

/// Drops entries for transactions the log shows as applied from every
/// machine document's queue.
///
/// Unknown transactions are left for the orphan purge; aborted, in-flight
/// and stateless ones are left alone.
pub async fn fix_machine_queues<S: TxnStore + ?Sized>(
    store: &S,
    layout: &TxnLayout,
    known: &KnownTxns,
    collection: &str,
) -> Result<MachineFixStats> {
    let field = &layout.queue_field;
    let mut stats = MachineFixStats::default();

    let mut machines = store
        .scan(collection)
        .await
        .map_err(|e| read_failure(collection, e))?;
    while let Some(doc) = machines
        .try_next()
        .await
        .map_err(|e| read_failure(collection, e))?
    {
        stats.documents_scanned += 1;
        let (Some(id), QueueField::Tokens(tokens)) =
            (doc.get(ID_FIELD), QueueField::read(&doc, field))
        else {
            continue;
        };

        let kept: Vec<String> = tokens
            .iter()
            .filter(|t| {
                !matches!(known.classify(t), TokenStatus::Known(_, txn) if txn.is_applied())
            })
            .cloned()
            .collect();
        let removed = tokens.len() - kept.len();
        if removed == 0 {
            continue;
        }

        debug!(machine = %display_id(id), removed, "removing completed transactions from queue");
        store
            .replace_queue(collection, id, field, &tokens, kept)
            .await
            .map_err(|e| write_failure(collection, &display_id(id), e))?;
        stats.documents_updated += 1;
        stats.entries_removed += removed;
    }

    info!(
        collection,
        scanned = stats.documents_scanned,
        updated = stats.documents_updated,
        removed = stats.entries_removed,
        "machine queues fixed"
    );
    Ok(stats)
}
