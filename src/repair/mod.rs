// ============================================================================
// Repair Stages
// ============================================================================
//
// Each stage reads through a TxnStore and only ever removes queue entries.
// Decisions are made against one KnownTxns index built at the start of the
// run; it is never rebuilt mid-run.
//
// ============================================================================

pub mod classifier;
pub mod known;
pub mod machines;
pub mod orphans;
pub mod singleton;

pub use classifier::{CatalogSnapshot, is_purgeable, purgeable_collections};
pub use known::{KnownTxn, KnownTxns, TokenStatus, TxnSource};
pub use machines::{MachineFixStats, fix_machine_queues};
pub use orphans::{OrphanPurger, PurgeStats};
pub use singleton::{SingletonOutcome, SingletonPolicy, repair_singleton};

use crate::core::PurgeError;

/// Wraps a failure seen while reading a collection, keeping read errors as they are.
pub(crate) fn read_failure(collection: &str, err: PurgeError) -> PurgeError {
    match err {
        PurgeError::Read { .. } => err,
        other => PurgeError::read(collection, other),
    }
}

/// Wraps a failure seen while rewriting one document's queue.
pub(crate) fn write_failure(collection: &str, id: &str, err: PurgeError) -> PurgeError {
    if err.is_write_failure() {
        err
    } else {
        PurgeError::write(collection, id, err)
    }
}
