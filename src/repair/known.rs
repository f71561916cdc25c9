//! The set of transactions currently known to the database.
//!
//! Built once per run from the transaction log and its stash, then only read.
//! A scan failure aborts the build; a partial index would make live
//! references look orphaned.

use super::read_failure;
use crate::core::{ID_FIELD, Result, TxnId, TxnLayout, TxnState, display_id, token_txn_id};
use crate::storage::TxnStore;
use futures::TryStreamExt;
use std::collections::HashMap;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnSource {
    Log,
    Stash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KnownTxn {
    pub source: TxnSource,
    /// `None` when the record carries no readable state.
    pub state: Option<TxnState>,
}

impl KnownTxn {
    /// Still in flight, or of unknown state.
    pub fn is_outstanding(&self) -> bool {
        self.state.is_none_or(|s| !s.is_terminal())
    }

    pub fn is_applied(&self) -> bool {
        self.state == Some(TxnState::Applied)
    }
}

/// What a queue token refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenStatus {
    /// No transaction ID can be read from the token
    Malformed,
    /// Refers to a transaction absent from both log and stash
    Unknown(TxnId),
    Known(TxnId, KnownTxn),
}

#[derive(Debug, Default)]
pub struct KnownTxns {
    txns: HashMap<TxnId, KnownTxn>,
}

impl KnownTxns {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn build<S: TxnStore + ?Sized>(store: &S, layout: &TxnLayout) -> Result<Self> {
        let mut index = Self::new();

        let log = &layout.log_collection;
        let mut records = store.scan(log).await.map_err(|e| read_failure(log, e))?;
        while let Some(record) = records.try_next().await.map_err(|e| read_failure(log, e))? {
            match record.get(ID_FIELD).and_then(TxnId::from_id_value) {
                Some(id) => index.insert(id, TxnSource::Log, TxnState::of_record(&record)),
                None => warn!(
                    collection = %log,
                    id = %record.get(ID_FIELD).map(display_id).unwrap_or_default(),
                    "skipping transaction record with unreadable id"
                ),
            }
        }
        drop(records);
        let from_log = index.len();

        // Stashed documents are keyed by {c, id}; only stashed transaction records count.
        let stash = layout.stash_collection();
        let mut stashed = store.scan(&stash).await.map_err(|e| read_failure(&stash, e))?;
        while let Some(doc) = stashed.try_next().await.map_err(|e| read_failure(&stash, e))? {
            if let Some(id) = doc.get(ID_FIELD).and_then(TxnId::from_id_value) {
                index.insert(id, TxnSource::Stash, TxnState::of_record(&doc));
            }
        }

        info!(
            known = index.len(),
            from_log,
            from_stash = index.len() - from_log,
            "known-transaction index built"
        );
        Ok(index)
    }

    /// Record a transaction. A log entry takes precedence over a stash entry.
    pub fn insert(&mut self, id: TxnId, source: TxnSource, state: Option<TxnState>) {
        use std::collections::hash_map::Entry;

        match self.txns.entry(id) {
            Entry::Vacant(slot) => {
                slot.insert(KnownTxn { source, state });
            }
            Entry::Occupied(mut slot) => {
                if source == TxnSource::Log {
                    debug!(txn = %slot.key(), "transaction present in both log and stash");
                    slot.insert(KnownTxn { source, state });
                }
            }
        }
    }

    pub fn with(mut self, id: &str, source: TxnSource, state: Option<TxnState>) -> Self {
        self.insert(TxnId::new(id), source, state);
        self
    }

    pub fn contains(&self, id: &TxnId) -> bool {
        self.txns.contains_key(id)
    }

    pub fn get(&self, id: &TxnId) -> Option<&KnownTxn> {
        self.txns.get(id)
    }

    pub fn classify(&self, token: &str) -> TokenStatus {
        match token_txn_id(token) {
            None => TokenStatus::Malformed,
            Some(id) => match self.txns.get(&id) {
                Some(txn) => TokenStatus::Known(id, *txn),
                None => TokenStatus::Unknown(id),
            },
        }
    }

    pub fn len(&self) -> usize {
        self.txns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.txns.is_empty()
    }
}
