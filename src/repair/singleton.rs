//! Repair of the host-ports singleton, whose queue grows without bound when
//! its recurring address-update transaction keeps being re-queued.

use super::known::{KnownTxns, TokenStatus};
use super::{read_failure, write_failure};
use crate::core::{QueueField, Result, TxnLayout};
use crate::storage::TxnStore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

/// Which document to repair and how long its queue may get.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SingletonPolicy {
    pub collection: String,
    pub id: String,
    /// Past this length the queue is cut down to outstanding transactions only
    pub max_queue_len: usize,
}

impl Default for SingletonPolicy {
    fn default() -> Self {
        Self {
            collection: "controllers".to_string(),
            id: "apiHostPorts".to_string(),
            max_queue_len: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SingletonOutcome {
    NotFound,
    /// The queue field is not a list of tokens; left untouched
    Unreadable,
    Clean {
        queue_len: usize,
    },
    Repaired {
        before: usize,
        after: usize,
        truncated: bool,
    },
}

/// Computes the repaired queue: orphaned entries dropped first, then, if the
/// queue is still over the bound, everything but outstanding known
/// transactions.
pub fn repaired_queue(
    tokens: &[String],
    known: &KnownTxns,
    max_queue_len: usize,
) -> (Vec<String>, bool) {
    let mut kept: Vec<String> = tokens
        .iter()
        .filter(|t| !matches!(known.classify(t), TokenStatus::Unknown(_)))
        .cloned()
        .collect();

    if kept.len() <= max_queue_len {
        return (kept, false);
    }
    kept.retain(|t| {
        matches!(known.classify(t), TokenStatus::Known(_, txn) if txn.is_outstanding())
    });
    (kept, true)
}

pub async fn repair_singleton<S: TxnStore + ?Sized>(
    store: &S,
    layout: &TxnLayout,
    known: &KnownTxns,
    policy: &SingletonPolicy,
) -> Result<SingletonOutcome> {
    let id = Value::String(policy.id.clone());
    let doc = store
        .find_by_id(&policy.collection, &id)
        .await
        .map_err(|e| read_failure(&policy.collection, e))?;

    let Some(doc) = doc else {
        info!(collection = %policy.collection, id = %policy.id, "singleton document not found");
        return Ok(SingletonOutcome::NotFound);
    };

    let tokens = match QueueField::read(&doc, &layout.queue_field) {
        QueueField::Missing => return Ok(SingletonOutcome::Clean { queue_len: 0 }),
        QueueField::Malformed => {
            warn!(
                collection = %policy.collection,
                id = %policy.id,
                field = %layout.queue_field,
                "singleton queue field is not a list of tokens, leaving it alone"
            );
            return Ok(SingletonOutcome::Unreadable);
        }
        QueueField::Tokens(tokens) => tokens,
    };

    let (kept, truncated) = repaired_queue(&tokens, known, policy.max_queue_len);
    if kept == tokens {
        return Ok(SingletonOutcome::Clean {
            queue_len: tokens.len(),
        });
    }

    let before = tokens.len();
    let after = kept.len();
    store
        .replace_queue(&policy.collection, &id, &layout.queue_field, &tokens, kept)
        .await
        .map_err(|e| write_failure(&policy.collection, &policy.id, e))?;

    warn!(
        collection = %policy.collection,
        id = %policy.id,
        before,
        after,
        truncated,
        "singleton queue repaired"
    );
    Ok(SingletonOutcome::Repaired {
        before,
        after,
        truncated,
    })
}
