use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A stored document. Field order is kept as read (`serde_json` `preserve_order`).
pub type Document = serde_json::Map<String, Value>;

pub const ID_FIELD: &str = "_id";
pub const STATE_FIELD: &str = "s";
pub const STASH_SUFFIX: &str = "stash";

/// Identifier of a multi-document transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxnId(String);

impl TxnId {
    pub fn new(id: impl Into<String>) -> Self {
        TxnId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Reads a transaction ID out of a document `_id`.
    ///
    /// Accepts a plain string or Mongo extended JSON (`{"$oid": "..."}`).
    pub fn from_id_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) if !s.is_empty() => Some(TxnId(s.clone())),
            Value::Object(map) if map.len() == 1 => match map.get("$oid") {
                Some(Value::String(s)) if !s.is_empty() => Some(TxnId(s.clone())),
                _ => None,
            },
            _ => None,
        }
    }
}

impl std::fmt::Display for TxnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state of a transaction record, as stored in the `s` field.
///
/// ```text
/// Preparing ──> Prepared ──> Applying ──> Applied
///     │             │
///     └──> Aborting ┴──> Aborted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxnState {
    Preparing,
    Prepared,
    Aborting,
    Applying,
    Aborted,
    Applied,
}

impl TxnState {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(TxnState::Preparing),
            2 => Some(TxnState::Prepared),
            3 => Some(TxnState::Aborting),
            4 => Some(TxnState::Applying),
            5 => Some(TxnState::Aborted),
            6 => Some(TxnState::Applied),
            _ => None,
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            TxnState::Preparing => 1,
            TxnState::Prepared => 2,
            TxnState::Aborting => 3,
            TxnState::Applying => 4,
            TxnState::Aborted => 5,
            TxnState::Applied => 6,
        }
    }

    /// Reads the state field of a transaction record.
    pub fn of_record(doc: &Document) -> Option<Self> {
        doc.get(STATE_FIELD)
            .and_then(Value::as_i64)
            .and_then(Self::from_code)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TxnState::Aborted | TxnState::Applied)
    }
}

impl std::fmt::Display for TxnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TxnState::Preparing => write!(f, "PREPARING"),
            TxnState::Prepared => write!(f, "PREPARED"),
            TxnState::Aborting => write!(f, "ABORTING"),
            TxnState::Applying => write!(f, "APPLYING"),
            TxnState::Aborted => write!(f, "ABORTED"),
            TxnState::Applied => write!(f, "APPLIED"),
        }
    }
}

/// Returns the transaction ID a queue token refers to.
///
/// Tokens are `<txn-id>_<nonce>`; anything without a separator is malformed.
pub fn token_txn_id(token: &str) -> Option<TxnId> {
    match token.split_once('_') {
        Some((id, _nonce)) if !id.is_empty() => Some(TxnId::new(id)),
        _ => None,
    }
}

/// The queue field of a document, as found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueField {
    Missing,
    Tokens(Vec<String>),
    /// Present but not an array of strings; never rewritten.
    Malformed,
}

impl QueueField {
    pub fn read(doc: &Document, field: &str) -> Self {
        match doc.get(field) {
            None | Some(Value::Null) => QueueField::Missing,
            Some(Value::Array(items)) => {
                let mut tokens = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::String(s) => tokens.push(s.clone()),
                        _ => return QueueField::Malformed,
                    }
                }
                QueueField::Tokens(tokens)
            }
            Some(_) => QueueField::Malformed,
        }
    }
}

/// Renders a document `_id` for log lines and error messages.
pub fn display_id(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Names of the transaction bookkeeping collections and the queue field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TxnLayout {
    pub log_collection: String,
    pub queue_field: String,
}

impl TxnLayout {
    pub fn new(log_collection: &str) -> Self {
        Self {
            log_collection: log_collection.to_string(),
            ..Self::default()
        }
    }

    pub fn queue_field(mut self, field: &str) -> Self {
        self.queue_field = field.to_string();
        self
    }

    pub fn stash_collection(&self) -> String {
        format!("{}.{}", self.log_collection, STASH_SUFFIX)
    }

    /// Prefix shared by every collection derived from the log (stash included).
    pub fn derived_prefix(&self) -> String {
        format!("{}.", self.log_collection)
    }
}

impl Default for TxnLayout {
    fn default() -> Self {
        Self {
            log_collection: "txns".to_string(),
            queue_field: "txn-queue".to_string(),
        }
    }
}
