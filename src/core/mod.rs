pub mod error;
pub mod types;

pub use error::{PurgeError, Result};
pub use types::{
    Document, ID_FIELD, QueueField, STATE_FIELD, TxnId, TxnLayout, TxnState, display_id,
    token_txn_id,
};
