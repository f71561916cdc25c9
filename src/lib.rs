// ============================================================================
// txnpurge Library
// ============================================================================
//
// Repair of a document store's client-side transaction metadata:
// queues left holding references to transactions the log no longer knows,
// an oversized singleton queue, and machine queues holding finished work.
//
// ============================================================================

pub mod config;
pub mod core;
pub mod pipeline;
pub mod repair;
pub mod storage;

pub use config::{PurgeConfig, StageSelection};
pub use crate::core::{PurgeError, Result, TxnId, TxnLayout, TxnState};
pub use pipeline::{Phase, Pipeline, PipelineError, PipelineState, RunReport, Stage, StageOutcome};
pub use repair::{KnownTxns, SingletonOutcome, SingletonPolicy};
pub use storage::{InMemoryStore, MongoStore, MongoTarget, TxnStore};
