pub mod engine;
pub mod memory;
pub mod mongo;
pub mod persistence;

pub use engine::{DocumentStream, PruneStats, TxnStore};
pub use memory::InMemoryStore;
pub use mongo::{MongoStore, MongoTarget};
pub use persistence::{DUMP_FORMAT_VERSION, DumpFile, DumpManager};
