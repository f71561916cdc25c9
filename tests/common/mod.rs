#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicUsize, Ordering};
use txnpurge::core::{Document, PurgeError, Result, TxnLayout};
use txnpurge::storage::{DocumentStream, InMemoryStore, PruneStats, TxnStore};

pub fn doc(value: Value) -> Document {
    value.as_object().cloned().expect("fixture must be an object")
}

pub async fn put(store: &InMemoryStore, collection: &str, value: Value) {
    store.insert_document(collection, doc(value)).await.unwrap();
}

pub async fn queue_of(store: &impl TxnStore, collection: &str, id: &str) -> Value {
    let doc = store
        .find_by_id(collection, &json!(id))
        .await
        .unwrap()
        .unwrap_or_else(|| panic!("{}/{} missing", collection, id));
    doc.get("txn-queue").cloned().unwrap_or(Value::Null)
}

/// A small but complete database:
///
/// - log: t1 applied, t3 applying, t5 aborted, t6 applied
/// - stash: one stashed document, one stashed transaction record (t7)
/// - t2, t8, t9 are referenced but unknown
pub async fn sample_store() -> InMemoryStore {
    let store = InMemoryStore::new();
    fill_sample(&store).await;
    store
}

pub async fn fill_sample(store: &InMemoryStore) {
    put(store, "txns", json!({"_id": "t1", "s": 6})).await;
    put(store, "txns", json!({"_id": "t3", "s": 4})).await;
    put(store, "txns", json!({"_id": "t5", "s": 5})).await;
    put(store, "txns", json!({"_id": "t6", "s": 6})).await;

    put(
        store,
        "txns.stash",
        json!({"_id": {"c": "units", "id": "u/9"}, "txn-queue": ["t1_a", "t8_z"]}),
    )
    .await;
    put(store, "txns.stash", json!({"_id": "t7", "s": 2})).await;

    put(
        store,
        "controllers",
        json!({"_id": "apiHostPorts", "txn-queue": ["t1_a", "t2_b", "t3_c", "t7_d"]}),
    )
    .await;

    put(store, "units", json!({"_id": "u/0", "txn-queue": ["t1_a", "t2_b", "t3_c"]})).await;
    put(store, "units", json!({"_id": "u/1", "txn-queue": ["t2_x"]})).await;
    put(store, "units", json!({"_id": "u/2", "name": "no queue"})).await;
    put(store, "units", json!({"_id": "u/3", "txn-queue": ["garbage"]})).await;

    put(store, "machines", json!({"_id": "0", "txn-queue": ["t1_a", "t3_c", "t9_q"]})).await;

    put(store, "system.indexes", json!({"_id": "i0", "txn-queue": ["t2_b"]})).await;
}

/// Wraps a store, counting mutations and failing chosen operations.
pub struct FaultyStore {
    pub inner: InMemoryStore,
    fail_scan: Option<String>,
    fail_write: Option<String>,
    fail_prune: bool,
    fail_compact: bool,
    writes: AtomicUsize,
    prunes: AtomicUsize,
    compactions: AtomicUsize,
}

impl FaultyStore {
    pub fn new(inner: InMemoryStore) -> Self {
        Self {
            inner,
            fail_scan: None,
            fail_write: None,
            fail_prune: false,
            fail_compact: false,
            writes: AtomicUsize::new(0),
            prunes: AtomicUsize::new(0),
            compactions: AtomicUsize::new(0),
        }
    }

    pub fn fail_scan_of(mut self, collection: &str) -> Self {
        self.fail_scan = Some(collection.to_string());
        self
    }

    pub fn fail_writes_to(mut self, collection: &str) -> Self {
        self.fail_write = Some(collection.to_string());
        self
    }

    pub fn fail_prune(mut self) -> Self {
        self.fail_prune = true;
        self
    }

    pub fn fail_compact(mut self) -> Self {
        self.fail_compact = true;
        self
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn prunes(&self) -> usize {
        self.prunes.load(Ordering::SeqCst)
    }

    pub fn compactions(&self) -> usize {
        self.compactions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TxnStore for FaultyStore {
    async fn collection_names(&self) -> Result<Vec<String>> {
        self.inner.collection_names().await
    }

    async fn scan<'a>(&'a self, collection: &'a str) -> Result<DocumentStream<'a>> {
        if self.fail_scan.as_deref() == Some(collection) {
            return Err(PurgeError::Io("connection reset".to_string()));
        }
        self.inner.scan(collection).await
    }

    async fn find_by_id(&self, collection: &str, id: &Value) -> Result<Option<Document>> {
        self.inner.find_by_id(collection, id).await
    }

    async fn replace_queue(
        &self,
        collection: &str,
        id: &Value,
        field: &str,
        expected: &[String],
        queue: Vec<String>,
    ) -> Result<()> {
        if self.fail_write.as_deref() == Some(collection) {
            return Err(PurgeError::Io("write rejected".to_string()));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner
            .replace_queue(collection, id, field, expected, queue)
            .await
    }

    async fn prune_transactions(&self, layout: &TxnLayout) -> Result<PruneStats> {
        self.prunes.fetch_add(1, Ordering::SeqCst);
        if self.fail_prune {
            return Err(PurgeError::Io("prune refused".to_string()));
        }
        self.inner.prune_transactions(layout).await
    }

    async fn compact(&self) -> Result<()> {
        self.compactions.fetch_add(1, Ordering::SeqCst);
        if self.fail_compact {
            return Err(PurgeError::Io("compact refused".to_string()));
        }
        self.inner.compact().await
    }
}
