use super::engine::{DocumentStream, PruneStats, TxnStore, collect_references, is_prunable};
use super::persistence::{DumpFile, DumpManager};
use crate::core::{Document, ID_FIELD, PurgeError, QueueField, Result, TxnId, TxnLayout, display_id};
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Documents of one collection keyed by their canonical `_id` rendering.
type Collection = BTreeMap<String, Document>;

fn id_key(id: &Value) -> String {
    id.to_string()
}

/// In-memory document store, optionally backed by a JSON dump file.
pub struct InMemoryStore {
    collections: RwLock<BTreeMap<String, Collection>>,
    dump: Option<DumpManager>,
    dirty: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(BTreeMap::new()),
            dump: None,
            dirty: AtomicBool::new(false),
        }
    }

    /// Load a dump file. This is the connect step of the repair run.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let manager = DumpManager::new(path);
        if !manager.exists() {
            return Err(PurgeError::Connection(format!(
                "dump '{}' does not exist",
                manager.path().display()
            )));
        }
        let dump = manager.load().map_err(|e| PurgeError::Connection(e.to_string()))?;

        let mut collections = BTreeMap::new();
        for (name, docs) in dump.collections {
            let collection = Self::index_documents(&name, docs)?;
            collections.insert(name, collection);
        }
        info!(
            path = %manager.path().display(),
            collections = collections.len(),
            "dump loaded"
        );

        Ok(Self {
            collections: RwLock::new(collections),
            dump: Some(manager),
            dirty: AtomicBool::new(false),
        })
    }

    fn index_documents(name: &str, docs: Vec<Document>) -> Result<Collection> {
        let mut collection = Collection::new();
        for doc in docs {
            let id = doc.get(ID_FIELD).ok_or_else(|| {
                PurgeError::Format(format!("document without _id in collection '{}'", name))
            })?;
            collection.insert(id_key(id), doc);
        }
        Ok(collection)
    }

    /// Redirect later flushes to another file.
    pub fn persist_to<P: AsRef<Path>>(&mut self, path: P) {
        self.dump = Some(DumpManager::new(path));
        self.dirty.store(true, Ordering::SeqCst);
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    pub async fn create_collection(&self, name: &str) {
        let mut collections = self.collections.write().await;
        collections.entry(name.to_string()).or_default();
    }

    /// Insert or overwrite a document.
    pub async fn insert_document(&self, collection: &str, doc: Document) -> Result<()> {
        let id = doc
            .get(ID_FIELD)
            .ok_or_else(|| PurgeError::write(collection, "<none>", "document has no _id"))?;
        let key = id_key(id);

        let mut collections = self.collections.write().await;
        collections
            .entry(collection.to_string())
            .or_default()
            .insert(key, doc);
        self.dirty.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// All documents of a collection, in `_id` order.
    pub async fn documents(&self, collection: &str) -> Vec<Document> {
        let collections = self.collections.read().await;
        collections
            .get(collection)
            .map(|c| c.values().cloned().collect())
            .unwrap_or_default()
    }

    async fn to_dump(&self) -> DumpFile {
        let collections = self.collections.read().await;
        let snapshot = collections
            .iter()
            .map(|(name, docs)| (name.clone(), docs.values().cloned().collect()))
            .collect();
        DumpFile::new(snapshot)
    }

    /// Write pending changes back to the dump file, if there is one.
    pub async fn flush(&self) -> Result<bool> {
        let Some(manager) = &self.dump else {
            return Ok(false);
        };
        if !self.is_dirty() {
            return Ok(false);
        }
        let dump = self.to_dump().await;
        manager.save(&dump, true)?;
        self.dirty.store(false, Ordering::SeqCst);
        debug!(path = %manager.path().display(), "dump flushed");
        Ok(true)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TxnStore for InMemoryStore {
    async fn collection_names(&self) -> Result<Vec<String>> {
        let collections = self.collections.read().await;
        Ok(collections.keys().cloned().collect())
    }

    async fn scan<'a>(&'a self, collection: &'a str) -> Result<DocumentStream<'a>> {
        // Copy out so the lock is not held while the caller writes back.
        let docs = self.documents(collection).await;
        Ok(stream::iter(docs.into_iter().map(Ok)).boxed())
    }

    async fn find_by_id(&self, collection: &str, id: &Value) -> Result<Option<Document>> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .and_then(|c| c.get(&id_key(id)))
            .cloned())
    }

    async fn replace_queue(
        &self,
        collection: &str,
        id: &Value,
        field: &str,
        expected: &[String],
        queue: Vec<String>,
    ) -> Result<()> {
        let mut collections = self.collections.write().await;
        let docs = collections
            .get_mut(collection)
            .ok_or_else(|| PurgeError::write(collection, display_id(id), "collection not found"))?;
        let doc = docs
            .get_mut(&id_key(id))
            .ok_or_else(|| PurgeError::write(collection, display_id(id), "document not found"))?;

        match QueueField::read(doc, field) {
            QueueField::Tokens(current) if current == expected => {}
            _ => {
                return Err(PurgeError::QueueChanged {
                    collection: collection.to_string(),
                    id: display_id(id),
                });
            }
        }

        doc.insert(
            field.to_string(),
            Value::Array(queue.into_iter().map(Value::String).collect()),
        );
        self.dirty.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn prune_transactions(&self, layout: &TxnLayout) -> Result<PruneStats> {
        let mut collections = self.collections.write().await;

        let mut referenced: HashSet<TxnId> = HashSet::new();
        for (name, docs) in collections.iter() {
            if *name == layout.log_collection {
                continue;
            }
            for doc in docs.values() {
                collect_references(doc, &layout.queue_field, &mut referenced);
            }
        }

        let Some(log) = collections.get_mut(&layout.log_collection) else {
            return Ok(PruneStats::default());
        };

        let examined = log.len();
        log.retain(|_, record| !is_prunable(record, &referenced));
        let deleted = examined - log.len();
        if deleted > 0 {
            self.dirty.store(true, Ordering::SeqCst);
        }

        Ok(PruneStats { examined, deleted })
    }

    async fn compact(&self) -> Result<()> {
        let Some(manager) = &self.dump else {
            debug!("no dump file attached, nothing to compact");
            return Ok(());
        };
        let dump = self.to_dump().await;
        manager.save(&dump, false)?;
        self.dirty.store(false, Ordering::SeqCst);
        Ok(())
    }
}
