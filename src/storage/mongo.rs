//! Live MongoDB backend.
//!
//! Documents cross the seam as relaxed extended JSON, so an `ObjectId` `_id`
//! reads as `{"$oid": "..."}` and converts back to the same BSON value.

use super::engine::{DocumentStream, PruneStats, TxnStore, collect_references, is_prunable};
use crate::core::{Document, ID_FIELD, PurgeError, Result, TxnLayout, display_id};
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use mongodb::bson::{self, Bson, doc};
use mongodb::options::{ClientOptions, Credential, ServerAddress, Tls, TlsOptions};
use mongodb::{Client, Collection, Database};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, info};

pub const DEFAULT_HOSTNAME: &str = "localhost";
pub const DEFAULT_PORT: u16 = 37017;
pub const DEFAULT_DATABASE: &str = "juju";

/// Database users authenticate against this database.
const AUTH_SOURCE: &str = "admin";

/// Log records deleted per `delete_many` call.
const PRUNE_BATCH: usize = 1000;

const SYSTEM_PREFIX: &str = "system.";

/// Where and how to reach the database.
#[derive(Clone, PartialEq, Eq)]
pub struct MongoTarget {
    pub hostname: String,
    pub port: u16,
    /// TLS without certificate verification
    pub ssl: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: String,
}

impl Default for MongoTarget {
    fn default() -> Self {
        Self {
            hostname: DEFAULT_HOSTNAME.to_string(),
            port: DEFAULT_PORT,
            ssl: true,
            username: None,
            password: None,
            database: DEFAULT_DATABASE.to_string(),
        }
    }
}

impl fmt::Debug for MongoTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MongoTarget")
            .field("hostname", &self.hostname)
            .field("port", &self.port)
            .field("ssl", &self.ssl)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("database", &self.database)
            .finish()
    }
}

impl MongoTarget {
    pub fn new(hostname: &str, port: u16) -> Self {
        Self {
            hostname: hostname.to_string(),
            port,
            ..Self::default()
        }
    }

    pub fn ssl(mut self, ssl: bool) -> Self {
        self.ssl = ssl;
        self
    }

    /// Set the credential pair. An empty username disables authentication.
    pub fn credentials(mut self, username: &str, password: Option<&str>) -> Self {
        self.username = (!username.is_empty()).then(|| username.to_string());
        self.password = password.filter(|p| !p.is_empty()).map(str::to_string);
        self
    }

    pub fn database(mut self, name: &str) -> Self {
        self.database = name.to_string();
        self
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }

    pub fn validate(&self) -> Result<()> {
        if self.hostname.is_empty() {
            return Err(PurgeError::Config("hostname cannot be empty".to_string()));
        }
        if self.database.is_empty() {
            return Err(PurgeError::Config("database cannot be empty".to_string()));
        }
        if self.username.is_some() && self.password.is_none() {
            return Err(PurgeError::Config(
                "--password must be used if a username is provided".to_string(),
            ));
        }
        Ok(())
    }

    pub fn client_options(&self) -> Result<ClientOptions> {
        self.validate()?;

        let mut options = ClientOptions::default();
        options.hosts = vec![ServerAddress::Tcp {
            host: self.hostname.clone(),
            port: Some(self.port),
        }];
        options.direct_connection = Some(true);
        options.app_name = Some("txnpurge".to_string());

        if let Some(username) = &self.username {
            let mut credential = Credential::default();
            credential.username = Some(username.clone());
            credential.password = self.password.clone();
            credential.source = Some(AUTH_SOURCE.to_string());
            options.credential = Some(credential);
        }
        if self.ssl {
            options.tls = Some(Tls::Enabled(
                TlsOptions::builder().allow_invalid_certificates(true).build(),
            ));
        }
        Ok(options)
    }
}

/// Converts a stored BSON document to the JSON form the repair stages read.
pub fn to_document(doc: bson::Document) -> Document {
    match Bson::Document(doc).into_relaxed_extjson() {
        Value::Object(map) => map,
        _ => Document::new(),
    }
}

/// Converts a JSON value (extended JSON allowed) back to BSON.
pub fn to_bson(value: &Value) -> Result<Bson> {
    Bson::try_from(value.clone())
        .map_err(|e| PurgeError::Format(format!("cannot convert {} to BSON: {}", value, e)))
}

fn queue_bson(tokens: &[String]) -> Bson {
    Bson::Array(tokens.iter().cloned().map(Bson::String).collect())
}

fn id_filter(id: Bson) -> bson::Document {
    let mut filter = bson::Document::new();
    filter.insert(ID_FIELD, id);
    filter
}

/// A [`TxnStore`] over a live MongoDB database.
pub struct MongoStore {
    db: Database,
}

impl MongoStore {
    /// Connect and check the server answers before any stage runs.
    pub async fn connect(target: &MongoTarget) -> Result<Self> {
        let options = target.client_options()?;
        let client =
            Client::with_options(options).map_err(|e| PurgeError::Connection(e.to_string()))?;

        client
            .database(AUTH_SOURCE)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| PurgeError::Connection(format!("{}: {}", target.address(), e)))?;

        info!(
            address = %target.address(),
            database = %target.database,
            ssl = target.ssl,
            authenticated = target.username.is_some(),
            "connected"
        );
        Ok(Self {
            db: client.database(&target.database),
        })
    }

    fn collection(&self, name: &str) -> Collection<bson::Document> {
        self.db.collection(name)
    }

    async fn user_collections(&self) -> Result<Vec<String>> {
        let names = self.collection_names().await?;
        Ok(names
            .into_iter()
            .filter(|n| !n.starts_with(SYSTEM_PREFIX))
            .collect())
    }
}

#[async_trait]
impl TxnStore for MongoStore {
    async fn collection_names(&self) -> Result<Vec<String>> {
        let mut names = self
            .db
            .list_collection_names()
            .await
            .map_err(|e| PurgeError::Catalog(e.to_string()))?;
        names.sort();
        Ok(names)
    }

    async fn scan<'a>(&'a self, collection: &'a str) -> Result<DocumentStream<'a>> {
        let cursor = self
            .collection(collection)
            .find(doc! {})
            .await
            .map_err(|e| PurgeError::read(collection, e))?;
        Ok(cursor
            .map(move |item| {
                item.map(to_document)
                    .map_err(|e| PurgeError::read(collection, e))
            })
            .boxed())
    }

    async fn find_by_id(&self, collection: &str, id: &Value) -> Result<Option<Document>> {
        let found = self
            .collection(collection)
            .find_one(id_filter(to_bson(id)?))
            .await
            .map_err(|e| PurgeError::read(collection, e))?;
        Ok(found.map(to_document))
    }

    async fn replace_queue(
        &self,
        collection: &str,
        id: &Value,
        field: &str,
        expected: &[String],
        queue: Vec<String>,
    ) -> Result<()> {
        let mut filter = id_filter(to_bson(id)?);
        filter.insert(field, queue_bson(expected));

        let mut set = bson::Document::new();
        set.insert(field, queue_bson(&queue));

        let result = self
            .collection(collection)
            .update_one(filter, doc! { "$set": set })
            .await
            .map_err(|e| PurgeError::write(collection, display_id(id), e))?;

        if result.matched_count == 0 {
            return Err(PurgeError::QueueChanged {
                collection: collection.to_string(),
                id: display_id(id),
            });
        }
        Ok(())
    }

    async fn prune_transactions(&self, layout: &TxnLayout) -> Result<PruneStats> {
        let log = &layout.log_collection;

        let mut referenced = HashSet::new();
        for name in self.user_collections().await? {
            if name == *log {
                continue;
            }
            let mut docs = self.scan(&name).await?;
            while let Some(doc) = docs.try_next().await? {
                collect_references(&doc, &layout.queue_field, &mut referenced);
            }
        }

        let mut examined = 0usize;
        let mut doomed = Vec::new();
        let mut records = self.scan(log).await?;
        while let Some(record) = records.try_next().await? {
            examined += 1;
            if !is_prunable(&record, &referenced) {
                continue;
            }
            if let Some(id) = record.get(ID_FIELD) {
                doomed.push(to_bson(id)?);
            }
        }
        drop(records);

        let mut deleted = 0usize;
        for batch in doomed.chunks(PRUNE_BATCH) {
            let result = self
                .collection(log)
                .delete_many(id_filter(Bson::Document(doc! { "$in": batch.to_vec() })))
                .await
                .map_err(|e| PurgeError::external("prune", e))?;
            deleted += result.deleted_count as usize;
            debug!(batch = batch.len(), deleted, "pruned transaction batch");
        }

        Ok(PruneStats { examined, deleted })
    }

    async fn compact(&self) -> Result<()> {
        for name in self.user_collections().await? {
            self.db
                .run_command(doc! { "compact": name.as_str() })
                .await
                .map_err(|e| PurgeError::external("compact", format!("{}: {}", name, e)))?;
            debug!(collection = %name, "compacted");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::oid::ObjectId;
    use serde_json::json;

    #[test]
    fn test_username_requires_password() {
        let target = MongoTarget::default().credentials("admin", None);
        assert!(matches!(target.validate(), Err(PurgeError::Config(_))));

        let target = MongoTarget::default().credentials("admin", Some(""));
        assert!(target.validate().is_err());

        let target = MongoTarget::default().credentials("", None);
        assert!(target.validate().is_ok());
        assert!(target.username.is_none());
    }

    #[test]
    fn test_client_options() {
        let target = MongoTarget::new("db.example", 27017).credentials("admin", Some("secret"));
        let options = target.client_options().unwrap();

        assert_eq!(
            options.hosts,
            vec![ServerAddress::Tcp {
                host: "db.example".to_string(),
                port: Some(27017),
            }]
        );
        let credential = options.credential.unwrap();
        assert_eq!(credential.username.as_deref(), Some("admin"));
        assert_eq!(credential.source.as_deref(), Some("admin"));
        assert!(matches!(
            options.tls,
            Some(Tls::Enabled(ref tls)) if tls.allow_invalid_certificates == Some(true)
        ));
    }

    #[test]
    fn test_plain_connection_without_auth() {
        let options = MongoTarget::default().ssl(false).client_options().unwrap();
        assert!(options.credential.is_none());
        assert!(options.tls.is_none());
        assert_eq!(MongoTarget::default().address(), "localhost:37017");
    }

    #[test]
    fn test_debug_hides_password() {
        let target = MongoTarget::default().credentials("admin", Some("hunter2"));
        assert!(!format!("{:?}", target).contains("hunter2"));
    }

    #[test]
    fn test_object_id_crosses_the_seam() {
        let oid = ObjectId::parse_str("5a1f00000000000000000001").unwrap();
        let stored = doc! { "_id": oid, "s": 6, "txn-queue": ["5a1f00000000000000000001_ab"] };

        let document = to_document(stored);
        assert_eq!(document["_id"], json!({"$oid": "5a1f00000000000000000001"}));
        assert_eq!(document["s"], json!(6));
        assert_eq!(to_bson(&document["_id"]).unwrap(), Bson::ObjectId(oid));
    }

    #[test]
    fn test_document_keys_keep_their_order() {
        let stored = doc! { "_id": { "c": "units", "id": "u/0" }, "zeta": 1, "alpha": 2 };
        let document = to_document(stored);

        let keys: Vec<&str> = document.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["_id", "zeta", "alpha"]);
        assert_eq!(
            to_bson(&document["_id"]).unwrap(),
            Bson::Document(doc! { "c": "units", "id": "u/0" })
        );
    }
}
