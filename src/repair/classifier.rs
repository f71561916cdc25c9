use crate::core::{PurgeError, Result, TxnLayout};
use crate::storage::TxnStore;

const SYSTEM_PREFIX: &str = "system.";

/// Collection names as listed once at the start of a run.
///
/// Never re-queried: collections created afterwards are not considered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogSnapshot {
    names: Vec<String>,
}

impl CatalogSnapshot {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    pub async fn capture<S: TxnStore + ?Sized>(store: &S) -> Result<Self> {
        let names = store
            .collection_names()
            .await
            .map_err(|e| PurgeError::Catalog(e.to_string()))?;
        Ok(Self { names })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

pub fn is_purgeable(name: &str, layout: &TxnLayout) -> bool {
    if name == layout.log_collection {
        return false;
    }
    if name.starts_with(&layout.derived_prefix()) {
        return false;
    }
    !name.starts_with(SYSTEM_PREFIX)
}

/// Collections eligible for the generic orphan purge, in catalog order.
pub fn purgeable_collections(catalog: &CatalogSnapshot, layout: &TxnLayout) -> Vec<String> {
    catalog
        .names()
        .iter()
        .filter(|name| is_purgeable(name, layout))
        .cloned()
        .collect()
}
