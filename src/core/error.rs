use thiserror::Error;

#[derive(Error, Debug)]
pub enum PurgeError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("Read error in collection '{collection}': {reason}")]
    Read { collection: String, reason: String },

    #[error("Write error on {collection}/{id}: {reason}")]
    Write {
        collection: String,
        id: String,
        reason: String,
    },

    #[error("Queue of {collection}/{id} changed since it was read")]
    QueueChanged { collection: String, id: String },

    #[error("External operation '{operation}' failed: {reason}")]
    External { operation: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Dump format error: {0}")]
    Format(String),
}

pub type Result<T> = std::result::Result<T, PurgeError>;

impl PurgeError {
    pub fn read(collection: &str, reason: impl ToString) -> Self {
        Self::Read {
            collection: collection.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn write(collection: &str, id: impl ToString, reason: impl ToString) -> Self {
        Self::Write {
            collection: collection.to_string(),
            id: id.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn external(operation: &str, reason: impl ToString) -> Self {
        Self::External {
            operation: operation.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Write-class failures leave the store partially repaired but always safe to re-scan.
    pub fn is_write_failure(&self) -> bool {
        matches!(self, Self::Write { .. } | Self::QueueChanged { .. })
    }
}

impl From<std::io::Error> for PurgeError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for PurgeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Format(err.to_string())
    }
}

impl From<figment::Error> for PurgeError {
    fn from(err: figment::Error) -> Self {
        Self::Config(err.to_string())
    }
}
