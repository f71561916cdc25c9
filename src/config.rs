use crate::core::{PurgeError, Result, TxnLayout};
use crate::repair::SingletonPolicy;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const ENV_PREFIX: &str = "TXNPURGE_";

/// Which optional stages run. The three mandatory stages always run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageSelection {
    pub machine_fix: bool,
    pub prune: bool,
    pub compact: bool,
}

impl Default for StageSelection {
    fn default() -> Self {
        Self {
            machine_fix: true,
            prune: true,
            compact: true,
        }
    }
}

impl StageSelection {
    pub fn mandatory_only() -> Self {
        Self {
            machine_fix: false,
            prune: false,
            compact: false,
        }
    }
}

/// Repair run configuration
///
/// Loaded from built-in defaults, an optional TOML file and `TXNPURGE_*`
/// environment variables, in that order; the CLI applies flags on top.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PurgeConfig {
    pub layout: TxnLayout,

    /// Collection holding machine documents
    pub machines_collection: String,

    pub singleton: SingletonPolicy,

    pub stages: StageSelection,
}

impl Default for PurgeConfig {
    fn default() -> Self {
        Self {
            layout: TxnLayout::default(),
            machines_collection: "machines".to_string(),
            singleton: SingletonPolicy::default(),
            stages: StageSelection::default(),
        }
    }
}

impl PurgeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load layered configuration. A missing file is an error; no file means defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(PurgeConfig::default()));
        if let Some(path) = path {
            if !path.exists() {
                return Err(PurgeError::Config(format!(
                    "config file '{}' not found",
                    path.display()
                )));
            }
            figment = figment.merge(Toml::file(path));
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: PurgeConfig = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Set the transaction log collection
    pub fn log_collection(mut self, name: &str) -> Self {
        self.layout.log_collection = name.to_string();
        self
    }

    /// Set the queue field name
    pub fn queue_field(mut self, field: &str) -> Self {
        self.layout.queue_field = field.to_string();
        self
    }

    pub fn machines_collection(mut self, name: &str) -> Self {
        self.machines_collection = name.to_string();
        self
    }

    pub fn singleton(mut self, policy: SingletonPolicy) -> Self {
        self.singleton = policy;
        self
    }

    /// Set the singleton queue bound
    pub fn max_singleton_queue(mut self, max: usize) -> Self {
        self.singleton.max_queue_len = max;
        self
    }

    pub fn stages(mut self, stages: StageSelection) -> Self {
        self.stages = stages;
        self
    }

    pub fn skip_machine_fix(mut self) -> Self {
        self.stages.machine_fix = false;
        self
    }

    pub fn skip_prune(mut self) -> Self {
        self.stages.prune = false;
        self
    }

    pub fn skip_compact(mut self) -> Self {
        self.stages.compact = false;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(PurgeError::Config(msg.to_string()));

        if self.layout.log_collection.is_empty() {
            return invalid("layout.log_collection cannot be empty");
        }
        if self.layout.queue_field.is_empty() {
            return invalid("layout.queue_field cannot be empty");
        }
        if self.machines_collection.is_empty() {
            return invalid("machines_collection cannot be empty");
        }
        if self.singleton.collection.is_empty() || self.singleton.id.is_empty() {
            return invalid("singleton collection and id must be set");
        }
        if self.singleton.max_queue_len == 0 {
            return invalid("singleton.max_queue_len must be > 0");
        }
        if self.machines_collection == self.layout.log_collection
            || self.singleton.collection == self.layout.log_collection
        {
            return invalid("repair targets cannot be the transaction log itself");
        }
        Ok(())
    }
}
