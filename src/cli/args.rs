use clap::{ArgAction, Parser};
use std::path::PathBuf;
use txnpurge::storage::mongo::{DEFAULT_HOSTNAME, DEFAULT_PORT};
use txnpurge::{MongoTarget, PurgeConfig};

const MONGO_FLAGS: [&str; 5] = ["hostname", "port", "ssl", "username", "password"];

#[derive(Parser, Debug)]
#[command(name = "txnpurge", version)]
#[command(about = "Repair transaction queues in a MongoDB database or a dump of one")]
pub struct Args {
    /// Repair this dump file instead of a live database
    #[arg(long, value_name = "PATH", conflicts_with_all = MONGO_FLAGS)]
    pub dump: Option<PathBuf>,

    /// Write the repaired dump here instead of back to --dump
    #[arg(long, value_name = "PATH", requires = "dump")]
    pub output: Option<PathBuf>,

    /// Database host
    #[arg(long, default_value = DEFAULT_HOSTNAME)]
    pub hostname: String,

    /// Database port
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Use TLS without verifying the server certificate
    #[arg(long, action = ArgAction::Set, default_value_t = true)]
    pub ssl: bool,

    /// User to authenticate as; empty disables authentication
    #[arg(long, default_value = "admin")]
    pub username: String,

    /// Password for --username
    #[arg(long)]
    pub password: Option<String>,

    /// TOML configuration file
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Skip the confirmation prompt
    #[arg(short = 'y', long)]
    pub yes: bool,

    /// Don't remove completed transactions from machine queues
    #[arg(long)]
    pub no_machines: bool,

    /// Don't prune the transaction log
    #[arg(long)]
    pub no_prune: bool,

    /// Don't compact storage
    #[arg(long)]
    pub no_compact: bool,

    /// Upper bound on the singleton document's queue length
    #[arg(long, value_name = "N")]
    pub max_singleton_queue: Option<usize>,

    #[arg(short, long, conflicts_with = "quiet")]
    pub verbose: bool,

    #[arg(short, long)]
    pub quiet: bool,
}

/// Where the repair runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    Dump {
        path: PathBuf,
        output: Option<PathBuf>,
    },
    Mongo(MongoTarget),
}

impl Args {
    /// Default filter directive when `RUST_LOG` is not set.
    pub fn log_level(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else if self.quiet {
            "warn"
        } else {
            "info"
        }
    }

    /// The selected backend, rejected when its flags are unusable.
    pub fn backend(&self) -> txnpurge::Result<Backend> {
        if let Some(path) = &self.dump {
            return Ok(Backend::Dump {
                path: path.clone(),
                output: self.output.clone(),
            });
        }

        let target = MongoTarget::new(&self.hostname, self.port)
            .ssl(self.ssl)
            .credentials(&self.username, self.password.as_deref());
        target.validate()?;
        Ok(Backend::Mongo(target))
    }

    /// Layered configuration with command line flags applied last.
    pub fn load_config(&self) -> txnpurge::Result<PurgeConfig> {
        let mut config = PurgeConfig::load(self.config.as_deref())?;
        if self.no_machines {
            config = config.skip_machine_fix();
        }
        if self.no_prune {
            config = config.skip_prune();
        }
        if self.no_compact {
            config = config.skip_compact();
        }
        if let Some(max) = self.max_singleton_queue {
            config = config.max_singleton_queue(max);
        }
        config.validate()?;
        Ok(config)
    }
}
