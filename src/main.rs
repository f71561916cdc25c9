mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Args, Backend};
use std::io;
use std::path::Path;
use std::process::ExitCode;
use tracing::{error, info};
use txnpurge::{InMemoryStore, MongoStore, Pipeline, PurgeConfig, RunReport, TxnStore};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(args.log_level())),
        )
        .with_writer(io::stderr)
        .init();

    let backend = match args.backend() {
        Ok(backend) => backend,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::from(2);
        }
    };
    let config = match args.load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: invalid configuration: {}", e);
            return ExitCode::from(2);
        }
    };

    if !args.yes {
        match cli::confirm(&mut io::stdin().lock(), &mut io::stdout()) {
            Ok(true) => {}
            Ok(false) => {
                info!("not confirmed, nothing changed");
                return ExitCode::SUCCESS;
            }
            Err(e) => {
                eprintln!("error: reading confirmation: {}", e);
                return ExitCode::FAILURE;
            }
        }
    }

    match run(backend, &config).await {
        Ok(report) => {
            println!("{}", report);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(backend: Backend, config: &PurgeConfig) -> Result<RunReport> {
    match backend {
        Backend::Dump { path, output } => repair_dump(&path, output.as_deref(), config).await,
        Backend::Mongo(target) => {
            let store = MongoStore::connect(&target)
                .await
                .with_context(|| format!("failed to connect to {}", target.address()))?;
            repair(&store, config).await
        }
    }
}

async fn repair_dump(
    path: &Path,
    output: Option<&Path>,
    config: &PurgeConfig,
) -> Result<RunReport> {
    let mut store = InMemoryStore::open(path)
        .with_context(|| format!("failed to open dump {}", path.display()))?;
    if let Some(output) = output {
        store.persist_to(output);
    }

    let outcome = repair(&store, config).await;

    // Completed stages stay applied even when a later one fails.
    store.flush().await.context("failed to write repaired dump")?;
    outcome
}

async fn repair<S: TxnStore + ?Sized>(store: &S, config: &PurgeConfig) -> Result<RunReport> {
    Pipeline::new(store, config).run().await.map_err(|e| {
        error!(
            phase = %e.phase,
            completed = ?e.completed,
            cause = %e.source,
            "repair stopped"
        );
        anyhow::Error::new(e).context("repair did not complete")
    })
}
