use super::stage::{Phase, PipelineState, Stage};
use crate::config::PurgeConfig;
use crate::core::PurgeError;
use crate::repair::{
    CatalogSnapshot, KnownTxns, MachineFixStats, OrphanPurger, PurgeStats, SingletonOutcome,
    fix_machine_queues, purgeable_collections, repair_singleton,
};
use crate::storage::{PruneStats, TxnStore};
use chrono::{DateTime, Utc};
use std::fmt;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{Instrument, error, info, info_span};

/// What a completed stage did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Singleton(SingletonOutcome),
    Classified {
        purgeable: Vec<String>,
        excluded: usize,
    },
    Purged(PurgeStats),
    MachinesFixed(MachineFixStats),
    Pruned(PruneStats),
    Compacted,
}

#[derive(Debug, Clone)]
pub struct StageRecord {
    pub stage: Stage,
    pub outcome: StageOutcome,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub catalog_size: usize,
    pub known_transactions: usize,
    pub executed: Vec<StageRecord>,
    pub skipped: Vec<Stage>,
}

impl RunReport {
    fn new(started_at: DateTime<Utc>, catalog_size: usize, known_transactions: usize) -> Self {
        Self {
            started_at,
            finished_at: None,
            catalog_size,
            known_transactions,
            executed: Vec::new(),
            skipped: Vec::new(),
        }
    }

    pub fn executed_stages(&self) -> Vec<Stage> {
        self.executed.iter().map(|r| r.stage).collect()
    }

    pub fn outcome(&self, stage: Stage) -> Option<&StageOutcome> {
        self.executed
            .iter()
            .find(|r| r.stage == stage)
            .map(|r| &r.outcome)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Repair Summary")?;
        writeln!(f, "{}", "=".repeat(60))?;
        writeln!(f, "Collections in catalog: {}", self.catalog_size)?;
        writeln!(f, "Known transactions:     {}", self.known_transactions)?;
        for record in &self.executed {
            let detail = match &record.outcome {
                StageOutcome::Singleton(SingletonOutcome::NotFound) => {
                    "document not found".to_string()
                }
                StageOutcome::Singleton(SingletonOutcome::Unreadable) => {
                    "queue unreadable, untouched".to_string()
                }
                StageOutcome::Singleton(SingletonOutcome::Clean { queue_len }) => {
                    format!("clean ({} entries)", queue_len)
                }
                StageOutcome::Singleton(SingletonOutcome::Repaired {
                    before,
                    after,
                    truncated,
                }) => {
                    format!(
                        "{} -> {} entries{}",
                        before,
                        after,
                        if *truncated { " (truncated)" } else { "" }
                    )
                }
                StageOutcome::Classified { purgeable, excluded } => {
                    format!("{} purgeable, {} excluded", purgeable.len(), excluded)
                }
                StageOutcome::Purged(stats) => format!(
                    "{} collections, {} documents updated, {} entries removed",
                    stats.collections, stats.documents_updated, stats.entries_removed
                ),
                StageOutcome::MachinesFixed(stats) => format!(
                    "{} machines updated, {} entries removed",
                    stats.documents_updated, stats.entries_removed
                ),
                StageOutcome::Pruned(stats) => {
                    format!("{} of {} records deleted", stats.deleted, stats.examined)
                }
                StageOutcome::Compacted => "done".to_string(),
            };
            writeln!(
                f,
                "  {:<20} {} [{} ms]",
                record.stage.name(),
                detail,
                record.elapsed.as_millis()
            )?;
        }
        for stage in &self.skipped {
            writeln!(f, "  {:<20} skipped", stage.name())?;
        }
        Ok(())
    }
}

/// A failed run: where it stopped, why, and what had already been applied.
#[derive(Debug, Error)]
#[error("{phase} failed")]
pub struct PipelineError {
    pub phase: Phase,
    #[source]
    pub source: PurgeError,
    pub completed: Vec<Stage>,
}

struct RunContext {
    catalog: CatalogSnapshot,
    known: KnownTxns,
    purgeable: Option<Vec<String>>,
}

fn external_failure(operation: &str, err: PurgeError) -> PurgeError {
    match err {
        PurgeError::External { .. } => err,
        other => PurgeError::external(operation, other),
    }
}

/// Runs the repair stages in order, stopping at the first failure.
///
/// Nothing is retried: every stage is idempotent, so the recovery path for a
/// failed run is to run again from the start once the cause is fixed.
pub struct Pipeline<'a, S: TxnStore + ?Sized> {
    store: &'a S,
    config: &'a PurgeConfig,
    state: PipelineState,
}

impl<'a, S: TxnStore + ?Sized> Pipeline<'a, S> {
    pub fn new(store: &'a S, config: &'a PurgeConfig) -> Self {
        Self {
            store,
            config,
            state: PipelineState::Running(Stage::FIRST),
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub async fn run(&mut self) -> Result<RunReport, PipelineError> {
        let started_at = Utc::now();
        self.state = PipelineState::Running(Stage::FIRST);

        let mut ctx = match self.preflight().await {
            Ok(ctx) => ctx,
            Err(source) => {
                error!(error = %source, "preflight failed, nothing was changed");
                self.state = PipelineState::Failed(Phase::Preflight);
                return Err(PipelineError {
                    phase: Phase::Preflight,
                    source,
                    completed: Vec::new(),
                });
            }
        };
        let mut report = RunReport::new(started_at, ctx.catalog.len(), ctx.known.len());

        while let PipelineState::Running(stage) = self.state {
            if !stage.is_selected(&self.config.stages) {
                info!(stage = %stage, "stage skipped");
                report.skipped.push(stage);
                self.state = PipelineState::after(stage);
                continue;
            }

            info!(stage = %stage, "stage started");
            let timer = Instant::now();
            let span = info_span!("stage", name = stage.name());
            match self.execute(stage, &mut ctx).instrument(span).await {
                Ok(outcome) => {
                    let elapsed = timer.elapsed();
                    info!(
                        stage = %stage,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "stage completed"
                    );
                    report.executed.push(StageRecord {
                        stage,
                        outcome,
                        elapsed,
                    });
                    self.state = PipelineState::after(stage);
                }
                Err(source) => {
                    error!(stage = %stage, error = %source, "stage failed, stopping");
                    self.state = PipelineState::Failed(Phase::Stage(stage));
                    return Err(PipelineError {
                        phase: Phase::Stage(stage),
                        source,
                        completed: report.executed_stages(),
                    });
                }
            }
        }

        report.finished_at = Some(Utc::now());
        Ok(report)
    }

    async fn preflight(&self) -> Result<RunContext, PurgeError> {
        self.config.validate()?;

        let catalog = CatalogSnapshot::capture(self.store).await?;
        info!(collections = catalog.len(), "catalog snapshot taken");

        let known = KnownTxns::build(self.store, &self.config.layout).await?;

        Ok(RunContext {
            catalog,
            known,
            purgeable: None,
        })
    }

    async fn execute(
        &self,
        stage: Stage,
        ctx: &mut RunContext,
    ) -> Result<StageOutcome, PurgeError> {
        let layout = &self.config.layout;

        match stage {
            Stage::RepairSingleton => {
                repair_singleton(self.store, layout, &ctx.known, &self.config.singleton)
                    .await
                    .map(StageOutcome::Singleton)
            }
            Stage::ClassifyCollections => {
                let purgeable = purgeable_collections(&ctx.catalog, layout);
                let excluded = ctx.catalog.len() - purgeable.len();
                info!(purgeable = purgeable.len(), excluded, "collections classified");
                ctx.purgeable = Some(purgeable.clone());
                Ok(StageOutcome::Classified {
                    purgeable,
                    excluded,
                })
            }
            Stage::PurgeOrphans => {
                let collections = match &ctx.purgeable {
                    Some(collections) => collections.clone(),
                    None => purgeable_collections(&ctx.catalog, layout),
                };
                info!(collections = collections.len(), "purging orphaned transaction references");
                OrphanPurger::new(self.store, layout, &ctx.known)
                    .purge(&collections)
                    .await
                    .map(StageOutcome::Purged)
            }
            Stage::FixMachineQueues => {
                fix_machine_queues(self.store, layout, &ctx.known, &self.config.machines_collection)
                    .await
                    .map(StageOutcome::MachinesFixed)
            }
            Stage::PruneTransactionLog => {
                let stats = self
                    .store
                    .prune_transactions(layout)
                    .await
                    .map_err(|e| external_failure("prune", e))?;
                info!(examined = stats.examined, deleted = stats.deleted, "transaction log pruned");
                Ok(StageOutcome::Pruned(stats))
            }
            Stage::CompactStorage => {
                self.store
                    .compact()
                    .await
                    .map_err(|e| external_failure("compact", e))?;
                Ok(StageOutcome::Compacted)
            }
        }
    }
}
