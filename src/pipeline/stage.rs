// ============================================================================
// Pipeline Stages
// ============================================================================
//
// State transitions:
//
//   RepairSingleton ──> ClassifyCollections ──> PurgeOrphans ──> FixMachineQueues
//        ──> PruneTransactionLog ──> CompactStorage ──> Done
//
//   any stage ──error──> Failed
//
// Optional stages that are not selected are passed through, never reordered.
//
// ============================================================================

use crate::config::StageSelection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    RepairSingleton,
    ClassifyCollections,
    PurgeOrphans,
    FixMachineQueues,
    PruneTransactionLog,
    CompactStorage,
}

impl Stage {
    pub const FIRST: Stage = Stage::RepairSingleton;

    pub const ALL: [Stage; 6] = [
        Stage::RepairSingleton,
        Stage::ClassifyCollections,
        Stage::PurgeOrphans,
        Stage::FixMachineQueues,
        Stage::PruneTransactionLog,
        Stage::CompactStorage,
    ];

    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::RepairSingleton => Some(Stage::ClassifyCollections),
            Stage::ClassifyCollections => Some(Stage::PurgeOrphans),
            Stage::PurgeOrphans => Some(Stage::FixMachineQueues),
            Stage::FixMachineQueues => Some(Stage::PruneTransactionLog),
            Stage::PruneTransactionLog => Some(Stage::CompactStorage),
            Stage::CompactStorage => None,
        }
    }

    pub fn is_optional(self) -> bool {
        matches!(
            self,
            Stage::FixMachineQueues | Stage::PruneTransactionLog | Stage::CompactStorage
        )
    }

    pub fn is_selected(self, selection: &StageSelection) -> bool {
        match self {
            Stage::FixMachineQueues => selection.machine_fix,
            Stage::PruneTransactionLog => selection.prune,
            Stage::CompactStorage => selection.compact,
            _ => true,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Stage::RepairSingleton => "RepairSingleton",
            Stage::ClassifyCollections => "ClassifyCollections",
            Stage::PurgeOrphans => "PurgeOrphans",
            Stage::FixMachineQueues => "FixMachineQueues",
            Stage::PruneTransactionLog => "PruneTransactionLog",
            Stage::CompactStorage => "CompactStorage",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Where a run stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Running(Stage),
    Done,
    Failed(Phase),
}

impl PipelineState {
    pub fn after(stage: Stage) -> Self {
        match stage.next() {
            Some(next) => PipelineState::Running(next),
            None => PipelineState::Done,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed(_))
    }
}

/// Part of a run a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Catalog snapshot and known-transaction index, before any mutation
    Preflight,
    Stage(Stage),
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Preflight => f.write_str("Preflight"),
            Phase::Stage(stage) => stage.fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order() {
        let mut order = vec![Stage::FIRST];
        while let Some(next) = order.last().and_then(|s| s.next()) {
            order.push(next);
        }
        assert_eq!(order, Stage::ALL.to_vec());
    }

    #[test]
    fn test_mandatory_stages_always_selected() {
        let selection = StageSelection::mandatory_only();
        let selected: Vec<Stage> = Stage::ALL
            .into_iter()
            .filter(|s| s.is_selected(&selection))
            .collect();
        assert_eq!(
            selected,
            vec![Stage::RepairSingleton, Stage::ClassifyCollections, Stage::PurgeOrphans]
        );
        assert!(selected.iter().all(|s| !s.is_optional()));
    }

    #[test]
    fn test_state_after_last_stage_is_done() {
        assert_eq!(PipelineState::after(Stage::CompactStorage), PipelineState::Done);
        assert!(PipelineState::Failed(Phase::Preflight).is_terminal());
        assert!(!PipelineState::Running(Stage::PurgeOrphans).is_terminal());
    }
}
