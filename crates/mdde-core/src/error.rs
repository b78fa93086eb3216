//! Error taxonomy for environment orchestration.

use mdde_registry::{ErrorDescriptor, ResultEnvelope};
use serde::Serialize;

use crate::agent::AgentId;

/// Where in the environment lifecycle a registry call was made.
///
/// Each `initialize()` step has its own phase so a failure names exactly the
/// step that aborted the sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Standalone `ensure_mode` call.
    ModeSwitch,
    ShuffleBeforeFlush,
    Flush,
    PopulateNodes,
    BenchmarkBeforeGeneration,
    GenerateData,
    Fragmentation,
    ShuffleAfterFragmentation,
    SyncRegistryToData,
    SnapshotCreate,
    Benchmark,
    Reset,
    Observation,
    Dispatch,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::ModeSwitch => "mode switch",
            Phase::ShuffleBeforeFlush => "switch to shuffle before flush",
            Phase::Flush => "flush",
            Phase::PopulateNodes => "populate default nodes",
            Phase::BenchmarkBeforeGeneration => "switch to benchmark before data generation",
            Phase::GenerateData => "data generation",
            Phase::Fragmentation => "fragmentation",
            Phase::ShuffleAfterFragmentation => "switch to shuffle after fragmentation",
            Phase::SyncRegistryToData => "registry to data sync",
            Phase::SnapshotCreate => "default snapshot creation",
            Phase::Benchmark => "benchmark",
            Phase::Reset => "reset to default snapshot",
            Phase::Observation => "observation rebuild",
            Phase::Dispatch => "action dispatch",
        };
        write!(f, "{s}")
    }
}

/// Errors produced by the environment core.
#[derive(Debug, thiserror::Error)]
pub enum EnvError {
    /// A port call failed (network or registry side).
    #[error("registry call failed during {phase}: {source}")]
    Transport {
        phase: Phase,
        #[source]
        source: ErrorDescriptor,
    },

    /// Registry mode is unknown, or an illegal mode target was requested.
    #[error("registry state error during {phase}: {detail}")]
    RegistryState { phase: Phase, detail: String },

    #[error("initial data was not generated, check the registry logs for more information")]
    DataGenerationEmpty,

    #[error("failed to create a default snapshot: no handle returned by the registry")]
    SnapshotCreation,

    #[error("agent {agent} selected action {index} but only {available} actions exist")]
    InvalidAction {
        agent: AgentId,
        index: usize,
        available: usize,
    },

    #[error("expected one action per agent ({expected}), got {actual}")]
    ActionCountMismatch { expected: usize, actual: usize },

    #[error("environment is not initialized")]
    NotInitialized,

    #[error("invalid scenario: {0}")]
    Scenario(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl EnvError {
    /// Lifecycle phase the error was raised in, if it came from a registry call.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            EnvError::Transport { phase, .. } | EnvError::RegistryState { phase, .. } => {
                Some(*phase)
            }
            EnvError::DataGenerationEmpty => Some(Phase::GenerateData),
            EnvError::SnapshotCreation => Some(Phase::SnapshotCreate),
            _ => None,
        }
    }
}

/// Result type for environment operations.
pub type EnvResult<T> = std::result::Result<T, EnvError>;

/// Fail-fast conversion of an envelope into an [`EnvResult`] tagged with a phase.
pub(crate) trait EnvelopeExt<T> {
    fn in_phase(self, phase: Phase) -> EnvResult<Option<T>>;
}

impl<T> EnvelopeExt<T> for ResultEnvelope<T> {
    fn in_phase(self, phase: Phase) -> EnvResult<Option<T>> {
        self.raise_on_error()
            .map_err(|source| EnvError::Transport { phase, source })
    }
}
