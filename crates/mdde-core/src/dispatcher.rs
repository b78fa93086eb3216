//! Per-step multi-agent action dispatch.
//!
//! Agents are visited in scenario order. Each selected index is resolved
//! through the agent's [`ActionTable`]; problems with one agent's action are
//! recorded in that agent's [`AgentOutcome`] and never abort the step.
//!
//! Conflicts: a copy reads its source cell and writes its destination cell, a
//! delete writes its cell. Reads of the same cell never conflict with each
//! other. A write conflicts with any earlier read or write of its cell, and a
//! read conflicts with any earlier write. The first claimant wins; the later
//! agent is answered with [`OutcomeStatus::Conflict`] and its write is not
//! issued. Accepted writes therefore never race on a cell and can be issued
//! concurrently. Either way, `dispatch` only returns after every issued write
//! has completed.

use std::collections::HashMap;

use futures::future::join_all;
use mdde_registry::{ErrorDescriptor, FragmentId, NodeId, RegistryWritePort, ResultEnvelope};
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::agent::{ActionTable, AgentAction, AgentBinding, AgentId};
use crate::error::{EnvError, EnvResult, Phase};

/// What happened to one agent's action in a step.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// "Do nothing" was selected; no write issued.
    Idle,
    /// The write was accepted by the registry.
    Applied,
    /// The registry rejected the write or the call failed.
    WriteFailed { error: ErrorDescriptor },
    /// The index is outside the agent's action table; no write issued.
    InvalidAction { index: usize, available: usize },
    /// Another agent claimed a touched cell earlier in the step.
    Conflict { winner: AgentId },
}

/// Per-agent result of a step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentOutcome {
    pub agent: AgentId,
    pub selection: usize,
    /// Decoded action, absent when the index was invalid.
    pub action: Option<AgentAction>,
    #[serde(flatten)]
    pub status: OutcomeStatus,
}

impl AgentOutcome {
    /// `true` for idle and applied outcomes.
    pub fn is_success(&self) -> bool {
        matches!(self.status, OutcomeStatus::Idle | OutcomeStatus::Applied)
    }

    pub fn is_applied(&self) -> bool {
        matches!(self.status, OutcomeStatus::Applied)
    }

    /// The failure as an [`EnvError`], for callers that want to raise it.
    pub fn failure(&self) -> Option<EnvError> {
        match &self.status {
            OutcomeStatus::Idle | OutcomeStatus::Applied => None,
            OutcomeStatus::WriteFailed { error } => Some(EnvError::Transport {
                phase: Phase::Dispatch,
                source: error.clone(),
            }),
            OutcomeStatus::InvalidAction { index, available } => Some(EnvError::InvalidAction {
                agent: self.agent,
                index: *index,
                available: *available,
            }),
            OutcomeStatus::Conflict { winner } => Some(EnvError::Scenario(format!(
                "agent {} lost a placement conflict to agent {winner}",
                self.agent
            ))),
        }
    }
}

type Cell = (NodeId, FragmentId);

/// Write accepted during planning, waiting to be issued.
struct PendingWrite {
    slot: usize,
    action: AgentAction,
}

/// Translates per-agent action indices into registry writes.
#[derive(Debug, Clone, Default)]
pub struct StepDispatcher {
    concurrent: bool,
}

impl StepDispatcher {
    pub fn new(concurrent: bool) -> Self {
        Self { concurrent }
    }

    pub fn is_concurrent(&self) -> bool {
        self.concurrent
    }

    /// Dispatch one action per agent.
    ///
    /// `agents`, `tables` and `selections` are parallel slices in scenario
    /// order. Only a length mismatch fails the call; every per-agent problem
    /// lands in the returned outcomes, which keep agent order.
    #[instrument(skip_all, fields(agents = agents.len(), concurrent = self.concurrent))]
    pub async fn dispatch(
        &self,
        write: &dyn RegistryWritePort,
        agents: &[AgentBinding],
        tables: &[ActionTable],
        selections: &[usize],
    ) -> EnvResult<Vec<AgentOutcome>> {
        if selections.len() != agents.len() {
            return Err(EnvError::ActionCountMismatch {
                expected: agents.len(),
                actual: selections.len(),
            });
        }
        if tables.len() != agents.len() {
            return Err(EnvError::ActionCountMismatch {
                expected: agents.len(),
                actual: tables.len(),
            });
        }

        let mut slots: Vec<Option<AgentOutcome>> = Vec::with_capacity(agents.len());
        let mut pending: Vec<PendingWrite> = Vec::new();
        let mut writers: HashMap<Cell, AgentId> = HashMap::new();
        let mut readers: HashMap<Cell, AgentId> = HashMap::new();

        for (slot, ((agent, table), &selection)) in
            agents.iter().zip(tables).zip(selections).enumerate()
        {
            let outcome = |action: Option<AgentAction>, status| {
                Some(AgentOutcome {
                    agent: agent.id(),
                    selection,
                    action,
                    status,
                })
            };

            let Some(action) = table.get(selection) else {
                warn!(agent = %agent.id(), selection, available = table.len(), "invalid action index");
                slots.push(outcome(
                    None,
                    OutcomeStatus::InvalidAction {
                        index: selection,
                        available: table.len(),
                    },
                ));
                continue;
            };

            if action.is_noop() {
                slots.push(outcome(Some(action.clone()), OutcomeStatus::Idle));
                continue;
            }

            let reads = action.read_cells();
            let writes = action.written_cells();
            let winner = writes
                .iter()
                .find_map(|cell| writers.get(cell).or_else(|| readers.get(cell)).copied())
                .or_else(|| reads.iter().find_map(|cell| writers.get(cell).copied()));
            if let Some(winner) = winner {
                debug!(agent = %agent.id(), winner = %winner, action = %action, "placement conflict");
                slots.push(outcome(
                    Some(action.clone()),
                    OutcomeStatus::Conflict { winner },
                ));
                continue;
            }
            for cell in reads {
                readers.entry(cell).or_insert(agent.id());
            }
            for cell in writes {
                writers.insert(cell, agent.id());
            }
            pending.push(PendingWrite {
                slot,
                action: action.clone(),
            });
            slots.push(None);
        }

        let results: Vec<ResultEnvelope<()>> = if self.concurrent {
            join_all(pending.iter().map(|p| apply(write, &p.action))).await
        } else {
            let mut results = Vec::with_capacity(pending.len());
            for p in &pending {
                results.push(apply(write, &p.action).await);
            }
            results
        };

        for (p, envelope) in pending.into_iter().zip(results) {
            let agent = agents[p.slot].id();
            let status = match envelope.raise_on_error() {
                Ok(_) => OutcomeStatus::Applied,
                Err(error) => {
                    warn!(agent = %agent, action = %p.action, error = %error, "write rejected");
                    OutcomeStatus::WriteFailed { error }
                }
            };
            slots[p.slot] = Some(AgentOutcome {
                agent,
                selection: selections[p.slot],
                action: Some(p.action),
                status,
            });
        }

        Ok(slots.into_iter().flatten().collect())
    }
}

async fn apply(write: &dyn RegistryWritePort, action: &AgentAction) -> ResultEnvelope<()> {
    match action {
        AgentAction::DoNothing => ResultEnvelope::success(()),
        AgentAction::Copy {
            source,
            destination,
            fragment,
        } => write.copy_fragment(source, destination, fragment).await,
        AgentAction::Delete { node, fragment } => write.delete_fragment(node, fragment).await,
    }
}
