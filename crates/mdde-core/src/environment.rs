//! The multi-agent environment loop.
//!
//! `Environment` ties a [`Scenario`] to the registry ports. It owns the
//! lifecycle orchestrator, the step dispatcher and the per-agent action
//! tables. Observations are rebuilt from the read port after every reset and
//! every step.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use mdde_registry::{FragmentId, NodeId};
use serde::Serialize;
use tracing::{instrument, warn, Instrument};

use crate::agent::{ActionTable, AgentId};
use crate::allocation::AllocationMatrix;
use crate::config::EnvConfig;
use crate::dispatcher::{AgentOutcome, OutcomeStatus, StepDispatcher};
use crate::error::{EnvError, EnvResult};
use crate::obs;
use crate::ordering::{FragmentOrdering, NaturalOrdering};
use crate::orchestrator::{InitializationReport, RegistryLifecycleOrchestrator, RegistryPorts};
use crate::scenario::{validate_bindings, Observation, Scenario};

/// Diagnostics of one step.
#[derive(Debug, Clone, Serialize)]
pub struct StepInfo {
    /// Steps completed since the last reset, including this one.
    pub tick: u64,
    /// One outcome per agent, in agent order.
    pub outcomes: Vec<AgentOutcome>,
    /// Allocation after all writes completed.
    pub allocation: AllocationMatrix,
    pub completed_at: DateTime<Utc>,
}

/// Result of [`Environment::step`]; every vector is in agent order.
#[derive(Debug, Clone, Serialize)]
pub struct StepResult {
    pub observations: Vec<Observation>,
    pub rewards: Vec<f64>,
    pub dones: Vec<bool>,
    pub info: StepInfo,
}

/// Benchmark read counts aligned with the current allocation ordering.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BenchmarkObservation {
    pub throughput: f64,
    pub nodes: Vec<NodeId>,
    pub fragments: Vec<FragmentId>,
    /// Row-major `nodes x fragments` read counts.
    pub reads: Vec<u64>,
}

impl BenchmarkObservation {
    /// Reads of one cell; 0 outside the matrix.
    pub fn reads_at(&self, row: usize, col: usize) -> u64 {
        if row >= self.nodes.len() || col >= self.fragments.len() {
            return 0;
        }
        self.reads
            .get(row * self.fragments.len() + col)
            .copied()
            .unwrap_or(0)
    }
}

/// Registry-backed multi-agent environment.
pub struct Environment {
    config: EnvConfig,
    scenario: Arc<dyn Scenario>,
    ordering: Arc<dyn FragmentOrdering>,
    orchestrator: RegistryLifecycleOrchestrator,
    dispatcher: StepDispatcher,
    tables: Vec<ActionTable>,
    table_nodes: Vec<NodeId>,
    tick: u64,
}

impl Environment {
    pub fn new(
        config: EnvConfig,
        scenario: Arc<dyn Scenario>,
        ports: RegistryPorts,
    ) -> EnvResult<Self> {
        config.validate()?;
        validate_bindings(scenario.agents())?;
        Ok(Self {
            dispatcher: StepDispatcher::new(config.concurrent_writes),
            config,
            scenario,
            ordering: Arc::new(NaturalOrdering),
            orchestrator: RegistryLifecycleOrchestrator::new(ports),
            tables: Vec::new(),
            table_nodes: Vec::new(),
            tick: 0,
        })
    }

    /// Replace the fragment ordering policy. Must be set before `initialize`.
    pub fn with_ordering(mut self, ordering: Arc<dyn FragmentOrdering>) -> Self {
        self.ordering = ordering;
        self
    }

    pub fn config(&self) -> &EnvConfig {
        &self.config
    }

    pub fn scenario(&self) -> &dyn Scenario {
        self.scenario.as_ref()
    }

    pub fn orchestrator(&self) -> &RegistryLifecycleOrchestrator {
        &self.orchestrator
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Current action tables, in agent order. Empty before `initialize`.
    pub fn action_tables(&self) -> &[ActionTable] {
        &self.tables
    }

    pub fn action_table(&self, agent: AgentId) -> Option<&ActionTable> {
        self.tables.iter().find(|t| t.agent() == agent)
    }

    /// Run the full initialization sequence and build the action tables.
    pub async fn initialize(&mut self) -> EnvResult<InitializationReport> {
        let span = obs::episode_span(self.scenario.name());
        self.initialize_inner().instrument(span).await
    }

    async fn initialize_inner(&mut self) -> EnvResult<InitializationReport> {
        let scenario = Arc::clone(&self.scenario);
        obs::emit_init_started(scenario.name(), scenario.agents().len());
        self.tables.clear();
        self.table_nodes.clear();
        self.tick = 0;

        let mut report = self
            .orchestrator
            .initialize(scenario.data_workload(), scenario.fragmenter())
            .await?;

        if self.config.initial_benchmark {
            let benchmark = self
                .orchestrator
                .run_benchmark(scenario.benchmark_workload(), self.config.benchmark_workers)
                .await;
            if let Err(err) = benchmark {
                self.orchestrator.invalidate();
                obs::emit_init_failed(err.phase(), &err);
                return Err(err);
            }
        }

        let allocation = self.allocation().await?;
        self.refresh_tables(&allocation);
        report.nodes = allocation.nodes().to_vec();
        report.fragments = allocation.fragments().to_vec();
        Ok(report)
    }

    /// Roll back to the default snapshot and return fresh observations.
    #[instrument(skip_all, fields(scenario = %self.scenario.name()))]
    pub async fn reset(&mut self) -> EnvResult<Vec<Observation>> {
        self.orchestrator.reset().await?;
        self.tick = 0;
        let allocation = self.allocation().await?;
        self.refresh_tables(&allocation);
        Ok(self.observations(&allocation))
    }

    /// Apply one action index per agent and observe the result.
    ///
    /// Indices are decoded against the tables of the previous observation.
    /// Per-agent failures land in `info.outcomes`; only registry reads and a
    /// selection count mismatch fail the call.
    #[instrument(skip_all, fields(tick = self.tick + 1))]
    pub async fn step(&mut self, selections: &[usize]) -> EnvResult<StepResult> {
        if self.tables.is_empty() {
            return Err(EnvError::NotInitialized);
        }
        let scenario = Arc::clone(&self.scenario);
        let agents = scenario.agents();

        let prior = self.allocation().await?;
        let write = Arc::clone(&self.orchestrator.ports().write);
        let outcomes = self
            .dispatcher
            .dispatch(write.as_ref(), agents, &self.tables, selections)
            .await?;

        // Every issued write has completed; rebuild from the registry.
        let post = self.allocation().await?;
        self.refresh_tables(&post);
        self.tick += 1;

        let rewards = scenario.rewards(&prior, &post, &outcomes);
        let dones = agents
            .iter()
            .map(|agent| scenario.done(agent, self.tick))
            .collect();
        let observations = self.observations(&post);

        let applied = outcomes.iter().filter(|o| o.is_applied()).count();
        let conflicts = outcomes
            .iter()
            .filter(|o| matches!(o.status, OutcomeStatus::Conflict { .. }))
            .count();
        let rejected = outcomes.iter().filter(|o| !o.is_success()).count() - conflicts;
        obs::emit_step_finished(self.tick, applied, rejected, conflicts);

        Ok(StepResult {
            observations,
            rewards,
            dones,
            info: StepInfo {
                tick: self.tick,
                outcomes,
                allocation: post,
                completed_at: Utc::now(),
            },
        })
    }

    /// Observations of the current registry state, without stepping.
    pub async fn observe(&self) -> EnvResult<Vec<Observation>> {
        let allocation = self.allocation().await?;
        Ok(self.observations(&allocation))
    }

    /// Read the current allocation from the registry.
    pub async fn allocation(&self) -> EnvResult<AllocationMatrix> {
        AllocationMatrix::read(
            self.orchestrator.ports().read.as_ref(),
            self.scenario.agents(),
            self.ordering.as_ref(),
        )
        .await
    }

    /// Run the scenario's benchmark workload against the current layout.
    #[instrument(skip_all)]
    pub async fn benchmark(&self) -> EnvResult<BenchmarkObservation> {
        let allocation = self.allocation().await?;
        let report = self
            .orchestrator
            .run_benchmark(
                self.scenario.benchmark_workload(),
                self.config.benchmark_workers,
            )
            .await?;

        let (rows, cols) = allocation.shape();
        let mut reads = vec![0u64; rows * cols];
        for stats in &report.nodes {
            let Some(row) = allocation.row_of(&stats.node) else {
                warn!(node = %stats.node, "benchmark reported an unknown node");
                continue;
            };
            for (fragment, count) in &stats.fragment_reads {
                match allocation.column_of(fragment) {
                    Some(col) => reads[row * cols + col] = *count,
                    None => warn!(fragment = %fragment, "benchmark reported an unknown fragment"),
                }
            }
        }

        Ok(BenchmarkObservation {
            throughput: report.throughput,
            nodes: allocation.nodes().to_vec(),
            fragments: allocation.fragments().to_vec(),
            reads,
        })
    }

    fn observations(&self, allocation: &AllocationMatrix) -> Vec<Observation> {
        self.scenario
            .agents()
            .iter()
            .map(|agent| self.scenario.observe(agent, allocation))
            .collect()
    }

    /// Rebuild action tables when the node or fragment set changed.
    fn refresh_tables(&mut self, allocation: &AllocationMatrix) {
        let unchanged = !self.tables.is_empty()
            && self.table_nodes == allocation.nodes()
            && self
                .tables
                .iter()
                .all(|t| t.fragments() == allocation.fragments());
        if unchanged {
            return;
        }
        self.tables = self
            .scenario
            .agents()
            .iter()
            .map(|agent| {
                let table =
                    ActionTable::build(agent, allocation.nodes(), allocation.fragments());
                obs::emit_action_table_rebuilt(agent.id().0, table.len(), table.fragments().len());
                table
            })
            .collect();
        self.table_nodes = allocation.nodes().to_vec();
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("scenario", &self.scenario.name())
            .field("config", &self.config)
            .field("tick", &self.tick)
            .field("tables", &self.tables.len())
            .finish_non_exhaustive()
    }
}
