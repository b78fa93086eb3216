//! Environment and scenario configuration.
//!
//! Both structs are plain serde types. `ScenarioConfig::load` reads a JSON
//! file; everything else is set programmatically with the `with_*` builders.

use std::path::Path;

use mdde_registry::Workload;
use serde::{Deserialize, Serialize};

use crate::error::{EnvError, EnvResult};

/// Run-time knobs of the environment loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvConfig {
    /// Episode length; `None` means agents are never done.
    pub max_steps: Option<u64>,
    /// Issue accepted writes of a step concurrently instead of in agent order.
    pub concurrent_writes: bool,
    /// Run one benchmark right after the default snapshot is taken.
    pub initial_benchmark: bool,
    pub benchmark_workers: u32,
    /// Reward assigned to invalid, failed or conflicting actions.
    pub invalid_action_penalty: f64,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            max_steps: None,
            concurrent_writes: false,
            initial_benchmark: false,
            benchmark_workers: 1,
            invalid_action_penalty: -1.0,
        }
    }
}

impl EnvConfig {
    pub fn with_max_steps(mut self, steps: u64) -> Self {
        self.max_steps = Some(steps);
        self
    }

    pub fn with_concurrent_writes(mut self, concurrent: bool) -> Self {
        self.concurrent_writes = concurrent;
        self
    }

    pub fn with_initial_benchmark(mut self, enabled: bool) -> Self {
        self.initial_benchmark = enabled;
        self
    }

    pub fn with_benchmark_workers(mut self, workers: u32) -> Self {
        self.benchmark_workers = workers;
        self
    }

    pub fn with_invalid_action_penalty(mut self, penalty: f64) -> Self {
        self.invalid_action_penalty = penalty;
        self
    }

    pub fn validate(&self) -> EnvResult<()> {
        if self.benchmark_workers == 0 {
            return Err(EnvError::Config(
                "benchmark_workers must be at least 1".to_string(),
            ));
        }
        if self.max_steps == Some(0) {
            return Err(EnvError::Config("max_steps must be positive".to_string()));
        }
        if !self.invalid_action_penalty.is_finite() {
            return Err(EnvError::Config(
                "invalid_action_penalty must be finite".to_string(),
            ));
        }
        Ok(())
    }
}

/// A node of the scenario and the agent that manages it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: String,
    /// Agent name; nodes sharing a name are managed by one agent. Defaults to
    /// one agent per node, named after the node.
    #[serde(default)]
    pub agent: Option<String>,
}

/// Description of the registry layout an episode starts from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioConfig {
    #[serde(default = "default_scenario_name")]
    pub name: String,
    pub nodes: Vec<NodeSpec>,
    /// Target fragment count for the node-local fragmenter.
    pub fragments: usize,
    /// Workload used for data generation.
    pub workload: Workload,
    /// Workload used for benchmarks; defaults to `workload`.
    #[serde(default)]
    pub benchmark_workload: Option<Workload>,
    #[serde(default)]
    pub env: EnvConfig,
}

fn default_scenario_name() -> String {
    "default".to_string()
}

impl ScenarioConfig {
    pub fn new<I, S>(nodes: I, fragments: usize, workload: Workload) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: default_scenario_name(),
            nodes: nodes
                .into_iter()
                .map(|id| NodeSpec {
                    id: id.into(),
                    agent: None,
                })
                .collect(),
            fragments,
            workload,
            benchmark_workload: None,
            env: EnvConfig::default(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_env(mut self, env: EnvConfig) -> Self {
        self.env = env;
        self
    }

    /// Load and validate a JSON scenario file.
    pub fn load(path: &Path) -> EnvResult<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| EnvError::Config(format!("cannot read {}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| EnvError::Config(format!("invalid scenario {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> EnvResult<()> {
        if self.nodes.is_empty() {
            return Err(EnvError::Config("scenario has no nodes".to_string()));
        }
        if self.fragments == 0 {
            return Err(EnvError::Config(
                "fragments must be at least 1".to_string(),
            ));
        }
        let mut seen = std::collections::BTreeSet::new();
        for node in &self.nodes {
            if node.id.trim().is_empty() {
                return Err(EnvError::Config("node id must not be blank".to_string()));
            }
            if !seen.insert(node.id.as_str()) {
                return Err(EnvError::Config(format!("node {} listed twice", node.id)));
            }
        }
        self.env.validate()
    }

    pub fn benchmark_workload(&self) -> &Workload {
        self.benchmark_workload.as_ref().unwrap_or(&self.workload)
    }
}
