//! Scenarios: who manages which node, what data to generate, how to score.

use std::collections::BTreeSet;

use mdde_registry::Workload;
use serde::{Deserialize, Serialize};

use crate::agent::{AgentBinding, AgentId};
use crate::allocation::AllocationMatrix;
use crate::config::{EnvConfig, ScenarioConfig};
use crate::dispatcher::AgentOutcome;
use crate::error::{EnvError, EnvResult};
use crate::fragmenter::{Fragmenter, NodeLocalFragmenter};

/// Dense per-agent observation tensor, row-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub agent: AgentId,
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<f32>,
}

impl Observation {
    pub fn get(&self, row: usize, col: usize) -> Option<f32> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        self.data.get(row * self.cols + col).copied()
    }

    pub fn row(&self, row: usize) -> Option<&[f32]> {
        if row >= self.rows {
            return None;
        }
        self.data.get(row * self.cols..(row + 1) * self.cols)
    }
}

/// Allocation matrix plus one trailing column flagging the agent's own nodes.
pub fn ownership_observation(agent: &AgentBinding, allocation: &AllocationMatrix) -> Observation {
    let (rows, fragments) = allocation.shape();
    let cols = fragments + 1;
    let mut data = Vec::with_capacity(rows * cols);
    for (row, node) in allocation.nodes().iter().enumerate() {
        data.extend(allocation.row(row).iter().map(|c| f32::from(*c)));
        data.push(if agent.owns(node) { 1.0 } else { 0.0 });
    }
    Observation {
        agent: agent.id(),
        rows,
        cols,
        data,
    }
}

/// Everything an environment needs to know about a particular experiment.
///
/// Agents are listed in dispatch order; that order also fixes the node rows
/// of every observation.
pub trait Scenario: Send + Sync {
    fn name(&self) -> &str;

    fn agents(&self) -> &[AgentBinding];

    fn data_workload(&self) -> &Workload;

    fn benchmark_workload(&self) -> &Workload {
        self.data_workload()
    }

    fn fragmenter(&self) -> &dyn Fragmenter;

    fn observe(&self, agent: &AgentBinding, allocation: &AllocationMatrix) -> Observation {
        ownership_observation(agent, allocation)
    }

    /// One reward per agent, in agent order.
    fn rewards(
        &self,
        prior: &AllocationMatrix,
        post: &AllocationMatrix,
        outcomes: &[AgentOutcome],
    ) -> Vec<f64>;

    /// `tick` counts completed steps since the last reset.
    fn done(&self, agent: &AgentBinding, tick: u64) -> bool;
}

/// Scenario built from a [`ScenarioConfig`].
///
/// Rewards are a flat penalty for any action that did not go through and zero
/// otherwise; agents are done once `max_steps` steps have run.
#[derive(Debug, Clone)]
pub struct DefaultScenario {
    name: String,
    agents: Vec<AgentBinding>,
    workload: Workload,
    benchmark_workload: Workload,
    fragmenter: NodeLocalFragmenter,
    max_steps: Option<u64>,
    penalty: f64,
}

impl DefaultScenario {
    pub fn from_config(config: &ScenarioConfig) -> EnvResult<Self> {
        config.validate()?;

        // Group nodes by agent name, keeping first-appearance order.
        let mut groups: Vec<(String, Vec<String>)> = Vec::new();
        for node in &config.nodes {
            let agent = node.agent.clone().unwrap_or_else(|| node.id.clone());
            match groups.iter_mut().find(|(name, _)| *name == agent) {
                Some((_, nodes)) => nodes.push(node.id.clone()),
                None => groups.push((agent, vec![node.id.clone()])),
            }
        }
        let agents = groups
            .into_iter()
            .enumerate()
            .map(|(i, (name, nodes))| {
                let id = u32::try_from(i)
                    .map_err(|_| EnvError::Config("too many agents".to_string()))?;
                AgentBinding::new(AgentId(id), name, nodes)
            })
            .collect::<EnvResult<Vec<_>>>()?;

        Ok(Self {
            name: config.name.clone(),
            agents,
            workload: config.workload.clone(),
            benchmark_workload: config.benchmark_workload().clone(),
            fragmenter: NodeLocalFragmenter::new(config.fragments),
            max_steps: config.env.max_steps,
            penalty: config.env.invalid_action_penalty,
        })
    }

    /// Scenario with explicit bindings, e.g. for tests or embedding.
    pub fn new(
        name: impl Into<String>,
        agents: Vec<AgentBinding>,
        workload: Workload,
        fragmenter: NodeLocalFragmenter,
        env: &EnvConfig,
    ) -> EnvResult<Self> {
        validate_bindings(&agents)?;
        Ok(Self {
            name: name.into(),
            agents,
            benchmark_workload: workload.clone(),
            workload,
            fragmenter,
            max_steps: env.max_steps,
            penalty: env.invalid_action_penalty,
        })
    }
}

/// Agent ids must be unique and no node may be managed by two agents.
pub fn validate_bindings(agents: &[AgentBinding]) -> EnvResult<()> {
    if agents.is_empty() {
        return Err(EnvError::Scenario("scenario has no agents".to_string()));
    }
    let mut ids = BTreeSet::new();
    let mut nodes = BTreeSet::new();
    for agent in agents {
        if !ids.insert(agent.id()) {
            return Err(EnvError::Scenario(format!(
                "agent id {} is used twice",
                agent.id()
            )));
        }
        for node in agent.nodes() {
            if !nodes.insert(node.clone()) {
                return Err(EnvError::Scenario(format!(
                    "node {node} is managed by more than one agent"
                )));
            }
        }
    }
    Ok(())
}

impl Scenario for DefaultScenario {
    fn name(&self) -> &str {
        &self.name
    }

    fn agents(&self) -> &[AgentBinding] {
        &self.agents
    }

    fn data_workload(&self) -> &Workload {
        &self.workload
    }

    fn benchmark_workload(&self) -> &Workload {
        &self.benchmark_workload
    }

    fn fragmenter(&self) -> &dyn Fragmenter {
        &self.fragmenter
    }

    fn rewards(
        &self,
        _prior: &AllocationMatrix,
        _post: &AllocationMatrix,
        outcomes: &[AgentOutcome],
    ) -> Vec<f64> {
        outcomes
            .iter()
            .map(|o| if o.is_success() { 0.0 } else { self.penalty })
            .collect()
    }

    fn done(&self, _agent: &AgentBinding, tick: u64) -> bool {
        self.max_steps.is_some_and(|max| tick >= max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdde_registry::{FragmentId, NodeId};
    use std::collections::BTreeMap;

    #[test]
    fn config_groups_nodes_by_agent_name() {
        let mut config = ScenarioConfig::new(["A", "B", "C"], 4, Workload::new("w", 8));
        config.nodes[1].agent = Some("bc".to_string());
        config.nodes[2].agent = Some("bc".to_string());

        let scenario = DefaultScenario::from_config(&config).unwrap();
        let agents = scenario.agents();
        assert_eq!(agents.len(), 2);
        assert_eq!(agents[0].name(), "A");
        assert_eq!(agents[1].id(), AgentId(1));
        assert_eq!(agents[1].nodes(), &[NodeId::new("B"), NodeId::new("C")]);
    }

    #[test]
    fn shared_node_is_rejected() {
        let agents = vec![
            AgentBinding::single(AgentId(0), "a", "A"),
            AgentBinding::single(AgentId(1), "b", "A"),
        ];
        assert!(validate_bindings(&agents).is_err());
    }

    #[test]
    fn observation_marks_owned_rows() {
        let allocation = AllocationMatrix::from_placement(
            vec![NodeId::new("A"), NodeId::new("B")],
            vec![FragmentId::new("f1")],
            &BTreeMap::from([(
                NodeId::new("B"),
                BTreeSet::from([FragmentId::new("f1")]),
            )]),
        );
        let agent = AgentBinding::single(AgentId(0), "a", "A");
        let obs = ownership_observation(&agent, &allocation);
        assert_eq!((obs.rows, obs.cols), (2, 2));
        assert_eq!(obs.row(0), Some(&[0.0, 1.0][..]));
        assert_eq!(obs.row(1), Some(&[1.0, 0.0][..]));
        assert_eq!(obs.get(5, 0), None);
    }

    #[test]
    fn truncated_observation_data_is_not_a_panic() {
        let obs: Observation = serde_json::from_str(
            r#"{"agent":0,"rows":2,"cols":3,"data":[1.0,0.0,0.0,1.0]}"#,
        )
        .unwrap();
        assert_eq!(obs.row(0), Some(&[1.0, 0.0, 0.0][..]));
        assert_eq!(obs.row(1), None);
        assert_eq!(obs.get(1, 2), None);
    }

    #[test]
    fn done_after_max_steps() {
        let config = ScenarioConfig::new(["A"], 1, Workload::new("w", 1))
            .with_env(EnvConfig::default().with_max_steps(2));
        let scenario = DefaultScenario::from_config(&config).unwrap();
        let agent = &scenario.agents()[0];
        assert!(!scenario.done(agent, 1));
        assert!(scenario.done(agent, 2));
    }
}
