//! Agent bindings and per-agent action tables.
//!
//! An agent manages one or more nodes. Its discrete action space is a flat
//! table enumerated deterministically from the ordered node list and the
//! ordered fragment list:
//!
//! 1. index 0 is always "do nothing"
//! 2. copies onto every owned node, per fragment, from every other node
//! 3. deletes from every owned node, per fragment
//!
//! The table is rebuilt whenever the fragment set changes, never mutated.

use std::collections::BTreeSet;

use mdde_registry::{FragmentId, NodeId};
use serde::{Deserialize, Serialize};

use crate::error::{EnvError, EnvResult};

/// Numeric agent identifier, unique within a scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub u32);

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Association of an agent with the nodes it manages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentBinding {
    id: AgentId,
    name: String,
    nodes: Vec<NodeId>,
}

impl AgentBinding {
    /// Fails when `nodes` is empty or names the same node twice.
    pub fn new<I, N>(id: AgentId, name: impl Into<String>, nodes: I) -> EnvResult<Self>
    where
        I: IntoIterator<Item = N>,
        N: Into<NodeId>,
    {
        let name = name.into();
        let nodes: Vec<NodeId> = nodes.into_iter().map(Into::into).collect();
        if nodes.is_empty() {
            return Err(EnvError::Scenario(format!(
                "agent {name} ({id}) must manage at least one node"
            )));
        }
        let unique: BTreeSet<&NodeId> = nodes.iter().collect();
        if unique.len() != nodes.len() {
            return Err(EnvError::Scenario(format!(
                "agent {name} ({id}) lists a node more than once"
            )));
        }
        Ok(Self { id, name, nodes })
    }

    /// Binding for an agent managing exactly one node.
    pub fn single(id: AgentId, name: impl Into<String>, node: impl Into<NodeId>) -> Self {
        Self {
            id,
            name: name.into(),
            nodes: vec![node.into()],
        }
    }

    pub fn id(&self) -> AgentId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    pub fn owns(&self, node: &NodeId) -> bool {
        self.nodes.contains(node)
    }
}

/// A single decoded agent action.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentAction {
    DoNothing,
    Copy {
        source: NodeId,
        destination: NodeId,
        fragment: FragmentId,
    },
    Delete {
        node: NodeId,
        fragment: FragmentId,
    },
}

impl AgentAction {
    pub fn is_noop(&self) -> bool {
        matches!(self, AgentAction::DoNothing)
    }

    pub fn fragment(&self) -> Option<&FragmentId> {
        match self {
            AgentAction::DoNothing => None,
            AgentAction::Copy { fragment, .. } | AgentAction::Delete { fragment, .. } => {
                Some(fragment)
            }
        }
    }

    /// (node, fragment) cells this action reads without changing.
    pub fn read_cells(&self) -> Vec<(NodeId, FragmentId)> {
        match self {
            AgentAction::Copy {
                source, fragment, ..
            } => vec![(source.clone(), fragment.clone())],
            AgentAction::DoNothing | AgentAction::Delete { .. } => Vec::new(),
        }
    }

    /// (node, fragment) cells this action changes.
    pub fn written_cells(&self) -> Vec<(NodeId, FragmentId)> {
        match self {
            AgentAction::DoNothing => Vec::new(),
            AgentAction::Copy {
                destination,
                fragment,
                ..
            } => vec![(destination.clone(), fragment.clone())],
            AgentAction::Delete { node, fragment } => vec![(node.clone(), fragment.clone())],
        }
    }
}

impl std::fmt::Display for AgentAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentAction::DoNothing => write!(f, "noop"),
            AgentAction::Copy {
                source,
                destination,
                fragment,
            } => write!(f, "copy {fragment} {source}->{destination}"),
            AgentAction::Delete { node, fragment } => write!(f, "delete {fragment} @{node}"),
        }
    }
}

/// Flat, index-addressable action space of one agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionTable {
    agent: AgentId,
    fragments: Vec<FragmentId>,
    actions: Vec<AgentAction>,
}

impl ActionTable {
    /// Enumerate the action space.
    ///
    /// `nodes` and `fragments` must already be in their canonical order; the
    /// table inherits it.
    pub fn build(binding: &AgentBinding, nodes: &[NodeId], fragments: &[FragmentId]) -> Self {
        let owned = binding.nodes();
        let mut actions =
            Vec::with_capacity(1 + owned.len() * fragments.len() * nodes.len().max(1));
        actions.push(AgentAction::DoNothing);

        for destination in owned {
            for fragment in fragments {
                for source in nodes.iter().filter(|n| *n != destination) {
                    actions.push(AgentAction::Copy {
                        source: source.clone(),
                        destination: destination.clone(),
                        fragment: fragment.clone(),
                    });
                }
            }
        }
        for node in owned {
            for fragment in fragments {
                actions.push(AgentAction::Delete {
                    node: node.clone(),
                    fragment: fragment.clone(),
                });
            }
        }

        Self {
            agent: binding.id(),
            fragments: fragments.to_vec(),
            actions,
        }
    }

    pub fn agent(&self) -> AgentId {
        self.agent
    }

    /// Fragment order the table was built with.
    pub fn fragments(&self) -> &[FragmentId] {
        &self.fragments
    }

    pub fn get(&self, index: usize) -> Option<&AgentAction> {
        self.actions.get(index)
    }

    pub fn index_of(&self, action: &AgentAction) -> Option<usize> {
        self.actions.iter().position(|a| a == action)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Never true: index 0 always exists.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn actions(&self) -> &[AgentAction] {
        &self.actions
    }
}
