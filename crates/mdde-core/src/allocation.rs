//! Node x fragment allocation matrix.
//!
//! Rows follow agent binding order (each agent's nodes in the order it lists
//! them), followed by any registry nodes no agent manages, in natural order.
//! Columns follow the configured [`FragmentOrdering`]. The matrix is always
//! rebuilt from the read port; nothing here caches registry state.

use std::collections::{BTreeMap, BTreeSet};

use mdde_registry::{FragmentId, NodeId, RegistryReadPort};
use serde::Serialize;
use tracing::debug;

use crate::agent::AgentBinding;
use crate::error::{EnvError, EnvResult, EnvelopeExt, Phase};
use crate::ordering::{natural_cmp, FragmentOrdering};

/// Binary placement matrix: `1` where a node holds an exemplar of a fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllocationMatrix {
    nodes: Vec<NodeId>,
    fragments: Vec<FragmentId>,
    cells: Vec<u8>,
}

impl AllocationMatrix {
    /// Build from an explicit placement. `nodes` and `fragments` define the
    /// row and column order; placement entries outside them are ignored.
    pub fn from_placement(
        nodes: Vec<NodeId>,
        fragments: Vec<FragmentId>,
        placement: &BTreeMap<NodeId, BTreeSet<FragmentId>>,
    ) -> Self {
        let mut cells = vec![0u8; nodes.len() * fragments.len()];
        for (row, node) in nodes.iter().enumerate() {
            let Some(held) = placement.get(node) else {
                continue;
            };
            for (col, fragment) in fragments.iter().enumerate() {
                if held.contains(fragment) {
                    cells[row * fragments.len() + col] = 1;
                }
            }
        }
        Self {
            nodes,
            fragments,
            cells,
        }
    }

    /// Read the current placement from the registry.
    pub async fn read(
        read: &dyn RegistryReadPort,
        agents: &[AgentBinding],
        ordering: &dyn FragmentOrdering,
    ) -> EnvResult<Self> {
        let registry_nodes = read
            .list_nodes()
            .await
            .in_phase(Phase::Observation)?
            .unwrap_or_default();
        let nodes = order_nodes(agents, &registry_nodes)?;

        let mut placement = BTreeMap::new();
        let mut all_fragments = BTreeSet::new();
        for node in &nodes {
            let held = read
                .list_node_fragments(node)
                .await
                .in_phase(Phase::Observation)?
                .unwrap_or_default();
            all_fragments.extend(held.iter().cloned());
            placement.insert(node.clone(), held);
        }

        let fragments = ordering.order(&all_fragments.into_iter().collect::<Vec<_>>());
        debug!(
            nodes = nodes.len(),
            fragments = fragments.len(),
            "allocation read"
        );
        Ok(Self::from_placement(nodes, fragments, &placement))
    }

    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    pub fn fragments(&self) -> &[FragmentId] {
        &self.fragments
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.nodes.len(), self.fragments.len())
    }

    /// Cell value; out-of-range coordinates read as `0`.
    pub fn get(&self, row: usize, col: usize) -> u8 {
        if row >= self.nodes.len() || col >= self.fragments.len() {
            return 0;
        }
        self.cells[row * self.fragments.len() + col]
    }

    pub fn row(&self, row: usize) -> &[u8] {
        let width = self.fragments.len();
        let start = (row * width).min(self.cells.len());
        let end = (start + width).min(self.cells.len());
        &self.cells[start..end]
    }

    pub fn row_of(&self, node: &NodeId) -> Option<usize> {
        self.nodes.iter().position(|n| n == node)
    }

    pub fn column_of(&self, fragment: &FragmentId) -> Option<usize> {
        self.fragments.iter().position(|f| f == fragment)
    }

    pub fn contains(&self, node: &NodeId, fragment: &FragmentId) -> bool {
        match (self.row_of(node), self.column_of(fragment)) {
            (Some(r), Some(c)) => self.get(r, c) == 1,
            _ => false,
        }
    }

    /// Nodes holding `fragment`, in row order.
    pub fn holders(&self, fragment: &FragmentId) -> Vec<&NodeId> {
        let Some(col) = self.column_of(fragment) else {
            return Vec::new();
        };
        self.nodes
            .iter()
            .enumerate()
            .filter(|(row, _)| self.get(*row, col) == 1)
            .map(|(_, node)| node)
            .collect()
    }

    /// Fragments held by `node`, in column order.
    pub fn fragments_on(&self, node: &NodeId) -> Vec<&FragmentId> {
        let Some(row) = self.row_of(node) else {
            return Vec::new();
        };
        self.fragments
            .iter()
            .enumerate()
            .filter(|(col, _)| self.get(row, *col) == 1)
            .map(|(_, fragment)| fragment)
            .collect()
    }

    /// Total number of fragment exemplars in the registry.
    pub fn exemplars(&self) -> usize {
        self.cells.iter().filter(|c| **c == 1).count()
    }
}

/// Canonical node order: bound nodes in binding order, then the rest.
///
/// Fails if an agent is bound to a node the registry does not report.
pub fn order_nodes(
    agents: &[AgentBinding],
    registry_nodes: &BTreeSet<NodeId>,
) -> EnvResult<Vec<NodeId>> {
    let mut ordered: Vec<NodeId> = Vec::with_capacity(registry_nodes.len());
    for agent in agents {
        for node in agent.nodes() {
            if !registry_nodes.contains(node) {
                return Err(EnvError::Scenario(format!(
                    "agent {} manages node {node} which the registry does not report",
                    agent.name()
                )));
            }
            if !ordered.contains(node) {
                ordered.push(node.clone());
            }
        }
    }
    let mut unbound: Vec<&NodeId> = registry_nodes
        .iter()
        .filter(|n| !ordered.contains(n))
        .collect();
    unbound.sort_by(|a, b| natural_cmp(a.as_str(), b.as_str()));
    ordered.extend(unbound.into_iter().cloned());
    Ok(ordered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentId;

    fn placement(entries: &[(&str, &[&str])]) -> BTreeMap<NodeId, BTreeSet<FragmentId>> {
        entries
            .iter()
            .map(|(n, fs)| {
                (
                    NodeId::new(*n),
                    fs.iter().map(|f| FragmentId::new(*f)).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn cells_follow_row_and_column_order() {
        let m = AllocationMatrix::from_placement(
            vec![NodeId::new("B"), NodeId::new("A")],
            vec![FragmentId::new("f1"), FragmentId::new("f2")],
            &placement(&[("A", &["f1"]), ("B", &["f1", "f2"])]),
        );
        assert_eq!(m.row(0), &[1, 1]);
        assert_eq!(m.row(1), &[1, 0]);
        assert_eq!(m.holders(&FragmentId::new("f1")).len(), 2);
        assert_eq!(m.fragments_on(&NodeId::new("A")), vec![&FragmentId::new("f1")]);
        assert_eq!(m.exemplars(), 3);
    }

    #[test]
    fn out_of_range_reads_are_zero() {
        let m = AllocationMatrix::from_placement(vec![NodeId::new("A")], vec![], &BTreeMap::new());
        assert_eq!(m.get(3, 3), 0);
        assert!(m.row(5).is_empty());
        assert!(!m.contains(&NodeId::new("A"), &FragmentId::new("f1")));
    }

    #[test]
    fn bound_nodes_come_first_then_natural_order() {
        let agents = vec![
            AgentBinding::single(AgentId(0), "a0", "n10"),
            AgentBinding::single(AgentId(1), "a1", "n2"),
        ];
        let registry: BTreeSet<NodeId> = ["n1", "n2", "n10", "n9"]
            .iter()
            .map(|n| NodeId::new(*n))
            .collect();
        let ordered = order_nodes(&agents, &registry).unwrap();
        let names: Vec<&str> = ordered.iter().map(|n| n.as_str()).collect();
        assert_eq!(names, vec!["n10", "n2", "n1", "n9"]);
    }

    #[test]
    fn binding_to_missing_node_is_rejected() {
        let agents = vec![AgentBinding::single(AgentId(0), "a0", "ghost")];
        let registry: BTreeSet<NodeId> = [NodeId::new("A")].into_iter().collect();
        assert!(matches!(
            order_nodes(&agents, &registry),
            Err(EnvError::Scenario(_))
        ));
    }
}
