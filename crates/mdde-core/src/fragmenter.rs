//! Fragmentation collaborators.
//!
//! A fragmenter groups generated tuples into fragments through the write
//! port and reports whether it changed where tuples physically live. When it
//! does, the orchestrator runs a registry to data sync before snapshotting.

use std::collections::BTreeSet;

use async_trait::async_trait;
use mdde_registry::{
    ErrorCode, ErrorDescriptor, FragmentId, RegistryReadPort, RegistryWritePort, TupleId,
};
use tracing::{debug, info};

use crate::ordering::natural_cmp;

/// Turns generated data into fragments.
#[async_trait]
pub trait Fragmenter: Send + Sync {
    /// Returns `true` when tuples were moved and a shuffle sync is required.
    async fn run_fragmentation(
        &self,
        read: &dyn RegistryReadPort,
        write: &dyn RegistryWritePort,
    ) -> Result<bool, ErrorDescriptor>;
}

/// Splits every node's unassigned tuples into fixed-size fragments in place.
///
/// The chunk size is `ceil(total_tuples / target_fragments)` so the registry
/// ends up with at most `target_fragments` fragments named `{prefix}1..N`.
/// Tuples never leave their node, so no shuffle is requested.
#[derive(Debug, Clone)]
pub struct NodeLocalFragmenter {
    target_fragments: usize,
    prefix: String,
}

impl NodeLocalFragmenter {
    pub fn new(target_fragments: usize) -> Self {
        Self {
            target_fragments: target_fragments.max(1),
            prefix: "f".to_string(),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn target_fragments(&self) -> usize {
        self.target_fragments
    }
}

#[async_trait]
impl Fragmenter for NodeLocalFragmenter {
    async fn run_fragmentation(
        &self,
        read: &dyn RegistryReadPort,
        write: &dyn RegistryWritePort,
    ) -> Result<bool, ErrorDescriptor> {
        let nodes = read.list_nodes().await.raise_on_error()?.unwrap_or_default();

        let mut per_node: Vec<Vec<TupleId>> = Vec::with_capacity(nodes.len());
        for node in &nodes {
            let mut tuples: Vec<TupleId> = read
                .list_node_unassigned_tuples(node)
                .await
                .raise_on_error()?
                .unwrap_or_default()
                .into_iter()
                .collect();
            tuples.sort_by(|a, b| natural_cmp(a.as_str(), b.as_str()));
            debug!(node = %node, tuples = tuples.len(), "unassigned tuples");
            per_node.push(tuples);
        }

        let total: usize = per_node.iter().map(Vec::len).sum();
        if total == 0 {
            return Err(ErrorDescriptor::new(
                ErrorCode::IllegalCommandArgument,
                "no unassigned tuples to fragment",
            ));
        }
        let chunk = total.div_ceil(self.target_fragments);

        let mut formed = 0usize;
        for tuples in per_node {
            for group in tuples.chunks(chunk) {
                formed += 1;
                let fragment = FragmentId(format!("{}{formed}", self.prefix));
                let members: BTreeSet<TupleId> = group.iter().cloned().collect();
                write
                    .form_fragment(&fragment, &members)
                    .await
                    .raise_on_error()?;
            }
        }

        info!(fragments = formed, chunk, tuples = total, "fragmentation finished");
        Ok(false)
    }
}
