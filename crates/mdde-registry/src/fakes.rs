//! In-memory registry (testing only)
//!
//! `MemoryRegistry` implements all three ports without any network or
//! external process. It enforces the same mode gating and placement
//! constraints as the real registry, records every call in order, and
//! supports one-shot fault injection per operation.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde::Serialize;

use crate::envelope::{ErrorCode, ErrorDescriptor, ResultEnvelope};
use crate::ports::*;

/// Operations recorded in the call log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistryOp {
    GetMode,
    SetBenchmarkMode,
    SetShuffleMode,
    Flush,
    PopulateDefaultNodes,
    GenerateData,
    SyncRegistryToData,
    SnapshotCreate,
    ResetToDefaultSnapshot,
    RunBenchmark,
    CopyFragment,
    DeleteFragment,
    FormFragment,
    ListNodes,
    ListNodeFragments,
    ListNodeUnassignedTuples,
    CountFragmentCopies,
    FindFragment,
    ReadFragmentMeta,
    ReadFragmentMetaGlobal,
    ReadAllFragmentsWithMeta,
    Dump,
}

/// Canned answer for the next call of an operation.
#[derive(Debug, Clone)]
pub enum Injection {
    /// Fail with the given descriptor.
    Fail(ErrorDescriptor),
    /// Succeed without a value.
    Empty,
}

impl Injection {
    fn into_envelope<T>(self) -> ResultEnvelope<T> {
        match self {
            Injection::Fail(err) => ResultEnvelope::failure(err),
            Injection::Empty => ResultEnvelope::empty(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
struct NodeContents {
    unassigned: BTreeSet<TupleId>,
    fragments: BTreeSet<FragmentId>,
}

#[derive(Debug, Clone, Default, Serialize)]
struct Layout {
    nodes: BTreeMap<NodeId, NodeContents>,
    fragments: BTreeMap<FragmentId, BTreeSet<TupleId>>,
    meta: BTreeMap<FragmentId, BTreeMap<NodeId, MetaValues>>,
    global_meta: BTreeMap<FragmentId, MetaValues>,
}

impl Layout {
    fn node(&self, node: &NodeId) -> Result<&NodeContents, ErrorDescriptor> {
        self.nodes.get(node).ok_or_else(|| unknown("node", node))
    }

    fn node_mut(&mut self, node: &NodeId) -> Result<&mut NodeContents, ErrorDescriptor> {
        self.nodes.get_mut(node).ok_or_else(|| unknown("node", node))
    }

    fn ensure_fragment(&self, fragment: &FragmentId) -> Result<(), ErrorDescriptor> {
        if self.fragments.contains_key(fragment) {
            Ok(())
        } else {
            Err(unknown("fragment", fragment))
        }
    }

    fn holders(&self, fragment: &FragmentId) -> BTreeSet<NodeId> {
        self.nodes
            .iter()
            .filter(|(_, contents)| contents.fragments.contains(fragment))
            .map(|(id, _)| id.clone())
            .collect()
    }
}

fn unknown(kind: &str, id: &dyn std::fmt::Display) -> ErrorDescriptor {
    ErrorDescriptor::new(ErrorCode::UnknownEntityId, format!("unknown {kind} {id}"))
}

#[derive(Debug)]
struct State {
    mode: RegistryMode,
    default_nodes: Vec<NodeId>,
    data_home: Option<NodeId>,
    layout: Layout,
    snapshots: HashMap<String, Layout>,
    default_snapshot: Option<String>,
    next_tuple: u64,
    injections: HashMap<RegistryOp, Injection>,
    calls: Vec<RegistryOp>,
}

impl State {
    fn require(&self, mode: RegistryMode, operation: &str) -> Result<(), ErrorDescriptor> {
        if self.mode == mode {
            return Ok(());
        }
        Err(ErrorDescriptor::new(
            ErrorCode::IncorrectRegistryMode,
            format!("{operation} requires {mode} mode, registry is in {} mode", self.mode),
        ))
    }

    fn switch(&mut self, target: RegistryMode) -> Result<(), ErrorDescriptor> {
        if self.mode == target {
            return Err(ErrorDescriptor::new(
                ErrorCode::RegistryModeAlreadySet,
                format!("registry is already in {target} mode"),
            ));
        }
        self.mode = target;
        Ok(())
    }

    fn generate(&mut self, workload: &Workload) -> Result<bool, ErrorDescriptor> {
        self.require(RegistryMode::Benchmark, "data generation")?;
        if workload.records == 0 || self.layout.nodes.is_empty() {
            return Ok(false);
        }
        if let Some(home) = &self.data_home {
            self.layout.node(home)?;
        }
        let targets: Vec<NodeId> = match &self.data_home {
            Some(home) => vec![home.clone()],
            None => self.layout.nodes.keys().cloned().collect(),
        };
        for i in 0..workload.records {
            self.next_tuple += 1;
            let tuple = TupleId(format!("t{}", self.next_tuple));
            let node = &targets[(i as usize) % targets.len()];
            self.layout.node_mut(node)?.unassigned.insert(tuple);
        }
        Ok(true)
    }

    fn benchmark(&self, workers: u32) -> Result<BenchmarkReport, ErrorDescriptor> {
        self.require(RegistryMode::Benchmark, "benchmark")?;
        if workers == 0 {
            return Err(ErrorDescriptor::new(
                ErrorCode::IllegalCommandArgument,
                "benchmark needs at least one worker",
            ));
        }
        let mut reads: BTreeMap<NodeId, BTreeMap<FragmentId, u64>> = self
            .layout
            .nodes
            .keys()
            .map(|n| (n.clone(), BTreeMap::new()))
            .collect();
        // Every tuple is read once; reads of a fragment are split across its holders.
        for (fragment, tuples) in &self.layout.fragments {
            let holders = self.layout.holders(fragment);
            if holders.is_empty() {
                continue;
            }
            let total = tuples.len() as u64;
            let base = total / holders.len() as u64;
            let remainder = total % holders.len() as u64;
            for (i, node) in holders.iter().enumerate() {
                let share = base + u64::from((i as u64) < remainder);
                if let Some(node_reads) = reads.get_mut(node) {
                    node_reads.insert(fragment.clone(), share);
                }
            }
        }
        let total: u64 = reads.values().flat_map(|m| m.values()).sum();
        let busiest = reads
            .values()
            .map(|m| m.values().sum::<u64>())
            .max()
            .unwrap_or(0);
        let throughput = if busiest == 0 {
            0.0
        } else {
            total as f64 / busiest as f64 * f64::from(workers)
        };
        Ok(BenchmarkReport {
            throughput,
            nodes: reads
                .into_iter()
                .map(|(node, fragment_reads)| NodeBenchmarkStats {
                    node,
                    fragment_reads,
                })
                .collect(),
        })
    }

    fn copy(
        &mut self,
        source: &NodeId,
        destination: &NodeId,
        fragment: &FragmentId,
    ) -> Result<(), ErrorDescriptor> {
        self.require(RegistryMode::Shuffle, "fragment copy")?;
        if source == destination {
            return Err(ErrorDescriptor::new(
                ErrorCode::LocalFragmentReplication,
                format!("cannot copy fragment {fragment} onto its own node {source}"),
            ));
        }
        self.layout.ensure_fragment(fragment)?;
        if !self.layout.node(source)?.fragments.contains(fragment) {
            return Err(ErrorDescriptor::new(
                ErrorCode::IncorrectFragmentLocation,
                format!("fragment {fragment} is not located on node {source}"),
            ));
        }
        let dst = self.layout.node_mut(destination)?;
        if !dst.fragments.insert(fragment.clone()) {
            return Err(ErrorDescriptor::new(
                ErrorCode::DuplicateFragmentReplication,
                format!("fragment {fragment} is already located on node {destination}"),
            ));
        }
        Ok(())
    }

    fn delete(&mut self, node: &NodeId, fragment: &FragmentId) -> Result<(), ErrorDescriptor> {
        self.require(RegistryMode::Shuffle, "fragment removal")?;
        self.layout.ensure_fragment(fragment)?;
        if !self.layout.node(node)?.fragments.contains(fragment) {
            return Err(ErrorDescriptor::new(
                ErrorCode::IncorrectFragmentLocation,
                format!("fragment {fragment} is not located on node {node}"),
            ));
        }
        if self.layout.holders(fragment).len() == 1 {
            return Err(ErrorDescriptor::new(
                ErrorCode::UniqueFragmentRemoval,
                format!("node {node} holds the only exemplar of fragment {fragment}"),
            ));
        }
        self.layout.node_mut(node)?.fragments.remove(fragment);
        if let Some(per_node) = self.layout.meta.get_mut(fragment) {
            per_node.remove(node);
        }
        Ok(())
    }

    fn form(
        &mut self,
        fragment: &FragmentId,
        tuples: &BTreeSet<TupleId>,
    ) -> Result<(), ErrorDescriptor> {
        let Some(first) = tuples.iter().next() else {
            return Err(ErrorDescriptor::new(
                ErrorCode::IllegalCommandArgument,
                "a fragment needs at least one tuple",
            ));
        };
        if self.layout.fragments.contains_key(fragment) {
            return Err(ErrorDescriptor::new(
                ErrorCode::DuplicateEntity,
                format!("fragment {fragment} already exists"),
            ));
        }
        let home = self
            .layout
            .nodes
            .iter()
            .find(|(_, contents)| contents.unassigned.contains(first))
            .map(|(id, _)| id.clone())
            .ok_or_else(|| unknown("unassigned tuple", first))?;
        let contents = self.layout.node_mut(&home)?;
        if !tuples.iter().all(|t| contents.unassigned.contains(t)) {
            return Err(ErrorDescriptor::new(
                ErrorCode::NonColocatedFragmentFormation,
                format!("tuples of fragment {fragment} are not all unassigned on node {home}"),
            ));
        }
        for tuple in tuples {
            contents.unassigned.remove(tuple);
        }
        contents.fragments.insert(fragment.clone());
        self.layout
            .fragments
            .insert(fragment.clone(), tuples.clone());
        Ok(())
    }

    fn meta(&self, fragment: &FragmentId, node: &NodeId, tag: &str) -> Result<String, ErrorDescriptor> {
        self.layout.ensure_fragment(fragment)?;
        if !self.layout.node(node)?.fragments.contains(fragment) {
            return Err(ErrorDescriptor::new(
                ErrorCode::IncorrectFragmentLocation,
                format!("fragment {fragment} is not located on node {node}"),
            ));
        }
        self.layout
            .meta
            .get(fragment)
            .and_then(|per_node| per_node.get(node))
            .and_then(|tags| tags.get(tag))
            .cloned()
            .ok_or_else(|| {
                ErrorDescriptor::new(
                    ErrorCode::DataKeyNotFound,
                    format!("no meta tag {tag} on fragment {fragment} at node {node}"),
                )
            })
    }

    fn global_meta(&self, fragment: &FragmentId, tag: &str) -> Result<String, ErrorDescriptor> {
        self.layout.ensure_fragment(fragment)?;
        self.layout
            .global_meta
            .get(fragment)
            .and_then(|tags| tags.get(tag))
            .cloned()
            .ok_or_else(|| {
                ErrorDescriptor::new(
                    ErrorCode::DataKeyNotFound,
                    format!("no global meta tag {tag} on fragment {fragment}"),
                )
            })
    }

    fn catalog(&self, local_tags: &[String], global_tags: &[String]) -> FragmentCatalog {
        let pick = |values: &MetaValues, tags: &[String]| -> MetaValues {
            values
                .iter()
                .filter(|(tag, _)| tags.contains(tag))
                .map(|(tag, value)| (tag.clone(), value.clone()))
                .collect()
        };

        let nodes = self
            .layout
            .nodes
            .iter()
            .map(|(id, contents)| (id.clone(), contents.fragments.clone()))
            .collect();

        let mut local_meta: BTreeMap<FragmentId, BTreeMap<NodeId, MetaValues>> = BTreeMap::new();
        for (fragment, per_node) in &self.layout.meta {
            for (node, values) in per_node {
                let picked = pick(values, local_tags);
                if !picked.is_empty() {
                    local_meta
                        .entry(fragment.clone())
                        .or_default()
                        .insert(node.clone(), picked);
                }
            }
        }

        let global_meta = self
            .layout
            .global_meta
            .iter()
            .map(|(fragment, values)| (fragment.clone(), pick(values, global_tags)))
            .filter(|(_, picked)| !picked.is_empty())
            .collect();

        FragmentCatalog {
            nodes,
            local_meta,
            global_meta,
        }
    }
}

/// In-memory registry backed by a single mutex-guarded state.
#[derive(Debug)]
pub struct MemoryRegistry {
    state: Mutex<State>,
}

impl MemoryRegistry {
    /// Registry whose default node set is `nodes`, starting empty in
    /// `Shuffle` mode.
    pub fn new<I, N>(nodes: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<NodeId>,
    {
        Self {
            state: Mutex::new(State {
                mode: RegistryMode::Shuffle,
                default_nodes: nodes.into_iter().map(Into::into).collect(),
                data_home: None,
                layout: Layout::default(),
                snapshots: HashMap::new(),
                default_snapshot: None,
                next_tuple: 0,
                injections: HashMap::new(),
                calls: Vec::new(),
            }),
        }
    }

    pub fn with_mode(self, mode: RegistryMode) -> Self {
        self.lock().mode = mode;
        self
    }

    /// Place every generated tuple on `node` instead of spreading them.
    pub fn with_data_home(self, node: impl Into<NodeId>) -> Self {
        self.lock().data_home = Some(node.into());
        self
    }

    /// Answer the next call of `op` with `injection`.
    pub fn inject(&self, op: RegistryOp, injection: Injection) {
        self.lock().injections.insert(op, injection);
    }

    pub fn mode(&self) -> RegistryMode {
        self.lock().mode
    }

    /// Force the mode without going through the port (simulates a reconnect).
    pub fn force_mode(&self, mode: RegistryMode) {
        self.lock().mode = mode;
    }

    pub fn calls(&self) -> Vec<RegistryOp> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self, op: RegistryOp) -> usize {
        self.lock().calls.iter().filter(|c| **c == op).count()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn snapshot_count(&self) -> usize {
        self.lock().snapshots.len()
    }

    pub fn set_fragment_meta(
        &self,
        fragment: &FragmentId,
        node: &NodeId,
        tag: impl Into<String>,
        value: impl Into<String>,
    ) {
        self.lock()
            .layout
            .meta
            .entry(fragment.clone())
            .or_default()
            .entry(node.clone())
            .or_default()
            .insert(tag.into(), value.into());
    }

    pub fn set_fragment_meta_global(
        &self,
        fragment: &FragmentId,
        tag: impl Into<String>,
        value: impl Into<String>,
    ) {
        self.lock()
            .layout
            .global_meta
            .entry(fragment.clone())
            .or_default()
            .insert(tag.into(), value.into());
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    fn run<T>(
        &self,
        op: RegistryOp,
        f: impl FnOnce(&mut State) -> Result<T, ErrorDescriptor>,
    ) -> ResultEnvelope<T> {
        let mut state = self.lock();
        state.calls.push(op);
        if let Some(injection) = state.injections.remove(&op) {
            return injection.into_envelope();
        }
        f(&mut state).into()
    }
}

#[async_trait]
impl RegistryControlPort for MemoryRegistry {
    async fn get_mode(&self) -> ResultEnvelope<RegistryMode> {
        self.run(RegistryOp::GetMode, |s| Ok(s.mode))
    }

    async fn set_benchmark_mode(&self) -> ResultEnvelope<()> {
        self.run(RegistryOp::SetBenchmarkMode, |s| {
            s.switch(RegistryMode::Benchmark)
        })
    }

    async fn set_shuffle_mode(&self) -> ResultEnvelope<()> {
        self.run(RegistryOp::SetShuffleMode, |s| s.switch(RegistryMode::Shuffle))
    }

    async fn flush(&self) -> ResultEnvelope<()> {
        self.run(RegistryOp::Flush, |s| {
            s.require(RegistryMode::Shuffle, "flush")?;
            s.layout = Layout::default();
            s.snapshots.clear();
            s.default_snapshot = None;
            s.next_tuple = 0;
            Ok(())
        })
    }

    async fn populate_default_nodes(&self) -> ResultEnvelope<()> {
        self.run(RegistryOp::PopulateDefaultNodes, |s| {
            s.require(RegistryMode::Shuffle, "node population")?;
            if !s.layout.nodes.is_empty() {
                return Err(ErrorDescriptor::new(
                    ErrorCode::SeedNonEmptyRegistry,
                    "nodes can only be populated in an empty registry",
                ));
            }
            for node in s.default_nodes.clone() {
                s.layout.nodes.insert(node, NodeContents::default());
            }
            Ok(())
        })
    }

    async fn generate_data(&self, workload: &Workload) -> ResultEnvelope<bool> {
        self.run(RegistryOp::GenerateData, |s| s.generate(workload))
    }

    async fn sync_registry_to_data(&self) -> ResultEnvelope<()> {
        self.run(RegistryOp::SyncRegistryToData, |s| {
            s.require(RegistryMode::Shuffle, "registry to data sync")
        })
    }

    async fn snapshot_create(&self, is_default: bool) -> ResultEnvelope<SnapshotHandle> {
        self.run(RegistryOp::SnapshotCreate, |s| {
            let id = uuid::Uuid::new_v4().to_string();
            s.snapshots.insert(id.clone(), s.layout.clone());
            if is_default {
                s.default_snapshot = Some(id.clone());
            }
            Ok(SnapshotHandle(id))
        })
    }

    async fn reset_to_default_snapshot(&self) -> ResultEnvelope<()> {
        self.run(RegistryOp::ResetToDefaultSnapshot, |s| {
            s.require(RegistryMode::Shuffle, "reset")?;
            let layout = s
                .default_snapshot
                .as_ref()
                .and_then(|id| s.snapshots.get(id))
                .cloned()
                .ok_or_else(|| {
                    ErrorDescriptor::new(ErrorCode::UnknownEntityId, "no default snapshot")
                })?;
            s.layout = layout;
            Ok(())
        })
    }

    async fn run_benchmark(
        &self,
        _workload: &Workload,
        workers: u32,
    ) -> ResultEnvelope<BenchmarkReport> {
        self.run(RegistryOp::RunBenchmark, |s| s.benchmark(workers))
    }
}

#[async_trait]
impl RegistryWritePort for MemoryRegistry {
    async fn copy_fragment(
        &self,
        source: &NodeId,
        destination: &NodeId,
        fragment: &FragmentId,
    ) -> ResultEnvelope<()> {
        self.run(RegistryOp::CopyFragment, |s| {
            s.copy(source, destination, fragment)
        })
    }

    async fn delete_fragment(&self, node: &NodeId, fragment: &FragmentId) -> ResultEnvelope<()> {
        self.run(RegistryOp::DeleteFragment, |s| s.delete(node, fragment))
    }

    async fn form_fragment(
        &self,
        fragment: &FragmentId,
        tuples: &BTreeSet<TupleId>,
    ) -> ResultEnvelope<()> {
        self.run(RegistryOp::FormFragment, |s| s.form(fragment, tuples))
    }
}

#[async_trait]
impl RegistryReadPort for MemoryRegistry {
    async fn list_nodes(&self) -> ResultEnvelope<BTreeSet<NodeId>> {
        self.run(RegistryOp::ListNodes, |s| {
            Ok(s.layout.nodes.keys().cloned().collect())
        })
    }

    async fn list_node_fragments(&self, node: &NodeId) -> ResultEnvelope<BTreeSet<FragmentId>> {
        self.run(RegistryOp::ListNodeFragments, |s| {
            Ok(s.layout.node(node)?.fragments.clone())
        })
    }

    async fn list_node_unassigned_tuples(
        &self,
        node: &NodeId,
    ) -> ResultEnvelope<BTreeSet<TupleId>> {
        self.run(RegistryOp::ListNodeUnassignedTuples, |s| {
            Ok(s.layout.node(node)?.unassigned.clone())
        })
    }

    async fn count_fragment_copies(&self, fragment: &FragmentId) -> ResultEnvelope<u32> {
        self.run(RegistryOp::CountFragmentCopies, |s| {
            s.layout.ensure_fragment(fragment)?;
            Ok(s.layout.holders(fragment).len() as u32)
        })
    }

    async fn find_fragment(&self, fragment: &FragmentId) -> ResultEnvelope<BTreeSet<NodeId>> {
        self.run(RegistryOp::FindFragment, |s| {
            s.layout.ensure_fragment(fragment)?;
            Ok(s.layout.holders(fragment))
        })
    }

    async fn read_fragment_meta(
        &self,
        fragment: &FragmentId,
        node: &NodeId,
        tag: &str,
    ) -> ResultEnvelope<String> {
        self.run(RegistryOp::ReadFragmentMeta, |s| s.meta(fragment, node, tag))
    }

    async fn read_fragment_meta_global(
        &self,
        fragment: &FragmentId,
        tag: &str,
    ) -> ResultEnvelope<String> {
        self.run(RegistryOp::ReadFragmentMetaGlobal, |s| {
            s.global_meta(fragment, tag)
        })
    }

    async fn read_all_fragments_with_meta(
        &self,
        local_tags: &[String],
        global_tags: &[String],
    ) -> ResultEnvelope<FragmentCatalog> {
        self.run(RegistryOp::ReadAllFragmentsWithMeta, |s| {
            Ok(s.catalog(local_tags, global_tags))
        })
    }

    async fn dump(&self) -> ResultEnvelope<serde_json::Value> {
        self.run(RegistryOp::Dump, |s| {
            let mut value = serde_json::to_value(&s.layout).map_err(|e| {
                ErrorDescriptor::new(ErrorCode::ResponseSerialization, e.to_string())
            })?;
            value["mode"] = serde_json::Value::String(s.mode.to_string());
            Ok(value)
        })
    }
}
