//! Capability interfaces of the registry.
//!
//! The registry is reached through three narrow ports:
//! - `RegistryControlPort`: mode switches, data lifecycle, snapshots, benchmarks
//! - `RegistryWritePort`: fragment placement mutations
//! - `RegistryReadPort`: allocation queries
//!
//! Every call returns a [`ResultEnvelope`]; callers check it before touching
//! the value. All traits are async and transport-agnostic. The TCP client in
//! [`crate::tcp`] and the in-memory fake in [`crate::fakes`] implement all
//! three.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::envelope::ResultEnvelope;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Opaque data node identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

/// Opaque fragment identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FragmentId(pub String);

/// Opaque tuple identifier. Tuples are grouped into fragments.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TupleId(pub String);

/// Handle of a registry snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotHandle(pub String);

macro_rules! string_id {
    ($($ty:ident),*) => {$(
        impl $ty {
            pub fn new(id: impl Into<String>) -> Self {
                $ty(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $ty {
            fn from(id: &str) -> Self {
                $ty(id.to_string())
            }
        }

        impl From<String> for $ty {
            fn from(id: String) -> Self {
                $ty(id)
            }
        }
    )*};
}

string_id!(NodeId, FragmentId, TupleId, SnapshotHandle);

impl SnapshotHandle {
    /// Registries sometimes answer with an empty string instead of no value.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

// ---------------------------------------------------------------------------
// Registry mode and workloads
// ---------------------------------------------------------------------------

/// Registry-wide execution mode.
///
/// `Benchmark` rejects fragment placement mutations, `Shuffle` permits them
/// but disallows benchmark traffic. `Unknown` is what a freshly connected
/// client must assume until the mode is queried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryMode {
    Unknown,
    Benchmark,
    Shuffle,
}

impl RegistryMode {
    /// Parse the registry's textual mode; anything unrecognised is `Unknown`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "benchmark" => RegistryMode::Benchmark,
            "shuffle" => RegistryMode::Shuffle,
            _ => RegistryMode::Unknown,
        }
    }
}

impl std::fmt::Display for RegistryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RegistryMode::Unknown => "unknown",
            RegistryMode::Benchmark => "benchmark",
            RegistryMode::Shuffle => "shuffle",
        };
        write!(f, "{s}")
    }
}

/// Synthetic workload the registry runs for data generation or benchmarks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workload {
    /// Workload tag understood by the registry (e.g. `read10000`).
    pub id: String,
    /// Number of records the workload generates. Only the in-memory
    /// registry uses this; the networked registry derives it from `id`.
    #[serde(default)]
    pub records: u64,
}

impl Workload {
    pub fn new(id: impl Into<String>, records: u64) -> Self {
        Self {
            id: id.into(),
            records,
        }
    }
}

/// Per-node benchmark statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeBenchmarkStats {
    pub node: NodeId,
    /// Reads served by this node, per fragment.
    pub fragment_reads: BTreeMap<FragmentId, u64>,
}

/// Meta values keyed by tag.
pub type MetaValues = BTreeMap<String, String>;

/// Full fragment catalogue with the requested meta values.
///
/// Only tags that were asked for and are set appear in the meta maps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentCatalog {
    /// Fragments held by each node.
    #[serde(default)]
    pub nodes: BTreeMap<NodeId, BTreeSet<FragmentId>>,
    /// Exemplar-bound meta: fragment, then node.
    #[serde(default)]
    pub local_meta: BTreeMap<FragmentId, BTreeMap<NodeId, MetaValues>>,
    #[serde(default)]
    pub global_meta: BTreeMap<FragmentId, MetaValues>,
}

/// Outcome of a benchmark run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkReport {
    pub throughput: f64,
    pub nodes: Vec<NodeBenchmarkStats>,
}

// ---------------------------------------------------------------------------
// Ports
// ---------------------------------------------------------------------------

/// Control surface: modes, data lifecycle and snapshots.
#[async_trait]
pub trait RegistryControlPort: Send + Sync {
    async fn get_mode(&self) -> ResultEnvelope<RegistryMode>;

    async fn set_benchmark_mode(&self) -> ResultEnvelope<()>;

    async fn set_shuffle_mode(&self) -> ResultEnvelope<()>;

    /// Discard all registry data.
    async fn flush(&self) -> ResultEnvelope<()>;

    /// (Re)create the configured default node set.
    async fn populate_default_nodes(&self) -> ResultEnvelope<()>;

    /// Synthesise the dataset. `false` means nothing was generated.
    async fn generate_data(&self, workload: &Workload) -> ResultEnvelope<bool>;

    /// Physically move tuples to match the registry's fragment placement.
    async fn sync_registry_to_data(&self) -> ResultEnvelope<()>;

    async fn snapshot_create(&self, is_default: bool) -> ResultEnvelope<SnapshotHandle>;

    /// Roll the registry back to its default snapshot.
    async fn reset_to_default_snapshot(&self) -> ResultEnvelope<()>;

    async fn run_benchmark(&self, workload: &Workload, workers: u32)
        -> ResultEnvelope<BenchmarkReport>;
}

/// Fragment placement mutations.
#[async_trait]
pub trait RegistryWritePort: Send + Sync {
    async fn copy_fragment(
        &self,
        source: &NodeId,
        destination: &NodeId,
        fragment: &FragmentId,
    ) -> ResultEnvelope<()>;

    async fn delete_fragment(&self, node: &NodeId, fragment: &FragmentId) -> ResultEnvelope<()>;

    /// Group unassigned, colocated tuples into a new fragment.
    async fn form_fragment(
        &self,
        fragment: &FragmentId,
        tuples: &BTreeSet<TupleId>,
    ) -> ResultEnvelope<()>;
}

/// Allocation queries.
#[async_trait]
pub trait RegistryReadPort: Send + Sync {
    async fn list_nodes(&self) -> ResultEnvelope<BTreeSet<NodeId>>;

    async fn list_node_fragments(&self, node: &NodeId) -> ResultEnvelope<BTreeSet<FragmentId>>;

    async fn list_node_unassigned_tuples(&self, node: &NodeId)
        -> ResultEnvelope<BTreeSet<TupleId>>;

    async fn count_fragment_copies(&self, fragment: &FragmentId) -> ResultEnvelope<u32>;

    /// Nodes holding an exemplar of `fragment`.
    async fn find_fragment(&self, fragment: &FragmentId) -> ResultEnvelope<BTreeSet<NodeId>>;

    async fn read_fragment_meta(
        &self,
        fragment: &FragmentId,
        node: &NodeId,
        tag: &str,
    ) -> ResultEnvelope<String>;

    /// Meta value attached to the fragment itself rather than an exemplar.
    async fn read_fragment_meta_global(
        &self,
        fragment: &FragmentId,
        tag: &str,
    ) -> ResultEnvelope<String>;

    /// Every node's fragments plus the requested local and global meta tags.
    async fn read_all_fragments_with_meta(
        &self,
        local_tags: &[String],
        global_tags: &[String],
    ) -> ResultEnvelope<FragmentCatalog>;

    /// Entire registry state, for debugging.
    async fn dump(&self) -> ResultEnvelope<serde_json::Value>;
}
