//! TCP client for the registry control endpoint.
//!
//! Implements all three ports over the framed JSON protocol in
//! [`crate::protocol`]. Transport failures never escape as errors: they are
//! folded into failed envelopes, and the cached connection is dropped so the
//! next call reconnects.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use crate::envelope::ResultEnvelope;
use crate::error::{ClientError, ConfigError};
use crate::ports::*;
use crate::protocol::*;

/// Connection settings for the registry control endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryClientConfig {
    pub host: String,
    pub port: u16,
    /// Keep one connection open across calls instead of connecting per call.
    pub keep_open: bool,
    /// Per-call deadline covering connect, send and receive.
    pub timeout: Duration,
}

impl Default for RegistryClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8942,
            keep_open: true,
            timeout: Duration::from_secs(600),
        }
    }
}

impl RegistryClientConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn with_keep_open(mut self, keep_open: bool) -> Self {
        self.keep_open = keep_open;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Create from environment variables
    ///
    /// Reads:
    /// - MDDE_REGISTRY_HOST (optional, default: "localhost")
    /// - MDDE_REGISTRY_PORT (optional, default: 8942)
    /// - MDDE_REGISTRY_KEEP_OPEN (optional, default: "true")
    /// - MDDE_REGISTRY_TIMEOUT_MS (optional, default: 600000)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(host) = lookup("MDDE_REGISTRY_HOST") {
            config.host = host;
        }
        if let Some(raw) = lookup("MDDE_REGISTRY_PORT") {
            config.port = raw.parse().map_err(|_| ConfigError::InvalidVar {
                name: "MDDE_REGISTRY_PORT".to_string(),
                value: raw.clone(),
            })?;
        }
        if let Some(raw) = lookup("MDDE_REGISTRY_KEEP_OPEN") {
            config.keep_open = raw.to_lowercase() == "true";
        }
        if let Some(raw) = lookup("MDDE_REGISTRY_TIMEOUT_MS") {
            let ms: u64 = raw.parse().map_err(|_| ConfigError::InvalidVar {
                name: "MDDE_REGISTRY_TIMEOUT_MS".to_string(),
                value: raw.clone(),
            })?;
            config.timeout = Duration::from_millis(ms);
        }
        Ok(config)
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Registry client speaking the framed JSON protocol over TCP.
pub struct RegistryClientTcp {
    config: RegistryClientConfig,
    stream: Mutex<Option<TcpStream>>,
}

impl RegistryClientTcp {
    pub fn new(config: RegistryClientConfig) -> Self {
        Self {
            config,
            stream: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &RegistryClientConfig {
        &self.config
    }

    /// Drop the cached connection, if any.
    pub async fn close(&self) {
        self.stream.lock().await.take();
    }

    async fn call<T: DeserializeOwned>(&self, request: Request) -> ResultEnvelope<T> {
        let command = request.cmd;
        let timeout_ms = self.config.timeout.as_millis() as u64;
        let outcome = tokio::time::timeout(self.config.timeout, self.exchange(&request)).await;
        let response = match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                warn!(command, error = %err, "registry call failed");
                return ResultEnvelope::failure(err.into());
            }
            Err(_) => {
                // The exchange was cut mid-flight; the stream may hold a stale reply.
                self.close().await;
                let err = ClientError::Timeout {
                    command: command.to_string(),
                    timeout_ms,
                };
                warn!(command, error = %err, "registry call timed out");
                return ResultEnvelope::failure(err.into());
            }
        };
        response.into_envelope()
    }

    async fn exchange(&self, request: &Request) -> Result<Response, ClientError> {
        let payload = request.encode()?;
        let mut guard = self.stream.lock().await;
        let mut stream = match guard.take() {
            Some(stream) => stream,
            None => {
                debug!(address = %self.config.address(), "connecting to registry");
                TcpStream::connect(self.config.address()).await?
            }
        };
        let result = Self::round_trip(&mut stream, &payload).await;
        // A failed exchange leaves the stream in an unknown state; reconnect next time.
        if result.is_ok() && self.config.keep_open {
            *guard = Some(stream);
        }
        result
    }

    async fn round_trip(stream: &mut TcpStream, payload: &[u8]) -> Result<Response, ClientError> {
        write_frame(stream, payload).await?;
        let frame = read_frame(stream).await?;
        Response::decode(&frame)
    }
}

#[async_trait]
impl RegistryControlPort for RegistryClientTcp {
    #[instrument(skip(self))]
    async fn get_mode(&self) -> ResultEnvelope<RegistryMode> {
        self.call::<String>(Request::new(Command::GetMode))
            .await
            .map(|raw| RegistryMode::parse(&raw))
    }

    async fn set_benchmark_mode(&self) -> ResultEnvelope<()> {
        self.call(Request::new(Command::SetBenchmark)).await
    }

    async fn set_shuffle_mode(&self) -> ResultEnvelope<()> {
        self.call(Request::new(Command::SetShuffle)).await
    }

    async fn flush(&self) -> ResultEnvelope<()> {
        self.call(Request::new(Command::Flush)).await
    }

    async fn populate_default_nodes(&self) -> ResultEnvelope<()> {
        self.call(Request::new(Command::InitNodes)).await
    }

    #[instrument(skip(self), fields(workload = %workload.id))]
    async fn generate_data(&self, workload: &Workload) -> ResultEnvelope<bool> {
        self.call(Request::new(Command::GenerateData).arg(ARG_WORKLOAD_ID, workload.id.clone()))
            .await
    }

    async fn sync_registry_to_data(&self) -> ResultEnvelope<()> {
        self.call(Request::new(Command::SyncData)).await
    }

    async fn snapshot_create(&self, is_default: bool) -> ResultEnvelope<SnapshotHandle> {
        self.call(Request::new(Command::SnapshotCreate).arg(ARG_SNAPSHOT_DEFAULT, is_default))
            .await
    }

    async fn reset_to_default_snapshot(&self) -> ResultEnvelope<()> {
        self.call(Request::new(Command::Reset)).await
    }

    async fn run_benchmark(
        &self,
        workload: &Workload,
        workers: u32,
    ) -> ResultEnvelope<BenchmarkReport> {
        self.call(
            Request::new(Command::RunBenchmark)
                .arg(ARG_WORKLOAD_ID, workload.id.clone())
                .arg(ARG_WORKLOAD_WORKERS, workers),
        )
        .await
    }
}

#[async_trait]
impl RegistryWritePort for RegistryClientTcp {
    async fn copy_fragment(
        &self,
        source: &NodeId,
        destination: &NodeId,
        fragment: &FragmentId,
    ) -> ResultEnvelope<()> {
        self.call(
            Request::new(Command::CopyFragment)
                .arg(ARG_NODE_ID, source.as_str())
                .arg(ARG_SECOND_NODE_ID, destination.as_str())
                .arg(ARG_FRAGMENT_ID, fragment.as_str()),
        )
        .await
    }

    async fn delete_fragment(&self, node: &NodeId, fragment: &FragmentId) -> ResultEnvelope<()> {
        self.call(
            Request::new(Command::DeleteFragment)
                .arg(ARG_NODE_ID, node.as_str())
                .arg(ARG_FRAGMENT_ID, fragment.as_str()),
        )
        .await
    }

    async fn form_fragment(
        &self,
        fragment: &FragmentId,
        tuples: &BTreeSet<TupleId>,
    ) -> ResultEnvelope<()> {
        let tids: Vec<&str> = tuples.iter().map(TupleId::as_str).collect();
        self.call(
            Request::new(Command::FormFragment)
                .arg(ARG_FRAGMENT_ID, fragment.as_str())
                .arg(ARG_TUPLE_IDS, tids),
        )
        .await
    }
}

#[async_trait]
impl RegistryReadPort for RegistryClientTcp {
    async fn list_nodes(&self) -> ResultEnvelope<BTreeSet<NodeId>> {
        self.call(Request::new(Command::GetNodes)).await
    }

    async fn list_node_fragments(&self, node: &NodeId) -> ResultEnvelope<BTreeSet<FragmentId>> {
        self.call(Request::new(Command::GetNodeFragments).arg(ARG_NODE_ID, node.as_str()))
            .await
    }

    async fn list_node_unassigned_tuples(
        &self,
        node: &NodeId,
    ) -> ResultEnvelope<BTreeSet<TupleId>> {
        self.call(Request::new(Command::GetNodeUnassignedTuples).arg(ARG_NODE_ID, node.as_str()))
            .await
    }

    async fn count_fragment_copies(&self, fragment: &FragmentId) -> ResultEnvelope<u32> {
        self.call(Request::new(Command::CountFragment).arg(ARG_FRAGMENT_ID, fragment.as_str()))
            .await
    }

    async fn find_fragment(&self, fragment: &FragmentId) -> ResultEnvelope<BTreeSet<NodeId>> {
        self.call(Request::new(Command::FindFragment).arg(ARG_FRAGMENT_ID, fragment.as_str()))
            .await
    }

    async fn read_fragment_meta(
        &self,
        fragment: &FragmentId,
        node: &NodeId,
        tag: &str,
    ) -> ResultEnvelope<String> {
        self.call(
            Request::new(Command::GetFragmentMetaExemplar)
                .arg(ARG_FRAGMENT_ID, fragment.as_str())
                .arg(ARG_NODE_ID, node.as_str())
                .arg(ARG_FRAGMENT_META_TAG, tag),
        )
        .await
    }

    async fn read_fragment_meta_global(
        &self,
        fragment: &FragmentId,
        tag: &str,
    ) -> ResultEnvelope<String> {
        self.call(
            Request::new(Command::GetFragmentMetaGlobal)
                .arg(ARG_FRAGMENT_ID, fragment.as_str())
                .arg(ARG_FRAGMENT_META_TAG, tag),
        )
        .await
    }

    async fn read_all_fragments_with_meta(
        &self,
        local_tags: &[String],
        global_tags: &[String],
    ) -> ResultEnvelope<FragmentCatalog> {
        self.call(
            Request::new(Command::GetAllFragmentsWithMeta)
                .arg(ARG_FRAGMENT_LOCAL_META_TAGS, local_tags.to_vec())
                .arg(ARG_FRAGMENT_GLOBAL_META_TAGS, global_tags.to_vec()),
        )
        .await
    }

    async fn dump(&self) -> ResultEnvelope<serde_json::Value> {
        self.call(Request::new(Command::GetRegistry)).await
    }
}
