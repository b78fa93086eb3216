//! Registry lifecycle orchestration.
//!
//! Drives the registry from an arbitrary state into a reproducible starting
//! point. The sequence in [`RegistryLifecycleOrchestrator::initialize`] is
//! strictly ordered: each step, including the verified mode switch that
//! precedes it, must complete before the next one is issued. Any failure
//! aborts the whole sequence; re-running `initialize` is safe because it
//! starts with a flush.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use mdde_registry::{
    BenchmarkReport, FragmentId, NodeId, RegistryControlPort, RegistryMode, RegistryReadPort,
    RegistryWritePort, SnapshotHandle, Workload,
};
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::error::{EnvError, EnvResult, EnvelopeExt, Phase};
use crate::fragmenter::Fragmenter;
use crate::obs;

/// The three registry capabilities, shared behind trait objects.
#[derive(Clone)]
pub struct RegistryPorts {
    pub control: Arc<dyn RegistryControlPort>,
    pub write: Arc<dyn RegistryWritePort>,
    pub read: Arc<dyn RegistryReadPort>,
}

impl RegistryPorts {
    /// Use one client for all three ports.
    pub fn from_client<C>(client: Arc<C>) -> Self
    where
        C: RegistryControlPort + RegistryWritePort + RegistryReadPort + 'static,
    {
        Self {
            control: client.clone(),
            write: client.clone(),
            read: client,
        }
    }
}

impl std::fmt::Debug for RegistryPorts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryPorts").finish_non_exhaustive()
    }
}

/// Summary of a successful initialization.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InitializationReport {
    /// Rollback target for `reset`.
    pub snapshot: SnapshotHandle,
    /// Node order of the initial allocation. Filled by the environment.
    pub nodes: Vec<NodeId>,
    /// Fragment order of the initial allocation. Filled by the environment.
    pub fragments: Vec<FragmentId>,
    /// Whether the fragmenter requested a registry to data sync.
    pub shuffled: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Owns the mode protocol and the initialization sequence.
#[derive(Debug)]
pub struct RegistryLifecycleOrchestrator {
    ports: RegistryPorts,
    default_snapshot: Option<SnapshotHandle>,
}

impl RegistryLifecycleOrchestrator {
    pub fn new(ports: RegistryPorts) -> Self {
        Self {
            ports,
            default_snapshot: None,
        }
    }

    pub fn ports(&self) -> &RegistryPorts {
        &self.ports
    }

    /// Snapshot retained by the last successful `initialize`.
    pub fn default_snapshot(&self) -> Option<&SnapshotHandle> {
        self.default_snapshot.as_ref()
    }

    /// Forget the retained snapshot so `reset` refuses until the next
    /// successful `initialize`.
    pub(crate) fn invalidate(&mut self) {
        self.default_snapshot = None;
    }

    /// Bring the registry into a fresh, snapshotted state.
    ///
    /// Sequence: Shuffle, flush, populate nodes, Benchmark, generate data,
    /// fragment, Shuffle, optional registry to data sync, default snapshot.
    #[instrument(skip_all, fields(workload = %workload.id))]
    pub async fn initialize(
        &mut self,
        workload: &Workload,
        fragmenter: &dyn Fragmenter,
    ) -> EnvResult<InitializationReport> {
        let started_at = Utc::now();
        let clock = Instant::now();
        // A flush invalidates whatever snapshot was retained before.
        self.default_snapshot = None;

        match self.run_sequence(workload, fragmenter).await {
            Ok((snapshot, shuffled)) => {
                obs::emit_init_finished(
                    snapshot.as_str(),
                    shuffled,
                    clock.elapsed().as_millis() as u64,
                );
                self.default_snapshot = Some(snapshot.clone());
                Ok(InitializationReport {
                    snapshot,
                    nodes: Vec::new(),
                    fragments: Vec::new(),
                    shuffled,
                    started_at,
                    finished_at: Utc::now(),
                })
            }
            Err(err) => {
                obs::emit_init_failed(err.phase(), &err);
                Err(err)
            }
        }
    }

    async fn run_sequence(
        &self,
        workload: &Workload,
        fragmenter: &dyn Fragmenter,
    ) -> EnvResult<(SnapshotHandle, bool)> {
        let control = self.ports.control.as_ref();

        self.switch_mode(RegistryMode::Shuffle, Phase::ShuffleBeforeFlush)
            .await?;
        obs::emit_phase_completed(Phase::ShuffleBeforeFlush);

        control.flush().await.in_phase(Phase::Flush)?;
        obs::emit_phase_completed(Phase::Flush);

        control
            .populate_default_nodes()
            .await
            .in_phase(Phase::PopulateNodes)?;
        obs::emit_phase_completed(Phase::PopulateNodes);

        self.switch_mode(RegistryMode::Benchmark, Phase::BenchmarkBeforeGeneration)
            .await?;
        obs::emit_phase_completed(Phase::BenchmarkBeforeGeneration);

        let generated = control
            .generate_data(workload)
            .await
            .in_phase(Phase::GenerateData)?;
        if generated != Some(true) {
            return Err(EnvError::DataGenerationEmpty);
        }
        obs::emit_phase_completed(Phase::GenerateData);

        let shuffled = fragmenter
            .run_fragmentation(self.ports.read.as_ref(), self.ports.write.as_ref())
            .await
            .map_err(|source| EnvError::Transport {
                phase: Phase::Fragmentation,
                source,
            })?;
        obs::emit_phase_completed(Phase::Fragmentation);

        self.switch_mode(RegistryMode::Shuffle, Phase::ShuffleAfterFragmentation)
            .await?;
        obs::emit_phase_completed(Phase::ShuffleAfterFragmentation);

        if shuffled {
            control
                .sync_registry_to_data()
                .await
                .in_phase(Phase::SyncRegistryToData)?;
            obs::emit_phase_completed(Phase::SyncRegistryToData);
        }

        let snapshot = control
            .snapshot_create(true)
            .await
            .in_phase(Phase::SnapshotCreate)?
            .filter(|handle| !handle.is_blank())
            .ok_or(EnvError::SnapshotCreation)?;
        obs::emit_phase_completed(Phase::SnapshotCreate);

        Ok((snapshot, shuffled))
    }

    /// Make sure the registry is in `target` mode.
    ///
    /// Queries the mode first and issues at most one switch call.
    pub async fn ensure_mode(&self, target: RegistryMode) -> EnvResult<()> {
        self.switch_mode(target, Phase::ModeSwitch).await
    }

    async fn switch_mode(&self, target: RegistryMode, phase: Phase) -> EnvResult<()> {
        if target == RegistryMode::Unknown {
            return Err(EnvError::RegistryState {
                phase,
                detail: "cannot switch the registry into the unknown mode".to_string(),
            });
        }
        let control = self.ports.control.as_ref();
        let current = control
            .get_mode()
            .await
            .in_phase(phase)?
            .unwrap_or(RegistryMode::Unknown);

        if current == target {
            debug!(mode = %current, "registry already in target mode");
            return Ok(());
        }
        if current == RegistryMode::Unknown {
            return Err(EnvError::RegistryState {
                phase,
                detail: "registry reports an unknown mode".to_string(),
            });
        }

        let switched = if target == RegistryMode::Benchmark {
            control.set_benchmark_mode().await
        } else {
            control.set_shuffle_mode().await
        };
        switched.in_phase(phase)?;

        let verified = control
            .get_mode()
            .await
            .in_phase(phase)?
            .unwrap_or(RegistryMode::Unknown);
        if verified != target {
            return Err(EnvError::RegistryState {
                phase,
                detail: format!("registry reports {verified} mode after switching to {target}"),
            });
        }
        obs::emit_mode_switched(&current.to_string(), &target.to_string());
        Ok(())
    }

    /// Roll the registry back to the retained default snapshot.
    #[instrument(skip_all)]
    pub async fn reset(&self) -> EnvResult<()> {
        let snapshot = self
            .default_snapshot
            .as_ref()
            .ok_or(EnvError::NotInitialized)?;
        self.switch_mode(RegistryMode::Shuffle, Phase::Reset).await?;
        self.ports
            .control
            .reset_to_default_snapshot()
            .await
            .in_phase(Phase::Reset)?;
        obs::emit_reset(snapshot.as_str());
        Ok(())
    }

    /// Run a benchmark and leave the registry in Shuffle mode again.
    #[instrument(skip_all, fields(workload = %workload.id, workers = workers))]
    pub async fn run_benchmark(
        &self,
        workload: &Workload,
        workers: u32,
    ) -> EnvResult<BenchmarkReport> {
        self.switch_mode(RegistryMode::Benchmark, Phase::Benchmark)
            .await?;
        let outcome = self
            .ports
            .control
            .run_benchmark(workload, workers)
            .await
            .in_phase(Phase::Benchmark);
        // Restore Shuffle even when the run failed; report the run error.
        let restored = self.switch_mode(RegistryMode::Shuffle, Phase::Benchmark).await;
        if let Err(err) = &restored {
            warn!(error = %err, "failed to return to shuffle mode after benchmark");
        }

        let report = outcome?.ok_or_else(|| EnvError::RegistryState {
            phase: Phase::Benchmark,
            detail: "benchmark returned no report".to_string(),
        })?;
        restored?;
        obs::emit_benchmark_finished(report.throughput, report.nodes.len());
        Ok(report)
    }
}
