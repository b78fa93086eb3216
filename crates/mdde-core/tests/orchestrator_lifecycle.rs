//! Lifecycle tests for the registry orchestrator.
//!
//! Every test drives the in-memory registry and asserts on its call log, so
//! the ordering of the initialization sequence is pinned exactly.

use std::sync::Arc;

use async_trait::async_trait;
use mdde_core::*;
use mdde_registry::*;

fn registry() -> Arc<MemoryRegistry> {
    Arc::new(MemoryRegistry::new(["A", "B", "C"]).with_data_home("C"))
}

fn orchestrator(reg: &Arc<MemoryRegistry>) -> RegistryLifecycleOrchestrator {
    RegistryLifecycleOrchestrator::new(RegistryPorts::from_client(reg.clone()))
}

fn workload() -> Workload {
    Workload::new("read8", 8)
}

/// Lifecycle calls only, without mode queries and allocation reads.
fn mutations(reg: &MemoryRegistry) -> Vec<RegistryOp> {
    reg.calls()
        .into_iter()
        .filter(|op| {
            !matches!(
                op,
                RegistryOp::GetMode
                    | RegistryOp::ListNodes
                    | RegistryOp::ListNodeFragments
                    | RegistryOp::ListNodeUnassignedTuples
            )
        })
        .collect()
}

/// Node-local fragmentation that claims it moved tuples.
struct ShufflingFragmenter(NodeLocalFragmenter);

#[async_trait]
impl Fragmenter for ShufflingFragmenter {
    async fn run_fragmentation(
        &self,
        read: &dyn RegistryReadPort,
        write: &dyn RegistryWritePort,
    ) -> Result<bool, ErrorDescriptor> {
        self.0.run_fragmentation(read, write).await?;
        Ok(true)
    }
}

// ===========================================================================
// initialize()
// ===========================================================================

#[tokio::test]
async fn initialize_runs_sequence_in_order() {
    let reg = registry();
    let mut orch = orchestrator(&reg);

    let report = orch
        .initialize(&workload(), &NodeLocalFragmenter::new(4))
        .await
        .unwrap();

    use RegistryOp::*;
    assert_eq!(
        mutations(&reg),
        vec![
            Flush,
            PopulateDefaultNodes,
            SetBenchmarkMode,
            GenerateData,
            FormFragment,
            FormFragment,
            FormFragment,
            FormFragment,
            SetShuffleMode,
            SnapshotCreate,
        ]
    );
    assert!(!report.shuffled);
    assert!(report.finished_at >= report.started_at);
    assert_eq!(orch.default_snapshot(), Some(&report.snapshot));
    assert_eq!(reg.mode(), RegistryMode::Shuffle);
}

#[tokio::test]
async fn every_mode_switch_is_preceded_by_a_query() {
    let reg = registry();
    let mut orch = orchestrator(&reg);
    orch.initialize(&workload(), &NodeLocalFragmenter::new(4))
        .await
        .unwrap();

    let calls = reg.calls();
    assert_eq!(calls.first(), Some(&RegistryOp::GetMode));
    for (i, op) in calls.iter().enumerate() {
        if matches!(op, RegistryOp::SetBenchmarkMode | RegistryOp::SetShuffleMode) {
            assert_eq!(calls[i - 1], RegistryOp::GetMode, "switch at {i} not queried");
            assert_eq!(calls[i + 1], RegistryOp::GetMode, "switch at {i} not verified");
        }
    }
}

#[tokio::test]
async fn initialize_from_benchmark_mode_switches_first() {
    let reg = Arc::new(
        MemoryRegistry::new(["A", "B", "C"])
            .with_data_home("C")
            .with_mode(RegistryMode::Benchmark),
    );
    let mut orch = orchestrator(&reg);
    orch.initialize(&workload(), &NodeLocalFragmenter::new(4))
        .await
        .unwrap();

    let ops = mutations(&reg);
    assert_eq!(ops[0], RegistryOp::SetShuffleMode);
    assert_eq!(ops[1], RegistryOp::Flush);
}

#[tokio::test]
async fn unknown_mode_aborts_before_flush() {
    let reg = Arc::new(MemoryRegistry::new(["A"]).with_mode(RegistryMode::Unknown));
    let mut orch = orchestrator(&reg);

    let err = orch
        .initialize(&workload(), &NodeLocalFragmenter::new(2))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EnvError::RegistryState {
            phase: Phase::ShuffleBeforeFlush,
            ..
        }
    ));
    assert_eq!(reg.call_count(RegistryOp::Flush), 0);
    assert!(orch.default_snapshot().is_none());
}

#[tokio::test]
async fn empty_generation_stops_before_fragmentation() {
    let reg = registry();
    let mut orch = orchestrator(&reg);

    let err = orch
        .initialize(&Workload::new("nothing", 0), &NodeLocalFragmenter::new(4))
        .await
        .unwrap_err();
    assert!(matches!(err, EnvError::DataGenerationEmpty));
    assert_eq!(err.phase(), Some(Phase::GenerateData));
    assert_eq!(reg.call_count(RegistryOp::FormFragment), 0);
    assert_eq!(reg.call_count(RegistryOp::ListNodeUnassignedTuples), 0);
    assert_eq!(reg.call_count(RegistryOp::SnapshotCreate), 0);
}

#[tokio::test]
async fn generation_without_value_is_treated_as_empty() {
    let reg = registry();
    reg.inject(RegistryOp::GenerateData, Injection::Empty);
    let mut orch = orchestrator(&reg);

    let err = orch
        .initialize(&workload(), &NodeLocalFragmenter::new(4))
        .await
        .unwrap_err();
    assert!(matches!(err, EnvError::DataGenerationEmpty));
}

#[tokio::test]
async fn missing_snapshot_handle_is_an_error() {
    let reg = registry();
    reg.inject(RegistryOp::SnapshotCreate, Injection::Empty);
    let mut orch = orchestrator(&reg);

    let err = orch
        .initialize(&workload(), &NodeLocalFragmenter::new(4))
        .await
        .unwrap_err();
    assert!(matches!(err, EnvError::SnapshotCreation));
    assert!(orch.default_snapshot().is_none());
}

#[tokio::test]
async fn failing_step_is_named_in_the_error() {
    let reg = registry();
    reg.inject(
        RegistryOp::PopulateDefaultNodes,
        Injection::Fail(ErrorDescriptor::transport("connection reset by peer")),
    );
    let mut orch = orchestrator(&reg);

    let err = orch
        .initialize(&workload(), &NodeLocalFragmenter::new(4))
        .await
        .unwrap_err();
    match &err {
        EnvError::Transport { phase, source } => {
            assert_eq!(*phase, Phase::PopulateNodes);
            assert!(source.message.contains("connection reset"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.to_string().contains("populate default nodes"));
    assert_eq!(reg.call_count(RegistryOp::SetBenchmarkMode), 0);
}

#[tokio::test]
async fn failed_initialize_can_be_retried() {
    let reg = registry();
    reg.inject(
        RegistryOp::Flush,
        Injection::Fail(ErrorDescriptor::transport("timed out")),
    );
    let mut orch = orchestrator(&reg);

    let err = orch
        .initialize(&workload(), &NodeLocalFragmenter::new(4))
        .await
        .unwrap_err();
    assert_eq!(err.phase(), Some(Phase::Flush));

    let report = orch
        .initialize(&workload(), &NodeLocalFragmenter::new(4))
        .await
        .unwrap();
    assert!(!report.snapshot.is_blank());
}

#[tokio::test]
async fn initialize_twice_starts_from_scratch() {
    let reg = registry();
    let mut orch = orchestrator(&reg);

    let first = orch
        .initialize(&workload(), &NodeLocalFragmenter::new(4))
        .await
        .unwrap();
    let second = orch
        .initialize(&workload(), &NodeLocalFragmenter::new(4))
        .await
        .unwrap();

    assert_ne!(first.snapshot, second.snapshot);
    assert_eq!(reg.call_count(RegistryOp::Flush), 2);
    let on_c = reg
        .list_node_fragments(&NodeId::new("C"))
        .await
        .raise_on_error()
        .unwrap()
        .unwrap();
    assert_eq!(on_c.len(), 4);
}

#[tokio::test]
async fn shuffle_request_triggers_sync_after_mode_switch() {
    let reg = registry();
    let mut orch = orchestrator(&reg);

    let report = orch
        .initialize(
            &workload(),
            &ShufflingFragmenter(NodeLocalFragmenter::new(4)),
        )
        .await
        .unwrap();
    assert!(report.shuffled);

    let ops = mutations(&reg);
    let sync = ops
        .iter()
        .position(|op| *op == RegistryOp::SyncRegistryToData)
        .unwrap();
    assert_eq!(ops[sync - 1], RegistryOp::SetShuffleMode);
    assert_eq!(ops[sync + 1], RegistryOp::SnapshotCreate);
}

#[tokio::test]
async fn sync_failure_aborts_initialize() {
    let reg = registry();
    reg.inject(
        RegistryOp::SyncRegistryToData,
        Injection::Fail(ErrorDescriptor::new(ErrorCode::ReadOperation, "disk full")),
    );
    let mut orch = orchestrator(&reg);

    let err = orch
        .initialize(
            &workload(),
            &ShufflingFragmenter(NodeLocalFragmenter::new(4)),
        )
        .await
        .unwrap_err();
    assert_eq!(err.phase(), Some(Phase::SyncRegistryToData));
    assert_eq!(reg.call_count(RegistryOp::SnapshotCreate), 0);
}

// ===========================================================================
// ensure_mode()
// ===========================================================================

#[tokio::test]
async fn ensure_mode_is_idempotent() {
    let reg = registry();
    let orch = orchestrator(&reg);

    orch.ensure_mode(RegistryMode::Benchmark).await.unwrap();
    orch.ensure_mode(RegistryMode::Benchmark).await.unwrap();

    assert_eq!(reg.call_count(RegistryOp::SetBenchmarkMode), 1);
    assert_eq!(reg.mode(), RegistryMode::Benchmark);
}

#[tokio::test]
async fn ensure_mode_in_target_mode_issues_no_switch() {
    let reg = registry();
    let orch = orchestrator(&reg);

    orch.ensure_mode(RegistryMode::Shuffle).await.unwrap();
    assert_eq!(reg.calls(), vec![RegistryOp::GetMode]);
}

#[tokio::test]
async fn ensure_mode_fails_on_unknown_mode() {
    let reg = registry();
    reg.force_mode(RegistryMode::Unknown);
    let orch = orchestrator(&reg);

    let err = orch.ensure_mode(RegistryMode::Shuffle).await.unwrap_err();
    assert!(matches!(
        err,
        EnvError::RegistryState {
            phase: Phase::ModeSwitch,
            ..
        }
    ));
    assert_eq!(reg.call_count(RegistryOp::SetShuffleMode), 0);
}

#[tokio::test]
async fn ensure_mode_rejects_unknown_target() {
    let reg = registry();
    let orch = orchestrator(&reg);
    let err = orch.ensure_mode(RegistryMode::Unknown).await.unwrap_err();
    assert!(matches!(err, EnvError::RegistryState { .. }));
}

#[tokio::test]
async fn ensure_mode_rejects_unknown_target_even_when_registry_is_unknown() {
    let reg = registry();
    reg.force_mode(RegistryMode::Unknown);
    let orch = orchestrator(&reg);

    let err = orch.ensure_mode(RegistryMode::Unknown).await.unwrap_err();
    assert!(matches!(err, EnvError::RegistryState { .. }));
    assert!(reg.calls().is_empty());
}

#[tokio::test]
async fn ensure_mode_propagates_switch_failure() {
    let reg = registry();
    reg.inject(
        RegistryOp::SetBenchmarkMode,
        Injection::Fail(ErrorDescriptor::new(
            ErrorCode::IncorrectRegistryMode,
            "switch refused",
        )),
    );
    let orch = orchestrator(&reg);

    let err = orch.ensure_mode(RegistryMode::Benchmark).await.unwrap_err();
    assert!(matches!(err, EnvError::Transport { .. }));
    assert_eq!(reg.mode(), RegistryMode::Shuffle);
}

// ===========================================================================
// reset() and benchmarks
// ===========================================================================

#[tokio::test]
async fn reset_requires_initialize() {
    let reg = registry();
    let orch = orchestrator(&reg);
    assert!(matches!(
        orch.reset().await.unwrap_err(),
        EnvError::NotInitialized
    ));
    assert_eq!(reg.call_count(RegistryOp::ResetToDefaultSnapshot), 0);
}

#[tokio::test]
async fn reset_rolls_back_placement() {
    let reg = registry();
    let mut orch = orchestrator(&reg);
    orch.initialize(&workload(), &NodeLocalFragmenter::new(4))
        .await
        .unwrap();

    let (a, c, f1) = (NodeId::new("A"), NodeId::new("C"), FragmentId::new("f1"));
    reg.copy_fragment(&c, &a, &f1).await.raise_on_error().unwrap();
    orch.reset().await.unwrap();

    let on_a = reg
        .list_node_fragments(&a)
        .await
        .raise_on_error()
        .unwrap()
        .unwrap();
    assert!(on_a.is_empty());
}

#[tokio::test]
async fn reset_failure_is_propagated() {
    let reg = registry();
    let mut orch = orchestrator(&reg);
    orch.initialize(&workload(), &NodeLocalFragmenter::new(4))
        .await
        .unwrap();
    reg.inject(
        RegistryOp::ResetToDefaultSnapshot,
        Injection::Fail(ErrorDescriptor::transport("broken pipe")),
    );

    let err = orch.reset().await.unwrap_err();
    assert_eq!(err.phase(), Some(Phase::Reset));
}

#[tokio::test]
async fn benchmark_returns_to_shuffle_mode() {
    let reg = registry();
    let mut orch = orchestrator(&reg);
    orch.initialize(&workload(), &NodeLocalFragmenter::new(4))
        .await
        .unwrap();

    let report = orch.run_benchmark(&workload(), 2).await.unwrap();
    assert!(report.throughput > 0.0);
    assert_eq!(reg.mode(), RegistryMode::Shuffle);
}

#[tokio::test]
async fn failed_benchmark_still_restores_shuffle_mode() {
    let reg = registry();
    let mut orch = orchestrator(&reg);
    orch.initialize(&workload(), &NodeLocalFragmenter::new(4))
        .await
        .unwrap();
    reg.inject(
        RegistryOp::RunBenchmark,
        Injection::Fail(ErrorDescriptor::transport("workers crashed")),
    );

    let err = orch.run_benchmark(&workload(), 1).await.unwrap_err();
    assert_eq!(err.phase(), Some(Phase::Benchmark));
    assert_eq!(reg.mode(), RegistryMode::Shuffle);
}
