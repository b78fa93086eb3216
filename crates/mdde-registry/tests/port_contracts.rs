//! Contract tests for the registry ports.
//!
//! These tests pin the behaviour of the in-memory registry: mode gating,
//! placement constraints and snapshot rollback. Any conforming registry
//! must behave the same way.

use std::collections::BTreeSet;

use mdde_registry::*;

fn tuples(ids: &[&str]) -> BTreeSet<TupleId> {
    ids.iter().map(|t| TupleId::new(*t)).collect()
}

/// Nodes A and B, 4 tuples all generated on A, back in Shuffle mode.
async fn seeded() -> MemoryRegistry {
    let reg = MemoryRegistry::new(["A", "B"]).with_data_home("A");
    reg.populate_default_nodes().await.raise_on_error().unwrap();
    reg.set_benchmark_mode().await.raise_on_error().unwrap();
    let generated = reg.generate_data(&Workload::new("read4", 4)).await;
    assert_eq!(generated.value(), Some(&true));
    reg.set_shuffle_mode().await.raise_on_error().unwrap();
    reg
}

// ===========================================================================
// Mode gating
// ===========================================================================

#[tokio::test]
async fn switching_into_current_mode_fails() {
    let reg = MemoryRegistry::new(["A"]);
    let env = reg.set_shuffle_mode().await;
    assert_eq!(
        env.error().unwrap().code,
        Some(ErrorCode::RegistryModeAlreadySet)
    );
}

#[tokio::test]
async fn generation_requires_benchmark_mode() {
    let reg = MemoryRegistry::new(["A"]);
    reg.populate_default_nodes().await.raise_on_error().unwrap();
    let env = reg.generate_data(&Workload::new("w", 10)).await;
    assert_eq!(
        env.error().unwrap().code,
        Some(ErrorCode::IncorrectRegistryMode)
    );
}

#[tokio::test]
async fn copy_rejected_in_benchmark_mode() {
    let reg = seeded().await;
    let fragment = FragmentId::new("f1");
    reg.form_fragment(&fragment, &tuples(&["t1", "t2"]))
        .await
        .raise_on_error()
        .unwrap();
    reg.set_benchmark_mode().await.raise_on_error().unwrap();

    let env = reg
        .copy_fragment(&NodeId::new("A"), &NodeId::new("B"), &fragment)
        .await;
    assert_eq!(
        env.error().unwrap().code,
        Some(ErrorCode::IncorrectRegistryMode)
    );
}

#[tokio::test]
async fn populate_requires_empty_registry() {
    let reg = seeded().await;
    let env = reg.populate_default_nodes().await;
    assert_eq!(
        env.error().unwrap().code,
        Some(ErrorCode::SeedNonEmptyRegistry)
    );

    reg.flush().await.raise_on_error().unwrap();
    assert!(reg.populate_default_nodes().await.succeeded());
}

#[tokio::test]
async fn empty_workload_generates_nothing() {
    let reg = MemoryRegistry::new(["A"]).with_mode(RegistryMode::Benchmark);
    reg.set_shuffle_mode().await.raise_on_error().unwrap();
    reg.populate_default_nodes().await.raise_on_error().unwrap();
    reg.set_benchmark_mode().await.raise_on_error().unwrap();
    let env = reg.generate_data(&Workload::new("w", 0)).await;
    assert_eq!(env.value(), Some(&false));
}

// ===========================================================================
// Fragment formation and placement
// ===========================================================================

#[tokio::test]
async fn form_fragment_consumes_unassigned_tuples() {
    let reg = seeded().await;
    let a = NodeId::new("A");
    reg.form_fragment(&FragmentId::new("f1"), &tuples(&["t1", "t2"]))
        .await
        .raise_on_error()
        .unwrap();

    let left = reg.list_node_unassigned_tuples(&a).await;
    assert_eq!(left.value().unwrap(), &tuples(&["t3", "t4"]));
    let frags = reg.list_node_fragments(&a).await;
    assert!(frags.value().unwrap().contains(&FragmentId::new("f1")));
}

#[tokio::test]
async fn form_fragment_rejects_duplicates_and_empty_sets() {
    let reg = seeded().await;
    let f1 = FragmentId::new("f1");
    reg.form_fragment(&f1, &tuples(&["t1"]))
        .await
        .raise_on_error()
        .unwrap();

    let dup = reg.form_fragment(&f1, &tuples(&["t2"])).await;
    assert_eq!(dup.error().unwrap().code, Some(ErrorCode::DuplicateEntity));

    let empty = reg
        .form_fragment(&FragmentId::new("f2"), &BTreeSet::new())
        .await;
    assert_eq!(
        empty.error().unwrap().code,
        Some(ErrorCode::IllegalCommandArgument)
    );
}

#[tokio::test]
async fn copy_then_delete_respects_constraints() {
    let reg = seeded().await;
    let (a, b) = (NodeId::new("A"), NodeId::new("B"));
    let f1 = FragmentId::new("f1");
    reg.form_fragment(&f1, &tuples(&["t1", "t2"]))
        .await
        .raise_on_error()
        .unwrap();

    // Only exemplar cannot be removed.
    let env = reg.delete_fragment(&a, &f1).await;
    assert_eq!(
        env.error().unwrap().code,
        Some(ErrorCode::UniqueFragmentRemoval)
    );

    // Local replication is illegal.
    let env = reg.copy_fragment(&a, &a, &f1).await;
    assert_eq!(
        env.error().unwrap().code,
        Some(ErrorCode::LocalFragmentReplication)
    );

    reg.copy_fragment(&a, &b, &f1).await.raise_on_error().unwrap();
    assert_eq!(reg.count_fragment_copies(&f1).await.value(), Some(&2));

    let env = reg.copy_fragment(&a, &b, &f1).await;
    assert_eq!(
        env.error().unwrap().code,
        Some(ErrorCode::DuplicateFragmentReplication)
    );

    reg.delete_fragment(&a, &f1).await.raise_on_error().unwrap();
    let holders = reg.find_fragment(&f1).await;
    assert_eq!(holders.value().unwrap(), &BTreeSet::from([b.clone()]));

    // Copy from a node that no longer holds it.
    let env = reg.copy_fragment(&a, &b, &f1).await;
    assert_eq!(
        env.error().unwrap().code,
        Some(ErrorCode::IncorrectFragmentLocation)
    );
}

#[tokio::test]
async fn unknown_entities_are_reported() {
    let reg = seeded().await;
    let env = reg.list_node_fragments(&NodeId::new("Z")).await;
    assert_eq!(env.error().unwrap().code, Some(ErrorCode::UnknownEntityId));

    let env = reg.count_fragment_copies(&FragmentId::new("nope")).await;
    assert_eq!(env.error().unwrap().code, Some(ErrorCode::UnknownEntityId));
}

#[tokio::test]
async fn fragment_meta_lookup() {
    let reg = seeded().await;
    let (a, f1) = (NodeId::new("A"), FragmentId::new("f1"));
    reg.form_fragment(&f1, &tuples(&["t1"]))
        .await
        .raise_on_error()
        .unwrap();
    reg.set_fragment_meta(&f1, &a, "size", "1");

    assert_eq!(
        reg.read_fragment_meta(&f1, &a, "size").await.value(),
        Some(&"1".to_string())
    );
    let missing = reg.read_fragment_meta(&f1, &a, "heat").await;
    assert_eq!(
        missing.error().unwrap().code,
        Some(ErrorCode::DataKeyNotFound)
    );
}

#[tokio::test]
async fn global_meta_is_independent_of_exemplars() {
    let reg = seeded().await;
    let (a, b, f1) = (NodeId::new("A"), NodeId::new("B"), FragmentId::new("f1"));
    reg.form_fragment(&f1, &tuples(&["t1"]))
        .await
        .raise_on_error()
        .unwrap();
    reg.set_fragment_meta_global(&f1, "owner", "A");
    reg.copy_fragment(&a, &b, &f1).await.raise_on_error().unwrap();
    reg.delete_fragment(&a, &f1).await.raise_on_error().unwrap();

    assert_eq!(
        reg.read_fragment_meta_global(&f1, "owner").await.value(),
        Some(&"A".to_string())
    );
    let missing = reg.read_fragment_meta_global(&f1, "size").await;
    assert_eq!(
        missing.error().unwrap().code,
        Some(ErrorCode::DataKeyNotFound)
    );
    let unknown = reg
        .read_fragment_meta_global(&FragmentId::new("f9"), "owner")
        .await;
    assert_eq!(
        unknown.error().unwrap().code,
        Some(ErrorCode::UnknownEntityId)
    );
}

#[tokio::test]
async fn catalog_lists_placement_and_requested_meta_only() {
    let reg = seeded().await;
    let (a, b) = (NodeId::new("A"), NodeId::new("B"));
    let (f1, f2) = (FragmentId::new("f1"), FragmentId::new("f2"));
    reg.form_fragment(&f1, &tuples(&["t1", "t2"]))
        .await
        .raise_on_error()
        .unwrap();
    reg.form_fragment(&f2, &tuples(&["t3"]))
        .await
        .raise_on_error()
        .unwrap();
    reg.set_fragment_meta(&f1, &a, "reads", "7");
    reg.set_fragment_meta(&f1, &a, "size", "2");
    reg.set_fragment_meta_global(&f2, "owner", "A");
    reg.set_fragment_meta_global(&f2, "heat", "low");

    let catalog = reg
        .read_all_fragments_with_meta(&["reads".to_string()], &["owner".to_string()])
        .await
        .raise_on_error()
        .unwrap()
        .unwrap();

    assert_eq!(catalog.nodes[&a], BTreeSet::from([f1.clone(), f2.clone()]));
    assert!(catalog.nodes[&b].is_empty());
    let local = &catalog.local_meta[&f1][&a];
    assert_eq!(local.get("reads").map(String::as_str), Some("7"));
    assert!(!local.contains_key("size"));
    assert_eq!(catalog.global_meta[&f2].len(), 1);
    assert_eq!(catalog.global_meta[&f2]["owner"], "A");

    let bare = reg
        .read_all_fragments_with_meta(&[], &[])
        .await
        .raise_on_error()
        .unwrap()
        .unwrap();
    assert!(bare.local_meta.is_empty());
    assert!(bare.global_meta.is_empty());
    assert_eq!(bare.nodes, catalog.nodes);
}

// ===========================================================================
// Snapshots, benchmark, debug dump
// ===========================================================================

#[tokio::test]
async fn reset_restores_default_snapshot() {
    let reg = seeded().await;
    let (a, b) = (NodeId::new("A"), NodeId::new("B"));
    let f1 = FragmentId::new("f1");
    reg.form_fragment(&f1, &tuples(&["t1"]))
        .await
        .raise_on_error()
        .unwrap();

    let handle = reg.snapshot_create(true).await;
    assert!(!handle.value().unwrap().is_blank());

    reg.copy_fragment(&a, &b, &f1).await.raise_on_error().unwrap();
    reg.reset_to_default_snapshot()
        .await
        .raise_on_error()
        .unwrap();

    let on_b = reg.list_node_fragments(&b).await;
    assert!(on_b.value().unwrap().is_empty());
}

#[tokio::test]
async fn reset_without_default_snapshot_fails() {
    let reg = MemoryRegistry::new(["A"]);
    let env = reg.reset_to_default_snapshot().await;
    assert_eq!(env.error().unwrap().code, Some(ErrorCode::UnknownEntityId));
}

#[tokio::test]
async fn benchmark_splits_reads_across_holders() {
    let reg = seeded().await;
    let (a, b) = (NodeId::new("A"), NodeId::new("B"));
    let f1 = FragmentId::new("f1");
    reg.form_fragment(&f1, &tuples(&["t1", "t2", "t3", "t4"]))
        .await
        .raise_on_error()
        .unwrap();
    reg.copy_fragment(&a, &b, &f1).await.raise_on_error().unwrap();
    reg.set_benchmark_mode().await.raise_on_error().unwrap();

    let report = reg
        .run_benchmark(&Workload::new("read4", 4), 1)
        .await
        .raise_on_error()
        .unwrap()
        .unwrap();
    for stats in &report.nodes {
        assert_eq!(stats.fragment_reads.get(&f1), Some(&2));
    }
    assert!((report.throughput - 2.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn dump_reports_mode_and_nodes() {
    let reg = seeded().await;
    let dump = reg.dump().await.raise_on_error().unwrap().unwrap();
    assert_eq!(dump["mode"], "shuffle");
    assert!(dump["nodes"]["A"].is_object());
}

// ===========================================================================
// Fault injection and call log
// ===========================================================================

#[tokio::test]
async fn injection_is_one_shot() {
    let reg = MemoryRegistry::new(["A"]);
    reg.inject(
        RegistryOp::GetMode,
        Injection::Fail(ErrorDescriptor::transport("connection reset")),
    );
    assert!(reg.get_mode().await.failed());
    assert_eq!(reg.get_mode().await.value(), Some(&RegistryMode::Shuffle));
    assert_eq!(reg.call_count(RegistryOp::GetMode), 2);
}

#[tokio::test]
async fn empty_injection_yields_valueless_success() {
    let reg = MemoryRegistry::new(["A"]);
    reg.inject(RegistryOp::SnapshotCreate, Injection::Empty);
    let env = reg.snapshot_create(true).await;
    assert!(env.succeeded());
    assert!(env.value().is_none());
    assert_eq!(reg.snapshot_count(), 0);
}
