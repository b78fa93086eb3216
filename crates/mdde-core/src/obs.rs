//! Structured observability hooks for environment lifecycle events.
//!
//! This module provides:
//! - An episode-scoped tracing span for lifecycle futures
//! - Emission functions for initialization phases, resets, steps and benchmarks
//!
//! Events are emitted at `info!` level unless noted; filter them with
//! `RUST_LOG` (e.g. `RUST_LOG=mdde_core=debug`).

use tracing::{info, warn, Span};

use crate::error::Phase;

/// Span covering one scenario's lifecycle calls.
///
/// Attach it to futures with `tracing::Instrument`.
///
/// # Example
///
/// ```ignore
/// env.initialize().instrument(episode_span("starving-agents")).await?;
/// ```
pub fn episode_span(scenario: &str) -> Span {
    tracing::info_span!("mdde.episode", scenario = %scenario)
}

pub fn emit_init_started(scenario: &str, agents: usize) {
    info!(event = "env.init.started", scenario = %scenario, agents = agents);
}

/// Emit event: one initialization phase completed.
pub fn emit_phase_completed(phase: Phase) {
    info!(event = "env.init.phase", phase = %phase);
}

/// Emit event: initialization finished with the default snapshot in place.
pub fn emit_init_finished(snapshot: &str, shuffled: bool, duration_ms: u64) {
    info!(
        event = "env.init.finished",
        snapshot = %snapshot,
        shuffled = shuffled,
        duration_ms = duration_ms,
    );
}

/// Emit event: initialization aborted (warning level).
pub fn emit_init_failed(phase: Option<Phase>, error: &dyn std::fmt::Display) {
    match phase {
        Some(phase) => warn!(event = "env.init.failed", phase = %phase, error = %error),
        None => warn!(event = "env.init.failed", error = %error),
    }
}

pub fn emit_mode_switched(from: &str, to: &str) {
    info!(event = "registry.mode.switched", from = %from, to = %to);
}

pub fn emit_reset(snapshot: &str) {
    info!(event = "env.reset", snapshot = %snapshot);
}

/// Emit event: a step's writes have all completed.
pub fn emit_step_finished(tick: u64, applied: usize, rejected: usize, conflicts: usize) {
    info!(
        event = "env.step.finished",
        tick = tick,
        applied = applied,
        rejected = rejected,
        conflicts = conflicts,
    );
}

pub fn emit_action_table_rebuilt(agent: u32, actions: usize, fragments: usize) {
    info!(
        event = "env.actions.rebuilt",
        agent = agent,
        actions = actions,
        fragments = fragments,
    );
}

pub fn emit_benchmark_finished(throughput: f64, nodes: usize) {
    info!(event = "env.benchmark.finished", throughput = throughput, nodes = nodes);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn episode_span_without_subscriber() {
        let span = episode_span("test-scenario");
        let _entered = span.enter();
        emit_phase_completed(Phase::Flush);
    }
}
