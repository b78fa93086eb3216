//! MDDE Core: environment orchestration over the data-distribution registry
//!
//! ## Layer 1 - Environment
//!
//! Focus: bringing the registry into reproducible states and translating
//! agent decisions into ordered, validated registry mutations.
//!
//! ## Key Components
//!
//! - `RegistryLifecycleOrchestrator`: mode protocol and the initialization sequence
//! - `StepDispatcher`: per-step action decoding, conflict claiming and write barrier
//! - `FragmentOrdering` / `NaturalOrdering`: column order shared by observations and actions
//! - `AgentBinding` / `ActionTable`: per-agent action spaces
//! - `Environment`: initialize / reset / step / benchmark over a `Scenario`

pub mod agent;
pub mod allocation;
pub mod config;
pub mod dispatcher;
pub mod environment;
pub mod error;
pub mod fragmenter;
pub mod obs;
pub mod orchestrator;
pub mod ordering;
pub mod scenario;
pub mod telemetry;

pub use agent::{ActionTable, AgentAction, AgentBinding, AgentId};
pub use allocation::{order_nodes, AllocationMatrix};
pub use config::{EnvConfig, NodeSpec, ScenarioConfig};
pub use dispatcher::{AgentOutcome, OutcomeStatus, StepDispatcher};
pub use environment::{BenchmarkObservation, Environment, StepInfo, StepResult};
pub use error::{EnvError, EnvResult, Phase};
pub use fragmenter::{Fragmenter, NodeLocalFragmenter};
pub use orchestrator::{InitializationReport, RegistryLifecycleOrchestrator, RegistryPorts};
pub use ordering::{natural_cmp, FragmentOrdering, NaturalOrdering};
pub use scenario::{
    ownership_observation, validate_bindings, DefaultScenario, Observation, Scenario,
};
pub use telemetry::init_tracing;
