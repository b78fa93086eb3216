//! MDDE Registry: boundary to the data-distribution registry
//!
//! This crate owns everything the environment needs to talk to the registry
//! without knowing how it is reached.
//!
//! ## Layer 0 - Registry boundary
//!
//! Focus: uniform result envelopes, narrow capability ports, transports.
//!
//! ## Key Components
//!
//! - `ResultEnvelope`: success/failure wrapper returned by every call
//! - `RegistryControlPort` / `RegistryWritePort` / `RegistryReadPort`: capability traits
//! - `RegistryClientTcp`: framed JSON client for the registry's control endpoint
//! - `MemoryRegistry`: in-memory registry honouring the same constraints

pub mod envelope;
mod error;
pub mod fakes;
pub mod ports;
pub mod protocol;
pub mod tcp;

pub use envelope::{ErrorCode, ErrorDescriptor, ResultEnvelope};
pub use error::{ClientError, ConfigError};
pub use fakes::{Injection, MemoryRegistry, RegistryOp};
pub use ports::{
    BenchmarkReport, FragmentCatalog, FragmentId, MetaValues, NodeBenchmarkStats, NodeId,
    RegistryControlPort, RegistryMode, RegistryReadPort, RegistryWritePort, SnapshotHandle,
    TupleId, Workload,
};
pub use tcp::{RegistryClientConfig, RegistryClientTcp};
