/*!

This library provides the engine of the mesh dependency-detection harness: the object model of a
test topology, a client for the control plane, the readiness waiter, the in-workload probe, and the
lifecycle controller that ties them together.

!*/

#![deny(
    clippy::expect_used,
    clippy::get_unwrap,
    clippy::panic,
    clippy::panic_in_result_fn,
    clippy::panicking_unwrap,
    clippy::unwrap_in_result,
    clippy::unwrap_used
)]

pub use config::HarnessConfig;
pub use context::RunContext;
pub use error::{Classify, ErrorKind};
pub use lifecycle::{Lifecycle, LifecycleConfig, Phase, RunReport, Verdict};
pub use params::RunParameters;
pub use probe::{DependencyMarker, ProbeResult};
pub use resource::{ObjectRef, ResourceKind, ResourceSpec};
pub use topology::{Topology, TopologyBuilder};

pub mod clients;
pub mod collaborators;
pub mod config;
pub mod constants;
mod context;
pub mod dependency_store;
mod error;
pub mod lifecycle;
pub mod params;
pub mod probe;
pub mod resource;
pub mod topology;
pub mod wait;
