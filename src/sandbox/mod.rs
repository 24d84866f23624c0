//! Container sandbox for untrusted code.
//!
//! Drives one short-lived, network-isolated container per request through
//! the [`ContainerRuntime`] seam, with Docker as the production backend.

mod controller;
mod docker;
mod error;
#[cfg(test)]
pub(crate) mod mock;
mod runtime;

pub(crate) use controller::{RunController, RunOutcome, RunSpec};
pub(crate) use docker::DockerRuntime;
pub(crate) use error::SandboxError;
pub(crate) use runtime::{ContainerRuntime, RuntimeHandle};

/// Resource and isolation policy for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RunLimits {
    pub memory_bytes: i64,
    pub nano_cpus: i64,
    pub network_disabled: bool,
    /// Mount the workspace read-only.
    pub read_only: bool,
}
