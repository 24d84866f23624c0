//! The boundary with the container runtime.
//!
//! [`ContainerRuntime`] is the only seam between the orchestrator and the
//! daemon. [`RuntimeHandle`] is the one instance shared by every in-flight
//! request, plus a liveness flag that is set at startup and re-checked
//! lazily after a connection failure.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use super::{RunLimits, SandboxError};

/// Everything needed to create one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ContainerSpec {
    /// Unique container name.
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    /// Workspace directory as the runtime resolves it.
    pub mount_source: PathBuf,
    /// Mount point inside the container, also the working directory.
    pub mount_target: String,
    pub limits: RunLimits,
    /// Workspace id, attached as a label for diagnostics.
    pub workspace_id: String,
}

/// Operations the orchestrator needs from a container runtime.
///
/// Implementations must be safe to call from many requests at once.
#[async_trait]
pub(crate) trait ContainerRuntime: Send + Sync {
    /// Checks the daemon is reachable.
    async fn ping(&self) -> Result<(), SandboxError>;

    /// Creates and starts a detached container, returning its id.
    async fn create_and_start(&self, spec: &ContainerSpec) -> Result<String, SandboxError>;

    /// Waits for the container to stop and returns its exit status.
    ///
    /// Unbounded; callers apply their own timeout.
    async fn wait(&self, id: &str) -> Result<i64, SandboxError>;

    /// Fetches combined stdout and stderr, interleaved as captured.
    async fn logs(&self, id: &str) -> Result<Bytes, SandboxError>;

    /// Stops the container immediately.
    async fn stop(&self, id: &str) -> Result<(), SandboxError>;

    /// Force-removes the container. Removing an unknown container succeeds.
    async fn remove(&self, id: &str) -> Result<(), SandboxError>;

    /// Returns true if the image is present locally.
    async fn image_exists(&self, image: &str) -> Result<bool, SandboxError>;

    /// Pulls an image from its registry.
    async fn pull_image(&self, image: &str) -> Result<(), SandboxError>;
}

/// Shared runtime client with a lazily re-checked liveness flag.
#[derive(Clone)]
pub(crate) struct RuntimeHandle {
    runtime: Arc<dyn ContainerRuntime>,
    available: Arc<AtomicBool>,
}

impl RuntimeHandle {
    /// Wraps a runtime and pings it once.
    pub async fn connect(runtime: Arc<dyn ContainerRuntime>) -> Self {
        let handle = Self {
            runtime,
            available: Arc::new(AtomicBool::new(false)),
        };
        match handle.check().await {
            Ok(()) => info!("Container runtime connected"),
            Err(e) => warn!("Container runtime not reachable at startup: {}", e),
        }
        handle
    }

    pub fn runtime(&self) -> &dyn ContainerRuntime {
        self.runtime.as_ref()
    }

    /// Last known liveness, without touching the daemon.
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Pings the daemon and records the result.
    pub async fn check(&self) -> Result<(), SandboxError> {
        let result = self.runtime.ping().await;
        self.available.store(result.is_ok(), Ordering::SeqCst);
        result.map_err(|e| match e {
            SandboxError::RuntimeUnavailable { .. } => e,
            other => SandboxError::runtime_unavailable(other.to_string()),
        })
    }

    /// Succeeds immediately while the runtime is believed up; otherwise
    /// re-pings once.
    pub async fn ensure_available(&self) -> Result<(), SandboxError> {
        if self.is_available() {
            return Ok(());
        }
        self.check().await
    }

    /// Marks the runtime down when an operation failed to reach it.
    pub fn observe(&self, error: &SandboxError) {
        if error.is_runtime_unavailable() && self.available.swap(false, Ordering::SeqCst) {
            warn!("Lost connection to container runtime: {}", error);
        }
    }
}
