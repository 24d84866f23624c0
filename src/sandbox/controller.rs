//! One bounded container run per call.
//!
//! `run` launches a detached container, waits for it up to the timeout,
//! captures output on natural exit or stops it on timeout, and always
//! attempts removal before returning exactly one [`RunOutcome`]. If the
//! caller drops `run` midway, the started container is still stopped and
//! removed in the background.

use bytes::Bytes;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use super::runtime::{ContainerSpec, RuntimeHandle};
use super::{RunLimits, SandboxError};
use crate::languages::CONTAINER_WORKDIR;
use crate::workspace::Workspace;

/// Upper bound for each forced stop or remove call.
const CLEANUP_TIMEOUT: Duration = Duration::from_secs(5);

/// What to run and under which bounds.
#[derive(Debug, Clone)]
pub(crate) struct RunSpec<'a> {
    pub image: &'a str,
    pub command: Vec<String>,
    pub workspace: &'a Workspace,
    pub limits: RunLimits,
    pub timeout: Duration,
}

/// Terminal result of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RunOutcome {
    /// Exited on its own within the bound.
    Success { exit_status: i64, output: Bytes },
    /// Did not exit within the bound and was stopped.
    Timeout,
    /// Could not be started, or could not be observed after starting.
    LaunchFailure(String),
    /// The image is not available locally and could not be pulled.
    ImageMissing(String),
    /// The runtime stopped answering during the run.
    RuntimeUnavailable(String),
}

/// Launches and governs isolated runs.
#[derive(Clone)]
pub(crate) struct RunController {
    runtime: RuntimeHandle,
    pull_missing_images: bool,
    permits: Option<Arc<Semaphore>>,
    cleanup_timeout: Duration,
}

impl RunController {
    /// `max_concurrent_runs == 0` leaves runs ungated.
    pub fn new(runtime: RuntimeHandle, pull_missing_images: bool, max_concurrent_runs: usize) -> Self {
        let permits = (max_concurrent_runs > 0).then(|| Arc::new(Semaphore::new(max_concurrent_runs)));
        Self {
            runtime,
            pull_missing_images,
            permits,
            cleanup_timeout: CLEANUP_TIMEOUT,
        }
    }

    #[cfg(test)]
    fn with_cleanup_timeout(mut self, timeout: Duration) -> Self {
        self.cleanup_timeout = timeout;
        self
    }

    pub async fn run(&self, spec: RunSpec<'_>) -> RunOutcome {
        let queued_at = Instant::now();
        let _permit = match self.acquire(spec.timeout).await {
            Ok(permit) => permit,
            Err(outcome) => return outcome,
        };
        // Time spent queued counts against the bound
        let remaining = spec.timeout.saturating_sub(queued_at.elapsed());

        let container = ContainerSpec {
            name: format!("codesandbox-{}", spec.workspace.id().simple()),
            image: spec.image.to_string(),
            command: spec.command,
            mount_source: spec.workspace.mount_path().to_path_buf(),
            mount_target: CONTAINER_WORKDIR.to_string(),
            limits: spec.limits,
            workspace_id: spec.workspace.id().to_string(),
        };

        let id = match self.launch(&container).await {
            Ok(id) => id,
            Err(e) if e.is_image_missing() => {
                warn!(image = %container.image, "Image not available");
                return RunOutcome::ImageMissing(container.image);
            }
            Err(e) => {
                warn!(container = %container.name, "Launch failed: {}", e);
                return self.failure(&e);
            }
        };
        debug!(container = %container.name, "Container started");
        let mut guard = ContainerGuard {
            runtime: self.runtime.clone(),
            id,
            name: container.name.clone(),
            timeout: self.cleanup_timeout,
            removed: false,
        };

        let collected = tokio::time::timeout(remaining, self.collect(guard.id())).await;
        let outcome = match collected {
            Ok(Ok((exit_status, output))) => {
                info!(container = %container.name, exit_code = exit_status, "Container exited");
                RunOutcome::Success {
                    exit_status,
                    output,
                }
            }
            Ok(Err(e)) => {
                warn!(container = %container.name, "Run failed: {}", e);
                self.failure(&e)
            }
            Err(_) => {
                warn!(
                    container = %container.name,
                    timeout_secs = spec.timeout.as_secs(),
                    "Container execution timed out"
                );
                guard.stop().await;
                RunOutcome::Timeout
            }
        };

        guard.remove().await;
        outcome
    }

    /// Outcome for a failed runtime call, marking the runtime down when it
    /// could not be reached.
    fn failure(&self, error: &SandboxError) -> RunOutcome {
        self.runtime.observe(error);
        match error {
            SandboxError::RuntimeUnavailable { message } => {
                RunOutcome::RuntimeUnavailable(message.clone())
            }
            _ => RunOutcome::LaunchFailure(error.to_string()),
        }
    }

    async fn acquire(&self, timeout: Duration) -> Result<Option<OwnedSemaphorePermit>, RunOutcome> {
        let Some(ref permits) = self.permits else {
            return Ok(None);
        };
        match tokio::time::timeout(timeout, permits.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(Some(permit)),
            Ok(Err(_)) => Err(RunOutcome::LaunchFailure(
                "Run limiter is closed".to_string(),
            )),
            Err(_) => {
                warn!("Timed out waiting for a free run slot");
                Err(RunOutcome::Timeout)
            }
        }
    }

    /// Create and start, pulling the image once if it is missing.
    async fn launch(&self, container: &ContainerSpec) -> Result<String, SandboxError> {
        let runtime = self.runtime.runtime();
        match runtime.create_and_start(container).await {
            Err(e) if e.is_image_missing() && self.pull_missing_images => {
                info!(image = %container.image, "Image missing locally, pulling");
                runtime.pull_image(&container.image).await?;
                runtime.create_and_start(container).await
            }
            other => other,
        }
    }

    async fn collect(&self, id: &str) -> Result<(i64, Bytes), SandboxError> {
        let runtime = self.runtime.runtime();
        let exit_status = runtime.wait(id).await?;
        let output = runtime.logs(id).await?;
        Ok((exit_status, output))
    }
}

/// Owns a started container until it has been removed.
///
/// Dropping the guard before [`ContainerGuard::remove`] completes schedules a
/// background stop and remove on the current tokio runtime.
struct ContainerGuard {
    runtime: RuntimeHandle,
    id: String,
    name: String,
    /// Bound for each cleanup call.
    timeout: Duration,
    removed: bool,
}

impl ContainerGuard {
    fn id(&self) -> &str {
        &self.id
    }

    async fn stop(&self) {
        stop_container(&self.runtime, &self.id, &self.name, self.timeout).await;
    }

    async fn remove(&mut self) {
        remove_container(&self.runtime, &self.id, &self.name, self.timeout).await;
        self.removed = true;
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(container = %self.name, "No runtime to clean up abandoned container");
            return;
        };
        warn!(container = %self.name, "Run abandoned, cleaning up container");
        let runtime = self.runtime.clone();
        let id = std::mem::take(&mut self.id);
        let name = std::mem::take(&mut self.name);
        let timeout = self.timeout;
        handle.spawn(async move {
            stop_container(&runtime, &id, &name, timeout).await;
            remove_container(&runtime, &id, &name, timeout).await;
        });
    }
}

async fn stop_container(runtime: &RuntimeHandle, id: &str, name: &str, timeout: Duration) {
    match tokio::time::timeout(timeout, runtime.runtime().stop(id)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(container = %name, "Failed to stop container: {}", e),
        Err(_) => warn!(container = %name, "Timed out stopping container"),
    }
}

async fn remove_container(runtime: &RuntimeHandle, id: &str, name: &str, timeout: Duration) {
    match tokio::time::timeout(timeout, runtime.runtime().remove(id)).await {
        Ok(Ok(())) => debug!(container = %name, "Container removed"),
        Ok(Err(e)) => warn!(container = %name, "Failed to remove container: {}", e),
        Err(_) => warn!(container = %name, "Timed out removing container"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::mock::{MockCall, MockRuntime};
    use crate::workspace::WorkspaceManager;
    use tempfile::tempdir;

    const LIMITS: RunLimits = RunLimits {
        memory_bytes: 128 * 1024 * 1024,
        nano_cpus: 1_000_000_000,
        network_disabled: true,
        read_only: true,
    };

    async fn controller(mock: &Arc<MockRuntime>, pull: bool, max: usize) -> RunController {
        RunController::new(RuntimeHandle::connect(mock.clone()).await, pull, max)
    }

    fn spec(workspace: &Workspace, timeout: Duration) -> RunSpec<'_> {
        RunSpec {
            image: "python:3.8-slim",
            command: vec!["python".to_string(), "/code/main.py".to_string()],
            workspace,
            limits: LIMITS,
            timeout,
        }
    }

    #[tokio::test]
    async fn test_success_captures_output_and_removes() {
        let root = tempdir().unwrap();
        let workspace = WorkspaceManager::new(root.path(), root.path(), "t")
            .stage(&[("main.py", "print('hi')")])
            .await
            .unwrap();
        let mock = Arc::new(MockRuntime::exiting(0, "hi\n"));
        let controller = controller(&mock, true, 0).await;

        let outcome = controller.run(spec(&workspace, Duration::from_secs(5))).await;

        assert_eq!(
            outcome,
            RunOutcome::Success {
                exit_status: 0,
                output: Bytes::from("hi\n"),
            }
        );
        assert_eq!(mock.running(), 0);
        assert!(mock.calls().contains(&MockCall::Remove));
        assert!(!mock.calls().contains(&MockCall::Stop));

        let created = mock.created().pop().unwrap();
        assert_eq!(created.mount_source, workspace.mount_path());
        assert_eq!(created.mount_target, "/code");
        assert_eq!(created.limits, LIMITS);
        workspace.release().await;
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_still_success() {
        let root = tempdir().unwrap();
        let workspace = WorkspaceManager::new(root.path(), root.path(), "t")
            .stage(&[])
            .await
            .unwrap();
        let mock = Arc::new(MockRuntime::exiting(1, "Traceback"));
        let controller = controller(&mock, true, 0).await;

        let outcome = controller.run(spec(&workspace, Duration::from_secs(5))).await;
        assert!(matches!(outcome, RunOutcome::Success { exit_status: 1, .. }));
        workspace.release().await;
    }

    #[tokio::test]
    async fn test_timeout_stops_and_removes() {
        let root = tempdir().unwrap();
        let workspace = WorkspaceManager::new(root.path(), root.path(), "t")
            .stage(&[])
            .await
            .unwrap();
        let mock = Arc::new(MockRuntime::hanging());
        let controller = controller(&mock, true, 0).await;

        let outcome = controller
            .run(spec(&workspace, Duration::from_millis(50)))
            .await;

        assert_eq!(outcome, RunOutcome::Timeout);
        let calls = mock.calls();
        let stop = calls.iter().position(|c| *c == MockCall::Stop).unwrap();
        let remove = calls.iter().position(|c| *c == MockCall::Remove).unwrap();
        assert!(stop < remove);
        assert!(!calls.contains(&MockCall::Logs));
        assert_eq!(mock.running(), 0);
        workspace.release().await;
    }

    #[tokio::test]
    async fn test_timeout_swallows_cleanup_failures() {
        let root = tempdir().unwrap();
        let workspace = WorkspaceManager::new(root.path(), root.path(), "t")
            .stage(&[])
            .await
            .unwrap();
        let mock = Arc::new(MockRuntime::hanging().with_failing_cleanup());
        let controller = controller(&mock, true, 0).await;

        let outcome = controller
            .run(spec(&workspace, Duration::from_millis(50)))
            .await;
        assert_eq!(outcome, RunOutcome::Timeout);
        workspace.release().await;
    }

    #[tokio::test]
    async fn test_launch_failure() {
        let root = tempdir().unwrap();
        let workspace = WorkspaceManager::new(root.path(), root.path(), "t")
            .stage(&[])
            .await
            .unwrap();
        let mock = Arc::new(MockRuntime::failing_launch("invalid mount"));
        let controller = controller(&mock, true, 0).await;

        let outcome = controller.run(spec(&workspace, Duration::from_secs(5))).await;
        match outcome {
            RunOutcome::LaunchFailure(detail) => assert!(detail.contains("invalid mount")),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(!mock.calls().contains(&MockCall::Wait));
        workspace.release().await;
    }

    #[tokio::test]
    async fn test_wait_failure_is_reported_and_removed() {
        let root = tempdir().unwrap();
        let workspace = WorkspaceManager::new(root.path(), root.path(), "t")
            .stage(&[])
            .await
            .unwrap();
        let mock = Arc::new(MockRuntime::failing_wait("stream reset"));
        let controller = controller(&mock, true, 0).await;

        let outcome = controller.run(spec(&workspace, Duration::from_secs(5))).await;
        assert!(matches!(outcome, RunOutcome::LaunchFailure(_)));
        assert_eq!(mock.running(), 0);
        workspace.release().await;
    }

    #[tokio::test]
    async fn test_missing_image_is_pulled_once() {
        let root = tempdir().unwrap();
        let workspace = WorkspaceManager::new(root.path(), root.path(), "t")
            .stage(&[])
            .await
            .unwrap();
        let mock = Arc::new(MockRuntime::exiting(0, "ok").with_missing_image(true));
        let controller = controller(&mock, true, 0).await;

        let outcome = controller.run(spec(&workspace, Duration::from_secs(5))).await;
        assert!(matches!(outcome, RunOutcome::Success { .. }));
        assert_eq!(
            mock.calls()
                .iter()
                .filter(|c| matches!(c, MockCall::Pull(_)))
                .count(),
            1
        );
        workspace.release().await;
    }

    #[tokio::test]
    async fn test_unpullable_image_is_missing() {
        let root = tempdir().unwrap();
        let workspace = WorkspaceManager::new(root.path(), root.path(), "t")
            .stage(&[])
            .await
            .unwrap();
        let mock = Arc::new(MockRuntime::exiting(0, "ok").with_missing_image(false));
        let controller = controller(&mock, true, 0).await;

        let outcome = controller.run(spec(&workspace, Duration::from_secs(5))).await;
        assert_eq!(
            outcome,
            RunOutcome::ImageMissing("python:3.8-slim".to_string())
        );
        assert_eq!(mock.running(), 0);
        workspace.release().await;
    }

    #[tokio::test]
    async fn test_missing_image_without_pull() {
        let root = tempdir().unwrap();
        let workspace = WorkspaceManager::new(root.path(), root.path(), "t")
            .stage(&[])
            .await
            .unwrap();
        let mock = Arc::new(MockRuntime::exiting(0, "ok").with_missing_image(true));
        let controller = controller(&mock, false, 0).await;

        let outcome = controller.run(spec(&workspace, Duration::from_secs(5))).await;
        assert!(matches!(outcome, RunOutcome::ImageMissing(_)));
        assert!(!mock.calls().iter().any(|c| matches!(c, MockCall::Pull(_))));
        workspace.release().await;
    }

    #[tokio::test]
    async fn test_semaphore_bounds_queue_wait() {
        let root = tempdir().unwrap();
        let manager = WorkspaceManager::new(root.path(), root.path(), "t");
        let first = manager.stage(&[]).await.unwrap();
        let second = manager.stage(&[]).await.unwrap();
        let mock = Arc::new(MockRuntime::hanging());
        let controller = controller(&mock, true, 1).await;

        // The first run holds the only slot until it times out; the second
        // cannot get a slot within its own bound.
        let (a, b) = tokio::join!(
            controller.run(spec(&first, Duration::from_millis(300))),
            controller.run(spec(&second, Duration::from_millis(50))),
        );
        assert_eq!(a, RunOutcome::Timeout);
        assert_eq!(b, RunOutcome::Timeout);
        assert_eq!(mock.created().len(), 1);

        first.release().await;
        second.release().await;
    }

    #[tokio::test]
    async fn test_runtime_lost_after_startup() {
        let root = tempdir().unwrap();
        let workspace = WorkspaceManager::new(root.path(), root.path(), "t")
            .stage(&[])
            .await
            .unwrap();
        let mock = Arc::new(MockRuntime::exiting(0, "ok"));
        let handle = RuntimeHandle::connect(mock.clone()).await;
        let controller = RunController::new(handle.clone(), true, 0);
        mock.set_reachable(false);

        let outcome = controller.run(spec(&workspace, Duration::from_secs(5))).await;
        assert!(matches!(outcome, RunOutcome::RuntimeUnavailable(_)));
        assert!(!handle.is_available());
        workspace.release().await;
    }

    #[tokio::test]
    async fn test_dropped_run_still_cleans_up() {
        let root = tempdir().unwrap();
        let workspace = WorkspaceManager::new(root.path(), root.path(), "t")
            .stage(&[])
            .await
            .unwrap();
        let mock = Arc::new(MockRuntime::hanging());
        let controller = controller(&mock, true, 0).await;

        // The caller gives up long before the run's own bound
        let abandoned = tokio::time::timeout(
            Duration::from_millis(50),
            controller.run(spec(&workspace, Duration::from_secs(30))),
        )
        .await;
        assert!(abandoned.is_err());

        for _ in 0..100 {
            if mock.running() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(mock.running(), 0);
        let calls = mock.calls();
        assert!(calls.contains(&MockCall::Stop));
        assert!(calls.contains(&MockCall::Remove));
        workspace.release().await;
    }

    #[tokio::test]
    async fn test_cleanup_calls_are_bounded() {
        let root = tempdir().unwrap();
        let workspace = WorkspaceManager::new(root.path(), root.path(), "t")
            .stage(&[])
            .await
            .unwrap();
        let mock = Arc::new(MockRuntime::hanging().with_hanging_cleanup());
        let controller = controller(&mock, true, 0)
            .await
            .with_cleanup_timeout(Duration::from_millis(50));

        let started = Instant::now();
        let outcome = controller
            .run(spec(&workspace, Duration::from_millis(50)))
            .await;

        assert_eq!(outcome, RunOutcome::Timeout);
        assert!(started.elapsed() < Duration::from_secs(2));
        let calls = mock.calls();
        assert!(calls.contains(&MockCall::Stop));
        assert!(calls.contains(&MockCall::Remove));
        workspace.release().await;
    }
}
