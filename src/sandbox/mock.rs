//! Scripted container runtime for testing.
//!
//! Records every call and lets tests drive each branch of the run
//! lifecycle without a Docker daemon.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use super::runtime::{ContainerRuntime, ContainerSpec};
use super::SandboxError;

/// How a started container behaves.
#[derive(Debug, Clone)]
pub(crate) enum MockBehavior {
    /// Exits with the given status after printing the output.
    Exit { status: i64, output: Bytes },
    /// Never exits on its own.
    Hang,
    /// Creation fails.
    LaunchError(String),
    /// Waiting fails after a successful start.
    WaitError(String),
}

/// A recorded runtime call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum MockCall {
    Ping,
    Create(String),
    Wait,
    Logs,
    Stop,
    Remove,
    ImageExists(String),
    Pull(String),
}

/// A mock runtime for testing.
#[derive(Debug)]
pub(crate) struct MockRuntime {
    behavior: MockBehavior,
    reachable: AtomicBool,
    /// `Some(pullable)` makes the first create report a missing image.
    missing_image: Mutex<Option<bool>>,
    failing_cleanup: bool,
    hanging_cleanup: bool,
    calls: Mutex<Vec<MockCall>>,
    created: Mutex<Vec<ContainerSpec>>,
    /// Files present in the mounted workspace at each create.
    staged: Mutex<Vec<Vec<String>>>,
    live: Mutex<HashSet<String>>,
    next_id: AtomicUsize,
}

impl MockRuntime {
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            reachable: AtomicBool::new(true),
            missing_image: Mutex::new(None),
            failing_cleanup: false,
            hanging_cleanup: false,
            calls: Mutex::new(Vec::new()),
            created: Mutex::new(Vec::new()),
            staged: Mutex::new(Vec::new()),
            live: Mutex::new(HashSet::new()),
            next_id: AtomicUsize::new(0),
        }
    }

    /// A container that exits with `status` after printing `output`.
    pub fn exiting(status: i64, output: &str) -> Self {
        Self::new(MockBehavior::Exit {
            status,
            output: Bytes::copy_from_slice(output.as_bytes()),
        })
    }

    pub fn hanging() -> Self {
        Self::new(MockBehavior::Hang)
    }

    pub fn failing_launch(message: &str) -> Self {
        Self::new(MockBehavior::LaunchError(message.to_string()))
    }

    pub fn failing_wait(message: &str) -> Self {
        Self::new(MockBehavior::WaitError(message.to_string()))
    }

    /// The image is missing until pulled; the pull succeeds if `pullable`.
    pub fn with_missing_image(self, pullable: bool) -> Self {
        *self.missing_image.lock().unwrap() = Some(pullable);
        self
    }

    /// Stop and remove both fail.
    pub fn with_failing_cleanup(mut self) -> Self {
        self.failing_cleanup = true;
        self
    }

    /// Stop and remove never return.
    pub fn with_hanging_cleanup(mut self) -> Self {
        self.hanging_cleanup = true;
        self
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn ping_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| **c == MockCall::Ping)
            .count()
    }

    pub fn created(&self) -> Vec<ContainerSpec> {
        self.created.lock().unwrap().clone()
    }

    pub fn staged(&self) -> Vec<Vec<String>> {
        self.staged.lock().unwrap().clone()
    }

    /// Containers created and not yet removed.
    pub fn running(&self) -> usize {
        self.live.lock().unwrap().len()
    }

    fn record(&self, call: MockCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn check_reachable(&self) -> Result<(), SandboxError> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SandboxError::runtime_unavailable("mock runtime is down"))
        }
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn ping(&self) -> Result<(), SandboxError> {
        self.record(MockCall::Ping);
        self.check_reachable()
    }

    async fn create_and_start(&self, spec: &ContainerSpec) -> Result<String, SandboxError> {
        self.record(MockCall::Create(spec.image.clone()));
        self.check_reachable()?;

        if self.missing_image.lock().unwrap().is_some() {
            return Err(SandboxError::image_missing(spec.image.clone()));
        }
        if let MockBehavior::LaunchError(ref message) = self.behavior {
            return Err(SandboxError::launch_failed(message.clone()));
        }

        let mut files: Vec<String> = std::fs::read_dir(&spec.mount_source)
            .map(|entries| {
                entries
                    .filter_map(Result::ok)
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        files.sort();
        self.staged.lock().unwrap().push(files);
        self.created.lock().unwrap().push(spec.clone());

        let id = format!("mock-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.live.lock().unwrap().insert(id.clone());
        Ok(id)
    }

    async fn wait(&self, _id: &str) -> Result<i64, SandboxError> {
        self.record(MockCall::Wait);
        match self.behavior {
            MockBehavior::Exit { status, .. } => Ok(status),
            MockBehavior::Hang => std::future::pending().await,
            MockBehavior::WaitError(ref message) => {
                Err(SandboxError::container_failed(message.clone()))
            }
            MockBehavior::LaunchError(_) => Err(SandboxError::container_failed("never started")),
        }
    }

    async fn logs(&self, _id: &str) -> Result<Bytes, SandboxError> {
        self.record(MockCall::Logs);
        match self.behavior {
            MockBehavior::Exit { ref output, .. } => Ok(output.clone()),
            _ => Ok(Bytes::new()),
        }
    }

    async fn stop(&self, _id: &str) -> Result<(), SandboxError> {
        self.record(MockCall::Stop);
        if self.hanging_cleanup {
            std::future::pending::<()>().await;
        }
        if self.failing_cleanup {
            return Err(SandboxError::container_failed("stop refused"));
        }
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), SandboxError> {
        self.record(MockCall::Remove);
        if self.hanging_cleanup {
            std::future::pending::<()>().await;
        }
        // The container is gone from the mock's view either way
        self.live.lock().unwrap().remove(id);
        if self.failing_cleanup {
            return Err(SandboxError::container_failed("remove refused"));
        }
        Ok(())
    }

    async fn image_exists(&self, image: &str) -> Result<bool, SandboxError> {
        self.record(MockCall::ImageExists(image.to_string()));
        self.check_reachable()?;
        Ok(self.missing_image.lock().unwrap().is_none())
    }

    async fn pull_image(&self, image: &str) -> Result<(), SandboxError> {
        self.record(MockCall::Pull(image.to_string()));
        self.check_reachable()?;
        let mut missing = self.missing_image.lock().unwrap();
        match *missing {
            Some(false) => Err(SandboxError::image_missing(image)),
            _ => {
                *missing = None;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_tracks_live_containers() {
        let mock = MockRuntime::exiting(0, "ok");
        let spec = ContainerSpec {
            name: "c".to_string(),
            image: "img".to_string(),
            command: vec![],
            mount_source: std::env::temp_dir().join("does-not-exist-codesandbox"),
            mount_target: "/code".to_string(),
            limits: crate::sandbox::RunLimits {
                memory_bytes: 1,
                nano_cpus: 1,
                network_disabled: true,
                read_only: true,
            },
            workspace_id: "w".to_string(),
        };

        let id = mock.create_and_start(&spec).await.unwrap();
        assert_eq!(mock.running(), 1);
        assert_eq!(mock.wait(&id).await.unwrap(), 0);
        assert_eq!(mock.logs(&id).await.unwrap(), Bytes::from("ok"));
        mock.remove(&id).await.unwrap();
        assert_eq!(mock.running(), 0);
        assert_eq!(mock.staged(), vec![Vec::<String>::new()]);
    }

    #[tokio::test]
    async fn test_mock_unreachable() {
        let mock = MockRuntime::exiting(0, "");
        mock.set_reachable(false);
        assert!(mock.ping().await.unwrap_err().is_runtime_unavailable());
    }

    #[test]
    fn test_mock_runtime_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<MockRuntime>();
    }
}
