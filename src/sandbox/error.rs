//! Domain-specific error types for container runtime operations.
//!
//! Typed errors enable callers to match on specific failure modes
//! rather than parsing error message strings.

/// Errors that can occur while driving the container runtime.
#[derive(Debug, Clone, thiserror::Error)]
pub(crate) enum SandboxError {
    /// The runtime daemon is not running or not reachable.
    #[error("Container runtime is not available: {message}")]
    RuntimeUnavailable { message: String },

    /// Container image was not found.
    #[error("Container image not found: {image}")]
    ImageMissing { image: String },

    /// The container could not be created or started.
    #[error("Failed to launch container: {message}")]
    LaunchFailed { message: String },

    /// A call on an already started container failed (wait, logs, stop, remove).
    #[error("Container operation failed: {message}")]
    ContainerFailed { message: String },
}

impl SandboxError {
    /// Creates a `RuntimeUnavailable` error.
    pub fn runtime_unavailable(message: impl Into<String>) -> Self {
        Self::RuntimeUnavailable {
            message: message.into(),
        }
    }

    /// Creates an `ImageMissing` error.
    pub fn image_missing(image: impl Into<String>) -> Self {
        Self::ImageMissing {
            image: image.into(),
        }
    }

    /// Creates a `LaunchFailed` error.
    pub fn launch_failed(message: impl Into<String>) -> Self {
        Self::LaunchFailed {
            message: message.into(),
        }
    }

    /// Creates a `ContainerFailed` error.
    pub fn container_failed(message: impl Into<String>) -> Self {
        Self::ContainerFailed {
            message: message.into(),
        }
    }

    /// Returns true if the runtime itself could not be reached.
    pub fn is_runtime_unavailable(&self) -> bool {
        matches!(self, Self::RuntimeUnavailable { .. })
    }

    /// Returns true if this is an image not found error.
    pub fn is_image_missing(&self) -> bool {
        matches!(self, Self::ImageMissing { .. })
    }
}
