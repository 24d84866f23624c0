//! Execution and grading orchestration.
//!
//! Each call validates its input, checks the runtime, stages a workspace,
//! runs one container and releases the workspace before returning. Failures
//! inside an accepted request come back as a well-formed result that
//! describes them; only the three [`ServiceError`] cases are raised.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::classify::{classify, ExecutionResult};
use crate::config::Config;
use crate::grading::harness::{build_harness, runner_command, GRADING_LANGUAGE};
use crate::grading::{parser, GradeResult};
use crate::languages::{supported_ids, Language};
use crate::sandbox::{RunController, RunLimits, RunOutcome, RunSpec, RuntimeHandle, SandboxError};
use crate::workspace::WorkspaceManager;

/// Hard failures surfaced to the caller.
#[derive(Debug, thiserror::Error)]
pub(crate) enum ServiceError {
    /// The requested language is not in the registry.
    #[error("Unsupported language: '{language}'. Supported: {supported}")]
    UnsupportedLanguage { language: String, supported: String },

    /// The container runtime cannot be reached.
    #[error("Container runtime unavailable: {message}")]
    RuntimeUnavailable { message: String },

    /// The configured image does not exist.
    #[error("Execution image not found: {image}")]
    ImageMissing { image: String },
}

impl ServiceError {
    /// Creates an `UnsupportedLanguage` error.
    pub fn unsupported_language(language: impl Into<String>) -> Self {
        Self::UnsupportedLanguage {
            language: language.into(),
            supported: supported_ids(),
        }
    }

    /// Creates an `UnsupportedLanguage` error naming an explicit allow-list.
    pub fn unsupported_language_of(language: impl Into<String>, supported: &str) -> Self {
        Self::UnsupportedLanguage {
            language: language.into(),
            supported: supported.to_string(),
        }
    }

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

    pub fn is_unsupported_language(&self) -> bool {
        matches!(self, Self::UnsupportedLanguage { .. })
    }

    pub fn is_runtime_unavailable(&self) -> bool {
        matches!(self, Self::RuntimeUnavailable { .. })
    }

    pub fn is_image_missing(&self) -> bool {
        matches!(self, Self::ImageMissing { .. })
    }
}

impl From<SandboxError> for ServiceError {
    fn from(error: SandboxError) -> Self {
        match error {
            SandboxError::ImageMissing { image } => Self::image_missing(image),
            SandboxError::RuntimeUnavailable { message } => Self::runtime_unavailable(message),
            other => Self::runtime_unavailable(other.to_string()),
        }
    }
}

fn default_language() -> String {
    "python".to_string()
}

/// Run `code` once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ExecutionRequest {
    pub code: String,
    #[serde(default = "default_language")]
    pub language: String,
}

/// Grade `student_code` against the unittest suite in `test_code`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct GradeRequest {
    pub student_code: String,
    pub test_code: String,
    #[serde(default = "default_language")]
    pub language: String,
}

/// Limits and wait bound for one call type.
#[derive(Debug, Clone, Copy)]
struct CallPolicy {
    limits: RunLimits,
    timeout: Duration,
}

/// The orchestrator. Cheap to clone; clones share the runtime client.
#[derive(Clone)]
pub(crate) struct CodeSandbox {
    runtime: RuntimeHandle,
    controller: RunController,
    workspaces: WorkspaceManager,
    execute_policy: CallPolicy,
    grade_policy: CallPolicy,
    grading_image: String,
}

impl CodeSandbox {
    pub fn new(runtime: RuntimeHandle, config: &Config) -> Result<Self> {
        let controller = RunController::new(
            runtime.clone(),
            config.runtime.pull_missing_images,
            config.runtime.max_concurrent_runs,
        );
        Ok(Self {
            runtime,
            controller,
            workspaces: WorkspaceManager::from_config(&config.workspace)?,
            execute_policy: CallPolicy {
                limits: config.limits.execute.run_limits()?,
                timeout: config.limits.execute.timeout(),
            },
            grade_policy: CallPolicy {
                limits: config.limits.grade.run_limits()?,
                timeout: config.limits.grade.timeout(),
            },
            grading_image: config.grading.image.clone(),
        })
    }

    pub fn workspaces(&self) -> &WorkspaceManager {
        &self.workspaces
    }

    /// Re-checks the runtime connection.
    pub async fn health(&self) -> bool {
        self.runtime.check().await.is_ok()
    }

    pub async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResult, ServiceError> {
        let language: Language = request.language.parse()?;
        self.runtime.ensure_available().await?;

        let spec = language.spec();
        let source = spec.source_name();
        let command = match spec.command_for(&source) {
            Ok(command) => command,
            Err(e) => {
                error!(%language, "Invalid command template: {}", e);
                return Ok(ExecutionResult::error(format!("Error: {e}")));
            }
        };

        let files = [(source.as_str(), request.code.as_str())];
        let workspace = match self.workspaces.stage(&files).await {
            Ok(workspace) => workspace,
            Err(e) => {
                error!(%language, "Failed to stage workspace: {:#}", e);
                return Ok(ExecutionResult::error(format!("Error: {e:#}")));
            }
        };
        info!(%language, workspace = %workspace.id(), "Executing submission");

        let policy = self.execute_policy;
        let outcome = self
            .controller
            .run(RunSpec {
                image: spec.image,
                command,
                workspace: &workspace,
                limits: policy.limits,
                timeout: policy.timeout,
            })
            .await;
        workspace.release().await;

        match outcome {
            RunOutcome::Success {
                exit_status,
                output,
            } => Ok(classify(&output, exit_status)),
            RunOutcome::Timeout => Ok(ExecutionResult::error(format!(
                "Error: Code execution timed out ({} second limit)",
                policy.timeout.as_secs()
            ))),
            RunOutcome::LaunchFailure(detail) => {
                Ok(ExecutionResult::error(format!("Error: {detail}")))
            }
            RunOutcome::ImageMissing(image) => Err(ServiceError::image_missing(image)),
            RunOutcome::RuntimeUnavailable(detail) => Err(ServiceError::runtime_unavailable(detail)),
        }
    }

    pub async fn grade(&self, request: &GradeRequest) -> Result<GradeResult, ServiceError> {
        let language: Language = request.language.parse()?;
        if language.id() != GRADING_LANGUAGE {
            return Err(ServiceError::unsupported_language_of(
                &request.language,
                GRADING_LANGUAGE,
            ));
        }
        self.runtime.ensure_available().await?;

        let files = build_harness(&request.student_code, &request.test_code);
        let workspace = match self.workspaces.stage(&files).await {
            Ok(workspace) => workspace,
            Err(e) => {
                error!("Failed to stage grading workspace: {:#}", e);
                return Ok(GradeResult::failure("error", format!("Container error: {e:#}")));
            }
        };
        info!(workspace = %workspace.id(), "Grading submission");

        let policy = self.grade_policy;
        let outcome = self
            .controller
            .run(RunSpec {
                image: &self.grading_image,
                command: runner_command(),
                workspace: &workspace,
                limits: policy.limits,
                timeout: policy.timeout,
            })
            .await;
        workspace.release().await;

        match outcome {
            RunOutcome::Success { output, .. } => match parser::parse(&output) {
                Ok(result) => Ok(result.normalized()),
                Err(e) => {
                    warn!("{}", e);
                    Ok(GradeResult::failure("error", "Failed to parse test results"))
                }
            },
            RunOutcome::Timeout => Ok(GradeResult::failure(
                "timeout",
                format!(
                    "Test execution timed out ({} second limit)",
                    policy.timeout.as_secs()
                ),
            )),
            RunOutcome::LaunchFailure(detail) => Ok(GradeResult::failure(
                "error",
                format!("Container error: {detail}"),
            )),
            RunOutcome::ImageMissing(image) => Err(ServiceError::image_missing(image)),
            RunOutcome::RuntimeUnavailable(detail) => Err(ServiceError::runtime_unavailable(detail)),
        }
    }
}
