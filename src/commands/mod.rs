//! CLI command implementations.
//!
//! Each submodule implements one `codesandbox` command, with output
//! formatting kept in pure functions for testability.

pub mod exec;
pub mod grade;
pub mod health;
pub mod images;
pub mod languages;
pub mod serve;

use anyhow::Result;
use std::sync::Arc;

use crate::config::Config;
use crate::sandbox::{DockerRuntime, RuntimeHandle};
use crate::service::CodeSandbox;

/// Connect to the local Docker daemon and build the orchestrator.
async fn connect_sandbox(config: &Config) -> Result<CodeSandbox> {
    let runtime = RuntimeHandle::connect(Arc::new(DockerRuntime::connect())).await;
    CodeSandbox::new(runtime, config)
}
