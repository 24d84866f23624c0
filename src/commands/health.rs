//! `codesandbox health`: check the container runtime is reachable.

use anyhow::Result;
use colored::Colorize;
use std::sync::Arc;

use crate::sandbox::{DockerRuntime, RuntimeHandle};

pub async fn run() -> Result<()> {
    let handle = RuntimeHandle::connect(Arc::new(DockerRuntime::connect())).await;
    check(&handle).await
}

async fn check(handle: &RuntimeHandle) -> Result<()> {
    match handle.check().await {
        Ok(()) => {
            println!("{} Container runtime is reachable", "✓".green());
            Ok(())
        }
        Err(e) => {
            println!("{} {}", "✗".red(), e);
            Err(e.into())
        }
    }
}
