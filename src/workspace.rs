//! Ephemeral staging directories for submitted code.
//!
//! A [`Workspace`] is owned by exactly one request. [`Workspace::release`]
//! consumes it, so it cannot be released twice; if a request unwinds before
//! releasing, `Drop` removes the directory instead.

use anyhow::{Context, Result};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::WorkspaceConfig;

/// Creates workspaces under a staging root.
#[derive(Debug, Clone)]
pub(crate) struct WorkspaceManager {
    host_root: PathBuf,
    mount_root: PathBuf,
    prefix: String,
}

/// One staged directory, addressable both from this process and from the
/// container runtime.
#[derive(Debug)]
pub(crate) struct Workspace {
    id: Uuid,
    host_path: PathBuf,
    mount_path: PathBuf,
    released: bool,
}

impl WorkspaceManager {
    pub fn new(
        host_root: impl Into<PathBuf>,
        mount_root: impl Into<PathBuf>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            host_root: host_root.into(),
            mount_root: mount_root.into(),
            prefix: prefix.into(),
        }
    }

    pub fn from_config(config: &WorkspaceConfig) -> Result<Self> {
        Ok(Self::new(
            config.host_root()?,
            config.runtime_root()?,
            config.prefix.clone(),
        ))
    }

    pub fn host_root(&self) -> &Path {
        &self.host_root
    }

    /// Create a fresh directory and write each file into it verbatim.
    ///
    /// On any write failure the directory is removed before returning.
    pub async fn stage(&self, files: &[(&str, &str)]) -> Result<Workspace> {
        for (name, _) in files {
            validate_file_name(name)?;
        }

        tokio::fs::create_dir_all(&self.host_root)
            .await
            .with_context(|| {
                format!(
                    "Failed to create workspace root: {}",
                    self.host_root.display()
                )
            })?;

        let id = Uuid::new_v4();
        let dir_name = format!("{}-{}", self.prefix, id.simple());
        let host_path = self.host_root.join(&dir_name);

        // create_dir (not _all): a collision must fail rather than share
        tokio::fs::create_dir(&host_path)
            .await
            .with_context(|| format!("Failed to create workspace: {}", host_path.display()))?;

        let workspace = Workspace {
            id,
            host_path,
            mount_path: self.mount_root.join(&dir_name),
            released: false,
        };
        debug!(workspace = %workspace.id, path = %workspace.host_path.display(), "Workspace created");

        if let Err(e) = write_files(&workspace.host_path, files).await {
            workspace.release().await;
            return Err(e);
        }

        Ok(workspace)
    }
}

impl Workspace {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Path as seen by this process.
    pub fn host_path(&self) -> &Path {
        &self.host_path
    }

    /// Path as the container runtime resolves it for bind mounts.
    pub fn mount_path(&self) -> &Path {
        &self.mount_path
    }

    /// Recursively delete the directory. Failures are logged, never returned.
    pub async fn release(mut self) {
        self.released = true;
        match tokio::fs::remove_dir_all(&self.host_path).await {
            Ok(()) => debug!(workspace = %self.id, "Workspace removed"),
            Err(e) => warn!(
                workspace = %self.id,
                path = %self.host_path.display(),
                "Failed to remove workspace: {}",
                e
            ),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        warn!(workspace = %self.id, "Workspace dropped without release, removing");
        if let Err(e) = std::fs::remove_dir_all(&self.host_path) {
            warn!(
                workspace = %self.id,
                path = %self.host_path.display(),
                "Failed to remove workspace: {}",
                e
            );
        }
    }
}

async fn write_files(dir: &Path, files: &[(&str, &str)]) -> Result<()> {
    for (name, content) in files {
        let path = dir.join(name);
        tokio::fs::write(&path, content)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }
    Ok(())
}

/// Staged names must be plain file names inside the workspace.
fn validate_file_name(name: &str) -> Result<()> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => anyhow::bail!("Invalid workspace file name: {name:?}"),
    }
}
