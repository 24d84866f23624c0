use async_trait::async_trait;
use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, LogsOptions, RemoveContainerOptions,
    StopContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::CreateImageOptions;
use bollard::Docker;
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use super::runtime::{ContainerRuntime, ContainerSpec};
use super::SandboxError;

const WORKSPACE_LABEL: &str = "codesandbox.workspace";

/// Docker daemon driven through bollard.
pub(crate) struct DockerRuntime {
    docker: Result<Docker, String>,
}

impl DockerRuntime {
    /// Connects with the local defaults (`DOCKER_HOST` or the unix socket).
    ///
    /// A bad connection setting is kept and reported as `RuntimeUnavailable`
    /// on every call instead of aborting startup.
    pub fn connect() -> Self {
        let docker = Docker::connect_with_local_defaults().map_err(|e| {
            warn!("Failed to configure Docker client: {}", e);
            e.to_string()
        });
        Self { docker }
    }

    fn client(&self) -> Result<&Docker, SandboxError> {
        self.docker
            .as_ref()
            .map_err(|message| SandboxError::runtime_unavailable(message.clone()))
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ping(&self) -> Result<(), SandboxError> {
        self.client()?
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| SandboxError::runtime_unavailable(e.to_string()))
    }

    async fn create_and_start(&self, spec: &ContainerSpec) -> Result<String, SandboxError> {
        let docker = self.client()?;
        let config = build_container_config(spec)?;

        debug!(container = %spec.name, image = %spec.image, "Creating container");
        let created = docker
            .create_container(
                Some(CreateContainerOptions {
                    name: spec.name.clone(),
                    platform: None,
                }),
                config,
            )
            .await
            .map_err(|e| match e {
                BollardError::DockerResponseServerError {
                    status_code: 404, ..
                } => SandboxError::image_missing(spec.image.clone()),
                other => launch_error(other),
            })?;

        debug!(container = %spec.name, "Starting container");
        if let Err(e) = docker.start_container::<String>(&created.id, None).await {
            // Never leave a created-but-unstarted container behind
            if let Err(remove_err) = self.remove(&created.id).await {
                warn!(container = %spec.name, "Failed to remove unstarted container: {}", remove_err);
            }
            return Err(launch_error(e));
        }

        Ok(created.id)
    }

    async fn wait(&self, id: &str) -> Result<i64, SandboxError> {
        let mut stream = self.client()?.wait_container(
            id,
            Some(WaitContainerOptions {
                condition: "not-running",
            }),
        );

        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard reports a non-zero exit as an error carrying the code
            Some(Err(BollardError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(container_error(e)),
            None => Err(SandboxError::container_failed(
                "wait stream ended without an exit status",
            )),
        }
    }

    async fn logs(&self, id: &str) -> Result<Bytes, SandboxError> {
        let mut stream = self.client()?.logs(
            id,
            Some(LogsOptions::<String> {
                stdout: true,
                stderr: true,
                ..Default::default()
            }),
        );

        let mut output = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(container_error)?;
            output.extend_from_slice(&chunk.into_bytes());
        }
        Ok(output.freeze())
    }

    async fn stop(&self, id: &str) -> Result<(), SandboxError> {
        self.client()?
            .stop_container(id, Some(StopContainerOptions { t: 0 }))
            .await
            .map_err(container_error)
    }

    async fn remove(&self, id: &str) -> Result<(), SandboxError> {
        match self
            .client()?
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            Ok(())
            | Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(()),
            Err(e) => Err(container_error(e)),
        }
    }

    async fn image_exists(&self, image: &str) -> Result<bool, SandboxError> {
        match self.client()?.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(container_error(e)),
        }
    }

    async fn pull_image(&self, image: &str) -> Result<(), SandboxError> {
        info!("Pulling Docker image: {}", image);

        let pull_options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };
        let mut stream = self.client()?.create_image(Some(pull_options), None, None);

        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(output) => {
                    if let Some(error) = output.error {
                        warn!("Docker pull error for {}: {}", image, error);
                        return Err(SandboxError::image_missing(image));
                    }
                    if let Some(status) = output.status {
                        debug!(image, "{}", status.trim());
                    }
                }
                Err(BollardError::DockerResponseServerError {
                    status_code: 404, ..
                }) => return Err(SandboxError::image_missing(image)),
                Err(e) => return Err(container_error(e)),
            }
        }

        info!("Image pulled successfully: {}", image);
        Ok(())
    }
}

fn build_container_config(spec: &ContainerSpec) -> Result<ContainerConfig<String>, SandboxError> {
    let limits = &spec.limits;
    let source = spec
        .mount_source
        .to_str()
        .ok_or_else(|| SandboxError::launch_failed("Invalid workspace path"))?;
    let mode = if limits.read_only { "ro" } else { "rw" };

    let mut config = ContainerConfig {
        image: Some(spec.image.clone()),
        cmd: Some(spec.command.clone()),
        working_dir: Some(spec.mount_target.clone()),
        network_disabled: Some(limits.network_disabled),
        labels: Some(HashMap::from([(
            WORKSPACE_LABEL.to_string(),
            spec.workspace_id.clone(),
        )])),
        host_config: Some(bollard::service::HostConfig {
            binds: Some(vec![format!("{}:{}:{}", source, spec.mount_target, mode)]),
            memory: Some(limits.memory_bytes),
            // Equal to memory: no swap on top of the cap
            memory_swap: Some(limits.memory_bytes),
            nano_cpus: Some(limits.nano_cpus),
            auto_remove: Some(false),
            ..Default::default()
        }),
        ..Default::default()
    };

    if limits.network_disabled {
        if let Some(ref mut host_config) = config.host_config {
            host_config.network_mode = Some("none".to_string());
        }
    }

    Ok(config)
}

/// True when the daemon never produced an API response.
fn is_connection_error(error: &BollardError) -> bool {
    !matches!(
        error,
        BollardError::DockerResponseServerError { .. }
            | BollardError::DockerContainerWaitError { .. }
            | BollardError::DockerStreamError { .. }
    )
}

fn launch_error(error: BollardError) -> SandboxError {
    if is_connection_error(&error) {
        SandboxError::runtime_unavailable(error.to_string())
    } else {
        SandboxError::launch_failed(error.to_string())
    }
}

fn container_error(error: BollardError) -> SandboxError {
    if is_connection_error(&error) {
        SandboxError::runtime_unavailable(error.to_string())
    } else {
        SandboxError::container_failed(error.to_string())
    }
}
