//! Image management for the execution and grading images.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use tracing::info;

use crate::config::Config;
use crate::languages::REGISTRY;
use crate::sandbox::{ContainerRuntime, DockerRuntime};

/// Image management actions.
#[derive(Subcommand, Debug)]
pub enum ImageAction {
    /// Pull every language image and the grading image
    Pull {
        /// Force pull even if the image exists locally
        #[arg(long, default_value = "false")]
        force: bool,
    },

    /// Show which images are present locally
    Status,
}

/// What happened to one image during a pull pass.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PullResult {
    Pulled,
    Skipped,
    Failed(String),
}

/// Run image management command.
pub async fn run(config: &Config, action: ImageAction) -> Result<()> {
    let docker = DockerRuntime::connect();
    docker
        .ping()
        .await
        .context("Cannot reach the Docker daemon. Is Docker running?")?;

    let images = required_images(config);
    match action {
        ImageAction::Pull { force } => {
            let results = pull_all(&docker, &images, force).await;
            for (image, result) in &results {
                let line = match result {
                    PullResult::Pulled => format!("{} {image}", "✓".green()),
                    PullResult::Skipped => {
                        format!("{} {image} {}", "•".blue(), "(present, use --force to re-pull)".dimmed())
                    }
                    PullResult::Failed(e) => format!("{} {image}: {e}", "✗".red()),
                };
                println!("{line}");
            }
            let failed = results
                .iter()
                .filter(|(_, r)| matches!(r, PullResult::Failed(_)))
                .count();
            if failed > 0 {
                anyhow::bail!("{failed} image(s) failed to pull");
            }
        }
        ImageAction::Status => {
            for image in &images {
                let present = docker.image_exists(image).await?;
                let status = if present {
                    "present".green()
                } else {
                    "missing".red()
                };
                println!("{image:<24} {status}");
            }
        }
    }

    Ok(())
}

/// Registry images plus the grading image, deduplicated in order.
fn required_images(config: &Config) -> Vec<String> {
    let mut images: Vec<String> = Vec::new();
    let all = REGISTRY
        .iter()
        .map(|spec| spec.image)
        .chain(std::iter::once(config.grading.image.as_str()));
    for image in all {
        if !images.iter().any(|i| i == image) {
            images.push(image.to_string());
        }
    }
    images
}

async fn pull_all(
    runtime: &dyn ContainerRuntime,
    images: &[String],
    force: bool,
) -> Vec<(String, PullResult)> {
    let mut results = Vec::with_capacity(images.len());
    for image in images {
        let result = pull_one(runtime, image, force).await;
        results.push((image.clone(), result));
    }
    results
}

async fn pull_one(runtime: &dyn ContainerRuntime, image: &str, force: bool) -> PullResult {
    if !force {
        match runtime.image_exists(image).await {
            Ok(true) => {
                info!("Image '{}' found locally. Skipping pull.", image);
                return PullResult::Skipped;
            }
            Ok(false) => {}
            Err(e) => return PullResult::Failed(e.to_string()),
        }
    }
    match runtime.pull_image(image).await {
        Ok(()) => PullResult::Pulled,
        Err(e) => PullResult::Failed(e.to_string()),
    }
}
