use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::sandbox::RunLimits;

const CONFIG_FILE: &str = "codesandbox.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub grading: GradingConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Where workspaces are staged.
///
/// `root` is the directory as this process sees it. `mount_root` is the same
/// directory as the container runtime resolves bind mounts. They differ when
/// the service itself runs in a container that shares a volume with the
/// daemon's host, and a mismatch shows up as empty `/code` directories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Staging root visible to this process
    #[serde(default = "default_workspace_root")]
    pub root: String,

    /// Staging root as the runtime resolves it (defaults to `root`)
    #[serde(default)]
    pub mount_root: Option<String>,

    /// Directory name prefix for each workspace
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: default_workspace_root(),
            mount_root: None,
            prefix: default_prefix(),
        }
    }
}

impl WorkspaceConfig {
    /// Resolved staging root for this process.
    pub fn host_root(&self) -> Result<PathBuf> {
        expand_path(&self.root).map(PathBuf::from)
    }

    /// Resolved staging root for the container runtime.
    pub fn runtime_root(&self) -> Result<PathBuf> {
        match self.mount_root {
            Some(ref mount_root) => expand_path(mount_root).map(PathBuf::from),
            None => self.host_root(),
        }
    }
}

/// Per-call-type resource policy.
///
/// Each table is read over its own call type's defaults, so a partial
/// `[limits.grade]` keeps the grading memory cap.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "LimitsFile")]
pub struct LimitsConfig {
    pub execute: ResourceConfig,
    pub grade: ResourceConfig,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            execute: default_execute_limits(),
            grade: default_grade_limits(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Memory limit (e.g., "128m")
    pub memory: String,

    /// CPU limit (e.g., "1")
    pub cpus: String,

    /// Wait bound in seconds
    pub timeout_secs: u64,
}

/// `[limits]` as written in the file; absent fields fall back per table.
#[derive(Debug, Default, Deserialize)]
struct LimitsFile {
    #[serde(default)]
    execute: ResourceOverrides,
    #[serde(default)]
    grade: ResourceOverrides,
}

#[derive(Debug, Default, Deserialize)]
struct ResourceOverrides {
    memory: Option<String>,
    cpus: Option<String>,
    timeout_secs: Option<u64>,
}

impl ResourceOverrides {
    fn apply(self, base: ResourceConfig) -> ResourceConfig {
        ResourceConfig {
            memory: self.memory.unwrap_or(base.memory),
            cpus: self.cpus.unwrap_or(base.cpus),
            timeout_secs: self.timeout_secs.unwrap_or(base.timeout_secs),
        }
    }
}

impl From<LimitsFile> for LimitsConfig {
    fn from(file: LimitsFile) -> Self {
        Self {
            execute: file.execute.apply(default_execute_limits()),
            grade: file.grade.apply(default_grade_limits()),
        }
    }
}

impl ResourceConfig {
    /// Converts to the fixed run policy: network off, workspace read-only.
    pub fn run_limits(&self) -> Result<RunLimits> {
        let memory_bytes = parse_memory_limit(&self.memory)?;
        let cpus: f64 = self
            .cpus
            .parse()
            .with_context(|| format!("Invalid CPU limit: {}", self.cpus))?;
        if cpus <= 0.0 {
            anyhow::bail!("CPU limit must be positive, got {cpus}");
        }

        #[allow(clippy::cast_possible_truncation)]
        let nano_cpus = (cpus * 1_000_000_000.0) as i64;

        Ok(RunLimits {
            memory_bytes,
            nano_cpus,
            network_disabled: true,
            read_only: true,
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradingConfig {
    /// Image the grading harness runs in
    #[serde(default = "default_grading_image")]
    pub image: String,
}

impl Default for GradingConfig {
    fn default() -> Self {
        Self {
            image: default_grading_image(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Pull an image once when it is missing locally
    #[serde(default = "default_true")]
    pub pull_missing_images: bool,

    /// Concurrent isolated runs allowed (0 = unbounded)
    #[serde(default)]
    pub max_concurrent_runs: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            pull_missing_images: true,
            max_concurrent_runs: 0,
        }
    }
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_workspace_root() -> String {
    std::env::temp_dir()
        .join("codesandbox")
        .to_string_lossy()
        .into_owned()
}

fn default_prefix() -> String {
    "codesandbox".to_string()
}

fn default_cpus() -> String {
    "1".to_string()
}

fn default_execute_limits() -> ResourceConfig {
    ResourceConfig {
        memory: "128m".to_string(),
        cpus: default_cpus(),
        timeout_secs: 10,
    }
}

fn default_grade_limits() -> ResourceConfig {
    ResourceConfig {
        memory: "256m".to_string(),
        cpus: default_cpus(),
        timeout_secs: 15,
    }
}

fn default_grading_image() -> String {
    "python:3.8-slim".to_string()
}

impl Config {
    /// Load configuration from an explicit path, or `codesandbox.toml` in
    /// `project_dir`, using defaults if neither exists.
    pub fn load(explicit: Option<&Path>, project_dir: &Path) -> Result<Self> {
        let config_path = match explicit {
            Some(path) => {
                if !path.exists() {
                    anyhow::bail!("Config file not found: {}", path.display());
                }
                path.to_path_buf()
            }
            None => project_dir.join(CONFIG_FILE),
        };

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        // Surface bad limits at startup instead of on the first request
        config.limits.execute.run_limits()?;
        config.limits.grade.run_limits()?;

        Ok(config)
    }
}

/// Expand ~ to home directory
fn expand_path(path: &str) -> Result<String> {
    if let Some(rest) = path.strip_prefix("~/") {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        Ok(home.join(rest).to_string_lossy().into_owned())
    } else {
        Ok(path.to_string())
    }
}

/// Parse memory limit string (e.g., "8g", "512m") to a positive byte count
fn parse_memory_limit(limit: &str) -> Result<i64> {
    let limit = limit.to_lowercase();

    let (digits, multiplier) = if let Some(num) = limit.strip_suffix('g') {
        (num, 1024 * 1024 * 1024)
    } else if let Some(num) = limit.strip_suffix('m') {
        (num, 1024 * 1024)
    } else {
        (limit.as_str(), 1)
    };

    let value: i64 = digits
        .parse()
        .with_context(|| format!("Invalid memory limit: {limit}"))?;
    let bytes = value
        .checked_mul(multiplier)
        .with_context(|| format!("Memory limit too large: {limit}"))?;
    if bytes <= 0 {
        anyhow::bail!("Memory limit must be positive, got {limit}");
    }
    Ok(bytes)
}
