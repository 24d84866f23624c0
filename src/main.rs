use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod classify;
mod commands;
mod config;
mod grading;
mod languages;
mod sandbox;
mod service;
mod templates;
mod workspace;

use config::Config;

#[derive(Parser)]
#[command(name = "codesandbox")]
#[command(
    author,
    version,
    about = "Run and grade untrusted code in isolated containers"
)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (default: ./codesandbox.toml if present)
    #[arg(long, global = true, env = "CODESANDBOX_CONFIG")]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value = "text")]
    log_format: LogFormat,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP service
    Serve {
        /// Listen address (default: from config)
        #[arg(long)]
        host: Option<String>,

        /// Listen port (default: from config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Run a source file once in its language's container
    Exec {
        /// Source file to run
        file: PathBuf,

        /// Language (default: inferred from the file extension)
        #[arg(short, long)]
        language: Option<String>,
    },

    /// Grade a Python solution against a unittest suite
    Grade {
        /// Solution source, staged as solution.py
        solution: PathBuf,

        /// Test suite, staged as test_solution.py
        tests: PathBuf,
    },

    /// Check that the container runtime is reachable
    Health,

    /// List supported languages
    Languages,

    /// Manage execution images
    Images {
        #[command(subcommand)]
        action: commands::images::ImageAction,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging; RUST_LOG takes precedence over -v
    let default_filter = if cli.verbose {
        "codesandbox=debug,tower_http=debug"
    } else {
        "codesandbox=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    match cli.log_format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(filter)
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(filter)
            .init(),
    }

    let project_dir = std::env::current_dir().context("Failed to get current directory")?;
    let config = Config::load(cli.config.as_deref(), &project_dir)?;

    match cli.command {
        Commands::Serve { host, port } => {
            commands::serve::run(&config, host, port).await?;
        }
        Commands::Exec { file, language } => {
            commands::exec::run(&config, &file, language).await?;
        }
        Commands::Grade { solution, tests } => {
            commands::grade::run(&config, &solution, &tests).await?;
        }
        Commands::Health => {
            commands::health::run().await?;
        }
        Commands::Languages => {
            commands::languages::run();
        }
        Commands::Images { action } => {
            commands::images::run(&config, action).await?;
        }
    }

    Ok(())
}
