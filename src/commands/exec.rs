//! `codesandbox exec`: run one local file in its language's container.

use anyhow::{Context, Result};
use colored::Colorize;
use std::path::Path;

use crate::classify::ExecutionResult;
use crate::config::Config;
use crate::languages::Language;
use crate::service::ExecutionRequest;

pub async fn run(config: &Config, file: &Path, language: Option<String>) -> Result<()> {
    let language = match language {
        Some(language) => language,
        None => infer_language(file)?.to_string(),
    };
    let code = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let sandbox = super::connect_sandbox(config).await?;
    let result = sandbox
        .execute(&ExecutionRequest { code, language })
        .await?;

    print!("{}", format_result(&result));
    Ok(())
}

/// Language from the file extension.
fn infer_language(file: &Path) -> Result<Language> {
    let extension = file
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    Language::from_extension(extension).with_context(|| {
        format!(
            "Cannot infer language from {}; pass --language",
            file.display()
        )
    })
}

fn format_result(result: &ExecutionResult) -> String {
    let mut out = String::new();
    if !result.stdout.is_empty() {
        out.push_str(&format!("{}\n{}", "stdout:".green().bold(), result.stdout));
        if !result.stdout.ends_with('\n') {
            out.push('\n');
        }
    }
    if !result.stderr.is_empty() {
        out.push_str(&format!("{}\n{}", "stderr:".red().bold(), result.stderr));
        if !result.stderr.ends_with('\n') {
            out.push('\n');
        }
    }
    if out.is_empty() {
        out.push_str(&format!("{}\n", "(no output)".dimmed()));
    }
    out
}
