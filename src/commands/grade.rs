//! `codesandbox grade`: grade a local solution against a local test suite.

use anyhow::{Context, Result};
use colored::Colorize;
use std::path::Path;

use crate::config::Config;
use crate::grading::GradeResult;
use crate::service::GradeRequest;

pub async fn run(config: &Config, solution: &Path, tests: &Path) -> Result<()> {
    let student_code = tokio::fs::read_to_string(solution)
        .await
        .with_context(|| format!("Failed to read {}", solution.display()))?;
    let test_code = tokio::fs::read_to_string(tests)
        .await
        .with_context(|| format!("Failed to read {}", tests.display()))?;

    let sandbox = super::connect_sandbox(config).await?;
    let result = sandbox
        .grade(&GradeRequest {
            student_code,
            test_code,
            language: "python".to_string(),
        })
        .await?;

    print!("{}", format_report(&result));

    if !result.all_passed() {
        let failed = result.results.iter().filter(|r| !r.passed).count();
        anyhow::bail!("{failed} test(s) failed");
    }
    Ok(())
}

fn format_report(result: &GradeResult) -> String {
    let mut out = String::new();
    out.push_str(&format!("\n{}\n", "━".repeat(50).dimmed()));

    for outcome in &result.results {
        let mark = if outcome.passed {
            "✓".green()
        } else {
            "✗".red()
        };
        out.push_str(&format!("  {mark} {}\n", outcome.test_name));
        if let Some(message) = outcome.message.as_deref().filter(|m| !m.is_empty()) {
            for line in message.lines() {
                out.push_str(&format!("      {}\n", line.dimmed()));
            }
        }
    }

    out.push_str(&format!("{}\n", "━".repeat(50).dimmed()));
    let summary = format!(
        "{}/{} passed ({:.0}%)",
        result.passed_tests,
        result.total_tests,
        result.score * 100.0
    );
    let summary = if result.all_passed() {
        summary.green().bold()
    } else {
        summary.red().bold()
    };
    out.push_str(&format!("  Score: {summary}\n"));
    out
}
