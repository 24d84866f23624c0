//! Recovers the runner's report from captured output.
//!
//! Student code and the test suite may print anything before the report, so
//! lines are scanned from the end and the first one that deserializes as a
//! [`GradeResult`] wins.

use super::GradeResult;

/// No line of the output was a grade report.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("No grade report found in {lines} lines of output")]
pub(crate) struct ParseFailure {
    pub lines: usize,
}

pub(crate) fn parse(raw_output: &[u8]) -> Result<GradeResult, ParseFailure> {
    let text = String::from_utf8_lossy(raw_output);
    text.lines()
        .rev()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .find_map(|line| serde_json::from_str::<GradeResult>(line).ok())
        .ok_or_else(|| ParseFailure {
            lines: text.lines().count(),
        })
}
