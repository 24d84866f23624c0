//! Bucketing of captured container output.
//!
//! The runtime interleaves stdout and stderr before capture, so the two
//! buckets are not separate streams: everything goes to stderr when the run
//! exited non-zero and to stdout otherwise. A program that writes warnings to
//! stderr and exits 0 reports them as stdout.

use serde::{Deserialize, Serialize};

/// Output of one plain execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
}

impl ExecutionResult {
    /// Result carrying only an error message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: message.into(),
        }
    }
}

/// Decode lossily and attribute the whole text by exit status.
pub(crate) fn classify(raw_output: &[u8], exit_status: i64) -> ExecutionResult {
    let text = String::from_utf8_lossy(raw_output).into_owned();
    if exit_status == 0 {
        ExecutionResult {
            stdout: text,
            stderr: String::new(),
        }
    } else {
        ExecutionResult {
            stdout: String::new(),
            stderr: text,
        }
    }
}
