//! Grading of submitted code against a unit-test suite.
//!
//! - `harness`: the files staged for a grading run, including the fixed runner
//! - `parser`: recovers the runner's JSON report from captured output

pub(crate) mod harness;
pub(crate) mod parser;

use serde::{Deserialize, Serialize};

/// Outcome of one discovered test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct TestOutcome {
    pub test_name: String,
    pub passed: bool,
    #[serde(default)]
    pub message: Option<String>,
}

/// Report for one grading request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct GradeResult {
    pub score: f64,
    pub total_tests: u32,
    pub passed_tests: u32,
    pub results: Vec<TestOutcome>,
}

impl GradeResult {
    /// A zero-score report with one synthetic failing outcome.
    pub fn failure(test_name: &str, message: impl Into<String>) -> Self {
        Self {
            score: 0.0,
            total_tests: 0,
            passed_tests: 0,
            results: vec![TestOutcome {
                test_name: test_name.to_string(),
                passed: false,
                message: Some(message.into()),
            }],
        }
    }

    /// Recount passes and recompute the score from `results`.
    ///
    /// `passed_tests` always equals the number of passing outcomes, and
    /// `score` is `passed_tests / total_tests`, or 0 when there are no tests.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        let passed = self.results.iter().filter(|r| r.passed).count();
        self.passed_tests = u32::try_from(passed).unwrap_or(u32::MAX);
        self.total_tests = self.total_tests.max(self.passed_tests);
        self.score = if self.total_tests > 0 {
            f64::from(self.passed_tests) / f64::from(self.total_tests)
        } else {
            0.0
        };
        self
    }

    /// True when at least one test ran and none failed.
    pub fn all_passed(&self) -> bool {
        self.total_tests > 0 && self.results.iter().all(|r| r.passed)
    }
}
