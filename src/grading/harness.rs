//! Files staged for a grading run.

use crate::languages::CONTAINER_WORKDIR;
use crate::templates::GRADING_RUNNER;

/// The only language the harness can grade.
pub(crate) const GRADING_LANGUAGE: &str = "python";

pub(crate) const SOLUTION_FILE: &str = "solution.py";
pub(crate) const TESTS_FILE: &str = "test_solution.py";
pub(crate) const RUNNER_FILE: &str = "runner.py";

/// The solution, the suite and the runner, as `(name, content)` pairs.
pub(crate) fn build_harness<'a>(student_code: &'a str, test_code: &'a str) -> [(&'a str, &'a str); 3] {
    [
        (SOLUTION_FILE, student_code),
        (TESTS_FILE, test_code),
        (RUNNER_FILE, GRADING_RUNNER),
    ]
}

/// argv that runs the runner inside the grading container.
pub(crate) fn runner_command() -> Vec<String> {
    vec![
        "python".to_string(),
        format!("{CONTAINER_WORKDIR}/{RUNNER_FILE}"),
    ]
}
