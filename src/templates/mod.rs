//! Embedded files staged into grading workspaces.

/// Fixed unittest runner; identical for every grading run.
pub(crate) const GRADING_RUNNER: &str = include_str!("runner.py");
