//! Static registry of runnable languages.
//!
//! Each language is one [`LanguageSpec`] row in [`REGISTRY`]: an id, an
//! image, a command template and a source file extension. Adding a language
//! is a new row; lookups, listings and error messages all read the table.

use crate::service::ServiceError;

/// How to run one language inside a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LanguageSpec {
    /// Lowercase identifier accepted at the boundary.
    pub id: &'static str,
    pub image: &'static str,
    /// Command template; `{source}` is replaced with the staged file name.
    pub command: &'static str,
    pub extension: &'static str,
}

/// Directory the workspace is mounted at inside every container.
pub(crate) const CONTAINER_WORKDIR: &str = "/code";

pub(crate) const REGISTRY: &[LanguageSpec] = &[
    LanguageSpec {
        id: "python",
        image: "python:3.8-slim",
        command: "python /code/{source}",
        extension: "py",
    },
    LanguageSpec {
        id: "ruby",
        image: "ruby:3.2-slim",
        command: "ruby /code/{source}",
        extension: "rb",
    },
    LanguageSpec {
        id: "elixir",
        image: "elixir:1.15-slim",
        command: "elixir /code/{source}",
        extension: "exs",
    },
];

/// A validated language: a handle to its registry row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Language(&'static LanguageSpec);

impl Language {
    /// Registry entry for this language.
    pub fn spec(self) -> &'static LanguageSpec {
        self.0
    }

    pub fn id(self) -> &'static str {
        self.0.id
    }

    /// Guess a language from a file extension (without the dot).
    pub fn from_extension(extension: &str) -> Option<Self> {
        REGISTRY
            .iter()
            .find(|spec| spec.extension.eq_ignore_ascii_case(extension))
            .map(Self)
    }
}

/// Registry ids, comma separated, in table order.
pub(crate) fn supported_ids() -> String {
    REGISTRY
        .iter()
        .map(|spec| spec.id)
        .collect::<Vec<_>>()
        .join(", ")
}

impl LanguageSpec {
    /// Staged file name for submitted source.
    pub fn source_name(&self) -> String {
        format!("main.{}", self.extension)
    }

    /// Expand the command template into argv.
    pub fn command_for(&self, source: &str) -> Result<Vec<String>, shell_words::ParseError> {
        shell_words::split(&self.command.replace("{source}", source))
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0.id)
    }
}

impl std::str::FromStr for Language {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        REGISTRY
            .iter()
            .find(|spec| spec.id.eq_ignore_ascii_case(wanted))
            .map(Self)
            .ok_or_else(|| ServiceError::unsupported_language(s))
    }
}
