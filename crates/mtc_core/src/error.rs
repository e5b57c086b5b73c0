use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unbalanced markup at byte {offset}: {reason}")]
pub struct MarkupError {
    pub offset: usize,
    pub reason: String,
}

impl MarkupError {
    pub fn new(offset: usize, reason: impl Into<String>) -> Self {
        Self {
            offset,
            reason: reason.into(),
        }
    }
}

/// Failure of a single transfer candidate. Siblings in the same batch are unaffected.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum CandidateError {
    #[error("markup error: {0}")]
    Markup(String),
    #[error("fetch error: {0}")]
    Fetch(String),
    #[error("missing metadata: {0}")]
    MissingMetadata(String),
    #[error("no free destination name for {title} after {attempts} attempts")]
    NameResolution { title: String, attempts: usize },
}

impl CandidateError {
    /// Keeps the full context chain of an external failure.
    pub fn fetch(error: &anyhow::Error) -> Self {
        Self::Fetch(format!("{error:#}"))
    }
}

impl From<MarkupError> for CandidateError {
    fn from(error: MarkupError) -> Self {
        Self::Markup(error.to_string())
    }
}
