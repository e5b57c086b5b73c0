use serde::Serialize;

use crate::error::CandidateError;

/// Why a source file does not qualify for transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Rejection {
    /// The source wiki has no such file page.
    Missing,
    SharedDuplicate { duplicates: Vec<String> },
    Blacklisted { category: String },
    NotWhitelisted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CandidateState {
    Created,
    Eligible,
    Rejected { rejection: Rejection },
    NameResolved,
    Parsed,
    Normalized,
    ExistenceFiltered,
    Transformed,
    Composed,
    Failed { error: CandidateError },
}

impl CandidateState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Rejected { .. } | Self::Composed | Self::Failed { .. }
        )
    }
}

/// Per-run options shared by every candidate of a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferOptions {
    pub ignore_filter: bool,
    pub tracking_category: bool,
    pub categories: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferCandidate {
    pub source_title: String,
    pub destination_title: Option<String>,
    pub own_work: bool,
    pub tracking_category: bool,
    pub categories: Vec<String>,
    pub generated_text: Option<String>,
    pub state: CandidateState,
}

impl TransferCandidate {
    pub fn new(source_title: impl Into<String>, options: &TransferOptions) -> Self {
        Self {
            source_title: source_title.into(),
            destination_title: None,
            own_work: false,
            tracking_category: options.tracking_category,
            categories: options.categories.clone(),
            generated_text: None,
            state: CandidateState::Created,
        }
    }

    pub fn reject(&mut self, rejection: Rejection) {
        self.state = CandidateState::Rejected { rejection };
    }

    pub fn fail(&mut self, error: CandidateError) {
        self.state = CandidateState::Failed { error };
    }

    /// Move to the next non-terminal state. Terminal candidates stay put.
    pub fn advance(&mut self, state: CandidateState) {
        if !self.state.is_terminal() {
            self.state = state;
        }
    }

    pub fn is_active(&self) -> bool {
        !self.state.is_terminal()
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match &self.state {
            CandidateState::Rejected { rejection } => Some(rejection),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&CandidateError> {
        match &self.state {
            CandidateState::Failed { error } => Some(error),
            _ => None,
        }
    }
}
