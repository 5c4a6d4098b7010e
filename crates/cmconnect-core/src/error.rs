use cmconnect_parser::ParserError;
use thiserror::Error;

use crate::cleanup::CleanupError;
use crate::locator::LocateError;
use crate::store::StoreError;
use crate::validate::ValidationError;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("input spreadsheet not found: {0}")]
    NotFound(#[from] LocateError),

    #[error("failed to read workbook: {0}")]
    Parse(#[from] ParserError),

    #[error("invalid cleanup rules: {0}")]
    Rules(#[from] CleanupError),

    #[error("normalized data failed validation: {0}")]
    Validation(#[from] ValidationError),

    #[error("failed to open destination store: {0}")]
    Connect(#[source] StoreError),

    #[error("failed to load table '{table}': {source}")]
    Load {
        table: String,
        #[source]
        source: StoreError,
    },

    #[error("background read task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl PipelineError {
    /// Short machine-friendly category, used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::NotFound(_) => "not_found",
            PipelineError::Parse(ParserError::SheetNotFound { .. }) => "sheet_not_found",
            PipelineError::Parse(_) => "parse",
            PipelineError::Rules(_) => "rules",
            PipelineError::Validation(_) => "validation",
            PipelineError::Connect(_) | PipelineError::Load { .. } => "load",
            PipelineError::Task(_) => "task",
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
