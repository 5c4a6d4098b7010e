use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParserError {
    #[error("sheet '{sheet}' not found in workbook; available sheets: {available:?}")]
    SheetNotFound {
        sheet: String,
        available: Vec<String>,
    },

    #[error("workbook could not be parsed: {message}")]
    Workbook { message: String },

    #[error("failed to read workbook {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ParserError {
    pub(crate) fn workbook(err: impl std::fmt::Display) -> Self {
        ParserError::Workbook {
            message: err.to_string(),
        }
    }
}
