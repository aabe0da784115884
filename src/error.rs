// 🚨 Error taxonomy
// One variant per failure class the tracker distinguishes.
//
// Configuration is fatal at startup, Validation aborts the single operation
// with no partial mutation, NotFound is a normal absence, Transient is
// recorded per company and never aborts a batch, Storage is surfaced as-is.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("transient registry error: {0}")]
    Transient(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("spreadsheet error: {0}")]
    Csv(#[from] csv::Error),

    #[error("workbook error: {0}")]
    Workbook(#[from] calamine::Error),

    #[error("workbook error: {0}")]
    WorkbookWrite(#[from] rust_xlsxwriter::XlsxError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TrackerError {
    pub fn is_validation(&self) -> bool {
        matches!(self, TrackerError::Validation(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, TrackerError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, TrackerError>;
