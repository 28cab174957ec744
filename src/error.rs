//! Error types for the import/export engine and its persistence sinks.

use thiserror::Error;

/// Failures that abort a whole template, import or export operation.
///
/// Per-row problems never surface here; they are collected into
/// [`crate::progress::ImportResult::errors`] instead.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid import/export config: {0}")]
    InvalidConfig(String),

    #[error("Unsupported file type: .{0}. Supported: .xlsx, .xls, .xlsm, .xlsb, .ods, .csv")]
    UnsupportedFormat(String),

    #[error("Failed to read file: {0}")]
    FileRead(String),

    #[error("An import is already running for this session")]
    ImportInProgress,

    #[error("No data to export")]
    NoExportData,

    #[error("Failed to load records: {0}")]
    Sink(#[from] SinkError),

    #[error("Failed to build spreadsheet: {0}")]
    Spreadsheet(#[from] rust_xlsxwriter::XlsxError),
}

/// Failure reported by a [`crate::sink::RecordSink`] for a single record.
///
/// The display text is what ends up in the row error (`Row <n>: <message>`).
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("{0}")]
    Rejected(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Backend request failed: {0}")]
    Http(#[from] reqwest::Error),
}
