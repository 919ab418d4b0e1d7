//! Error types for bulkline

use thiserror::Error;

/// Result type alias for bulkline operations
pub type Result<T> = std::result::Result<T, BulklineError>;

/// Main error type for bulkline
///
/// These errors belong to the fallible helpers underneath the pipeline
/// stages. A stage never lets one of them cross its boundary raw: it logs
/// the diagnostic, emits one audit event, and resolves to a
/// `(ReturnCode, message)` pair.
#[derive(Error, Debug)]
pub enum BulklineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid file specification: {0}. File patterns must carry an extension because downstream stages key behavior off it.")]
    InvalidFileSpec(String),

    #[error("Extraction failed: {0}")]
    Extract(String),

    #[error("Conversion failed: {0}")]
    Convert(String),

    #[error("Warehouse error: {0}")]
    Warehouse(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl BulklineError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid file spec error
    pub fn invalid_file_spec(msg: impl Into<String>) -> Self {
        Self::InvalidFileSpec(msg.into())
    }

    /// Create an extraction error
    pub fn extract(msg: impl Into<String>) -> Self {
        Self::Extract(msg.into())
    }

    /// Create a conversion error
    pub fn convert(msg: impl Into<String>) -> Self {
        Self::Convert(msg.into())
    }

    /// Create a warehouse error
    pub fn warehouse(msg: impl Into<String>) -> Self {
        Self::Warehouse(msg.into())
    }
}
