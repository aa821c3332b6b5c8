//! Error types for the schema dump library.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for dump operations.
#[derive(Error, Debug)]
pub enum DumpError {
    /// Configuration error (malformed database URL, invalid YAML values, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database connection or pool error with context
    #[error("Connection error: {message}\n  Context: {context}")]
    Connection { message: String, context: String },

    /// Metadata catalog query failed
    #[error("Catalog query failed while {context}: {message}")]
    CatalogQuery { context: String, message: String },

    /// Schema extraction failed for a specific object
    #[error("Export failed for {object}: {message}")]
    ExportExec { object: String, message: String },

    /// Destination file could not be created or written
    #[error("Failed to write {}: {source}", path.display())]
    FileWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// IO error (dump root creation and other file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An export task panicked before reporting its outcome
    #[error("Export task panicked: {0}")]
    TaskPanicked(String),
}

impl DumpError {
    /// Create a Connection error with context about where it occurred
    pub fn connection(message: impl ToString, context: impl Into<String>) -> Self {
        DumpError::Connection {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a CatalogQuery error
    pub fn catalog(context: impl Into<String>, message: impl ToString) -> Self {
        DumpError::CatalogQuery {
            context: context.into(),
            message: message.to_string(),
        }
    }

    /// Create an ExportExec error
    pub fn export(object: impl Into<String>, message: impl ToString) -> Self {
        DumpError::ExportExec {
            object: object.into(),
            message: message.to_string(),
        }
    }

    /// Create a FileWrite error
    pub fn file_write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DumpError::FileWrite {
            path: path.into(),
            source,
        }
    }

    /// Process exit code for errors that abort the run.
    pub fn exit_code(&self) -> u8 {
        match self {
            DumpError::Config(_) | DumpError::Yaml(_) => 2,
            DumpError::Connection { .. } => 3,
            DumpError::Io(_) => 4,
            _ => 1,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for dump operations.
pub type Result<T> = std::result::Result<T, DumpError>;
