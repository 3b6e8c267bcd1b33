//! Error types for the comparison library.

use thiserror::Error;

/// Exit code for configuration errors.
pub const EXIT_CONFIG_ERROR: u8 = 1;
/// Exit code for data source connection errors.
pub const EXIT_CONNECT_ERROR: u8 = 2;
/// Exit code for query errors.
pub const EXIT_QUERY_ERROR: u8 = 3;
/// Exit code for report file errors.
pub const EXIT_REPORT_ERROR: u8 = 4;
/// Exit code for a cancelled run.
pub const EXIT_CANCELLED: u8 = 5;
/// Exit code for job executor errors.
pub const EXIT_EXECUTOR_ERROR: u8 = 6;
/// Exit code for I/O errors (missing config file, etc.)
pub const EXIT_IO_ERROR: u8 = 7;

/// Main error type for dsdiff operations.
#[derive(Error, Debug)]
pub enum DsdiffError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Driver error that was not attributed to a table or data source
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Opening or pinging a data source failed
    #[error("Failed to connect data source {key}: {message}")]
    Connect { key: String, message: String },

    /// A query against one data source failed
    #[error("Query failed for table {table} at {key}: {message}")]
    Query {
        table: String,
        key: String,
        message: String,
    },

    /// Writing a report file failed
    #[error("Report error ({path}): {message}")]
    Report { path: String, message: String },

    /// Job executor misuse or a failed job cohort
    #[error("Executor error: {0}")]
    Executor(String),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV serialization error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Run was cancelled (SIGINT, immediate shutdown, etc.)
    #[error("Operation cancelled")]
    Cancelled,
}

impl DsdiffError {
    /// Create a Connect error for a data source key.
    pub fn connect(key: impl Into<String>, message: impl ToString) -> Self {
        DsdiffError::Connect {
            key: key.into(),
            message: message.to_string(),
        }
    }

    /// Create a Query error with table and data source context.
    pub fn query(table: impl Into<String>, key: impl Into<String>, message: impl ToString) -> Self {
        DsdiffError::Query {
            table: table.into(),
            key: key.into(),
            message: message.to_string(),
        }
    }

    /// Create a Report error for a file path.
    pub fn report(path: impl Into<String>, message: impl ToString) -> Self {
        DsdiffError::Report {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            DsdiffError::Config(_) | DsdiffError::Yaml(_) => EXIT_CONFIG_ERROR,
            DsdiffError::Connect { .. } => EXIT_CONNECT_ERROR,
            DsdiffError::Database(_) | DsdiffError::Query { .. } => EXIT_QUERY_ERROR,
            DsdiffError::Report { .. } | DsdiffError::Csv(_) | DsdiffError::Json(_) => {
                EXIT_REPORT_ERROR
            }
            DsdiffError::Cancelled => EXIT_CANCELLED,
            DsdiffError::Executor(_) => EXIT_EXECUTOR_ERROR,
            DsdiffError::Io(_) => EXIT_IO_ERROR,
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

/// Result type alias for dsdiff operations.
pub type Result<T> = std::result::Result<T, DsdiffError>;
