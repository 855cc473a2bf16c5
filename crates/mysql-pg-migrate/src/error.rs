//! Error types for the migration library.

use thiserror::Error;

/// Exit code for configuration errors (invalid YAML, missing fields, etc.)
pub const EXIT_CONFIG_ERROR: u8 = 1;
/// Exit code for an unreachable source or target database at boot.
pub const EXIT_CONNECTION_ERROR: u8 = 2;
/// Exit code for a failed query or stage.
pub const EXIT_STAGE_ERROR: u8 = 3;
/// Exit code for a failure reading or writing the stage ledger.
pub const EXIT_STATE_ERROR: u8 = 4;
/// Exit code for a failure while dropping the ledger or staging tables.
pub const EXIT_TEARDOWN_ERROR: u8 = 5;
/// Exit code for a confirmation prompt that never got an answer.
pub const EXIT_BOOT_INPUT_ERROR: u8 = 6;
/// Exit code for file system errors.
pub const EXIT_IO_ERROR: u8 = 7;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Source database (MySQL) error
    #[error("Source database error: {0}")]
    Source(#[from] sqlx::Error),

    /// Target database (PostgreSQL) error
    #[error("Target database error: {0}")]
    Target(#[from] tokio_postgres::Error),

    /// One or both databases could not be reached during boot.
    #[error("Connection check failed:\n{0}")]
    Connection(String),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// A single SQL round trip failed.
    #[error("{vendor} query failed in {caller}: {message}")]
    Query {
        vendor: String,
        caller: String,
        message: String,
    },

    /// A named stage failed, optionally for one table.
    #[error("Stage {stage} failed{}: {message}", .table.as_ref().map(|t| format!(" for table {}", t)).unwrap_or_default())]
    Stage {
        stage: String,
        table: Option<String>,
        message: String,
    },

    /// One or more units of a per-table fan-out failed.
    #[error("Stage {stage} failed for {} table(s): {}", .failures.len(), format_failures(.failures))]
    Barrier {
        stage: String,
        failures: Vec<(String, String)>,
    },

    /// Stage ledger error
    #[error("State ledger error: {0}")]
    State(String),

    /// Dropping the ledger or staging tables failed after the migration itself succeeded.
    #[error("Teardown failed (migration data is complete, remove {table} manually): {message}")]
    Teardown { table: String, message: String },

    /// The confirmation prompt could not be answered.
    #[error("Boot input error: {0}")]
    BootInput(String),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn format_failures(failures: &[(String, String)]) -> String {
    failures
        .iter()
        .map(|(table, message)| format!("{}: {}", table, message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl MigrateError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl std::fmt::Display, context: impl Into<String>) -> Self {
        MigrateError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a Stage error for a whole-run stage.
    pub fn stage(stage: impl Into<String>, message: impl std::fmt::Display) -> Self {
        MigrateError::Stage {
            stage: stage.into(),
            table: None,
            message: message.to_string(),
        }
    }

    /// Create a Stage error for one table.
    pub fn table_stage(
        stage: impl Into<String>,
        table: impl Into<String>,
        message: impl std::fmt::Display,
    ) -> Self {
        MigrateError::Stage {
            stage: stage.into(),
            table: Some(table.into()),
            message: message.to_string(),
        }
    }

    /// Process exit code for this error category.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_) | MigrateError::Yaml(_) | MigrateError::Json(_) => {
                EXIT_CONFIG_ERROR
            }
            MigrateError::Connection(_) | MigrateError::Pool { .. } => EXIT_CONNECTION_ERROR,
            MigrateError::Source(_)
            | MigrateError::Target(_)
            | MigrateError::Query { .. }
            | MigrateError::Stage { .. }
            | MigrateError::Barrier { .. } => EXIT_STAGE_ERROR,
            MigrateError::State(_) => EXIT_STATE_ERROR,
            MigrateError::Teardown { .. } => EXIT_TEARDOWN_ERROR,
            MigrateError::BootInput(_) => EXIT_BOOT_INPUT_ERROR,
            MigrateError::Io(_) => EXIT_IO_ERROR,
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

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
