//! Error types for the archiver
//!
//! Setup failures (`ModuleNotFound`, `SchemaIntrospectionFailed`,
//! `PrimaryKeyNotFound`, `ConnectFailed`, `PrepareFailed`) are returned from
//! `start` and stop a session before any row moves. `FetchFailed` is retained
//! on the harvester once its stream has been handed out; `DeleteFailed` is
//! recorded per key by the purger and surfaced in its report.

use thiserror::Error;

/// Result type alias for archiver operations
pub type Result<T> = std::result::Result<T, ArchiverError>;

/// Main error type for the archiver
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum ArchiverError {
    /// No harvester/purger registered under the requested backend name
    #[error("{kind} module '{name}' not found")]
    ModuleNotFound { kind: &'static str, name: String },

    /// The describe-table query failed
    #[error("failed to describe table '{table}'")]
    SchemaIntrospectionFailed {
        table: String,
        #[source]
        source: archiver_rdbc::Error,
    },

    /// The table has no PRIMARY column, or a composite key
    #[error("table '{table}' has no single-column primary key")]
    PrimaryKeyNotFound { table: String },

    /// A batch query or row decode failed mid-stream
    #[error("fetch from '{table}' failed: {message}")]
    FetchFailed {
        table: String,
        message: String,
        #[source]
        source: Option<archiver_rdbc::Error>,
    },

    /// Opening a backend connection failed
    #[error("failed to connect to {target}")]
    ConnectFailed {
        target: String,
        #[source]
        source: archiver_rdbc::Error,
    },

    /// Preparing a statement failed
    #[error("failed to prepare statement: {statement}")]
    PrepareFailed {
        statement: String,
        #[source]
        source: archiver_rdbc::Error,
    },

    /// A delete execution failed
    #[error("delete of key '{key}' failed")]
    DeleteFailed {
        key: String,
        #[source]
        source: archiver_rdbc::Error,
    },

    /// The purger intake no longer accepts keys
    #[error("purger intake is closed")]
    IntakeClosed,

    /// Operation requires `start` to have succeeded first
    #[error("{0} has not been started")]
    NotStarted(&'static str),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error (config files)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error (worker panics, broken invariants)
    #[error("internal error: {0}")]
    Internal(String),
}

impl ArchiverError {
    /// Create a fetch error wrapping a backend error
    pub fn fetch(table: impl Into<String>, source: archiver_rdbc::Error) -> Self {
        Self::FetchFailed {
            table: table.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Create a fetch error for a row that could not be decoded
    pub fn decode(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::FetchFailed {
            table: table.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Whether the error happened before any row was streamed
    pub fn is_setup_error(&self) -> bool {
        matches!(
            self,
            Self::ModuleNotFound { .. }
                | Self::SchemaIntrospectionFailed { .. }
                | Self::PrimaryKeyNotFound { .. }
                | Self::ConnectFailed { .. }
                | Self::PrepareFailed { .. }
                | Self::Config(_)
        )
    }
}

impl From<archiver_rdbc::Error> for ArchiverError {
    fn from(err: archiver_rdbc::Error) -> Self {
        match err {
            archiver_rdbc::Error::Configuration { message } => Self::Config(message),
            other => Self::Internal(other.to_string()),
        }
    }
}
