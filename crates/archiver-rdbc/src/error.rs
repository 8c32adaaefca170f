//! Backend errors and their classification
//!
//! Every driver failure is folded into [`Error`]. Callers that keep going
//! after a failure (the purger dead-letters keys, for instance) use
//! [`Error::category`] to tell lock contention and dropped links, which are
//! worth another attempt later, from statements that will never succeed.

use thiserror::Error;

/// Result alias for backend operations
pub type Result<T> = std::result::Result<T, Error>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Server error numbers with special meaning to the archiver.
///
/// Values follow the MySQL/MariaDB `ER_*` numbering.
pub mod server_code {
    /// `ER_LOCK_WAIT_TIMEOUT`
    pub const LOCK_WAIT_TIMEOUT: u16 = 1205;
    /// `ER_LOCK_DEADLOCK`
    pub const DEADLOCK: u16 = 1213;
    /// `ER_NO_SUCH_TABLE`
    pub const NO_SUCH_TABLE: u16 = 1146;
    /// `ER_BAD_FIELD_ERROR`
    pub const BAD_FIELD: u16 = 1054;
    /// `ER_PARSE_ERROR`
    pub const PARSE_ERROR: u16 = 1064;
}

/// Coarse error classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Link to the server failed or was lost
    Connection,
    /// Client-side deadline elapsed
    Timeout,
    /// Row lock wait timeout or deadlock victim
    Contention,
    /// Statement rejected by the server
    Query,
    /// Bad URL, identifier or clause
    Configuration,
    /// Table or column missing or malformed
    Schema,
    /// Anything else
    Other,
}

impl ErrorCategory {
    /// Whether the same statement may succeed if run again later
    pub const fn is_retriable(self) -> bool {
        matches!(self, Self::Connection | Self::Timeout | Self::Contention)
    }

    /// Stable lowercase label for logs
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connection => "connection",
            Self::Timeout => "timeout",
            Self::Contention => "contention",
            Self::Query => "query",
            Self::Configuration => "configuration",
            Self::Schema => "schema",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend error
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum Error {
    #[error("connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// `code` carries the server error number when the server produced one.
    #[error("query error: {message}")]
    Query {
        message: String,
        sql: Option<String>,
        code: Option<u16>,
        #[source]
        source: Option<BoxError>,
    },

    #[error("timeout: {message}")]
    Timeout { message: String },

    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("schema error: {message}")]
    Schema { message: String },

    #[error("table not found: {table}")]
    TableNotFound { table: String },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl Error {
    /// Classify this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Connection { .. } => ErrorCategory::Connection,
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::Query {
                code: Some(server_code::LOCK_WAIT_TIMEOUT | server_code::DEADLOCK),
                ..
            } => ErrorCategory::Contention,
            Self::Query { .. } => ErrorCategory::Query,
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Schema { .. } | Self::TableNotFound { .. } => ErrorCategory::Schema,
            Self::Internal { .. } => ErrorCategory::Other,
        }
    }

    /// Shorthand for `self.category().is_retriable()`
    pub fn is_retriable(&self) -> bool {
        self.category().is_retriable()
    }

    /// Connection failure without an underlying cause
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Connection failure wrapping the driver error
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Statement failure with no statement text attached
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql: None,
            code: None,
            source: None,
        }
    }

    /// Statement failure for `sql`
    pub fn query_with_sql(message: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql: Some(sql.into()),
            code: None,
            source: None,
        }
    }

    /// Statement failure for `sql` wrapping the driver error
    pub fn query_with_source(
        message: impl Into<String>,
        sql: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Query {
            message: message.into(),
            sql: Some(sql.into()),
            code: None,
            source: Some(Box::new(source)),
        }
    }

    /// Error reported by the server itself while running `sql`.
    ///
    /// `ER_NO_SUCH_TABLE` is lifted to [`Error::TableNotFound`] when the
    /// table name can be read from the message.
    pub fn server(code: u16, message: impl Into<String>, sql: impl Into<String>) -> Self {
        let message = message.into();
        if code == server_code::NO_SUCH_TABLE {
            if let Some(table) = quoted_name(&message) {
                return Self::TableNotFound { table };
            }
        }
        Self::Query {
            message,
            sql: Some(sql.into()),
            code: Some(code),
            source: None,
        }
    }

    /// Client-side deadline elapsed
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Invalid configuration or unsafe SQL fragment
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Unexpected table shape
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }

    /// Broken invariant inside a backend
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Statement text attached to a query error
    pub fn sql(&self) -> Option<&str> {
        match self {
            Self::Query { sql, .. } => sql.as_deref(),
            _ => None,
        }
    }

    /// Server error number, if the server produced this error
    pub fn server_code(&self) -> Option<u16> {
        match self {
            Self::Query { code, .. } => *code,
            _ => None,
        }
    }
}

/// First `'...'` span in a server message, e.g. `Table 'shop.orders' doesn't exist`
fn quoted_name(message: &str) -> Option<String> {
    let start = message.find('\'')? + 1;
    let len = message[start..].find('\'')?;
    Some(message[start..start + len].to_string())
}
