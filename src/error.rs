//! Error types for the PostgreSQL MCP server.
//!
//! Every fallible operation returns [`DbResult`]. Variants fall into three
//! broad kinds (see [`ErrorKind`]): configuration problems detected at
//! startup, query/input validation rejections, and database-level failures.
//! Each variant carries an actionable message so that a client can recover.

use std::time::Duration;

use thiserror::Error;

/// Coarse classification of a [`DbError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid or missing startup configuration. Fatal.
    Configuration,
    /// Rejected by the statement classifier or by tool input validation.
    QueryValidation,
    /// Everything that happened while talking to the database.
    Database,
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Query rejected: {reason}")]
    QueryValidation { reason: String },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// SQLSTATE reported by the server, e.g. "42P01" for undefined table
        code: Option<String>,
        detail: Option<String>,
        suggestion: String,
    },

    #[error("Timeout: {operation} exceeded {elapsed_ms}ms")]
    Timeout { operation: String, elapsed_ms: u64 },

    #[error("Connection pool exhausted: no connection became available within {timeout_ms}ms")]
    PoolExhausted { timeout_ms: u64 },

    #[error("Not found: {object}")]
    NotFound { object: String, hint: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a query validation error.
    pub fn query_validation(reason: impl Into<String>) -> Self {
        Self::QueryValidation {
            reason: reason.into(),
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a database error with optional SQLSTATE code.
    pub fn database(
        message: impl Into<String>,
        code: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            code,
            detail: None,
            suggestion: suggestion.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_ms: duration_ms(elapsed),
        }
    }

    pub fn pool_exhausted(waited: Duration) -> Self {
        Self::PoolExhausted {
            timeout_ms: duration_ms(waited),
        }
    }

    /// Create a not found error.
    pub fn not_found(object: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::NotFound {
            object: object.into(),
            hint: hint.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration { .. } => ErrorKind::Configuration,
            Self::QueryValidation { .. } => ErrorKind::QueryValidation,
            _ => ErrorKind::Database,
        }
    }

    /// Stable machine-readable code. Server errors report their SQLSTATE.
    pub fn code(&self) -> &str {
        match self {
            Self::Configuration { .. } => "CONFIGURATION",
            Self::QueryValidation { .. } => "QUERY_REJECTED",
            Self::Connection { .. } => "CONNECTION",
            Self::Database { code, .. } => code.as_deref().unwrap_or("DATABASE"),
            Self::Timeout { .. } => "TIMEOUT",
            Self::PoolExhausted { .. } => "POOL_EXHAUSTED",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Internal { .. } => "INTERNAL",
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            Self::NotFound { hint, .. } => Some(hint),
            Self::Timeout { .. } => {
                Some("Narrow the query or raise the statement timeout (PG_STATEMENT_TIMEOUT)")
            }
            Self::PoolExhausted { .. } => Some(
                "All connections are busy; retry later or raise PG_MAX_CONNECTIONS / PG_CONNECTION_TIMEOUT",
            ),
            _ => None,
        }
    }

    /// Detail text attached by the server, if any.
    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::Database { detail, .. } => detail.as_deref(),
            _ => None,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::Timeout { .. } | Self::PoolExhausted { .. }
        )
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the connection string format and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                let detail = db_err
                    .try_downcast_ref::<sqlx::postgres::PgDatabaseError>()
                    .and_then(|pg| pg.detail())
                    .map(str::to_string);
                let suggestion = match code.as_deref() {
                    Some("57014") => "The statement was cancelled; it probably exceeded the statement timeout",
                    Some("42P01") => "The referenced table does not exist; use list_tables to see available tables",
                    Some("42703") => "The referenced column does not exist; use get_table_detail to inspect columns",
                    Some("23505") => "A row with the same unique key already exists",
                    Some("25006") => "The database rejected a write in a read-only transaction",
                    _ => "Check the SQL syntax and referenced objects",
                };
                DbError::Database {
                    message: db_err.message().to_string(),
                    code,
                    detail,
                    suggestion: suggestion.to_string(),
                }
            }
            sqlx::Error::RowNotFound => DbError::not_found(
                "row",
                "Verify the query conditions match existing data",
            ),
            sqlx::Error::PoolTimedOut => DbError::connection(
                "Timed out waiting for a pooled connection",
                "All connections are busy or the server is unreachable",
            ),
            sqlx::Error::PoolClosed => DbError::connection(
                "Connection pool is closed",
                "The server is shutting down",
            ),
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify PG_REQUIRE_SSL, PG_SSL_ROOT_CERT and the server certificate",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::TypeNotFound { type_name } => {
                DbError::internal(format!("Type not found: {}", type_name))
            }
            sqlx::Error::ColumnNotFound(col) => {
                DbError::internal(format!("Column not found: {}", col))
            }
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => DbError::internal(format!(
                "Column index {} out of bounds (len: {})",
                index, len
            )),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => DbError::connection(
                "Database worker crashed",
                "The connection was discarded; retry the operation",
            ),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

/// Build suggestion data as JSON value.
fn error_data(err: &DbError) -> Option<serde_json::Value> {
    let mut data = serde_json::Map::new();
    data.insert("code".into(), err.code().into());
    if let Some(suggestion) = err.suggestion() {
        data.insert("suggestion".into(), suggestion.into());
    }
    if let Some(detail) = err.detail() {
        data.insert("detail".into(), detail.into());
    }
    Some(serde_json::Value::Object(data))
}

/// Convert DbError to MCP ErrorData for protocol-level failures.
impl From<DbError> for rmcp::ErrorData {
    fn from(err: DbError) -> Self {
        let data = error_data(&err);
        match &err {
            DbError::QueryValidation { .. } => rmcp::ErrorData::invalid_params(err.to_string(), data),
            DbError::NotFound { .. } => rmcp::ErrorData::resource_not_found(err.to_string(), data),
            DbError::Database { message, code, .. } => {
                let msg = match code {
                    Some(code) => format!("{} (SQLSTATE: {})", message, code),
                    None => message.clone(),
                };
                rmcp::ErrorData::invalid_params(msg, data)
            }
            DbError::Configuration { .. }
            | DbError::Connection { .. }
            | DbError::Timeout { .. }
            | DbError::PoolExhausted { .. }
            | DbError::Internal { .. } => rmcp::ErrorData::internal_error(err.to_string(), data),
        }
    }
}
