//! Configuration handling for the PostgreSQL MCP server.
//!
//! Every option is available as a CLI flag and as an environment variable.
//! [`Config::connection_settings`] validates the raw values and produces the
//! immutable [`ConnectionSettings`] shared by the connection manager.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{ArgAction, Parser, ValueEnum};

use crate::error::{DbError, DbResult};
use crate::models::connection::masked_connection_string;
use crate::models::{DEFAULT_ROW_LIMIT, DatabaseType, MAX_ROW_LIMIT};

pub const DEFAULT_HTTP_HOST: &str = "127.0.0.1";
pub const DEFAULT_HTTP_PORT: u16 = 8080;
pub const DEFAULT_MCP_ENDPOINT: &str = "/";

// Pool configuration defaults
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_CONNECTION_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_STATEMENT_TIMEOUT_SECS: u64 = 30;

/// Transport mode for the MCP server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum TransportMode {
    /// Standard input/output (for CLI integration)
    #[default]
    Stdio,
    /// Streamable HTTP (for web clients)
    Http,
}

impl std::fmt::Display for TransportMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdio => write!(f, "stdio"),
            Self::Http => write!(f, "http"),
        }
    }
}

/// Where log output goes. Decided once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSink {
    /// No subscriber is installed
    Disabled,
    Stderr,
}

/// TLS policy for PostgreSQL connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsSettings {
    /// Never fall back to plaintext.
    pub require_ssl: bool,
    /// Validate the server certificate chain and host name.
    pub reject_unauthorized: bool,
    /// PEM file with the CA used to verify the server.
    pub ssl_root_cert: Option<PathBuf>,
}

impl Default for TlsSettings {
    fn default() -> Self {
        Self {
            require_ssl: false,
            reject_unauthorized: true,
            ssl_root_cert: None,
        }
    }
}

/// Validated, immutable connection configuration.
#[derive(Clone)]
pub struct ConnectionSettings {
    /// Full connection URL (sensitive - not logged).
    pub database_url: String,
    pub db_type: DatabaseType,
    /// Default: false for safety
    pub allow_write_ops: bool,
    pub max_connections: u32,
    /// Upper bound on waiting for a pooled connection.
    pub connection_timeout: Duration,
    /// Per-statement limit. Zero disables it.
    pub statement_timeout: Duration,
    /// Most rows returned by one statement; the rest is left unread.
    pub max_rows: u32,
    /// Use the extended protocol with a statement cache for parameterized queries.
    pub prepare_statements: bool,
    pub tls: TlsSettings,
    /// Decode PostgreSQL arrays into JSON arrays instead of their text form.
    pub fetch_types: bool,
}

impl std::fmt::Debug for ConnectionSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSettings")
            .field("database_url", &masked_connection_string(&self.database_url))
            .field("db_type", &self.db_type)
            .field("allow_write_ops", &self.allow_write_ops)
            .field("max_connections", &self.max_connections)
            .field("connection_timeout", &self.connection_timeout)
            .field("statement_timeout", &self.statement_timeout)
            .field("max_rows", &self.max_rows)
            .field("prepare_statements", &self.prepare_statements)
            .field("tls", &self.tls)
            .field("fetch_types", &self.fetch_types)
            .finish()
    }
}

impl ConnectionSettings {
    /// Settings with default pool and TLS options for `database_url`.
    pub fn new(database_url: impl Into<String>) -> DbResult<Self> {
        let database_url = database_url.into();
        let db_type = DatabaseType::from_connection_string(&database_url).ok_or_else(|| {
            DbError::configuration(
                "DATABASE_URL must start with postgres://, postgresql:// or sqlite:",
            )
        })?;

        Ok(Self {
            database_url,
            db_type,
            allow_write_ops: false,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            connection_timeout: Duration::from_secs(DEFAULT_CONNECTION_TIMEOUT_SECS),
            statement_timeout: Duration::from_secs(DEFAULT_STATEMENT_TIMEOUT_SECS),
            max_rows: DEFAULT_ROW_LIMIT,
            prepare_statements: true,
            tls: TlsSettings::default(),
            fetch_types: true,
        })
    }

    pub fn with_write_ops(mut self, allow: bool) -> Self {
        self.allow_write_ops = allow;
        self
    }

    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    pub fn with_statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = timeout;
        self
    }

    pub fn with_max_rows(mut self, max_rows: u32) -> Self {
        self.max_rows = max_rows;
        self
    }

    pub fn with_prepare_statements(mut self, prepare: bool) -> Self {
        self.prepare_statements = prepare;
        self
    }

    pub fn with_tls(mut self, tls: TlsSettings) -> Self {
        self.tls = tls;
        self
    }

    pub fn with_fetch_types(mut self, fetch_types: bool) -> Self {
        self.fetch_types = fetch_types;
        self
    }

    /// Check invariants that the pool relies on.
    pub fn validate(&self) -> DbResult<()> {
        if self.max_connections == 0 {
            return Err(DbError::configuration(
                "max connections must be at least 1",
            ));
        }
        if self.connection_timeout.is_zero() {
            return Err(DbError::configuration(
                "connection timeout must be greater than zero",
            ));
        }
        if !(1..=MAX_ROW_LIMIT).contains(&self.max_rows) {
            return Err(DbError::configuration(format!(
                "max rows must be between 1 and {}",
                MAX_ROW_LIMIT
            )));
        }

        match self.db_type {
            DatabaseType::PostgreSQL => {
                url::Url::parse(&self.database_url).map_err(|e| {
                    DbError::configuration(format!("Invalid DATABASE_URL: {}", e))
                })?;
                if let Some(path) = &self.tls.ssl_root_cert {
                    if !self.tls.reject_unauthorized {
                        return Err(DbError::configuration(
                            "PG_SSL_ROOT_CERT requires certificate validation; \
                             it cannot be combined with PG_SSL_REJECT_UNAUTHORIZED=false",
                        ));
                    }
                    validate_root_cert(path)?;
                }
            }
            DatabaseType::SQLite => {
                if self.tls.require_ssl || self.tls.ssl_root_cert.is_some() {
                    return Err(DbError::configuration(
                        "TLS options (PG_REQUIRE_SSL, PG_SSL_ROOT_CERT) only apply to PostgreSQL",
                    ));
                }
            }
        }
        Ok(())
    }
}

fn validate_root_cert(path: &Path) -> DbResult<()> {
    let contents = std::fs::read(path).map_err(|e| {
        DbError::configuration(format!(
            "Cannot read SSL root certificate {}: {}",
            path.display(),
            e
        ))
    })?;
    let pem = String::from_utf8_lossy(&contents);
    if !pem.contains("-----BEGIN CERTIFICATE-----") {
        return Err(DbError::configuration(format!(
            "SSL root certificate {} does not contain a PEM certificate",
            path.display()
        )));
    }
    Ok(())
}

/// Configuration for the PostgreSQL MCP server.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "pg-mcp-server",
    about = "MCP server exposing a PostgreSQL database with guarded SQL execution",
    version,
    author
)]
pub struct Config {
    /// Database connection URL (postgres://… or sqlite:…)
    #[arg(long, value_name = "URL", env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,

    /// Allow INSERT/UPDATE/DELETE and DDL through the query tool
    #[arg(long, env = "ALLOW_WRITE_OPS")]
    pub allow_write_ops: bool,

    /// Maximum number of pooled connections
    #[arg(long, default_value_t = DEFAULT_MAX_CONNECTIONS, env = "PG_MAX_CONNECTIONS")]
    pub max_connections: u32,

    /// Seconds to wait for a pooled connection
    #[arg(
        long,
        default_value_t = DEFAULT_CONNECTION_TIMEOUT_SECS,
        env = "PG_CONNECTION_TIMEOUT"
    )]
    pub connection_timeout: u64,

    /// Per-statement timeout in seconds (0 disables)
    #[arg(
        long,
        default_value_t = DEFAULT_STATEMENT_TIMEOUT_SECS,
        env = "PG_STATEMENT_TIMEOUT"
    )]
    pub statement_timeout: u64,

    /// Most rows one query returns before the result is marked truncated
    #[arg(long, default_value_t = DEFAULT_ROW_LIMIT, env = "PG_MAX_ROWS")]
    pub max_rows: u32,

    /// Cache prepared statements for parameterized queries
    #[arg(
        long,
        default_value_t = true,
        action = ArgAction::Set,
        env = "PG_PREPARE_STATEMENTS"
    )]
    pub prepare_statements: bool,

    /// Refuse to connect without TLS
    #[arg(long, env = "PG_REQUIRE_SSL")]
    pub require_ssl: bool,

    /// Validate the server certificate (disable only for testing)
    #[arg(
        long,
        default_value_t = true,
        action = ArgAction::Set,
        env = "PG_SSL_REJECT_UNAUTHORIZED"
    )]
    pub reject_unauthorized: bool,

    /// PEM file with the CA certificate used to verify the server
    #[arg(long, value_name = "PATH", env = "PG_SSL_ROOT_CERT")]
    pub ssl_root_cert: Option<PathBuf>,

    /// Decode PostgreSQL array columns into JSON arrays
    #[arg(
        long,
        default_value_t = true,
        action = ArgAction::Set,
        env = "PG_FETCH_TYPES"
    )]
    pub fetch_types: bool,

    /// Create the issues and features tables if they do not exist
    #[arg(long, env = "MCP_INIT_SCHEMA")]
    pub init_schema: bool,

    /// Transport mode (stdio or http)
    #[arg(
        short,
        long,
        value_enum,
        default_value = "stdio",
        env = "MCP_TRANSPORT"
    )]
    pub transport: TransportMode,

    /// HTTP host to bind to (only used with http transport)
    #[arg(long, default_value = DEFAULT_HTTP_HOST, env = "MCP_HTTP_HOST")]
    pub http_host: String,

    /// HTTP port to bind to (only used with http transport)
    #[arg(long, default_value_t = DEFAULT_HTTP_PORT, env = "MCP_HTTP_PORT")]
    pub http_port: u16,

    /// MCP endpoint path (only used with http transport)
    #[arg(long, default_value = DEFAULT_MCP_ENDPOINT, env = "MCP_ENDPOINT")]
    pub mcp_endpoint: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "MCP_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "MCP_JSON_LOGS")]
    pub json_logs: bool,

    /// Enable logging output for the stdio transport (always on for http)
    #[arg(long, env = "MCP_ENABLE_LOGS")]
    pub enable_logs: bool,
}

impl Config {
    /// Parse configuration from command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Create a default configuration (useful for testing).
    pub fn default_config() -> Self {
        Self {
            database_url: None,
            allow_write_ops: false,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT_SECS,
            statement_timeout: DEFAULT_STATEMENT_TIMEOUT_SECS,
            max_rows: DEFAULT_ROW_LIMIT,
            prepare_statements: true,
            require_ssl: false,
            reject_unauthorized: true,
            ssl_root_cert: None,
            fetch_types: true,
            init_schema: false,
            transport: TransportMode::Stdio,
            http_host: DEFAULT_HTTP_HOST.to_string(),
            http_port: DEFAULT_HTTP_PORT,
            mcp_endpoint: DEFAULT_MCP_ENDPOINT.to_string(),
            log_level: "info".to_string(),
            json_logs: false,
            enable_logs: false,
        }
    }

    /// Build and validate the connection settings.
    pub fn connection_settings(&self) -> DbResult<ConnectionSettings> {
        let url = self
            .database_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| {
                DbError::configuration("DATABASE_URL is required (--database-url)")
            })?;

        let settings = ConnectionSettings::new(url)?
            .with_write_ops(self.allow_write_ops)
            .with_max_connections(self.max_connections)
            .with_connection_timeout(Duration::from_secs(self.connection_timeout))
            .with_statement_timeout(Duration::from_secs(self.statement_timeout))
            .with_max_rows(self.max_rows)
            .with_prepare_statements(self.prepare_statements)
            .with_fetch_types(self.fetch_types)
            .with_tls(TlsSettings {
                require_ssl: self.require_ssl,
                reject_unauthorized: self.reject_unauthorized,
                ssl_root_cert: self.ssl_root_cert.clone(),
            });

        settings.validate()?;
        Ok(settings)
    }

    /// Stdio owns stdout for protocol frames, so logs are opt-in there.
    pub fn log_sink(&self) -> LogSink {
        match self.transport {
            TransportMode::Stdio if !self.enable_logs => LogSink::Disabled,
            _ => LogSink::Stderr,
        }
    }

    /// Get the HTTP bind address.
    pub fn http_bind_addr(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}
