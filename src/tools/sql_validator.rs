//! SQL statement classification for the free-form `query` tool.
//!
//! [`classify`] decides whether a client-supplied SQL string may run on a
//! given backend, given whether write operations are enabled. It never
//! inspects table or column names and never touches the database.
//!
//! The input is lexed with the [sqlparser](https://docs.rs/sqlparser/)
//! tokenizer using the backend's own lexical rules. PostgreSQL nests `/* */`
//! comments and has dollar-quoted strings; SQLite does neither, treats `$name`
//! as a parameter and quotes identifiers with `[...]` or backticks. Only the
//! resulting token stream is classified, so keywords hidden in literals or
//! comments cannot influence the outcome. Anything that cannot be lexed or
//! recognized is rejected.

use sqlparser::dialect::{Dialect, PostgreSqlDialect, SQLiteDialect};
use sqlparser::tokenizer::{Token, Tokenizer};

use crate::error::{DbError, DbResult};
use crate::models::DatabaseType;

/// Rejection reasons reported to the client.
pub mod reasons {
    pub const EMPTY: &str = "empty statement";
    pub const MULTIPLE_STATEMENTS: &str = "multiple statements not permitted";
    pub const WRITE_DISABLED: &str = "write operations are disabled";
    pub const UNRECOGNIZED: &str = "unrecognized statement";
    pub const UNBALANCED_COMMENT: &str = "unbalanced comment delimiter";
    pub const UNPARSEABLE: &str = "statement could not be tokenized";
    pub const SESSION_STATE: &str =
        "session-level statements are not permitted on pooled connections";
    pub const TRANSACTION_CONTROL: &str =
        "transaction control statements are not permitted; each statement runs in its own transaction";
}

/// Outcome of classifying one SQL string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Allowed,
    Rejected { reason: String },
}

impl Classification {
    fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    /// Rejection reason, if any.
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Allowed => None,
            Self::Rejected { reason } => Some(reason),
        }
    }

    /// Turn a rejection into [`DbError::QueryValidation`].
    pub fn into_result(self) -> DbResult<()> {
        match self {
            Self::Allowed => Ok(()),
            Self::Rejected { reason } => Err(DbError::query_validation(reason)),
        }
    }
}

/// Type of SQL statement, judged by its leading keyword(s).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlStatementType {
    /// SELECT, WITH, SHOW, VALUES, TABLE
    Query,
    /// EXPLAIN; classified by the statement it explains
    Explain,
    /// INSERT, UPDATE, DELETE, MERGE
    DmlWrite,
    /// CREATE (non-administrative objects), COMMENT, REFRESH
    Ddl,
    /// DROP, TRUNCATE, ALTER, GRANT, ... Never permitted.
    Administrative,
    /// SET, RESET, DISCARD, LISTEN, LOCK, PREPARE, ...
    Session,
    /// BEGIN, COMMIT, ROLLBACK, SAVEPOINT, ...
    Transaction,
    Unknown,
}

/// Leading keywords accepted when write operations are disabled.
const READ_ONLY_KEYWORDS: &[&str] = &["SELECT", "WITH", "EXPLAIN", "SHOW"];

const ADMINISTRATIVE_KEYWORDS: &[&str] = &[
    "DROP", "TRUNCATE", "ALTER", "GRANT", "REVOKE", "VACUUM", "REASSIGN", "REINDEX", "CLUSTER",
    "COPY", "DO", "LOAD", "CHECKPOINT", "CALL", "IMPORT",
];

/// Object kinds whose CREATE alters database- or role-level state.
const ADMINISTRATIVE_CREATE_OBJECTS: &[&str] = &[
    "ROLE",
    "USER",
    "GROUP",
    "DATABASE",
    "TABLESPACE",
    "EXTENSION",
    "EVENT",
    "LANGUAGE",
    "PUBLICATION",
    "SUBSCRIPTION",
    "SERVER",
    "FOREIGN",
];

/// Words that may sit between CREATE and the object kind.
const CREATE_MODIFIERS: &[&str] = &[
    "OR",
    "REPLACE",
    "TEMP",
    "TEMPORARY",
    "UNLOGGED",
    "UNIQUE",
    "GLOBAL",
    "LOCAL",
    "TRUSTED",
    "PROCEDURAL",
    "DEFAULT",
    "RECURSIVE",
    "MATERIALIZED",
    "CONSTRAINT",
];

const SESSION_KEYWORDS: &[&str] = &[
    "SET", "RESET", "DISCARD", "LISTEN", "NOTIFY", "UNLISTEN", "LOCK", "PREPARE", "EXECUTE",
    "DEALLOCATE",
];

const TRANSACTION_KEYWORDS: &[&str] = &[
    "BEGIN", "START", "COMMIT", "ROLLBACK", "SAVEPOINT", "RELEASE", "END", "ABORT",
];

const DATA_MODIFYING_KEYWORDS: &[&str] = &["INSERT", "UPDATE", "DELETE", "MERGE"];

const EXPLAIN_OPTIONS: &[&str] = &["ANALYZE", "ANALYSE", "VERBOSE"];

/// Classify `sql` for execution with or without write operations enabled.
///
/// # Examples
///
/// ```
/// use pg_mcp_server::models::DatabaseType;
/// use pg_mcp_server::tools::sql_validator::classify;
///
/// assert!(classify("SELECT * FROM users", DatabaseType::PostgreSQL, false).is_allowed());
/// assert!(!classify("INSERT INTO users VALUES (1)", DatabaseType::PostgreSQL, false).is_allowed());
/// assert!(classify("INSERT INTO users VALUES (1)", DatabaseType::PostgreSQL, true).is_allowed());
/// assert!(!classify("DROP TABLE users", DatabaseType::PostgreSQL, true).is_allowed());
/// ```
pub fn classify(sql: &str, db_type: DatabaseType, allow_write_ops: bool) -> Classification {
    let tokens = match significant_tokens(sql, db_type) {
        Ok(tokens) => tokens,
        Err(rejection) => return rejection,
    };
    match single_statement(&tokens) {
        Ok(statement) => classify_statement(statement, allow_write_ops),
        Err(rejection) => rejection,
    }
}

/// [`classify`], returning [`DbError::QueryValidation`] on rejection.
pub fn validate(sql: &str, db_type: DatabaseType, allow_write_ops: bool) -> DbResult<()> {
    classify(sql, db_type, allow_write_ops).into_result()
}

/// Reject `sql` unless it lexes as exactly one statement on `db_type`.
///
/// Drivers run every statement in a text sent without parameters, so this is
/// checked again right before execution.
pub fn ensure_single_statement(sql: &str, db_type: DatabaseType) -> DbResult<()> {
    significant_tokens(sql, db_type)
        .and_then(|tokens| single_statement(&tokens).map(|_| ()))
        .or_else(Classification::into_result)
}

fn dialect(db_type: DatabaseType) -> Box<dyn Dialect> {
    match db_type {
        DatabaseType::PostgreSQL => Box::new(PostgreSqlDialect {}),
        DatabaseType::SQLite => Box::new(SQLiteDialect {}),
    }
}

/// Lex `sql` with the rules of `db_type`, dropping whitespace and comments.
fn significant_tokens(sql: &str, db_type: DatabaseType) -> Result<Vec<Token>, Classification> {
    let dialect = dialect(db_type);
    let tokens = Tokenizer::new(dialect.as_ref(), sql)
        .tokenize()
        .map_err(|e| Classification::rejected(format!("{}: {}", reasons::UNPARSEABLE, e)))?;

    // `*/` outside a comment means the comment nesting did not line up
    if tokens
        .windows(2)
        .any(|pair| matches!(pair, [Token::Mul, Token::Div]))
    {
        return Err(Classification::rejected(reasons::UNBALANCED_COMMENT));
    }

    Ok(tokens
        .into_iter()
        .filter(|t| !matches!(t, Token::Whitespace(_) | Token::EOF))
        .collect())
}

/// The statement body, without a single trailing `;`.
fn single_statement(tokens: &[Token]) -> Result<&[Token], Classification> {
    let body = match tokens.iter().position(|t| matches!(t, Token::SemiColon)) {
        None => tokens,
        Some(idx) if idx + 1 == tokens.len() => &tokens[..idx],
        Some(_) => return Err(Classification::rejected(reasons::MULTIPLE_STATEMENTS)),
    };
    if body.is_empty() {
        return Err(Classification::rejected(reasons::EMPTY));
    }
    Ok(body)
}

fn classify_statement(tokens: &[Token], allow_write_ops: bool) -> Classification {
    let body = skip_leading_parens(tokens);
    let Some(first) = body.first().and_then(keyword) else {
        return Classification::rejected(if allow_write_ops {
            reasons::UNRECOGNIZED
        } else {
            reasons::WRITE_DISABLED
        });
    };

    if allow_write_ops {
        classify_writable(&first, body)
    } else {
        classify_read_only(&first, body)
    }
}

fn classify_read_only(first: &str, body: &[Token]) -> Classification {
    if !READ_ONLY_KEYWORDS.contains(&first) {
        return Classification::rejected(reasons::WRITE_DISABLED);
    }
    if first == "EXPLAIN" {
        return classify_explained(body, false);
    }
    if modifies_data(body) {
        return Classification::rejected(reasons::WRITE_DISABLED);
    }
    Classification::Allowed
}

fn classify_writable(first: &str, body: &[Token]) -> Classification {
    let (statement_type, name) = statement_type(first, body);
    match statement_type {
        SqlStatementType::Query | SqlStatementType::DmlWrite | SqlStatementType::Ddl => {
            Classification::Allowed
        }
        SqlStatementType::Explain => classify_explained(body, true),
        SqlStatementType::Administrative => {
            Classification::rejected(format!("{} statements are not permitted", name))
        }
        SqlStatementType::Session => Classification::rejected(reasons::SESSION_STATE),
        SqlStatementType::Transaction => Classification::rejected(reasons::TRANSACTION_CONTROL),
        SqlStatementType::Unknown => Classification::rejected(reasons::UNRECOGNIZED),
    }
}

/// Classify a statement from its leading keyword.
fn statement_type(first: &str, body: &[Token]) -> (SqlStatementType, String) {
    let kind = match first {
        "SELECT" | "WITH" | "SHOW" | "VALUES" | "TABLE" => SqlStatementType::Query,
        "EXPLAIN" => SqlStatementType::Explain,
        "INSERT" | "UPDATE" | "DELETE" | "MERGE" => SqlStatementType::DmlWrite,
        "COMMENT" | "REFRESH" => SqlStatementType::Ddl,
        "CREATE" => {
            return match created_object(body) {
                Some(object) if ADMINISTRATIVE_CREATE_OBJECTS.contains(&object.as_str()) => {
                    (SqlStatementType::Administrative, format!("CREATE {}", object))
                }
                Some(_) => (SqlStatementType::Ddl, "CREATE".to_string()),
                None => (SqlStatementType::Unknown, "CREATE".to_string()),
            };
        }
        "SECURITY" => {
            return (SqlStatementType::Administrative, "SECURITY LABEL".to_string());
        }
        kw if ADMINISTRATIVE_KEYWORDS.contains(&kw) => SqlStatementType::Administrative,
        kw if SESSION_KEYWORDS.contains(&kw) => SqlStatementType::Session,
        kw if TRANSACTION_KEYWORDS.contains(&kw) => SqlStatementType::Transaction,
        _ => SqlStatementType::Unknown,
    };
    (kind, first.to_string())
}

/// EXPLAIN runs (with ANALYZE) or plans its statement; judge that statement.
fn classify_explained(body: &[Token], allow_write_ops: bool) -> Classification {
    match explain_target(body) {
        Some(target) if !target.is_empty() => classify_statement(target, allow_write_ops),
        _ => Classification::rejected(reasons::UNRECOGNIZED),
    }
}

fn explain_target(body: &[Token]) -> Option<&[Token]> {
    let mut rest = body.get(1..)?;
    if matches!(rest.first(), Some(Token::LParen)) {
        let close = matching_paren(rest)?;
        return rest.get(close + 1..);
    }
    while let Some(word) = rest.first().and_then(keyword) {
        if !EXPLAIN_OPTIONS.contains(&word.as_str()) {
            break;
        }
        rest = &rest[1..];
    }
    Some(rest)
}

/// Index of the `)` closing the `(` at `tokens[0]`.
fn matching_paren(tokens: &[Token]) -> Option<usize> {
    let mut depth = 0usize;
    for (idx, token) in tokens.iter().enumerate() {
        match token {
            Token::LParen => depth += 1,
            Token::RParen => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(idx);
                }
            }
            _ => {}
        }
    }
    None
}

fn skip_leading_parens(tokens: &[Token]) -> &[Token] {
    let start = tokens
        .iter()
        .position(|t| !matches!(t, Token::LParen))
        .unwrap_or(tokens.len());
    &tokens[start..]
}

fn created_object(body: &[Token]) -> Option<String> {
    body.iter()
        .skip(1)
        .filter_map(keyword)
        .find(|word| !CREATE_MODIFIERS.contains(&word.as_str()))
}

/// Writable CTEs (`WITH x AS (DELETE ...)`) and `SELECT ... INTO`.
///
/// Any bare data-modifying keyword counts, except the row-locking clauses
/// `FOR UPDATE` / `FOR NO KEY UPDATE`.
fn modifies_data(body: &[Token]) -> bool {
    let words: Vec<Option<String>> = body.iter().map(keyword).collect();
    words.iter().enumerate().any(|(idx, word)| {
        let Some(word) = word.as_deref() else {
            return false;
        };
        if word == "INTO" {
            return true;
        }
        if !DATA_MODIFYING_KEYWORDS.contains(&word) {
            return false;
        }
        let previous = idx
            .checked_sub(1)
            .and_then(|prev| words[prev].as_deref());
        !(word == "UPDATE" && matches!(previous, Some("FOR") | Some("KEY")))
    })
}

/// Upper-cased keyword for an unquoted word token.
fn keyword(token: &Token) -> Option<String> {
    match token {
        Token::Word(word) if word.quote_style.is_none() => Some(word.value.to_ascii_uppercase()),
        _ => None,
    }
}
