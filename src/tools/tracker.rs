//! Issue and feature tracking tools.
//!
//! This module implements `create_issue`, `update_issue`, `create_feature` and
//! `update_feature`. They write to two fixed tables through hand-written,
//! parameterized statements and therefore bypass the statement classifier.
//! Client values only ever travel as bound parameters.
//!
//! Numbers (`issue_number`, `feature_number`) are `MAX + 1` within the table,
//! computed by the INSERT itself inside a transaction. On PostgreSQL the
//! transaction first takes an advisory lock keyed on the table name so that
//! concurrent creates are serialized.

use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use tracing::info;

use crate::db::ConnectionManager;
use crate::error::{DbError, DbResult};
use crate::models::{BoundStatement, DatabaseType, QueryParam};

/// Serializes creates per table on PostgreSQL until the transaction ends.
const ADVISORY_LOCK_SQL: &str = "SELECT pg_advisory_xact_lock(hashtext($1)) IS NOT NULL AS locked";

/// Row returned by a create or update, as column → value.
pub type TrackerRow = Map<String, JsonValue>;

macro_rules! tracker_enum {
    (
        $(#[$meta:meta])*
        $name:ident default $default:ident { $($variant:ident => $text:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
        pub enum $name {
            $(
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            /// Every accepted value, as stored in the database.
            pub const VALUES: &'static [&'static str] = &[$($text),+];

            pub const fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::$default
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl From<$name> for QueryParam {
            fn from(value: $name) -> Self {
                QueryParam::from(value.as_str())
            }
        }
    };
}

tracker_enum! {
    /// Urgency of an issue or feature.
    Priority default Medium {
        Low => "low",
        Medium => "medium",
        High => "high",
        Critical => "critical",
    }
}

tracker_enum! {
    IssueStatus default Open {
        Open => "open",
        InProgress => "in_progress",
        Done => "done",
    }
}

tracker_enum! {
    FeatureStatus default Planned {
        Planned => "planned",
        InProgress => "in_progress",
        Done => "done",
    }
}

tracker_enum! {
    /// QA state of a feature.
    TestingStatus default NotTested {
        NotTested => "not_tested",
        InTesting => "in_testing",
        Passed => "passed",
        Failed => "failed",
    }
}

impl IssueStatus {
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}

impl FeatureStatus {
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}

// =============================================================================
// Tool Inputs
// =============================================================================

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct CreateIssueInput {
    /// Short summary of the issue
    pub title: String,
    /// Full description of the issue
    pub description: String,
    /// low, medium (default), high or critical
    pub priority: Option<Priority>,
    /// open (default), in_progress or done
    pub status: Option<IssueStatus>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct UpdateIssueInput {
    /// Row id of the issue (the `id` column, not `issue_number`)
    pub id: i64,
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<Priority>,
    /// Setting `done` also stamps `resolved_at`
    pub status: Option<IssueStatus>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct CreateFeatureInput {
    /// Short summary of the feature
    pub title: String,
    /// Full description of the feature
    pub description: String,
    /// low, medium (default), high or critical
    pub priority: Option<Priority>,
    /// planned (default), in_progress or done
    pub status: Option<FeatureStatus>,
    /// not_tested (default), in_testing, passed or failed
    pub testing_status: Option<TestingStatus>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct UpdateFeatureInput {
    /// Row id of the feature (the `id` column, not `feature_number`)
    pub id: i64,
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<Priority>,
    /// Setting `done` also stamps `completed_at`
    pub status: Option<FeatureStatus>,
    pub testing_status: Option<TestingStatus>,
}

// =============================================================================
// Table Definitions
// =============================================================================

/// A text column restricted to a fixed set of values.
#[derive(Debug, Clone, Copy)]
pub struct EnumColumn {
    pub name: &'static str,
    pub default: &'static str,
    pub allowed: &'static [&'static str],
}

/// One of the tracked tables.
#[derive(Debug, Clone, Copy)]
pub struct TrackedTable {
    pub name: &'static str,
    /// Singular noun used in messages
    pub entity: &'static str,
    pub number_column: &'static str,
    /// Timestamp stamped when status becomes `done`
    pub closed_column: &'static str,
    pub enum_columns: &'static [EnumColumn],
}

const PRIORITY_COLUMN: EnumColumn = EnumColumn {
    name: "priority",
    default: Priority::Medium.as_str(),
    allowed: Priority::VALUES,
};

pub const ISSUES: TrackedTable = TrackedTable {
    name: "issues",
    entity: "issue",
    number_column: "issue_number",
    closed_column: "resolved_at",
    enum_columns: &[
        PRIORITY_COLUMN,
        EnumColumn {
            name: "status",
            default: IssueStatus::Open.as_str(),
            allowed: IssueStatus::VALUES,
        },
    ],
};

pub const FEATURES: TrackedTable = TrackedTable {
    name: "features",
    entity: "feature",
    number_column: "feature_number",
    closed_column: "completed_at",
    enum_columns: &[
        PRIORITY_COLUMN,
        EnumColumn {
            name: "status",
            default: FeatureStatus::Planned.as_str(),
            allowed: FeatureStatus::VALUES,
        },
        EnumColumn {
            name: "testing_status",
            default: TestingStatus::NotTested.as_str(),
            allowed: TestingStatus::VALUES,
        },
    ],
};

/// `CREATE TABLE IF NOT EXISTS` for `table` on `db_type`.
pub fn create_table_sql(table: &TrackedTable, db_type: DatabaseType) -> String {
    let (id_column, timestamp) = match db_type {
        DatabaseType::PostgreSQL => ("id BIGSERIAL PRIMARY KEY", "TIMESTAMPTZ"),
        DatabaseType::SQLite => ("id INTEGER PRIMARY KEY AUTOINCREMENT", "TIMESTAMP"),
    };

    let mut columns = vec![
        id_column.to_string(),
        format!("{} INTEGER NOT NULL UNIQUE", table.number_column),
        "title TEXT NOT NULL".to_string(),
        "description TEXT NOT NULL".to_string(),
    ];
    for column in table.enum_columns {
        let allowed = column
            .allowed
            .iter()
            .map(|v| format!("'{}'", v))
            .collect::<Vec<_>>()
            .join(", ");
        columns.push(format!(
            "{name} TEXT NOT NULL DEFAULT '{default}' CHECK ({name} IN ({allowed}))",
            name = column.name,
            default = column.default,
        ));
    }
    columns.push(format!("created_at {} NOT NULL DEFAULT CURRENT_TIMESTAMP", timestamp));
    columns.push(format!("updated_at {} NOT NULL DEFAULT CURRENT_TIMESTAMP", timestamp));
    columns.push(format!("{} {}", table.closed_column, timestamp));

    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
        table.name,
        columns.join(",\n    ")
    )
}

/// Create the tracked tables if they do not exist.
pub async fn bootstrap_schema(connection_manager: &ConnectionManager) -> DbResult<()> {
    let db_type = connection_manager.db_type();
    for table in [ISSUES, FEATURES] {
        connection_manager
            .execute_query(&create_table_sql(&table, db_type))
            .await?;
        info!(table = table.name, "Tracker table ready");
    }
    Ok(())
}

// =============================================================================
// Statement Builders
// =============================================================================

/// INSERT that numbers the new row `MAX + 1` and returns it.
pub fn build_create(
    table: &TrackedTable,
    db_type: DatabaseType,
    values: Vec<(&'static str, QueryParam)>,
    done: bool,
) -> BoundStatement {
    let mut columns = vec![table.number_column.to_string()];
    let mut exprs = vec![format!("COALESCE(MAX({}), 0) + 1", table.number_column)];
    let mut params = Vec::with_capacity(values.len());

    for (index, (column, value)) in values.into_iter().enumerate() {
        columns.push(column.to_string());
        exprs.push(db_type.placeholder(index + 1));
        params.push(value);
    }
    if done {
        columns.push(table.closed_column.to_string());
        exprs.push("CURRENT_TIMESTAMP".to_string());
    }

    let sql = format!(
        "INSERT INTO {table} ({columns}) SELECT {exprs} FROM {table} RETURNING *",
        table = table.name,
        columns = columns.join(", "),
        exprs = exprs.join(", "),
    );
    BoundStatement::new(sql, params)
}

/// UPDATE of the present fields only.
///
/// `done` is `Some` when the status changes: `true` stamps the closing
/// timestamp, `false` clears it.
pub fn build_update(
    table: &TrackedTable,
    db_type: DatabaseType,
    id: i64,
    changes: Vec<(&'static str, QueryParam)>,
    done: Option<bool>,
) -> DbResult<BoundStatement> {
    if changes.is_empty() {
        return Err(DbError::query_validation("no fields to update"));
    }

    let mut assignments = Vec::with_capacity(changes.len() + 2);
    let mut params = Vec::with_capacity(changes.len() + 1);
    for (index, (column, value)) in changes.into_iter().enumerate() {
        assignments.push(format!("{} = {}", column, db_type.placeholder(index + 1)));
        params.push(value);
    }
    assignments.push("updated_at = CURRENT_TIMESTAMP".to_string());
    match done {
        Some(true) => assignments.push(format!("{} = CURRENT_TIMESTAMP", table.closed_column)),
        Some(false) => assignments.push(format!("{} = NULL", table.closed_column)),
        None => {}
    }

    params.push(QueryParam::Int(id));
    let sql = format!(
        "UPDATE {} SET {} WHERE id = {} RETURNING *",
        table.name,
        assignments.join(", "),
        db_type.placeholder(params.len())
    );
    Ok(BoundStatement::new(sql, params))
}

fn required_text(field: &str, value: String) -> DbResult<QueryParam> {
    if value.trim().is_empty() {
        return Err(DbError::query_validation(format!(
            "{} is required and must not be blank",
            field
        )));
    }
    Ok(QueryParam::String(value))
}

fn optional_text(
    changes: &mut Vec<(&'static str, QueryParam)>,
    field: &'static str,
    value: Option<String>,
) -> DbResult<()> {
    if let Some(value) = value {
        changes.push((field, required_text(field, value)?));
    }
    Ok(())
}

fn validate_id(id: i64) -> DbResult<()> {
    if id <= 0 {
        return Err(DbError::query_validation(format!(
            "id must be a positive integer, got {}",
            id
        )));
    }
    Ok(())
}

// =============================================================================
// Handler
// =============================================================================

/// Handler for the issue and feature tools.
pub struct TrackerToolHandler {
    connection_manager: Arc<ConnectionManager>,
}

impl TrackerToolHandler {
    pub fn new(connection_manager: Arc<ConnectionManager>) -> Self {
        Self { connection_manager }
    }

    pub async fn create_issue(&self, input: CreateIssueInput) -> DbResult<TrackerRow> {
        let status = input.status.unwrap_or_default();
        let values = vec![
            ("title", required_text("title", input.title)?),
            ("description", required_text("description", input.description)?),
            ("priority", input.priority.unwrap_or_default().into()),
            ("status", status.into()),
        ];
        self.create(&ISSUES, values, status.is_done()).await
    }

    pub async fn update_issue(&self, input: UpdateIssueInput) -> DbResult<TrackerRow> {
        validate_id(input.id)?;
        let mut changes = Vec::new();
        optional_text(&mut changes, "title", input.title)?;
        optional_text(&mut changes, "description", input.description)?;
        if let Some(priority) = input.priority {
            changes.push(("priority", priority.into()));
        }
        if let Some(status) = input.status {
            changes.push(("status", status.into()));
        }
        let done = input.status.map(|s| s.is_done());
        self.update(&ISSUES, input.id, changes, done).await
    }

    pub async fn create_feature(&self, input: CreateFeatureInput) -> DbResult<TrackerRow> {
        let status = input.status.unwrap_or_default();
        let values = vec![
            ("title", required_text("title", input.title)?),
            ("description", required_text("description", input.description)?),
            ("priority", input.priority.unwrap_or_default().into()),
            ("status", status.into()),
            ("testing_status", input.testing_status.unwrap_or_default().into()),
        ];
        self.create(&FEATURES, values, status.is_done()).await
    }

    pub async fn update_feature(&self, input: UpdateFeatureInput) -> DbResult<TrackerRow> {
        validate_id(input.id)?;
        let mut changes = Vec::new();
        optional_text(&mut changes, "title", input.title)?;
        optional_text(&mut changes, "description", input.description)?;
        if let Some(priority) = input.priority {
            changes.push(("priority", priority.into()));
        }
        if let Some(status) = input.status {
            changes.push(("status", status.into()));
        }
        if let Some(testing_status) = input.testing_status {
            changes.push(("testing_status", testing_status.into()));
        }
        let done = input.status.map(|s| s.is_done());
        self.update(&FEATURES, input.id, changes, done).await
    }

    async fn create(
        &self,
        table: &TrackedTable,
        values: Vec<(&'static str, QueryParam)>,
        done: bool,
    ) -> DbResult<TrackerRow> {
        let db_type = self.connection_manager.db_type();
        let mut statements = Vec::with_capacity(2);
        if db_type == DatabaseType::PostgreSQL {
            statements.push(BoundStatement::new(
                ADVISORY_LOCK_SQL,
                vec![QueryParam::from(table.name)],
            ));
        }
        statements.push(build_create(table, db_type, values, done));

        let row = self
            .connection_manager
            .execute_in_transaction(&statements)
            .await?
            .into_first_row()
            .ok_or_else(|| {
                DbError::internal(format!("INSERT into {} returned no row", table.name))
            })?;

        info!(
            table = table.name,
            number = ?row.get(table.number_column),
            "Created {}",
            table.entity
        );
        Ok(row)
    }

    async fn update(
        &self,
        table: &TrackedTable,
        id: i64,
        changes: Vec<(&'static str, QueryParam)>,
        done: Option<bool>,
    ) -> DbResult<TrackerRow> {
        let statement = build_update(table, self.connection_manager.db_type(), id, changes, done)?;

        let row = self
            .connection_manager
            .execute_parameterized_query(&statement.sql, &statement.params)
            .await?
            .into_first_row()
            .ok_or_else(|| {
                DbError::not_found(
                    format!("{} {}", table.entity, id),
                    format!("No {} has id {}; check the id column", table.entity, id),
                )
            })?;

        info!(table = table.name, id, "Updated {}", table.entity);
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_serialization() {
        assert_eq!(
            serde_json::to_string(&IssueStatus::InProgress).unwrap(),
            "\"in_progress\""
        );
        let status: TestingStatus = serde_json::from_str("\"not_tested\"").unwrap();
        assert_eq!(status, TestingStatus::NotTested);
        assert!(serde_json::from_str::<Priority>("\"urgent\"").is_err());
        assert!(serde_json::from_str::<FeatureStatus>("\"open\"").is_err());
    }

    #[test]
    fn test_enum_defaults() {
        assert_eq!(Priority::default(), Priority::Medium);
        assert_eq!(IssueStatus::default(), IssueStatus::Open);
        assert_eq!(FeatureStatus::default(), FeatureStatus::Planned);
        assert_eq!(TestingStatus::default(), TestingStatus::NotTested);
    }

    #[test]
    fn test_build_create_postgres() {
        let statement = build_create(
            &ISSUES,
            DatabaseType::PostgreSQL,
            vec![("title", "t".into()), ("description", "d".into())],
            false,
        );
        assert_eq!(
            statement.sql,
            "INSERT INTO issues (issue_number, title, description) \
             SELECT COALESCE(MAX(issue_number), 0) + 1, $1, $2 FROM issues RETURNING *"
        );
        assert_eq!(statement.params.len(), 2);
    }

    #[test]
    fn test_build_create_done_stamps_completion() {
        let statement = build_create(
            &FEATURES,
            DatabaseType::SQLite,
            vec![("title", "t".into())],
            true,
        );
        assert!(statement.sql.contains("(feature_number, title, completed_at)"));
        assert!(statement.sql.contains("?1, CURRENT_TIMESTAMP FROM features"));
    }

    #[test]
    fn test_build_update_partial() {
        let statement = build_update(
            &ISSUES,
            DatabaseType::PostgreSQL,
            7,
            vec![("status", IssueStatus::Done.into())],
            Some(true),
        )
        .unwrap();
        assert_eq!(
            statement.sql,
            "UPDATE issues SET status = $1, updated_at = CURRENT_TIMESTAMP, \
             resolved_at = CURRENT_TIMESTAMP WHERE id = $2 RETURNING *"
        );
        assert_eq!(statement.params, vec![QueryParam::from("done"), QueryParam::Int(7)]);
    }

    #[test]
    fn test_build_update_reopen_clears_timestamp() {
        let statement = build_update(
            &FEATURES,
            DatabaseType::SQLite,
            3,
            vec![("status", FeatureStatus::InProgress.into())],
            Some(false),
        )
        .unwrap();
        assert!(statement.sql.contains("completed_at = NULL"));
        assert!(statement.sql.ends_with("WHERE id = ?2 RETURNING *"));
    }

    #[test]
    fn test_build_update_without_fields_fails() {
        let err = build_update(&ISSUES, DatabaseType::SQLite, 1, Vec::new(), None).unwrap_err();
        assert!(matches!(err, DbError::QueryValidation { .. }));
        assert!(err.to_string().contains("no fields to update"));
    }

    #[test]
    fn test_create_table_sql() {
        let sql = create_table_sql(&FEATURES, DatabaseType::PostgreSQL);
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS features"));
        assert!(sql.contains("id BIGSERIAL PRIMARY KEY"));
        assert!(sql.contains(
            "testing_status TEXT NOT NULL DEFAULT 'not_tested' \
             CHECK (testing_status IN ('not_tested', 'in_testing', 'passed', 'failed'))"
        ));
        assert!(sql.contains("completed_at TIMESTAMPTZ"));

        let sql = create_table_sql(&ISSUES, DatabaseType::SQLite);
        assert!(sql.contains("id INTEGER PRIMARY KEY AUTOINCREMENT"));
        assert!(sql.contains("resolved_at TIMESTAMP"));
    }

    #[test]
    fn test_field_validation() {
        assert!(required_text("title", "   ".to_string()).is_err());
        assert!(required_text("title", "Crash on save".to_string()).is_ok());
        assert!(validate_id(0).is_err());
        assert!(validate_id(-4).is_err());
        assert!(validate_id(1).is_ok());
    }
}
