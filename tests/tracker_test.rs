//! Issue and feature tools against a file-backed SQLite database.

use std::sync::Arc;

use futures_util::future::join_all;
use pg_mcp_server::config::ConnectionSettings;
use pg_mcp_server::db::ConnectionManager;
use pg_mcp_server::error::DbError;
use pg_mcp_server::tools::tracker::{
    self, CreateFeatureInput, CreateIssueInput, FeatureStatus, IssueStatus, Priority,
    TestingStatus, TrackerToolHandler, UpdateFeatureInput, UpdateIssueInput,
};
use serde_json::{Value as JsonValue, json};
use tempfile::TempDir;

async fn setup(dir: &TempDir) -> (Arc<ConnectionManager>, TrackerToolHandler) {
    let path = dir.path().join("tracker.db");
    let settings = ConnectionSettings::new(format!("sqlite:{}", path.display())).unwrap();
    let manager = Arc::new(ConnectionManager::connect(settings).await.unwrap());
    tracker::bootstrap_schema(&manager).await.unwrap();
    let handler = TrackerToolHandler::new(manager.clone());
    (manager, handler)
}

fn issue(title: &str) -> CreateIssueInput {
    CreateIssueInput {
        title: title.to_string(),
        description: format!("{title} description"),
        priority: None,
        status: None,
    }
}

fn empty_issue_update(id: i64) -> UpdateIssueInput {
    UpdateIssueInput {
        id,
        title: None,
        description: None,
        priority: None,
        status: None,
    }
}

fn id_of(row: &serde_json::Map<String, JsonValue>) -> i64 {
    row["id"].as_i64().expect("integer id")
}

#[tokio::test]
async fn test_bootstrap_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let (manager, _) = setup(&dir).await;
    tracker::bootstrap_schema(&manager).await.unwrap();

    let tables = manager.list_tables().await.unwrap();
    let names: Vec<&str> = tables.iter().map(|t| t.table.as_str()).collect();
    assert_eq!(names, ["features", "issues"]);
}

#[tokio::test]
async fn test_issue_numbers_are_sequential() {
    let dir = TempDir::new().unwrap();
    let (_, handler) = setup(&dir).await;

    let first = handler.create_issue(issue("first")).await.unwrap();
    let second = handler.create_issue(issue("second")).await.unwrap();

    assert_eq!(first["issue_number"], json!(1));
    assert_eq!(second["issue_number"], json!(2));
    assert_eq!(first["priority"], json!("medium"));
    assert_eq!(first["status"], json!("open"));
    assert_eq!(first["resolved_at"], JsonValue::Null);
    assert!(first["created_at"].is_string());
}

#[tokio::test]
async fn test_concurrent_creates_get_unique_numbers() {
    let dir = TempDir::new().unwrap();
    let (_, handler) = setup(&dir).await;

    let creates = (0..8).map(|i| handler.create_issue(issue(&format!("issue {i}"))));
    let rows = join_all(creates).await;

    let mut numbers: Vec<i64> = rows
        .into_iter()
        .map(|row| row.unwrap()["issue_number"].as_i64().unwrap())
        .collect();
    numbers.sort_unstable();
    assert_eq!(numbers, (1..=8).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_issue_done_stamps_and_reopen_clears_resolved_at() {
    let dir = TempDir::new().unwrap();
    let (_, handler) = setup(&dir).await;

    let created = handler.create_issue(issue("crash on save")).await.unwrap();
    let id = id_of(&created);

    let done = handler
        .update_issue(UpdateIssueInput {
            status: Some(IssueStatus::Done),
            priority: Some(Priority::Critical),
            ..empty_issue_update(id)
        })
        .await
        .unwrap();
    assert_eq!(done["status"], json!("done"));
    assert_eq!(done["priority"], json!("critical"));
    assert!(done["resolved_at"].is_string());
    assert_eq!(done["title"], json!("crash on save"));

    let reopened = handler
        .update_issue(UpdateIssueInput {
            status: Some(IssueStatus::InProgress),
            ..empty_issue_update(id)
        })
        .await
        .unwrap();
    assert_eq!(reopened["status"], json!("in_progress"));
    assert_eq!(reopened["resolved_at"], JsonValue::Null);
}

#[tokio::test]
async fn test_created_done_issue_is_resolved() {
    let dir = TempDir::new().unwrap();
    let (_, handler) = setup(&dir).await;

    let row = handler
        .create_issue(CreateIssueInput {
            status: Some(IssueStatus::Done),
            ..issue("already fixed")
        })
        .await
        .unwrap();
    assert!(row["resolved_at"].is_string());
}

#[tokio::test]
async fn test_empty_update_is_rejected_without_mutation() {
    let dir = TempDir::new().unwrap();
    let (manager, handler) = setup(&dir).await;

    let created = handler.create_issue(issue("untouched")).await.unwrap();
    let id = id_of(&created);

    let err = handler.update_issue(empty_issue_update(id)).await.unwrap_err();
    match err {
        DbError::QueryValidation { reason } => assert!(reason.contains("no fields to update")),
        other => panic!("unexpected error: {other:?}"),
    }

    let current = manager
        .execute_query("SELECT * FROM issues")
        .await
        .unwrap()
        .into_first_row()
        .unwrap();
    assert_eq!(current, created);
}

#[tokio::test]
async fn test_update_unknown_id_is_not_found() {
    let dir = TempDir::new().unwrap();
    let (_, handler) = setup(&dir).await;

    let err = handler
        .update_issue(UpdateIssueInput {
            title: Some("renamed".into()),
            ..empty_issue_update(999)
        })
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::NotFound { .. }), "{err:?}");
}

#[tokio::test]
async fn test_blank_title_rejected() {
    let dir = TempDir::new().unwrap();
    let (manager, handler) = setup(&dir).await;

    let err = handler.create_issue(issue("   ")).await.unwrap_err();
    assert!(matches!(err, DbError::QueryValidation { .. }), "{err:?}");

    let count = manager
        .execute_query("SELECT COUNT(*) AS n FROM issues")
        .await
        .unwrap();
    assert_eq!(count.rows[0]["n"], json!(0));
}

#[tokio::test]
async fn test_feature_lifecycle() {
    let dir = TempDir::new().unwrap();
    let (_, handler) = setup(&dir).await;

    let created = handler
        .create_feature(CreateFeatureInput {
            title: "dark mode".into(),
            description: "theme toggle".into(),
            priority: Some(Priority::High),
            status: None,
            testing_status: None,
        })
        .await
        .unwrap();
    assert_eq!(created["feature_number"], json!(1));
    assert_eq!(created["status"], json!("planned"));
    assert_eq!(created["testing_status"], json!("not_tested"));
    assert_eq!(created["completed_at"], JsonValue::Null);

    let updated = handler
        .update_feature(UpdateFeatureInput {
            id: id_of(&created),
            title: None,
            description: None,
            priority: None,
            status: Some(FeatureStatus::Done),
            testing_status: Some(TestingStatus::Passed),
        })
        .await
        .unwrap();
    assert_eq!(updated["status"], json!("done"));
    assert_eq!(updated["testing_status"], json!("passed"));
    assert!(updated["completed_at"].is_string());

    // issues and features are numbered independently
    let issue_row = handler.create_issue(issue("unrelated")).await.unwrap();
    assert_eq!(issue_row["issue_number"], json!(1));
}
