//! Response rendering for tools and resources.
//!
//! Handlers produce a plain [`DbResult`]; the two renderers here are the only
//! places that turn it into an MCP envelope. Tools report domain errors as an
//! error payload (`is_error = true`) and never fail the JSON-RPC call.
//! Resources surface them as protocol errors.

use rmcp::ErrorData as McpError;
use rmcp::model::{CallToolResult, Content, ReadResourceResult, ResourceContents};
use serde::Serialize;
use tracing::warn;

use crate::error::{DbError, DbResult};

/// Render a handler result as a tool response.
pub fn render_tool<T: Serialize>(result: DbResult<T>) -> CallToolResult {
    match result.and_then(|value| to_pretty_json(&value)) {
        Ok(text) => CallToolResult::success(vec![Content::text(text)]),
        Err(err) => {
            warn!(code = err.code(), error = %err, "Tool call failed");
            CallToolResult::error(vec![Content::text(error_message(&err))])
        }
    }
}

/// Render a handler result as the contents of resource `uri`.
pub fn render_resource<T: Serialize>(
    uri: &str,
    result: DbResult<T>,
) -> Result<ReadResourceResult, McpError> {
    match result.and_then(|value| to_pretty_json(&value)) {
        Ok(text) => Ok(ReadResourceResult {
            contents: vec![ResourceContents::text(text, uri)],
        }),
        Err(err) => {
            warn!(uri, code = err.code(), error = %err, "Resource read failed");
            Err(err.into())
        }
    }
}

/// Human-readable error text: the message, then server detail and a hint.
pub fn error_message(err: &DbError) -> String {
    let mut message = err.to_string();
    if let DbError::Database {
        code: Some(code), ..
    } = err
    {
        message.push_str(&format!(" (SQLSTATE {})", code));
    }
    if let Some(detail) = err.detail() {
        message.push_str(&format!("\nDetail: {}", detail));
    }
    if let Some(suggestion) = err.suggestion() {
        message.push_str(&format!("\nHint: {}", suggestion));
    }
    message
}

fn to_pretty_json<T: Serialize>(value: &T) -> DbResult<String> {
    serde_json::to_string_pretty(value)
        .map_err(|e| DbError::internal(format!("Failed to serialize response: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn text_of(result: &CallToolResult) -> String {
        result
            .content
            .iter()
            .filter_map(|c| c.as_text().map(|t| t.text.clone()))
            .collect()
    }

    #[test]
    fn test_render_tool_success_is_pretty_json() {
        let result = render_tool(Ok(json!({ "id": 1 })));
        assert_ne!(result.is_error, Some(true));
        assert_eq!(text_of(&result), "{\n  \"id\": 1\n}");
    }

    #[test]
    fn test_render_tool_error_sets_flag() {
        let result = render_tool::<()>(Err(DbError::query_validation(
            "write operations are disabled",
        )));
        assert_eq!(result.is_error, Some(true));
        assert!(text_of(&result).contains("write operations are disabled"));
    }

    #[test]
    fn test_error_message_includes_sqlstate_and_hint() {
        let err = DbError::database(
            "relation \"missing\" does not exist",
            Some("42P01".to_string()),
            "Use list_tables",
        );
        let message = error_message(&err);
        assert!(message.contains("SQLSTATE 42P01"));
        assert!(message.contains("Hint: Use list_tables"));
    }

    #[test]
    fn test_render_resource() {
        let ok = render_resource("table://public/users", Ok(json!([]))).unwrap();
        assert_eq!(ok.contents.len(), 1);

        let err = render_resource::<()>(
            "table://public/missing",
            Err(DbError::not_found("table public.missing", "Use list_tables")),
        );
        assert!(err.is_err());
    }
}
