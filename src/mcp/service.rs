//! MCP service implementation using rmcp.
//!
//! This module defines the DbService struct with all database tools exposed
//! via the MCP protocol using the rmcp framework's macros, plus one resource
//! per table (`table://{schema}/{table}`).

use std::sync::Arc;

use rmcp::{
    ErrorData as McpError, RoleServer, ServerHandler,
    handler::server::tool::ToolRouter,
    handler::server::wrapper::Parameters,
    model::{
        AnnotateAble, CallToolResult, Implementation, ListResourcesResult,
        PaginatedRequestParam, ProtocolVersion, RawResource, ReadResourceRequestParam,
        ReadResourceResult, ServerCapabilities, ServerInfo,
    },
    service::RequestContext,
    tool, tool_handler, tool_router,
};

use crate::db::ConnectionManager;
use crate::tools::format::{render_resource, render_tool};
use crate::tools::query::{QueryInput, QueryToolHandler};
use crate::tools::schema::{GetTableDetailInput, SchemaToolHandler, parse_table_uri, table_uri};
use crate::tools::tracker::{
    CreateFeatureInput, CreateIssueInput, TrackerToolHandler, UpdateFeatureInput,
    UpdateIssueInput,
};

#[derive(Clone)]
pub struct DbService {
    /// Shared connection manager for all database operations
    connection_manager: Arc<ConnectionManager>,
    /// Tool router for MCP tool dispatch (auto-generated)
    tool_router: ToolRouter<Self>,
}

impl DbService {
    pub fn new(connection_manager: Arc<ConnectionManager>) -> Self {
        Self {
            connection_manager,
            tool_router: Self::tool_router(),
        }
    }

    fn schema_handler(&self) -> SchemaToolHandler {
        SchemaToolHandler::new(self.connection_manager.clone())
    }

    fn tracker_handler(&self) -> TrackerToolHandler {
        TrackerToolHandler::new(self.connection_manager.clone())
    }
}

#[tool_router]
impl DbService {
    #[tool(
        description = "Execute a single SQL statement and return its rows as JSON.\nIn read-only mode only SELECT, WITH, EXPLAIN and SHOW are accepted.\nMultiple statements, DROP/TRUNCATE/ALTER/GRANT and session commands are always rejected.\nLarge results are cut at the configured row limit and flagged truncated."
    )]
    async fn query(
        &self,
        Parameters(input): Parameters<QueryInput>,
    ) -> Result<CallToolResult, McpError> {
        let handler = QueryToolHandler::new(self.connection_manager.clone());
        Ok(render_tool(handler.query(input).await))
    }

    #[tool(description = "List user tables as {schema, table}, ordered by schema then table.")]
    async fn list_tables(&self) -> Result<CallToolResult, McpError> {
        Ok(render_tool(self.schema_handler().list_tables().await))
    }

    #[tool(
        description = "Get the columns (name, type, nullable, default) of a table and up to 5 sample rows."
    )]
    async fn get_table_detail(
        &self,
        Parameters(input): Parameters<GetTableDetailInput>,
    ) -> Result<CallToolResult, McpError> {
        Ok(render_tool(self.schema_handler().get_table_detail(input).await))
    }

    #[tool(
        description = "Create an issue. Returns the created row including its issue_number.\nPriority: low|medium|high|critical (default medium). Status: open|in_progress|done (default open)."
    )]
    async fn create_issue(
        &self,
        Parameters(input): Parameters<CreateIssueInput>,
    ) -> Result<CallToolResult, McpError> {
        Ok(render_tool(self.tracker_handler().create_issue(input).await))
    }

    #[tool(
        description = "Update an issue by id. Only the given fields change.\nSetting status to done also stamps resolved_at."
    )]
    async fn update_issue(
        &self,
        Parameters(input): Parameters<UpdateIssueInput>,
    ) -> Result<CallToolResult, McpError> {
        Ok(render_tool(self.tracker_handler().update_issue(input).await))
    }

    #[tool(
        description = "Create a feature. Returns the created row including its feature_number.\nStatus: planned|in_progress|done (default planned). Testing status: not_tested|in_testing|passed|failed (default not_tested)."
    )]
    async fn create_feature(
        &self,
        Parameters(input): Parameters<CreateFeatureInput>,
    ) -> Result<CallToolResult, McpError> {
        Ok(render_tool(self.tracker_handler().create_feature(input).await))
    }

    #[tool(
        description = "Update a feature by id. Only the given fields change.\nSetting status to done also stamps completed_at."
    )]
    async fn update_feature(
        &self,
        Parameters(input): Parameters<UpdateFeatureInput>,
    ) -> Result<CallToolResult, McpError> {
        Ok(render_tool(self.tracker_handler().update_feature(input).await))
    }
}

#[tool_handler]
impl ServerHandler for DbService {
    fn get_info(&self) -> ServerInfo {
        let mode = if self.connection_manager.allow_write_ops() {
            "Write operations are enabled for the `query` tool."
        } else {
            "The `query` tool is read-only: only SELECT, WITH, EXPLAIN and SHOW are accepted."
        };

        ServerInfo {
            protocol_version: ProtocolVersion::V_2025_03_26,
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_resources()
                .build(),
            server_info: Implementation {
                name: env!("CARGO_PKG_NAME").to_owned(),
                title: Some("PostgreSQL MCP Server".to_owned()),
                version: env!("CARGO_PKG_VERSION").to_owned(),
                icons: None,
                website_url: None,
            },
            instructions: Some(format!(
                "Database tools for a single {} database.\n\
                \n\
                ## Workflow\n\
                1. Call `list_tables` to see available tables\n\
                2. Call `get_table_detail` (or read `table://{{schema}}/{{table}}`) for columns and sample rows\n\
                3. Use `query` with one statement per call\n\
                \n\
                ## Tracking\n\
                `create_issue`/`update_issue` and `create_feature`/`update_feature` manage the \
                `issues` and `features` tables. Updates are partial.\n\
                \n\
                {}",
                self.connection_manager.db_type(),
                mode
            )),
        }
    }

    async fn list_resources(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, McpError> {
        let tables = self.schema_handler().list_tables().await?;
        let resources = tables
            .iter()
            .map(|identity| {
                let mut resource = RawResource::new(table_uri(identity), identity.to_string());
                resource.description = Some(format!("Columns and sample rows of {}", identity));
                resource.mime_type = Some("application/json".to_string());
                resource.no_annotation()
            })
            .collect();
        Ok(ListResourcesResult::with_all_items(resources))
    }

    async fn read_resource(
        &self,
        ReadResourceRequestParam { uri, .. }: ReadResourceRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, McpError> {
        let identity = parse_table_uri(&uri)?;
        let detail = self
            .schema_handler()
            .get_table_detail(GetTableDetailInput {
                schema: identity.schema,
                table: identity.table,
            })
            .await;
        render_resource(&uri, detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionSettings;

    fn create_test_service(allow_write_ops: bool) -> DbService {
        let settings = ConnectionSettings::new("sqlite::memory:")
            .unwrap()
            .with_write_ops(allow_write_ops);
        DbService::new(Arc::new(ConnectionManager::new(settings)))
    }

    #[test]
    fn test_server_info() {
        let service = create_test_service(false);
        let info = service.get_info();
        assert_eq!(info.server_info.name, env!("CARGO_PKG_NAME"));
        assert!(info.capabilities.tools.is_some());
        assert!(info.capabilities.resources.is_some());
        assert!(info.instructions.unwrap().contains("read-only"));
    }

    #[test]
    fn test_tool_router_lists_all_tools() {
        let service = create_test_service(true);
        let mut names: Vec<String> = service
            .tool_router
            .list_all()
            .into_iter()
            .map(|tool| tool.name.to_string())
            .collect();
        names.sort();
        assert_eq!(
            names,
            [
                "create_feature",
                "create_issue",
                "get_table_detail",
                "list_tables",
                "query",
                "update_feature",
                "update_issue",
            ]
        );
    }
}
