//! MCP Server implementation
//!
//! This module provides the MCP server that exposes the persistent SSH
//! client through the `exec`, `shell-exec`, and `status` tools.

use rmcp::{
    handler::server::ServerHandler,
    model::*,
    service::{RequestContext, RoleServer},
    ErrorData as McpError,
};
use tracing::{debug, error, info};

use crate::config::{Config, STATE_KEYS};
use crate::ssh::{DispatchMode, RusshTransport, SshClient};
use crate::tools::{self, ExecParams, EXEC_TOOL, SHELL_EXEC_TOOL, STATUS_TOOL};

/// ssh-dispatch MCP Server
///
/// Dispatch tools return as soon as the commands are submitted. Their
/// outcome is observed through the `status` tool.
#[derive(Clone)]
pub struct SshDispatchServer {
    /// Server configuration
    config: Config,

    /// Persistent SSH client
    client: SshClient,
}

impl SshDispatchServer {
    /// Create a server on top of an already running client
    pub fn new(config: Config, client: SshClient) -> Self {
        Self { config, client }
    }

    /// Start an SSH client for `config` and serve it.
    ///
    /// The first connection attempt starts immediately.
    pub fn connect(config: Config) -> Self {
        let client = SshClient::spawn(RusshTransport::new(), config.session.clone());
        Self::new(config, client)
    }

    /// Get a reference to the SSH client
    pub fn client(&self) -> &SshClient {
        &self.client
    }

    /// Close the connection and cancel any pending reconnect
    pub async fn shutdown(&self) {
        info!("Shutting down ssh-dispatch...");
        self.client.teardown().await;
    }

    /// Dispatch a command string (used by exec and shell-exec tools)
    async fn dispatch(&self, mode: DispatchMode, command: &str) -> CallToolResult {
        debug!("{} dispatch requested: {}", mode, command);

        match self.client.dispatch(mode, command).await {
            Ok(receipt) => CallToolResult::success(vec![Content::text(format!(
                "Dispatched {} command(s) in {} mode (dispatch #{})",
                receipt.commands, receipt.mode, receipt.id
            ))]),
            Err(e) => {
                error!("Dispatch failed: {}", e);
                CallToolResult::error(vec![Content::text(format!("Error: {}", e))])
            }
        }
    }

    /// Report status and error state (used by status tool)
    async fn status(&self) -> CallToolResult {
        match self.client.snapshot().await {
            Ok(snapshot) => {
                let mut report = serde_json::Map::new();
                report.insert("status".into(), snapshot.status.to_string().into());
                report.insert(
                    STATE_KEYS.error_variable.into(),
                    snapshot.returned_error.into(),
                );
                report.insert(
                    STATE_KEYS.error_feedback.into(),
                    snapshot.returned_error.into(),
                );
                report.insert("reconnectPending".into(), snapshot.reconnect_pending.into());

                CallToolResult::success(vec![Content::text(
                    serde_json::Value::Object(report).to_string(),
                )])
            }
            Err(e) => CallToolResult::error(vec![Content::text(format!("Error: {}", e))]),
        }
    }

    /// Route a tool call by name
    async fn run_tool(
        &self,
        name: &str,
        args: JsonObject,
    ) -> std::result::Result<CallToolResult, McpError> {
        match name {
            EXEC_TOOL => {
                let params = parse_exec_params(args)?;
                Ok(self.dispatch(DispatchMode::Discrete, &params.command).await)
            }
            SHELL_EXEC_TOOL | "shell_exec" => {
                let params = parse_exec_params(args)?;
                Ok(self.dispatch(DispatchMode::Session, &params.command).await)
            }
            STATUS_TOOL => Ok(self.status().await),
            _ => Err(McpError::invalid_params(
                format!("Unknown tool: {}", name),
                None,
            )),
        }
    }
}

/// Extract the command argument
fn parse_exec_params(args: JsonObject) -> std::result::Result<ExecParams, McpError> {
    serde_json::from_value(serde_json::Value::Object(args)).map_err(|e| {
        McpError::invalid_params(format!("Missing required parameter: command ({})", e), None)
    })
}

impl ServerHandler for SshDispatchServer {
    /// Return server information
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(format!(
                "ssh-dispatch v{} - Dispatch commands to {}",
                env!("CARGO_PKG_VERSION"),
                self.config.target(),
            )),
        }
    }

    /// List available tools
    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> std::result::Result<ListToolsResult, McpError> {
        debug!("list_tools called");

        Ok(ListToolsResult {
            tools: vec![
                tools::exec_tool(),
                tools::shell_exec_tool(),
                tools::status_tool(),
            ],
            next_cursor: None,
            meta: Default::default(),
        })
    }

    /// Call a tool
    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> std::result::Result<CallToolResult, McpError> {
        let tool_name: &str = request.name.as_ref();
        debug!("call_tool called: {:?}", tool_name);

        let args = request.arguments.unwrap_or_default();
        self.run_tool(tool_name, args).await
    }
}
