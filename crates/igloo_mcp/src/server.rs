//! MCP Server Implementation
//!
//! JSON-RPC 2.0 server over stdio for the Model Context Protocol.
//!
//! # Architecture
//!
//! The server runs in a single process, reading JSON-RPC requests from
//! stdin and writing responses to stdout. Stderr carries logs; stdout
//! stays clean for protocol frames. A query that outlives its inline
//! budget returns an execution_id immediately and is polled via
//! `fetch_async_query_result`, so the loop never blocks on the
//! warehouse for long.

use crate::protocol::{
    methods, ContentBlock, InitializeParams, InitializeResult, JsonRpcError, JsonRpcRequest,
    JsonRpcResponse, ServerCapabilities, ServerInfo, ToolCallParams, ToolCallResult,
    ToolsCapability, ToolsListResult, JSONRPC_VERSION, MCP_PROTOCOL_VERSION,
};
use crate::state::AppState;
use crate::tools::ToolRegistry;
use anyhow::{Context, Result};
use serde_json::Value;
use std::io::{BufRead, Write};
use tracing::{debug, error, info, warn};

/// MCP Server configuration
#[derive(Debug, Clone)]
pub struct McpServerConfig {
    /// Server name (reported in initialize)
    pub server_name: String,

    /// Server version (reported in initialize)
    pub server_version: String,

    /// Maximum response size in bytes
    pub max_response_bytes: usize,
}

impl Default for McpServerConfig {
    fn default() -> Self {
        Self {
            server_name: "igloo-mcp".to_string(),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
            max_response_bytes: 1024 * 1024, // 1MB
        }
    }
}

/// MCP Server
pub struct McpServer {
    config: McpServerConfig,
    state: AppState,
    tools: ToolRegistry,
    initialized: bool,
}

impl McpServer {
    /// Create a new MCP server over pre-wired application state.
    pub fn new(config: McpServerConfig, state: AppState) -> Self {
        Self {
            config,
            state,
            tools: ToolRegistry::new(),
            initialized: false,
        }
    }

    /// Run the server (blocking, reads from stdin, writes to stdout).
    pub fn run(&mut self) -> Result<()> {
        let stdin = std::io::stdin();
        let stdout = std::io::stdout();
        let mut stdout = stdout.lock();

        info!("MCP server starting");
        for warning in &self.state.config.warnings {
            warn!("Config: {}", warning);
        }

        for line in stdin.lock().lines() {
            let line = line.context("Failed to read from stdin")?;

            if line.trim().is_empty() {
                continue;
            }

            debug!("Received: {}", line);

            let request: JsonRpcRequest = match serde_json::from_str(&line) {
                Ok(req) => req,
                Err(e) => {
                    let response = JsonRpcResponse::error(
                        None,
                        JsonRpcError::new(
                            crate::protocol::ErrorCode::ParseError,
                            format!("Invalid JSON: {}", e),
                        ),
                    );
                    self.write_response(&mut stdout, &response)?;
                    continue;
                }
            };

            let response = self.handle_request(request);

            // Skip response for notifications.
            if response.id.is_none() && response.result.is_none() && response.error.is_none() {
                continue;
            }

            self.write_response(&mut stdout, &response)?;
        }

        info!("MCP server shutting down");
        Ok(())
    }

    /// Handle a single JSON-RPC request.
    pub fn handle_request(&mut self, request: JsonRpcRequest) -> JsonRpcResponse {
        if request.jsonrpc != JSONRPC_VERSION {
            return JsonRpcResponse::error(
                request.id,
                JsonRpcError::new(
                    crate::protocol::ErrorCode::InvalidRequest,
                    format!("Invalid JSON-RPC version: {}", request.jsonrpc),
                ),
            );
        }

        match request.method.as_str() {
            methods::INITIALIZE => self.handle_initialize(request),
            methods::INITIALIZED => {
                if request.id.is_none() {
                    // Notification: no response frame.
                    return JsonRpcResponse {
                        jsonrpc: JSONRPC_VERSION.to_string(),
                        id: None,
                        result: None,
                        error: None,
                    };
                }
                JsonRpcResponse::success(request.id, Value::Null)
            }
            methods::TOOLS_LIST => self.handle_tools_list(request),
            methods::TOOLS_CALL => self.handle_tools_call(request),
            methods::PING => {
                JsonRpcResponse::success(request.id, Value::Object(Default::default()))
            }
            _ => JsonRpcResponse::error(
                request.id,
                JsonRpcError::new(
                    crate::protocol::ErrorCode::MethodNotFound,
                    format!("Unknown method: {}", request.method),
                ),
            ),
        }
    }

    fn handle_initialize(&mut self, request: JsonRpcRequest) -> JsonRpcResponse {
        let params: InitializeParams = match request.params {
            Some(p) => match serde_json::from_value(p) {
                Ok(params) => params,
                Err(e) => {
                    return JsonRpcResponse::error(
                        request.id,
                        JsonRpcError::new(
                            crate::protocol::ErrorCode::InvalidParams,
                            format!("Invalid initialize params: {}", e),
                        ),
                    );
                }
            },
            None => {
                return JsonRpcResponse::error(
                    request.id,
                    JsonRpcError::new(
                        crate::protocol::ErrorCode::InvalidParams,
                        "Missing initialize params",
                    ),
                );
            }
        };

        info!(
            "Initialize from {} v{} (protocol {})",
            params.client_info.name, params.client_info.version, params.protocol_version
        );

        self.initialized = true;

        let result = InitializeResult {
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: false,
                }),
            },
            server_info: ServerInfo {
                name: self.config.server_name.clone(),
                version: self.config.server_version.clone(),
            },
        };

        match serde_json::to_value(result) {
            Ok(value) => JsonRpcResponse::success(request.id, value),
            Err(e) => JsonRpcResponse::error(
                request.id,
                JsonRpcError::new(
                    crate::protocol::ErrorCode::InternalError,
                    format!("Failed to serialize initialize result: {}", e),
                ),
            ),
        }
    }

    fn handle_tools_list(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let result = ToolsListResult {
            tools: self.tools.list_tools(),
        };
        match serde_json::to_value(result) {
            Ok(value) => JsonRpcResponse::success(request.id, value),
            Err(e) => JsonRpcResponse::error(
                request.id,
                JsonRpcError::new(
                    crate::protocol::ErrorCode::InternalError,
                    format!("Failed to serialize tools list: {}", e),
                ),
            ),
        }
    }

    fn handle_tools_call(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        if !self.initialized {
            return JsonRpcResponse::error(
                request.id,
                JsonRpcError::new(
                    crate::protocol::ErrorCode::ServerError(-32002),
                    "Server not initialized",
                ),
            );
        }

        let params: ToolCallParams = match request.params {
            Some(p) => match serde_json::from_value(p) {
                Ok(params) => params,
                Err(e) => {
                    return JsonRpcResponse::error(
                        request.id,
                        JsonRpcError::new(
                            crate::protocol::ErrorCode::InvalidParams,
                            format!("Invalid tool call params: {}", e),
                        ),
                    );
                }
            },
            None => {
                return JsonRpcResponse::error(
                    request.id,
                    JsonRpcError::new(
                        crate::protocol::ErrorCode::InvalidParams,
                        "Missing tool call params",
                    ),
                );
            }
        };

        info!("Tool call: {}", params.name);

        let Some(envelope) = self
            .tools
            .call_tool(&params.name, &params.arguments, &self.state)
        else {
            return JsonRpcResponse::error(
                request.id,
                JsonRpcError::new(
                    crate::protocol::ErrorCode::InvalidParams,
                    format!("Unknown tool: {}", params.name),
                ),
            );
        };

        let is_error = envelope
            .get("status")
            .and_then(|s| s.as_str())
            .map(|s| s == "error")
            .unwrap_or(false);

        let json = match serde_json::to_string(&envelope) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize tool result: {}", e);
                return JsonRpcResponse::error(
                    request.id,
                    JsonRpcError::new(
                        crate::protocol::ErrorCode::InternalError,
                        "Failed to serialize tool response",
                    ),
                );
            }
        };

        // Over-budget responses become a structured truncation notice
        // instead of a broken JSON frame.
        let (content, was_truncated) = if json.len() > self.config.max_response_bytes {
            warn!(
                "Response truncated from {} to {} bytes",
                json.len(),
                self.config.max_response_bytes
            );
            let truncated = serde_json::json!({
                "truncated": true,
                "max_bytes": self.config.max_response_bytes,
                "original_bytes": json.len(),
                "message": "Response exceeded size limit. Use pagination or filters to reduce output.",
            });
            (
                serde_json::to_string(&truncated).unwrap_or_else(|_| {
                    r#"{"truncated":true,"error":"Failed to create truncation response"}"#
                        .to_string()
                }),
                true,
            )
        } else {
            (json, false)
        };

        let tool_result = ToolCallResult {
            content: vec![ContentBlock::text(content)],
            is_error: is_error || was_truncated,
        };

        match serde_json::to_value(tool_result) {
            Ok(value) => JsonRpcResponse::success(request.id, value),
            Err(e) => {
                error!("Failed to serialize tool response: {}", e);
                JsonRpcResponse::error(
                    request.id,
                    JsonRpcError::new(
                        crate::protocol::ErrorCode::InternalError,
                        "Failed to serialize tool response",
                    ),
                )
            }
        }
    }

    /// Write a response to stdout
    fn write_response<W: Write>(&self, writer: &mut W, response: &JsonRpcResponse) -> Result<()> {
        let json = serde_json::to_string(response)?;
        debug!("Sending: {}", json);
        writeln!(writer, "{}", json)?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offline::UnconfiguredWarehouse;
    use crate::protocol::RequestId;
    use crate::state::test_state;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn server(temp: &TempDir) -> McpServer {
        McpServer::new(
            McpServerConfig::default(),
            test_state(temp.path(), Arc::new(UnconfiguredWarehouse)),
        )
    }

    fn request(id: i64, method: &str, params: Value) -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(RequestId::Number(id)),
            method: method.to_string(),
            params: Some(params),
        }
    }

    fn initialize(server: &mut McpServer) {
        let response = server.handle_request(request(
            1,
            methods::INITIALIZE,
            json!({
                "protocolVersion": MCP_PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": { "name": "test", "version": "0" }
            }),
        ));
        assert!(response.error.is_none());
    }

    fn tool_envelope(response: &JsonRpcResponse) -> Value {
        let result = response.result.as_ref().unwrap();
        let text = result["content"][0]["text"].as_str().unwrap();
        serde_json::from_str(text).unwrap()
    }

    #[test]
    fn test_config_default() {
        let config = McpServerConfig::default();
        assert_eq!(config.server_name, "igloo-mcp");
        assert_eq!(config.max_response_bytes, 1024 * 1024);
    }

    #[test]
    fn test_tools_call_requires_initialize() {
        let temp = TempDir::new().unwrap();
        let mut server = server(&temp);

        let response = server.handle_request(request(
            1,
            methods::TOOLS_CALL,
            json!({ "name": "health_check", "arguments": {} }),
        ));
        assert_eq!(response.error.unwrap().code, -32002);
    }

    #[test]
    fn test_tools_list_after_initialize() {
        let temp = TempDir::new().unwrap();
        let mut server = server(&temp);
        initialize(&mut server);

        let response = server.handle_request(request(2, methods::TOOLS_LIST, json!({})));
        let tools = response.result.unwrap();
        let names: Vec<&str> = tools["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert!(names.contains(&"execute_query"));
        assert!(names.contains(&"evolve_report"));
        assert!(names.contains(&"health_check"));
    }

    #[test]
    fn test_end_to_end_report_flow_over_jsonrpc() {
        let temp = TempDir::new().unwrap();
        let mut server = server(&temp);
        initialize(&mut server);

        let response = server.handle_request(request(
            2,
            methods::TOOLS_CALL,
            json!({
                "name": "create_report",
                "arguments": { "title": "T" }
            }),
        ));
        let created = tool_envelope(&response);
        assert_eq!(created["status"], "success");
        assert_eq!(created["outline_version"], 1);
        let report_id = created["report_id"].as_str().unwrap().to_string();
        assert!(created["request_id"].is_string());
        assert!(created["timing"]["total_duration_ms"].is_number());

        let response = server.handle_request(request(
            3,
            methods::TOOLS_CALL,
            json!({
                "name": "evolve_report",
                "arguments": {
                    "report_selector": report_id,
                    "instruction": "add a section",
                    "proposed_changes": { "sections_to_add": [{ "title": "S1" }] },
                    "response_detail": "minimal"
                }
            }),
        ));
        let evolved = tool_envelope(&response);
        assert_eq!(evolved["status"], "success");
        assert_eq!(evolved["outline_version"], 2);
        assert_eq!(evolved["summary"]["sections_added"], 1);
    }

    #[test]
    fn test_validation_failed_is_not_a_jsonrpc_fault() {
        let temp = TempDir::new().unwrap();
        let mut server = server(&temp);
        initialize(&mut server);

        server.handle_request(request(
            2,
            methods::TOOLS_CALL,
            json!({ "name": "create_report", "arguments": { "title": "T" } }),
        ));
        let response = server.handle_request(request(
            3,
            methods::TOOLS_CALL,
            json!({
                "name": "evolve_report",
                "arguments": {
                    "report_selector": "T",
                    "instruction": "bad",
                    "proposed_changes": {
                        "insights_to_modify": [{ "insight_id": "missing", "summary": "x" }]
                    }
                }
            }),
        ));
        // The JSON-RPC layer reports success; the envelope carries the failure.
        assert!(response.error.is_none());
        let envelope = tool_envelope(&response);
        assert_eq!(envelope["status"], "validation_failed");
        assert!(envelope["errors"][0]["field_path"]
            .as_str()
            .unwrap()
            .contains("insight_id"));
    }

    #[test]
    fn test_unknown_tool_is_a_fault() {
        let temp = TempDir::new().unwrap();
        let mut server = server(&temp);
        initialize(&mut server);

        let response = server.handle_request(request(
            2,
            methods::TOOLS_CALL,
            json!({ "name": "nope", "arguments": {} }),
        ));
        assert_eq!(response.error.unwrap().code, -32602);
    }

    #[test]
    fn test_ping() {
        let temp = TempDir::new().unwrap();
        let mut server = server(&temp);
        let response = server.handle_request(request(1, methods::PING, json!({})));
        assert!(response.result.is_some());
    }
}
