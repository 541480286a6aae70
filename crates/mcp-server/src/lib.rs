//! MCP front end for the Gastown Mayor: a JSON-RPC tool surface over HTTP
//! with a single `mayor_task` tool backed by [`gastown_dispatch`].

use std::collections::HashMap;
use std::sync::Arc;

use gastown_dispatch::TaskDispatcher;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub mod auth;
pub mod config;
pub mod http_server;
pub mod protocol;
pub mod tools;

use crate::config::ServerConfig;
use crate::protocol::{McpError, McpTool, ToolDescriptor, INTERNAL_ERROR, INVALID_REQUEST};
use crate::tools::MayorTaskTool;

pub const SERVICE_NAME: &str = "gastown-mcp";

#[derive(Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn McpTool>>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new(tools: Vec<Arc<dyn McpTool>>) -> Self {
        let mut map = HashMap::new();
        let mut order = Vec::new();

        for tool in tools {
            let name = tool.name().to_string();
            if map.insert(name.clone(), tool).is_none() {
                order.push(name);
            }
        }

        Self { tools: map, order }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn McpTool>> {
        self.tools.get(name).cloned()
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.descriptor())
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub version: String,
    pub protocol_version: String,
}

impl From<&ServerConfig> for ServerInfo {
    fn from(config: &ServerConfig) -> Self {
        Self {
            version: config.server_version.clone(),
            protocol_version: config.protocol_version.clone(),
        }
    }
}

pub struct McpServer {
    registry: ToolRegistry,
    info: ServerInfo,
}

impl McpServer {
    pub fn new(registry: ToolRegistry, info: ServerInfo) -> Self {
        Self { registry, info }
    }

    /// Server exposing `mayor_task` over the given dispatcher.
    pub fn for_dispatcher(dispatcher: Arc<TaskDispatcher>, info: ServerInfo) -> Self {
        let tools: Vec<Arc<dyn McpTool>> = vec![Arc::new(MayorTaskTool::new(dispatcher))];
        Self::new(ToolRegistry::new(tools), info)
    }

    /// Handle one JSON-RPC message. Notifications produce no response.
    pub async fn handle_jsonrpc(&self, request: Value) -> Option<Value> {
        let method = request
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or_default();

        if method.starts_with("notifications/") {
            tracing::debug!("ignoring notification '{method}'");
            return None;
        }

        let request_struct: JsonRpcRequest = match serde_json::from_value(request.clone()) {
            Ok(parsed) => parsed,
            Err(err) => {
                let id = request.get("id").cloned().unwrap_or(Value::Null);
                return Some(encode(rpc_error_response(
                    id,
                    McpError::InvalidRequest(format!("Invalid request: {err}")),
                )));
            }
        };

        tracing::info!(
            "MCP request: method={}, id={}",
            request_struct.method,
            request_struct.id.as_ref().unwrap_or(&serde_json::Value::Null)
        );

        let response = self.handle_request(request_struct).await;
        Some(encode(response))
    }

    async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let JsonRpcRequest {
            jsonrpc,
            id,
            method,
            params,
        } = request;
        let id = id.unwrap_or(Value::Null);

        if jsonrpc != "2.0" {
            return JsonRpcResponse {
                jsonrpc: "2.0",
                id,
                result: None,
                error: Some(JsonRpcError {
                    code: INVALID_REQUEST,
                    message: format!("Unsupported JSON-RPC version: {jsonrpc}"),
                }),
            };
        }

        match method.as_str() {
            "initialize" => self.respond_initialize(id),
            "tools/list" => self.respond_with_tools(id),
            "tools/call" => self.handle_tools_call(id, params).await,
            _ => rpc_error_response(id, McpError::MethodNotFound(method)),
        }
    }

    fn respond_initialize(&self, id: Value) -> JsonRpcResponse {
        JsonRpcResponse::result(
            id,
            json!({
                "protocolVersion": self.info.protocol_version,
                "serverInfo": {
                    "name": SERVICE_NAME,
                    "version": self.info.version,
                },
                "capabilities": {
                    "tools": {}
                }
            }),
        )
    }

    fn respond_with_tools(&self, id: Value) -> JsonRpcResponse {
        let tools = self.registry.descriptors();
        JsonRpcResponse::result(id, json!({ "tools": tools }))
    }

    async fn handle_tools_call(&self, id: Value, params: Option<Value>) -> JsonRpcResponse {
        let params = match params {
            Some(Value::Object(map)) => map,
            _ => {
                return rpc_error_response(
                    id,
                    McpError::InvalidParams("Missing params object for tools/call".into()),
                );
            }
        };

        let Some(name) = params.get("name").and_then(Value::as_str) else {
            return rpc_error_response(
                id,
                McpError::InvalidParams("Missing 'name' in params".into()),
            );
        };

        let Some(tool) = self.registry.get(name) else {
            return rpc_error_response(id, McpError::ToolNotFound(name.to_string()));
        };

        let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);
        match tool.execute(arguments).await {
            Ok(result) => JsonRpcResponse::result(id, result),
            Err(err) => {
                tracing::warn!("tool '{name}' rejected call: {err}");
                rpc_error_response(id, err)
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    #[serde(default)]
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Option<Value>,
}

#[derive(Debug, Serialize)]
struct JsonRpcResponse {
    jsonrpc: &'static str,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    fn result(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

fn rpc_error_response(id: Value, error: McpError) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: "2.0",
        id,
        result: None,
        error: Some(JsonRpcError {
            code: error.code(),
            message: error.message(),
        }),
    }
}

/// JSON-RPC error envelope with a null id, for failures before a request is parsed.
pub fn error_envelope(code: i32, message: impl Into<String>) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": Value::Null,
        "error": { "code": code, "message": message.into() }
    })
}

fn encode(response: JsonRpcResponse) -> Value {
    serde_json::to_value(&response).unwrap_or_else(|err| {
        tracing::error!("failed to encode JSON-RPC response: {err}");
        error_envelope(INTERNAL_ERROR, "Internal error")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::protocol::McpResult;

    struct Echo;

    #[async_trait]
    impl McpTool for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "echoes its arguments"
        }

        async fn execute(&self, params: Value) -> McpResult<Value> {
            if params.is_null() {
                return Err(McpError::InvalidParams("nothing to echo".into()));
            }
            Ok(params)
        }

        fn input_schema(&self) -> Value {
            json!({ "type": "object" })
        }
    }

    fn server() -> McpServer {
        McpServer::new(
            ToolRegistry::new(vec![Arc::new(Echo), Arc::new(Echo)]),
            ServerInfo {
                version: "9.9.9".to_string(),
                protocol_version: "2024-11-05".to_string(),
            },
        )
    }

    #[tokio::test]
    async fn initialize_reports_server_info() {
        let response = server()
            .handle_jsonrpc(json!({"jsonrpc": "2.0", "id": 1, "method": "initialize"}))
            .await
            .expect("response");
        assert_eq!(response["id"], 1);
        assert_eq!(response["result"]["protocolVersion"], "2024-11-05");
        assert_eq!(response["result"]["serverInfo"]["name"], "gastown-mcp");
        assert_eq!(response["result"]["serverInfo"]["version"], "9.9.9");
        assert!(response["result"]["capabilities"]["tools"].is_object());
    }

    #[tokio::test]
    async fn duplicate_tools_are_listed_once() {
        let response = server()
            .handle_jsonrpc(json!({"jsonrpc": "2.0", "id": "a", "method": "tools/list"}))
            .await
            .expect("response");
        let tools = response["result"]["tools"].as_array().expect("tools");
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["name"], "echo");
        assert!(tools[0]["inputSchema"].is_object());
    }

    #[tokio::test]
    async fn tools_call_routes_to_tool() {
        let response = server()
            .handle_jsonrpc(json!({
                "jsonrpc": "2.0",
                "id": 7,
                "method": "tools/call",
                "params": {"name": "echo", "arguments": {"x": 1}}
            }))
            .await
            .expect("response");
        assert_eq!(response["result"]["x"], 1);
        assert!(response.get("error").is_none());
    }

    #[tokio::test]
    async fn error_codes() {
        let server = server();

        let unknown_tool = server
            .handle_jsonrpc(json!({
                "jsonrpc": "2.0", "id": 1, "method": "tools/call",
                "params": {"name": "nope"}
            }))
            .await
            .expect("response");
        assert_eq!(unknown_tool["error"]["code"], -32601);
        assert_eq!(unknown_tool["error"]["message"], "Unknown tool: nope");

        let bad_args = server
            .handle_jsonrpc(json!({
                "jsonrpc": "2.0", "id": 2, "method": "tools/call",
                "params": {"name": "echo"}
            }))
            .await
            .expect("response");
        assert_eq!(bad_args["error"]["code"], -32602);

        let unknown_method = server
            .handle_jsonrpc(json!({"jsonrpc": "2.0", "id": 3, "method": "resources/list"}))
            .await
            .expect("response");
        assert_eq!(unknown_method["error"]["code"], -32601);
        assert_eq!(
            unknown_method["error"]["message"],
            "Method not found: resources/list"
        );

        let old_version = server
            .handle_jsonrpc(json!({"jsonrpc": "1.0", "id": 4, "method": "tools/list"}))
            .await
            .expect("response");
        assert_eq!(old_version["error"]["code"], -32600);

        let no_method = server
            .handle_jsonrpc(json!({"jsonrpc": "2.0", "id": 5}))
            .await
            .expect("response");
        assert_eq!(no_method["error"]["code"], -32600);
        assert_eq!(no_method["id"], 5);
    }

    #[tokio::test]
    async fn notifications_have_no_response() {
        let response = server()
            .handle_jsonrpc(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
            .await;
        assert!(response.is_none());
    }
}
