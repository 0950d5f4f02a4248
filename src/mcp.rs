//! MCP (Model Context Protocol) JSON-RPC handler.
//!
//! [`McpHandler::handle`] turns one JSON-RPC 2.0 message into at most one
//! response. It is shared by the stdio loop ([`run_stdio`]) and the SSE
//! session workers in [`crate::http`].
//!
//! ## Supported methods
//!
//! | Method              | Description                      |
//! |---------------------|----------------------------------|
//! | `initialize`        | Handshake, returns capabilities  |
//! | `tools/list`        | List available tool definitions  |
//! | `tools/call`        | Execute a tool and return result |
//! | `ping`              | Liveness check                   |
//!
//! Notifications (`notifications/initialized`, `notifications/cancelled`) are
//! acknowledged silently. Tool failures are tool results with `isError`, never
//! JSON-RPC errors.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::tools::ToolRegistry;

pub const SERVER_NAME: &str = "ultimate-mcp";
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");
const PROTOCOL_VERSION: &str = "2024-11-05";

const PARSE_ERROR: i64 = -32700;
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;

/// Transport-agnostic JSON-RPC dispatcher.
#[derive(Clone)]
pub struct McpHandler {
    registry: Arc<ToolRegistry>,
}

impl McpHandler {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Handle one parsed message. Returns `None` for notifications.
    pub async fn handle(&self, request: Value) -> Option<Value> {
        let method = request.get("method").and_then(Value::as_str).unwrap_or("");

        // Notifications (no id) are acknowledged silently
        let Some(id) = request.get("id").cloned() else {
            match method {
                "notifications/initialized" | "notifications/cancelled" => {}
                _ => tracing::debug!(method, "ignoring notification"),
            }
            return None;
        };

        let response = match method {
            "initialize" => result(handle_initialize()),
            "tools/list" => result(self.handle_tools_list()),
            "tools/call" => self.handle_tools_call(&request).await,
            "ping" => result(json!({})),
            _ => error(METHOD_NOT_FOUND, format!("Method not found: {method}")),
        };
        Some(inject_id(response, id))
    }

    /// Handle one raw line. Unparseable input yields a `-32700` response
    /// with a null id.
    pub async fn handle_line(&self, line: &str) -> Option<Value> {
        match serde_json::from_str::<Value>(line) {
            Ok(request) => self.handle(request).await,
            Err(e) => Some(parse_error(format!("Parse error: {e}"))),
        }
    }

    fn handle_tools_list(&self) -> Value {
        let tools: Vec<Value> = self
            .registry
            .list_tools()
            .iter()
            .map(|t| t.to_json())
            .collect();
        json!({ "tools": tools })
    }

    async fn handle_tools_call(&self, request: &Value) -> Value {
        let params = request.get("params").cloned().unwrap_or(json!({}));
        let Some(name) = params.get("name").and_then(Value::as_str) else {
            return error(INVALID_PARAMS, "Invalid params: 'name' is required".to_string());
        };
        let args = params.get("arguments").cloned().unwrap_or(json!({}));

        let outcome = self.registry.call_tool(name, &args).await;
        result(outcome.to_mcp())
    }
}

/// `initialize` result: protocol version, capabilities and server info.
fn handle_initialize() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {
            "tools": { "listChanged": false }
        },
        "serverInfo": {
            "name": SERVER_NAME,
            "version": SERVER_VERSION
        }
    })
}

fn result(result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "result": result })
}

fn error(code: i64, message: String) -> Value {
    json!({
        "jsonrpc": "2.0",
        "error": { "code": code, "message": message }
    })
}

fn parse_error(message: String) -> Value {
    inject_id(error(PARSE_ERROR, message), Value::Null)
}

/// Inject the request `id` into a response object.
fn inject_id(mut response: Value, id: Value) -> Value {
    response["id"] = id;
    response
}

/// Run the MCP server on stdio, processing JSON-RPC requests until EOF.
pub async fn run_stdio(handler: McpHandler) {
    let reader = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    serve_lines(&handler, reader, &mut stdout).await;
}

/// Newline-delimited JSON-RPC loop over any reader/writer pair. Requests are
/// handled strictly one at a time.
pub async fn serve_lines<R, W>(handler: &McpHandler, mut reader: R, writer: &mut W)
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(e) => {
                tracing::error!(error = %e, "stdin read error");
                break;
            }
        }

        let response = match std::str::from_utf8(&buf) {
            Ok(line) if line.trim().is_empty() => continue,
            Ok(line) => handler.handle_line(line.trim()).await,
            Err(e) => {
                tracing::warn!(error = %e, "dropping line that is not UTF-8");
                Some(parse_error(format!("Parse error: {e}")))
            }
        };
        if let Some(response) = response {
            write_response(writer, &response).await;
        }
    }
    tracing::info!("stdin closed, shutting down");
}

/// Write a JSON-RPC response (one line, flushed immediately).
async fn write_response<W: AsyncWrite + Unpin>(writer: &mut W, response: &Value) {
    let mut output = serde_json::to_string(response).unwrap_or_default();
    output.push('\n');
    if let Err(e) = writer.write_all(output.as_bytes()).await {
        tracing::error!(error = %e, "stdout write error");
    }
    if let Err(e) = writer.flush().await {
        tracing::error!(error = %e, "stdout flush error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::tests::registry;

    fn handler() -> McpHandler {
        let (registry, _) = registry();
        McpHandler::new(Arc::new(registry))
    }

    #[tokio::test]
    async fn initialize_reports_protocol_and_server() {
        let resp = handler()
            .handle(json!({ "jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {} }))
            .await
            .unwrap();
        assert_eq!(resp["id"], 1);
        assert_eq!(resp["result"]["protocolVersion"], "2024-11-05");
        assert_eq!(resp["result"]["serverInfo"]["name"], "ultimate-mcp");
        assert!(resp["result"]["capabilities"]["tools"].is_object());
    }

    #[tokio::test]
    async fn tools_list_returns_catalog() {
        let resp = handler()
            .handle(json!({ "jsonrpc": "2.0", "id": "a", "method": "tools/list" }))
            .await
            .unwrap();
        let tools = resp["result"]["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 43);
        assert!(tools[0]["inputSchema"].is_object());
    }

    #[tokio::test]
    async fn tool_failure_is_a_result() {
        let resp = handler()
            .handle(json!({
                "jsonrpc": "2.0",
                "id": 7,
                "method": "tools/call",
                "params": {
                    "name": "ultimate_read_memory",
                    "arguments": { "address": "0400", "length": 300 }
                }
            }))
            .await
            .unwrap();
        assert!(resp.get("error").is_none());
        assert_eq!(resp["result"]["isError"], true);
        let text = resp["result"]["content"][0]["text"].as_str().unwrap();
        assert!(text.contains("validation_error"));
    }

    #[tokio::test]
    async fn missing_tool_name_is_invalid_params() {
        let resp = handler()
            .handle(json!({ "jsonrpc": "2.0", "id": 2, "method": "tools/call", "params": {} }))
            .await
            .unwrap();
        assert_eq!(resp["error"]["code"], -32602);
    }

    #[tokio::test]
    async fn unknown_method_and_notifications() {
        let h = handler();
        let resp = h
            .handle(json!({ "jsonrpc": "2.0", "id": 3, "method": "resources/list" }))
            .await
            .unwrap();
        assert_eq!(resp["error"]["code"], -32601);

        let none = h
            .handle(json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }))
            .await;
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn parse_error_has_null_id() {
        let resp = handler().handle_line("{not json").await.unwrap();
        assert_eq!(resp["error"]["code"], -32700);
        assert!(resp["id"].is_null());
    }

    #[tokio::test]
    async fn stdio_loop_over_in_memory_pipes() {
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#,
            "\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            "\n\n",
            "garbage\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"ultimate_get_connection"}}"#,
            "\n",
        );
        let mut output = Vec::new();
        serve_lines(&handler(), input.as_bytes(), &mut output).await;

        let lines: Vec<Value> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["id"], 1);
        assert_eq!(lines[0]["result"], json!({}));
        assert_eq!(lines[1]["error"]["code"], -32700);
        assert_eq!(lines[2]["id"], 2);
        let text = lines[2]["result"]["content"][0]["text"].as_str().unwrap();
        assert!(text.contains("c64.local"));
    }

    #[tokio::test]
    async fn invalid_utf8_line_does_not_end_the_session() {
        let mut input = b"\xff\xfe\n".to_vec();
        input.extend_from_slice(br#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#);
        input.push(b'\n');
        let mut output = Vec::new();
        serve_lines(&handler(), input.as_slice(), &mut output).await;

        let lines: Vec<Value> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["error"]["code"], -32700);
        assert!(lines[0]["id"].is_null());
        assert_eq!(lines[1]["id"], 1);
        assert_eq!(lines[1]["result"], json!({}));
    }
}
