//! Tool registry and dispatcher.
//!
//! Every tool is a [`ToolDefinition`]: a name, a description, a JSON input
//! schema and a [`Route`]. Most tools are plain [`DeviceRoute`]s (verb, path
//! template, query mapping); the few that need local logic carry a
//! [`Handler`]. The catalog itself lives in [`catalog`].
//!
//! [`ToolRegistry::call_tool`] is the one transport-agnostic entry point used
//! by both the stdio and the HTTP/SSE adapters:
//!
//! 1. unknown name → `unknown_tool`
//! 2. schema + tool-specific checks, all violations reported together
//! 3. route to the device (or local handler)
//! 4. fold any [`Error`] into a [`ToolResult`] with `is_error = true`
//!
//! Device failures never escape as transport faults.

pub mod args;
pub mod catalog;
mod handlers;
pub mod upload;

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use reqwest::Method;
use serde_json::{json, Value};

use crate::client::{Device, DeviceRequest};
use crate::connection::ConnectionState;
use crate::error::{Error, Result};
use crate::schema;
use args::{scalar_to_string, Args};

/// Local logic for composite tools.
pub type Handler = for<'a> fn(&'a ToolContext, &'a Args) -> BoxFuture<'a, Result<Value>>;

/// Tool-specific validation run alongside the schema, before any I/O.
pub type Check = fn(&Args) -> Vec<String>;

/// How a tool argument becomes a query parameter.
#[derive(Debug, Clone)]
pub enum QueryParam {
    /// `key=<args[arg]>`, omitted when the argument is absent.
    Arg { key: &'static str, arg: &'static str },
    /// Always `key=value`.
    Fixed {
        key: &'static str,
        value: &'static str,
    },
}

/// A 1:1 mapping of arguments to one device endpoint.
#[derive(Debug, Clone)]
pub struct DeviceRoute {
    pub method: Method,
    /// Path below `/v1`; `{name}` placeholders are filled from arguments.
    pub path: &'static str,
    pub query: Vec<QueryParam>,
}

impl DeviceRoute {
    fn request(&self, args: &Args) -> Result<DeviceRequest> {
        let mut request = DeviceRequest::new(self.method.clone(), render_path(self.path, args)?);
        for param in &self.query {
            match param {
                QueryParam::Arg { key, arg } => {
                    if let Some(value) = args.get(*arg).and_then(scalar_to_string) {
                        request = request.query(*key, value);
                    }
                }
                QueryParam::Fixed { key, value } => request = request.query(*key, *value),
            }
        }
        Ok(request)
    }
}

pub enum Route {
    Device(DeviceRoute),
    Handler(Handler),
}

/// One entry of the tool catalog.
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
    pub route: Route,
    pub check: Option<Check>,
}

impl ToolDefinition {
    pub fn new(
        name: &'static str,
        description: &'static str,
        input_schema: Value,
        route: Route,
    ) -> Self {
        Self {
            name,
            description,
            input_schema,
            route,
            check: None,
        }
    }

    #[must_use]
    pub fn with_check(mut self, check: Check) -> Self {
        self.check = Some(check);
        self
    }

    /// MCP `tools/list` entry.
    pub fn to_json(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "inputSchema": self.input_schema,
        })
    }
}

/// What handlers get to work with.
#[derive(Clone)]
pub struct ToolContext {
    pub device: Arc<dyn Device>,
    pub connection: Arc<ConnectionState>,
}

/// Result of a tool call, ready to be serialized by a transport.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    /// Device/handler payload on success, `{"error": {...}}` on failure.
    pub value: Value,
    /// Maps to `isError` in the MCP response.
    pub is_error: bool,
}

impl ToolResult {
    fn success(value: Value) -> Self {
        Self {
            value,
            is_error: false,
        }
    }

    fn failure(error: &Error) -> Self {
        Self {
            value: error.to_json(),
            is_error: true,
        }
    }

    /// `kind` of the error, if this result is one.
    pub fn error_kind(&self) -> Option<&str> {
        if !self.is_error {
            return None;
        }
        self.value["error"]["kind"].as_str()
    }

    /// MCP `tools/call` result: one text content block with pretty JSON.
    pub fn to_mcp(&self) -> Value {
        let text = serde_json::to_string_pretty(&self.value).unwrap_or_default();
        let mut result = json!({
            "content": [{ "type": "text", "text": text }]
        });
        if self.is_error {
            result["isError"] = json!(true);
        }
        result
    }
}

/// The catalog plus the dispatcher.
pub struct ToolRegistry {
    tools: Vec<ToolDefinition>,
    index: HashMap<&'static str, usize>,
    ctx: ToolContext,
}

impl ToolRegistry {
    /// Registry with the built-in Ultimate tool catalog.
    pub fn builtin(device: Arc<dyn Device>, connection: Arc<ConnectionState>) -> Result<Self> {
        Self::with_tools(catalog::builtin_tools(), ToolContext { device, connection })
    }

    /// Build a registry, rejecting duplicate names and device routes whose
    /// path placeholders are not required arguments.
    pub fn with_tools(tools: Vec<ToolDefinition>, ctx: ToolContext) -> Result<Self> {
        let mut index = HashMap::with_capacity(tools.len());
        for (i, tool) in tools.iter().enumerate() {
            if index.insert(tool.name, i).is_some() {
                return Err(Error::Registry(format!("duplicate tool name '{}'", tool.name)));
            }
            if let Route::Device(route) = &tool.route {
                let required = tool.input_schema["required"].as_array();
                for placeholder in placeholders(route.path) {
                    let listed = required
                        .is_some_and(|r| r.iter().any(|v| v.as_str() == Some(placeholder)));
                    if !listed {
                        return Err(Error::Registry(format!(
                            "tool '{}' uses path argument '{placeholder}' that is not required",
                            tool.name
                        )));
                    }
                }
            }
        }
        Ok(Self { tools, index, ctx })
    }

    /// All definitions in registration order.
    pub fn list_tools(&self) -> &[ToolDefinition] {
        &self.tools
    }

    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.index.get(name).map(|&i| &self.tools[i])
    }

    pub fn context(&self) -> &ToolContext {
        &self.ctx
    }

    /// Validate, dispatch and normalize one tool call.
    pub async fn call_tool(&self, name: &str, arguments: &Value) -> ToolResult {
        tracing::info!(tool = name, "tool call");
        match self.dispatch(name, arguments).await {
            Ok(value) => ToolResult::success(value),
            Err(e) => {
                tracing::warn!(tool = name, kind = e.kind(), error = %e, "tool call failed");
                ToolResult::failure(&e)
            }
        }
    }

    async fn dispatch(&self, name: &str, arguments: &Value) -> Result<Value> {
        let tool = self
            .get(name)
            .ok_or_else(|| Error::UnknownTool(name.to_string()))?;

        let args = schema::to_object(arguments).map_err(Error::invalid)?;
        let mut violations = schema::validate(&tool.input_schema, &args);
        if let Some(check) = tool.check {
            violations.extend(check(&args));
        }
        if !violations.is_empty() {
            return Err(Error::Validation(violations));
        }

        match &tool.route {
            Route::Device(route) => {
                let request = route.request(&args)?;
                let response = self.ctx.device.send(request).await?;
                Ok(response.into_value())
            }
            Route::Handler(handler) => handler(&self.ctx, &args).await,
        }
    }
}

/// Names of `{placeholder}`s in a path template.
fn placeholders(template: &str) -> Vec<&str> {
    let mut names = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        let Some(len) = rest[start..].find('}') else {
            break;
        };
        names.push(&rest[start + 1..start + len]);
        rest = &rest[start + len + 1..];
    }
    names
}

/// Substitute `{name}` placeholders with argument values.
fn render_path(template: &str, args: &Args) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        let len = rest[start..]
            .find('}')
            .ok_or_else(|| Error::Registry(format!("unterminated placeholder in '{template}'")))?;
        let key = &rest[start + 1..start + len];
        let value = args
            .get(key)
            .and_then(scalar_to_string)
            .ok_or_else(|| Error::invalid(format!("{key}: is required")))?;
        out.push_str(&rest[..start]);
        out.push_str(&value);
        rest = &rest[start + len + 1..];
    }
    out.push_str(rest);
    Ok(out)
}
