//! Error taxonomy shared by the device client, the tool registry and both
//! transports.
//!
//! Every variant maps to a stable machine-readable [`Error::kind`] so the
//! calling agent can branch on it. None of these errors terminate a session:
//! the dispatcher turns them into ordinary tool results with `isError: true`.

use serde_json::{json, Value};

/// Errors produced while handling a single tool call or upload.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Arguments failed local validation. Holds every violated constraint.
    #[error("Invalid arguments: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// Device unreachable, DNS failure, or timeout.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// No device has been configured yet.
    #[error("No C64 host configured. Use 'ultimate_set_connection' tool to set connection.")]
    NotConfigured,

    /// The device answered with a non-2xx status.
    #[error("Device error (HTTP {status}): {message}")]
    Device { status: u16, message: String },

    /// Local encoding/decoding failure (bad base64, length mismatch, ...).
    #[error("Payload error: {0}")]
    Payload(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// Tool catalog inconsistency detected at startup.
    #[error("Tool registry error: {0}")]
    Registry(String),
}

impl Error {
    /// Shorthand for a validation error with a single violation.
    pub fn invalid(message: impl Into<String>) -> Self {
        Error::Validation(vec![message.into()])
    }

    /// Machine-readable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation_error",
            Error::Connection(_) | Error::NotConfigured => "connection_error",
            Error::Device { .. } => "device_error",
            Error::Payload(_) => "payload_error",
            Error::UnknownTool(_) => "unknown_tool",
            Error::Registry(_) => "registry_error",
        }
    }

    /// Structured form delivered to MCP clients and HTTP callers.
    pub fn to_json(&self) -> Value {
        let mut error = json!({
            "kind": self.kind(),
            "message": self.to_string(),
        });
        match self {
            Error::Validation(violations) => error["details"] = json!(violations),
            Error::Device { status, message } => {
                error["details"] = json!({ "status": status, "device_message": message });
            }
            _ => {}
        }
        json!({ "error": error })
    }

    /// Map a reqwest transport failure to a connection error.
    pub(crate) fn from_transport(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::Connection(format!("request timed out: {err}"))
        } else {
            Error::Connection(err.to_string())
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
