#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::unused_async)]
#![allow(clippy::redundant_closure_for_method_calls)]

//! ultimate-mcp: MCP bridge for the Commodore 64 Ultimate REST API.
//!
//! ```text
//! config.rs      - CLI / environment resolution
//! connection.rs  - the shared, replaceable device target
//! client.rs      - Device trait + reqwest client for /v1
//! schema.rs      - JSON schema subset used to validate tool arguments
//! tools/         - tool catalog, dispatcher, composite handlers, uploads
//! mcp.rs         - JSON-RPC handler and the stdio loop
//! http/          - axum server: SSE sessions, /upload-prg, /health
//! ```

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod http;
pub mod mcp;
pub mod schema;
pub mod tools;

pub use client::{Device, HttpDevice, Timeouts};
pub use connection::{Connection, ConnectionState};
pub use error::{Error, Result};
pub use mcp::McpHandler;
pub use tools::ToolRegistry;
