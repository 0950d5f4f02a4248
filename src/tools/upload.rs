//! Program (PRG) uploads.
//!
//! A program can come from exactly one of three places:
//!
//! - `file_path` - a file readable by the bridge process (MCP only; the HTTP
//!   upload endpoint never reads local files on behalf of a remote caller)
//! - `prg_data_base64` / `base64` - the bytes, base64 encoded
//! - `url` - fetched by the bridge with a nested HTTP request
//!
//! The bytes are then posted to `runners:run_prg` (or `runners:load_prg`
//! when `run` is false) as an `application/octet-stream` body.

use std::path::PathBuf;

use base64::Engine as _;
use serde_json::{json, Value};

use crate::client::{Device, DeviceRequest};
use crate::error::{Error, Result};
use crate::tools::args::{non_empty_str, Args};

const BASE64_KEYS: [&str; 2] = ["prg_data_base64", "base64"];

/// Where a program's bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgramSource {
    File(PathBuf),
    Base64(String),
    Url(String),
}

impl ProgramSource {
    /// Select the single source named in `args`. Blank strings count as
    /// absent. Zero or several sources are validation errors.
    pub fn from_args(args: &Args, allow_local_files: bool) -> Result<Self, Vec<String>> {
        let mut found = Vec::new();
        let mut violations = Vec::new();

        if let Some(path) = non_empty_str(args, "file_path") {
            if allow_local_files {
                found.push(("file_path", ProgramSource::File(PathBuf::from(path))));
            } else {
                violations.push("file_path: not accepted here, send the bytes instead".to_string());
            }
        }
        for key in BASE64_KEYS {
            if let Some(data) = non_empty_str(args, key) {
                found.push((key, ProgramSource::Base64(data.to_string())));
            }
        }
        if let Some(url) = non_empty_str(args, "url") {
            found.push(("url", ProgramSource::Url(url.to_string())));
        }

        match found.len() {
            _ if !violations.is_empty() => Err(violations),
            0 => {
                let keys = if allow_local_files {
                    "'file_path', 'prg_data_base64' or 'url'"
                } else {
                    "'base64' or 'url'"
                };
                Err(vec![format!("exactly one of {keys} must be provided")])
            }
            1 => Ok(found.remove(0).1),
            _ => {
                let names: Vec<&str> = found.iter().map(|(k, _)| *k).collect();
                Err(vec![format!(
                    "only one program source may be provided, got {}",
                    names.join(" and ")
                )])
            }
        }
    }
}

/// Program bytes plus a description of where they came from. Only built
/// through [`Program::new`], so the bytes always hold a load address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    bytes: Vec<u8>,
    origin: String,
}

impl Program {
    /// Wrap raw bytes, checking the declared length and the 2-byte load
    /// address header.
    pub fn new(
        bytes: Vec<u8>,
        origin: impl Into<String>,
        declared_len: Option<u64>,
    ) -> Result<Self> {
        if let Some(expected) = declared_len {
            if bytes.len() as u64 != expected {
                return Err(Error::Payload(format!(
                    "declared length {expected} does not match decoded size {}",
                    bytes.len()
                )));
            }
        }
        if bytes.is_empty() {
            return Err(Error::Payload("program data is empty".into()));
        }
        if bytes.len() < 2 {
            return Err(Error::Payload(
                "program is too small (must be at least 2 bytes for the load address)".into(),
            ));
        }
        let origin = format!("{} ({} bytes)", origin.into(), bytes.len());
        Ok(Self { bytes, origin })
    }

    /// Little-endian load address from the PRG header.
    pub fn load_address(&self) -> u16 {
        u16::from_le_bytes([self.bytes[0], self.bytes[1]])
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Always false: [`Program::new`] rejects empty input.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Where the bytes came from, with their size.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Decode standard base64, tolerating surrounding and embedded whitespace.
pub fn decode_base64(data: &str) -> Result<Vec<u8>> {
    let compact: String = data.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return Err(Error::Payload("base64 data is empty".into()));
    }
    base64::engine::general_purpose::STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| {
            Error::Payload(format!(
                "invalid base64 data: {e}. Make sure the string is complete and properly encoded"
            ))
        })
}

/// Resolve `source` to bytes. Only [`ProgramSource::Url`] touches the network.
pub async fn load_program(
    device: &dyn Device,
    source: ProgramSource,
    declared_len: Option<u64>,
) -> Result<Program> {
    match source {
        ProgramSource::Base64(data) => {
            let bytes = decode_base64(&data)?;
            tracing::info!(bytes = bytes.len(), "decoded base64 program");
            Program::new(bytes, "base64 data", declared_len)
        }
        ProgramSource::Url(url) => {
            let bytes = device.fetch(&url).await?;
            tracing::info!(bytes = bytes.len(), %url, "downloaded program");
            Program::new(bytes, format!("URL {url}"), declared_len)
        }
        ProgramSource::File(path) => {
            let bytes = tokio::fs::read(&path).await.map_err(|e| {
                Error::Payload(format!(
                    "cannot read {}: {e}. Consider using 'prg_data_base64' or 'url' instead",
                    path.display()
                ))
            })?;
            Program::new(bytes, format!("file {}", path.display()), declared_len)
        }
    }
}

/// Post the program to the device and describe the outcome.
pub async fn upload_program(device: &dyn Device, program: Program, run: bool) -> Result<Value> {
    let (runner, verb) = if run {
        ("runners:run_prg", "Running")
    } else {
        ("runners:load_prg", "Loaded")
    };
    let size = program.len();
    let load_address = program.load_address();
    let message = format!("{verb} PRG from {}", program.origin());
    tracing::info!(size, load_address, runner, "uploading program");

    let response = device
        .send(DeviceRequest::post(runner).binary(program.into_bytes()))
        .await?;

    Ok(json!({
        "success": true,
        "message": message,
        "size_bytes": size,
        "load_address": format!("${load_address:04X}"),
        "response": response.into_value(),
    }))
}
