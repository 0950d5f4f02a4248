//! HTTP client for the Ultimate REST API.
//!
//! The [`Device`] trait is the seam between tool semantics and the network:
//! one [`DeviceRequest`] in, one HTTP request out. [`HttpDevice`] is the
//! reqwest-backed implementation; tests substitute a recording stub.
//!
//! ## Response normalization
//!
//! | Device answer               | Result                               |
//! |-----------------------------|--------------------------------------|
//! | `204 No Content`            | [`DeviceResponse::Empty`]            |
//! | 2xx with JSON content type  | [`DeviceResponse::Json`]             |
//! | 2xx with any other body     | [`DeviceResponse::Bytes`]            |
//! | non-2xx                     | [`Error::Device`] with status + text |
//! | refused / DNS / timeout     | [`Error::Connection`]                |
//!
//! The device reports failures as `{"errors": ["..."]}`. Those messages are
//! lifted into [`Error::Device`], even when they arrive with a 2xx status.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};

use crate::connection::ConnectionState;
use crate::error::{Error, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Binary uploads and URL downloads may carry a full program image.
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(60);

/// Per-phase limits for [`HttpDevice`]. Any expiry surfaces as
/// [`Error::Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    /// Requests without a body or with a JSON body.
    pub request: Duration,
    /// Binary uploads and downloads.
    pub transfer: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: CONNECT_TIMEOUT,
            request: REQUEST_TIMEOUT,
            transfer: TRANSFER_TIMEOUT,
        }
    }
}

/// Body of a device request.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Empty,
    Json(Value),
    /// Sent as `application/octet-stream`.
    Binary(Vec<u8>),
}

/// One logical device operation: verb, path below `/v1`, query, body.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceRequest {
    pub method: Method,
    /// Path relative to the API root, e.g. `drives/A:mount`. Empty segments
    /// are dropped; every segment is percent-encoded when the URL is built.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: RequestBody,
}

impl DeviceRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn json(mut self, body: Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    #[must_use]
    pub fn binary(mut self, bytes: Vec<u8>) -> Self {
        self.body = RequestBody::Binary(bytes);
        self
    }

    /// Non-empty path segments, unencoded.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.path.split('/').filter(|s| !s.is_empty())
    }
}

/// Successful device answer.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceResponse {
    Empty,
    Json(Value),
    Bytes(Vec<u8>),
}

impl DeviceResponse {
    /// JSON view handed back to the agent. Raw bytes are hex-encoded and an
    /// empty `errors` array is dropped.
    pub fn into_value(self) -> Value {
        match self {
            DeviceResponse::Empty => json!({ "ok": true }),
            DeviceResponse::Json(mut v) => {
                if let Some(obj) = v.as_object_mut() {
                    if obj
                        .get("errors")
                        .and_then(Value::as_array)
                        .is_some_and(Vec::is_empty)
                    {
                        obj.remove("errors");
                    }
                    if obj.is_empty() {
                        return json!({ "ok": true });
                    }
                }
                v
            }
            DeviceResponse::Bytes(bytes) => json!({ "data": hex::encode_upper(bytes) }),
        }
    }
}

/// Issues requests against the current device.
#[async_trait]
pub trait Device: Send + Sync {
    /// Perform exactly one HTTP request against the current connection.
    async fn send(&self, request: DeviceRequest) -> Result<DeviceResponse>;

    /// Download a resource from an arbitrary `http`/`https` URL.
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// reqwest-backed [`Device`] bound to the shared [`ConnectionState`].
pub struct HttpDevice {
    http: reqwest::Client,
    connection: Arc<ConnectionState>,
    timeouts: Timeouts,
}

impl HttpDevice {
    pub fn new(connection: Arc<ConnectionState>) -> Result<Self> {
        Self::with_timeouts(connection, Timeouts::default())
    }

    pub fn with_timeouts(connection: Arc<ConnectionState>, timeouts: Timeouts) -> Result<Self> {
        let mut default_headers = reqwest::header::HeaderMap::new();
        default_headers.insert(
            reqwest::header::HeaderName::from_static("x-ultimate-client"),
            reqwest::header::HeaderValue::from_static("mcp"),
        );
        let http = reqwest::Client::builder()
            .default_headers(default_headers)
            .connect_timeout(timeouts.connect)
            .build()
            .map_err(|e| Error::Connection(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            connection,
            timeouts,
        })
    }

    fn build_url(api_base: &str, request: &DeviceRequest) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(api_base)
            .map_err(|e| Error::Connection(format!("invalid device URL {api_base}: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| Error::Connection(format!("device URL {api_base} cannot be a base")))?
            .pop_if_empty()
            .extend(request.segments());
        if !request.query.is_empty() {
            let query: Vec<String> = request
                .query
                .iter()
                .map(|(k, v)| format!("{}={}", encode_component(k), encode_component(v)))
                .collect();
            url.set_query(Some(&query.join("&")));
        }
        Ok(url)
    }

    /// Parse an HTTP response into a [`DeviceResponse`], or an
    /// [`Error::Device`] carrying the device's message.
    async fn handle_response(resp: reqwest::Response) -> Result<DeviceResponse> {
        let status = resp.status();
        let is_json = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("json"));
        let body = resp.bytes().await.map_err(|e| Error::from_transport(&e))?;

        if !status.is_success() {
            let text = String::from_utf8_lossy(&body).into_owned();
            let message = serde_json::from_slice::<Value>(&body)
                .ok()
                .and_then(|v| device_message(&v))
                .unwrap_or(text);
            return Err(Error::Device {
                status: status.as_u16(),
                message,
            });
        }

        if status == reqwest::StatusCode::NO_CONTENT || body.is_empty() {
            return Ok(DeviceResponse::Empty);
        }

        if is_json {
            let value: Value = serde_json::from_slice(&body)
                .map_err(|e| Error::Payload(format!("invalid JSON from device: {e}")))?;
            if let Some(message) = device_message(&value) {
                return Err(Error::Device {
                    status: status.as_u16(),
                    message,
                });
            }
            Ok(DeviceResponse::Json(value))
        } else {
            Ok(DeviceResponse::Bytes(body.to_vec()))
        }
    }
}

/// Percent-encode a query component. Spaces become `%20`; the device does
/// not decode `+`.
fn encode_component(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        let unreserved = matches!(byte, b'-' | b'_' | b'.' | b'~' | b'*' | b'/' | b':');
        if byte.is_ascii_alphanumeric() || unreserved {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

/// Extract a non-empty `errors` array or `error` string from a device body.
fn device_message(body: &Value) -> Option<String> {
    if let Some(errors) = body.get("errors").and_then(Value::as_array) {
        let messages: Vec<String> = errors
            .iter()
            .map(|e| e.as_str().map_or_else(|| e.to_string(), String::from))
            .collect();
        if !messages.is_empty() {
            return Some(messages.join(", "));
        }
    }
    body.get("error").and_then(Value::as_str).map(String::from)
}

#[async_trait]
impl Device for HttpDevice {
    async fn send(&self, request: DeviceRequest) -> Result<DeviceResponse> {
        let connection = self.connection.get().await.ok_or(Error::NotConfigured)?;
        let url = Self::build_url(&connection.api_base(), &request)?;
        tracing::debug!(method = %request.method, %url, "device request");

        let builder = self.http.request(request.method.clone(), url);
        let builder = match request.body {
            RequestBody::Empty => builder.timeout(self.timeouts.request),
            RequestBody::Json(body) => builder.timeout(self.timeouts.request).json(&body),
            RequestBody::Binary(bytes) => builder
                .timeout(self.timeouts.transfer)
                .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                .body(bytes),
        };

        let resp = builder.send().await.map_err(|e| Error::from_transport(&e))?;
        Self::handle_response(resp).await
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| Error::invalid(format!("url: invalid URL '{url}': {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::invalid(format!(
                "url: unsupported scheme '{}' (expected http or https)",
                parsed.scheme()
            )));
        }
        tracing::info!(%url, "downloading program");

        let resp = self
            .http
            .get(parsed)
            .timeout(self.timeouts.transfer)
            .send()
            .await
            .map_err(|e| Error::from_transport(&e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Device {
                status: status.as_u16(),
                message: format!("download of {url} failed"),
            });
        }
        let bytes = resp.bytes().await.map_err(|e| Error::from_transport(&e))?;
        Ok(bytes.to_vec())
    }
}
