//! `POST /upload-prg`: direct program upload without an MCP session.
//!
//! Three request shapes are accepted:
//!
//! - `application/json`: `{"base64" | "prg_data_base64" | "url": ..., "run"?, "length"?}`
//! - `application/octet-stream` or `application/x-binary`: the raw PRG bytes,
//!   `?run=false` to only load
//! - `multipart/form-data`: a `file` field with the PRG, optional `run` field
//!
//! Local file paths are never read on behalf of an HTTP caller.

use std::sync::OnceLock;

use axum::body::to_bytes;
use axum::extract::{FromRequest, Multipart, Query, Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{error_response, AppState};
use crate::error::{Error, Result};
use crate::schema;
use crate::tools::args::{bool_arg, u64_arg};
use crate::tools::upload::{load_program, upload_program, Program, ProgramSource};

/// Base64 inflates a 64 KiB program to ~87 KiB; leave room for JSON framing.
const MAX_UPLOAD_BYTES: usize = 1024 * 1024;

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub run: Option<bool>,
}

fn upload_schema() -> &'static Value {
    static SCHEMA: OnceLock<Value> = OnceLock::new();
    SCHEMA.get_or_init(|| {
        json!({
            "type": "object",
            "properties": {
                "base64": { "type": "string" },
                "prg_data_base64": { "type": "string" },
                "url": { "type": "string" },
                "file_path": { "type": "string" },
                "run": { "type": "boolean" },
                "length": { "type": "integer", "minimum": 1 }
            },
            "additionalProperties": false
        })
    })
}

pub async fn upload_prg(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    request: Request,
) -> Response {
    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase();

    let outcome = if content_type.starts_with("multipart/form-data") {
        from_multipart(&state, query.run, request).await
    } else if content_type.starts_with("application/octet-stream")
        || content_type.starts_with("application/x-binary")
    {
        from_octet_stream(&state, query.run, request).await
    } else {
        from_json(&state, query.run, request).await
    };

    match outcome {
        Ok(value) => (StatusCode::OK, Json(value)).into_response(),
        Err(e) => {
            tracing::warn!(kind = e.kind(), error = %e, "program upload failed");
            error_response(&e)
        }
    }
}

async fn from_json(state: &AppState, run: Option<bool>, request: Request) -> Result<Value> {
    let body = to_bytes(request.into_body(), MAX_UPLOAD_BYTES)
        .await
        .map_err(|e| Error::Payload(format!("cannot read request body: {e}")))?;
    let value: Value = serde_json::from_slice(&body)
        .map_err(|e| Error::invalid(format!("body is not valid JSON: {e}")))?;
    let args = schema::to_object(&value).map_err(Error::invalid)?;

    let mut violations = schema::validate(upload_schema(), &args);
    let source = match ProgramSource::from_args(&args, false) {
        Ok(source) => Some(source),
        Err(errs) => {
            violations.extend(errs);
            None
        }
    };
    let Some(source) = source.filter(|_| violations.is_empty()) else {
        return Err(Error::Validation(violations));
    };

    let program = load_program(state.device.as_ref(), source, u64_arg(&args, "length")).await?;
    let run = bool_arg(&args, "run").or(run).unwrap_or(true);
    upload_program(state.device.as_ref(), program, run).await
}

async fn from_octet_stream(
    state: &AppState,
    run: Option<bool>,
    request: Request,
) -> Result<Value> {
    let body = to_bytes(request.into_body(), MAX_UPLOAD_BYTES)
        .await
        .map_err(|e| Error::Payload(format!("cannot read request body: {e}")))?;
    let program = Program::new(body.to_vec(), "uploaded data", None)?;
    upload_program(state.device.as_ref(), program, run.unwrap_or(true)).await
}

async fn from_multipart(state: &AppState, run: Option<bool>, request: Request) -> Result<Value> {
    let mut multipart = Multipart::from_request(request, state)
        .await
        .map_err(|e| Error::Payload(e.body_text()))?;

    let mut file = None;
    let mut run = run;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::Payload(e.body_text()))?
    {
        match field.name() {
            Some("file") => {
                let name = field.file_name().unwrap_or("upload").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| Error::Payload(e.body_text()))?;
                file = Some((name, bytes));
            }
            Some("run") => {
                let text = field.text().await.map_err(|e| Error::Payload(e.body_text()))?;
                run = Some(!matches!(text.trim(), "false" | "0" | "no"));
            }
            _ => {}
        }
    }

    let (name, bytes) = file.ok_or_else(|| Error::invalid("file: multipart field is required"))?;
    let program = Program::new(bytes.to_vec(), format!("upload {name}"), None)?;
    upload_program(state.device.as_ref(), program, run.unwrap_or(true)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::RequestBody;
    use crate::http::router;
    use crate::http::tests::{body_json, test_state};
    use axum::body::Body;
    use tower::ServiceExt;

    fn json_request(body: Value) -> Request {
        axum::http::Request::post("/upload-prg")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn json_validation_is_400_and_sends_nothing() {
        let (state, device) = test_state();
        let app = router(state);

        let cases = [
            json!({}),
            json!({ "base64": "AQhg", "url": "http://x/a.prg" }),
            json!({ "file_path": "/etc/passwd" }),
            json!({ "base64": "AQhg", "extra": 1 }),
        ];
        for body in cases {
            let response = app.clone().oneshot(json_request(body.clone())).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{body}");
            let err = body_json(response).await;
            assert_eq!(err["error"]["kind"], "validation_error", "{body}");
        }

        let response = app
            .oneshot(json_request(json!({ "base64": "AQhg", "length": 9 })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"]["kind"], "payload_error");

        assert_eq!(device.request_count(), 0);
    }

    #[tokio::test]
    async fn json_base64_upload_runs_program() {
        let (state, device) = test_state();
        let response = router(state)
            .oneshot(json_request(json!({ "base64": "AQhg" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["size_bytes"], 3);

        let requests = device.requests();
        assert_eq!(requests[0].path, "runners:run_prg");
        assert_eq!(requests[0].body, RequestBody::Binary(vec![0x01, 0x08, 0x60]));
    }

    #[tokio::test]
    async fn octet_stream_honours_run_flag() {
        let (state, device) = test_state();
        let response = router(state)
            .oneshot(
                axum::http::Request::post("/upload-prg?run=false")
                    .header("content-type", "application/octet-stream")
                    .body(Body::from(vec![0x00_u8, 0xC0, 0x60]))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["load_address"], "$C000");
        assert_eq!(device.requests()[0].path, "runners:load_prg");
    }

    #[tokio::test]
    async fn x_binary_is_a_raw_body() {
        let (state, device) = test_state();
        let response = router(state)
            .oneshot(
                axum::http::Request::post("/upload-prg")
                    .header("content-type", "application/x-binary")
                    .body(Body::from(vec![0x01_u8, 0x08, 0x60]))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["load_address"], "$0801");
        let requests = device.requests();
        assert_eq!(requests[0].path, "runners:run_prg");
        assert_eq!(requests[0].body, RequestBody::Binary(vec![0x01, 0x08, 0x60]));
    }

    #[tokio::test]
    async fn multipart_file_field() {
        let (state, device) = test_state();
        let boundary = "XBOUNDARYX";
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"hello.prg\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(&[0x01, 0x08, 0x60]);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

        let response = router(state)
            .oneshot(
                axum::http::Request::post("/upload-prg")
                    .header(
                        "content-type",
                        format!("multipart/form-data; boundary={boundary}"),
                    )
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let value = body_json(response).await;
        assert!(value["message"].as_str().unwrap().contains("hello.prg"));
        assert_eq!(device.request_count(), 1);
    }

    #[tokio::test]
    async fn device_failure_is_bad_gateway() {
        let (state, device) = test_state();
        device.respond_with(Err(Error::Device {
            status: 500,
            message: "runner busy".into(),
        }));
        let response = router(state)
            .oneshot(json_request(json!({ "prg_data_base64": "AQhg" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(body_json(response).await["error"]["kind"], "device_error");
    }
}
