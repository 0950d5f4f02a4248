//! Local handlers and argument checks for the composite tools.

use futures::future::BoxFuture;
use serde_json::{json, Map, Value};

use crate::client::{DeviceRequest, DeviceResponse};
use crate::connection::Connection;
use crate::error::{Error, Result};

use super::args::{
    bool_arg, check_range, format_address, non_empty_str, parse_address, parse_hex_data, str_arg,
    u64_arg, Args, MAX_READ_LENGTH,
};
use super::upload::{load_program, upload_program, ProgramSource};
use super::ToolContext;

// --- checks ---------------------------------------------------------------

pub fn check_address(args: &Args) -> Vec<String> {
    match str_arg(args, "address").map(parse_address) {
        Some(Err(e)) => vec![e],
        _ => Vec::new(),
    }
}

pub fn check_read_memory(args: &Args) -> Vec<String> {
    let Some(address) = str_arg(args, "address") else {
        return Vec::new();
    };
    let address = match parse_address(address) {
        Ok(a) => a,
        Err(e) => return vec![e],
    };
    let length = u64_arg(args, "length").unwrap_or(MAX_READ_LENGTH);
    if !(1..=MAX_READ_LENGTH).contains(&length) {
        // Already reported by the schema.
        return Vec::new();
    }
    match check_range(address, length) {
        Ok(()) => Vec::new(),
        Err(e) => vec![format!("length: {e}")],
    }
}

pub fn check_write_memory(args: &Args) -> Vec<String> {
    let mut violations = Vec::new();
    let address = str_arg(args, "address").map(parse_address);
    if let Some(Err(e)) = &address {
        violations.push(e.clone());
    }
    if let Some(data) = str_arg(args, "data") {
        match parse_hex_data(data) {
            Ok(bytes) => {
                if let Some(Ok(address)) = address {
                    if let Err(e) = check_range(address, bytes.len() as u64) {
                        violations.push(format!("data: {e}"));
                    }
                }
            }
            Err(errs) => violations.extend(errs),
        }
    }
    violations
}

/// `play_sid` plays either a file on the device or a local upload.
pub fn check_sid_source(args: &Args) -> Vec<String> {
    let on_device = non_empty_str(args, "file").is_some();
    let local = non_empty_str(args, "file_path").is_some();
    match (on_device, local) {
        (true, true) => vec!["give either file or file_path, not both".to_string()],
        (false, false) => vec!["one of file or file_path is required".to_string()],
        _ => Vec::new(),
    }
}

pub fn check_program_source(args: &Args) -> Vec<String> {
    ProgramSource::from_args(args, true).err().unwrap_or_default()
}

/// Each category must be an object whose values are strings, numbers or
/// booleans.
pub fn check_bulk_config(args: &Args) -> Vec<String> {
    let Some(config) = args.get("config").and_then(Value::as_object) else {
        return Vec::new();
    };
    let mut violations = Vec::new();
    if config.is_empty() {
        violations.push("config: must contain at least one category".to_string());
    }
    for (category, items) in config {
        let Some(items) = items.as_object() else {
            violations.push(format!(
                "config.{category}: must be an object of item settings"
            ));
            continue;
        };
        for (item, value) in items {
            if !(value.is_string() || value.is_number() || value.is_boolean()) {
                violations.push(format!(
                    "config.{category}.{item}: value must be a string, number or boolean"
                ));
            }
        }
    }
    violations
}

// --- connection -----------------------------------------------------------

fn connection_json(connection: Option<&Connection>) -> Value {
    match connection {
        Some(c) => json!({ "host": c.host, "port": c.port, "base_url": c.base_url() }),
        None => Value::Null,
    }
}

pub fn set_connection<'a>(ctx: &'a ToolContext, args: &'a Args) -> BoxFuture<'a, Result<Value>> {
    Box::pin(async move {
        let host = str_arg(args, "host").unwrap_or_default();
        let port = match u64_arg(args, "port") {
            Some(p) => Some(
                u16::try_from(p)
                    .map_err(|_| Error::invalid(format!("port: {p} is not a valid port")))?,
            ),
            None => None,
        };
        let connection =
            Connection::parse(host, port).map_err(|e| Error::invalid(format!("host: {e}")))?;
        let base_url = connection.base_url();

        let previous = ctx.connection.set(connection.clone()).await;
        tracing::info!(
            host = %connection.host,
            port = connection.port,
            "device connection changed"
        );

        Ok(json!({
            "ok": true,
            "message": format!("Connection set to {base_url}"),
            "host": connection.host,
            "port": connection.port,
            "base_url": base_url,
            "previous": connection_json(previous.as_ref()),
        }))
    })
}

pub fn get_connection<'a>(ctx: &'a ToolContext, _args: &'a Args) -> BoxFuture<'a, Result<Value>> {
    Box::pin(async move {
        let current = ctx.connection.get().await;
        Ok(match current {
            Some(c) => json!({
                "host": c.host,
                "port": c.port,
                "base_url": c.base_url(),
                "configured": true,
            }),
            None => json!({
                "host": null,
                "port": null,
                "base_url": null,
                "configured": false,
            }),
        })
    })
}

// --- memory ---------------------------------------------------------------

fn address_arg(args: &Args) -> Result<u16> {
    let raw = str_arg(args, "address").ok_or_else(|| Error::invalid("address: is required"))?;
    parse_address(raw).map_err(Error::invalid)
}

pub fn read_memory<'a>(ctx: &'a ToolContext, args: &'a Args) -> BoxFuture<'a, Result<Value>> {
    Box::pin(async move {
        let address = address_arg(args)?;
        let length = u64_arg(args, "length").unwrap_or(MAX_READ_LENGTH);

        let request = DeviceRequest::get("machine:readmem")
            .query("address", format_address(address))
            .query("length", length.to_string());
        match ctx.device.send(request).await? {
            DeviceResponse::Bytes(bytes) => Ok(json!({
                "address": format!("${}", format_address(address)),
                "length": bytes.len(),
                "data": hex::encode_upper(bytes),
            })),
            other => Ok(other.into_value()),
        }
    })
}

pub fn write_memory<'a>(ctx: &'a ToolContext, args: &'a Args) -> BoxFuture<'a, Result<Value>> {
    Box::pin(async move {
        let address = address_arg(args)?;
        let data = str_arg(args, "data").unwrap_or_default();
        let bytes = parse_hex_data(data).map_err(Error::Validation)?;

        let request = DeviceRequest::put("machine:writemem")
            .query("address", format_address(address))
            .query("data", hex::encode_upper(&bytes));
        let response = ctx.device.send(request).await?;
        Ok(json!({
            "ok": true,
            "address": format!("${}", format_address(address)),
            "bytes_written": bytes.len(),
            "response": response.into_value(),
        }))
    })
}

pub fn write_memory_binary<'a>(
    ctx: &'a ToolContext,
    args: &'a Args,
) -> BoxFuture<'a, Result<Value>> {
    Box::pin(async move {
        let address = address_arg(args)?;
        let path = non_empty_str(args, "file_path")
            .ok_or_else(|| Error::invalid("file_path: is required"))?;
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| Error::Payload(format!("cannot read {path}: {e}")))?;
        if bytes.is_empty() {
            return Err(Error::Payload(format!("{path} is empty")));
        }
        check_range(address, bytes.len() as u64)
            .map_err(|e| Error::invalid(format!("file_path: {e}")))?;

        let size = bytes.len();
        let request = DeviceRequest::post("machine:writemem")
            .query("address", format_address(address))
            .binary(bytes);
        let response = ctx.device.send(request).await?;
        Ok(json!({
            "ok": true,
            "address": format!("${}", format_address(address)),
            "bytes_written": size,
            "response": response.into_value(),
        }))
    })
}

// --- runners --------------------------------------------------------------

/// Play a SID either from the device filesystem (`PUT`) or by uploading a
/// local file as the request body (`POST`).
pub fn play_sid<'a>(ctx: &'a ToolContext, args: &'a Args) -> BoxFuture<'a, Result<Value>> {
    Box::pin(async move {
        let song = u64_arg(args, "song_number");
        let (request, source) = if let Some(path) = non_empty_str(args, "file_path") {
            let bytes = tokio::fs::read(path)
                .await
                .map_err(|e| Error::Payload(format!("cannot read {path}: {e}")))?;
            if bytes.is_empty() {
                return Err(Error::Payload(format!("{path} is empty")));
            }
            (DeviceRequest::post("runners:sidplay").binary(bytes), path)
        } else {
            let file = non_empty_str(args, "file")
                .ok_or_else(|| Error::invalid("one of file or file_path is required"))?;
            (DeviceRequest::put("runners:sidplay").query("file", file), file)
        };
        let request = match song {
            Some(n) => request.query("songnr", n.to_string()),
            None => request,
        };

        let response = ctx.device.send(request).await?;
        Ok(json!({
            "ok": true,
            "message": format!("Playing {source}"),
            "song_number": song,
            "response": response.into_value(),
        }))
    })
}

// --- uploads & bulk config -------------------------------------------------

pub fn run_prg_binary<'a>(ctx: &'a ToolContext, args: &'a Args) -> BoxFuture<'a, Result<Value>> {
    Box::pin(async move {
        let source = ProgramSource::from_args(args, true).map_err(Error::Validation)?;
        let program = load_program(ctx.device.as_ref(), source, u64_arg(args, "length")).await?;
        upload_program(ctx.device.as_ref(), program, bool_arg(args, "run").unwrap_or(true)).await
    })
}

pub fn bulk_config_update<'a>(
    ctx: &'a ToolContext,
    args: &'a Args,
) -> BoxFuture<'a, Result<Value>> {
    Box::pin(async move {
        let config = args
            .get("config")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_else(Map::new);
        let categories = config.len();
        let response = ctx
            .device
            .send(DeviceRequest::post("configs").json(Value::Object(config)))
            .await?;
        Ok(json!({
            "ok": true,
            "categories_updated": categories,
            "response": response.into_value(),
        }))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(v: Value) -> Args {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn read_check_accepts_full_page_and_rejects_overrun() {
        assert!(check_read_memory(&args(json!({ "address": "$0400", "length": 256 }))).is_empty());
        assert!(check_read_memory(&args(json!({ "address": "FF00" }))).is_empty());
        let v = check_read_memory(&args(json!({ "address": "FF01" })));
        assert_eq!(v.len(), 1);
        assert!(v[0].starts_with("length:"));
    }

    #[test]
    fn read_check_leaves_bounds_to_the_schema() {
        assert!(check_read_memory(&args(json!({ "address": "0400", "length": 300 }))).is_empty());
    }

    #[test]
    fn write_check_combines_address_and_data_problems() {
        let v = check_write_memory(&args(json!({ "address": "$", "data": "abc" })));
        assert_eq!(v.len(), 2, "{v:?}");
        let v = check_write_memory(&args(json!({ "address": "FFFF", "data": "0102" })));
        assert_eq!(v.len(), 1, "{v:?}");
        assert!(v[0].contains("past $FFFF"));
    }

    #[test]
    fn bulk_config_needs_nested_scalars() {
        let ok = args(json!({ "config": { "Audio": { "Volume": 3 } } }));
        assert!(check_bulk_config(&ok).is_empty());
        assert_eq!(check_bulk_config(&args(json!({ "config": {} }))).len(), 1);
        assert_eq!(
            check_bulk_config(&args(json!({ "config": { "Audio": [] } }))),
            vec!["config.Audio: must be an object of item settings".to_string()]
        );
    }

    #[test]
    fn sid_source_needs_exactly_one_location() {
        assert!(check_sid_source(&args(json!({ "file": "/USB0/a.sid" }))).is_empty());
        assert!(check_sid_source(&args(json!({ "file_path": "/tmp/a.sid" }))).is_empty());
        assert_eq!(check_sid_source(&args(json!({}))).len(), 1);
        assert_eq!(
            check_sid_source(&args(json!({ "file": "/a.sid", "file_path": "/b.sid" }))).len(),
            1
        );
    }
}
