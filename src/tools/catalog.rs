//! The built-in Ultimate tool catalog.
//!
//! Registration order is the order of [`builtin_tools`] and is what
//! `tools/list` returns.
//!
//! ## Tool groups
//!
//! - connection: `ultimate_set_connection`, `ultimate_get_connection`
//! - runners: SID/MOD playback, program and cartridge loading, PRG upload
//! - configuration: categories, items, bulk update, flash save/load/reset
//! - drives: mount, power, mode, ROM
//! - files: disk image creation, file info
//! - machine: memory access, reset, reboot, power, pause/resume, info
//! - streams: U64 video/audio/debug data streams

use reqwest::Method;
use serde_json::{json, Value};

use super::{handlers, DeviceRoute, QueryParam, Route, ToolDefinition};

const DRIVES: [&str; 4] = ["A", "B", "C", "D"];
const STREAMS: [&str; 3] = ["video", "audio", "debug"];

/// Closed object schema.
fn schema(properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false
    })
}

fn no_args() -> Value {
    schema(json!({}), &[])
}

fn drive_prop() -> Value {
    json!({
        "type": "string",
        "description": "Drive letter",
        "enum": DRIVES
    })
}

fn stream_prop() -> Value {
    json!({
        "type": "string",
        "description": "Stream type",
        "enum": STREAMS
    })
}

fn path_prop(what: &str) -> Value {
    json!({ "type": "string", "description": what })
}

fn diskname_prop() -> Value {
    json!({
        "type": "string",
        "description": "Disk name shown in the directory header",
        "maxLength": 16
    })
}

fn device(method: Method, path: &'static str, query: Vec<QueryParam>) -> Route {
    Route::Device(DeviceRoute {
        method,
        path,
        query,
    })
}

fn arg(key: &'static str, arg: &'static str) -> QueryParam {
    QueryParam::Arg { key, arg }
}

fn simple(
    name: &'static str,
    description: &'static str,
    method: Method,
    path: &'static str,
) -> ToolDefinition {
    ToolDefinition::new(name, description, no_args(), device(method, path, Vec::new()))
}

/// Tool that takes a single `drive` argument and hits `drives/{drive}:<action>`.
fn drive_action(
    name: &'static str,
    description: &'static str,
    path: &'static str,
) -> ToolDefinition {
    ToolDefinition::new(
        name,
        description,
        schema(json!({ "drive": drive_prop() }), &["drive"]),
        device(Method::PUT, path, Vec::new()),
    )
}

/// Tool that takes a single `file` argument and hands it to a runner.
fn runner(
    name: &'static str,
    description: &'static str,
    path: &'static str,
    file: &str,
) -> ToolDefinition {
    ToolDefinition::new(
        name,
        description,
        schema(json!({ "file": path_prop(file) }), &["file"]),
        device(Method::PUT, path, vec![arg("file", "file")]),
    )
}

pub fn builtin_tools() -> Vec<ToolDefinition> {
    let mut tools = Vec::with_capacity(43);
    tools.extend(connection_tools());
    tools.extend(runner_tools());
    tools.extend(config_tools());
    tools.extend(drive_tools());
    tools.extend(file_tools());
    tools.extend(machine_tools());
    tools.extend(stream_tools());
    tools
}

fn connection_tools() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition::new(
            "ultimate_set_connection",
            "Set the hostname and port of the Ultimate C64 device",
            schema(
                json!({
                    "host": {
                        "type": "string",
                        "description": "Hostname or IP address of the Ultimate device (http:// and https:// URLs are also accepted)",
                        "minLength": 1
                    },
                    "port": {
                        "type": "integer",
                        "description": "HTTP port of the REST API (default 80)",
                        "minimum": 1,
                        "maximum": 65535
                    }
                }),
                &["host"],
            ),
            Route::Handler(handlers::set_connection),
        ),
        ToolDefinition::new(
            "ultimate_get_connection",
            "Get the current connection details for the Ultimate C64 device",
            no_args(),
            Route::Handler(handlers::get_connection),
        ),
    ]
}

fn runner_tools() -> Vec<ToolDefinition> {
    vec![
        simple(
            "ultimate_version",
            "Get the current version of the Ultimate's REST API",
            Method::GET,
            "version",
        ),
        ToolDefinition::new(
            "ultimate_play_sid",
            "Play a SID file from the Ultimate's filesystem or upload one from a local path",
            schema(
                json!({
                    "file": path_prop("Path to the SID file on the Ultimate's filesystem"),
                    "file_path": path_prop("Local SID file to upload and play"),
                    "song_number": {
                        "type": "integer",
                        "description": "Sub-song to play (starting at 1)",
                        "minimum": 1
                    }
                }),
                &[],
            ),
            Route::Handler(handlers::play_sid),
        )
        .with_check(handlers::check_sid_source),
        runner(
            "ultimate_play_mod",
            "Play an Amiga MOD file on the Ultimate",
            "runners:modplay",
            "Path to the MOD file on the Ultimate's filesystem",
        ),
        runner(
            "ultimate_load_program",
            "Load a program into C64 memory (does not run it)",
            "runners:load_prg",
            "Path to the PRG file on the Ultimate's filesystem",
        ),
        runner(
            "ultimate_run_program",
            "Load and run a program on the C64",
            "runners:run_prg",
            "Path to the PRG file on the Ultimate's filesystem",
        ),
        ToolDefinition::new(
            "ultimate_run_prg_binary",
            "Upload and run a PRG file. Accepts a local file path, base64-encoded data, or a URL to download the PRG from. Exactly one source must be given.",
            schema(
                json!({
                    "file_path": {
                        "type": "string",
                        "description": "Path to a PRG file readable by this server"
                    },
                    "prg_data_base64": {
                        "type": "string",
                        "description": "Base64-encoded PRG bytes (including the 2-byte load address)"
                    },
                    "base64": {
                        "type": "string",
                        "description": "Alias of prg_data_base64"
                    },
                    "url": {
                        "type": "string",
                        "description": "http(s) URL the server downloads the PRG from"
                    },
                    "length": {
                        "type": "integer",
                        "description": "Expected size in bytes; the upload is refused if the data does not match",
                        "minimum": 1
                    },
                    "run": {
                        "type": "boolean",
                        "description": "Run after loading (default true). When false the program is only loaded."
                    }
                }),
                &[],
            ),
            Route::Handler(handlers::run_prg_binary),
        )
        .with_check(handlers::check_program_source),
        runner(
            "ultimate_run_cartridge",
            "Load and run a cartridge file",
            "runners:run_crt",
            "Path to the CRT file on the Ultimate's filesystem",
        ),
    ]
}

fn config_tools() -> Vec<ToolDefinition> {
    let category = json!({ "type": "string", "description": "Configuration category name" });
    let item = json!({ "type": "string", "description": "Configuration item name" });
    vec![
        simple(
            "ultimate_get_config_categories",
            "Get all configuration categories",
            Method::GET,
            "configs",
        ),
        ToolDefinition::new(
            "ultimate_get_config_category",
            "Get configuration items in a specific category",
            schema(json!({ "category": category }), &["category"]),
            device(Method::GET, "configs/{category}", Vec::new()),
        ),
        ToolDefinition::new(
            "ultimate_get_config_item",
            "Get specific configuration item details",
            schema(
                json!({ "category": category, "item": item }),
                &["category", "item"],
            ),
            device(Method::GET, "configs/{category}/{item}", Vec::new()),
        ),
        ToolDefinition::new(
            "ultimate_set_config_item",
            "Set a configuration item value",
            schema(
                json!({
                    "category": category,
                    "item": item,
                    "value": { "type": "string", "description": "New value" }
                }),
                &["category", "item", "value"],
            ),
            device(
                Method::PUT,
                "configs/{category}/{item}",
                vec![arg("value", "value")],
            ),
        ),
        ToolDefinition::new(
            "ultimate_bulk_config_update",
            "Update multiple configuration settings at once",
            schema(
                json!({
                    "config": {
                        "type": "object",
                        "description": "Map of category name to a map of item name to value, e.g. {\"Drive A Settings\": {\"Drive\": \"Enabled\"}}"
                    }
                }),
                &["config"],
            ),
            Route::Handler(handlers::bulk_config_update),
        )
        .with_check(handlers::check_bulk_config),
        simple(
            "ultimate_save_config",
            "Save current configuration to flash memory",
            Method::PUT,
            "configs:save_to_flash",
        ),
        simple(
            "ultimate_load_config",
            "Load configuration from flash memory",
            Method::PUT,
            "configs:load_from_flash",
        ),
        simple(
            "ultimate_reset_config",
            "Reset configuration to factory defaults",
            Method::PUT,
            "configs:reset_to_default",
        ),
    ]
}

fn drive_tools() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition::new(
            "ultimate_mount_disk",
            "Mount a disk image on a drive",
            schema(
                json!({
                    "drive": drive_prop(),
                    "file": path_prop("Path to the disk image on the Ultimate's filesystem"),
                    "type": {
                        "type": "string",
                        "description": "Image type; derived from the file extension when omitted",
                        "enum": ["d64", "g64", "d71", "g71", "d81"]
                    },
                    "mode": {
                        "type": "string",
                        "description": "Mount mode",
                        "enum": ["readwrite", "readonly", "unlinked"]
                    }
                }),
                &["drive", "file"],
            ),
            device(
                Method::PUT,
                "drives/{drive}:mount",
                vec![arg("image", "file"), arg("type", "type"), arg("mode", "mode")],
            ),
        ),
        drive_action(
            "ultimate_unmount_disk",
            "Unmount a disk from a drive",
            "drives/{drive}:remove",
        ),
        drive_action("ultimate_turn_drive_on", "Turn on a drive", "drives/{drive}:on"),
        drive_action("ultimate_turn_drive_off", "Turn off a drive", "drives/{drive}:off"),
        drive_action("ultimate_reset_drive", "Reset a drive", "drives/{drive}:reset"),
        ToolDefinition::new(
            "ultimate_set_drive_mode",
            "Set drive mode (1541, 1571, 1581)",
            schema(
                json!({
                    "drive": drive_prop(),
                    "mode": {
                        "type": "string",
                        "description": "Drive type to emulate",
                        "enum": ["1541", "1571", "1581"]
                    }
                }),
                &["drive", "mode"],
            ),
            device(Method::PUT, "drives/{drive}:set_mode", vec![arg("mode", "mode")]),
        ),
        ToolDefinition::new(
            "ultimate_load_drive_rom",
            "Load a custom ROM into a drive",
            schema(
                json!({
                    "drive": drive_prop(),
                    "file": path_prop("Path to the ROM file on the Ultimate's filesystem")
                }),
                &["drive", "file"],
            ),
            device(Method::PUT, "drives/{drive}:load_rom", vec![arg("file", "file")]),
        ),
        simple(
            "ultimate_get_drives",
            "List drives with their mounted images and state",
            Method::GET,
            "drives",
        ),
    ]
}

fn file_tools() -> Vec<ToolDefinition> {
    let image_path = path_prop("Path of the new disk image on the Ultimate's filesystem");
    vec![
        ToolDefinition::new(
            "ultimate_create_d64",
            "Create a D64 disk image",
            schema(
                json!({
                    "path": image_path,
                    "tracks": {
                        "type": "integer",
                        "description": "Number of tracks (default 35)",
                        "enum": [35, 40]
                    },
                    "diskname": diskname_prop()
                }),
                &["path"],
            ),
            device(
                Method::PUT,
                "files/{path}:create_d64",
                vec![arg("tracks", "tracks"), arg("diskname", "diskname")],
            ),
        ),
        ToolDefinition::new(
            "ultimate_create_d71",
            "Create a D71 disk image",
            schema(json!({ "path": image_path, "diskname": diskname_prop() }), &["path"]),
            device(
                Method::PUT,
                "files/{path}:create_d71",
                vec![arg("diskname", "diskname")],
            ),
        ),
        ToolDefinition::new(
            "ultimate_create_d81",
            "Create a D81 disk image",
            schema(json!({ "path": image_path, "diskname": diskname_prop() }), &["path"]),
            device(
                Method::PUT,
                "files/{path}:create_d81",
                vec![arg("diskname", "diskname")],
            ),
        ),
        ToolDefinition::new(
            "ultimate_create_dnp",
            "Create a DNP disk image",
            schema(
                json!({
                    "path": image_path,
                    "tracks": {
                        "type": "integer",
                        "description": "Number of tracks (256 sectors each)",
                        "minimum": 1,
                        "maximum": 255
                    },
                    "diskname": diskname_prop()
                }),
                &["path", "tracks"],
            ),
            device(
                Method::PUT,
                "files/{path}:create_dnp",
                vec![arg("tracks", "tracks"), arg("diskname", "diskname")],
            ),
        ),
        ToolDefinition::new(
            "ultimate_get_file_info",
            "Get information about a file",
            schema(json!({ "path": path_prop("Path on the Ultimate's filesystem") }), &["path"]),
            device(Method::GET, "files/{path}:info", Vec::new()),
        ),
    ]
}

fn machine_tools() -> Vec<ToolDefinition> {
    let address = json!({
        "type": "string",
        "description": "Start address in hex ($0400, 0x0400 or 0400)",
        "maxLength": 6
    });
    vec![
        ToolDefinition::new(
            "ultimate_read_memory",
            "Read memory from a specific address on the C64. Returns the bytes as a hex string.",
            schema(
                json!({
                    "address": address,
                    "length": {
                        "type": "integer",
                        "description": "Number of bytes to read (default 256)",
                        "minimum": 1,
                        "maximum": 256
                    }
                }),
                &["address"],
            ),
            Route::Handler(handlers::read_memory),
        )
        .with_check(handlers::check_read_memory),
        ToolDefinition::new(
            "ultimate_write_memory",
            "Write data to a specific memory address on the C64 using a hex string (at most 128 bytes)",
            schema(
                json!({
                    "address": address,
                    "data": {
                        "type": "string",
                        "description": "Bytes to write as hex, e.g. \"0E06\""
                    }
                }),
                &["address", "data"],
            ),
            Route::Handler(handlers::write_memory),
        )
        .with_check(handlers::check_write_memory),
        ToolDefinition::new(
            "ultimate_write_memory_binary",
            "Write binary data from a file to a specific memory address on the C64",
            schema(
                json!({
                    "address": address,
                    "file_path": {
                        "type": "string",
                        "description": "Path to a binary file readable by this server"
                    }
                }),
                &["address", "file_path"],
            ),
            Route::Handler(handlers::write_memory_binary),
        )
        .with_check(handlers::check_address),
        simple(
            "ultimate_reset_machine",
            "Reset the C64 machine",
            Method::PUT,
            "machine:reset",
        ),
        ToolDefinition::new(
            "ultimate_soft_reset",
            "Perform a soft reset (load empty program)",
            no_args(),
            device(
                Method::PUT,
                "runners:load_prg",
                vec![QueryParam::Fixed {
                    key: "file",
                    value: "",
                }],
            ),
        ),
        simple(
            "ultimate_reboot_device",
            "Reboot the Ultimate device",
            Method::PUT,
            "machine:reboot",
        ),
        simple(
            "ultimate_power_off",
            "Power off the Ultimate device (U64 only)",
            Method::PUT,
            "machine:poweroff",
        ),
        simple(
            "ultimate_pause",
            "Pause the C64 by halting the CPU bus",
            Method::PUT,
            "machine:pause",
        ),
        simple(
            "ultimate_resume",
            "Resume a paused C64",
            Method::PUT,
            "machine:resume",
        ),
        simple(
            "ultimate_get_machine_info",
            "Get machine information and status",
            Method::GET,
            "machine:info",
        ),
        simple(
            "ultimate_get_machine_state",
            "Get current machine state",
            Method::GET,
            "machine:state",
        ),
    ]
}

fn stream_tools() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition::new(
            "ultimate_start_stream",
            "Start a data stream (U64 only: video, audio, debug)",
            schema(
                json!({
                    "stream": stream_prop(),
                    "ip": {
                        "type": "string",
                        "description": "Destination host[:port] for the UDP stream"
                    }
                }),
                &["stream", "ip"],
            ),
            device(Method::PUT, "streams/{stream}:start", vec![arg("ip", "ip")]),
        ),
        ToolDefinition::new(
            "ultimate_stop_stream",
            "Stop a data stream (U64 only)",
            schema(json!({ "stream": stream_prop() }), &["stream"]),
            device(Method::PUT, "streams/{stream}:stop", Vec::new()),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_has_every_tool_once() {
        let tools = builtin_tools();
        assert_eq!(tools.len(), 43);
        assert_eq!(tools.last().map(|t| t.name), Some("ultimate_stop_stream"));
    }

    #[test]
    fn definitions_render_for_tools_list() {
        let tools = builtin_tools();
        let mount = tools
            .iter()
            .find(|t| t.name == "ultimate_mount_disk")
            .unwrap()
            .to_json();
        assert_eq!(mount["inputSchema"]["required"], json!(["drive", "file"]));
        assert_eq!(
            mount["inputSchema"]["properties"]["drive"]["enum"],
            json!(["A", "B", "C", "D"])
        );
    }

    #[test]
    fn routes_use_known_verbs() {
        for tool in builtin_tools() {
            if let Route::Device(route) = &tool.route {
                assert!(
                    [Method::GET, Method::PUT, Method::POST].contains(&route.method),
                    "{}",
                    tool.name
                );
                assert!(!route.path.starts_with('/'), "{}", tool.name);
            }
        }
    }
}
