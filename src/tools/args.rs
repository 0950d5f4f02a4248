//! Argument helpers: typed accessors and the C64 memory rules.

use serde_json::{Map, Value};

/// Tool arguments after the "must be an object" check.
pub type Args = Map<String, Value>;

/// Size of the C64 address space.
pub const MEMORY_SIZE: u32 = 0x1_0000;
/// Largest block `machine:readmem` returns in one call.
pub const MAX_READ_LENGTH: u64 = 256;
/// Largest block `machine:writemem` accepts as a hex query string.
pub const MAX_WRITE_BYTES: usize = 128;

pub fn str_arg<'a>(args: &'a Args, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}

/// String argument with surrounding whitespace removed; blank counts as absent.
pub fn non_empty_str<'a>(args: &'a Args, key: &str) -> Option<&'a str> {
    str_arg(args, key).map(str::trim).filter(|s| !s.is_empty())
}

pub fn u64_arg(args: &Args, key: &str) -> Option<u64> {
    args.get(key).and_then(Value::as_u64)
}

pub fn bool_arg(args: &Args, key: &str) -> Option<bool> {
    args.get(key).and_then(Value::as_bool)
}

/// Render a scalar argument for a URL path or query string.
pub fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Parse a 16-bit address written as hex (`C000`, `$C000`, `0xc000`).
pub fn parse_address(input: &str) -> Result<u16, String> {
    let trimmed = input.trim();
    let digits = trimmed
        .strip_prefix('$')
        .or_else(|| trimmed.strip_prefix("0x"))
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    if digits.is_empty() {
        return Err(format!("address: '{input}' contains no hex digits"));
    }
    if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(format!("address: '{input}' is not a hexadecimal number"));
    }
    if digits.len() > 4 {
        return Err(format!("address: '{input}' is outside $0000-$FFFF"));
    }
    u16::from_str_radix(digits, 16).map_err(|e| format!("address: '{input}': {e}"))
}

/// Address in the form the device expects: four uppercase hex digits.
pub fn format_address(address: u16) -> String {
    format!("{address:04X}")
}

/// Ensure `len` bytes starting at `address` stay inside the address space.
pub fn check_range(address: u16, len: u64) -> Result<(), String> {
    let end = u64::from(address) + len;
    if end > u64::from(MEMORY_SIZE) {
        return Err(format!(
            "{len} bytes at ${} would run past $FFFF",
            format_address(address)
        ));
    }
    Ok(())
}

/// Decode a hex byte string for `machine:writemem`, collecting every problem.
pub fn parse_hex_data(input: &str) -> Result<Vec<u8>, Vec<String>> {
    let data: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    let mut violations = Vec::new();

    if data.is_empty() {
        violations.push("data: must contain at least one byte".to_string());
        return Err(violations);
    }
    if data.len() % 2 != 0 {
        violations.push(format!(
            "data: hex string must have an even number of digits, got {}",
            data.len()
        ));
    }
    let bad: Vec<char> = data.chars().filter(|c| !c.is_ascii_hexdigit()).collect();
    if !bad.is_empty() {
        let shown: String = bad.iter().take(8).collect();
        violations.push(format!("data: contains non-hex characters '{shown}'"));
    }
    let bytes = data.len() / 2;
    if bytes > MAX_WRITE_BYTES {
        violations.push(format!(
            "data: at most {MAX_WRITE_BYTES} bytes can be written at once, got {bytes}"
        ));
    }

    if !violations.is_empty() {
        return Err(violations);
    }
    hex::decode(&data).map_err(|e| vec![format!("data: {e}")])
}
